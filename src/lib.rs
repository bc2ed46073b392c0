//! An HTTP isolation proxy: fronts several logically distinct backend
//! services, each backed by a pool of endpoints, routing each inbound
//! request to a healthy endpoint while passively tracking endpoint health
//! and actively probing unhealthy endpoints until they recover.
//!
//! Module layout follows the component breakdown this crate is built
//! around:
//!
//! - [`endpoint`] — one backend address, its counters, and its health
//!   state machine.
//! - [`registry`] — endpoint pools per service and the selection policy.
//! - [`director`] — the per-service inbound listener: select, forward,
//!   retry, synthesize unavailable.
//! - [`proxy`] — top-level owner: builds the registry, spawns Directors.
//! - [`stats`] — aggregates endpoint counters into the stats snapshot.
//! - [`admin`] — the stats HTTP surface.
//! - [`config`] — configuration file parsing.
//! - [`tunables`] — the timing knobs shared across the above.
//! - [`telemetry`] — logging setup.
//! - [`error`] — the closed error taxonomy reaching a client response.

pub mod admin;
pub mod config;
pub mod director;
pub mod endpoint;
pub mod error;
pub mod proxy;
pub mod registry;
pub mod stats;
pub mod telemetry;
pub mod tunables;

pub use config::Config;
pub use error::ProxyError;
pub use proxy::Proxy;
