//! Process-wide logging setup, mirroring the teacher's split between a
//! single injectable sink installed once at process start
//! (`agent_core::telemetry`) and ordinary `tracing` call sites elsewhere in
//! the crate.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Installs a `tracing-subscriber` pipeline driven by `RUST_LOG` (default
/// `info`). Call once, at process start.
pub fn init() {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	let fmt_layer = fmt::layer().with_target(false);
	let _ = tracing_subscriber::registry()
		.with(filter)
		.with(fmt_layer)
		.try_init();
}
