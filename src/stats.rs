//! C5: aggregates per-endpoint counters into the JSON-serializable shape
//! described in spec §4.5/§6, plus a convenience counter standing in for
//! "goroutines" (Rust has no direct equivalent; this counts live
//! connection/listener tasks spawned by the proxy). Grounded on the
//! teacher's `management/admin.rs` `ConfigDump`-style snapshot structs:
//! a plain `#[derive(Serialize)]` struct rendered straight to JSON by the
//! admin HTTP surface.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::registry::Registry;

#[derive(Serialize, Debug, Clone)]
pub struct EndpointStats {
	#[serde(rename = "Requests")]
	pub requests: u64,
	#[serde(rename = "Load")]
	pub load: i64,
	#[serde(rename = "AvgDuration")]
	pub avg_duration: String,
	#[serde(rename = "Active")]
	pub active: bool,
	#[serde(rename = "Errors")]
	pub errors: u64,
}

#[derive(Serialize, Debug, Clone)]
pub struct ServiceStats {
	#[serde(rename = "Requests")]
	pub requests: u64,
	#[serde(rename = "Load")]
	pub load: i64,
	#[serde(rename = "AvgDuration")]
	pub avg_duration: String,
	#[serde(rename = "Active")]
	pub active: bool,
	#[serde(rename = "Errors")]
	pub errors: u64,
	#[serde(rename = "Endpoints")]
	pub endpoints: BTreeMap<String, EndpointStats>,
}

pub type ProxyStats = BTreeMap<String, ServiceStats>;

fn format_avg(d: Option<Duration>) -> String {
	match d {
		Some(d) => format!("{d:?}"),
		None => "(no data)".to_string(),
	}
}

/// Walks every service, sums `requests`/`load`/`totalDuration`/`errors`
/// across its endpoints, ORs `active`, and divides to get an average.
/// Eventually consistent with each endpoint's counter mutex, per spec
/// §4.5.
pub fn snapshot(registry: &Registry) -> ProxyStats {
	let mut out = ProxyStats::new();
	for service in registry.services() {
		let Ok(collection) = registry.endpoints(service) else {
			continue;
		};

		let mut requests = 0u64;
		let mut load = 0i64;
		let mut errors = 0u64;
		let mut total_duration = Duration::ZERO;
		let mut active = false;
		let mut endpoints = BTreeMap::new();

		for ep in collection.iter() {
			let snap = ep.snapshot();
			requests += snap.requests;
			load += snap.load;
			errors += snap.errors;
			total_duration += snap.total_duration;
			active |= snap.active;

			endpoints.insert(
				snap.host.clone(),
				EndpointStats {
					requests: snap.requests,
					load: snap.load,
					avg_duration: format_avg(snap.avg_duration()),
					active: snap.active,
					errors: snap.errors,
				},
			);
		}

		let avg_duration = format_avg(if requests == 0 {
			None
		} else {
			Some(total_duration / requests as u32)
		});

		out.insert(
			service.to_string(),
			ServiceStats {
				requests,
				load,
				avg_duration,
				active,
				errors,
				endpoints,
			},
		);
	}
	out
}

#[derive(Serialize, Debug, Clone, Copy)]
pub struct RuntimeStats {
	#[serde(rename = "Goroutines")]
	pub goroutines: usize,
}

/// Counts live connection-handling tasks across all Directors. Not a true
/// goroutine count (Rust has no direct equivalent) — a convenience probe,
/// per spec §4.5.
#[derive(Clone, Default)]
pub struct TaskCounter(Arc<AtomicUsize>);

impl TaskCounter {
	pub fn new() -> Self {
		TaskCounter::default()
	}

	pub fn guard(&self) -> TaskGuard {
		self.0.fetch_add(1, Ordering::SeqCst);
		TaskGuard(Arc::clone(&self.0))
	}

	pub fn count(&self) -> usize {
		self.0.load(Ordering::SeqCst)
	}
}

pub struct TaskGuard(Arc<AtomicUsize>);

impl Drop for TaskGuard {
	fn drop(&mut self) {
		self.0.fetch_sub(1, Ordering::SeqCst);
	}
}
