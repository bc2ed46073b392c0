//! `EndpointCollection` + `Registry` (spec §4.2): pooled endpoints per
//! service and the two selection policies, `Get` (normal) and
//! `EmergencyGet` (admits `Overloaded`). Modeled the way the teacher keeps
//! its backend lookups process-local and serializable behind a small
//! trait-free struct rather than a trait object — spec §4.2 explicitly
//! notes the registry is "pluggable" only in principle; the only shipped
//! implementation is local.

use std::collections::HashMap;
use std::sync::Arc;

use crate::endpoint::Endpoint;
use crate::error::ProxyError;

/// Endpoints of one service, in insertion order. Order only matters for
/// the first-seen tie-break in selection.
#[derive(Default, Clone)]
pub struct EndpointCollection {
	endpoints: Vec<Arc<Endpoint>>,
}

impl EndpointCollection {
	pub fn push(&mut self, endpoint: Arc<Endpoint>) {
		self.endpoints.push(endpoint);
	}

	pub fn iter(&self) -> impl Iterator<Item = &Arc<Endpoint>> {
		self.endpoints.iter()
	}

	pub fn is_empty(&self) -> bool {
		self.endpoints.is_empty()
	}

	/// Lowest `(load, reqs)` among `Active` endpoints; ties favor the
	/// endpoint seen first in insertion order. `O(n)`, fine for the small
	/// pools (typically <= 10) this proxy targets.
	pub fn get(&self) -> Option<Arc<Endpoint>> {
		self.select(false)
	}

	/// As `get`, but also admits `Overloaded` endpoints. Used only once
	/// normal selection and the emergency wait window have both failed.
	pub fn emergency_get(&self) -> Option<Arc<Endpoint>> {
		self.select(true)
	}

	fn select(&self, admit_overloaded: bool) -> Option<Arc<Endpoint>> {
		let mut best: Option<(&Arc<Endpoint>, i64, u64)> = None;
		for ep in &self.endpoints {
			let eligible = ep.active() || (admit_overloaded && ep.overloaded());
			if !eligible {
				continue;
			}
			let load = ep.load();
			let reqs = ep.reqs();
			let better = match &best {
				None => true,
				Some((_, best_load, best_reqs)) => {
					(load, reqs) < (*best_load, *best_reqs)
				},
			};
			if better {
				best = Some((ep, load, reqs));
			}
		}
		best.map(|(ep, _, _)| Arc::clone(ep))
	}
}

/// Process-local mapping from service name to its `EndpointCollection`.
#[derive(Default)]
pub struct Registry {
	services: HashMap<String, EndpointCollection>,
}

impl Registry {
	pub fn new() -> Self {
		Registry::default()
	}

	/// Appends `endpoint` to `service`'s collection, creating the
	/// collection if this is the first endpoint seen for it. No
	/// deduplication.
	pub fn add(&mut self, service: impl Into<String>, endpoint: Arc<Endpoint>) {
		self
			.services
			.entry(service.into())
			.or_default()
			.push(endpoint);
	}

	pub fn endpoints(&self, service: &str) -> Result<&EndpointCollection, ProxyError> {
		match self.services.get(service) {
			Some(c) if !c.is_empty() => Ok(c),
			_ => Err(ProxyError::UnknownService(service.to_string())),
		}
	}

	pub fn services(&self) -> impl Iterator<Item = &str> {
		self.services.keys().map(String::as_str)
	}
}
