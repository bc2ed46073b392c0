//! C4: top-level owner. Holds the Registry and the shared outbound
//! transport, spawns one Director per configured service — skipping any
//! that would proxy a service to itself — and runs the stats surface.
//! Grounded on the teacher's top-level `Proxy`/`gateway::Gateway`
//! bootstrap-then-spawn pattern (build state once, hand `Arc` clones to
//! each listener task).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::director::{self, Director};
use crate::endpoint::Endpoint;
use crate::registry::Registry;
use crate::stats::TaskCounter;
use crate::tunables::Tunables;

pub struct Proxy {
	registry: Arc<Registry>,
	client: director::OutboundClient,
	tunables: Arc<Tunables>,
	task_counter: TaskCounter,
}

impl Proxy {
	/// Builds the Registry from `config.backends`, running each endpoint's
	/// synchronous startup probe (spec §4.1 `TestActive`) before any
	/// traffic is served.
	pub async fn bootstrap(config: &Config) -> Self {
		let tunables = Arc::new(config.tunables);
		let mut registry = Registry::new();
		for (service, hosts) in &config.backends {
			for host in hosts {
				let endpoint = Endpoint::new(service.clone(), host.clone(), tunables.clone());
				endpoint.test_active().await;
				registry.add(service.clone(), endpoint);
			}
		}
		let client = director::build_client(&tunables);
		Proxy {
			registry: Arc::new(registry),
			client,
			tunables,
			task_counter: TaskCounter::new(),
		}
	}

	pub fn registry(&self) -> Arc<Registry> {
		Arc::clone(&self.registry)
	}

	pub fn task_counter(&self) -> TaskCounter {
		self.task_counter.clone()
	}

	/// Spawns one Director per `(service, inbound address)` pair in
	/// `services`, and runs until every Director's listener task exits —
	/// which, per spec §4.4, is only on process shutdown or listener
	/// failure.
	pub async fn run(self: Arc<Self>, services: &HashMap<String, SocketAddr>) {
		let mut handles = Vec::with_capacity(services.len());
		for (service, addr) in services {
			if self.is_self_proxy(service, *addr) {
				warn!(
					service,
					%addr,
					"inbound address matches a backend endpoint's local port; skipping to avoid a self-proxy loop"
				);
				continue;
			}

			let director = Director::new(
				service.clone(),
				Arc::clone(&self.registry),
				self.client.clone(),
				Arc::clone(&self.tunables),
				self.task_counter.clone(),
			);
			let addr = *addr;
			let counter = self.task_counter.clone();
			handles.push(tokio::spawn(async move {
				let _guard = counter.guard();
				if let Err(err) = director.clone().serve(addr).await {
					tracing::error!(service = %director.service(), error = %err, "director exited");
				}
			}));
		}

		info!(directors = handles.len(), "proxy running");
		for handle in handles {
			let _ = handle.await;
		}
	}

	/// Spec §4.4: skip a service's listener when its inbound port equals a
	/// local port of one of its own backend endpoints.
	fn is_self_proxy(&self, service: &str, addr: SocketAddr) -> bool {
		let Ok(collection) = self.registry.endpoints(service) else {
			return false;
		};
		let port = addr.port().to_string();
		collection
			.iter()
			.any(|ep| ep.local_port().as_deref() == Some(port.as_str()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::parse;

	#[tokio::test]
	async fn self_proxy_service_is_detected() {
		let yaml = r#"
backends:
  x:
    - 127.0.0.1:19100
services:
  x: 0.0.0.0:19100
"#;
		let config = parse(yaml, None).unwrap();
		let proxy = Proxy::bootstrap(&config).await;
		assert!(proxy.is_self_proxy("x", config.services["x"]));
	}

	#[tokio::test]
	async fn distinct_port_is_not_a_self_proxy() {
		let yaml = r#"
backends:
  x:
    - 127.0.0.1:19101
services:
  x: 0.0.0.0:19102
"#;
		let config = parse(yaml, None).unwrap();
		let proxy = Proxy::bootstrap(&config).await;
		assert!(!proxy.is_self_proxy("x", config.services["x"]));
	}
}
