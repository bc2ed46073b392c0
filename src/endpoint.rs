//! One backend address of one service: counters, health state, and the
//! recovery probe. Grounded on the counter/activation split described for
//! `agentgateway`'s backend bookkeeping and on the teacher's habit (see
//! `proxy/mod.rs::ProxyError`) of keeping transitions as small, logged,
//! infallible state changes rather than `Result`-returning operations.

use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::{trace, warn};

use crate::tunables::Tunables;

#[derive(Debug, Default)]
struct Counters {
	reqs: u64,
	load: i64,
	errors: u64,
	total_duration: Duration,
}

struct Activation {
	active: bool,
	overloaded: bool,
	waiters: Vec<oneshot::Sender<Arc<Endpoint>>>,
}

/// One backend address (`host:port`) belonging to one service.
///
/// `(service, host)` is expected to be unique within a [`crate::registry::Registry`].
pub struct Endpoint {
	service: String,
	host: String,
	tunables: Arc<Tunables>,
	counters: Mutex<Counters>,
	activation: Mutex<Activation>,
}

/// A point-in-time snapshot of one endpoint's counters and health flags,
/// used by [`crate::stats`] and by tests.
#[derive(Debug, Clone)]
pub struct EndpointSnapshot {
	pub host: String,
	pub requests: u64,
	pub load: i64,
	pub errors: u64,
	pub total_duration: Duration,
	pub active: bool,
	pub overloaded: bool,
}

impl EndpointSnapshot {
	pub fn avg_duration(&self) -> Option<Duration> {
		if self.requests == 0 {
			None
		} else {
			Some(self.total_duration / self.requests as u32)
		}
	}
}

impl Endpoint {
	pub fn new(service: impl Into<String>, host: impl Into<String>, tunables: Arc<Tunables>) -> Arc<Self> {
		Arc::new(Endpoint {
			service: service.into(),
			host: host.into(),
			tunables,
			counters: Mutex::new(Counters::default()),
			activation: Mutex::new(Activation {
				active: false,
				overloaded: false,
				waiters: Vec::new(),
			}),
		})
	}

	pub fn service(&self) -> &str {
		&self.service
	}

	pub fn host(&self) -> &str {
		&self.host
	}

	pub fn active(&self) -> bool {
		self.activation.lock().active
	}

	pub fn overloaded(&self) -> bool {
		self.activation.lock().overloaded
	}

	pub fn reqs(&self) -> u64 {
		self.counters.lock().reqs
	}

	pub fn load(&self) -> i64 {
		self.counters.lock().load
	}

	pub fn snapshot(&self) -> EndpointSnapshot {
		let c = self.counters.lock();
		let a = self.activation.lock();
		EndpointSnapshot {
			host: self.host.clone(),
			requests: c.reqs,
			load: c.load,
			errors: c.errors,
			total_duration: c.total_duration,
			active: a.active,
			overloaded: a.overloaded,
		}
	}

	/// Runs one round trip through this endpoint: counts it, invokes `f`,
	/// updates counters, and — on error or a slow success — transitions the
	/// endpoint out of `Active`. `f` performs the actual outbound I/O; this
	/// method never touches the network itself.
	pub async fn round_trip<F, Fut, T, E>(self: &Arc<Self>, f: F) -> Result<T, E>
	where
		F: FnOnce() -> Fut,
		Fut: std::future::Future<Output = Result<T, E>>,
	{
		{
			let mut c = self.counters.lock();
			c.reqs += 1;
			c.load += 1;
		}

		let start = Instant::now();
		let result = f().await;
		let elapsed = start.elapsed();

		let overload_threshold = self.tunables.overload_request_duration;
		let is_err = result.is_err();
		let is_slow = elapsed > overload_threshold;

		{
			let mut c = self.counters.lock();
			c.load -= 1;
			c.total_duration += elapsed;
			if is_err || is_slow {
				c.errors += 1;
			}
		}

		if is_err || is_slow {
			self.set_inactive(is_err).await;
		}

		result
	}

	/// Returns a receiver that fires exactly once the next time this
	/// endpoint becomes `Active` — immediately, if it already is.
	pub fn wait_active(self: &Arc<Self>) -> oneshot::Receiver<Arc<Endpoint>> {
		let (tx, rx) = oneshot::channel();
		let mut act = self.activation.lock();
		if act.active {
			let _ = tx.send(Arc::clone(self));
		} else {
			act.waiters.push(tx);
		}
		rx
	}

	/// Synchronous startup probe: dials the endpoint once and sets it
	/// `Active` or `Offline` depending on the outcome. Used once, at
	/// configuration load, before any traffic is served. A failed probe
	/// here starts the same redial loop a failed `RoundTrip` would, since
	/// nothing else will ever bring an endpoint Offline from the very start
	/// of the process back to life otherwise.
	pub async fn test_active(self: &Arc<Self>) {
		let ok = self.check_connection().await.is_ok();
		let spawn_probe = {
			let mut act = self.activation.lock();
			if ok {
				self.activate(&mut act);
				false
			} else {
				act.active = false;
				act.overloaded = false;
				true
			}
		};
		if spawn_probe {
			let this = Arc::clone(self);
			tokio::spawn(async move {
				this.background_check().await;
			});
		}
	}

	/// Best-effort TCP dial, bounded by `online_check_timeout`.
	pub async fn check_connection(&self) -> std::io::Result<()> {
		let timeout = self.tunables.online_check_timeout;
		match tokio::time::timeout(timeout, TcpStream::connect(&self.host)).await {
			Ok(Ok(_stream)) => Ok(()),
			Ok(Err(e)) => Err(e),
			Err(_elapsed) => Err(std::io::Error::new(
				std::io::ErrorKind::TimedOut,
				"dial timed out",
			)),
		}
	}

	/// The port of `host` when it resolves to an address bindable on this
	/// host (i.e. a local interface address or loopback); used by
	/// [`crate::proxy::Proxy`] to skip binding an inbound listener that
	/// would proxy a service to itself.
	pub fn local_port(&self) -> Option<String> {
		let addrs = self.host.to_socket_addrs().ok()?;
		for addr in addrs {
			let is_local =
				addr.ip().is_loopback() || std::net::TcpListener::bind((addr.ip(), 0)).is_ok();
			if is_local {
				return Some(addr.port().to_string());
			}
		}
		None
	}

	/// `Active -> {Offline, Overloaded}`. Only the call that observes
	/// `active == true` performs the transition and spawns the recovery
	/// probe; every other concurrent caller is a no-op. This is the whole
	/// single-probe-per-transition guarantee — see spec §4.1 and §8.1.
	async fn set_inactive(self: &Arc<Self>, had_error: bool) {
		let should_probe = {
			let mut act = self.activation.lock();
			if !act.active {
				false
			} else {
				act.active = false;
				true
			}
		};
		if !should_probe {
			return;
		}

		// had_error == false means the round trip succeeded but was slow;
		// dial once more to tell "reachable but slow" apart from "offline".
		let overloaded = if had_error {
			false
		} else {
			self.check_connection().await.is_ok()
		};

		{
			let mut act = self.activation.lock();
			act.overloaded = overloaded;
		}

		warn!(
			service = %self.service,
			host = %self.host,
			overloaded,
			"endpoint left active state"
		);

		let this = Arc::clone(self);
		tokio::spawn(async move {
			this.background_check().await;
		});
	}

	/// The one probe spawned by `set_inactive`. Overloaded endpoints wait
	/// out a fixed recovery timer; offline endpoints redial on an interval
	/// until one succeeds. Releases the activation lock before every sleep
	/// and every dial.
	async fn background_check(self: Arc<Self>) {
		let overloaded = self.activation.lock().overloaded;
		if overloaded {
			tokio::time::sleep(self.tunables.overload_recovery_time).await;
			let mut act = self.activation.lock();
			if !act.active && act.overloaded {
				self.activate(&mut act);
			}
			return;
		}

		loop {
			tokio::time::sleep(self.tunables.online_check_interval).await;
			let result = self.check_connection().await;
			let mut act = self.activation.lock();
			if act.active || act.overloaded {
				// someone else resolved it (e.g. test_active / a racing probe)
				return;
			}
			match result {
				Ok(()) => {
					self.activate(&mut act);
					return;
				},
				Err(e) => {
					trace!(service = %self.service, host = %self.host, error = %e, "recovery probe failed");
				},
			}
		}
	}

	/// `* -> Active`: flips the flags and drains every waiter registered
	/// before this call, delivering this endpoint on each exactly once.
	fn activate(self: &Arc<Self>, act: &mut Activation) {
		act.active = true;
		act.overloaded = false;
		for tx in act.waiters.drain(..) {
			let _ = tx.send(Arc::clone(self));
		}
	}
}
