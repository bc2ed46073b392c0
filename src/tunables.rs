use std::time::Duration;

/// The timing knobs of spec §3/§4.1/§4.3/§4.4, collected in one place and
/// shared (via `Arc`) by every [`crate::endpoint::Endpoint`] and
/// [`crate::director::Director`] in a [`crate::proxy::Proxy`].
#[derive(Debug, Clone, Copy)]
pub struct Tunables {
	/// RoundTrip durations above this are classified as a slow success
	/// (`Active -> Overloaded`) rather than a plain success.
	pub overload_request_duration: Duration,
	/// How long an `Overloaded` endpoint waits, with no intervening
	/// failure, before returning to `Active`.
	pub overload_recovery_time: Duration,
	/// Dial timeout used by the recovery probe (`CheckConnection`).
	pub online_check_timeout: Duration,
	/// Delay between successive recovery probes while `Offline`.
	pub online_check_interval: Duration,
	/// How long a Director waits for any endpoint to activate before
	/// falling back to emergency (overload-admitting) selection.
	pub emergency_wait_timeout: Duration,
	/// Dial/handshake timeout for the shared outbound transport.
	pub dial_timeout: Duration,
}

impl Default for Tunables {
	fn default() -> Self {
		Tunables {
			overload_request_duration: Duration::from_secs(10),
			overload_recovery_time: Duration::from_secs(2),
			online_check_timeout: Duration::from_millis(500),
			online_check_interval: Duration::from_millis(500),
			emergency_wait_timeout: Duration::from_secs(2),
			dial_timeout: Duration::from_secs(5),
		}
	}
}
