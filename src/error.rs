//! Originally derived from the error-taxonomy conventions of
//! `agentgateway`'s `proxy::ProxyError` (thiserror enum mapped to a status
//! code) and `agent_core`'s split between a closed request-path error set
//! and open-ended `anyhow::Error` startup failures.

use http::StatusCode;

/// The closed error taxonomy reaching the Director's request path (see
/// spec §7). `SlowSuccess`, `ProbeError`, and `TransportError` are not
/// variants here: they are observed and either retried or logged inline by
/// [`crate::endpoint::Endpoint`]/[`crate::director::Director`] rather than
/// propagated as values, matching §7's propagation policy that only
/// `NoEndpoint` (and, ahead of it, an unroutable service name) ever reaches
/// the client.
#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
	#[error("no healthy or overloaded endpoint for service {0}")]
	NoEndpoint(String),

	#[error("unknown service {0}")]
	UnknownService(String),
}

impl ProxyError {
	/// Maps a taxonomy kind to the HTTP status the Director returns to the
	/// inbound client. Both variants are a 503 today, but kept as a match
	/// rather than a constant so a future variant can't be forwarded to the
	/// client with the wrong status by accident.
	pub fn status_code(&self) -> StatusCode {
		match self {
			ProxyError::NoEndpoint(_) => StatusCode::SERVICE_UNAVAILABLE,
			ProxyError::UnknownService(_) => StatusCode::SERVICE_UNAVAILABLE,
		}
	}
}
