//! C3: one inbound HTTP listener per configured service. Selects an
//! endpoint, forwards, retries on forwarding failure, and synthesizes a
//! 503 when no endpoint will serve. Grounded on the shape of the teacher's
//! `proxy/httpproxy.rs` (per-connection `service_fn`, a shared outbound
//! client, classification-driven retry) and its `management/hyper_helpers.rs`
//! (hyper 1.x server/client builder boilerplate), trimmed to plain HTTP
//! with no TLS, filters, or policy stages.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::uri::PathAndQuery;
use http::header::CONTENT_LENGTH;
use http::{Request, Response, Uri};
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::body::Incoming;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::endpoint::Endpoint;
use crate::error::ProxyError;
use crate::registry::Registry;
use crate::stats::TaskCounter;
use crate::tunables::Tunables;

/// Body type used on both the inbound and outbound side of the Director.
pub type Body = BoxBody<Bytes, hyper::Error>;
pub type OutboundClient = Client<HttpConnector, Body>;

const UNAVAILABLE_BODY: &str = "No server available to handle your request\n";

/// Builds the outbound transport shared by every Director in one `Proxy`
/// (spec §5: "no per-service connection isolation... at the transport
/// level").
pub fn build_client(tunables: &Tunables) -> OutboundClient {
	let mut connector = HttpConnector::new();
	connector.set_connect_timeout(Some(tunables.dial_timeout));
	connector.enforce_http(false);
	Client::builder(TokioExecutor::new()).build(connector)
}

pub struct Director {
	service: String,
	registry: Arc<Registry>,
	client: OutboundClient,
	tunables: Arc<Tunables>,
	task_counter: TaskCounter,
}

impl Director {
	pub fn new(
		service: impl Into<String>,
		registry: Arc<Registry>,
		client: OutboundClient,
		tunables: Arc<Tunables>,
		task_counter: TaskCounter,
	) -> Arc<Self> {
		Arc::new(Director {
			service: service.into(),
			registry,
			client,
			tunables,
			task_counter,
		})
	}

	pub fn service(&self) -> &str {
		&self.service
	}

	/// Binds `addr` and serves inbound HTTP connections until the process
	/// exits (spec §4.4: shutdown is not supported).
	pub async fn serve(self: Arc<Self>, addr: SocketAddr) -> std::io::Result<()> {
		let listener = TcpListener::bind(addr).await?;
		info!(service = %self.service, %addr, "director listening");
		loop {
			let (stream, _peer) = match listener.accept().await {
				Ok(x) => x,
				Err(e) => {
					warn!(service = %self.service, error = %e, "accept failed");
					continue;
				},
			};
			let io = TokioIo::new(stream);
			let this = Arc::clone(&self);
			let counter = this.task_counter.clone();
			tokio::spawn(async move {
				let _guard = counter.guard();
				let svc = hyper::service::service_fn(move |req: Request<Incoming>| {
					let this = Arc::clone(&this);
					async move { Ok::<_, Infallible>(this.handle(req).await) }
				});
				if let Err(err) = auto::Builder::new(TokioExecutor::new())
					.serve_connection(io, svc)
					.await
				{
					warn!(error = %err, "connection closed with error");
				}
			});
		}
	}

	async fn handle(self: Arc<Self>, req: Request<Incoming>) -> Response<Body> {
		let (parts, inbound_body) = req.into_parts();
		let mut body: Body = inbound_body.boxed();

		loop {
			let endpoint = match self.select_endpoint().await {
				Ok(ep) => ep,
				Err(err) => {
					warn!(service = %self.service, error = %err, "no endpoint available");
					return unavailable_response(parts.version, &err);
				},
			};

			let mut out_parts = parts.clone();
			retarget(&mut out_parts, endpoint.host());
			let out_req = Request::from_parts(out_parts, body);

			let client = self.client.clone();
			let result = endpoint
				.round_trip(move || {
					let client = client.clone();
					async move { client.request(out_req).await }
				})
				.await;

			match result {
				Ok(resp) => return resp.map(BodyExt::boxed),
				Err(err) => {
					warn!(service = %self.service, host = %endpoint.host(), error = %err, "forwarding failed, retrying");
					// The failed attempt may have already streamed part of
					// the original body; a retry cannot safely replay it, so
					// it is sent with an empty body. See spec §4.3 "Retry
					// hazard".
					body = empty_body();
				},
			}
		}
	}

	/// Endpoint selection per request (spec §4.3): normal `Get`, else a
	/// fan-out wait on every endpoint's activation with a deadline, else
	/// `EmergencyGet`.
	async fn select_endpoint(&self) -> Result<Arc<Endpoint>, ProxyError> {
		let collection = self.registry.endpoints(&self.service)?;

		if let Some(ep) = collection.get() {
			return Ok(ep);
		}

		let waiters: Vec<_> = collection.iter().map(|ep| ep.wait_active()).collect();
		if !waiters.is_empty() {
			let raced = tokio::time::timeout(self.tunables.emergency_wait_timeout, race(waiters)).await;
			if let Ok(Some(ep)) = raced {
				return Ok(ep);
			}
		}

		collection
			.emergency_get()
			.ok_or_else(|| ProxyError::NoEndpoint(self.service.clone()))
	}
}

/// Races N one-shot activation receivers, returning the first endpoint to
/// activate. A receiver whose sender is dropped without ever activating
/// (e.g. it raced another winner) is simply excluded from further
/// consideration. Callers bound the race with their own deadline.
async fn race(
	mut waiters: Vec<tokio::sync::oneshot::Receiver<Arc<Endpoint>>>,
) -> Option<Arc<Endpoint>> {
	while !waiters.is_empty() {
		let (result, _idx, remaining) = futures_util::future::select_all(waiters).await;
		waiters = remaining;
		if let Ok(ep) = result {
			return Some(ep);
		}
	}
	None
}

/// Rewrites only the URI authority and scheme to the selected endpoint
/// (spec §4.3 "Forwarding"); methods, headers, and the body pass through
/// unchanged, including the inbound `Host` header.
fn retarget(parts: &mut http::request::Parts, host: &str) {
	let path_and_query = parts
		.uri
		.path_and_query()
		.cloned()
		.unwrap_or_else(|| PathAndQuery::from_static("/"));
	let scheme = parts.uri.scheme_str().unwrap_or("http");
	parts.uri = Uri::builder()
		.scheme(scheme)
		.authority(host)
		.path_and_query(path_and_query)
		.build()
		.expect("host is a valid authority");
}

fn empty_body() -> Body {
	Full::new(Bytes::new())
		.map_err(|never: Infallible| match never {})
		.boxed()
}

fn unavailable_response(version: http::Version, err: &ProxyError) -> Response<Body> {
	Response::builder()
		.status(err.status_code())
		.version(version)
		.header(CONTENT_LENGTH, UNAVAILABLE_BODY.len())
		.body(
			Full::new(Bytes::from_static(UNAVAILABLE_BODY.as_bytes()))
				.map_err(|never: Infallible| match never {})
				.boxed(),
		)
		.expect("well-formed unavailable response")
}
