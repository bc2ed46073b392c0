//! The stats HTTP surface (spec §6 "Statistics endpoint"): a small hyper
//! server, in the style of the teacher's `management/admin.rs` +
//! `management/hyper_helpers.rs`, serving the JSON snapshot from
//! [`crate::stats::snapshot`] on a configurable path, plus a
//! `{"Goroutines": N}` runtime-stats path.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::registry::Registry;
use crate::stats::{self, TaskCounter};

type Body = BoxBody<Bytes, Infallible>;

pub const DEFAULT_STATS_PATH: &str = "/stats";
pub const DEFAULT_RUNTIME_PATH: &str = "/runtime";

struct State {
	registry: Arc<Registry>,
	task_counter: TaskCounter,
	stats_path: String,
	runtime_path: String,
}

pub async fn serve(
	addr: SocketAddr,
	registry: Arc<Registry>,
	task_counter: TaskCounter,
) -> std::io::Result<()> {
	serve_on_paths(
		addr,
		registry,
		task_counter,
		DEFAULT_STATS_PATH,
		DEFAULT_RUNTIME_PATH,
	)
	.await
}

pub async fn serve_on_paths(
	addr: SocketAddr,
	registry: Arc<Registry>,
	task_counter: TaskCounter,
	stats_path: &str,
	runtime_path: &str,
) -> std::io::Result<()> {
	let listener = TcpListener::bind(addr).await?;
	info!(%addr, "admin stats listener bound");
	let state = Arc::new(State {
		registry,
		task_counter,
		stats_path: stats_path.to_string(),
		runtime_path: runtime_path.to_string(),
	});
	loop {
		let (stream, _peer) = match listener.accept().await {
			Ok(x) => x,
			Err(e) => {
				warn!(error = %e, "admin accept failed");
				continue;
			},
		};
		let io = TokioIo::new(stream);
		let state = Arc::clone(&state);
		tokio::spawn(async move {
			let svc = hyper::service::service_fn(move |req: Request<Incoming>| {
				let state = Arc::clone(&state);
				async move { Ok::<_, Infallible>(handle(&state, req)) }
			});
			if let Err(err) = auto::Builder::new(TokioExecutor::new())
				.serve_connection(io, svc)
				.await
			{
				warn!(error = %err, "admin connection closed with error");
			}
		});
	}
}

fn handle(state: &State, req: Request<Incoming>) -> Response<Body> {
	let path = req.uri().path();
	if path == state.stats_path {
		let snapshot = stats::snapshot(&state.registry);
		json_response(&snapshot)
	} else if path == state.runtime_path {
		let runtime = stats::RuntimeStats {
			goroutines: state.task_counter.count(),
		};
		json_response(&runtime)
	} else {
		Response::builder()
			.status(StatusCode::NOT_FOUND)
			.body(body_from(Bytes::new()))
			.expect("well-formed 404")
	}
}

fn json_response<T: serde::Serialize>(value: &T) -> Response<Body> {
	match serde_json::to_vec(value) {
		Ok(bytes) => Response::builder()
			.status(StatusCode::OK)
			.header(CONTENT_TYPE, "application/json")
			.body(body_from(Bytes::from(bytes)))
			.expect("well-formed stats response"),
		Err(err) => {
			warn!(error = %err, "failed to serialize stats snapshot");
			Response::builder()
				.status(StatusCode::INTERNAL_SERVER_ERROR)
				.body(body_from(Bytes::new()))
				.expect("well-formed 500")
		},
	}
}

fn body_from(bytes: Bytes) -> Body {
	Full::new(bytes).map_err(|never: Infallible| match never {}).boxed()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::endpoint::Endpoint;
	use crate::tunables::Tunables;

	#[tokio::test]
	async fn stats_endpoint_serves_json_snapshot() {
		let tunables = Arc::new(Tunables::default());
		let mut registry = Registry::new();
		registry.add("svc", Endpoint::new("svc", "127.0.0.1:1", tunables));
		let registry = Arc::new(registry);
		let counter = TaskCounter::new();

		let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
		let listener = TcpListener::bind(addr).await.unwrap();
		let bound = listener.local_addr().unwrap();
		drop(listener);

		let registry_clone = registry.clone();
		let counter_clone = counter.clone();
		tokio::spawn(async move {
			let _ = serve(bound, registry_clone, counter_clone).await;
		});
		tokio::time::sleep(std::time::Duration::from_millis(50)).await;

		let body = fetch(bound, "/stats").await;
		let value: serde_json::Value = serde_json::from_str(&body).unwrap();
		assert!(value.get("svc").is_some());
		assert_eq!(value["svc"]["AvgDuration"], "(no data)");

		let runtime_body = fetch(bound, "/runtime").await;
		let runtime: serde_json::Value = serde_json::from_str(&runtime_body).unwrap();
		assert!(runtime.get("Goroutines").is_some());
	}

	async fn fetch(addr: SocketAddr, path: &str) -> String {
		use tokio::io::{AsyncReadExt, AsyncWriteExt};
		let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
		let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
		stream.write_all(request.as_bytes()).await.unwrap();
		let mut response = String::new();
		stream.read_to_string(&mut response).await.unwrap();
		response.split("\r\n\r\n").nth(1).unwrap_or_default().to_string()
	}
}
