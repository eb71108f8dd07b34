use std::convert::Infallible;
use std::future::Future;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use hyper::{Body, Method, Request, Response, StatusCode};
use hyper::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HeaderName, HeaderValue, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, UPGRADE};
use hyper::server::Builder;
use hyper::server::conn::{AddrIncoming, AddrStream};
use hyper::service::{make_service_fn, service_fn};
use serde::Serialize;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;

use crate::implem::encoder::supervisor::EncoderSupervisor;
use crate::implem::sdp::{SDP_CONTENT_TYPE, SESSION_DESCRIPTION};
use crate::model::encoder::EncoderState;
use crate::service::relay::FrameRelay;

pub const SOCKET_ROUTE: &str = "/socket";
pub const SDP_ROUTE: &str = "/live/camera";
pub const HEALTH_ROUTE: &str = "/health";

#[derive(Clone)]
pub struct HttpCtx {
	relay: Arc<FrameRelay>,
	public_dir: Arc<PathBuf>,
	/// Encoder restarted by every request to the deprecated SDP route, `None` when disabled.
	rtp: Option<Arc<EncoderSupervisor>>,
}

impl HttpCtx {
	pub fn new(relay: Arc<FrameRelay>, public_dir: PathBuf, rtp: Option<Arc<EncoderSupervisor>>) -> Self {
		HttpCtx {
			relay,
			public_dir: Arc::new(public_dir),
			rtp,
		}
	}
}

#[derive(Serialize)]
struct Health {
	relay: EncoderHealth,
	preview: Option<EncoderHealth>,
	rtp: Option<EncoderHealth>,
	frames_written: u64,
	frames_failed: u64,
}

#[derive(Serialize)]
struct EncoderHealth {
	#[serde(flatten)]
	state: EncoderState,
	spawns: u32,
}

impl From<&EncoderSupervisor> for EncoderHealth {
	fn from(supervisor: &EncoderSupervisor) -> Self {
		EncoderHealth {
			state: supervisor.state(),
			spawns: supervisor.spawn_count(),
		}
	}
}

pub async fn listen_for_http_requests<F>(server: Builder<AddrIncoming>, ctx: HttpCtx, shutdown: F) -> Result<(), hyper::Error>
	where F: Future<Output=()> {
	let make_service = make_service_fn(move |conn: &AddrStream| {
		let ctx = ctx.clone();
		let addr = conn.remote_addr();

		async move {
			Ok::<_, Infallible>(service_fn(move |req| {
				handle(ctx.clone(), addr, req)
			}))
		}
	});

	server
		.serve(make_service)
		.with_graceful_shutdown(shutdown)
		.await
}

async fn handle(ctx: HttpCtx, addr: SocketAddr, req: Request<Body>) -> Result<Response<Body>, Infallible> {
	let method = req.method().clone();
	let path = req.uri().path().to_string();

	Ok(match (&method, path.as_str()) {
		(&Method::GET, SOCKET_ROUTE) if is_websocket_upgrade(&req) => upgrade_to_websocket(ctx, addr, req),
		(&Method::GET, HEALTH_ROUTE) => health(&ctx),
		(m, SDP_ROUTE) if ctx.rtp.is_some() && (*m == Method::GET || m.as_str() == "DESCRIBE") => {
			describe_session(&ctx, addr)
		}
		(&Method::GET, _) => serve_static(&ctx.public_dir, &path).await,
		_ => respond(StatusCode::METHOD_NOT_ALLOWED, None, Body::empty()),
	})
}

fn respond(status: StatusCode, content_type: Option<&'static str>, body: Body) -> Response<Body> {
	let mut res = Response::new(body);
	*res.status_mut() = status;
	if let Some(content_type) = content_type {
		res.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
	}

	return res;
}

fn is_websocket_upgrade(req: &Request<Body>) -> bool {
	let header_has = |name: HeaderName, token: &str| req.headers()
		.get_all(name)
		.iter()
		.filter_map(|v| v.to_str().ok())
		.flat_map(|v| v.split(','))
		.any(|v| v.trim().eq_ignore_ascii_case(token));

	header_has(UPGRADE, "websocket") && header_has(CONNECTION, "upgrade")
}

fn upgrade_to_websocket(ctx: HttpCtx, addr: SocketAddr, mut req: Request<Body>) -> Response<Body> {
	let accept = match req.headers().get(SEC_WEBSOCKET_KEY) {
		Some(key) => derive_accept_key(key.as_bytes()),
		None => return respond(StatusCode::BAD_REQUEST, None, Body::empty()),
	};
	let accept = match HeaderValue::from_str(&accept) {
		Ok(accept) => accept,
		Err(_) => return respond(StatusCode::INTERNAL_SERVER_ERROR, None, Body::empty()),
	};

	let on_upgrade = hyper::upgrade::on(&mut req);
	let relay = ctx.relay;
	tokio::spawn(async move {
		match on_upgrade.await {
			Ok(upgraded) => {
				let ws = WebSocketStream::from_raw_socket(upgraded, Role::Server, None).await;
				relay.serve(ws, addr).await;
			}
			Err(e) => warn!("Websocket upgrade for {} failed: {}", addr, e),
		}
	});

	let mut res = respond(StatusCode::SWITCHING_PROTOCOLS, None, Body::empty());
	let headers = res.headers_mut();
	headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
	headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
	headers.insert(SEC_WEBSOCKET_ACCEPT, accept);

	return res;
}

fn health(ctx: &HttpCtx) -> Response<Body> {
	let health = Health {
		relay: ctx.relay.encoder().into(),
		preview: ctx.relay.preview().map(EncoderHealth::from),
		rtp: ctx.rtp.as_deref().map(EncoderHealth::from),
		frames_written: ctx.relay.frames_written(),
		frames_failed: ctx.relay.frames_failed(),
	};

	match serde_json::to_vec(&health) {
		Ok(json) => respond(StatusCode::OK, Some("application/json"), Body::from(json)),
		Err(e) => {
			error!("Failed to serialise health: {}", e);
			respond(StatusCode::INTERNAL_SERVER_ERROR, None, Body::empty())
		}
	}
}

fn describe_session(ctx: &HttpCtx, addr: SocketAddr) -> Response<Body> {
	if let Some(rtp) = ctx.rtp.clone() {
		info!("Session description requested by {}, restarting the RTP encoder", addr);
		tokio::spawn(async move { rtp.restart().await });
	}

	let mut res = respond(StatusCode::OK, Some(SDP_CONTENT_TYPE), Body::from(SESSION_DESCRIPTION));
	res.headers_mut().insert(CONTENT_LENGTH, HeaderValue::from(SESSION_DESCRIPTION.len()));

	return res;
}

async fn serve_static(public_dir: &Path, path: &str) -> Response<Body> {
	let relative = match path.trim_start_matches('/') {
		"" => "index.html",
		rest => rest,
	};

	let relative = Path::new(relative);
	if relative.components().any(|c| !matches!(c, Component::Normal(_))) {
		return respond(StatusCode::BAD_REQUEST, None, Body::empty());
	}

	match tokio::fs::read(public_dir.join(relative)).await {
		Ok(bytes) => respond(StatusCode::OK, Some(content_type(relative)), Body::from(bytes)),
		Err(e) if e.kind() == ErrorKind::NotFound => respond(StatusCode::NOT_FOUND, None, Body::empty()),
		Err(e) => {
			warn!("Failed to serve {:?}: {}", relative, e);
			respond(StatusCode::INTERNAL_SERVER_ERROR, None, Body::empty())
		}
	}
}

fn content_type(path: &Path) -> &'static str {
	match path.extension().and_then(|e| e.to_str()) {
		Some("html") => "text/html; charset=utf-8",
		Some("js") => "text/javascript; charset=utf-8",
		Some("css") => "text/css; charset=utf-8",
		Some("json") => "application/json",
		Some("png") => "image/png",
		Some("jpg") | Some("jpeg") => "image/jpeg",
		Some("svg") => "image/svg+xml",
		Some("ico") => "image/x-icon",
		_ => "application/octet-stream",
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use hyper::body::to_bytes;
	use nix::errno::Errno;
	use nix::sys::signal::{self, Signal};
	use nix::unistd::Pid;
	use tempfile::{TempDir, tempdir};
	use tokio::time::timeout;

	use crate::implem::encoder::EncoderArgs;
	use crate::implem::handoff::FrameSlot;
	use crate::model::encoder::{Handoff, RestartPolicy};

	use super::*;

	fn sleeper(name: &'static str) -> Arc<EncoderSupervisor> {
		let mut args = EncoderArgs::new("sleep");
		args.arg("30");
		Arc::new(EncoderSupervisor::new(name, args, RestartPolicy::default()))
	}

	fn ctx(dir: &TempDir, rtp: Option<Arc<EncoderSupervisor>>) -> HttpCtx {
		let public = dir.path().join("public");
		std::fs::create_dir_all(&public).unwrap();
		std::fs::write(public.join("index.html"), "<html></html>").unwrap();
		std::fs::write(public.join("client.js"), "// client").unwrap();

		let slot = FrameSlot::new(Handoff::File(dir.path().join("pipe.jpeg")));
		let relay = FrameRelay::new(slot, sleeper("relay"), None);
		HttpCtx::new(Arc::new(relay), public, rtp)
	}

	fn request(method: &str, path: &str) -> Request<Body> {
		Request::builder()
			.method(method)
			.uri(path)
			.body(Body::empty())
			.unwrap()
	}

	fn addr() -> SocketAddr {
		"127.0.0.1:40000".parse().unwrap()
	}

	async fn body(res: Response<Body>) -> Vec<u8> {
		to_bytes(res.into_body()).await.unwrap().to_vec()
	}

	/// Pid of the `n`th process the supervisor spawned, once it runs.
	async fn nth_pid(sup: &EncoderSupervisor, n: u32) -> u32 {
		let mut rx = sup.subscribe();
		timeout(Duration::from_secs(10), async move {
			loop {
				if let EncoderState::Running { pid: Some(pid), .. } = *rx.borrow_and_update() {
					if sup.spawn_count() >= n {
						return pid;
					}
				}
				rx.changed().await.unwrap();
			}
		}).await.unwrap()
	}

	fn is_gone(pid: u32) -> bool {
		signal::kill(Pid::from_raw(pid as i32), None::<Signal>) == Err(Errno::ESRCH)
	}

	#[tokio::test]
	async fn serves_the_capture_page() {
		let dir = tempdir().unwrap();
		let ctx = ctx(&dir, None);

		let res = handle(ctx.clone(), addr(), request("GET", "/")).await.unwrap();
		assert_eq!(res.status(), StatusCode::OK);
		assert_eq!(res.headers()[CONTENT_TYPE], "text/html; charset=utf-8");
		assert_eq!(body(res).await, b"<html></html>");

		let res = handle(ctx.clone(), addr(), request("GET", "/client.js")).await.unwrap();
		assert_eq!(res.headers()[CONTENT_TYPE], "text/javascript; charset=utf-8");

		let res = handle(ctx, addr(), request("GET", "/missing.js")).await.unwrap();
		assert_eq!(res.status(), StatusCode::NOT_FOUND);
	}

	#[tokio::test]
	async fn refuses_to_leave_the_public_dir() {
		let dir = tempdir().unwrap();
		let ctx = ctx(&dir, None);

		let res = handle(ctx, addr(), request("GET", "/../pipe.jpeg")).await.unwrap();
		assert_eq!(res.status(), StatusCode::BAD_REQUEST);
	}

	#[tokio::test]
	async fn sdp_route_is_static_and_restarts_the_encoder() {
		let dir = tempdir().unwrap();
		let rtp = sleeper("rtp");
		let ctx = ctx(&dir, Some(rtp.clone()));

		let mut bodies = vec![];
		let mut previous: Option<u32> = None;
		for (n, method) in (1..).zip(["GET", "DESCRIBE", "GET"]) {
			let res = handle(ctx.clone(), addr(), request(method, SDP_ROUTE)).await.unwrap();
			assert_eq!(res.status(), StatusCode::OK);
			assert_eq!(res.headers()[CONTENT_TYPE], SDP_CONTENT_TYPE);
			assert_eq!(res.headers()[CONTENT_LENGTH], SESSION_DESCRIPTION.len().to_string().as_str());
			bodies.push(body(res).await);

			let pid = nth_pid(&rtp, n).await;
			if let Some(old) = previous {
				assert_ne!(old, pid);
				assert!(is_gone(old), "encoder {} survived a restart", old);
			}
			previous = Some(pid);
		}

		assert!(bodies.iter().all(|b| b == SESSION_DESCRIPTION.as_bytes()));
		assert_eq!(rtp.spawn_count(), 3);

		rtp.stop().await;
		assert!(previous.map_or(false, is_gone));
	}

	#[tokio::test]
	async fn sdp_route_is_absent_when_disabled() {
		let dir = tempdir().unwrap();
		let ctx = ctx(&dir, None);

		let res = handle(ctx, addr(), request("GET", SDP_ROUTE)).await.unwrap();
		assert_eq!(res.status(), StatusCode::NOT_FOUND);
	}

	#[tokio::test]
	async fn health_reports_encoder_state_and_counters() {
		let dir = tempdir().unwrap();
		let ctx = ctx(&dir, None);

		let res = handle(ctx, addr(), request("GET", HEALTH_ROUTE)).await.unwrap();
		assert_eq!(res.status(), StatusCode::OK);

		let json: serde_json::Value = serde_json::from_slice(&body(res).await).unwrap();
		assert_eq!(json["relay"]["state"], "absent");
		assert_eq!(json["relay"]["spawns"], 0);
		assert!(json["preview"].is_null());
		assert_eq!(json["frames_written"], 0);
	}

	#[tokio::test]
	async fn socket_route_requires_an_upgrade() {
		let dir = tempdir().unwrap();
		let ctx = ctx(&dir, None);

		let res = handle(ctx.clone(), addr(), request("GET", SOCKET_ROUTE)).await.unwrap();
		assert_eq!(res.status(), StatusCode::NOT_FOUND);

		let req = Request::builder()
			.uri(SOCKET_ROUTE)
			.header(UPGRADE, "websocket")
			.header(CONNECTION, "keep-alive, Upgrade")
			.header(SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
			.body(Body::empty())
			.unwrap();
		let res = handle(ctx, addr(), req).await.unwrap();
		assert_eq!(res.status(), StatusCode::SWITCHING_PROTOCOLS);
		assert_eq!(res.headers()[SEC_WEBSOCKET_ACCEPT], "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
	}

	#[tokio::test]
	async fn other_methods_are_rejected() {
		let dir = tempdir().unwrap();
		let ctx = ctx(&dir, None);

		let res = handle(ctx, addr(), request("POST", "/")).await.unwrap();
		assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
	}
}
