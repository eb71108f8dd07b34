use std::env;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

use hyper::Server;
use hyper::server::Builder;
use hyper::server::conn::AddrIncoming;
use tokio::net::TcpListener;

use crate::model::encoder::{Resolution, RestartPolicy};

const DEFAULT_HTTP_PORT: u16 = 3000;

#[derive(FromArgs)]
/// relay browser webcam frames to an RTSP feed through ffmpeg
pub struct CliArgs {
	#[argh(option, default = "Ipv4Addr::UNSPECIFIED")]
	/// the host ip (ipv4) to bind the http and preview servers to (default: 0.0.0.0)
	pub host: Ipv4Addr,
	#[argh(option, short = 'p', default = "port_from_env()")]
	/// the http port serving the capture page and frame socket (default: $PORT or 3000)
	pub port: u16,
	#[argh(option, default = "String::from(\"localhost\")")]
	/// the host of the RTSP server ffmpeg publishes to (default: localhost)
	pub rtsp_host: String,
	#[argh(option, default = "8554")]
	/// the port of the RTSP server ffmpeg publishes to (default: 8554)
	pub rtsp_port: u16,
	#[argh(option, default = "String::from(\"live\")")]
	/// the RTSP path the feed is published under (default: live)
	pub stream_name: String,
	#[argh(option, default = "PathBuf::from(\"temp\")")]
	/// directory holding the frame pipe and files (default: temp)
	pub temp_dir: PathBuf,
	#[argh(option, default = "PathBuf::from(\"public\")")]
	/// directory of the static capture page (default: public)
	pub public_dir: PathBuf,
	#[argh(option, default = "String::from(\"ffmpeg\")")]
	/// the ffmpeg binary to run (default: ffmpeg)
	pub ffmpeg: String,
	#[argh(option, default = "9999")]
	/// the websocket port of the preview helper (default: 9999)
	pub preview_port: u16,
	#[argh(switch)]
	/// do not run the preview helper
	pub no_preview: bool,
	#[argh(switch)]
	/// enable the deprecated SDP responder on /live/camera
	pub sdp_responder: bool,
	#[argh(option, default = "5004")]
	/// the local RTP port the SDP responder's encoder sends to (default: 5004)
	pub rtp_port: u16,
	#[argh(option, default = "Default::default()")]
	/// the resolution of the SDP responder's encoder in the form of WxH (default: 640x480)
	pub rtp_resolution: Resolution,
	#[argh(option, default = "5")]
	/// how many times a crashed encoder is restarted before giving up (default: 5)
	pub max_restarts: u32,
	#[argh(option, default = "500")]
	/// the initial delay before restarting a crashed encoder, doubled per attempt (default: 500)
	pub restart_backoff_ms: u64,
}

fn port_from_env() -> u16 {
	env::var("PORT").ok()
		.and_then(|p| p.parse().ok())
		.unwrap_or(DEFAULT_HTTP_PORT)
}

impl CliArgs {
	pub fn rtsp_url(&self) -> String {
		format!("rtsp://{}:{}/{}", self.rtsp_host, self.rtsp_port, self.stream_name)
	}

	pub fn rtp_url(&self) -> String {
		format!("rtp://127.0.0.1:{}?pkt_size=1316", self.rtp_port)
	}

	pub fn handoff_path(&self) -> PathBuf {
		self.temp_dir.join("pipe.jpeg")
	}

	pub fn current_frame_path(&self) -> PathBuf {
		self.temp_dir.join("current-frame.jpg")
	}

	pub fn sdp_file_path(&self) -> PathBuf {
		self.temp_dir.join("stream.sdp")
	}

	pub fn restart_policy(&self) -> RestartPolicy {
		RestartPolicy {
			max_restarts: self.max_restarts,
			initial_backoff: Duration::from_millis(self.restart_backoff_ms),
			..Default::default()
		}
	}

	pub fn start_listening_for_http(&self) -> Result<Builder<AddrIncoming>, hyper::Error> {
		Server::try_bind(&SocketAddr::V4(SocketAddrV4::new(self.host, self.port)))
	}

	pub async fn start_listening_for_preview(&self) -> std::io::Result<TcpListener> {
		TcpListener::bind(SocketAddrV4::new(self.host, self.preview_port)).await
	}
}
