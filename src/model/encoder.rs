use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

pub struct Resolution {
	pub width: usize,
	pub height: usize,
}

/// Where the encoder reads the latest frame from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handoff {
	/// Named pipe, frames are streamed back-to-back.
	Pipe(PathBuf),
	/// Ordinary file, replaced on every frame.
	File(PathBuf),
}

/// What an encoder subprocess pushes its output to.
pub enum OutputTarget {
	/// `ffmpeg -f rtsp -rtsp_transport tcp <url>`
	Rtsp(String),
	/// `ffmpeg -f rtp -sdp_file <sdp> <url>`
	Rtp { url: String, sdp_file: PathBuf },
	/// MPEG-TS on stdout
	Stdout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
	pub max_restarts: u32,
	pub initial_backoff: Duration,
	pub max_backoff: Duration,
	/// A child that stays up this long gets its restart budget back.
	pub stable_after: Duration,
	pub stop_grace: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EncoderState {
	Absent,
	Running { pid: Option<u32>, restarts: u32 },
	Backoff { attempt: u32, delay_ms: u64 },
	Failed { code: Option<i32>, restarts: u32 },
}
