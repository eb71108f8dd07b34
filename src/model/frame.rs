use serde::Deserialize;

/// Data-URL prefix the capture client puts in front of every frame.
pub const FRAME_PREFIX: &str = "data:image/jpeg;base64,";

/// The only event name the relay acts on.
pub const FRAME_EVENT: &str = "webcam-frame";

/// A single decoded JPEG, superseded by the next one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
	pub bytes: Vec<u8>,
}

/// Websocket message envelope: `{"event": "webcam-frame", "data": "data:image/jpeg;base64,..."}`
#[derive(Debug, Deserialize)]
pub struct FrameEvent {
	pub event: String,
	#[serde(default)]
	pub data: String,
}
