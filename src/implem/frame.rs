use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::FrameError;
use crate::model::frame::{FRAME_EVENT, FRAME_PREFIX, Frame, FrameEvent};

impl Frame {
	/// Decodes a data-URL payload. The JPEG prefix is optional, anything else is
	/// treated as part of the Base64 body.
	pub fn from_data_url(payload: &str) -> Result<Self, FrameError> {
		let body = payload.strip_prefix(FRAME_PREFIX).unwrap_or(payload);
		let bytes = STANDARD.decode(body.trim_end())?;

		if bytes.is_empty() {
			return Err(FrameError::Empty);
		}

		Ok(Frame { bytes })
	}
}

impl FrameEvent {
	/// Parses a websocket text message. Bare data URLs are accepted as frame events.
	pub fn parse(text: &str) -> Option<Self> {
		if text.starts_with(FRAME_PREFIX) {
			return Some(FrameEvent {
				event: FRAME_EVENT.to_string(),
				data: text.to_string(),
			});
		}

		serde_json::from_str(text).ok()
	}

	pub fn is_frame(&self) -> bool {
		self.event == FRAME_EVENT
	}
}
