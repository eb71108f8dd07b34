use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::OnceCell;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{HandoffError, RelayError};
use crate::implem::encoder::supervisor::EncoderSupervisor;
use crate::implem::handoff::FrameSlot;
use crate::model::frame::{Frame, FrameEvent};

/// Receives frames from capture clients and keeps the encoder fed.
pub struct FrameRelay {
	slot: FrameSlot,
	encoder: Arc<EncoderSupervisor>,
	preview: Option<Arc<EncoderSupervisor>>,
	started: OnceCell<()>,
	/// Set while the hand-off has no reader, so the drop is reported once.
	starved: AtomicBool,
	frames_written: AtomicU64,
	frames_failed: AtomicU64,
}

impl FrameRelay {
	pub fn new(slot: FrameSlot, encoder: Arc<EncoderSupervisor>, preview: Option<Arc<EncoderSupervisor>>) -> Self {
		FrameRelay {
			slot,
			encoder,
			preview,
			started: OnceCell::new(),
			starved: AtomicBool::new(false),
			frames_written: AtomicU64::new(0),
			frames_failed: AtomicU64::new(0),
		}
	}

	/// Runs one capture client until its socket closes.
	pub async fn serve<S>(&self, mut ws: WebSocketStream<S>, addr: SocketAddr)
		where S: AsyncRead + AsyncWrite + Unpin {
		self.on_connect(addr).await;

		while let Some(msg) = ws.next().await {
			match msg {
				Ok(Message::Text(text)) => self.on_message(&text).await,
				Ok(Message::Close(_)) => break,
				Ok(_) => {}
				Err(e) => {
					warn!("Socket error from {}: {}", addr, e);
					break;
				}
			}
		}

		info!("Client disconnected {}", addr);
	}

	/// The encoders are started by the first client of the server's lifetime only.
	pub async fn on_connect(&self, addr: SocketAddr) {
		info!("Client connected {}", addr);

		self.started.get_or_init(|| async {
			info!("Starting the encoder for the first client");
			self.encoder.start().await;
			if let Some(preview) = &self.preview {
				preview.start().await;
			}
		}).await;
	}

	pub async fn on_message(&self, text: &str) {
		match FrameEvent::parse(text) {
			Some(event) if event.is_frame() => match self.on_frame(&event.data).await {
				Ok(()) => {
					if self.starved.swap(false, Ordering::Relaxed) {
						info!("Encoder is reading frames again");
					}
				}
				Err(RelayError::Handoff(HandoffError::NoReader)) => {
					if !self.starved.swap(true, Ordering::Relaxed) {
						warn!("No encoder is reading {:?}, dropping frames until one does", self.slot.handoff().path());
					}
				}
				Err(e) => error!("Failed to save frame: {}", e),
			},
			Some(event) => debug!("Ignoring event {}", event.event),
			None => debug!("Ignoring a message that is not an event"),
		}
	}

	pub async fn on_frame(&self, payload: &str) -> Result<(), RelayError> {
		let written = match Frame::from_data_url(payload) {
			Ok(frame) => self.slot.write(&frame).await.map_err(RelayError::from),
			Err(e) => Err(e.into()),
		};

		match written {
			Ok(()) => {
				let n = self.frames_written.fetch_add(1, Ordering::Relaxed) + 1;
				trace!("Wrote frame {} to {:?}", n, self.slot.handoff().path());
			}
			Err(_) => {
				self.frames_failed.fetch_add(1, Ordering::Relaxed);
			}
		}

		written
	}

	pub fn encoder(&self) -> &EncoderSupervisor {
		&self.encoder
	}

	pub fn preview(&self) -> Option<&EncoderSupervisor> {
		self.preview.as_deref()
	}

	pub fn frames_written(&self) -> u64 {
		self.frames_written.load(Ordering::Relaxed)
	}

	pub fn frames_failed(&self) -> u64 {
		self.frames_failed.load(Ordering::Relaxed)
	}
}
