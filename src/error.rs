use std::io;

use thiserror::Error;

/// Reasons a `webcam-frame` payload cannot become a frame.
#[derive(Debug, Error)]
pub enum FrameError {
	#[error("frame payload is not valid base64: {0}")]
	Base64(#[from] base64::DecodeError),
	#[error("frame payload decoded to zero bytes")]
	Empty,
}

#[derive(Debug, Error)]
pub enum HandoffError {
	#[error("no encoder is reading the frame pipe")]
	NoReader,
	#[error("frame hand-off i/o: {0}")]
	Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum Error {
	#[error("i/o: {0}")]
	Io(#[from] io::Error),
	#[error("http server: {0}")]
	Http(#[from] hyper::Error),
}

#[derive(Debug, Error)]
pub enum RelayError {
	#[error(transparent)]
	Frame(#[from] FrameError),
	#[error(transparent)]
	Handoff(#[from] HandoffError),
}
