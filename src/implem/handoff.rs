use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::pipe;
use tokio::sync::Mutex;

use crate::error::HandoffError;
use crate::model::encoder::Handoff;
use crate::model::frame::Frame;

impl Handoff {
	/// Creates the hand-off location, preferring a named pipe and falling back to a
	/// plain file. Whatever already sits at `path` is reused.
	pub async fn prepare(path: &Path) -> std::io::Result<Self> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).await?;
		}

		if let Ok(meta) = fs::metadata(path).await {
			return Ok(if is_fifo(&meta) {
				Handoff::Pipe(path.to_path_buf())
			} else {
				Handoff::File(path.to_path_buf())
			});
		}

		match mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR) {
			Ok(()) => Ok(Handoff::Pipe(path.to_path_buf())),
			Err(e) => {
				warn!("Cannot create a pipe at {:?} ({}), using a plain file", path, e);
				fs::write(path, b"").await?;
				Ok(Handoff::File(path.to_path_buf()))
			}
		}
	}

	pub fn path(&self) -> &Path {
		match self {
			Handoff::Pipe(path) | Handoff::File(path) => path,
		}
	}
}

fn is_fifo(meta: &std::fs::Metadata) -> bool {
	use std::os::unix::fs::FileTypeExt;

	meta.file_type().is_fifo()
}

/// The single "current frame" slot shared by the relay and the encoder.
///
/// Writes are serialised. A pipe receives whole frames back-to-back through one
/// long-lived sender; a file is replaced by renaming a fully written sibling over it.
pub struct FrameSlot {
	handoff: Handoff,
	mirror: Option<PathBuf>,
	sender: Mutex<Option<pipe::Sender>>,
}

impl FrameSlot {
	pub fn new(handoff: Handoff) -> Self {
		FrameSlot {
			handoff,
			mirror: None,
			sender: Mutex::new(None),
		}
	}

	/// Also keeps a plain file at `path` holding the latest frame.
	pub fn with_mirror(mut self, path: PathBuf) -> Self {
		self.mirror = Some(path);

		return self;
	}

	pub fn handoff(&self) -> &Handoff {
		&self.handoff
	}

	/// Hands `frame` to the encoder. The mirror is updated even when nobody reads
	/// the hand-off; the first failure is returned.
	pub async fn write(&self, frame: &Frame) -> Result<(), HandoffError> {
		let mut sender = self.sender.lock().await;

		let handed = match &self.handoff {
			Handoff::Pipe(path) => write_pipe(&mut sender, path, &frame.bytes).await,
			Handoff::File(path) => replace_file(path, &frame.bytes).await.map_err(HandoffError::from),
		};

		let mirrored = match &self.mirror {
			Some(mirror) => replace_file(mirror, &frame.bytes).await.map_err(HandoffError::from),
			None => Ok(()),
		};

		handed.and(mirrored)
	}
}

async fn write_pipe(sender: &mut Option<pipe::Sender>, path: &Path, bytes: &[u8]) -> Result<(), HandoffError> {
	if sender.is_none() {
		let opened = pipe::OpenOptions::new()
			.open_sender(path)
			.map_err(|e| match e.raw_os_error() {
				Some(code) if code == Errno::ENXIO as i32 => HandoffError::NoReader,
				_ => HandoffError::Io(e),
			})?;
		*sender = Some(opened);
	}

	if let Some(tx) = sender.as_mut() {
		if let Err(e) = tx.write_all(bytes).await {
			// The reader went away, reopen on the next frame
			*sender = None;
			return Err(match e.kind() {
				ErrorKind::BrokenPipe => HandoffError::NoReader,
				_ => HandoffError::Io(e),
			});
		}
	}

	Ok(())
}

async fn replace_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
	let mut name = OsString::from(".");
	name.push(path.file_name().unwrap_or(path.as_os_str()));
	name.push(".tmp");
	let staging = path.with_file_name(name);

	fs::write(&staging, bytes).await?;
	fs::rename(&staging, path).await
}
