use std::ffi::OsString;
use std::io::Result as IoResult;
use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::model::encoder::{Handoff, OutputTarget, Resolution};

pub mod supervisor;

const FRAME_RATE: &str = "30";

/// Command line of one encoder subprocess.
#[derive(Clone, Debug)]
pub struct EncoderArgs {
	cmd: OsString,
	args: Vec<OsString>,
	pipe_stdout: bool,
}

impl EncoderArgs {
	pub fn new(cmd: impl Into<OsString>) -> Self {
		EncoderArgs {
			cmd: cmd.into(),
			args: vec![],
			pipe_stdout: false,
		}
	}

	/// ffmpeg reading JPEG frames from the hand-off slot and publishing them to `target`.
	pub fn from_handoff(ffmpeg: &str, handoff: &Handoff, target: OutputTarget) -> Self {
		let mut args = EncoderArgs::new(ffmpeg);
		args.arg("-y");

		match handoff {
			Handoff::Pipe(path) => args
				.args(["-f", "image2pipe", "-framerate", FRAME_RATE])
				.input(path),
			Handoff::File(path) => args.looped_file_input(path),
		};

		args.with_h264()
			.with_output(target);

		return args;
	}

	/// ffmpeg pulling an RTSP feed and writing MPEG-TS to stdout, the preview helper.
	pub fn for_preview(ffmpeg: &str, rtsp_url: &str) -> Self {
		let mut args = EncoderArgs::new(ffmpeg);
		args.args(["-rtsp_transport", "tcp", "-i", rtsp_url])
			.args(["-codec:v", "mpeg1video", "-r", FRAME_RATE, "-stats"])
			.with_output(OutputTarget::Stdout);

		return args;
	}

	pub fn arg(&mut self, arg: impl Into<OsString>) -> &mut Self {
		self.args.push(arg.into());

		return self;
	}

	pub fn args<I, S>(&mut self, args: I) -> &mut Self
		where I: IntoIterator<Item=S>, S: Into<OsString> {
		self.args.extend(args.into_iter().map(Into::into));

		return self;
	}

	fn input(&mut self, path: &Path) -> &mut Self {
		self.arg("-i").arg(path.as_os_str())
	}

	/// Reads a single file over and over at the frame rate, picking up replacements.
	pub fn looped_file_input(&mut self, path: &Path) -> &mut Self {
		self.args(["-re", "-f", "image2", "-loop", "1", "-framerate", FRAME_RATE])
			.input(path)
	}

	pub fn with_h264(&mut self) -> &mut Self {
		self.args(["-c:v", "libx264", "-preset", "ultrafast", "-tune", "zerolatency"])
	}

	pub fn with_resolution(&mut self, res: &Resolution) -> &mut Self {
		self.arg("-s").arg(res.to_string())
	}

	pub fn with_bitrate(&mut self, bitrate: &str) -> &mut Self {
		self.arg("-b:v").arg(bitrate)
	}

	pub fn with_output(&mut self, target: OutputTarget) -> &mut Self {
		match target {
			OutputTarget::Rtsp(url) => {
				self.args(["-f", "rtsp", "-rtsp_transport", "tcp"]).arg(url);
			}
			OutputTarget::Rtp { url, sdp_file } => {
				self.args(["-f", "rtp", "-sdp_file"])
					.arg(sdp_file.into_os_string())
					.arg(url);
			}
			OutputTarget::Stdout => {
				self.args(["-f", "mpegts", "-"])
					.with_stdout_piped();
			}
		}

		return self;
	}

	pub fn with_stdout_piped(&mut self) -> &mut Self {
		self.pipe_stdout = true;

		return self;
	}

	pub fn spawn(&self) -> IoResult<Child> {
		Command::new(&self.cmd)
			.args(&self.args)
			.stdin(Stdio::null())
			.stdout(if self.pipe_stdout { Stdio::piped() } else { Stdio::null() })
			.stderr(Stdio::piped())
			.kill_on_drop(true)
			.spawn()
	}
}

#[cfg(test)]
mod tests {
	use std::path::PathBuf;

	use super::*;

	fn rendered(args: &EncoderArgs) -> Vec<String> {
		args.args.iter()
			.map(|a| a.to_string_lossy().into_owned())
			.collect()
	}

	#[test]
	fn pipe_handoff_publishes_over_rtsp_tcp() {
		let handoff = Handoff::Pipe(PathBuf::from("temp/pipe.jpeg"));
		let args = EncoderArgs::from_handoff(
			"ffmpeg",
			&handoff,
			OutputTarget::Rtsp("rtsp://localhost:8554/live".to_string()),
		);

		assert_eq!(rendered(&args), [
			"-y", "-f", "image2pipe", "-framerate", "30", "-i", "temp/pipe.jpeg",
			"-c:v", "libx264", "-preset", "ultrafast", "-tune", "zerolatency",
			"-f", "rtsp", "-rtsp_transport", "tcp", "rtsp://localhost:8554/live",
		]);
		assert!(!args.pipe_stdout);
	}

	#[test]
	fn file_handoff_loops_the_input() {
		let handoff = Handoff::File(PathBuf::from("temp/pipe.jpeg"));
		let args = EncoderArgs::from_handoff(
			"ffmpeg",
			&handoff,
			OutputTarget::Rtsp("rtsp://localhost:8554/live".to_string()),
		);

		let rendered = rendered(&args);
		assert_eq!(&rendered[1..8], ["-re", "-f", "image2", "-loop", "1", "-framerate", "30"]);
		assert!(!rendered.contains(&"image2pipe".to_string()));
	}

	#[test]
	fn rtp_output_writes_sdp_file() {
		let mut args = EncoderArgs::new("ffmpeg");
		args.looped_file_input(Path::new("temp/current-frame.jpg"))
			.with_h264()
			.with_bitrate("1000k")
			.with_resolution(&Resolution::default())
			.with_output(OutputTarget::Rtp {
				url: "rtp://127.0.0.1:5004?pkt_size=1316".to_string(),
				sdp_file: PathBuf::from("temp/stream.sdp"),
			});

		let rendered = rendered(&args);
		assert!(rendered.windows(2).any(|w| w == ["-s", "640x480"]));
		assert!(rendered.windows(2).any(|w| w == ["-b:v", "1000k"]));
		assert_eq!(&rendered[rendered.len() - 5..], [
			"-f", "rtp", "-sdp_file", "temp/stream.sdp", "rtp://127.0.0.1:5004?pkt_size=1316",
		]);
	}

	#[test]
	fn preview_pipes_mpegts_to_stdout() {
		let args = EncoderArgs::for_preview("ffmpeg", "rtsp://localhost:8554/live");
		let rendered = rendered(&args);

		assert!(args.pipe_stdout);
		assert_eq!(&rendered[rendered.len() - 3..], ["-f", "mpegts", "-"]);
	}
}
