#[macro_use]
extern crate argh;
extern crate env_logger;
extern crate hyper;
#[macro_use]
extern crate log;
extern crate tokio;

use std::collections::HashMap;
use std::process;
use std::sync::Arc;

use env_logger::Env;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::implem::encoder::EncoderArgs;
use crate::implem::encoder::supervisor::EncoderSupervisor;
use crate::implem::handoff::FrameSlot;
use crate::model::cli::CliArgs;
use crate::model::encoder::{Handoff, OutputTarget};
use crate::service::http::{HttpCtx, SDP_ROUTE, listen_for_http_requests};
use crate::service::preview::{listen_for_new_viewers, write_preview_stream};
use crate::service::relay::FrameRelay;
use crate::service::shutdown::wait_for_signal;
use crate::utils::am;

mod error;
mod implem;
mod model;
mod service;
mod utils;

const RTP_BITRATE: &str = "1000k";

#[tokio::main]
async fn main() {
	let args = argh::from_env::<CliArgs>();

	env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

	if let Err(e) = run(args).await {
		error!("{}", e);
		process::exit(1);
	}
}

async fn run(args: CliArgs) -> Result<(), Error> {
	let policy = args.restart_policy();
	let rtsp_url = args.rtsp_url();

	let handoff = Handoff::prepare(&args.handoff_path()).await?;
	info!("Frames are handed to the encoder through {:?}", handoff);

	let encoder = Arc::new(EncoderSupervisor::new(
		"relay",
		EncoderArgs::from_handoff(&args.ffmpeg, &handoff, OutputTarget::Rtsp(rtsp_url.clone())),
		policy,
	));

	let mut slot = FrameSlot::new(handoff);
	let rtp = if args.sdp_responder {
		warn!("The session description route {} is deprecated, prefer {}", SDP_ROUTE, rtsp_url);
		slot = slot.with_mirror(args.current_frame_path());

		let mut rtp = EncoderArgs::new(&args.ffmpeg);
		rtp.looped_file_input(&args.current_frame_path())
			.with_h264()
			.with_bitrate(RTP_BITRATE)
			.with_resolution(&args.rtp_resolution)
			.with_output(OutputTarget::Rtp {
				url: args.rtp_url(),
				sdp_file: args.sdp_file_path(),
			});
		Some(Arc::new(EncoderSupervisor::new("rtp", rtp, policy)))
	} else {
		None
	};

	let preview = if args.no_preview {
		None
	} else {
		let listener = args.start_listening_for_preview().await?;
		let (tx, rx) = mpsc::channel(60);
		let viewers = am(HashMap::new());
		tokio::spawn(write_preview_stream(rx, viewers.clone()));
		tokio::spawn(listen_for_new_viewers(listener, viewers));
		info!("Preview available at ws://{}:{}/", args.host, args.preview_port);

		let supervisor = EncoderSupervisor::new("preview", EncoderArgs::for_preview(&args.ffmpeg, &rtsp_url), policy)
			.with_stdout_sink(tx);
		Some(Arc::new(supervisor))
	};

	let relay = Arc::new(FrameRelay::new(slot, encoder.clone(), preview.clone()));
	let supervisors = [Some(encoder), preview, rtp.clone()]
		.into_iter()
		.flatten()
		.collect::<Vec<_>>();

	let shutdown = async move {
		wait_for_signal().await;
		info!("Shutting down");
		for supervisor in supervisors {
			supervisor.stop().await;
			debug!("Stopped the {} encoder", supervisor.name());
		}
	};

	let server = args.start_listening_for_http()?;
	info!("HTTP server running on http://{}:{}", args.host, args.port);
	info!("RTSP stream available at {}", rtsp_url);

	listen_for_http_requests(server, HttpCtx::new(relay, args.public_dir.clone(), rtp), shutdown).await?;

	Ok(())
}
