use tokio::signal::ctrl_c;
use tokio::signal::unix::{SignalKind, signal};

/// Resolves on the first SIGINT or SIGTERM.
pub async fn wait_for_signal() {
	let mut terminate = match signal(SignalKind::terminate()) {
		Ok(terminate) => terminate,
		Err(e) => {
			warn!("Cannot listen for SIGTERM ({}), only SIGINT stops the server", e);
			if let Err(e) = ctrl_c().await {
				error!("Cannot listen for SIGINT: {}", e);
			}
			return;
		}
	};

	tokio::select! {
		res = ctrl_c() => {
			if let Err(e) = res {
				error!("Cannot listen for SIGINT: {}", e);
			}
			info!("Received SIGINT");
		}
		_ = terminate.recv() => info!("Received SIGTERM"),
	}
}
