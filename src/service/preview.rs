use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc::Receiver;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use crate::utils::ViewersContainer;

/// Accepts preview viewers and registers them for the MPEG-TS fan-out.
pub async fn listen_for_new_viewers(listener: TcpListener, viewers: ViewersContainer) {
	while let Ok((stream, addr)) = listener.accept().await {
		let viewers = viewers.clone();

		tokio::spawn(async move {
			let ws = match accept_async(stream).await {
				Ok(ws) => ws,
				Err(e) => {
					warn!("Preview handshake with {} failed: {}", addr, e);
					return;
				}
			};

			let addr = addr.to_string();
			let (sink, mut source) = ws.split();
			viewers.lock().await.insert(addr.clone(), sink);
			info!("Preview viewer connected {}", addr);

			// Viewers never talk, just wait for them to leave
			while let Some(Ok(msg)) = source.next().await {
				if msg.is_close() {
					break;
				}
			}

			if viewers.lock().await.remove(&addr).is_some() {
				info!("Preview viewer disconnected {}", addr);
			}
		});
	}
}

/// Writes every chunk from the preview encoder to every viewer.
pub async fn write_preview_stream(mut producer: Receiver<Vec<u8>>, viewers: ViewersContainer) {
	while let Some(chunk) = producer.recv().await {
		let mut errors = Vec::with_capacity(0);

		{
			for (addr, viewer) in viewers.lock().await.iter_mut() {
				if viewer.send(Message::Binary(chunk.clone())).await.is_err() {
					errors.push(addr.to_owned());
				}
			}
		}

		while let Some(addr) = errors.pop() {
			viewers.lock().await.remove(&addr);
			info!("Ejected {}", addr);
		}
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;
	use std::time::Duration;

	use tokio::sync::mpsc;
	use tokio::time::{sleep, timeout};
	use tokio_tungstenite::connect_async;

	use crate::utils::am;

	use super::*;

	async fn wait_for_viewers(viewers: &ViewersContainer, count: usize) {
		timeout(Duration::from_secs(10), async {
			while viewers.lock().await.len() != count {
				sleep(Duration::from_millis(10)).await;
			}
		}).await.unwrap();
	}

	#[tokio::test]
	async fn chunks_reach_every_viewer_until_it_leaves() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let url = format!("ws://{}/", listener.local_addr().unwrap());
		let viewers: ViewersContainer = am(HashMap::new());
		let (tx, rx) = mpsc::channel(8);

		tokio::spawn(listen_for_new_viewers(listener, viewers.clone()));
		tokio::spawn(write_preview_stream(rx, viewers.clone()));

		let (mut first, _) = connect_async(url.as_str()).await.unwrap();
		let (mut second, _) = connect_async(url.as_str()).await.unwrap();
		wait_for_viewers(&viewers, 2).await;

		tx.send(b"\x47mpegts".to_vec()).await.unwrap();
		for viewer in [&mut first, &mut second] {
			let msg = timeout(Duration::from_secs(10), viewer.next()).await.unwrap().unwrap().unwrap();
			assert_eq!(msg, Message::Binary(b"\x47mpegts".to_vec()));
		}

		first.close(None).await.unwrap();
		wait_for_viewers(&viewers, 1).await;

		tx.send(b"next".to_vec()).await.unwrap();
		let msg = timeout(Duration::from_secs(10), second.next()).await.unwrap().unwrap().unwrap();
		assert_eq!(msg, Message::Binary(b"next".to_vec()));
	}
}
