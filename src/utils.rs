use std::collections::HashMap;
use std::sync::Arc;

use futures_util::stream::SplitSink;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

pub type Am<T> = Arc<Mutex<T>>;
pub type Viewer = SplitSink<WebSocketStream<TcpStream>, Message>;
pub type ViewersContainer = Am<HashMap<String, Viewer>>;

pub fn am<T>(t: T) -> Am<T> {
	Arc::new(Mutex::new(t))
}
