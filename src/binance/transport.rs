// =============================================================================
// Feed transport — the seam between the connection hub and the network
// =============================================================================
//
// A connector turns a stream URL into a stream of text frames. The stream
// ending (or yielding an error) means the connection is gone; the hub decides
// whether to reconnect. Production uses `WsConnector`; tests plug in an
// in-memory connector.
// =============================================================================

use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

/// Text frames from one live connection, in arrival order.
pub type MessageStream = BoxStream<'static, Result<String>>;

pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<MessageStream>>;
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<MessageStream>> {
        let url = url.to_string();
        Box::pin(async move {
            info!(url = %url, "connecting to WebSocket");
            let (ws_stream, _response) = connect_async(&url)
                .await
                .with_context(|| format!("failed to connect to {url}"))?;
            info!(url = %url, "WebSocket connected");

            let (_write, read) = ws_stream.split();
            let frames = futures_util::stream::unfold(read, |mut read| async move {
                loop {
                    match read.next().await? {
                        Ok(Message::Text(text)) => return Some((Ok(text), read)),
                        Ok(Message::Close(frame)) => {
                            debug!(?frame, "WebSocket close frame received");
                            return None;
                        }
                        Ok(_) => continue,
                        Err(e) => {
                            return Some((Err(anyhow::Error::new(e).context("WebSocket read error")), read))
                        }
                    }
                }
            });
            Ok(frames.boxed())
        })
    }
}
