// Test doubles shared by the hub, loader and session tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

use crate::binance::transport::{Connector, MessageStream};

/// In-memory connector: every connect opens a channel the test can feed or
/// close. Feeds are indexed in connect order.
#[derive(Default)]
pub(crate) struct MockConnector {
    connects: AtomicUsize,
    pub(crate) fail: AtomicBool,
    feeds: Mutex<Vec<Option<mpsc::UnboundedSender<anyhow::Result<String>>>>>,
    urls: Mutex<Vec<String>>,
}

impl MockConnector {
    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn url(&self, idx: usize) -> Option<String> {
        self.urls.lock().get(idx).cloned()
    }

    /// Index of the feed most recently opened for a URL ending in `suffix`.
    pub(crate) fn feed_for(&self, suffix: &str) -> Option<usize> {
        self.urls.lock().iter().rposition(|u| u.ends_with(suffix))
    }

    pub(crate) fn send(&self, idx: usize, text: &str) {
        if let Some(Some(tx)) = self.feeds.lock().get(idx) {
            let _ = tx.send(Ok(text.to_string()));
        }
    }

    pub(crate) fn drop_feed(&self, idx: usize) {
        if let Some(slot) = self.feeds.lock().get_mut(idx) {
            slot.take();
        }
    }

    pub(crate) fn feed_closed(&self, idx: usize) -> bool {
        match self.feeds.lock().get(idx) {
            Some(Some(tx)) => tx.is_closed(),
            _ => true,
        }
    }
}

impl Connector for MockConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, anyhow::Result<MessageStream>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(url.to_string());
        if self.fail.load(Ordering::SeqCst) {
            self.feeds.lock().push(None);
            return Box::pin(async { anyhow::bail!("connection refused") });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds.lock().push(Some(tx));
        Box::pin(async move {
            let stream = futures_util::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|msg| (msg, rx))
            });
            Ok(stream.boxed())
        })
    }
}

/// Serve canned HTTP responses, one per connection, in order. Returns the
/// REST base URL and a receiver for the request heads.
pub(crate) async fn serve(responses: Vec<String>) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        for response in responses {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut buf = vec![0u8; 8192];
            let n = socket.read(&mut buf).await.unwrap_or(0);
            let _ = tx.send(String::from_utf8_lossy(&buf[..n]).to_string());
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });
    (format!("http://{addr}/api/v3"), rx)
}

pub(crate) async fn serve_once(response: String) -> (String, oneshot::Receiver<String>) {
    let (base, mut heads) = serve(vec![response]).await;
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        if let Some(head) = heads.recv().await {
            let _ = tx.send(head);
        }
    });
    (base, rx)
}

/// Serve one response, but only after `release` fires. `seen` fires once the
/// request has been read.
pub(crate) async fn serve_held(response: String) -> (String, oneshot::Receiver<()>, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, seen_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let mut buf = vec![0u8; 8192];
        let _ = socket.read(&mut buf).await;
        let _ = seen_tx.send(());
        let _ = release_rx.await;
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;
    });
    (format!("http://{addr}/api/v3"), seen_rx, release_tx)
}

pub(crate) fn http_ok(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

pub(crate) fn http_status(code: u16, reason: &str) -> String {
    format!("HTTP/1.1 {code} {reason}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
}

/// Poll `cond` until it holds, failing the test after a few seconds.
pub(crate) async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}
