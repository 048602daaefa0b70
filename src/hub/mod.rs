// =============================================================================
// Connection Hub — reference-counted multiplexer over live feed connections
// =============================================================================
//
// Every stream key (e.g. `btcusdt@kline_1m`) maps to at most one connection,
// shared by all of its subscribers. The connection exists while at least one
// subscriber holds a handle; the last unsubscribe aborts it.
//
// Status per key:
//   Connecting -> Open -> {Reconnecting -> Open}* -> Closed
//   Reconnecting -> Failed once the reconnect policy gives up.
//
// The subscription table is the only shared mutable state. It sits behind a
// parking_lot mutex that is never held across an await: dispatch copies the
// listener list out and calls handlers with the lock released. Each message
// is parsed once and handed to the handlers in registration order; a handler
// that errors or panics is logged and the rest still run.
// =============================================================================

pub mod backoff;

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::binance::transport::Connector;
use crate::error::MarketError;
use crate::market_data::feed::stream_url;
use crate::types::ConnectionStatus;

pub use backoff::{Backoff, ReconnectPolicy};

/// Subscriber callback. Receives every parsed message for its key.
pub type Handler = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

struct Subscription {
    generation: u64,
    listeners: Vec<(u64, Handler)>,
    status: watch::Sender<ConnectionStatus>,
    task: Option<JoinHandle<()>>,
    failed_attempts: Option<u32>,
}

struct HubInner {
    connector: Arc<dyn Connector>,
    ws_base: String,
    policy: ReconnectPolicy,
    subs: Mutex<HashMap<String, Subscription>>,
    next_id: AtomicU64,
}

/// Cheap to clone; all clones share one subscription table.
#[derive(Clone)]
pub struct ConnectionHub {
    inner: Arc<HubInner>,
}

impl ConnectionHub {
    pub fn new(connector: Arc<dyn Connector>, ws_base: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self {
            inner: Arc::new(HubInner {
                connector,
                ws_base: ws_base.into(),
                policy,
                subs: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register `handler` for `key`, opening the connection if this is the
    /// first subscriber. Must be called from within a Tokio runtime.
    pub fn subscribe<F>(&self, key: impl Into<String>, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let key = key.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let handler: Handler = Arc::new(handler);

        let mut subs = self.inner.subs.lock();
        match subs.get_mut(&key) {
            Some(sub) => {
                sub.listeners.push((id, handler));
                if *sub.status.borrow() == ConnectionStatus::Failed {
                    // A fresh subscriber revives a connection that gave up.
                    let generation = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    sub.generation = generation;
                    sub.failed_attempts = None;
                    sub.status.send_replace(ConnectionStatus::Connecting);
                    sub.task = Some(self.spawn_connection(&key, generation));
                    info!(key = %key, "restarting failed feed connection");
                }
                debug!(key = %key, refcount = sub.listeners.len(), "subscriber joined existing connection");
            }
            None => {
                let generation = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                let (status, _) = watch::channel(ConnectionStatus::Connecting);
                let task = self.spawn_connection(&key, generation);
                subs.insert(
                    key.clone(),
                    Subscription {
                        generation,
                        listeners: vec![(id, handler)],
                        status,
                        task: Some(task),
                        failed_attempts: None,
                    },
                );
                info!(key = %key, "opening feed connection");
            }
        }
        drop(subs);

        SubscriptionHandle {
            hub: self.inner.clone(),
            key,
            id,
            released: AtomicBool::new(false),
        }
    }

    fn spawn_connection(&self, key: &str, generation: u64) -> JoinHandle<()> {
        tokio::spawn(run_connection(self.inner.clone(), key.to_string(), generation))
    }

    /// Current status; `Closed` for keys nobody is subscribed to.
    pub fn status(&self, key: &str) -> ConnectionStatus {
        self.inner
            .subs
            .lock()
            .get(key)
            .map(|s| *s.status.borrow())
            .unwrap_or(ConnectionStatus::Closed)
    }

    /// Status signal for `key`. The sender side goes away when the last
    /// subscriber leaves, after publishing `Closed`.
    pub fn watch_status(&self, key: &str) -> Option<watch::Receiver<ConnectionStatus>> {
        self.inner.subs.lock().get(key).map(|s| s.status.subscribe())
    }

    pub fn refcount(&self, key: &str) -> usize {
        self.inner.subs.lock().get(key).map_or(0, |s| s.listeners.len())
    }

    pub fn active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.subs.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Why the connection for `key` stopped retrying, if it did.
    pub fn failure(&self, key: &str) -> Option<MarketError> {
        let subs = self.inner.subs.lock();
        let attempts = subs.get(key)?.failed_attempts?;
        Some(MarketError::ConnectionLost {
            key: key.to_string(),
            attempts,
        })
    }
}

impl std::fmt::Debug for ConnectionHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHub")
            .field("ws_base", &self.inner.ws_base)
            .field("keys", &self.active_keys())
            .finish()
    }
}

impl HubInner {
    fn is_current(&self, key: &str, generation: u64) -> bool {
        self.subs
            .lock()
            .get(key)
            .is_some_and(|s| s.generation == generation)
    }

    /// Publish `status` if this connection generation still owns the key.
    fn set_status(&self, key: &str, generation: u64, status: ConnectionStatus) -> bool {
        let subs = self.subs.lock();
        match subs.get(key) {
            Some(s) if s.generation == generation => {
                s.status.send_replace(status);
                true
            }
            _ => false,
        }
    }

    fn mark_failed(&self, key: &str, generation: u64, attempts: u32) {
        let mut subs = self.subs.lock();
        if let Some(s) = subs.get_mut(key) {
            if s.generation == generation {
                s.failed_attempts = Some(attempts);
                s.task = None;
                s.status.send_replace(ConnectionStatus::Failed);
            }
        }
    }

    /// Deliver one raw frame. Returns false once this generation is stale.
    fn dispatch(&self, key: &str, generation: u64, text: &str) -> bool {
        let listeners: Vec<(u64, Handler)> = {
            let subs = self.subs.lock();
            match subs.get(key) {
                Some(s) if s.generation == generation => s.listeners.clone(),
                _ => return false,
            }
        };

        let payload: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!(key = %key, error = %e, "malformed feed message; skipped");
                return true;
            }
        };

        for (id, handler) in &listeners {
            match catch_unwind(AssertUnwindSafe(|| handler(&payload))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(key = %key, listener = id, error = %e, "subscriber handler failed"),
                Err(_) => error!(key = %key, listener = id, "subscriber handler panicked"),
            }
        }
        true
    }

    fn release(&self, key: &str, id: u64) {
        let task = {
            let mut subs = self.subs.lock();
            let Some(sub) = subs.get_mut(key) else {
                return;
            };
            let before = sub.listeners.len();
            sub.listeners.retain(|(lid, _)| *lid != id);
            if sub.listeners.len() == before {
                return;
            }
            if !sub.listeners.is_empty() {
                debug!(key = %key, refcount = sub.listeners.len(), "subscriber left");
                return;
            }
            let Some(sub) = subs.remove(key) else {
                return;
            };
            sub.status.send_replace(ConnectionStatus::Closed);
            sub.task
        };

        if let Some(task) = task {
            task.abort();
        }
        info!(key = %key, "last subscriber left; feed connection closed");
    }
}

async fn run_connection(hub: Arc<HubInner>, key: String, generation: u64) {
    let url = stream_url(&hub.ws_base, &key);
    let mut backoff = Backoff::new(&hub.policy);
    let mut failures: u32 = 0;

    loop {
        if !hub.is_current(&key, generation) {
            return;
        }

        match hub.connector.connect(&url).await {
            Ok(mut stream) => {
                if !hub.set_status(&key, generation, ConnectionStatus::Open) {
                    return;
                }
                info!(key = %key, "feed connected");
                backoff.reset();
                failures = 0;

                while let Some(frame) = stream.next().await {
                    match frame {
                        Ok(text) => {
                            if !hub.dispatch(&key, generation, &text) {
                                return;
                            }
                        }
                        Err(e) => {
                            warn!(key = %key, error = %e, "feed read error");
                            break;
                        }
                    }
                }
                warn!(key = %key, "feed connection lost");
            }
            Err(e) => {
                warn!(key = %key, error = %e, "feed connect failed");
            }
        }

        failures += 1;
        if hub.policy.max_attempts.is_some_and(|max| failures > max) {
            error!(key = %key, attempts = failures, "reconnect attempts exhausted; giving up");
            hub.mark_failed(&key, generation, failures);
            return;
        }

        let delay = backoff.next_delay();
        if !hub.set_status(&key, generation, ConnectionStatus::Reconnecting) {
            return;
        }
        info!(key = %key, attempt = failures, delay_ms = delay.as_millis() as u64, "reconnecting feed");
        tokio::time::sleep(delay).await;
    }
}

/// Keeps one subscriber registered. `unsubscribe` is idempotent and also
/// runs on drop.
pub struct SubscriptionHandle {
    hub: Arc<HubInner>,
    key: String,
    id: u64,
    released: AtomicBool,
}

impl SubscriptionHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn unsubscribe(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.hub.release(&self.key, self.id);
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("released", &self.released.load(Ordering::Relaxed))
            .finish()
    }
}
