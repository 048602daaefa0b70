pub mod client;
pub mod transport;

pub use client::{HistoryLoader, DEFAULT_REST_BASE, DEFAULT_TIMEOUT};
pub use transport::{Connector, MessageStream, WsConnector};
