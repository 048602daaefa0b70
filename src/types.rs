// =============================================================================
// Shared types used across the Aurora market-state core
// =============================================================================

use serde::{Deserialize, Serialize};

/// Lifecycle of one shared feed connection.
///
/// `Connecting -> Open -> {Reconnecting -> Open}* -> Closed`. `Failed` is only
/// reached when a bounded reconnect budget runs out while consumers remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Reconnecting,
    Closed,
    Failed,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::Closed
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Closed => write!(f, "closed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Order-book side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bid => write!(f, "bid"),
            Self::Ask => write!(f, "ask"),
        }
    }
}
