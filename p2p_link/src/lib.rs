//! Peer-to-peer links negotiated over a signaling relay, carrying files split
//! into paced, self-describing chunks.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod signaling;
pub mod transfer;

pub use config::{FilesConfig, LinkConfig};
pub use connection::{ConnectionRegistry, NegotiationState, PeerLink};
pub use error::{ErrorCategory, LinkError, Result};
pub use events::{Direction, EventBus, LinkEvent};
pub use signaling::{ChannelSignaling, Signaling, SignalingMessage};
pub use transfer::{ChunkEnvelope, FileInfo, FileTransferSession, TransferFile, TransferStats};

/// Someone taking part in a session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub name: String,
}

impl Participant {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// A fresh participant named after this machine
    pub fn local_host() -> Self {
        let name = hostname::get()
            .ok()
            .and_then(|s| s.into_string().ok())
            .unwrap_or_else(|| "Unknown-PC".to_string());
        Self::new(Uuid::new_v4().to_string(), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_host_participants_are_distinct() {
        let first = Participant::local_host();
        let second = Participant::local_host();
        assert_ne!(first.id, second.id);
        assert!(!first.name.is_empty());
    }
}
