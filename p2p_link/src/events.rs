//! Lifecycle events exposed to the embedding application.

use std::sync::{Arc, RwLock};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::connection::transport::{ConnectivityState, IceCandidate, MediaSource, SessionDescription};
use crate::error::{ErrorCategory, LinkError};
use crate::transfer::{FileInfo, TransferStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Outgoing,
    Incoming,
}

#[derive(Debug, Clone)]
pub enum LinkEvent {
    NegotiationOfferCreated {
        remote_id: String,
        description: SessionDescription,
    },
    NegotiationAnswerCreated {
        remote_id: String,
        description: SessionDescription,
    },
    IceCandidateFound {
        remote_id: String,
        candidate: IceCandidate,
    },
    RemoteMediaAdded {
        remote_id: String,
        source: MediaSource,
    },
    LocalMediaAdded {
        remote_id: String,
        source_id: String,
    },
    ConnectivityChanged {
        remote_id: String,
        state: ConnectivityState,
    },
    TransferStarted {
        remote_id: String,
        direction: Direction,
        file_id: String,
    },
    TransferProgress {
        remote_id: String,
        direction: Direction,
        file_id: String,
        stats: TransferStats,
    },
    TransferFinished {
        remote_id: String,
        direction: Direction,
        file_id: String,
    },
    /// A complete inbound file.
    FileReceived {
        remote_id: String,
        info: FileInfo,
        data: Bytes,
    },
    TransferError {
        remote_id: String,
        kind: ErrorCategory,
        detail: String,
    },
    /// A renegotiation the link started on its own failed. The call that
    /// triggered it still succeeded.
    NegotiationFailed {
        remote_id: String,
        kind: ErrorCategory,
        detail: String,
    },
    LinkClosed {
        remote_id: String,
    },
}

impl LinkEvent {
    pub fn transfer_error(remote_id: &str, error: &LinkError) -> Self {
        LinkEvent::TransferError {
            remote_id: remote_id.to_string(),
            kind: error.category(),
            detail: error.to_string(),
        }
    }

    pub fn negotiation_failed(remote_id: &str, error: &LinkError) -> Self {
        LinkEvent::NegotiationFailed {
            remote_id: remote_id.to_string(),
            kind: error.category(),
            detail: error.to_string(),
        }
    }
}

type Observer = Arc<dyn Fn(&LinkEvent) + Send + Sync>;

/// Ordered list of observers. Every event is delivered to every observer in
/// registration order.
#[derive(Default)]
pub struct EventBus {
    observers: RwLock<Vec<Observer>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, observer: F)
    where
        F: Fn(&LinkEvent) + Send + Sync + 'static,
    {
        let mut observers = self.observers.write().unwrap_or_else(|e| e.into_inner());
        observers.push(Arc::new(observer));
    }

    /// Registers an observer that forwards every event into a channel.
    pub fn subscribe_channel(&self) -> mpsc::UnboundedReceiver<LinkEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
        rx
    }

    pub fn emit(&self, event: LinkEvent) {
        // Snapshot so an observer may subscribe further observers.
        let observers: Vec<Observer> = self
            .observers
            .read()
            .map(|observers| observers.clone())
            .unwrap_or_else(|e| e.into_inner().clone());
        for observer in observers {
            observer(&event);
        }
    }

    pub fn len(&self) -> usize {
        self.observers.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("observers", &self.len())
            .finish()
    }
}
