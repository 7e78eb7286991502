//! Outbound negotiation messages.
//!
//! Delivery is someone else's job: links only hand descriptions and
//! candidates to a [`Signaling`] implementation. Inbound messages come back
//! through `ConnectionRegistry::handle_signal`.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::Participant;
use crate::connection::transport::{IceCandidate, SessionDescription};
use crate::error::SignalingError;

pub trait Signaling: Send + Sync {
    fn send_offer(
        &self,
        description: &SessionDescription,
        remote: &Participant,
    ) -> Result<(), SignalingError>;

    fn send_answer(
        &self,
        description: &SessionDescription,
        remote: &Participant,
    ) -> Result<(), SignalingError>;

    fn send_ice(&self, candidate: &IceCandidate, remote: &Participant)
    -> Result<(), SignalingError>;
}

/// Relay message between two participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SignalingMessage {
    Offer {
        from: Participant,
        to: String,
        description: SessionDescription,
    },
    Answer {
        from: Participant,
        to: String,
        description: SessionDescription,
    },
    Ice {
        from: Participant,
        to: String,
        candidate: IceCandidate,
    },
}

impl SignalingMessage {
    pub fn sender(&self) -> &Participant {
        match self {
            Self::Offer { from, .. } | Self::Answer { from, .. } | Self::Ice { from, .. } => from,
        }
    }

    pub fn recipient(&self) -> &str {
        match self {
            Self::Offer { to, .. } | Self::Answer { to, .. } | Self::Ice { to, .. } => to,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Pushes every message into a tokio channel, tagged with the local sender.
#[derive(Debug, Clone)]
pub struct ChannelSignaling {
    local: Participant,
    tx: mpsc::UnboundedSender<SignalingMessage>,
}

impl ChannelSignaling {
    pub fn new(local: Participant) -> (Self, mpsc::UnboundedReceiver<SignalingMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { local, tx }, rx)
    }

    fn push(&self, message: SignalingMessage) -> Result<(), SignalingError> {
        self.tx.send(message).map_err(|_| SignalingError::Closed)
    }
}

impl Signaling for ChannelSignaling {
    fn send_offer(
        &self,
        description: &SessionDescription,
        remote: &Participant,
    ) -> Result<(), SignalingError> {
        self.push(SignalingMessage::Offer {
            from: self.local.clone(),
            to: remote.id.clone(),
            description: description.clone(),
        })
    }

    fn send_answer(
        &self,
        description: &SessionDescription,
        remote: &Participant,
    ) -> Result<(), SignalingError> {
        self.push(SignalingMessage::Answer {
            from: self.local.clone(),
            to: remote.id.clone(),
            description: description.clone(),
        })
    }

    fn send_ice(
        &self,
        candidate: &IceCandidate,
        remote: &Participant,
    ) -> Result<(), SignalingError> {
        self.push(SignalingMessage::Ice {
            from: self.local.clone(),
            to: remote.id.clone(),
            candidate: candidate.clone(),
        })
    }
}
