//! Error types for peer links and file transfers

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::connection::NegotiationState;

/// Failure reported by the underlying peer transport (descriptions, ICE, channels).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("Signaling channel closed")]
    Closed,

    #[error("Signaling rejected message: {0}")]
    Rejected(String),
}

/// Coarse grouping used when an error is reported as an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    Negotiation,
    TransferProtocol,
    Resource,
}

#[derive(Error, Debug)]
pub enum LinkError {
    // Negotiation
    #[error("Cannot open a link to the local participant {0}")]
    SelfConnection(String),

    #[error("Participant {0} already has a link")]
    DuplicateParticipant(String),

    #[error("Offer already created and no fresh work is pending")]
    OfferAlreadyCurrent,

    #[error("Negotiation in progress (state {0:?})")]
    NegotiationInProgress(NegotiationState),

    #[error("Offer creation failed: {0}")]
    OfferCreation(TransportError),

    #[error("Answer creation failed: {0}")]
    AnswerCreation(TransportError),

    #[error("Local description rejected: {0}")]
    LocalDescription(TransportError),

    #[error("Remote description rejected: {0}")]
    RemoteDescription(String),

    #[error("ICE candidate rejected: {0}")]
    IceApplication(TransportError),

    #[error("Media attach failed: {0}")]
    MediaAttach(TransportError),

    #[error("Signal addressed to {to}, not to this participant")]
    MisaddressedSignal { to: String },

    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    // Transfer protocol
    #[error("Chunk belongs to file {found}, session holds {expected}")]
    FileIdentityMismatch { expected: String, found: String },

    #[error("Chunk {0} already received")]
    DuplicateChunk(u64),

    #[error("Chunk {sequence} outside 1..={total}")]
    ChunkOutOfRange { sequence: u64, total: u64 },

    #[error("Chunk {0} missing from completed file")]
    MissingChunk(u64),

    #[error("Chunk {sequence} declares {declared} bytes but carries {actual}")]
    ChunkSizeMismatch {
        sequence: u64,
        declared: u64,
        actual: u64,
    },

    #[error("File declares {expected} bytes but chunks carry {actual}")]
    FileSizeMismatch { expected: u64, actual: u64 },

    #[error("File is not completed yet")]
    FileNotCompleted,

    #[error("Chunk payload is not valid base64: {0}")]
    PayloadDecode(#[from] base64::DecodeError),

    #[error("Malformed chunk envelope: {0}")]
    MalformedEnvelope(#[from] serde_json::Error),

    #[error("Data channel {0} is not open")]
    ChannelNotOpen(String),

    #[error("Empty file rejected: {0}")]
    EmptyFileRejected(String),

    #[error("No files chosen")]
    NoFilesChosen,

    #[error("File transfer is disabled")]
    TransferDisabled,

    #[error("Transfer on channel {0} abandoned before completion")]
    TransferAbandoned(String),

    // Resource
    #[error("No link for participant {0}")]
    LinkNotFound(String),

    #[error("Link to {0} is closed")]
    LinkClosed(String),

    #[error("Data channel {0} not found")]
    ChannelNotFound(String),

    #[error("Data channel {0} already exists")]
    ChannelAlreadyExists(String),

    #[error("Data channel creation failed: {0}")]
    ChannelCreation(TransportError),

    #[error("File input {0} already registered")]
    FileInputAlreadyExists(String),

    #[error("File input {0} not found")]
    FileInputNotFound(String),

    #[error("Transport error: {0}")]
    Transport(TransportError),

    #[error("No async runtime available to pace chunks")]
    RuntimeUnavailable,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    pub fn category(&self) -> ErrorCategory {
        use LinkError::*;
        match self {
            SelfConnection(_)
            | DuplicateParticipant(_)
            | OfferAlreadyCurrent
            | NegotiationInProgress(_)
            | OfferCreation(_)
            | AnswerCreation(_)
            | LocalDescription(_)
            | RemoteDescription(_)
            | IceApplication(_)
            | MediaAttach(_)
            | MisaddressedSignal { .. }
            | Signaling(_) => ErrorCategory::Negotiation,

            FileIdentityMismatch { .. }
            | DuplicateChunk(_)
            | ChunkOutOfRange { .. }
            | MissingChunk(_)
            | ChunkSizeMismatch { .. }
            | FileSizeMismatch { .. }
            | FileNotCompleted
            | PayloadDecode(_)
            | MalformedEnvelope(_)
            | ChannelNotOpen(_)
            | EmptyFileRejected(_)
            | NoFilesChosen
            | TransferDisabled
            | TransferAbandoned(_) => ErrorCategory::TransferProtocol,

            LinkNotFound(_)
            | LinkClosed(_)
            | ChannelNotFound(_)
            | ChannelAlreadyExists(_)
            | ChannelCreation(_)
            | FileInputAlreadyExists(_)
            | FileInputNotFound(_)
            | Transport(_)
            | RuntimeUnavailable
            | Io(_) => ErrorCategory::Resource,
        }
    }

    /// Transient errors are reported but leave the link usable.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LinkError::IceApplication(_)
                | LinkError::RemoteDescription(_)
                | LinkError::AnswerCreation(_)
                | LinkError::OfferAlreadyCurrent
                | LinkError::NegotiationInProgress(_)
                | LinkError::Signaling(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
