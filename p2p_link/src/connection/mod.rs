//! Peer link negotiation.
//!
//! This module provides:
//! - The transport seam (`PeerTransport`, `DataChannel`) and its value types
//! - The offer/answer state machine of one link
//! - `PeerLink` and the session-wide `ConnectionRegistry`
//! - An in-process loopback transport

pub mod loopback;
pub mod negotiation;
pub mod peer_link;
pub mod registry;
pub mod transport;

// Re-export public API
pub use loopback::{FailPoint, LoopbackHandle, LoopbackNetwork, LoopbackTransport};
pub use negotiation::{NegotiationState, PendingWork};
pub use peer_link::PeerLink;
pub use registry::{ConnectionRegistry, LinkFailures};
pub use transport::{
    ChannelState, ConnectivityState, DataChannel, IceCandidate, MediaSource, MediaTrack,
    OfferOptions, PeerTransport, SdpKind, SessionDescription, TrackKind, TransportEvent,
    TransportFactory,
};
