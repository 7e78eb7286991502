//! Transport seam between the negotiation core and a WebRTC-style stack.
//!
//! The core never performs I/O itself. A [`PeerTransport`] accepts
//! descriptions, candidates, tracks and channel requests synchronously and
//! hands back what happened through [`PeerTransport::poll_event`].

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::Participant;
use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sdp.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default)]
    pub sdp_m_line_index: Option<u16>,
}

/// Negotiation options forwarded to `create_offer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OfferOptions {
    pub offer_to_receive_audio: bool,
    pub offer_to_receive_video: bool,
    pub ice_restart: bool,
}

impl Default for OfferOptions {
    fn default() -> Self {
        Self {
            offer_to_receive_audio: true,
            offer_to_receive_video: true,
            ice_restart: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
}

/// A local or remote media stream: an id plus its tracks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSource {
    pub id: String,
    pub tracks: Vec<MediaTrack>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectivityState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Completed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelInit {
    pub ordered: bool,
}

/// One logical data channel carried by a peer transport.
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    fn ready_state(&self) -> ChannelState;

    fn send_text(&self, text: &str) -> Result<(), TransportError>;

    fn close(&self);
}

impl fmt::Debug for dyn DataChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataChannel")
            .field("label", &self.label())
            .field("state", &self.ready_state())
            .finish()
    }
}

/// What a transport reports back to its owning link.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    IceCandidateGathered(IceCandidate),
    ConnectivityChanged(ConnectivityState),
    RemoteMediaAdded(MediaSource),
    /// The remote side opened a channel towards us.
    DataChannelCreated(Arc<dyn DataChannel>),
    ChannelOpened(String),
    ChannelMessage { label: String, text: String },
    ChannelClosed(String),
    ChannelError { label: String, detail: String },
}

pub trait PeerTransport: Send {
    fn create_offer(&mut self, options: &OfferOptions)
    -> Result<SessionDescription, TransportError>;

    fn create_answer(&mut self) -> Result<SessionDescription, TransportError>;

    fn set_local_description(&mut self, description: &SessionDescription)
    -> Result<(), TransportError>;

    fn set_remote_description(
        &mut self,
        description: &SessionDescription,
    ) -> Result<(), TransportError>;

    fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<(), TransportError>;

    fn add_track(&mut self, track: &MediaTrack, source_id: &str) -> Result<(), TransportError>;

    fn create_data_channel(
        &mut self,
        label: &str,
        init: ChannelInit,
    ) -> Result<Arc<dyn DataChannel>, TransportError>;

    fn poll_event(&mut self) -> Option<TransportEvent>;

    fn close(&mut self) -> Result<(), TransportError>;
}

/// Builds one transport per (local, remote) pair.
pub trait TransportFactory: Send + Sync {
    fn create(
        &self,
        local: &Participant,
        remote: &Participant,
    ) -> Result<Box<dyn PeerTransport>, TransportError>;
}
