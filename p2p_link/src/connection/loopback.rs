//! In-process transport pairing two links without any network.
//!
//! Both ends of a pair share one [`Wire`]. Descriptions are plain strings, a
//! completed offer/answer exchange connects the pair, and channels created
//! since the previous exchange open on both sides. Every operation can be made
//! to fail once through a [`LoopbackHandle`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use super::transport::{
    ChannelInit, ChannelState, ConnectivityState, DataChannel, IceCandidate, MediaSource,
    MediaTrack, OfferOptions, PeerTransport, SdpKind, SessionDescription, TrackKind,
    TransportEvent, TransportFactory,
};
use crate::Participant;
use crate::error::TransportError;

/// Operations that can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    CreateOffer,
    CreateAnswer,
    SetLocalDescription,
    SetRemoteDescription,
    AddIceCandidate,
    AddTrack,
    CreateDataChannel,
}

#[derive(Default)]
struct Side {
    events: VecDeque<TransportEvent>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    tracks: Vec<(String, MediaTrack)>,
    announced_tracks: usize,
    channels: HashMap<String, Arc<LoopbackChannel>>,
    remote_candidates: Vec<IceCandidate>,
    failures: HashSet<FailPoint>,
    offers_created: u32,
    version: u32,
    gathered: bool,
    closed: bool,
}

impl Side {
    fn check(&mut self, point: FailPoint) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::new("transport closed"));
        }
        if self.failures.remove(&point) {
            return Err(TransportError::new(format!("injected failure: {:?}", point)));
        }
        Ok(())
    }
}

#[derive(Default)]
struct Wire {
    sides: [Side; 2],
    connected: bool,
}

impl Wire {
    /// Called once the offerer has applied the answer.
    fn complete_exchange(&mut self) {
        if !self.connected {
            self.connected = true;
            for side in &mut self.sides {
                side.events
                    .push_back(TransportEvent::ConnectivityChanged(ConnectivityState::Checking));
                side.events
                    .push_back(TransportEvent::ConnectivityChanged(ConnectivityState::Connected));
            }
        }

        for from in 0..2 {
            let to = 1 - from;

            let fresh: Vec<(String, MediaTrack)> =
                self.sides[from].tracks[self.sides[from].announced_tracks..].to_vec();
            self.sides[from].announced_tracks = self.sides[from].tracks.len();
            for (source_id, track) in fresh {
                self.sides[to]
                    .events
                    .push_back(TransportEvent::RemoteMediaAdded(MediaSource {
                        id: source_id,
                        tracks: vec![track],
                    }));
            }

            let connecting: Vec<Arc<LoopbackChannel>> = self.sides[from]
                .channels
                .values()
                .filter(|channel| channel.state() == ChannelState::Connecting)
                .cloned()
                .collect();
            for channel in connecting {
                channel.set_state(ChannelState::Open);
                let label = channel.label.clone();
                let mirror = Arc::new(LoopbackChannel {
                    label: label.clone(),
                    side: to,
                    state: Mutex::new(ChannelState::Open),
                    wire: channel.wire.clone(),
                });
                self.sides[to].channels.insert(label.clone(), mirror.clone());
                self.sides[to]
                    .events
                    .push_back(TransportEvent::DataChannelCreated(mirror));
                self.sides[to]
                    .events
                    .push_back(TransportEvent::ChannelOpened(label.clone()));
                self.sides[from]
                    .events
                    .push_back(TransportEvent::ChannelOpened(label));
            }
        }
    }
}

fn lock(wire: &Mutex<Wire>) -> MutexGuard<'_, Wire> {
    wire.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct LoopbackChannel {
    label: String,
    side: usize,
    state: Mutex<ChannelState>,
    wire: Weak<Mutex<Wire>>,
}

impl LoopbackChannel {
    fn state(&self) -> ChannelState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ChannelState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

impl DataChannel for LoopbackChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn ready_state(&self) -> ChannelState {
        self.state()
    }

    fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if self.state() != ChannelState::Open {
            return Err(TransportError::new(format!("channel {} not open", self.label)));
        }
        let wire = self
            .wire
            .upgrade()
            .ok_or_else(|| TransportError::new("peer transport dropped"))?;
        let mut wire = lock(&wire);
        wire.sides[1 - self.side]
            .events
            .push_back(TransportEvent::ChannelMessage {
                label: self.label.clone(),
                text: text.to_string(),
            });
        Ok(())
    }

    fn close(&self) {
        if matches!(self.state(), ChannelState::Closed) {
            return;
        }
        self.set_state(ChannelState::Closed);

        let Some(wire) = self.wire.upgrade() else {
            return;
        };
        let mut wire = lock(&wire);
        if let Some(peer) = wire.sides[1 - self.side].channels.get(&self.label) {
            peer.set_state(ChannelState::Closed);
        }
        for side in &mut wire.sides {
            side.events
                .push_back(TransportEvent::ChannelClosed(self.label.clone()));
        }
    }
}

pub struct LoopbackTransport {
    wire: Arc<Mutex<Wire>>,
    side: usize,
    owner: String,
}

impl LoopbackTransport {
    /// Two transports wired to each other.
    pub fn pair(first: &str, second: &str) -> (Self, Self) {
        let wire = Arc::new(Mutex::new(Wire::default()));
        (
            Self {
                wire: wire.clone(),
                side: 0,
                owner: first.to_string(),
            },
            Self {
                wire,
                side: 1,
                owner: second.to_string(),
            },
        )
    }

    pub fn handle(&self) -> LoopbackHandle {
        LoopbackHandle {
            wire: self.wire.clone(),
            side: self.side,
        }
    }

    fn render_sdp(&self, side: &Side, kind: SdpKind, options: Option<&OfferOptions>) -> String {
        let mut sdp = String::new();
        let _ = write!(
            sdp,
            "v=0\r\no=- {} {} IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n",
            self.owner, side.version
        );
        for (source_id, track) in &side.tracks {
            let media = match track.kind {
                TrackKind::Audio => "audio",
                TrackKind::Video => "video",
            };
            let _ = write!(
                sdp,
                "m={} 9 UDP/TLS/RTP/SAVPF 0\r\na=msid:{} {}\r\na=sendrecv\r\n",
                media, source_id, track.id
            );
        }
        if let Some(options) = options {
            let has = |kind: TrackKind| side.tracks.iter().any(|(_, t)| t.kind == kind);
            if options.offer_to_receive_audio && !has(TrackKind::Audio) {
                sdp.push_str("m=audio 9 UDP/TLS/RTP/SAVPF 0\r\na=recvonly\r\n");
            }
            if options.offer_to_receive_video && !has(TrackKind::Video) {
                sdp.push_str("m=video 9 UDP/TLS/RTP/SAVPF 0\r\na=recvonly\r\n");
            }
        }
        if !side.channels.is_empty() {
            sdp.push_str("m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n");
        }
        if kind == SdpKind::Answer {
            sdp.push_str("a=setup:active\r\n");
        } else {
            sdp.push_str("a=setup:actpass\r\n");
        }
        sdp
    }
}

impl PeerTransport for LoopbackTransport {
    fn create_offer(
        &mut self,
        options: &OfferOptions,
    ) -> Result<SessionDescription, TransportError> {
        let mut wire = lock(&self.wire);
        let side = &mut wire.sides[self.side];
        side.check(FailPoint::CreateOffer)?;
        side.version += 1;
        side.offers_created += 1;
        Ok(SessionDescription::offer(self.render_sdp(
            side,
            SdpKind::Offer,
            Some(options),
        )))
    }

    fn create_answer(&mut self) -> Result<SessionDescription, TransportError> {
        let mut wire = lock(&self.wire);
        let side = &mut wire.sides[self.side];
        side.check(FailPoint::CreateAnswer)?;
        match &side.remote {
            Some(remote) if remote.kind == SdpKind::Offer => {}
            _ => return Err(TransportError::new("no remote offer to answer")),
        }
        side.version += 1;
        Ok(SessionDescription::answer(self.render_sdp(
            side,
            SdpKind::Answer,
            None,
        )))
    }

    fn set_local_description(
        &mut self,
        description: &SessionDescription,
    ) -> Result<(), TransportError> {
        let mut wire = lock(&self.wire);
        let side = &mut wire.sides[self.side];
        side.check(FailPoint::SetLocalDescription)?;
        if description.is_empty() {
            return Err(TransportError::new("empty local description"));
        }
        side.local = Some(description.clone());
        if !side.gathered {
            side.gathered = true;
            side.events
                .push_back(TransportEvent::IceCandidateGathered(IceCandidate {
                    candidate: format!(
                        "candidate:{} 1 udp 2122260223 127.0.0.1 {} typ host",
                        self.side + 1,
                        50000 + self.side
                    ),
                    sdp_mid: Some("0".to_string()),
                    sdp_m_line_index: Some(0),
                }));
        }
        Ok(())
    }

    fn set_remote_description(
        &mut self,
        description: &SessionDescription,
    ) -> Result<(), TransportError> {
        let mut wire = lock(&self.wire);
        let side = &mut wire.sides[self.side];
        side.check(FailPoint::SetRemoteDescription)?;
        if !description.sdp.starts_with("v=0") {
            return Err(TransportError::new("malformed session description"));
        }
        side.remote = Some(description.clone());
        if description.kind == SdpKind::Answer {
            wire.complete_exchange();
        }
        Ok(())
    }

    fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<(), TransportError> {
        let mut wire = lock(&self.wire);
        let side = &mut wire.sides[self.side];
        side.check(FailPoint::AddIceCandidate)?;
        if side.remote.is_none() {
            return Err(TransportError::new("remote description not set"));
        }
        side.remote_candidates.push(candidate.clone());
        Ok(())
    }

    fn add_track(&mut self, track: &MediaTrack, source_id: &str) -> Result<(), TransportError> {
        let mut wire = lock(&self.wire);
        let side = &mut wire.sides[self.side];
        side.check(FailPoint::AddTrack)?;
        side.tracks.push((source_id.to_string(), track.clone()));
        Ok(())
    }

    fn create_data_channel(
        &mut self,
        label: &str,
        _init: ChannelInit,
    ) -> Result<Arc<dyn DataChannel>, TransportError> {
        let mut wire = lock(&self.wire);
        let side = &mut wire.sides[self.side];
        side.check(FailPoint::CreateDataChannel)?;
        if side.channels.contains_key(label) {
            return Err(TransportError::new(format!("channel {} exists", label)));
        }
        let channel = Arc::new(LoopbackChannel {
            label: label.to_string(),
            side: self.side,
            state: Mutex::new(ChannelState::Connecting),
            wire: Arc::downgrade(&self.wire),
        });
        side.channels.insert(label.to_string(), channel.clone());
        Ok(channel)
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        lock(&self.wire).sides[self.side].events.pop_front()
    }

    fn close(&mut self) -> Result<(), TransportError> {
        let mut wire = lock(&self.wire);
        let other = 1 - self.side;
        if wire.sides[self.side].closed {
            return Ok(());
        }
        wire.sides[self.side].closed = true;
        wire.sides[self.side].events.clear();

        let labels: Vec<String> = wire.sides[self.side].channels.keys().cloned().collect();
        for label in labels {
            if let Some(channel) = wire.sides[self.side].channels.get(&label) {
                channel.set_state(ChannelState::Closed);
            }
            let notify = match wire.sides[other].channels.get(&label) {
                Some(peer) if peer.state() != ChannelState::Closed => {
                    peer.set_state(ChannelState::Closed);
                    true
                }
                _ => false,
            };
            if notify {
                wire.sides[other]
                    .events
                    .push_back(TransportEvent::ChannelClosed(label));
            }
        }
        wire.sides[other]
            .events
            .push_back(TransportEvent::ConnectivityChanged(
                ConnectivityState::Disconnected,
            ));
        Ok(())
    }
}

/// Test-side view of one end of a loopback pair.
#[derive(Clone)]
pub struct LoopbackHandle {
    wire: Arc<Mutex<Wire>>,
    side: usize,
}

impl LoopbackHandle {
    pub fn fail_next(&self, point: FailPoint) {
        lock(&self.wire).sides[self.side].failures.insert(point);
    }

    /// Queues an event as if the transport had produced it.
    pub fn push_event(&self, event: TransportEvent) {
        lock(&self.wire).sides[self.side].events.push_back(event);
    }

    pub fn offers_created(&self) -> u32 {
        lock(&self.wire).sides[self.side].offers_created
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        lock(&self.wire).sides[self.side].local.clone()
    }

    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        lock(&self.wire).sides[self.side].remote_candidates.clone()
    }

    pub fn track_count(&self) -> usize {
        lock(&self.wire).sides[self.side].tracks.len()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.wire).connected
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.wire).sides[self.side].closed
    }
}

/// Hands out paired loopback transports, keyed by the two participant ids.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    wires: Arc<Mutex<HashMap<(String, String), Arc<Mutex<Wire>>>>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(local: &str, remote: &str) -> ((String, String), usize) {
        if local <= remote {
            ((local.to_string(), remote.to_string()), 0)
        } else {
            ((remote.to_string(), local.to_string()), 1)
        }
    }

    fn wire(&self, local: &str, remote: &str) -> (Arc<Mutex<Wire>>, usize) {
        let (key, side) = Self::key(local, remote);
        let mut wires = self.wires.lock().unwrap_or_else(|e| e.into_inner());
        let wire = wires.entry(key).or_default().clone();
        (wire, side)
    }

    /// The end of the `local`–`remote` pair owned by `local`.
    pub fn handle(&self, local: &str, remote: &str) -> LoopbackHandle {
        let (wire, side) = self.wire(local, remote);
        LoopbackHandle { wire, side }
    }
}

impl TransportFactory for LoopbackNetwork {
    fn create(
        &self,
        local: &Participant,
        remote: &Participant,
    ) -> Result<Box<dyn PeerTransport>, TransportError> {
        let (wire, side) = self.wire(&local.id, &remote.id);
        Ok(Box::new(LoopbackTransport {
            wire,
            side,
            owner: local.id.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(transport: &mut LoopbackTransport) -> Vec<TransportEvent> {
        std::iter::from_fn(|| transport.poll_event()).collect()
    }

    #[test]
    fn test_exchange_connects_and_opens_channels() {
        let (mut alice, mut bob) = LoopbackTransport::pair("alice", "bob");
        let channel = alice
            .create_data_channel("files", ChannelInit { ordered: true })
            .unwrap();
        assert_eq!(channel.ready_state(), ChannelState::Connecting);

        let offer = alice.create_offer(&OfferOptions::default()).unwrap();
        alice.set_local_description(&offer).unwrap();
        bob.set_remote_description(&offer).unwrap();
        let answer = bob.create_answer().unwrap();
        bob.set_local_description(&answer).unwrap();
        alice.set_remote_description(&answer).unwrap();

        assert_eq!(channel.ready_state(), ChannelState::Open);
        assert!(alice.handle().is_connected());

        let bob_events = drain(&mut bob);
        let mirror = bob_events
            .iter()
            .find_map(|event| match event {
                TransportEvent::DataChannelCreated(channel) => Some(channel.clone()),
                _ => None,
            })
            .unwrap();
        channel.send_text("hello").unwrap();
        match bob.poll_event() {
            Some(TransportEvent::ChannelMessage { label, text }) => {
                assert_eq!(label, "files");
                assert_eq!(text, "hello");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        mirror.close();
        assert_eq!(channel.ready_state(), ChannelState::Closed);
        assert!(channel.send_text("late").is_err());
    }

    #[test]
    fn test_injected_failure_fires_once() {
        let (mut alice, _bob) = LoopbackTransport::pair("alice", "bob");
        alice.handle().fail_next(FailPoint::CreateOffer);

        assert!(alice.create_offer(&OfferOptions::default()).is_err());
        assert!(alice.create_offer(&OfferOptions::default()).is_ok());
    }

    #[test]
    fn test_ice_requires_remote_description() {
        let (mut alice, _bob) = LoopbackTransport::pair("alice", "bob");
        let candidate = IceCandidate {
            candidate: "candidate:9 1 udp 1 127.0.0.1 9 typ host".to_string(),
            sdp_mid: None,
            sdp_m_line_index: None,
        };
        assert!(alice.add_ice_candidate(&candidate).is_err());
    }

    #[test]
    fn test_network_pairs_by_participant() {
        let network = LoopbackNetwork::new();
        let alice = Participant::new("alice", "Alice");
        let bob = Participant::new("bob", "Bob");

        let mut from_alice = network.create(&alice, &bob).unwrap();
        let _from_bob = network.create(&bob, &alice).unwrap();
        from_alice
            .add_track(
                &MediaTrack {
                    id: "mic".to_string(),
                    kind: TrackKind::Audio,
                },
                "stream",
            )
            .unwrap();

        assert_eq!(network.handle("alice", "bob").track_count(), 1);
        assert_eq!(network.handle("bob", "alice").track_count(), 0);
    }
}
