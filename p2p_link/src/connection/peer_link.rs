use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::negotiation::{
    Decision, Negotiation, NegotiationState, PendingWork, Trigger,
};
use super::transport::{
    ChannelInit, ConnectivityState, DataChannel, IceCandidate, MediaSource, OfferOptions,
    PeerTransport, SdpKind, SessionDescription, TransportEvent,
};
use crate::Participant;
use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::events::{EventBus, LinkEvent};
use crate::signaling::Signaling;
use crate::transfer::{FileInput, TransferChannel, TransferFile};

/// One negotiated connection between the local participant and a remote one.
///
/// A link is driven entirely by its owner: explicit calls for local actions
/// and inbound signaling, plus [`PeerLink::poll_transport`] for whatever the
/// transport reported since the last call.
pub struct PeerLink {
    local: Participant,
    remote: Participant,
    negotiation: Negotiation,
    transport: Box<dyn PeerTransport>,
    signaling: Arc<dyn Signaling>,
    events: Arc<EventBus>,
    transfers: TransferChannel,
    cancel: CancellationToken,
    offer_options: OfferOptions,
    channel_init: ChannelInit,
    attached_tracks: HashSet<String>,
    file_inputs: Vec<FileInput>,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
}

impl PeerLink {
    pub fn new(
        local: Participant,
        remote: Participant,
        transport: Box<dyn PeerTransport>,
        signaling: Arc<dyn Signaling>,
        events: Arc<EventBus>,
        config: &LinkConfig,
    ) -> Result<Self> {
        if local.id == remote.id {
            return Err(LinkError::SelfConnection(remote.id));
        }

        let cancel = CancellationToken::new();
        let transfers = TransferChannel::new(
            remote.id.clone(),
            config.files.clone(),
            events.clone(),
            cancel.child_token(),
        );
        info!(event = "link_created", remote = %remote.id, "Link created to {}", remote.name);

        Ok(Self {
            local,
            remote,
            negotiation: Negotiation::new(),
            transport,
            signaling,
            events,
            transfers,
            cancel,
            offer_options: config.offer_options.clone(),
            channel_init: ChannelInit {
                ordered: config.files.ordered,
            },
            attached_tracks: HashSet::new(),
            file_inputs: Vec::new(),
            local_description: None,
            remote_description: None,
        })
    }

    pub fn local(&self) -> &Participant {
        &self.local
    }

    pub fn remote(&self) -> &Participant {
        &self.remote
    }

    pub fn state(&self) -> NegotiationState {
        self.negotiation.state()
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.negotiation.connectivity()
    }

    pub fn pending_work(&self) -> &BTreeSet<PendingWork> {
        self.negotiation.pending()
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    pub fn transfers(&self) -> &TransferChannel {
        &self.transfers
    }

    pub fn is_closed(&self) -> bool {
        self.negotiation.state() == NegotiationState::Closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(LinkError::LinkClosed(self.remote.id.clone()));
        }
        Ok(())
    }

    /// Creates, installs and sends a local offer.
    ///
    /// Fails with [`LinkError::OfferAlreadyCurrent`] when an offer was already
    /// made and nothing new has been attached since. The options become the
    /// default for later automatic offers once the offer has been sent.
    pub fn create_offer(&mut self, options: &OfferOptions) -> Result<SessionDescription> {
        self.ensure_open()?;
        self.negotiate(options)
    }

    /// Pending work is only consumed once the offer has left through
    /// signaling. A failed send restores the previous negotiation state.
    fn negotiate(&mut self, options: &OfferOptions) -> Result<SessionDescription> {
        self.negotiation.check_offer()?;

        let offer = self
            .transport
            .create_offer(options)
            .map_err(LinkError::OfferCreation)?;
        self.transport
            .set_local_description(&offer)
            .map_err(LinkError::LocalDescription)?;

        let before = self.negotiation.clone();
        self.negotiation.offer_installed();
        if let Err(e) = self.signaling.send_offer(&offer, &self.remote) {
            warn!(event = "offer_not_sent", remote = %self.remote.id, error = %e);
            self.negotiation = before;
            return Err(e.into());
        }
        self.offer_options = options.clone();
        self.local_description = Some(offer.clone());

        info!(event = "offer_created", remote = %self.remote.id, "Offer created for {}", self.remote.name);
        self.events.emit(LinkEvent::NegotiationOfferCreated {
            remote_id: self.remote.id.clone(),
            description: offer.clone(),
        });
        Ok(offer)
    }

    /// Offers pending work when the negotiation rules allow it. A failure here
    /// is reported as an event; the work stays pending for the next trigger.
    fn evaluate(&mut self, trigger: Trigger) {
        if self.negotiation.decide(trigger) == Decision::Wait {
            return;
        }
        debug!(
            event = "renegotiation_triggered",
            remote = %self.remote.id,
            ?trigger,
            pending = self.negotiation.pending().len(),
        );
        let options = self.offer_options.clone();
        if let Err(e) = self.negotiate(&options) {
            warn!(event = "renegotiation_failed", remote = %self.remote.id, ?trigger, error = %e);
            self.events.emit(LinkEvent::negotiation_failed(&self.remote.id, &e));
        }
    }

    /// Applies a remote description. A remote offer is answered immediately.
    /// On failure the negotiation state is left as it was.
    pub fn set_remote_description(&mut self, description: SessionDescription) -> Result<()> {
        self.ensure_open()?;
        let is_offer = description.kind == SdpKind::Offer;
        self.negotiation.check_remote(is_offer)?;

        self.transport
            .set_remote_description(&description)
            .map_err(|e| {
                warn!(event = "remote_description_rejected", remote = %self.remote.id, error = %e);
                LinkError::RemoteDescription(e.to_string())
            })?;

        if is_offer {
            self.negotiation.begin_answer();
            let answer = match self.transport.create_answer() {
                Ok(answer) => answer,
                Err(e) => {
                    self.negotiation.abort_answer();
                    return Err(LinkError::AnswerCreation(e));
                }
            };
            if let Err(e) = self.transport.set_local_description(&answer) {
                self.negotiation.abort_answer();
                return Err(LinkError::LocalDescription(e));
            }
            self.negotiation.answer_installed();
            self.local_description = Some(answer.clone());
            self.remote_description = Some(description);

            info!(event = "answer_created", remote = %self.remote.id, "Answered offer from {}", self.remote.name);
            self.events.emit(LinkEvent::NegotiationAnswerCreated {
                remote_id: self.remote.id.clone(),
                description: answer.clone(),
            });
            self.signaling.send_answer(&answer, &self.remote)?;
        } else {
            self.negotiation.remote_answer_applied();
            self.remote_description = Some(description);
            info!(event = "negotiation_stable", remote = %self.remote.id, "Negotiation with {} is stable", self.remote.name);
        }

        self.evaluate(Trigger::ReachedStable);
        Ok(())
    }

    pub fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<()> {
        self.ensure_open()?;
        self.transport.add_ice_candidate(candidate).map_err(|e| {
            warn!(event = "ice_candidate_rejected", remote = %self.remote.id, error = %e);
            LinkError::IceApplication(e)
        })
    }

    /// Attaches the tracks of `source` that are not attached yet. Returns how
    /// many tracks were added.
    pub fn add_local_media_source(&mut self, source: &MediaSource) -> Result<usize> {
        self.ensure_open()?;

        let mut added = 0;
        for track in &source.tracks {
            if self.attached_tracks.contains(&track.id) {
                continue;
            }
            self.transport
                .add_track(track, &source.id)
                .map_err(LinkError::MediaAttach)?;
            self.attached_tracks.insert(track.id.clone());
            added += 1;
        }

        if added > 0 {
            self.negotiation.mark(PendingWork::MediaAdded);
            self.events.emit(LinkEvent::LocalMediaAdded {
                remote_id: self.remote.id.clone(),
                source_id: source.id.clone(),
            });
            self.evaluate(Trigger::MediaAttached);
        }
        Ok(added)
    }

    /// Opens an outbound channel that carries no file yet.
    pub fn open_transfer_channel(&mut self, label: &str) -> Result<Arc<dyn DataChannel>> {
        self.ensure_open()?;
        let channel = self.create_channel(label, None)?;
        self.evaluate(Trigger::ChannelOpened);
        Ok(channel)
    }

    fn create_channel(
        &mut self,
        label: &str,
        file: Option<TransferFile>,
    ) -> Result<Arc<dyn DataChannel>> {
        if self.transfers.has_channel(label) {
            return Err(LinkError::ChannelAlreadyExists(label.to_string()));
        }
        let channel = self
            .transport
            .create_data_channel(label, self.channel_init)
            .map_err(LinkError::ChannelCreation)?;
        self.transfers.register_outbound(channel.clone(), file);
        self.negotiation
            .mark(PendingWork::ChannelOpened(label.to_string()));
        Ok(channel)
    }

    pub fn attach_file_input(&mut self, input: FileInput) {
        if self.file_inputs.iter().all(|known| known.id() != input.id()) {
            self.file_inputs.push(input);
        }
    }

    /// Sends each file on its own channel. `None` sends whatever is currently
    /// selected in the attached file inputs. Returns the file ids.
    pub fn send_files(&mut self, files: Option<Vec<TransferFile>>) -> Result<Vec<String>> {
        self.ensure_open()?;
        let files = match files {
            Some(files) => files,
            None => self
                .file_inputs
                .iter()
                .flat_map(|input| input.selected())
                .collect(),
        };
        self.transfers.check_files(&files)?;

        let mut file_ids = Vec::with_capacity(files.len());
        for file in files {
            file_ids.push(file.info.file_id.clone());
            let label = Uuid::new_v4().to_string();
            self.create_channel(&label, Some(file))?;
        }
        self.evaluate(Trigger::ChannelOpened);
        Ok(file_ids)
    }

    pub fn handle_transport_event(&mut self, event: TransportEvent) -> Result<()> {
        self.ensure_open()?;
        match event {
            TransportEvent::IceCandidateGathered(candidate) => {
                self.events.emit(LinkEvent::IceCandidateFound {
                    remote_id: self.remote.id.clone(),
                    candidate: candidate.clone(),
                });
                self.signaling.send_ice(&candidate, &self.remote)?;
                Ok(())
            }
            TransportEvent::ConnectivityChanged(state) => {
                debug!(event = "connectivity_changed", remote = %self.remote.id, ?state);
                self.negotiation.set_connectivity(state);
                self.events.emit(LinkEvent::ConnectivityChanged {
                    remote_id: self.remote.id.clone(),
                    state,
                });
                self.evaluate(Trigger::Connectivity);
                Ok(())
            }
            TransportEvent::RemoteMediaAdded(source) => {
                self.events.emit(LinkEvent::RemoteMediaAdded {
                    remote_id: self.remote.id.clone(),
                    source,
                });
                Ok(())
            }
            TransportEvent::DataChannelCreated(channel) => {
                self.transfers.bind_inbound(channel);
                Ok(())
            }
            TransportEvent::ChannelOpened(label) => self.transfers.on_channel_opened(&label),
            TransportEvent::ChannelMessage { label, text } => {
                self.transfers.on_message(&label, &text)
            }
            TransportEvent::ChannelClosed(label) => {
                self.transfers.on_channel_closed(&label);
                Ok(())
            }
            TransportEvent::ChannelError { label, detail } => {
                self.transfers.on_channel_error(&label, &detail);
                Ok(())
            }
        }
    }

    /// Drains the transport and handles every event. Errors are collected so
    /// one bad event does not hide the rest.
    pub fn poll_transport(&mut self) -> Vec<LinkError> {
        let mut errors = Vec::new();
        while !self.is_closed() {
            let Some(event) = self.transport.poll_event() else {
                break;
            };
            if let Err(e) = self.handle_transport_event(event) {
                errors.push(e);
            }
        }
        errors
    }

    /// Closes the link for good. Calling it again is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.negotiation.close();
        self.cancel.cancel();
        self.transfers.close();
        let result = self.transport.close().map_err(LinkError::Transport);

        info!(event = "link_closed", remote = %self.remote.id, "Link to {} closed", self.remote.name);
        self.events.emit(LinkEvent::LinkClosed {
            remote_id: self.remote.id.clone(),
        });
        result
    }
}

impl Drop for PeerLink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("local", &self.local.id)
            .field("remote", &self.remote.id)
            .field("state", &self.negotiation.state())
            .field("connectivity", &self.negotiation.connectivity())
            .finish()
    }
}
