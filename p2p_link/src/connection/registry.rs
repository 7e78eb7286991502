//! All peer links of one session, keyed by remote participant id.
//!
//! The registry fans local actions (media, offers, files) out to every link
//! and routes inbound negotiation messages to the link of their sender. The
//! map is only changed by `add_participant`, `remove_participant` and
//! `close_all`; everything else borrows one link at a time.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::peer_link::PeerLink;
use super::transport::{
    IceCandidate, MediaSource, OfferOptions, SessionDescription, TransportEvent, TransportFactory,
};
use crate::Participant;
use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::events::EventBus;
use crate::signaling::{Signaling, SignalingMessage};
use crate::transfer::{FileInput, TransferFile};

/// Failures collected from a fan-out, keyed by remote participant id.
pub type LinkFailures = Vec<(String, LinkError)>;

pub struct ConnectionRegistry {
    session_id: String,
    local: Participant,
    config: LinkConfig,
    factory: Arc<dyn TransportFactory>,
    signaling: Arc<dyn Signaling>,
    events: Arc<EventBus>,
    links: HashMap<String, PeerLink>,
    local_media: Option<MediaSource>,
    file_inputs: Vec<FileInput>,
    /// Options of the last broadcast offer, replayed for late joiners.
    standing_offer: Option<OfferOptions>,
}

impl ConnectionRegistry {
    pub fn new(
        local: Participant,
        config: LinkConfig,
        factory: Arc<dyn TransportFactory>,
        signaling: Arc<dyn Signaling>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            local,
            config,
            factory,
            signaling,
            events: Arc::new(EventBus::new()),
            links: HashMap::new(),
            local_media: None,
            file_inputs: Vec::new(),
            standing_offer: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn local(&self) -> &Participant {
        &self.local
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn link(&self, remote_id: &str) -> Option<&PeerLink> {
        self.links.get(remote_id)
    }

    pub fn link_mut(&mut self, remote_id: &str) -> Option<&mut PeerLink> {
        self.links.get_mut(remote_id)
    }

    pub fn participants(&self) -> Vec<&Participant> {
        self.links.values().map(PeerLink::remote).collect()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn standing_offer(&self) -> Option<&OfferOptions> {
        self.standing_offer.as_ref()
    }

    /// Creates the link to `remote`.
    ///
    /// The new link gets the registered media source and file inputs, and is
    /// offered to right away if an offer was already broadcast to the session.
    pub fn add_participant(&mut self, remote: Participant) -> Result<()> {
        if remote.id == self.local.id {
            return Err(LinkError::SelfConnection(remote.id));
        }
        if self.links.contains_key(&remote.id) {
            return Err(LinkError::DuplicateParticipant(remote.id));
        }

        let transport = self
            .factory
            .create(&self.local, &remote)
            .map_err(LinkError::Transport)?;
        let mut link = PeerLink::new(
            self.local.clone(),
            remote.clone(),
            transport,
            self.signaling.clone(),
            self.events.clone(),
            &self.config,
        )?;

        if let Some(media) = &self.local_media {
            link.add_local_media_source(media)?;
        }
        for input in &self.file_inputs {
            link.attach_file_input(input.clone());
        }

        info!(
            event = "participant_added",
            session = %self.session_id,
            remote = %remote.id,
            "{} joined the session",
            remote.name
        );
        let standing = self.standing_offer.clone();
        let link = self.links.entry(remote.id).or_insert(link);
        if let Some(options) = standing {
            link.create_offer(&options)?;
        }
        Ok(())
    }

    pub fn remove_participant(&mut self, remote_id: &str) -> Result<()> {
        let mut link = self
            .links
            .remove(remote_id)
            .ok_or_else(|| LinkError::LinkNotFound(remote_id.to_string()))?;
        info!(event = "participant_removed", session = %self.session_id, remote = remote_id);
        link.close()
    }

    /// Offers to every link and remembers `options` for later joiners.
    /// Per-link failures are returned, not raised.
    pub fn broadcast_offer(&mut self, options: OfferOptions) -> LinkFailures {
        let failures = self.fan_out(|link| link.create_offer(&options).map(|_| ()));
        self.standing_offer = Some(options);
        failures
    }

    /// Applies `f` to the link of `remote_id` only.
    pub fn route_to_link<T, F>(&mut self, remote_id: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut PeerLink) -> Result<T>,
    {
        let link = self
            .links
            .get_mut(remote_id)
            .ok_or_else(|| LinkError::LinkNotFound(remote_id.to_string()))?;
        f(link)
    }

    pub fn set_remote_description(
        &mut self,
        remote_id: &str,
        description: SessionDescription,
    ) -> Result<()> {
        self.route_to_link(remote_id, |link| link.set_remote_description(description))
    }

    pub fn add_ice_candidate(&mut self, remote_id: &str, candidate: &IceCandidate) -> Result<()> {
        self.route_to_link(remote_id, |link| link.add_ice_candidate(candidate))
    }

    pub fn handle_transport_event(&mut self, remote_id: &str, event: TransportEvent) -> Result<()> {
        self.route_to_link(remote_id, |link| link.handle_transport_event(event))
    }

    /// Routes an inbound relay message to the link of its sender.
    pub fn handle_signal(&mut self, message: SignalingMessage) -> Result<()> {
        if message.recipient() != self.local.id {
            return Err(LinkError::MisaddressedSignal {
                to: message.recipient().to_string(),
            });
        }
        debug!(
            event = "signal_received",
            session = %self.session_id,
            from = %message.sender().id,
        );
        match message {
            SignalingMessage::Offer {
                from, description, ..
            }
            | SignalingMessage::Answer {
                from, description, ..
            } => self.set_remote_description(&from.id, description),
            SignalingMessage::Ice {
                from, candidate, ..
            } => self.add_ice_candidate(&from.id, &candidate),
        }
    }

    /// Drains every link's transport.
    pub fn poll_transports(&mut self) -> LinkFailures {
        let mut failures = Vec::new();
        for (remote_id, link) in self.links.iter_mut() {
            for error in link.poll_transport() {
                failures.push((remote_id.clone(), error));
            }
        }
        failures
    }

    /// Registers the local media source and attaches it to every link.
    pub fn add_local_media_source(&mut self, source: MediaSource) -> LinkFailures {
        let failures = self.fan_out(|link| link.add_local_media_source(&source).map(|_| ()));
        self.local_media = Some(source);
        failures
    }

    pub fn add_file_input(&mut self, input: FileInput) -> Result<()> {
        if self.file_inputs.iter().any(|known| known.id() == input.id()) {
            return Err(LinkError::FileInputAlreadyExists(input.id().to_string()));
        }
        for link in self.links.values_mut() {
            link.attach_file_input(input.clone());
        }
        self.file_inputs.push(input);
        Ok(())
    }

    /// Called when the selection of a registered input changed. Sends the
    /// selection to every link when auto sending is on.
    pub fn notify_files_chosen(&mut self, input_id: &str) -> Result<LinkFailures> {
        let input = self
            .file_inputs
            .iter()
            .find(|input| input.id() == input_id)
            .cloned()
            .ok_or_else(|| LinkError::FileInputNotFound(input_id.to_string()))?;

        if !self.config.files.enabled || !self.config.files.auto_sending {
            debug!(event = "auto_send_skipped", input = input_id);
            return Ok(Vec::new());
        }
        let files = input.selected();
        Ok(self.fan_out(|link| link.send_files(Some(files.clone())).map(|_| ())))
    }

    /// Sends `files` to every link.
    pub fn send_files(&mut self, files: Vec<TransferFile>) -> LinkFailures {
        self.fan_out(|link| link.send_files(Some(files.clone())).map(|_| ()))
    }

    pub fn send_files_to(&mut self, remote_id: &str, files: Vec<TransferFile>) -> Result<Vec<String>> {
        self.route_to_link(remote_id, |link| link.send_files(Some(files)))
    }

    /// Closes and drops every link. Never fails as a whole.
    pub fn close_all(&mut self) -> LinkFailures {
        let mut failures = Vec::new();
        for (remote_id, mut link) in self.links.drain() {
            if let Err(e) = link.close() {
                warn!(event = "link_close_failed", remote = %remote_id, error = %e);
                failures.push((remote_id, e));
            }
        }
        info!(event = "session_closed", session = %self.session_id);
        failures
    }

    fn fan_out<F>(&mut self, mut f: F) -> LinkFailures
    where
        F: FnMut(&mut PeerLink) -> Result<()>,
    {
        let mut failures = Vec::new();
        for (remote_id, link) in self.links.iter_mut() {
            if let Err(e) = f(link) {
                debug!(event = "fan_out_failure", remote = %remote_id, error = %e);
                failures.push((remote_id.clone(), e));
            }
        }
        failures
    }
}

impl Drop for ConnectionRegistry {
    fn drop(&mut self) {
        if !self.links.is_empty() {
            self.close_all();
        }
    }
}
