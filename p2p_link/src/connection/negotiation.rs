//! Offer/answer state machine for one peer link.
//!
//! Whether a link should (re)negotiate depends on three inputs at once: the
//! negotiation state, the transport connectivity and the set of local changes
//! not yet carried by an offer. [`Negotiation::decide`] takes all of them
//! together so the table below stays exhaustive:
//!
//! | trigger          | first round, media pending | connected, work pending | otherwise |
//! |------------------|----------------------------|-------------------------|-----------|
//! | channel opened   | offer                      | offer                   | wait      |
//! | media attached   | wait                       | offer                   | wait      |
//! | connectivity     | wait                       | offer                   | wait      |
//! | reached stable   | wait                       | offer                   | wait      |
//!
//! No trigger offers while an offer or answer is outstanding; the pending work
//! stays queued and is looked at again once the link reaches `Stable`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::transport::ConnectivityState;
use crate::error::{LinkError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NegotiationState {
    Idle,
    OfferPending,
    AnswerPending,
    Stable,
    Closed,
}

/// Local changes waiting to be carried by the next offer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PendingWork {
    MediaAdded,
    ChannelOpened(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    MediaAttached,
    ChannelOpened,
    Connectivity,
    ReachedStable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Offer,
    Wait,
}

#[derive(Debug, Clone)]
pub struct Negotiation {
    state: NegotiationState,
    pending: BTreeSet<PendingWork>,
    connectivity: ConnectivityState,
    completed_rounds: u32,
    has_local_description: bool,
    answer_rollback: Option<NegotiationState>,
}

impl Default for Negotiation {
    fn default() -> Self {
        Self::new()
    }
}

impl Negotiation {
    pub fn new() -> Self {
        Self {
            state: NegotiationState::Idle,
            pending: BTreeSet::new(),
            connectivity: ConnectivityState::New,
            completed_rounds: 0,
            has_local_description: false,
            answer_rollback: None,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.connectivity
    }

    pub fn pending(&self) -> &BTreeSet<PendingWork> {
        &self.pending
    }

    pub fn completed_rounds(&self) -> u32 {
        self.completed_rounds
    }

    pub fn is_first_round(&self) -> bool {
        self.completed_rounds == 0
    }

    pub fn mark(&mut self, work: PendingWork) {
        self.pending.insert(work);
    }

    pub fn set_connectivity(&mut self, connectivity: ConnectivityState) {
        self.connectivity = connectivity;
    }

    /// Checks whether an explicit offer may be created right now.
    ///
    /// A repeated offer with nothing new to carry is reported as such, even
    /// while the previous one is still waiting for its answer.
    pub fn check_offer(&self) -> Result<()> {
        if self.state == NegotiationState::Closed {
            return Err(LinkError::LinkClosed(String::new()));
        }
        if self.pending.is_empty() && self.has_local_description {
            return Err(LinkError::OfferAlreadyCurrent);
        }
        match self.state {
            NegotiationState::Idle | NegotiationState::Stable => Ok(()),
            other => Err(LinkError::NegotiationInProgress(other)),
        }
    }

    /// The offer was generated and installed locally; it consumes all pending work.
    pub fn offer_installed(&mut self) {
        self.state = NegotiationState::OfferPending;
        self.has_local_description = true;
        self.pending.clear();
    }

    /// Checks that a remote description of the given kind is acceptable now.
    pub fn check_remote(&self, is_offer: bool) -> Result<()> {
        match (self.state, is_offer) {
            (NegotiationState::Closed, _) => Err(LinkError::LinkClosed(String::new())),
            (NegotiationState::AnswerPending, _) => {
                Err(LinkError::NegotiationInProgress(NegotiationState::AnswerPending))
            }
            (NegotiationState::OfferPending, true) => Err(LinkError::RemoteDescription(
                "remote offer received while a local offer is pending".to_string(),
            )),
            (NegotiationState::Idle | NegotiationState::Stable, false) => {
                Err(LinkError::RemoteDescription(
                    "remote answer received without a pending local offer".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }

    /// A remote offer was applied; an answer is being produced.
    pub fn begin_answer(&mut self) {
        self.answer_rollback = Some(self.state);
        self.state = NegotiationState::AnswerPending;
    }

    /// Answer generation failed; return to the state held before the remote offer.
    pub fn abort_answer(&mut self) {
        if let Some(previous) = self.answer_rollback.take() {
            self.state = previous;
        }
    }

    pub fn answer_installed(&mut self) {
        self.answer_rollback = None;
        self.has_local_description = true;
        self.reach_stable();
    }

    pub fn remote_answer_applied(&mut self) {
        self.reach_stable();
    }

    fn reach_stable(&mut self) {
        self.state = NegotiationState::Stable;
        self.completed_rounds += 1;
    }

    pub fn close(&mut self) {
        self.state = NegotiationState::Closed;
        self.pending.clear();
    }

    pub fn decide(&self, trigger: Trigger) -> Decision {
        if !matches!(
            self.state,
            NegotiationState::Idle | NegotiationState::Stable
        ) || self.pending.is_empty()
        {
            return Decision::Wait;
        }

        let media_pending = self.pending.contains(&PendingWork::MediaAdded);
        if trigger == Trigger::ChannelOpened && self.is_first_round() && media_pending {
            return Decision::Offer;
        }
        if self.connectivity.is_connected() {
            return Decision::Offer;
        }
        Decision::Wait
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(label: &str) -> PendingWork {
        PendingWork::ChannelOpened(label.to_string())
    }

    #[test]
    fn test_idle_without_work_waits() {
        let negotiation = Negotiation::new();
        for trigger in [
            Trigger::MediaAttached,
            Trigger::ChannelOpened,
            Trigger::Connectivity,
            Trigger::ReachedStable,
        ] {
            assert_eq!(negotiation.decide(trigger), Decision::Wait);
        }
    }

    #[test]
    fn test_first_round_channel_with_media_offers() {
        let mut negotiation = Negotiation::new();
        negotiation.mark(PendingWork::MediaAdded);
        assert_eq!(negotiation.decide(Trigger::MediaAttached), Decision::Wait);

        negotiation.mark(channel("a"));
        assert_eq!(negotiation.decide(Trigger::ChannelOpened), Decision::Offer);
    }

    #[test]
    fn test_channel_without_connectivity_waits() {
        let mut negotiation = Negotiation::new();
        negotiation.mark(channel("a"));
        assert_eq!(negotiation.decide(Trigger::ChannelOpened), Decision::Wait);

        negotiation.set_connectivity(ConnectivityState::Checking);
        assert_eq!(negotiation.decide(Trigger::Connectivity), Decision::Wait);

        negotiation.set_connectivity(ConnectivityState::Connected);
        assert_eq!(negotiation.decide(Trigger::Connectivity), Decision::Offer);
    }

    #[test]
    fn test_offer_clears_pending_work() {
        let mut negotiation = Negotiation::new();
        negotiation.mark(PendingWork::MediaAdded);
        negotiation.mark(channel("a"));
        negotiation.offer_installed();

        assert!(negotiation.pending().is_empty());
        assert_eq!(negotiation.state(), NegotiationState::OfferPending);
    }

    #[test]
    fn test_no_offer_while_outstanding() {
        let mut negotiation = Negotiation::new();
        negotiation.set_connectivity(ConnectivityState::Connected);
        negotiation.offer_installed();
        assert!(matches!(
            negotiation.check_offer(),
            Err(LinkError::OfferAlreadyCurrent)
        ));
        negotiation.mark(channel("late"));

        assert_eq!(negotiation.decide(Trigger::ChannelOpened), Decision::Wait);
        assert!(matches!(
            negotiation.check_offer(),
            Err(LinkError::NegotiationInProgress(NegotiationState::OfferPending))
        ));

        negotiation.remote_answer_applied();
        assert_eq!(negotiation.decide(Trigger::ReachedStable), Decision::Offer);
    }

    #[test]
    fn test_redundant_offer_is_reported() {
        let mut negotiation = Negotiation::new();
        assert!(negotiation.check_offer().is_ok());
        negotiation.offer_installed();
        negotiation.remote_answer_applied();

        assert!(matches!(
            negotiation.check_offer(),
            Err(LinkError::OfferAlreadyCurrent)
        ));

        negotiation.mark(PendingWork::MediaAdded);
        assert!(negotiation.check_offer().is_ok());
    }

    #[test]
    fn test_remote_description_guards() {
        let mut negotiation = Negotiation::new();
        assert!(negotiation.check_remote(true).is_ok());
        assert!(matches!(
            negotiation.check_remote(false),
            Err(LinkError::RemoteDescription(_))
        ));

        negotiation.offer_installed();
        assert!(negotiation.check_remote(false).is_ok());
        assert!(matches!(
            negotiation.check_remote(true),
            Err(LinkError::RemoteDescription(_))
        ));
    }

    #[test]
    fn test_failed_answer_restores_state() {
        let mut negotiation = Negotiation::new();
        negotiation.begin_answer();
        assert_eq!(negotiation.state(), NegotiationState::AnswerPending);
        negotiation.abort_answer();
        assert_eq!(negotiation.state(), NegotiationState::Idle);

        negotiation.begin_answer();
        negotiation.answer_installed();
        assert_eq!(negotiation.state(), NegotiationState::Stable);
        assert_eq!(negotiation.completed_rounds(), 1);
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut negotiation = Negotiation::new();
        negotiation.mark(PendingWork::MediaAdded);
        negotiation.set_connectivity(ConnectivityState::Connected);
        negotiation.close();

        assert_eq!(negotiation.decide(Trigger::Connectivity), Decision::Wait);
        assert!(matches!(
            negotiation.check_offer(),
            Err(LinkError::LinkClosed(_))
        ));
    }
}
