//! Shared helpers: two registries wired through a loopback network and an
//! in-memory relay.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use p2p_link::connection::LoopbackNetwork;
use p2p_link::{
    ChannelSignaling, ConnectionRegistry, Direction, FileInfo, LinkConfig, LinkError, LinkEvent,
    Participant, SignalingMessage,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn participant(id: &str) -> Participant {
    Participant::new(id, id.to_uppercase())
}

/// Small chunks and almost no pacing so transfers finish quickly.
pub fn fast_config() -> LinkConfig {
    let mut config = LinkConfig::default();
    config.files.latency_ms = 1;
    config.files.max_chunk_size = 1000;
    config
}

pub struct Peer {
    pub me: Participant,
    pub registry: ConnectionRegistry,
    pub signals: UnboundedReceiver<SignalingMessage>,
    pub events: UnboundedReceiver<LinkEvent>,
    pub seen: Vec<LinkEvent>,
    pub failures: Vec<(String, LinkError)>,
}

impl Peer {
    pub fn new(network: &Arc<LoopbackNetwork>, id: &str, config: LinkConfig) -> Self {
        let me = participant(id);
        let (signaling, signals) = ChannelSignaling::new(me.clone());
        let registry =
            ConnectionRegistry::new(me.clone(), config, network.clone(), Arc::new(signaling));
        let events = registry.events().subscribe_channel();
        Self {
            me,
            registry,
            signals,
            events,
            seen: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn collect(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.seen.push(event);
        }
    }

    pub fn received_files(&self) -> Vec<(FileInfo, Bytes)> {
        self.seen
            .iter()
            .filter_map(|event| match event {
                LinkEvent::FileReceived { info, data, .. } => Some((info.clone(), data.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn finished(&self, direction: Direction) -> Vec<String> {
        self.seen
            .iter()
            .filter_map(|event| match event {
                LinkEvent::TransferFinished {
                    direction: d,
                    file_id,
                    ..
                } if *d == direction => Some(file_id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn transfer_errors(&self) -> Vec<String> {
        self.seen
            .iter()
            .filter_map(|event| match event {
                LinkEvent::TransferError { detail, .. } => Some(detail.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count<F: Fn(&LinkEvent) -> bool>(&self, predicate: F) -> usize {
        self.seen.iter().filter(|event| predicate(event)).count()
    }
}

fn relay(
    signals: &mut UnboundedReceiver<SignalingMessage>,
    to: &mut ConnectionRegistry,
    failures: &mut Vec<(String, LinkError)>,
) {
    while let Ok(message) = signals.try_recv() {
        let from = message.sender().id.clone();
        if let Err(e) = to.handle_signal(message) {
            failures.push((from, e));
        }
    }
}

/// One round: deliver pending signals both ways, then drain both transports.
pub fn exchange(a: &mut Peer, b: &mut Peer) {
    relay(&mut a.signals, &mut b.registry, &mut b.failures);
    relay(&mut b.signals, &mut a.registry, &mut a.failures);
    a.failures.extend(a.registry.poll_transports());
    b.failures.extend(b.registry.poll_transports());
    a.collect();
    b.collect();
}

/// Runs rounds until `done` holds. Returns false on timeout.
pub async fn run_until<F>(a: &mut Peer, b: &mut Peer, done: F) -> bool
where
    F: Fn(&Peer, &Peer) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        exchange(a, b);
        if done(a, b) {
            return true;
        }
        if Instant::now() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Two peers that know each other, negotiated up to a connected, stable link.
pub async fn connected_pair(config: LinkConfig) -> (Peer, Peer) {
    connected_pair_on(&Arc::new(LoopbackNetwork::new()), config).await
}

pub async fn connected_pair_on(network: &Arc<LoopbackNetwork>, config: LinkConfig) -> (Peer, Peer) {
    init_tracing();
    let mut alice = Peer::new(network, "alice", config.clone());
    let mut bob = Peer::new(network, "bob", config);

    alice.registry.add_participant(bob.me.clone()).unwrap();
    bob.registry.add_participant(alice.me.clone()).unwrap();
    let options = alice.registry.config().offer_options.clone();
    assert!(alice.registry.broadcast_offer(options).is_empty());

    let connected = run_until(&mut alice, &mut bob, |a, b| {
        let a_link = a.registry.link("bob").unwrap();
        let b_link = b.registry.link("alice").unwrap();
        a_link.connectivity().is_connected()
            && b_link.connectivity().is_connected()
            && a_link.state() == p2p_link::NegotiationState::Stable
            && b_link.state() == p2p_link::NegotiationState::Stable
    })
    .await;
    assert!(connected, "loopback pair never connected");
    (alice, bob)
}

pub fn patterned(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i * 7 % 256) as u8).collect()
}
