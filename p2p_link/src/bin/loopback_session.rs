//! Standalone demo: two participants in one process, negotiated over an
//! in-memory relay, transferring one file.
//!
//! Run with: cargo run --bin loopback_session -- [path/to/file]
//!
//! Without a path a small generated file is sent. Set RUST_LOG=debug to see
//! every negotiation step.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use p2p_link::connection::LoopbackNetwork;
use p2p_link::transfer::utils::readable_size;
use p2p_link::{
    ChannelSignaling, ConnectionRegistry, LinkConfig, LinkEvent, Participant, SignalingMessage,
    TransferFile,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

const SESSION_TIMEOUT: Duration = Duration::from_secs(60);

fn relay(signals: &mut UnboundedReceiver<SignalingMessage>, to: &mut ConnectionRegistry) {
    while let Ok(message) = signals.try_recv() {
        if let Err(e) = to.handle_signal(message) {
            tracing::warn!("Signal rejected: {}", e);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let config = LinkConfig::load();
    let network = Arc::new(LoopbackNetwork::new());

    let sender = Participant::local_host();
    let receiver = Participant::new(uuid::Uuid::new_v4().to_string(), "loopback-peer");

    let (sender_signaling, mut to_receiver) = ChannelSignaling::new(sender.clone());
    let (receiver_signaling, mut to_sender) = ChannelSignaling::new(receiver.clone());

    let mut sending = ConnectionRegistry::new(
        sender.clone(),
        config.clone(),
        network.clone(),
        Arc::new(sender_signaling),
    );
    let mut receiving = ConnectionRegistry::new(
        receiver.clone(),
        config.clone(),
        network,
        Arc::new(receiver_signaling),
    );
    let mut received = receiving.events().subscribe_channel();

    sending.add_participant(receiver.clone())?;
    receiving.add_participant(sender.clone())?;
    if let Some((remote, e)) = sending
        .broadcast_offer(config.offer_options.clone())
        .into_iter()
        .next()
    {
        return Err(anyhow!("Offer to {} failed: {}", remote, e));
    }

    let file = match std::env::args().nth(1) {
        Some(path) => TransferFile::from_path(path).await?,
        None => TransferFile::new(
            "hello.txt",
            "text/plain",
            "hello from p2p_link\n".repeat(4096),
        ),
    };
    tracing::info!(
        "Sending {} ({}) from {} to {}",
        file.info.name,
        readable_size(file.info.size),
        sender.name,
        receiver.name
    );
    sending.send_files_to(&receiver.id, vec![file])?;

    let outcome = tokio::time::timeout(SESSION_TIMEOUT, async {
        loop {
            relay(&mut to_receiver, &mut receiving);
            relay(&mut to_sender, &mut sending);
            for (remote, e) in sending.poll_transports().into_iter().chain(receiving.poll_transports()) {
                tracing::warn!("Link {}: {}", remote, e);
            }

            while let Ok(event) = received.try_recv() {
                match event {
                    LinkEvent::TransferProgress { stats, .. } => {
                        tracing::debug!("Progress {}% ({} kbit/s)", stats.percent, stats.current_kbps);
                    }
                    LinkEvent::FileReceived { info, data, .. } => return Ok((info, data)),
                    LinkEvent::TransferError { detail, .. } => return Err(anyhow!(detail)),
                    _ => {}
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    sending.close_all();
    receiving.close_all();

    let (info, data) = outcome.map_err(|_| anyhow!("Transfer timed out"))??;
    tracing::info!(
        "Received {} ({}), {} bytes intact",
        info.name,
        readable_size(info.size),
        data.len()
    );
    Ok(())
}
