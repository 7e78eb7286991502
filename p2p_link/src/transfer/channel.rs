//! File channels of one peer link.
//!
//! Every outbound file gets its own data channel. Chunks are only emitted once
//! that channel reports open, by a paced task that stops as soon as the
//! channel or the link is closed. Every inbound channel is bound to a fresh
//! receiving session and closed from this side once the file is complete.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::envelope::{ChunkEnvelope, FileInfo};
use super::file::TransferFile;
use super::session::{ChunkOutcome, FileTransferSession};
use super::stats::TransferStats;
use super::utils::{format_transfer_speed, readable_size};
use crate::config::FilesConfig;
use crate::connection::transport::{ChannelState, DataChannel};
use crate::error::{LinkError, Result};
use crate::events::{Direction, EventBus, LinkEvent};

struct Outbound {
    channel: Arc<dyn DataChannel>,
    /// Taken when the pump starts.
    file: Option<TransferFile>,
    token: CancellationToken,
    finished: Arc<AtomicBool>,
}

struct Inbound {
    channel: Arc<dyn DataChannel>,
    session: FileTransferSession,
    stats: Option<TransferStats>,
    last_tick: Instant,
}

pub struct TransferChannel {
    remote_id: String,
    config: FilesConfig,
    events: Arc<EventBus>,
    cancel: CancellationToken,
    outbound: HashMap<String, Outbound>,
    inbound: HashMap<String, Inbound>,
}

impl TransferChannel {
    pub fn new(
        remote_id: impl Into<String>,
        config: FilesConfig,
        events: Arc<EventBus>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            remote_id: remote_id.into(),
            config,
            events,
            cancel,
            outbound: HashMap::new(),
            inbound: HashMap::new(),
        }
    }

    /// Validates a batch of files before any channel is opened for it.
    pub fn check_files(&self, files: &[TransferFile]) -> Result<()> {
        if !self.config.enabled {
            return Err(LinkError::TransferDisabled);
        }
        if files.is_empty() {
            return Err(LinkError::NoFilesChosen);
        }
        if !self.config.empty_files {
            if let Some(empty) = files.iter().find(|file| file.is_empty()) {
                return Err(LinkError::EmptyFileRejected(empty.info.name.clone()));
            }
        }
        Ok(())
    }

    pub fn has_channel(&self, label: &str) -> bool {
        self.outbound.contains_key(label) || self.inbound.contains_key(label)
    }

    pub fn outbound_count(&self) -> usize {
        self.outbound.len()
    }

    pub fn inbound_count(&self) -> usize {
        self.inbound.len()
    }

    /// Tracks a freshly created outbound channel. A queued `file` is sent once
    /// the channel opens; a channel without one has nothing to finish.
    pub fn register_outbound(&mut self, channel: Arc<dyn DataChannel>, file: Option<TransferFile>) {
        if let Some(file) = &file {
            debug!(
                event = "outbound_channel_registered",
                remote = %self.remote_id,
                label = channel.label(),
                file = %file.info.name,
                size = %readable_size(file.info.size),
            );
        }
        let label = channel.label().to_string();
        self.outbound.insert(
            label,
            Outbound {
                channel,
                finished: Arc::new(AtomicBool::new(file.is_none())),
                file,
                token: self.cancel.child_token(),
            },
        );
    }

    /// Binds a channel opened by the remote side to a new receiving session.
    pub fn bind_inbound(&mut self, channel: Arc<dyn DataChannel>) {
        debug!(
            event = "inbound_channel_bound",
            remote = %self.remote_id,
            label = channel.label(),
        );
        self.inbound.insert(
            channel.label().to_string(),
            Inbound {
                channel,
                session: FileTransferSession::incoming(),
                stats: None,
                last_tick: Instant::now(),
            },
        );
    }

    pub fn on_channel_opened(&mut self, label: &str) -> Result<()> {
        if self.inbound.contains_key(label) {
            return Ok(());
        }
        let Some(outbound) = self.outbound.get_mut(label) else {
            return Err(LinkError::ChannelNotFound(label.to_string()));
        };
        if outbound.file.is_none() {
            return Ok(());
        }

        // The file stays queued until a runtime can pace it.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            let error = LinkError::RuntimeUnavailable;
            warn!(
                event = "outbound_transfer_stalled",
                remote = %self.remote_id,
                label,
                error = %error,
            );
            self.events.emit(LinkEvent::transfer_error(&self.remote_id, &error));
            return Err(error);
        };
        let Some(file) = outbound.file.take() else {
            return Ok(());
        };
        let pump = ChunkPump {
            remote_id: self.remote_id.clone(),
            channel: outbound.channel.clone(),
            session: FileTransferSession::outgoing(&file, self.config.max_chunk_size),
            events: self.events.clone(),
            latency: Duration::from_millis(self.config.latency_ms),
            token: outbound.token.clone(),
            finished: outbound.finished.clone(),
        };
        runtime.spawn(pump.run());
        Ok(())
    }

    pub fn on_message(&mut self, label: &str, text: &str) -> Result<()> {
        let Some(inbound) = self.inbound.get_mut(label) else {
            return Err(LinkError::ChannelNotFound(label.to_string()));
        };

        let result = ChunkEnvelope::decode(text)
            .and_then(|envelope| inbound.accept(envelope, &self.remote_id, &self.events));

        match result {
            Ok(None) => Ok(()),
            Ok(Some((info, data))) => {
                if let Some(done) = self.inbound.remove(label) {
                    done.channel.close();
                }
                info!(
                    event = "file_received",
                    remote = %self.remote_id,
                    file = %info.name,
                    size = %readable_size(info.size),
                );
                self.events.emit(LinkEvent::TransferFinished {
                    remote_id: self.remote_id.clone(),
                    direction: Direction::Incoming,
                    file_id: info.file_id.clone(),
                });
                self.events.emit(LinkEvent::FileReceived {
                    remote_id: self.remote_id.clone(),
                    info,
                    data,
                });
                Ok(())
            }
            Err(e) => {
                warn!(
                    event = "inbound_transfer_aborted",
                    remote = %self.remote_id,
                    label,
                    error = %e,
                );
                if let Some(aborted) = self.inbound.remove(label) {
                    aborted.channel.close();
                }
                self.events.emit(LinkEvent::transfer_error(&self.remote_id, &e));
                Err(e)
            }
        }
    }

    pub fn on_channel_closed(&mut self, label: &str) {
        if let Some(outbound) = self.outbound.remove(label) {
            outbound.token.cancel();
            if !outbound.finished.load(Ordering::SeqCst) {
                self.report_abandoned(label);
            }
        } else if let Some(inbound) = self.inbound.remove(label) {
            if !inbound.session.is_completed() {
                self.report_abandoned(label);
            }
        }
    }

    pub fn on_channel_error(&mut self, label: &str, detail: &str) {
        warn!(
            event = "data_channel_error",
            remote = %self.remote_id,
            label,
            detail,
        );
        self.events.emit(LinkEvent::TransferError {
            remote_id: self.remote_id.clone(),
            kind: crate::error::ErrorCategory::Resource,
            detail: format!("Data channel {}: {}", label, detail),
        });
    }

    /// Cancels every pump and closes every channel. Incomplete transfers are
    /// abandoned.
    pub fn close(&mut self) {
        self.cancel.cancel();
        let outbound: Vec<(String, Outbound)> = self.outbound.drain().collect();
        for (label, entry) in outbound {
            entry.channel.close();
            if !entry.finished.load(Ordering::SeqCst) {
                self.report_abandoned(&label);
            }
        }
        let inbound: Vec<(String, Inbound)> = self.inbound.drain().collect();
        for (label, entry) in inbound {
            entry.channel.close();
            if !entry.session.is_completed() {
                self.report_abandoned(&label);
            }
        }
    }

    fn report_abandoned(&self, label: &str) {
        let error = LinkError::TransferAbandoned(label.to_string());
        warn!(event = "transfer_abandoned", remote = %self.remote_id, label);
        self.events.emit(LinkEvent::transfer_error(&self.remote_id, &error));
    }
}

impl Inbound {
    /// Stores one chunk and reports progress. Returns the file once complete.
    fn accept(
        &mut self,
        envelope: ChunkEnvelope,
        remote_id: &str,
        events: &EventBus,
    ) -> Result<Option<(FileInfo, Bytes)>> {
        let sequence = envelope.sequence_number;
        let before = self.session.received_bytes();
        let outcome = self.session.add_chunk(envelope)?;
        let bytes = self.session.received_bytes().saturating_sub(before);

        let Some(info) = self.session.info().cloned() else {
            return Err(LinkError::FileNotCompleted);
        };
        let total_chunks = self.session.total_chunks();
        let stats = self.stats.get_or_insert_with(|| {
            events.emit(LinkEvent::TransferStarted {
                remote_id: remote_id.to_string(),
                direction: Direction::Incoming,
                file_id: info.file_id.clone(),
            });
            TransferStats::new(info.size, total_chunks)
        });

        let now = Instant::now();
        stats.update(bytes, now.duration_since(self.last_tick).as_millis() as u64, sequence);
        self.last_tick = now;
        events.emit(LinkEvent::TransferProgress {
            remote_id: remote_id.to_string(),
            direction: Direction::Incoming,
            file_id: info.file_id.clone(),
            stats: *stats,
        });

        match outcome {
            ChunkOutcome::Stored => Ok(None),
            ChunkOutcome::Completed(data) => Ok(Some((info, data))),
        }
    }
}

/// Paced sender for one outbound file.
struct ChunkPump {
    remote_id: String,
    channel: Arc<dyn DataChannel>,
    session: FileTransferSession,
    events: Arc<EventBus>,
    latency: Duration,
    token: CancellationToken,
    finished: Arc<AtomicBool>,
}

impl ChunkPump {
    async fn run(mut self) {
        let Some(info) = self.session.info().cloned() else {
            return;
        };
        let mut stats = TransferStats::new(info.size, self.session.total_chunks());
        let started = Instant::now();
        let mut last_tick = started;

        info!(
            event = "file_sending",
            remote = %self.remote_id,
            file = %info.name,
            size = %readable_size(info.size),
            chunks = self.session.total_chunks(),
        );
        self.events.emit(LinkEvent::TransferStarted {
            remote_id: self.remote_id.clone(),
            direction: Direction::Outgoing,
            file_id: info.file_id.clone(),
        });

        while let Some(envelope) = self.session.next_chunk() {
            if self.token.is_cancelled() {
                debug!(event = "pump_cancelled", label = self.channel.label());
                return;
            }
            if let Err(e) = self.send(&envelope) {
                warn!(
                    event = "chunk_send_failed",
                    remote = %self.remote_id,
                    label = self.channel.label(),
                    sequence = envelope.sequence_number,
                    error = %e,
                );
                self.events.emit(LinkEvent::transfer_error(&self.remote_id, &e));
                return;
            }
            if envelope.is_last() {
                self.finished.store(true, Ordering::SeqCst);
            }

            let now = Instant::now();
            stats.update(
                envelope.chunk_byte_size,
                now.duration_since(last_tick).as_millis() as u64,
                envelope.sequence_number,
            );
            last_tick = now;
            self.events.emit(LinkEvent::TransferProgress {
                remote_id: self.remote_id.clone(),
                direction: Direction::Outgoing,
                file_id: info.file_id.clone(),
                stats,
            });

            if envelope.is_last() {
                break;
            }
            tokio::select! {
                _ = self.token.cancelled() => {
                    debug!(event = "pump_cancelled", label = self.channel.label());
                    return;
                }
                _ = tokio::time::sleep(self.latency) => {}
            }
        }

        info!(
            event = "file_sent",
            remote = %self.remote_id,
            file = %info.name,
            speed = %format_transfer_speed(info.size, started.elapsed().as_secs_f64()),
        );
        self.events.emit(LinkEvent::TransferFinished {
            remote_id: self.remote_id,
            direction: Direction::Outgoing,
            file_id: info.file_id,
        });
    }

    fn send(&self, envelope: &ChunkEnvelope) -> Result<()> {
        let state = self.channel.ready_state();
        if state != ChannelState::Open {
            return Err(LinkError::ChannelNotOpen(self.channel.label().to_string()));
        }
        let text = envelope.encode()?;
        self.channel.send_text(&text).map_err(LinkError::Transport)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::{ErrorCategory, TransportError};

    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<String>>,
        closed: AtomicBool,
    }

    impl DataChannel for RecordingChannel {
        fn label(&self) -> &str {
            "file-1"
        }

        fn ready_state(&self) -> ChannelState {
            if self.closed.load(Ordering::SeqCst) {
                ChannelState::Closed
            } else {
                ChannelState::Open
            }
        }

        fn send_text(&self, text: &str) -> std::result::Result<(), TransportError> {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn channel_with_events() -> (TransferChannel, tokio::sync::mpsc::UnboundedReceiver<LinkEvent>) {
        let events = Arc::new(EventBus::new());
        let receiver = events.subscribe_channel();
        let config = FilesConfig {
            latency_ms: 1,
            ..FilesConfig::default()
        };
        let channel = TransferChannel::new("bob", config, events, CancellationToken::new());
        (channel, receiver)
    }

    fn drain(receiver: &mut tokio::sync::mpsc::UnboundedReceiver<LinkEvent>) -> Vec<LinkEvent> {
        std::iter::from_fn(|| receiver.try_recv().ok()).collect()
    }

    #[test]
    fn test_file_stays_queued_without_runtime() {
        let (mut transfers, mut events) = channel_with_events();
        let data_channel = Arc::new(RecordingChannel::default());
        transfers.register_outbound(
            data_channel.clone(),
            Some(TransferFile::new("a.txt", "text/plain", "hello")),
        );

        assert!(matches!(
            transfers.on_channel_opened("file-1"),
            Err(LinkError::RuntimeUnavailable)
        ));
        assert!(drain(&mut events).iter().any(|event| matches!(
            event,
            LinkEvent::TransferError {
                kind: ErrorCategory::Resource,
                ..
            }
        )));

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            transfers.on_channel_opened("file-1").unwrap();
            for _ in 0..100 {
                if !data_channel.sent.lock().unwrap().is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let sent = data_channel.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let envelope = ChunkEnvelope::decode(&sent[0]).unwrap();
        assert_eq!(envelope.payload_bytes().unwrap().unwrap(), b"hello");
    }

    #[test]
    fn test_inflated_chunk_sizes_abort_without_overflow() {
        let (mut transfers, mut events) = channel_with_events();
        let data_channel = Arc::new(RecordingChannel::default());
        transfers.bind_inbound(data_channel.clone());

        let file = TransferFile::new("big.bin", "", vec![1u8; 10]);
        let mut first = ChunkEnvelope::new(file.info.clone(), 2, 1, &file.data[..5]);
        first.chunk_byte_size = u64::MAX;
        let mut second = ChunkEnvelope::new(file.info.clone(), 2, 2, &file.data[5..]);
        second.chunk_byte_size = u64::MAX;

        assert!(matches!(
            transfers.on_message("file-1", &first.encode().unwrap()),
            Err(LinkError::ChunkSizeMismatch { sequence: 1, .. })
        ));
        assert!(data_channel.closed.load(Ordering::SeqCst));
        assert_eq!(transfers.inbound_count(), 0);
        assert!(matches!(
            transfers.on_message("file-1", &second.encode().unwrap()),
            Err(LinkError::ChannelNotFound(_))
        ));
        assert!(
            !drain(&mut events)
                .iter()
                .any(|event| matches!(event, LinkEvent::TransferProgress { .. }))
        );
    }

    #[test]
    fn test_progress_counts_decoded_bytes() {
        let (mut transfers, mut events) = channel_with_events();
        transfers.bind_inbound(Arc::new(RecordingChannel::default()));

        let file = TransferFile::new("small.bin", "", vec![9u8; 8]);
        let chunk = ChunkEnvelope::new(file.info.clone(), 2, 1, &file.data[..4]);
        transfers.on_message("file-1", &chunk.encode().unwrap()).unwrap();

        let progress: Vec<TransferStats> = drain(&mut events)
            .into_iter()
            .filter_map(|event| match event {
                LinkEvent::TransferProgress { stats, .. } => Some(stats),
                _ => None,
            })
            .collect();
        assert_eq!(progress.len(), 1);
        assert_eq!(progress[0].cumulative_bytes, 4);
        assert_eq!(progress[0].percent, 50);
    }
}
