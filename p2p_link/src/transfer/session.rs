//! Chunking and reassembly state for a single file.
//!
//! A sending session slices the file into `chunk_count(size, C)` envelopes and
//! hands them out strictly in order. A receiving session accepts envelopes in
//! any order, rejects conflicting identities and repeated sequence numbers,
//! and concatenates chunks `1..=N` once every one of them has arrived.

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};

use super::envelope::{ChunkEnvelope, FileInfo, chunk_count};
use super::file::TransferFile;
use crate::error::{LinkError, Result};
use crate::events::Direction;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    Stored,
    /// The last missing chunk arrived; carries the reassembled file.
    Completed(Bytes),
}

#[derive(Debug)]
pub struct FileTransferSession {
    direction: Direction,
    info: Option<FileInfo>,
    total_chunks: u64,
    processed: u64,
    completed: bool,
    /// Receiving side only. `None` marks a chunk that arrived without payload.
    chunks: BTreeMap<u64, Option<Bytes>>,
    received_bytes: u64,
    binary: Option<Bytes>,
    /// Sending side only.
    source: Bytes,
    chunk_size: usize,
}

impl FileTransferSession {
    pub fn outgoing(file: &TransferFile, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            direction: Direction::Outgoing,
            total_chunks: chunk_count(file.data.len() as u64, chunk_size),
            info: Some(file.info.clone()),
            processed: 0,
            completed: false,
            chunks: BTreeMap::new(),
            received_bytes: 0,
            binary: None,
            source: file.data.clone(),
            chunk_size,
        }
    }

    pub fn incoming() -> Self {
        Self {
            direction: Direction::Incoming,
            info: None,
            total_chunks: 0,
            processed: 0,
            completed: false,
            chunks: BTreeMap::new(),
            received_bytes: 0,
            binary: None,
            source: Bytes::new(),
            chunk_size: 0,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn info(&self) -> Option<&FileInfo> {
        self.info.as_ref()
    }

    pub fn file_id(&self) -> Option<&str> {
        self.info.as_ref().map(|info| info.file_id.as_str())
    }

    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    /// Chunks produced (sending) or stored (receiving) so far.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Next envelope to send, or `None` once all chunks have been produced.
    pub fn next_chunk(&mut self) -> Option<ChunkEnvelope> {
        if self.direction != Direction::Outgoing || self.processed >= self.total_chunks {
            return None;
        }
        let info = self.info.clone()?;

        let start = (self.processed as usize) * self.chunk_size;
        let end = (start + self.chunk_size).min(self.source.len());
        let slice = self.source.slice(start.min(end)..end);

        self.processed += 1;
        let envelope = ChunkEnvelope::new(info, self.total_chunks, self.processed, &slice);
        if self.processed == self.total_chunks {
            self.completed = true;
        }
        Some(envelope)
    }

    /// Stores one inbound chunk.
    ///
    /// The payload is decoded on arrival and must match the envelope's
    /// `chunk_byte_size`; the bytes received so far never exceed the declared
    /// file size. Completion is reported exactly once, by the call that stores
    /// the last missing sequence number.
    pub fn add_chunk(&mut self, envelope: ChunkEnvelope) -> Result<ChunkOutcome> {
        match &self.info {
            None => {
                self.info = Some(envelope.file_info.clone());
                self.total_chunks = envelope.total_chunks;
            }
            Some(info) => {
                if *info != envelope.file_info || self.total_chunks != envelope.total_chunks {
                    return Err(LinkError::FileIdentityMismatch {
                        expected: info.file_id.clone(),
                        found: envelope.file_info.file_id,
                    });
                }
            }
        }

        let sequence = envelope.sequence_number;
        if sequence == 0 || sequence > self.total_chunks {
            return Err(LinkError::ChunkOutOfRange {
                sequence,
                total: self.total_chunks,
            });
        }
        if self.chunks.contains_key(&sequence) {
            return Err(LinkError::DuplicateChunk(sequence));
        }

        let data = envelope.payload_bytes()?.map(Bytes::from);
        if let Some(data) = &data {
            let actual = data.len() as u64;
            if actual != envelope.chunk_byte_size {
                return Err(LinkError::ChunkSizeMismatch {
                    sequence,
                    declared: envelope.chunk_byte_size,
                    actual,
                });
            }
            let received = self.received_bytes.saturating_add(actual);
            if received > envelope.file_info.size {
                return Err(LinkError::FileSizeMismatch {
                    expected: envelope.file_info.size,
                    actual: received,
                });
            }
            self.received_bytes = received;
        }

        self.chunks.insert(sequence, data);
        self.processed += 1;

        if self.processed == self.total_chunks && !self.completed {
            self.completed = true;
            let binary = self.materialize()?;
            self.binary = Some(binary.clone());
            return Ok(ChunkOutcome::Completed(binary));
        }
        Ok(ChunkOutcome::Stored)
    }

    /// Decoded payload bytes stored so far (receiving side).
    pub fn received_bytes(&self) -> u64 {
        self.received_bytes
    }

    /// The reassembled file. Only available once every chunk has arrived.
    pub fn binary(&self) -> Result<Bytes> {
        if !self.completed || self.direction != Direction::Incoming {
            return Err(LinkError::FileNotCompleted);
        }
        match &self.binary {
            Some(binary) => Ok(binary.clone()),
            None => self.materialize(),
        }
    }

    fn materialize(&self) -> Result<Bytes> {
        let mut buffer = BytesMut::with_capacity(self.received_bytes as usize);
        for sequence in 1..=self.total_chunks {
            match self.chunks.get(&sequence) {
                Some(Some(data)) => buffer.extend_from_slice(data),
                _ => return Err(LinkError::MissingChunk(sequence)),
            }
        }

        let expected = self.info.as_ref().map(|info| info.size).unwrap_or(0);
        if buffer.len() as u64 != expected {
            return Err(LinkError::FileSizeMismatch {
                expected,
                actual: buffer.len() as u64,
            });
        }
        Ok(buffer.freeze())
    }
}
