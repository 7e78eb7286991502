//! Chunked file transfer over data channels.
//!
//! This module provides:
//! - The chunk envelope wire format
//! - Sending and receiving sessions for one file
//! - Per-link channel bookkeeping with paced sending
//! - Throughput statistics

pub mod channel;
pub mod constants;
pub mod envelope;
pub mod file;
pub mod session;
pub mod stats;
pub mod utils;

// Re-export public API
pub use channel::TransferChannel;
pub use envelope::{ChunkEnvelope, FileInfo, chunk_count};
pub use file::{FileInput, TransferFile};
pub use session::{ChunkOutcome, FileTransferSession};
pub use stats::TransferStats;
