use serde::{Deserialize, Serialize};

/// Throughput bookkeeping for one file.
///
/// Rates are `bytes * 8 / elapsed_ms`, i.e. kilobits per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransferStats {
    pub total_bytes: u64,
    pub total_chunks: u64,
    pub last_sequence: u64,
    pub cumulative_bytes: u64,
    pub peak_kbps: u64,
    pub current_kbps: u64,
    pub percent: u8,
}

impl TransferStats {
    pub fn new(total_bytes: u64, total_chunks: u64) -> Self {
        Self {
            total_bytes,
            total_chunks,
            ..Self::default()
        }
    }

    /// Records `bytes` moved over the last `elapsed_ms` milliseconds.
    pub fn update(&mut self, bytes: u64, elapsed_ms: u64, sequence: u64) {
        let elapsed_ms = elapsed_ms.max(1);
        self.current_kbps = (bytes as f64 * 8.0 / elapsed_ms as f64).round() as u64;
        self.peak_kbps = self.peak_kbps.max(self.current_kbps);
        self.cumulative_bytes = self.cumulative_bytes.saturating_add(bytes);
        self.last_sequence = sequence;
        self.percent = percent_of(self.cumulative_bytes, self.total_bytes);
    }

    pub fn is_complete(&self) -> bool {
        self.total_chunks > 0 && self.last_sequence >= self.total_chunks
    }
}

/// Rounded percentage, clamped to 100. An empty total counts as done.
fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let percent = (done as f64 / total as f64 * 100.0).round();
    percent.min(100.0) as u8
}
