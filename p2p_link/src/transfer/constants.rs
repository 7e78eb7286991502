/// Largest chunk payload before base64 encoding (16KB)
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 16 * 1024;

/// Fixed pause between two outbound chunks, in milliseconds
pub const DEFAULT_LATENCY_MS: u64 = 200;
