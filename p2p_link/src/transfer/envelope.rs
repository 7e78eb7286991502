use base64::{Engine, prelude::BASE64_STANDARD};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Identity of a file being transferred. Two infos denote the same file only
/// if every field matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    /// Milliseconds since the Unix epoch
    #[serde(default)]
    pub last_modified: Option<u64>,
    #[serde(default)]
    pub mime_type: String,
    pub file_id: String,
}

/// One chunk on the wire.
///
/// Serialized as a flat JSON record:
/// `{"fileInfo":{..},"totalChunks":2,"sequenceNumber":1,"chunkByteSize":1000,"payload":"..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkEnvelope {
    pub file_info: FileInfo,
    pub total_chunks: u64,
    /// 1-based
    pub sequence_number: u64,
    pub chunk_byte_size: u64,
    pub payload: Option<String>,
}

impl ChunkEnvelope {
    pub fn new(file_info: FileInfo, total_chunks: u64, sequence_number: u64, data: &[u8]) -> Self {
        Self {
            file_info,
            total_chunks,
            sequence_number,
            chunk_byte_size: data.len() as u64,
            payload: Some(BASE64_STANDARD.encode(data)),
        }
    }

    pub fn is_first(&self) -> bool {
        self.sequence_number == 1
    }

    pub fn is_last(&self) -> bool {
        self.sequence_number == self.total_chunks
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Decoded payload bytes, or `None` when the chunk carries no payload.
    pub fn payload_bytes(&self) -> Result<Option<Vec<u8>>> {
        self.payload.as_deref().map(decode_payload).transpose()
    }
}

/// Decodes a base64 payload. Data URLs (`data:<mime>;base64,<data>`) are
/// accepted and only the part after the comma is decoded.
pub fn decode_payload(payload: &str) -> Result<Vec<u8>> {
    let data = match payload.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, data)| data).unwrap_or(rest),
        None => payload,
    };
    Ok(BASE64_STANDARD.decode(data)?)
}

/// Number of chunks for a file of `size` bytes. Empty files still travel as
/// one (empty) chunk so the receiver sees a completion.
pub fn chunk_count(size: u64, chunk_size: usize) -> u64 {
    let chunk_size = chunk_size.max(1) as u64;
    size.div_ceil(chunk_size).max(1)
}
