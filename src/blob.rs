//! Binary payloads travel over the textual wire as a sequence of hex-encoded
//! chunks sharing one random transfer id.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Chunk size in raw bytes before hex encoding.
pub const BLOB_CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlobChunk {
    /// Transfer id shared by every chunk of one blob.
    pub id: String,
    /// Zero-based position of this chunk within the transfer.
    pub sequence: usize,
    /// Total raw byte length of the whole blob.
    pub total_length: usize,
    /// Hex-encoded chunk bytes.
    pub blob: String,
    /// Set on the final chunk only.
    pub end: bool,
}

/// Splits `bytes` into hex-encoded chunks of `chunk_size` raw bytes under a
/// fresh transfer id. An empty blob still produces one terminal chunk so the
/// receiver sees the transfer close.
pub fn chunk_blob(bytes: &[u8], chunk_size: usize) -> Vec<BlobChunk> {
    let id = Uuid::new_v4().to_string();
    let total_length = bytes.len();
    if bytes.is_empty() {
        return vec![BlobChunk {
            id,
            sequence: 0,
            total_length,
            blob: String::new(),
            end: true,
        }];
    }
    let count = bytes.len().div_ceil(chunk_size);
    bytes
        .chunks(chunk_size)
        .enumerate()
        .map(|(sequence, chunk)| BlobChunk {
            id: id.clone(),
            sequence,
            total_length,
            blob: hex::encode(chunk),
            end: sequence + 1 == count,
        })
        .collect()
}

/// Reassembles chunk payloads back into the original bytes. Chunks must be in
/// sequence order.
pub fn reassemble(chunks: &[BlobChunk]) -> Result<Vec<u8>, hex::FromHexError> {
    let mut out = Vec::new();
    for chunk in chunks {
        out.extend(hex::decode(&chunk.blob)?);
    }
    Ok(out)
}
