//! Chunk compression and content addressing.
//!
//! A chunk's identity is the BLAKE3 digest of its *compressed* bytes, so the
//! compressor must be deterministic: same input and level, same output. The
//! zstd bulk API writes a bare frame (no timestamps, no dictionary) and is run
//! single-threaded here, which keeps that property.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{CaskError, Result, StorageContext};

pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// 256-bit content identifier of a compressed chunk.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId([u8; 32]);

impl ChunkId {
    pub fn of(compressed: &[u8]) -> Self {
        ChunkId(*blake3::hash(compressed).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }

    /// True when `bytes` hash to this id.
    pub fn matches(&self, bytes: &[u8]) -> bool {
        // blake3::Hash equality is constant-time
        blake3::hash(bytes) == blake3::Hash::from(self.0)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkId({})", self.to_hex())
    }
}

impl FromStr for ChunkId {
    type Err = CaskError;

    fn from_str(s: &str) -> Result<Self> {
        blake3::Hash::from_hex(s)
            .map(|h| ChunkId(*h.as_bytes()))
            .map_err(|_| CaskError::InvalidInput(format!("bad chunk id {s:?}")))
    }
}

impl Serialize for ChunkId {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ChunkId {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Debug)]
pub struct EncodedChunk {
    pub id: ChunkId,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Copy, Debug)]
pub struct ChunkCodec {
    level: i32,
}

impl Default for ChunkCodec {
    fn default() -> Self {
        Self { level: DEFAULT_COMPRESSION_LEVEL }
    }
}

impl ChunkCodec {
    pub fn new(level: i32) -> Result<Self> {
        if !zstd::compression_level_range().contains(&level) {
            return Err(CaskError::InvalidInput(format!("zstd level {level} out of range")));
        }
        Ok(Self { level })
    }

    pub fn level(&self) -> i32 {
        self.level
    }

    pub fn encode(&self, segment: &[u8]) -> Result<EncodedChunk> {
        let bytes =
            zstd::bulk::compress(segment, self.level).storage_context(|| "zstd compress chunk")?;
        Ok(EncodedChunk { id: ChunkId::of(&bytes), bytes })
    }

    /// Decompress a stored chunk. Undecodable bytes mean the blob is damaged.
    pub fn decode(&self, id: &ChunkId, compressed: &[u8]) -> Result<Vec<u8>> {
        zstd::stream::decode_all(compressed)
            .map_err(|e| CaskError::Corruption(format!("chunk {id} does not decompress: {e}")))
    }
}
