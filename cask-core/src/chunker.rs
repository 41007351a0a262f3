use crate::error::{CaskError, Result};

/// Default chunk size: 4 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Split `buf` into ordered fixed-size segments; only the last may be short.
/// An empty buffer yields no segments.
pub fn split(buf: &[u8], chunk_size: usize) -> Result<Vec<&[u8]>> {
    if chunk_size == 0 {
        return Err(CaskError::InvalidInput("chunk size must be non-zero".into()));
    }
    Ok(buf.chunks(chunk_size).collect())
}

/// Number of segments `split` produces for a buffer of `len` bytes.
pub fn chunk_count(len: u64, chunk_size: usize) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    len.div_ceil(chunk_size as u64)
}
