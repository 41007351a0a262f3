//! Content-addressed chunk store with exactly-once blob writes.
//!
//! Per chunk:
//! 1. if a record exists, increment its refcount and stop;
//! 2. otherwise write the blob, then conditionally create the record;
//! 3. if the create loses a race, the winner already stored the blob, so
//!    increment instead.
//!
//! Only the metadata store's conditional create and atomic increment touch a
//! record, so no external lock is needed between concurrent writers.

use std::sync::Arc;

use crate::blob::{chunk_key, BlobStore, ContentEncoding};
use crate::codec::{ChunkId, EncodedChunk};
use crate::error::{CaskError, Result};
use crate::meta::{ChunkRecord, CreateOutcome, MetadataStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PutOutcome {
    /// This writer created the record; refcount is 1.
    Stored,
    /// Someone stored it first; the refcount was bumped to `ref_count`.
    Deduplicated { ref_count: u64 },
}

#[derive(Clone)]
pub struct ChunkStore {
    blobs: Arc<dyn BlobStore>,
    meta: Arc<dyn MetadataStore>,
}

impl ChunkStore {
    pub fn new(blobs: Arc<dyn BlobStore>, meta: Arc<dyn MetadataStore>) -> Self {
        Self { blobs, meta }
    }

    pub fn meta(&self) -> &dyn MetadataStore {
        self.meta.as_ref()
    }

    pub fn exists(&self, id: &ChunkId) -> Result<bool> {
        Ok(self.meta.chunk(id)?.is_some())
    }

    pub fn create_if_absent(&self, id: &ChunkId, compressed_len: u64) -> Result<CreateOutcome> {
        self.meta.create_chunk_if_absent(&ChunkRecord::first_sight(*id, compressed_len))
    }

    pub fn increment_ref(&self, id: &ChunkId) -> Result<u64> {
        self.meta.increment_ref(id)
    }

    pub fn ref_count(&self, id: &ChunkId) -> Result<Option<u64>> {
        Ok(self.meta.chunk(id)?.map(|r| r.refs()))
    }

    pub fn put_chunk(&self, chunk: &EncodedChunk) -> Result<PutOutcome> {
        let id = &chunk.id;
        if self.exists(id)? {
            let ref_count = self.increment_ref(id)?;
            tracing::debug!(chunk = %id, ref_count, "chunk deduplicated");
            return Ok(PutOutcome::Deduplicated { ref_count });
        }

        self.blobs.put(&chunk_key(id), &chunk.bytes, ContentEncoding::Zstd)?;
        match self.create_if_absent(id, chunk.bytes.len() as u64)? {
            CreateOutcome::Created => {
                tracing::debug!(chunk = %id, bytes = chunk.bytes.len(), "chunk stored");
                Ok(PutOutcome::Stored)
            }
            CreateOutcome::AlreadyExists => {
                let ref_count = self.increment_ref(id)?;
                tracing::warn!(chunk = %id, ref_count, "lost create race, counted as reference");
                Ok(PutOutcome::Deduplicated { ref_count })
            }
        }
    }

    /// Compressed bytes of a referenced chunk. A missing blob or one that does
    /// not hash to `id` is corruption.
    pub fn fetch(&self, id: &ChunkId) -> Result<Vec<u8>> {
        let obj = self.blobs.get(&chunk_key(id))?.ok_or_else(|| {
            tracing::warn!(chunk = %id, "referenced chunk missing from object storage");
            CaskError::Corruption(format!("chunk {id} missing from object storage"))
        })?;
        if obj.encoding != ContentEncoding::Zstd {
            return Err(CaskError::Corruption(format!(
                "chunk {id} has unexpected content encoding {}",
                obj.encoding.as_str()
            )));
        }
        if !id.matches(&obj.body) {
            tracing::warn!(chunk = %id, "chunk content does not match its id");
            return Err(CaskError::Corruption(format!("chunk {id} content hash mismatch")));
        }
        Ok(obj.body)
    }
}
