use rayon::prelude::*;
use rayon::ThreadPool;
use serde::Serialize;
use uuid::Uuid;

use crate::chunker;
use crate::codec::{ChunkCodec, ChunkId};
use crate::error::{CaskError, Result};
use crate::identity::Subject;
use crate::manifest::{Manifest, ManifestWriter};
use crate::store::{ChunkStore, PutOutcome};

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct UploadReport {
    pub file_id: Uuid,
    pub original_size: u64,
    pub chunks: usize,
    pub stored_chunks: usize,
    pub deduplicated_chunks: usize,
}

/// Chunk → encode → store for every segment on the worker pool, then commit
/// the manifest once all chunk tasks have finished.
pub struct Uploader<'a> {
    pub store: &'a ChunkStore,
    pub codec: ChunkCodec,
    pub pool: &'a ThreadPool,
    pub chunk_size: usize,
}

impl Uploader<'_> {
    pub fn upload(&self, owner: &Subject, file_name: &str, payload: &[u8]) -> Result<UploadReport> {
        if file_name.trim().is_empty() {
            return Err(CaskError::InvalidInput("missing file name".into()));
        }
        let segments = chunker::split(payload, self.chunk_size)?;

        // `install` returns only after every task has completed, so nothing
        // below races a chunk write. Every task runs even if a sibling fails,
        // which keeps the committed count exact.
        let results: Vec<Result<(ChunkId, PutOutcome)>> = self.pool.install(|| {
            segments
                .par_iter()
                .map(|seg| -> Result<(ChunkId, PutOutcome)> {
                    let enc = self.codec.encode(seg)?;
                    let outcome = self.store.put_chunk(&enc)?;
                    Ok((enc.id, outcome))
                })
                .collect()
        });

        let committed = results.iter().filter(|r| r.is_ok()).count();
        let results = match results.into_iter().collect::<Result<Vec<_>>>() {
            Ok(v) => v,
            Err(e) => {
                // Committed chunks keep their references; no manifest cites them.
                tracing::warn!(
                    owner = %owner,
                    file_name,
                    committed,
                    total = segments.len(),
                    error = %e,
                    "upload aborted after partial chunk commit"
                );
                return Err(e);
            }
        };

        let stored_chunks = results.iter().filter(|(_, o)| *o == PutOutcome::Stored).count();
        let chunk_ids: Vec<ChunkId> = results.into_iter().map(|(id, _)| id).collect();
        let chunks = chunk_ids.len();

        let manifest = Manifest::new(
            owner.as_str(),
            file_name,
            chunk_ids,
            self.chunk_size,
            payload.len() as u64,
        );
        ManifestWriter::new(self.store.meta()).commit(&manifest)?;

        Ok(UploadReport {
            file_id: manifest.file_id,
            original_size: manifest.original_size,
            chunks,
            stored_chunks,
            deduplicated_chunks: chunks - stored_chunks,
        })
    }
}
