//! Reassembles uploads from their manifests and hands them out through
//! short-lived retrieval handles.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use rayon::ThreadPool;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempPath;
use uuid::Uuid;

use crate::codec::ChunkCodec;
use crate::config::MAX_HANDLE_TTL_SECS;
use crate::error::{CaskError, Result, StorageContext};
use crate::identity::Subject;
use crate::manifest::Manifest;
use crate::store::ChunkStore;

pub struct Reconstructor<'a> {
    pub store: &'a ChunkStore,
    pub codec: ChunkCodec,
    pub pool: &'a ThreadPool,
}

impl Reconstructor<'_> {
    /// Fetch and decompress every chunk (in parallel) and concatenate in
    /// manifest order. Any missing or damaged chunk fails the whole call.
    pub fn reconstruct(&self, manifest: &Manifest) -> Result<Vec<u8>> {
        check_layout(manifest)?;

        // Indexed parallel collect keeps manifest order regardless of which
        // fetch finishes first.
        let parts: Vec<Vec<u8>> = self.pool.install(|| {
            manifest
                .chunk_ids
                .par_iter()
                .map(|id| -> Result<Vec<u8>> {
                    let compressed = self.store.fetch(id)?;
                    self.codec.decode(id, &compressed)
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let mut out = Vec::with_capacity(parts.iter().map(Vec::len).sum());
        for p in parts {
            out.extend_from_slice(&p);
        }
        if out.len() as u64 != manifest.original_size {
            return Err(CaskError::Corruption(format!(
                "file {} reassembled to {} bytes, manifest says {}",
                manifest.file_id,
                out.len(),
                manifest.original_size
            )));
        }
        Ok(out)
    }

    /// Reconstruct into a fresh file under `<scratch>/temp-downloads/<requester>/`
    /// and return a handle that stops working after `ttl`. The file is
    /// removed when the handle is dropped.
    pub fn materialize(
        &self,
        requester: &Subject,
        manifest: &Manifest,
        scratch: &Path,
        ttl: Duration,
    ) -> Result<RetrievalHandle> {
        let bytes = self.reconstruct(manifest)?;
        let dir = scratch.join("temp-downloads").join(requester.as_str());
        fs::create_dir_all(&dir).storage_context(|| format!("create dir {:?}", dir))?;
        let mut tmp = tempfile::Builder::new()
            .prefix(&format!("{}-", manifest.file_id))
            .tempfile_in(&dir)
            .storage_context(|| format!("create scratch file in {:?}", dir))?;
        tmp.write_all(&bytes).storage_context(|| format!("write {:?}", tmp.path()))?;
        tmp.as_file().sync_all().storage_context(|| format!("sync {:?}", tmp.path()))?;

        let handle = RetrievalHandle::new(tmp.into_temp_path(), manifest, bytes.len() as u64, ttl);
        tracing::info!(
            requester = %requester,
            file_id = %manifest.file_id,
            bytes = bytes.len(),
            expires_at = %handle.expires_at.to_rfc3339(),
            "download materialized"
        );
        Ok(handle)
    }
}

/// A manifest read back from storage is untrusted: its size must fit the
/// chunk layout before anything is fetched or allocated.
fn check_layout(manifest: &Manifest) -> Result<()> {
    let n = manifest.chunk_ids.len() as u64;
    let cs = manifest.chunk_size as u64;
    let size = manifest.original_size;
    let fits = match n {
        0 => size == 0,
        _ => match ((n - 1).checked_mul(cs), n.checked_mul(cs)) {
            (Some(lo), Some(hi)) => size > lo && size <= hi,
            _ => false,
        },
    };
    if fits {
        Ok(())
    } else {
        Err(CaskError::Corruption(format!(
            "file {}: {} bytes cannot span {} chunks of {} bytes",
            manifest.file_id, size, n, cs
        )))
    }
}

/// Time-bounded access to a materialized download. The deadline is fixed at
/// creation and cannot be extended. Each handle owns its own scratch file,
/// deleted on drop or on the first access after the deadline.
#[derive(Debug)]
pub struct RetrievalHandle {
    path: TempPath,
    pub file_id: Uuid,
    pub file_name: String,
    pub size: u64,
    pub expires_at: DateTime<Utc>,
    deadline: Instant,
}

impl RetrievalHandle {
    fn new(path: TempPath, manifest: &Manifest, size: u64, ttl: Duration) -> Self {
        let ttl = ttl.min(Duration::from_secs(MAX_HANDLE_TTL_SECS));
        let ttl_ms = ttl.as_millis() as i64;
        Self {
            path,
            file_id: manifest.file_id,
            file_name: manifest.file_name.clone(),
            size,
            expires_at: Utc::now() + chrono::Duration::milliseconds(ttl_ms),
            deadline: Instant::now() + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn open(&self) -> Result<File> {
        if self.is_expired() {
            if let Err(e) = fs::remove_file(&self.path) {
                if e.kind() != ErrorKind::NotFound {
                    tracing::warn!(path = ?self.path(), error = %e, "expired download not removed");
                }
            }
            return Err(CaskError::Expired(self.expires_at.to_rfc3339()));
        }
        File::open(&self.path).storage_context(|| format!("open {:?}", self.path()))
    }

    pub fn read_all(&self) -> Result<Vec<u8>> {
        let mut f = self.open()?;
        let mut buf = Vec::new();
        f.read_to_end(&mut buf).storage_context(|| format!("read {:?}", self.path()))?;
        Ok(buf)
    }

    /// Delete the scratch file now instead of waiting for drop.
    pub fn discard(self) -> Result<()> {
        let path = self.path().to_path_buf();
        match self.path.close() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CaskError::storage(format!("remove {:?}", path), e)),
        }
    }
}
