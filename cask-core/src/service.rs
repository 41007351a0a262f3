//! The operational surface: one context object carrying every store handle,
//! built once and passed to each operation.

use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::blob::{BlobStore, FsBlobStore, MemoryBlobStore};
use crate::codec::ChunkCodec;
use crate::config::Config;
use crate::error::{CaskError, Result};
use crate::identity::{validate_subject, Subject};
use crate::manifest::Manifest;
use crate::meta::{FsMetaStore, MemoryMetaStore, MetadataStore};
use crate::reconstruct::{Reconstructor, RetrievalHandle};
use crate::store::ChunkStore;
use crate::upload::{UploadReport, Uploader};

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct UserUsage {
    pub user_id: String,
    pub file_count: u64,
    pub original_bytes: u64,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct UsageReport {
    pub total_files: u64,
    pub total_users: u64,
    pub distinct_chunks: u64,
    pub original_bytes: u64,
    /// Compressed bytes of every distinct chunk, each counted once.
    pub stored_bytes: u64,
    pub saved_bytes: u64,
    pub users: Vec<UserUsage>,
}

pub struct CaskService {
    config: Config,
    store: ChunkStore,
    codec: ChunkCodec,
    pool: ThreadPool,
    scratch: PathBuf,
}

impl CaskService {
    pub fn new(
        config: Config,
        blobs: Arc<dyn BlobStore>,
        meta: Arc<dyn MetadataStore>,
    ) -> Result<Self> {
        config.validate()?;
        let codec = ChunkCodec::new(config.compression_level)?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.max_parallel_chunks)
            .thread_name(|i| format!("cask-chunk-{i}"))
            .build()
            .map_err(|e| CaskError::storage("build chunk worker pool", e))?;
        let scratch = config.data_dir.join("scratch");
        Ok(Self { store: ChunkStore::new(blobs, meta), codec, pool, scratch, config })
    }

    /// Directory-backed service rooted at `config.data_dir`.
    pub fn open_dir(config: Config) -> Result<Self> {
        let blobs = FsBlobStore::new(config.data_dir.join("objects"))?;
        let meta = FsMetaStore::new(config.data_dir.join("meta"))?;
        tracing::debug!(data_dir = ?config.data_dir, "opened directory store");
        Self::new(config, Arc::new(blobs), Arc::new(meta))
    }

    /// Process-local stores; only downloads touch `config.data_dir`.
    pub fn in_memory(config: Config) -> Result<Self> {
        Self::new(config, Arc::new(MemoryBlobStore::new()), Arc::new(MemoryMetaStore::new()))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn chunk_store(&self) -> &ChunkStore {
        &self.store
    }

    fn uploader(&self) -> Uploader<'_> {
        Uploader {
            store: &self.store,
            codec: self.codec,
            pool: &self.pool,
            chunk_size: self.config.chunk_size,
        }
    }

    fn reconstructor(&self) -> Reconstructor<'_> {
        Reconstructor { store: &self.store, codec: self.codec, pool: &self.pool }
    }

    pub fn upload(
        &self,
        subject: &Subject,
        file_name: &str,
        payload: &[u8],
    ) -> Result<UploadReport> {
        let report = self.uploader().upload(subject, file_name, payload)?;
        tracing::info!(
            owner = %subject,
            file_id = %report.file_id,
            chunks = report.chunks,
            stored = report.stored_chunks,
            deduplicated = report.deduplicated_chunks,
            "upload complete"
        );
        Ok(report)
    }

    pub fn list(&self, subject: &Subject) -> Result<Vec<Manifest>> {
        let mut files = self.store.meta().manifests_for(subject.as_str())?;
        files.sort_by(|a, b| {
            a.created_utc.cmp(&b.created_utc).then_with(|| a.file_id.cmp(&b.file_id))
        });
        Ok(files)
    }

    /// Owner-keyed lookup; a file the subject does not own is simply not found.
    pub fn manifest(&self, subject: &Subject, file_id: &Uuid) -> Result<Manifest> {
        self.store
            .meta()
            .manifest(subject.as_str(), file_id)?
            .ok_or_else(|| CaskError::NotFound(format!("file {file_id}")))
    }

    pub fn reconstruct(&self, manifest: &Manifest) -> Result<Vec<u8>> {
        self.reconstructor().reconstruct(manifest)
    }

    pub fn download(&self, subject: &Subject, file_id: &Uuid) -> Result<RetrievalHandle> {
        let manifest = self.manifest(subject, file_id)?;
        let ttl = self.config.handle_ttl();
        self.reconstructor().materialize(subject, &manifest, &self.scratch, ttl)
    }

    /// Download a file owned by `owner_id` that was shared with `subject`.
    pub fn download_shared(
        &self,
        subject: &Subject,
        owner_id: &str,
        file_id: &Uuid,
    ) -> Result<RetrievalHandle> {
        validate_subject(owner_id)?;
        let manifest = self
            .store
            .meta()
            .manifest(owner_id, file_id)?
            .ok_or_else(|| CaskError::NotFound(format!("file {owner_id}/{file_id}")))?;
        if !manifest.is_readable_by(subject.as_str()) {
            return Err(CaskError::Forbidden(format!("file {file_id} is not shared with you")));
        }
        let ttl = self.config.handle_ttl();
        self.reconstructor().materialize(subject, &manifest, &self.scratch, ttl)
    }

    /// Grant `target` read access. Ownership is proven by the keyed lookup:
    /// if `(subject, file_id)` has no manifest, the subject is not the owner.
    pub fn share(&self, subject: &Subject, file_id: &Uuid, target: &str) -> Result<bool> {
        let target = target.trim();
        validate_subject(target)?;
        if target == subject.as_str() {
            return Err(CaskError::InvalidInput("cannot share a file with its owner".into()));
        }
        let meta = self.store.meta();
        if meta.manifest(subject.as_str(), file_id)?.is_none() {
            return Err(CaskError::Forbidden(format!("you are not the owner of file {file_id}")));
        }
        let added = meta.add_share(subject.as_str(), file_id, target)?;
        tracing::info!(
            owner = %subject,
            file_id = %file_id,
            grantee = target,
            added,
            "share granted"
        );
        Ok(added)
    }

    /// Storage totals across every user. Restricted to configured admins.
    pub fn usage(&self, subject: &Subject) -> Result<UsageReport> {
        if !self.config.is_admin(subject.as_str()) {
            return Err(CaskError::Forbidden("usage report is restricted to admins".into()));
        }
        let meta = self.store.meta();
        let manifests = meta.all_manifests()?;
        let chunks = meta.chunks()?;

        let mut per_user: BTreeMap<String, UserUsage> = BTreeMap::new();
        let mut original_bytes = 0u64;
        for m in &manifests {
            original_bytes += m.original_size;
            let u = per_user.entry(m.owner_id.clone()).or_insert_with(|| UserUsage {
                user_id: m.owner_id.clone(),
                file_count: 0,
                original_bytes: 0,
            });
            u.file_count += 1;
            u.original_bytes += m.original_size;
        }
        let stored_bytes: u64 = chunks.iter().map(|c| c.size).sum();

        Ok(UsageReport {
            total_files: manifests.len() as u64,
            total_users: per_user.len() as u64,
            distinct_chunks: chunks.len() as u64,
            original_bytes,
            stored_bytes,
            saved_bytes: original_bytes.saturating_sub(stored_bytes),
            users: per_user.into_values().collect(),
        })
    }
}
