#![allow(dead_code)]

use cask_core::blob::{BlobStore, ContentEncoding, MemoryBlobStore, Object};
use cask_core::codec::ChunkId;
use cask_core::config::Config;
use cask_core::manifest::Manifest;
use cask_core::meta::{ChunkRecord, CreateOutcome, MemoryMetaStore, MetadataStore};
use cask_core::service::CaskService;
use cask_core::{CaskError, Result};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Counts physical `put` calls on top of an in-memory store.
#[derive(Default)]
pub struct CountingBlobStore {
    pub inner: MemoryBlobStore,
    pub puts: AtomicUsize,
}

impl CountingBlobStore {
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

impl BlobStore for CountingBlobStore {
    fn put(&self, key: &str, body: &[u8], encoding: ContentEncoding) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, body, encoding)
    }

    fn get(&self, key: &str) -> Result<Option<Object>> {
        self.inner.get(key)
    }
}

/// Refuses to store one key; every other write goes through.
pub struct FailingBlobStore {
    pub inner: MemoryBlobStore,
    pub refuse: String,
}

impl BlobStore for FailingBlobStore {
    fn put(&self, key: &str, body: &[u8], encoding: ContentEncoding) -> Result<()> {
        if key == self.refuse {
            return Err(CaskError::storage(format!("put {key}"), "backend refused write"));
        }
        self.inner.put(key, body, encoding)
    }

    fn get(&self, key: &str) -> Result<Option<Object>> {
        self.inner.get(key)
    }
}

/// Hides existing chunk records from `chunk()`, so every writer takes the
/// create path and all but one lose the conditional create.
#[derive(Default)]
pub struct BlindMetaStore {
    pub inner: MemoryMetaStore,
}

impl MetadataStore for BlindMetaStore {
    fn chunk(&self, _id: &ChunkId) -> Result<Option<ChunkRecord>> {
        Ok(None)
    }
    fn create_chunk_if_absent(&self, record: &ChunkRecord) -> Result<CreateOutcome> {
        self.inner.create_chunk_if_absent(record)
    }
    fn increment_ref(&self, id: &ChunkId) -> Result<u64> {
        self.inner.increment_ref(id)
    }
    fn chunks(&self) -> Result<Vec<ChunkRecord>> {
        self.inner.chunks()
    }
    fn create_manifest(&self, manifest: &Manifest) -> Result<CreateOutcome> {
        self.inner.create_manifest(manifest)
    }
    fn manifest(&self, owner_id: &str, file_id: &Uuid) -> Result<Option<Manifest>> {
        self.inner.manifest(owner_id, file_id)
    }
    fn manifests_for(&self, owner_id: &str) -> Result<Vec<Manifest>> {
        self.inner.manifests_for(owner_id)
    }
    fn all_manifests(&self) -> Result<Vec<Manifest>> {
        self.inner.all_manifests()
    }
    fn add_share(&self, owner_id: &str, file_id: &Uuid, target: &str) -> Result<bool> {
        self.inner.add_share(owner_id, file_id, target)
    }
}

pub fn test_config(dir: &Path, chunk_size: usize) -> Config {
    Config { data_dir: dir.to_path_buf(), chunk_size, ..Config::default() }
}

pub struct Harness {
    pub svc: CaskService,
    pub blobs: Arc<CountingBlobStore>,
    pub meta: Arc<MemoryMetaStore>,
}

pub fn harness(dir: &Path, chunk_size: usize) -> Harness {
    harness_with(test_config(dir, chunk_size))
}

pub fn harness_with(config: Config) -> Harness {
    let blobs = Arc::new(CountingBlobStore::default());
    let meta = Arc::new(MemoryMetaStore::new());
    let svc = CaskService::new(config, blobs.clone(), meta.clone()).unwrap();
    Harness { svc, blobs, meta }
}

pub fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen()).collect()
}
