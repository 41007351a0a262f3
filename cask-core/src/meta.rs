//! Key-value metadata: chunk records keyed by id, manifests keyed by
//! `(owner_id, file_id)`.
//!
//! Chunk records are only ever mutated through two atomic primitives, a
//! conditional create and a counter increment. There is no generic
//! read-modify-write entry point for them.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::codec::ChunkId;
use crate::error::{CaskError, Result, StorageContext};
use crate::identity::validate_subject;
use crate::manifest::Manifest;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChunkRecord {
    pub id: ChunkId,
    /// Compressed length in bytes.
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_count: Option<u64>,
}

impl ChunkRecord {
    pub fn first_sight(id: ChunkId, size: u64) -> Self {
        Self { id, size, ref_count: Some(1) }
    }

    pub fn refs(&self) -> u64 {
        self.ref_count.unwrap_or(0)
    }
}

/// Result of a conditional create. Losing the race is an expected outcome,
/// not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

pub trait MetadataStore: Send + Sync {
    fn chunk(&self, id: &ChunkId) -> Result<Option<ChunkRecord>>;

    /// Insert `record` only if no record exists for its id.
    fn create_chunk_if_absent(&self, record: &ChunkRecord) -> Result<CreateOutcome>;

    /// Atomically add one to the record's counter (a missing counter counts as
    /// zero) and return the new value. `NotFound` if there is no record.
    fn increment_ref(&self, id: &ChunkId) -> Result<u64>;

    fn chunks(&self) -> Result<Vec<ChunkRecord>>;

    /// Insert a manifest only if `(owner_id, file_id)` is free.
    fn create_manifest(&self, manifest: &Manifest) -> Result<CreateOutcome>;

    fn manifest(&self, owner_id: &str, file_id: &Uuid) -> Result<Option<Manifest>>;

    fn manifests_for(&self, owner_id: &str) -> Result<Vec<Manifest>>;

    fn all_manifests(&self) -> Result<Vec<Manifest>>;

    /// Atomically add `target` to the manifest's sharing set. Returns whether
    /// the set changed. `NotFound` if there is no such manifest.
    fn add_share(&self, owner_id: &str, file_id: &Uuid, target: &str) -> Result<bool>;
}

#[derive(Default)]
pub struct MemoryMetaStore {
    chunks: DashMap<ChunkId, ChunkRecord>,
    manifests: DashMap<(String, Uuid), Manifest>,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for MemoryMetaStore {
    fn chunk(&self, id: &ChunkId) -> Result<Option<ChunkRecord>> {
        Ok(self.chunks.get(id).map(|r| r.value().clone()))
    }

    fn create_chunk_if_absent(&self, record: &ChunkRecord) -> Result<CreateOutcome> {
        match self.chunks.entry(record.id) {
            Entry::Occupied(_) => Ok(CreateOutcome::AlreadyExists),
            Entry::Vacant(v) => {
                v.insert(record.clone());
                Ok(CreateOutcome::Created)
            }
        }
    }

    fn increment_ref(&self, id: &ChunkId) -> Result<u64> {
        let mut rec = self
            .chunks
            .get_mut(id)
            .ok_or_else(|| CaskError::NotFound(format!("chunk record {id}")))?;
        let next = rec.refs() + 1;
        rec.ref_count = Some(next);
        Ok(next)
    }

    fn chunks(&self) -> Result<Vec<ChunkRecord>> {
        Ok(self.chunks.iter().map(|r| r.value().clone()).collect())
    }

    fn create_manifest(&self, manifest: &Manifest) -> Result<CreateOutcome> {
        match self.manifests.entry((manifest.owner_id.clone(), manifest.file_id)) {
            Entry::Occupied(_) => Ok(CreateOutcome::AlreadyExists),
            Entry::Vacant(v) => {
                v.insert(manifest.clone());
                Ok(CreateOutcome::Created)
            }
        }
    }

    fn manifest(&self, owner_id: &str, file_id: &Uuid) -> Result<Option<Manifest>> {
        Ok(self.manifests.get(&(owner_id.to_string(), *file_id)).map(|m| m.value().clone()))
    }

    fn manifests_for(&self, owner_id: &str) -> Result<Vec<Manifest>> {
        Ok(self
            .manifests
            .iter()
            .filter(|m| m.key().0 == owner_id)
            .map(|m| m.value().clone())
            .collect())
    }

    fn all_manifests(&self) -> Result<Vec<Manifest>> {
        Ok(self.manifests.iter().map(|m| m.value().clone()).collect())
    }

    fn add_share(&self, owner_id: &str, file_id: &Uuid, target: &str) -> Result<bool> {
        let mut m = self
            .manifests
            .get_mut(&(owner_id.to_string(), *file_id))
            .ok_or_else(|| CaskError::NotFound(format!("file {owner_id}/{file_id}")))?;
        Ok(m.shared_with.insert(target.to_string()))
    }
}

/// One JSON document per record:
/// `{root}/chunks/<hex id>.json` and `{root}/files/<owner>/<file id>.json`.
///
/// Creates publish a fully written temp file with a no-clobber link, so a
/// record is never visible half-written. Updates hold an exclusive advisory
/// lock on the record for the whole read-modify-write; reads hold a shared one.
pub struct FsMetaStore {
    root: PathBuf,
}

impl FsMetaStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for sub in ["chunks", "files"] {
            let dir = root.join(sub);
            fs::create_dir_all(&dir).storage_context(|| format!("create dir {:?}", dir))?;
        }
        Ok(Self { root })
    }

    fn chunk_path(&self, id: &ChunkId) -> PathBuf {
        self.root.join("chunks").join(format!("{}.json", id.to_hex()))
    }

    fn owner_dir(&self, owner_id: &str) -> Result<PathBuf> {
        validate_subject(owner_id)?;
        Ok(self.root.join("files").join(owner_id))
    }

    fn manifest_path(&self, owner_id: &str, file_id: &Uuid) -> Result<PathBuf> {
        Ok(self.owner_dir(owner_id)?.join(format!("{file_id}.json")))
    }
}

fn create_exclusive<T: Serialize>(path: &Path, value: &T) -> Result<CreateOutcome> {
    let dir = path
        .parent()
        .ok_or_else(|| CaskError::InvalidInput(format!("no parent dir for {:?}", path)))?;
    fs::create_dir_all(dir).storage_context(|| format!("create dir {:?}", dir))?;
    let body = serde_json::to_vec_pretty(value).storage_context(|| "encode record")?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .storage_context(|| format!("create temp in {:?}", dir))?;
    tmp.write_all(&body).storage_context(|| format!("write temp for {:?}", path))?;
    tmp.as_file().sync_all().storage_context(|| format!("sync temp for {:?}", path))?;
    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(CreateOutcome::Created),
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(CreateOutcome::AlreadyExists),
        Err(e) => Err(CaskError::storage(format!("publish {:?}", path), e.error)),
    }
}

fn read_locked<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let mut f = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CaskError::storage(format!("open {:?}", path), e)),
    };
    FileExt::lock_shared(&f).storage_context(|| format!("lock {:?}", path))?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf).storage_context(|| format!("read {:?}", path))?;
    FileExt::unlock(&f).storage_context(|| format!("unlock {:?}", path))?;
    let value = serde_json::from_slice(&buf).storage_context(|| format!("decode {:?}", path))?;
    Ok(Some(value))
}

/// Exclusive read-modify-write of one record. `Ok(None)` if it does not exist.
fn update_locked<T, R>(path: &Path, apply: impl FnOnce(&mut T) -> R) -> Result<Option<R>>
where
    T: Serialize + DeserializeOwned,
{
    let mut f = match OpenOptions::new().read(true).write(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CaskError::storage(format!("open {:?}", path), e)),
    };
    FileExt::lock_exclusive(&f).storage_context(|| format!("lock {:?}", path))?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf).storage_context(|| format!("read {:?}", path))?;
    let mut value: T =
        serde_json::from_slice(&buf).storage_context(|| format!("decode {:?}", path))?;
    let out = apply(&mut value);
    let body = serde_json::to_vec_pretty(&value).storage_context(|| "encode record")?;
    f.seek(SeekFrom::Start(0)).storage_context(|| format!("seek {:?}", path))?;
    f.set_len(0).storage_context(|| format!("truncate {:?}", path))?;
    f.write_all(&body).storage_context(|| format!("write {:?}", path))?;
    f.sync_all().storage_context(|| format!("sync {:?}", path))?;
    FileExt::unlock(&f).storage_context(|| format!("unlock {:?}", path))?;
    Ok(Some(out))
}

fn read_dir_json<T: DeserializeOwned>(dir: &Path, max_depth: usize) -> Result<Vec<T>> {
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }
    for ent in walkdir::WalkDir::new(dir).min_depth(1).max_depth(max_depth) {
        let ent = ent.storage_context(|| format!("walk {:?}", dir))?;
        let p = ent.path();
        if !ent.file_type().is_file() || p.extension().map(|s| s != "json").unwrap_or(true) {
            continue;
        }
        if let Some(v) = read_locked(p)? {
            out.push(v);
        }
    }
    Ok(out)
}

impl MetadataStore for FsMetaStore {
    fn chunk(&self, id: &ChunkId) -> Result<Option<ChunkRecord>> {
        read_locked(&self.chunk_path(id))
    }

    fn create_chunk_if_absent(&self, record: &ChunkRecord) -> Result<CreateOutcome> {
        create_exclusive(&self.chunk_path(&record.id), record)
    }

    fn increment_ref(&self, id: &ChunkId) -> Result<u64> {
        update_locked(&self.chunk_path(id), |rec: &mut ChunkRecord| {
            let next = rec.refs() + 1;
            rec.ref_count = Some(next);
            next
        })?
        .ok_or_else(|| CaskError::NotFound(format!("chunk record {id}")))
    }

    fn chunks(&self) -> Result<Vec<ChunkRecord>> {
        read_dir_json(&self.root.join("chunks"), 1)
    }

    fn create_manifest(&self, manifest: &Manifest) -> Result<CreateOutcome> {
        create_exclusive(&self.manifest_path(&manifest.owner_id, &manifest.file_id)?, manifest)
    }

    fn manifest(&self, owner_id: &str, file_id: &Uuid) -> Result<Option<Manifest>> {
        read_locked(&self.manifest_path(owner_id, file_id)?)
    }

    fn manifests_for(&self, owner_id: &str) -> Result<Vec<Manifest>> {
        read_dir_json(&self.owner_dir(owner_id)?, 1)
    }

    fn all_manifests(&self) -> Result<Vec<Manifest>> {
        read_dir_json(&self.root.join("files"), 2)
    }

    fn add_share(&self, owner_id: &str, file_id: &Uuid, target: &str) -> Result<bool> {
        update_locked(&self.manifest_path(owner_id, file_id)?, |m: &mut Manifest| {
            m.shared_with.insert(target.to_string())
        })?
        .ok_or_else(|| CaskError::NotFound(format!("file {owner_id}/{file_id}")))
    }
}
