//! Object storage for compressed chunk blobs.
//!
//! Keys are opaque strings; chunks live under `chunks/<hex id>`. Every object
//! carries its declared content encoding so readers know how to decode it.

use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::codec::ChunkId;
use crate::error::{CaskError, Result, StorageContext};

pub fn chunk_key(id: &ChunkId) -> String {
    format!("chunks/{}", id.to_hex())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentEncoding {
    Identity,
    Zstd,
}

impl ContentEncoding {
    pub const ALL: [ContentEncoding; 2] = [ContentEncoding::Zstd, ContentEncoding::Identity];

    pub fn as_str(self) -> &'static str {
        match self {
            ContentEncoding::Identity => "identity",
            ContentEncoding::Zstd => "zstd",
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            ContentEncoding::Identity => "",
            ContentEncoding::Zstd => ".zst",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Object {
    pub body: Vec<u8>,
    pub encoding: ContentEncoding,
}

pub trait BlobStore: Send + Sync {
    /// Store `body` at `key`. Rewriting an existing key replaces it atomically.
    fn put(&self, key: &str, body: &[u8], encoding: ContentEncoding) -> Result<()>;

    /// Fetch an object; `Ok(None)` when nothing is stored at `key`.
    fn get(&self, key: &str) -> Result<Option<Object>>;

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// Thread-safe in-process store, used for tests and embedding.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<String, Object>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.objects.read().map_err(|_| poisoned())?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Drop an object, simulating loss in the backing store.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let mut m = self.objects.write().map_err(|_| poisoned())?;
        Ok(m.remove(key).is_some())
    }

    /// Replace an object's body in place, simulating bit rot.
    pub fn overwrite(&self, key: &str, body: Vec<u8>) -> Result<bool> {
        let mut m = self.objects.write().map_err(|_| poisoned())?;
        Ok(match m.get_mut(key) {
            Some(obj) => {
                obj.body = body;
                true
            }
            None => false,
        })
    }
}

fn poisoned() -> CaskError {
    CaskError::storage("memory blob store", "lock poisoned")
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, key: &str, body: &[u8], encoding: ContentEncoding) -> Result<()> {
        let mut m = self.objects.write().map_err(|_| poisoned())?;
        m.insert(key.to_string(), Object { body: body.to_vec(), encoding });
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Object>> {
        let m = self.objects.read().map_err(|_| poisoned())?;
        Ok(m.get(key).cloned())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let m = self.objects.read().map_err(|_| poisoned())?;
        Ok(m.contains_key(key))
    }
}

/// Directory-backed store: `{root}/{key}{encoding suffix}`.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).storage_context(|| format!("create dir {:?}", root))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// On-disk location of `key` stored with `encoding`.
    pub fn path_for(&self, key: &str, encoding: ContentEncoding) -> Result<PathBuf> {
        if key.is_empty()
            || key.starts_with('/')
            || key.split('/').any(|c| c.is_empty() || c == "." || c == "..")
        {
            return Err(CaskError::InvalidInput(format!("bad object key {key:?}")));
        }
        Ok(self.root.join(format!("{key}{}", encoding.suffix())))
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, key: &str, body: &[u8], encoding: ContentEncoding) -> Result<()> {
        let path = self.path_for(key, encoding)?;
        write_atomic(&path, body)
    }

    fn get(&self, key: &str) -> Result<Option<Object>> {
        for encoding in ContentEncoding::ALL {
            let path = self.path_for(key, encoding)?;
            match fs::read(&path) {
                Ok(body) => return Ok(Some(Object { body, encoding })),
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(CaskError::storage(format!("read {:?}", path), e)),
            }
        }
        Ok(None)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        for encoding in ContentEncoding::ALL {
            if self.path_for(key, encoding)?.is_file() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Write via a sibling temp file and rename so readers never see a partial object.
fn write_atomic(path: &Path, body: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| CaskError::InvalidInput(format!("no parent dir for {:?}", path)))?;
    fs::create_dir_all(dir).storage_context(|| format!("create dir {:?}", dir))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .storage_context(|| format!("create temp in {:?}", dir))?;
    tmp.write_all(body).storage_context(|| format!("write temp for {:?}", path))?;
    tmp.as_file().sync_all().storage_context(|| format!("sync temp for {:?}", path))?;
    tmp.persist(path).map_err(|e| CaskError::storage(format!("persist {:?}", path), e.error))?;
    Ok(())
}
