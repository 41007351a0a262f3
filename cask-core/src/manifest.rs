use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::codec::ChunkId;
use crate::error::{CaskError, Result};
use crate::meta::{CreateOutcome, MetadataStore};

/// Per-file record: the ordered chunk ids whose decompressed concatenation is
/// the original upload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Manifest {
    pub owner_id: String,
    pub file_id: Uuid,
    pub file_name: String,
    pub chunk_ids: Vec<ChunkId>,
    pub chunk_size: usize,
    pub original_size: u64,
    /// Fixed-width RFC 3339, so string order is time order.
    pub created_utc: String,
    pub version: u32,
    #[serde(default)]
    pub shared_with: BTreeSet<String>,
}

impl Manifest {
    pub fn new(
        owner_id: &str,
        file_name: &str,
        chunk_ids: Vec<ChunkId>,
        chunk_size: usize,
        original_size: u64,
    ) -> Self {
        Manifest {
            owner_id: owner_id.to_string(),
            file_id: Uuid::new_v4(),
            file_name: file_name.to_string(),
            chunk_ids,
            chunk_size,
            original_size,
            created_utc: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
            version: 1,
            shared_with: BTreeSet::new(),
        }
    }

    pub fn is_readable_by(&self, subject: &str) -> bool {
        self.owner_id == subject || self.shared_with.contains(subject)
    }
}

/// Commits manifests. Callers must only hand over manifests whose chunks are
/// already durably stored.
pub struct ManifestWriter<'a> {
    meta: &'a dyn MetadataStore,
}

impl<'a> ManifestWriter<'a> {
    pub fn new(meta: &'a dyn MetadataStore) -> Self {
        Self { meta }
    }

    pub fn commit(&self, manifest: &Manifest) -> Result<()> {
        if manifest.file_name.is_empty() {
            return Err(CaskError::InvalidInput("file name must be non-empty".into()));
        }
        match self.meta.create_manifest(manifest)? {
            CreateOutcome::Created => {
                tracing::info!(
                    owner = %manifest.owner_id,
                    file_id = %manifest.file_id,
                    chunks = manifest.chunk_ids.len(),
                    bytes = manifest.original_size,
                    "manifest committed"
                );
                Ok(())
            }
            CreateOutcome::AlreadyExists => Err(CaskError::storage(
                format!("commit manifest {}/{}", manifest.owner_id, manifest.file_id),
                "file id already taken",
            )),
        }
    }
}
