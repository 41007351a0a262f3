use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chunker::DEFAULT_CHUNK_SIZE;
use crate::codec::DEFAULT_COMPRESSION_LEVEL;
use crate::error::{CaskError, Result};
use crate::identity::validate_subject;

pub const CONFIG_FILE_NAME: &str = "cask.toml";

/// Retrieval handles are meant to be short-lived.
pub const MAX_HANDLE_TTL_SECS: u64 = 24 * 60 * 60;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Root for objects, metadata and scratch downloads.
    pub data_dir: PathBuf,
    pub chunk_size: usize,
    pub compression_level: i32,
    /// Upper bound on chunk tasks in flight for one upload or download.
    pub max_parallel_chunks: usize,
    pub handle_ttl_secs: u64,
    /// Subjects allowed to read the cross-user usage report.
    pub admins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".cask"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            max_parallel_chunks: 8,
            handle_ttl_secs: 60,
            admins: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: Config =
            toml::from_str(s).map_err(|e| CaskError::InvalidInput(format!("config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .map_err(|e| CaskError::storage(format!("read config {:?}", path), e))?;
        Self::from_toml_str(&s)
    }

    /// Explicit file if given, else `<data_dir>/cask.toml` when present, else defaults.
    pub fn discover(explicit: Option<&Path>, data_dir: Option<&Path>) -> Result<Self> {
        if let Some(p) = explicit {
            return Self::load(p);
        }
        let dir = data_dir.map(Path::to_path_buf).unwrap_or_else(|| Config::default().data_dir);
        let candidate = dir.join(CONFIG_FILE_NAME);
        let mut cfg = if candidate.is_file() { Self::load(&candidate)? } else { Config::default() };
        if data_dir.is_some() {
            cfg.data_dir = dir;
        }
        Ok(cfg)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| CaskError::InvalidInput(format!("config: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(CaskError::InvalidInput("chunk_size must be > 0".into()));
        }
        if self.max_parallel_chunks == 0 {
            return Err(CaskError::InvalidInput("max_parallel_chunks must be > 0".into()));
        }
        if self.handle_ttl_secs == 0 || self.handle_ttl_secs > MAX_HANDLE_TTL_SECS {
            return Err(CaskError::InvalidInput(format!(
                "handle_ttl_secs must be in 1..={MAX_HANDLE_TTL_SECS}"
            )));
        }
        for admin in &self.admins {
            validate_subject(admin)?;
        }
        if !zstd::compression_level_range().contains(&self.compression_level) {
            return Err(CaskError::InvalidInput(format!(
                "compression_level {} out of range",
                self.compression_level
            )));
        }
        Ok(())
    }

    pub fn is_admin(&self, subject: &str) -> bool {
        self.admins.iter().any(|a| a == subject)
    }

    pub fn handle_ttl(&self) -> Duration {
        Duration::from_secs(self.handle_ttl_secs)
    }
}
