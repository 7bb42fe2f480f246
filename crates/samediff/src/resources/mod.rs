//! Test/model resource resolution with a content-addressed local cache.
//!
//! A resource name resolves through, in order:
//!   1. a direct file under one of the configured search directories;
//!   2. a `<name>.resource_reference` JSON sidecar naming the content hash,
//!      which is then looked up in the cache at `<cache>/<hash[..2]>/<hash>`.
//!
//! Cached content is verified against the reference hash and size on every
//! resolve, so a corrupted cache entry surfaces as an error rather than bad
//! data.

mod sha256;

pub use sha256::{sha256, sha256_hex};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("resource '{0}' not found in any search directory")]
    NotFound(String),
    #[error("resource '{name}': cache entry for {sha256} is missing")]
    NotCached { name: String, sha256: String },
    #[error("resource '{name}': content hash mismatch (expected {expected}, got {actual})")]
    HashMismatch {
        name: String,
        expected: String,
        actual: String,
    },
    #[error("resource '{name}': size mismatch (expected {expected}, got {actual})")]
    SizeMismatch {
        name: String,
        expected: u64,
        actual: u64,
    },
    #[error("malformed resource reference '{name}': {source}")]
    BadReference {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Sidecar contents pointing at content-addressed data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceReference {
    pub sha256: String,
    pub size: u64,
}

/// Resolves resource names to local paths.
#[derive(Debug, Clone)]
pub struct ResourceResolver {
    search_dirs: Vec<PathBuf>,
    cache_dir: PathBuf,
}

impl ResourceResolver {
    pub fn new(search_dirs: Vec<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        ResourceResolver {
            search_dirs,
            cache_dir: cache_dir.into(),
        }
    }

    /// Resolves `name` to an on-disk path.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, ResourceError> {
        for dir in &self.search_dirs {
            let direct = dir.join(name);
            if direct.is_file() {
                log::debug!("resource '{name}' resolved directly at {}", direct.display());
                return Ok(direct);
            }
            let reference = dir.join(format!("{name}.resource_reference"));
            if reference.is_file() {
                return self.resolve_reference(name, &reference);
            }
        }
        Err(ResourceError::NotFound(name.to_string()))
    }

    fn resolve_reference(
        &self,
        name: &str,
        reference_path: &Path,
    ) -> Result<PathBuf, ResourceError> {
        let text = fs::read_to_string(reference_path)?;
        let reference: ResourceReference =
            serde_json::from_str(&text).map_err(|source| ResourceError::BadReference {
                name: name.to_string(),
                source,
            })?;
        let cached = self.cache_path(&reference.sha256);
        if !cached.is_file() {
            return Err(ResourceError::NotCached {
                name: name.to_string(),
                sha256: reference.sha256,
            });
        }
        let data = fs::read(&cached)?;
        if data.len() as u64 != reference.size {
            return Err(ResourceError::SizeMismatch {
                name: name.to_string(),
                expected: reference.size,
                actual: data.len() as u64,
            });
        }
        let actual = sha256_hex(&data);
        if actual != reference.sha256 {
            return Err(ResourceError::HashMismatch {
                name: name.to_string(),
                expected: reference.sha256,
                actual,
            });
        }
        log::debug!("resource '{name}' resolved from cache at {}", cached.display());
        Ok(cached)
    }

    /// Stores `data` in the cache under its content hash, returning the
    /// reference to record in a sidecar.
    pub fn store(&self, data: &[u8]) -> Result<ResourceReference, ResourceError> {
        let hash = sha256_hex(data);
        let path = self.cache_path(&hash);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        if !path.exists() {
            fs::write(&path, data)?;
        }
        Ok(ResourceReference {
            sha256: hash,
            size: data.len() as u64,
        })
    }

    fn cache_path(&self, sha256: &str) -> PathBuf {
        let prefix = &sha256[..2.min(sha256.len())];
        self.cache_dir.join(prefix).join(sha256)
    }
}
