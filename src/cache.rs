//! Disk cache for parsed files, so remote models are only walked once.
//!
//! Keys are FNV-64a hashed and stored as `<first-hex-char>/<full-hash>`
//! under the cache directory, with JSON payloads. A corrupt entry is
//! deleted on read and surfaced as `CacheCorrupted`.

use std::{
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use crate::{
    decode::file::GgufFile,
    error::{GgufError, GgufResult},
};

#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    /// Open (creating if needed) a cache rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> GgufResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| GgufError::from_io_error("cache directory", e))?;
        Ok(Self { dir })
    }

    /// Fetch a previously stored file. `expiration` of zero never expires;
    /// otherwise entries older than it count as missed and are dropped.
    pub fn get(&self, key: &str, expiration: Duration) -> GgufResult<GgufFile> {
        let path = self.path_for(key);
        let metadata = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(_) => {
                return Err(GgufError::CacheMissed {
                    key: key.to_string(),
                })
            }
        };
        if !expiration.is_zero() {
            let age = metadata
                .modified()
                .ok()
                .and_then(|m| SystemTime::now().duration_since(m).ok())
                .unwrap_or(Duration::ZERO);
            if age > expiration {
                tracing::debug!(key, ?age, "cache entry expired");
                let _ = std::fs::remove_file(&path);
                return Err(GgufError::CacheMissed {
                    key: key.to_string(),
                });
            }
        }
        let bytes = std::fs::read(&path).map_err(|e| GgufError::from_io_error("cache read", e))?;
        match serde_json::from_slice(&bytes) {
            Ok(file) => Ok(file),
            Err(e) => {
                let _ = std::fs::remove_file(&path);
                Err(GgufError::CacheCorrupted {
                    key: key.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    pub fn put(&self, key: &str, value: &GgufFile) -> GgufResult<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GgufError::from_io_error("cache directory", e))?;
        }
        let bytes = serde_json::to_vec(value).map_err(|e| GgufError::Io {
            field: "cache encode",
            source: std::io::Error::other(e),
        })?;
        std::fs::write(&path, bytes).map_err(|e| GgufError::from_io_error("cache write", e))
    }

    pub fn delete(&self, key: &str) -> GgufResult<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GgufError::from_io_error("cache delete", e)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let hash = format!("{:016x}", fnv64a(key));
        self.dir.join(&hash[..1]).join(hash)
    }
}

fn fnv64a(key: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET_BASIS;
    for byte in key.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}
