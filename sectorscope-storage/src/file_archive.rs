//! Single-file fallback archive.
//!
//! The archive is one JSON document holding the last statistics table and a
//! SHA-256 checksum of it. Saves write a sibling temp file, sync it, then
//! rename it over the target, so the file on disk is always either the old
//! table or the new one.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sectorscope_core::{content_hash_hex, Layer, PersistenceError, StatisticsTable, Timestamp};
use serde::{Deserialize, Serialize};

use crate::{FallbackArchive, StoredStatistics};

const FORMAT_VERSION: u32 = 1;

/// Error type for archive file operations.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveFileError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Malformed archive: {0}")]
    Malformed(String),

    #[error("Checksum mismatch: expected {expected}, found {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Unsupported archive format version {0}")]
    UnsupportedVersion(u32),

    #[error("Blocking task failed: {0}")]
    Task(String),
}

impl ArchiveFileError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        ArchiveFileError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn into_persistence(self, operation: &'static str) -> PersistenceError {
        match self {
            ArchiveFileError::Malformed(reason) => PersistenceError::Corrupted {
                layer: Layer::Archive,
                reason,
            },
            e @ (ArchiveFileError::ChecksumMismatch { .. }
            | ArchiveFileError::UnsupportedVersion(_)) => PersistenceError::Corrupted {
                layer: Layer::Archive,
                reason: e.to_string(),
            },
            other => PersistenceError::failed(Layer::Archive, operation, other.to_string()),
        }
    }
}

/// On-disk envelope. `payload` is the JSON text the checksum covers.
#[derive(Debug, Serialize, Deserialize)]
struct ArchiveEnvelope {
    format_version: u32,
    checksum: String,
    payload: String,
}

/// [`FallbackArchive`] backed by a single JSON file.
#[derive(Debug, Clone)]
pub struct FileArchive {
    path: PathBuf,
}

impl FileArchive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn write_blocking(
        path: &Path,
        temp: &Path,
        stored: &StoredStatistics,
    ) -> Result<(), ArchiveFileError> {
        let payload = serde_json::to_string(stored)
            .map_err(|e| ArchiveFileError::Serialization(e.to_string()))?;
        let envelope = ArchiveEnvelope {
            format_version: FORMAT_VERSION,
            checksum: content_hash_hex(payload.as_bytes()),
            payload,
        };
        let bytes = serde_json::to_vec_pretty(&envelope)
            .map_err(|e| ArchiveFileError::Serialization(e.to_string()))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| ArchiveFileError::io(parent, e))?;
        }

        let mut file = File::create(temp).map_err(|e| ArchiveFileError::io(temp, e))?;
        file.write_all(&bytes)
            .map_err(|e| ArchiveFileError::io(temp, e))?;
        file.sync_all().map_err(|e| ArchiveFileError::io(temp, e))?;
        drop(file);

        fs::rename(temp, path).map_err(|e| ArchiveFileError::io(path, e))
    }

    fn read_blocking(path: &Path) -> Result<Option<StoredStatistics>, ArchiveFileError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ArchiveFileError::io(path, e)),
        };

        let envelope: ArchiveEnvelope = serde_json::from_slice(&bytes)
            .map_err(|e| ArchiveFileError::Malformed(e.to_string()))?;
        if envelope.format_version != FORMAT_VERSION {
            return Err(ArchiveFileError::UnsupportedVersion(envelope.format_version));
        }

        let actual = content_hash_hex(envelope.payload.as_bytes());
        if actual != envelope.checksum {
            return Err(ArchiveFileError::ChecksumMismatch {
                expected: envelope.checksum,
                actual,
            });
        }

        serde_json::from_str(&envelope.payload)
            .map(Some)
            .map_err(|e| ArchiveFileError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl FallbackArchive for FileArchive {
    async fn save(
        &self,
        table: &StatisticsTable,
        computed_at: Timestamp,
    ) -> Result<(), PersistenceError> {
        let stored = StoredStatistics::new(table.clone(), computed_at);
        let path = self.path.clone();
        let temp = self.temp_path();
        tokio::task::spawn_blocking(move || Self::write_blocking(&path, &temp, &stored))
            .await
            .map_err(|e| ArchiveFileError::Task(e.to_string()).into_persistence("save"))?
            .map_err(|e| e.into_persistence("save"))
    }

    async fn load(&self) -> Result<Option<StoredStatistics>, PersistenceError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || Self::read_blocking(&path))
            .await
            .map_err(|e| ArchiveFileError::Task(e.to_string()).into_persistence("load"))?
            .map_err(|e| e.into_persistence("load"))
    }
}
