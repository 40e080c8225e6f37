//! Versioned JSON snapshot files with crash-safe replacement.
//!
//! Every save writes a temporary sibling, syncs it and renames it over the
//! target, so a crash leaves either the old or the new snapshot on disk.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt snapshot {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Unsupported schema version {found} in {path} (supported up to {supported})")]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        supported: u32,
    },
}

/// A single durable JSON document tagged with `schema_version`.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
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

    fn io_error(&self, source: std::io::Error) -> SnapshotError {
        SnapshotError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Load the document, or `None` when the file does not exist yet.
    ///
    /// Documents newer than `supported_version` are refused.
    pub async fn load<T: DeserializeOwned>(
        &self,
        supported_version: u32,
    ) -> Result<Option<T>, SnapshotError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };

        let value: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| SnapshotError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        let raw_version = value
            .get("schema_version")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| SnapshotError::Corrupt {
                path: self.path.clone(),
                reason: "missing schema_version".to_string(),
            })?;
        let found = u32::try_from(raw_version).map_err(|_| SnapshotError::Corrupt {
            path: self.path.clone(),
            reason: format!("schema_version {raw_version} out of range"),
        })?;

        if found > supported_version {
            return Err(SnapshotError::UnsupportedVersion {
                path: self.path.clone(),
                found,
                supported: supported_version,
            });
        }

        let document = serde_json::from_value(value).map_err(|e| SnapshotError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        info!(path = %self.path.display(), schema_version = found, "Loaded snapshot");
        Ok(Some(document))
    }

    /// Atomically replace the document on disk.
    pub async fn save<T: Serialize>(&self, document: &T) -> Result<(), SnapshotError> {
        let bytes = serde_json::to_vec_pretty(document).map_err(|e| SnapshotError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.io_error(e))?;
            }
        }

        let temp_path = self.temp_path();
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| self.io_error(e))?;
        file.write_all(&bytes).await.map_err(|e| self.io_error(e))?;
        file.sync_all().await.map_err(|e| self.io_error(e))?;
        drop(file);

        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        debug!(path = %self.path.display(), bytes = bytes.len(), "Saved snapshot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        schema_version: u32,
        items: Vec<String>,
    }

    #[tokio::test]
    async fn test_missing_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("absent.json"));
        let loaded: Option<Doc> = file.load(1).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_save_replaces_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("nested").join("doc.json"));

        for n in 0..3 {
            let doc = Doc {
                schema_version: 1,
                items: vec![format!("item-{n}")],
            };
            file.save(&doc).await.unwrap();
        }

        let loaded: Doc = file.load(1).await.unwrap().unwrap();
        assert_eq!(loaded.items, vec!["item-2".to_string()]);
        assert!(!file.temp_path().exists());
    }

    #[tokio::test]
    async fn test_newer_version_refused() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("doc.json"));
        file.save(&Doc {
            schema_version: 7,
            items: vec![],
        })
        .await
        .unwrap();

        let err = file.load::<Doc>(1).await.unwrap_err();
        assert!(matches!(err, SnapshotError::UnsupportedVersion { found: 7, .. }));
    }

    #[tokio::test]
    async fn test_garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, b"{not json").unwrap();

        let err = SnapshotFile::new(&path).load::<Doc>(1).await.unwrap_err();
        assert!(matches!(err, SnapshotError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_oversized_version_is_corrupt_not_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        // 2^32 + 1 would wrap to 1 under a plain cast
        std::fs::write(&path, br#"{"schema_version": 4294967297, "items": []}"#).unwrap();

        let err = SnapshotFile::new(&path).load::<Doc>(1).await.unwrap_err();
        assert!(matches!(err, SnapshotError::Corrupt { ref reason, .. } if reason.contains("out of range")));
    }
}
