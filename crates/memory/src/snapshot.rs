//! Snapshot persistence: store contents and pulse history in one JSON file.
//!
//! Format: `{"saved_at": ..., "fragments": [...], "pulse": {"tick_counter",
//! "active_ticks", "last_heartbeat"}}`. Writes go to a sibling temp file
//! that is renamed into place, so a crash mid-write keeps the previous
//! snapshot.

use chrono::{DateTime, Utc};
use mnemo_core::Fragment;
use mnemo_core::error::MemoryError;
use mnemo_core::pulse::PulseRecord;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default = "Utc::now")]
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub fragments: Vec<Fragment>,
    #[serde(default)]
    pub pulse: PulseRecord,
}

impl Snapshot {
    pub fn new(fragments: Vec<Fragment>, pulse: PulseRecord) -> Self {
        Self {
            saved_at: Utc::now(),
            fragments,
            pulse,
        }
    }
}

/// A snapshot file on disk.
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the snapshot, creating parent directories as needed.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<(), MemoryError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                MemoryError::Snapshot(format!("Failed to create snapshot directory: {e}"))
            })?;
        }

        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| MemoryError::Snapshot(format!("Failed to serialize snapshot: {e}")))?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| MemoryError::Snapshot(format!("Failed to write snapshot: {e}")))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| MemoryError::Snapshot(format!("Failed to replace snapshot: {e}")))?;

        info!(
            path = %self.path.display(),
            fragments = snapshot.fragments.len(),
            "Snapshot saved"
        );
        Ok(())
    }

    /// Read the snapshot. A missing file is `Ok(None)`; a corrupt one is an error.
    pub async fn load(&self) -> Result<Option<Snapshot>, MemoryError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No snapshot found");
                return Ok(None);
            }
            Err(e) => {
                return Err(MemoryError::Snapshot(format!(
                    "Failed to read snapshot: {e}"
                )));
            }
        };

        let snapshot: Snapshot = serde_json::from_str(&content).map_err(|e| {
            MemoryError::Snapshot(format!(
                "Corrupt snapshot at {}: {e}",
                self.path.display()
            ))
        })?;
        debug!(
            path = %self.path.display(),
            fragments = snapshot.fragments.len(),
            "Snapshot loaded"
        );
        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn sample() -> Snapshot {
        let compacted = Fragment {
            id: "cf-0011223344556677".into(),
            content: "deploy failed on staging".into(),
            created_at: Utc::now(),
            embedding: Some(vec![0.1, -0.25, 1.0 / 3.0]),
            source_refs: BTreeSet::from(["a".to_string(), "b".to_string()]),
        };
        Snapshot::new(
            vec![compacted, Fragment::new("plain fragment").with_id("c")],
            PulseRecord {
                tick_counter: 42,
                active_ticks: vec![3, 17, 40],
                last_heartbeat: Some(1234.5678),
            },
        )
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let file = SnapshotFile::new(dir.path().join("nested").join("snapshot.json"));

        let snapshot = sample();
        file.save(&snapshot).await.unwrap();
        let loaded = file.load().await.unwrap().unwrap();
        assert_eq!(loaded, snapshot);

        // No temp file left behind
        assert!(!dir.path().join("nested").join("snapshot.json.tmp").exists());
    }

    #[tokio::test]
    async fn missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let file = SnapshotFile::new(dir.path().join("absent.json"));
        assert!(file.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshot.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = SnapshotFile::new(&path).load().await.unwrap_err();
        assert!(matches!(err, MemoryError::Snapshot(_)));
    }

    #[tokio::test]
    async fn minimal_document_loads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshot.json");
        std::fs::write(
            &path,
            r#"{"fragments": [{"id": "x", "content": "hi", "created_at": "2025-03-01T12:00:00Z"}],
                "pulse": {"tick_counter": 5, "active_ticks": [1, 4]}}"#,
        )
        .unwrap();

        let snapshot = SnapshotFile::new(&path).load().await.unwrap().unwrap();
        assert_eq!(snapshot.fragments.len(), 1);
        assert_eq!(snapshot.pulse.tick_counter, 5);
        assert_eq!(snapshot.pulse.last_heartbeat, None);
    }
}
