//! JSON snapshots of discovered positions.
//!
//! `all-positions.json` seeds the "all" set and the block the log scan
//! resumes from. `positions-to-watch.json` is a development override for
//! the filter result and is only read when present.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::position::{FilteredPositions, PositionSet};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid snapshot {path}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Every borrower seen so far and the last scanned block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllPositionsSnapshot {
    pub all_positions: PositionSet,
    pub last_block: u64,
}

impl AllPositionsSnapshot {
    /// Load the snapshot, or an empty one starting at block 0 when the file
    /// does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, SnapshotError> {
        Ok(read_json(path)?.unwrap_or_default())
    }

    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        write_json(path, self)?;
        info!(
            path = %path.display(),
            positions = self.all_positions.len(),
            last_block = self.last_block,
            "Saved all positions"
        );
        Ok(())
    }
}

/// Load the positions-to-watch override if the file exists.
pub fn load_positions_to_watch(path: &Path) -> Result<Option<FilteredPositions>, SnapshotError> {
    read_json(path)
}

pub fn save_positions_to_watch(
    path: &Path,
    positions: &FilteredPositions,
) -> Result<(), SnapshotError> {
    write_json(path, positions)?;
    info!(
        path = %path.display(),
        current = positions.current.len(),
        interesting = positions.interesting.len(),
        "Saved positions to watch"
    );
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, SnapshotError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "Snapshot not found");
            return Ok(None);
        }
        Err(source) => {
            return Err(SnapshotError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| SnapshotError::Format {
            path: path.to_path_buf(),
            source,
        })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), SnapshotError> {
    let write_error = |source| SnapshotError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_error)?;
    }

    let mut content = serde_json::to_string_pretty(value).map_err(|source| SnapshotError::Format {
        path: path.to_path_buf(),
        source,
    })?;
    content.push('\n');
    std::fs::write(path, content).map_err(write_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;

    #[test]
    fn test_missing_files() {
        let dir = tempfile::tempdir().unwrap();

        let all = AllPositionsSnapshot::load_or_default(&dir.path().join("all.json")).unwrap();
        assert!(all.all_positions.is_empty());
        assert_eq!(all.last_block, 0);

        let watch = load_positions_to_watch(&dir.path().join("watch.json")).unwrap();
        assert!(watch.is_none());
    }

    #[test]
    fn test_all_positions_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("all-positions.json");

        let snapshot = AllPositionsSnapshot {
            all_positions: vec![Address::repeat_byte(1), Address::repeat_byte(2)].into(),
            last_block: 21_000_000,
        };
        snapshot.save(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"allPositions\""));
        assert!(content.contains("\"lastBlock\": 21000000"));

        assert_eq!(AllPositionsSnapshot::load_or_default(&path).unwrap(), snapshot);
    }

    #[test]
    fn test_positions_to_watch_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions-to-watch.json");
        let positions = FilteredPositions {
            current: vec![Address::repeat_byte(1), Address::repeat_byte(2)].into(),
            interesting: vec![Address::repeat_byte(2)].into(),
        };

        save_positions_to_watch(&path, &positions).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"currentPositions\""));
        assert!(content.contains("\"interestingPositions\""));

        assert_eq!(load_positions_to_watch(&path).unwrap(), Some(positions));
    }

    #[test]
    fn test_malformed_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("all.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = AllPositionsSnapshot::load_or_default(&path).unwrap_err();
        assert!(matches!(err, SnapshotError::Format { .. }));
    }
}
