//! # snapshot
//!
//! why: bound recovery time by restarting from a stored state instead of the first record
//! relations: taken and restored by partition.rs, files written with raft-storage's write_atomic
//! what: Snapshot, SnapshotStore, InMemorySnapshotStore, FileSnapshotStore

use crate::error::{EngineError, Result};
use crate::state::PartitionState;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const PREFIX: &str = "snapshot-";
const SUFFIX: &str = ".json";

/// partition state after applying every record up to and including `position`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub position: u64,
    pub state: PartitionState,
}

pub trait SnapshotStore: Send {
    /// durably store `snapshot`; older snapshots may be discarded
    fn store(&mut self, snapshot: &Snapshot) -> Result<()>;

    /// the snapshot with the highest position, if any
    fn latest(&self) -> Result<Option<Snapshot>>;
}

#[derive(Debug, Default, Clone)]
pub struct InMemorySnapshotStore {
    latest: Option<Snapshot>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn store(&mut self, snapshot: &Snapshot) -> Result<()> {
        let newer = self
            .latest
            .as_ref()
            .map_or(true, |current| snapshot.position >= current.position);
        if newer {
            self.latest = Some(snapshot.clone());
        }
        Ok(())
    }

    fn latest(&self) -> Result<Option<Snapshot>> {
        Ok(self.latest.clone())
    }
}

/// one json file per snapshot, named after its position; only the newest is kept
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, position: u64) -> PathBuf {
        self.dir.join(format!("{}{:020}{}", PREFIX, position, SUFFIX))
    }

    /// positions of the snapshot files in the directory, ascending
    fn positions(&self) -> Result<Vec<u64>> {
        let mut positions = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let position = name
                .strip_prefix(PREFIX)
                .and_then(|rest| rest.strip_suffix(SUFFIX))
                .and_then(|digits| digits.parse::<u64>().ok());
            if let Some(position) = position {
                positions.push(position);
            }
        }
        positions.sort_unstable();
        Ok(positions)
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn store(&mut self, snapshot: &Snapshot) -> Result<()> {
        let bytes = serde_json::to_vec(snapshot)?;
        raft_storage::write_atomic(&self.path(snapshot.position), &bytes)?;
        debug!(position = snapshot.position, dir = %self.dir.display(), "snapshot stored");

        for position in self.positions()? {
            if position < snapshot.position {
                if let Err(e) = fs::remove_file(self.path(position)) {
                    warn!(position, error = %e, "failed to remove old snapshot");
                }
            }
        }
        Ok(())
    }

    fn latest(&self) -> Result<Option<Snapshot>> {
        let Some(position) = self.positions()?.last().copied() else {
            return Ok(None);
        };
        let path = self.path(position);
        let bytes = fs::read(&path)?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::Snapshot(format!("{}: {}", path.display(), e)))?;
        Ok(Some(snapshot))
    }
}
