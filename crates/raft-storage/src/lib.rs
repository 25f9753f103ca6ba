//! # raft-storage
//!
//! why: provide durable persistence for raft state using standard rust fs apis
//! relations: implements raft-core's Log and MetaStore traits, used by broker-engine partitions
//! what: FileStorage directory layout, FileMetaStore (meta.json), FileLog (log.jsonl)

use raft_core::{Configuration, Endpoint, Log, LogEntry, MetaStore, StorageError};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// write `bytes` to `path` through a synced temp file and a rename
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

// -- directory layout --

/// root directory holding one sub directory per partition
///
/// each partition directory contains:
/// - meta.json: term, vote and last committed configuration
/// - log.jsonl: one log entry per line
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// creates the directory if it doesn't exist
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn partition_dir(&self, partition_id: u32) -> PathBuf {
        self.dir.join(format!("partition-{}", partition_id))
    }

    /// open (or create) the log and meta store of a partition
    pub fn open_partition(&self, partition_id: u32) -> Result<(FileLog, FileMetaStore), StorageError> {
        let dir = self.partition_dir(partition_id);
        Ok((FileLog::open(&dir)?, FileMetaStore::open(&dir)?))
    }
}

// -- file meta store --

/// metadata structure for term, vote and configuration
#[derive(serde::Serialize, serde::Deserialize, Default, Clone)]
struct MetaData {
    term: u64,
    voted_for: Option<Endpoint>,
    configuration: Option<Configuration>,
}

/// meta store kept in a single json file, rewritten atomically on every change
pub struct FileMetaStore {
    path: PathBuf,
    meta: MetaData,
}

impl FileMetaStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join("meta.json");
        let meta = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            MetaData::default() // default for new nodes
        };
        Ok(Self { path, meta })
    }

    fn persist(&mut self, meta: MetaData) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(&meta)?;
        write_atomic(&self.path, json.as_bytes())?;
        self.meta = meta;
        Ok(())
    }
}

impl MetaStore for FileMetaStore {
    fn load_term(&self) -> Result<u64, StorageError> {
        Ok(self.meta.term)
    }

    fn load_vote(&self) -> Result<Option<Endpoint>, StorageError> {
        Ok(self.meta.voted_for.clone())
    }

    fn store_term_and_vote(
        &mut self,
        term: u64,
        vote: Option<&Endpoint>,
    ) -> Result<(), StorageError> {
        let meta = MetaData {
            term,
            voted_for: vote.cloned(),
            ..self.meta.clone()
        };
        self.persist(meta)
    }

    fn store_vote(&mut self, vote: &Endpoint) -> Result<(), StorageError> {
        let meta = MetaData {
            voted_for: Some(vote.clone()),
            ..self.meta.clone()
        };
        self.persist(meta)
    }

    fn load_configuration(&self) -> Result<Option<Configuration>, StorageError> {
        Ok(self.meta.configuration.clone())
    }

    fn store_configuration(&mut self, configuration: &Configuration) -> Result<(), StorageError> {
        let meta = MetaData {
            configuration: Some(configuration.clone()),
            ..self.meta.clone()
        };
        self.persist(meta)
    }
}

// -- file log --

/// append-only log file with one json entry per line
///
/// entries are also held in memory; appends are synced before returning,
/// truncation rewrites the file atomically
pub struct FileLog {
    path: PathBuf,
    entries: Vec<LogEntry>,
    file: File,
}

impl FileLog {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join("log.jsonl");

        let mut entries: Vec<LogEntry> = Vec::new();
        let mut torn = false;
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<LogEntry>(&line) {
                    Ok(entry) if entry.position == entries.len() as u64 + 1 => entries.push(entry),
                    Ok(entry) => {
                        return Err(StorageError::NonContiguous {
                            position: entry.position,
                            expected: entries.len() as u64 + 1,
                        })
                    }
                    Err(e) => {
                        // only the last line can be half written by a crash
                        warn!(path = %path.display(), error = %e, "dropping torn log tail");
                        torn = true;
                        break;
                    }
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut log = Self {
            path,
            entries,
            file,
        };
        if torn {
            log.rewrite()?;
        }
        debug!(path = %log.path.display(), entries = log.entries.len(), "log opened");
        Ok(log)
    }

    fn rewrite(&mut self) -> Result<(), StorageError> {
        let mut contents = Vec::new();
        for entry in &self.entries {
            serde_json::to_writer(&mut contents, entry)?;
            contents.push(b'\n');
        }
        write_atomic(&self.path, &contents)?;
        self.file = OpenOptions::new().append(true).open(&self.path)?;
        Ok(())
    }
}

impl Log for FileLog {
    fn append(&mut self, entry: LogEntry) -> Result<u64, StorageError> {
        let expected = self.last_position() + 1;
        if entry.position != expected {
            return Err(StorageError::NonContiguous {
                position: entry.position,
                expected,
            });
        }
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.file.sync_data()?;
        self.entries.push(entry);
        Ok(expected)
    }

    fn read(&self, position: u64) -> Option<LogEntry> {
        if position == 0 {
            return None;
        }
        self.entries.get(position as usize - 1).cloned()
    }

    fn last_position(&self) -> u64 {
        self.entries.len() as u64
    }

    fn term_at(&self, position: u64) -> Option<u64> {
        if position == 0 {
            return Some(0);
        }
        self.entries.get(position as usize - 1).map(|e| e.term)
    }

    fn entries_from(&self, position: u64, max: usize) -> Vec<LogEntry> {
        let start = position.max(1) as usize - 1;
        self.entries.iter().skip(start).take(max).cloned().collect()
    }

    fn truncate_from(&mut self, position: u64) -> Result<(), StorageError> {
        let keep = position.max(1) as usize - 1;
        if keep >= self.entries.len() {
            return Ok(());
        }
        self.entries.truncate(keep);
        self.rewrite()
    }
}
