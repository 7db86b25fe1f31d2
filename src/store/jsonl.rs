// JSONL write log operations

use crate::path::StorePath;
use eyre::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{info, warn};

/// One line of the write log: the value written at a path (`null` = delete)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteEntry {
    pub path: String,
    pub value: Value,
    pub updated_at: i64,
}

impl WriteEntry {
    pub fn new(path: &StorePath, value: Value) -> Self {
        Self {
            path: path.as_string(),
            value,
            updated_at: now_ms(),
        }
    }
}

/// The write log, held open under an exclusive lock until dropped
///
/// Reading, appending and stamping all happen through one handle so no other
/// writer can slip an entry in between them.
pub struct LockedLog {
    file: File,
    path: PathBuf,
}

impl LockedLog {
    /// Open (creating if missing) and lock the log, blocking until the lock is free
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .context("Failed to open JSONL file")?;

        file.lock_exclusive().context("Failed to acquire file lock")?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Modification time (ms) and length of the log as it is now
    pub fn stamp(&self) -> Result<(i64, i64)> {
        let metadata = self.file.metadata().context("Failed to stat JSONL file")?;
        let mtime = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Ok((mtime, metadata.len() as i64))
    }

    pub fn append(&mut self, entry: &WriteEntry) -> Result<()> {
        let json = serde_json::to_string(entry)?;
        writeln!(self.file, "{}", json)?;
        self.file.sync_all()?; // Ensure data is flushed to disk
        Ok(())
    }

    /// Read every entry in file order
    ///
    /// Lines that cannot be read or parsed, or whose path is invalid, are
    /// skipped with a warning so one bad line does not hide the rest of the log.
    pub fn entries(&mut self) -> Result<Vec<(StorePath, WriteEntry)>> {
        self.file.seek(SeekFrom::Start(0))?;
        let path = &self.path;
        let reader = BufReader::new(&self.file);
        let mut entries = Vec::new();

        for (line_num, line) in reader.lines().enumerate() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    warn!(
                        file = ?path,
                        line = line_num + 1,
                        error = ?e,
                        "Failed to read line, skipping"
                    );
                    continue;
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            let entry: WriteEntry = match serde_json::from_str(&line) {
                Ok(e) => e,
                Err(e) => {
                    warn!(
                        file = ?path,
                        line = line_num + 1,
                        error = ?e,
                        "Failed to parse JSON, skipping"
                    );
                    continue;
                }
            };

            match StorePath::parse(&entry.path) {
                Ok(store_path) => entries.push((store_path, entry)),
                Err(e) => warn!(
                    file = ?path,
                    line = line_num + 1,
                    error = %e,
                    "Invalid path in write log, skipping"
                ),
            }
        }

        info!(file = ?path, count = entries.len(), "Loaded write log");

        Ok(entries)
    }
}

/// Current timestamp in milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
