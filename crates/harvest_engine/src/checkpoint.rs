//! Durable partial-progress snapshots for checkpointed batches.
//!
//! The checkpoint is a JSON Lines side file: one fully processed record per
//! line, in processing order. Its line count is the resume offset. Only one
//! batch may use a given path at a time.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use engine_logging::{engine_debug, engine_info, engine_warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// A processed record that can be matched back to its input by key.
pub trait CheckpointRecord: Serialize + DeserializeOwned {
    fn key(&self) -> &str;
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("checkpoint {path:?} line {line} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode checkpoint record: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resume<T> {
    /// Records `[0, offset)` were completed by an earlier run.
    pub offset: usize,
    pub records: Vec<T>,
}

impl<T> Resume<T> {
    pub fn fresh() -> Self {
        Self {
            offset: 0,
            records: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// A missing or empty file means "start from zero".
    ///
    /// A final line without its newline is the trace of an interrupted
    /// append: if it does not parse it is cut off the file, and if it does
    /// the newline is restored. Damage on any complete line is `Corrupt`.
    pub fn load<T: DeserializeOwned>(&self) -> Result<Resume<T>, CheckpointError> {
        let content = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Resume::fresh()),
            Err(err) => return Err(self.io_error(err)),
        };

        let complete_len = content
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |i| i + 1);
        let (complete, tail) = content.split_at(complete_len);

        let mut records = Vec::new();
        // The segment after the last newline is the tail's line.
        let mut tail_line = 1;
        for (i, line) in complete.split(|&b| b == b'\n').enumerate() {
            tail_line = i + 1;
            if is_blank(line) {
                continue;
            }
            let record = serde_json::from_slice(line).map_err(|source| CheckpointError::Corrupt {
                path: self.path.clone(),
                line: i + 1,
                source,
            })?;
            records.push(record);
        }

        if !is_blank(tail) {
            match serde_json::from_slice(tail) {
                Ok(record) => {
                    records.push(record);
                    self.restore_newline()?;
                }
                Err(err) => {
                    engine_warn!(
                        "checkpoint {:?}: dropping torn line {} ({}); its record will be redone",
                        self.path,
                        tail_line,
                        err
                    );
                    self.truncate(complete_len as u64)?;
                }
            }
        }

        if !records.is_empty() {
            engine_info!(
                "resuming from checkpoint {:?}: {} records already done",
                self.path,
                records.len()
            );
        }
        Ok(Resume {
            offset: records.len(),
            records,
        })
    }

    /// Appends `records` and syncs the file before returning.
    pub fn append<T: Serialize>(&self, records: &[T]) -> Result<(), CheckpointError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut buffer = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buffer, record)?;
            buffer.push(b'\n');
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        file.write_all(&buffer)
            .and_then(|_| file.flush())
            .and_then(|_| file.sync_all())
            .map_err(|e| self.io_error(e))?;

        engine_debug!("checkpoint {:?}: appended {} records", self.path, records.len());
        Ok(())
    }

    /// Deletes the checkpoint. Call only once the whole batch has succeeded.
    pub fn clear(&self) -> Result<(), CheckpointError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                engine_info!("checkpoint {:?} cleared", self.path);
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.io_error(err)),
        }
    }

    fn truncate(&self, len: u64) -> Result<(), CheckpointError> {
        let file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        file.set_len(len)
            .and_then(|_| file.sync_all())
            .map_err(|e| self.io_error(e))
    }

    fn restore_newline(&self) -> Result<(), CheckpointError> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        file.write_all(b"\n")
            .and_then(|_| file.sync_all())
            .map_err(|e| self.io_error(e))
    }

    fn io_error(&self, source: io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}
