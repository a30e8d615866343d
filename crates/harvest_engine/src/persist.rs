use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("output directory {path:?} missing or not writable: {reason}")]
    OutputDir { path: PathBuf, reason: String },
    #[error("io error writing {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PersistError {
    fn io(path: &Path, source: io::Error) -> Self {
        PersistError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Ensure output directory exists, creating parents as needed.
pub fn ensure_output_dir(dir: &Path) -> Result<(), PersistError> {
    let fail = |reason: String| PersistError::OutputDir {
        path: dir.to_path_buf(),
        reason,
    };
    if dir.exists() {
        let meta = fs::metadata(dir).map_err(|e| fail(e.to_string()))?;
        if !meta.is_dir() {
            return Err(fail("path is not a directory".into()));
        }
    } else {
        fs::create_dir_all(dir).map_err(|e| fail(e.to_string()))?;
    }
    Ok(())
}

/// Writes `{dir}/{filename}` through a synced temp file and a rename, so
/// readers see either the previous content or the new one, never a mix.
/// An existing file is replaced.
#[derive(Debug, Clone)]
pub struct AtomicFileWriter {
    dir: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write(&self, filename: &str, content: &[u8]) -> Result<PathBuf, PersistError> {
        ensure_output_dir(&self.dir)?;

        let target = self.dir.join(filename);
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|e| PersistError::io(&target, e))?;
        tmp.write_all(content)
            .and_then(|_| tmp.flush())
            .and_then(|_| tmp.as_file_mut().sync_all())
            .map_err(|e| PersistError::io(&target, e))?;

        tmp.persist(&target)
            .map_err(|e| PersistError::io(&target, e.error))?;
        Ok(target)
    }
}
