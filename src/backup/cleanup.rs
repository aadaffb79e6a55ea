// mysqlbackup/src/backup/cleanup.rs
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Removes a file, treating "already gone" as success.
pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// A local backup file that is deleted when the guard goes out of scope,
/// whichever way the owning scope is left (return, `?`, panic, cancellation).
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    armed: bool,
}

impl TempArtifact {
    pub fn new(path: PathBuf) -> Self {
        TempArtifact { path, armed: true }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hands the file over to the caller without deleting it.
    pub fn keep(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match remove_if_exists(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed temporary backup file"),
            Err(e) => tracing::error!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove temporary backup file"
            ),
        }
    }
}
