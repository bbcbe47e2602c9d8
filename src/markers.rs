//! Per-job marker files shared between the orchestrator and remote workers.
//!
//! Each job id owns four files in the logs directory:
//!
//! - `<id>.txt`: captured stdout/stderr of the payload
//! - `<id>.started`, `<id>.passed`, `<id>.failed`: zero-byte presence flags
//!
//! Presence is the only signal; flag contents are never read. There is no
//! locking: a marker is written only by the worker running that id, or
//! removed by a resubmission of the same id.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Started,
    Passed,
    Failed,
}

impl Marker {
    fn extension(self) -> &'static str {
        match self {
            Marker::Started => "started",
            Marker::Passed => "passed",
            Marker::Failed => "failed",
        }
    }
}

/// What the marker files currently say about one id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerState {
    NotStarted,
    Started,
    Passed,
    Failed,
}

impl MarkerState {
    pub fn is_finished(self) -> bool {
        matches!(self, MarkerState::Passed | MarkerState::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct MarkerStore {
    dir: PathBuf,
}

impl MarkerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    pub fn log_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.txt", id))
    }

    pub fn marker_path(&self, id: &str, marker: Marker) -> PathBuf {
        self.dir.join(format!("{}.{}", id, marker.extension()))
    }

    pub fn has(&self, id: &str, marker: Marker) -> bool {
        self.marker_path(id, marker).exists()
    }

    /// Create (or recreate) a zero-byte marker.
    pub fn touch(&self, id: &str, marker: Marker) -> Result<()> {
        self.ensure_dir()?;
        File::create(self.marker_path(id, marker))?;
        Ok(())
    }

    /// Started only counts toward a result when a pass/fail flag is also
    /// present; a lone pass/fail flag is treated as still started.
    pub fn state(&self, id: &str) -> MarkerState {
        let started = self.has(id, Marker::Started);
        if started && self.has(id, Marker::Passed) {
            MarkerState::Passed
        } else if started && self.has(id, Marker::Failed) {
            MarkerState::Failed
        } else if started {
            MarkerState::Started
        } else {
            MarkerState::NotStarted
        }
    }

    /// Remove the log and all three flags for `id`. Missing files are fine.
    pub fn clear(&self, id: &str) -> Result<()> {
        let paths = [
            self.log_path(id),
            self.marker_path(id, Marker::Started),
            self.marker_path(id, Marker::Passed),
            self.marker_path(id, Marker::Failed),
        ];
        for path in paths {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Delete the whole logs directory.
    pub fn remove_all(&self) -> Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn state_requires_started_before_result() {
        let dir = TempDir::new().unwrap();
        let store = MarkerStore::new(dir.path());

        assert_eq!(store.state("a"), MarkerState::NotStarted);
        store.touch("a", Marker::Passed).unwrap();
        assert_eq!(store.state("a"), MarkerState::NotStarted);
        store.touch("a", Marker::Started).unwrap();
        assert_eq!(store.state("a"), MarkerState::Passed);
    }

    #[test]
    fn clear_removes_every_file_for_id() {
        let dir = TempDir::new().unwrap();
        let store = MarkerStore::new(dir.path());

        std::fs::write(store.log_path("a"), "output").unwrap();
        store.touch("a", Marker::Started).unwrap();
        store.touch("a", Marker::Failed).unwrap();
        store.touch("b", Marker::Started).unwrap();

        store.clear("a").unwrap();

        assert!(!store.log_path("a").exists());
        assert!(!store.has("a", Marker::Started));
        assert!(!store.has("a", Marker::Failed));
        assert!(store.has("b", Marker::Started));
    }

    #[test]
    fn clear_of_unknown_id_is_ok() {
        let dir = TempDir::new().unwrap();
        let store = MarkerStore::new(dir.path().join("logs"));
        assert!(store.clear("nope").is_ok());
        assert!(store.remove_all().is_ok());
    }
}
