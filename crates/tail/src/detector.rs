//! Store-wide dirty bit from the write-ahead log's modification time.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::warn;

/// Reports whether the mutation signal file changed since the last poll.
///
/// Any write to any conversation table touches the shared log, so one
/// timestamp comparison stands in for per-table polling. Two writes within
/// the filesystem's timestamp granularity can collapse into one change.
#[derive(Debug)]
pub struct ChangeDetector {
    path: PathBuf,
    last: Option<SystemTime>,
}

impl ChangeDetector {
    /// Watch `path`, taking its current modification time as the baseline.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let last = modified(&path);
        Self { path, last }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the baseline without reporting a change.
    pub fn rearm(&mut self) {
        self.last = modified(&self.path);
    }

    /// `true` exactly when the modification time differs from the last
    /// observed one. A missing file counts as its own observed state.
    pub fn poll(&mut self) -> bool {
        let current = modified(&self.path);
        if current != self.last {
            self.last = current;
            true
        } else {
            false
        }
    }

    /// `true` while the last observed modification time is less than
    /// `window` old. A later write inside that window can keep the same
    /// timestamp and would not be reported by [`poll`](Self::poll).
    pub fn settling(&self, window: Duration) -> bool {
        match self.last {
            // A timestamp in the future counts as fresh.
            Some(time) => match time.elapsed() {
                Ok(age) => age < window,
                Err(_) => true,
            },
            None => false,
        }
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    match path.metadata().and_then(|m| m.modified()) {
        Ok(time) => Some(time),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read mutation signal");
            None
        }
    }
}
