//! External savestate synchronization.
//!
//! One path at a time is watched. Every poll compares the file's current
//! `(mtime, len)` stamp against the last one seen; any difference triggers a
//! load. The comparison is level-triggered, so a burst of writes between two
//! polls yields exactly one reload of the final contents.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tracing::{info, warn};

use crate::emulator::{EmulatorCore, StateTarget};
use crate::sync::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub modified: Option<SystemTime>,
    pub len: u64,
}

impl FileStamp {
    /// `None` when the file is missing or unreadable.
    pub fn probe(path: &Path) -> Option<Self> {
        let meta = fs::metadata(path).ok()?;
        if !meta.is_file() {
            return None;
        }
        Some(Self {
            modified: meta.modified().ok(),
            len: meta.len(),
        })
    }
}

#[derive(Debug)]
struct SyncTarget {
    path: PathBuf,
    last_seen: Option<FileStamp>,
    last_failed: Option<FileStamp>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub watching: bool,
    pub path: Option<String>,
    pub last_synced_path: Option<String>,
    pub last_synced_frame: Option<u64>,
    pub last_error: Option<String>,
    pub sync_count: u64,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Default)]
struct SyncRecord {
    last_synced_path: Option<String>,
    last_synced_frame: Option<u64>,
    last_error: Option<String>,
    sync_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Idle,
    Missing,
    Unchanged,
    Loaded { path: PathBuf, frame: u64 },
    Failed { path: PathBuf, error: String },
}

pub struct SyncWatcher {
    target: Mutex<Option<SyncTarget>>,
    record: Mutex<SyncRecord>,
    poll_interval: Duration,
}

impl SyncWatcher {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            target: Mutex::new(None),
            record: Mutex::new(SyncRecord::default()),
            poll_interval,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Replace the watched path in one step. The file's current stamp counts as
    /// already seen, so an existing file is not loaded until it changes.
    pub fn arm(&self, path: impl Into<PathBuf>) -> SyncStatus {
        let path = path.into();
        let stamp = FileStamp::probe(&path);
        {
            let mut target = lock(&self.target);
            if let Some(previous) = target.as_ref() {
                if previous.path != path {
                    info!(old = %previous.path.display(), new = %path.display(), "savestate sync re-armed");
                }
            }
            *target = Some(SyncTarget {
                path: path.clone(),
                last_seen: stamp,
                last_failed: None,
            });
        }
        lock(&self.record).last_error = None;
        info!(path = %path.display(), exists = stamp.is_some(), "savestate sync armed");
        self.status()
    }

    /// Returns whether a path was being watched.
    pub fn disarm(&self) -> bool {
        let previous = lock(&self.target).take();
        if let Some(target) = &previous {
            info!(path = %target.path.display(), "savestate sync stopped");
        }
        previous.is_some()
    }

    pub fn is_watching(&self) -> bool {
        lock(&self.target).is_some()
    }

    pub fn status(&self) -> SyncStatus {
        let path = lock(&self.target)
            .as_ref()
            .map(|t| t.path.display().to_string());
        let record = lock(&self.record);
        SyncStatus {
            watching: path.is_some(),
            path,
            last_synced_path: record.last_synced_path.clone(),
            last_synced_frame: record.last_synced_frame,
            last_error: record.last_error.clone(),
            sync_count: record.sync_count,
            poll_interval_ms: u64::try_from(self.poll_interval.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// One poll step. The core is loaded outside the target lock; a re-arm that
    /// lands meanwhile keeps its own snapshot.
    pub fn poll(&self, core: &dyn EmulatorCore) -> SyncOutcome {
        let (path, stamp) = {
            let mut guard = lock(&self.target);
            let Some(target) = guard.as_mut() else {
                return SyncOutcome::Idle;
            };
            match FileStamp::probe(&target.path) {
                None => {
                    target.last_seen = None;
                    return SyncOutcome::Missing;
                }
                Some(stamp) if Some(stamp) == target.last_seen || Some(stamp) == target.last_failed => {
                    return SyncOutcome::Unchanged;
                }
                Some(stamp) => (target.path.clone(), stamp),
            }
        };

        let result = core.load_state(&StateTarget::Path(path.clone()));

        {
            let mut guard = lock(&self.target);
            if let Some(target) = guard.as_mut().filter(|t| t.path == path) {
                match result {
                    Ok(()) => {
                        target.last_seen = Some(stamp);
                        target.last_failed = None;
                    }
                    Err(_) => target.last_failed = Some(stamp),
                }
            }
        }

        let mut record = lock(&self.record);
        match result {
            Ok(()) => {
                let frame = core.run_state().frame;
                record.last_synced_path = Some(path.display().to_string());
                record.last_synced_frame = Some(frame);
                record.last_error = None;
                record.sync_count += 1;
                info!(path = %path.display(), frame, "savestate synced from external file");
                SyncOutcome::Loaded { path, frame }
            }
            Err(err) => {
                let error = err.to_string();
                warn!(path = %path.display(), %error, "savestate sync load failed");
                record.last_error = Some(error.clone());
                SyncOutcome::Failed { path, error }
            }
        }
    }
}
