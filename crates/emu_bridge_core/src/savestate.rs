use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::debug;

use crate::sync::lock;
use crate::Result;

/// Sidecar file holding a state's label: `<state file>.label`.
pub fn label_path(state_path: &Path) -> PathBuf {
    let mut name = OsString::from(state_path.as_os_str());
    name.push(".label");
    PathBuf::from(name)
}

/// Slot labels persisted next to the state files they describe.
#[derive(Default)]
pub struct SavestateLabels {
    io: Mutex<()>,
}

impl SavestateLabels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the trimmed label. An empty label clears it. Returns what is now stored.
    pub fn set(&self, state_path: &Path, label: &str) -> Result<Option<String>> {
        let label = label.trim();
        if label.is_empty() {
            self.clear(state_path)?;
            return Ok(None);
        }
        let path = label_path(state_path);
        let _guard = lock(&self.io);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, label)?;
        debug!(path = %path.display(), "savestate label written");
        Ok(Some(label.to_string()))
    }

    pub fn get(&self, state_path: &Path) -> Result<Option<String>> {
        let path = label_path(state_path);
        let _guard = lock(&self.io);
        match fs::read_to_string(&path) {
            Ok(contents) => {
                let label = contents.trim();
                Ok((!label.is_empty()).then(|| label.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Clearing a label that was never set is not an error.
    pub fn clear(&self, state_path: &Path) -> Result<()> {
        let path = label_path(state_path);
        let _guard = lock(&self.io);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateActivity {
    pub last_save: Option<String>,
    pub last_load: Option<String>,
}

/// Last save/load paths with timestamps, reported by `STATE`.
#[derive(Default)]
pub struct StateHistory {
    inner: Mutex<StateActivity>,
}

impl StateHistory {
    pub fn record_save(&self, path: &Path) {
        lock(&self.inner).last_save = Some(describe(path));
    }

    pub fn record_load(&self, path: &Path) {
        lock(&self.inner).last_load = Some(describe(path));
    }

    pub fn snapshot(&self) -> StateActivity {
        lock(&self.inner).clone()
    }
}

fn describe(path: &Path) -> String {
    format!(
        "{} @ {}",
        path.display(),
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}
