use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::Result;

/// Contents of the per-process status file tools read to find the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub socket_path: String,
    pub pid: u32,
    pub running: bool,
    pub paused: bool,
    pub rom_hash: Option<String>,
    pub registered_agents: usize,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct DiscoveryFile {
    path: PathBuf,
}

impl DiscoveryFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Written to a temporary sibling and renamed so readers never see a
    /// partial file.
    pub fn write(&self, report: &StatusReport) -> Result<()> {
        let body = serde_json::to_vec_pretty(report)?;
        let tmp = self.path.with_extension("status.tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "discovery file updated");
        Ok(())
    }

    pub fn read(&self) -> Result<StatusReport> {
        let body = fs::read(&self.path)?;
        Ok(serde_json::from_slice(&body)?)
    }

    pub fn remove(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "discovery file removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove discovery file"),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_remove() {
        let dir = std::env::temp_dir().join(format!("emu-bridge-discovery-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let file = DiscoveryFile::new(dir.join("emu-bridge-1.status"));
        let report = StatusReport {
            socket_path: "/tmp/emu-bridge-1.sock".into(),
            pid: 1,
            running: true,
            paused: false,
            rom_hash: Some("abc".into()),
            registered_agents: 2,
            updated_at: "2026-01-01T00:00:00Z".into(),
        };

        file.write(&report).unwrap();
        assert_eq!(file.read().unwrap(), report);

        let raw: serde_json::Value = serde_json::from_slice(&fs::read(file.path()).unwrap()).unwrap();
        assert_eq!(raw["socketPath"], "/tmp/emu-bridge-1.sock");
        assert_eq!(raw["registeredAgents"], 2);

        file.remove();
        assert!(!file.exists());
        file.remove();
        let _ = fs::remove_dir_all(&dir);
    }
}
