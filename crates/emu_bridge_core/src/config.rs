use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_HISTORY_CAPACITY: usize = 1000;
const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 256;
const DEFAULT_SYNC_POLL_MS: u64 = 100;
const DEFAULT_WATCH_DEPTH: usize = 100;
const MAX_WATCH_DEPTH: usize = 10_000;
const DEFAULT_PTRACE_DEPTH: usize = 1000;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub socket_dir: PathBuf,
    pub socket_name: String,
    pub history_capacity: usize,
    pub event_queue_capacity: usize,
    pub sync_poll_interval: Duration,
    pub default_watch_depth: usize,
    pub max_watch_depth: usize,
    pub default_ptrace_depth: usize,
    pub log_level: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            socket_dir: std::env::temp_dir(),
            socket_name: default_socket_name(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            sync_poll_interval: Duration::from_millis(DEFAULT_SYNC_POLL_MS),
            default_watch_depth: DEFAULT_WATCH_DEPTH,
            max_watch_depth: MAX_WATCH_DEPTH,
            default_ptrace_depth: DEFAULT_PTRACE_DEPTH,
            log_level: "info".to_string(),
        }
    }
}

impl BridgeConfig {
    pub fn new(socket_dir: impl Into<PathBuf>, socket_name: impl Into<String>) -> Self {
        Self {
            socket_dir: socket_dir.into(),
            socket_name: socket_name.into(),
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();

        let socket_dir = std::env::var("EMU_BRIDGE_SOCKET_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.socket_dir);

        let history_capacity = env_number("EMU_BRIDGE_HISTORY")
            .filter(|v| *v > 0)
            .map(|v| v as usize)
            .unwrap_or(defaults.history_capacity);

        let event_queue_capacity = env_number("EMU_BRIDGE_EVENT_QUEUE")
            .filter(|v| *v > 0)
            .map(|v| v as usize)
            .unwrap_or(defaults.event_queue_capacity);

        let sync_poll_interval = env_number("EMU_BRIDGE_SYNC_POLL_MS")
            .filter(|v| *v > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.sync_poll_interval);

        let log_level = std::env::var("EMU_BRIDGE_LOG").unwrap_or(defaults.log_level);

        Self {
            socket_dir,
            history_capacity,
            event_queue_capacity,
            sync_poll_interval,
            log_level,
            ..Self::default()
        }
    }

    pub fn socket_path(&self) -> PathBuf {
        self.socket_dir.join(&self.socket_name)
    }

    /// Discovery file sitting next to the socket (`foo.sock` -> `foo.status`).
    pub fn status_path(&self) -> PathBuf {
        self.socket_path().with_extension("status")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.socket_dir.join("emu-bridge-states")
    }
}

fn default_socket_name() -> String {
    format!("emu-bridge-{}.sock", std::process::id())
}

fn env_number(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.history_capacity, 1000);
        assert_eq!(config.event_queue_capacity, 256);
        assert_eq!(config.sync_poll_interval, Duration::from_millis(100));
        assert_eq!(config.log_level, "info");
        assert!(config.socket_name.ends_with(".sock"));
    }

    #[test]
    fn test_new_config_paths() {
        let config = BridgeConfig::new("/tmp/bridge-test", "emu-bridge-42.sock");
        assert_eq!(config.socket_path(), PathBuf::from("/tmp/bridge-test/emu-bridge-42.sock"));
        assert_eq!(
            config.status_path(),
            PathBuf::from("/tmp/bridge-test/emu-bridge-42.status")
        );
        assert_eq!(
            config.state_dir(),
            PathBuf::from("/tmp/bridge-test/emu-bridge-states")
        );
    }

    #[test]
    fn test_from_env_defaults_and_overrides() {
        std::env::remove_var("EMU_BRIDGE_SOCKET_DIR");
        std::env::remove_var("EMU_BRIDGE_HISTORY");
        std::env::remove_var("EMU_BRIDGE_SYNC_POLL_MS");

        let config = BridgeConfig::from_env();
        assert_eq!(config.socket_dir, std::env::temp_dir());
        assert_eq!(config.history_capacity, 1000);

        std::env::set_var("EMU_BRIDGE_SOCKET_DIR", "/tmp/custom-bridge");
        std::env::set_var("EMU_BRIDGE_HISTORY", "64");
        std::env::set_var("EMU_BRIDGE_SYNC_POLL_MS", "not-a-number");

        let config = BridgeConfig::from_env();
        assert_eq!(config.socket_dir, PathBuf::from("/tmp/custom-bridge"));
        assert_eq!(config.history_capacity, 64);
        assert_eq!(config.sync_poll_interval, Duration::from_millis(100));

        std::env::remove_var("EMU_BRIDGE_SOCKET_DIR");
        std::env::remove_var("EMU_BRIDGE_HISTORY");
        std::env::remove_var("EMU_BRIDGE_SYNC_POLL_MS");
    }
}
