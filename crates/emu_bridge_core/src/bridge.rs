//! Process-wide coordinator owning every table the protocol touches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use serde_json::json;
use tracing::{info, warn};

use crate::agents::AgentRegistry;
use crate::config::BridgeConfig;
use crate::discovery::{DiscoveryFile, StatusReport};
use crate::emulator::{EmulatorCore, RunState};
use crate::events::{self, EventBus};
use crate::hooks::HookDispatcher;
use crate::logging::LogLevel;
use crate::memwatch::WriteWatchTable;
use crate::metrics::MetricsRecorder;
use crate::ops;
use crate::ptrace::PTracer;
use crate::registry::{CommandSpec, Registry};
use crate::savestate::{SavestateLabels, StateHistory};
use crate::state_diff::StateDiffCache;
use crate::sync_watch::{SyncOutcome, SyncWatcher};
use crate::triggers::{TriggerHook, TriggerTable};
use crate::{BridgeError, Result};

pub const PROTOCOL_VERSION: &str = "1.0";

pub struct Bridge {
    config: BridgeConfig,
    core: Arc<dyn EmulatorCore>,
    hooks: Arc<HookDispatcher>,
    registry: Registry,
    metrics: MetricsRecorder,
    agents: AgentRegistry,
    bus: Arc<EventBus>,
    watches: Arc<WriteWatchTable>,
    ptrace: Arc<PTracer>,
    triggers: Arc<TriggerTable>,
    diff: StateDiffCache,
    labels: SavestateLabels,
    state_history: StateHistory,
    sync: SyncWatcher,
    log_level: LogLevel,
    discovery: DiscoveryFile,
    started_at: Instant,
    shut_down: AtomicBool,
}

impl Bridge {
    /// Build the coordinator, attach its hook subscribers to `hooks` and
    /// register the built-in commands.
    pub fn new(
        config: BridgeConfig,
        core: Arc<dyn EmulatorCore>,
        hooks: Arc<HookDispatcher>,
    ) -> Arc<Self> {
        let bus = Arc::new(EventBus::new(config.event_queue_capacity));
        let watches = Arc::new(WriteWatchTable::new(config.max_watch_depth));
        let ptrace = Arc::new(PTracer::new(config.default_ptrace_depth));
        let triggers = Arc::new(TriggerTable::new());

        hooks.subscribe(bus.clone());
        hooks.subscribe(watches.clone());
        hooks.subscribe(ptrace.clone());
        hooks.subscribe(Arc::new(TriggerHook::new(
            Arc::downgrade(&core),
            triggers.clone(),
            bus.clone(),
        )));

        let registry = Registry::new();
        ops::register_builtin(&registry);

        let bridge = Arc::new(Self {
            metrics: MetricsRecorder::new(config.history_capacity),
            sync: SyncWatcher::new(config.sync_poll_interval),
            log_level: LogLevel::new(&config.log_level),
            discovery: DiscoveryFile::new(config.status_path()),
            config,
            core,
            hooks,
            registry,
            agents: AgentRegistry::new(),
            bus,
            watches,
            ptrace,
            triggers,
            diff: StateDiffCache::new(),
            labels: SavestateLabels::new(),
            state_history: StateHistory::default(),
            started_at: Instant::now(),
            shut_down: AtomicBool::new(false),
        });
        info!(commands = bridge.registry.len(), "bridge initialized");
        bridge
    }

    /// Publish the discovery file.
    pub fn init(&self) -> Result<()> {
        self.discovery.write(&self.status_report())?;
        info!(
            socket = %self.config.socket_path().display(),
            status = %self.discovery.path().display(),
            "discovery file written"
        );
        Ok(())
    }

    /// Close every session, stop syncing, detach hooks and remove the discovery
    /// file. Idempotent.
    pub fn teardown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.bus.close_all();
        self.sync.disarm();
        self.hooks.clear();
        self.discovery.remove();
        info!("bridge torn down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Add or replace a command at runtime.
    pub fn register(&self, spec: CommandSpec) {
        self.registry.register(spec);
    }

    pub fn status_report(&self) -> StatusReport {
        let state = self.core.run_state();
        StatusReport {
            socket_path: self.config.socket_path().display().to_string(),
            pid: std::process::id(),
            running: state.running,
            paused: state.paused,
            rom_hash: self.core.rom_hash(),
            registered_agents: self.agents.count(),
            updated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    pub fn refresh_discovery(&self) {
        if self.is_shut_down() {
            return;
        }
        if let Err(e) = self.discovery.write(&self.status_report()) {
            warn!(error = %e, "failed to refresh discovery file");
        }
    }

    /// Run state, or `UnavailableInCurrentState` when nothing is loaded.
    pub fn require_running(&self) -> Result<RunState> {
        let state = self.core.run_state();
        if !state.running {
            return Err(BridgeError::unavailable("No ROM loaded"));
        }
        Ok(state)
    }

    /// One sync watcher step; a successful reload is announced on the bus.
    pub fn poll_sync(&self) -> SyncOutcome {
        let outcome = self.sync.poll(self.core.as_ref());
        if let SyncOutcome::Loaded { path, frame } = &outcome {
            self.state_history.record_load(path);
            self.bus.publish(
                events::STATE_LOADED,
                events::payload(json!({
                    "path": path.display().to_string(),
                    "frame": frame,
                    "source": "sync",
                })),
            );
        }
        outcome
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn core(&self) -> &dyn EmulatorCore {
        self.core.as_ref()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn watches(&self) -> &WriteWatchTable {
        &self.watches
    }

    pub fn ptrace(&self) -> &PTracer {
        &self.ptrace
    }

    pub fn triggers(&self) -> &TriggerTable {
        &self.triggers
    }

    pub fn diff_cache(&self) -> &StateDiffCache {
        &self.diff
    }

    pub fn labels(&self) -> &SavestateLabels {
        &self.labels
    }

    pub fn state_history(&self) -> &StateHistory {
        &self.state_history
    }

    pub fn sync(&self) -> &SyncWatcher {
        &self.sync
    }

    pub fn log_level(&self) -> &LogLevel {
        &self.log_level
    }

    pub fn discovery(&self) -> &DiscoveryFile {
        &self.discovery
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::harness;
    use super::*;
    use crate::ErrorCode;

    #[test]
    fn test_init_and_teardown_manage_discovery_file() {
        let h = harness();
        h.bridge.init().expect("init");
        let report = h.bridge.discovery().read().expect("read status");
        assert!(report.running);
        assert!(report.socket_path.ends_with("emu-bridge-test.sock"));
        assert_eq!(report.rom_hash, h.core.rom_hash());

        h.bridge.teardown();
        assert!(!h.bridge.discovery().exists());
        assert!(h.bridge.is_shut_down());
        h.bridge.teardown();
    }

    #[test]
    fn test_hooks_reach_every_table() {
        let h = harness();
        let watch = h.bridge.watches().add(0x7E0020, 1, 10).unwrap();
        h.bridge.ptrace().start(10);
        h.core.run_frames(1).unwrap();

        let (_, writes) = h.bridge.watches().blame(watch.watch_id).unwrap();
        assert!(!writes.is_empty());
        assert!(h.bridge.ptrace().log(10).0 > 0);
    }

    #[test]
    fn test_require_running_without_rom() {
        let dir = std::env::temp_dir().join(format!("emu-bridge-norom-{}", std::process::id()));
        let config = BridgeConfig::new(&dir, "norom.sock");
        let hooks = Arc::new(HookDispatcher::new());
        let core = Arc::new(crate::HeadlessCore::new(config.state_dir(), hooks.clone()));
        let bridge = Bridge::new(config, core, hooks);
        let err = bridge.require_running().unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnavailableInCurrentState);
        assert_eq!(err.to_string(), "No ROM loaded");
    }

    #[test]
    fn test_teardown_detaches_hooks_and_closes_sessions() {
        let h = harness();
        let session = h.bridge.bus().open_session();
        h.bridge.teardown();
        assert!(session.queue().is_closed());
        let watch = h.bridge.watches().add(0x7E0020, 1, 10).unwrap();
        h.core.run_frames(1).unwrap();
        assert!(h.bridge.watches().blame(watch.watch_id).unwrap().1.is_empty());
    }
}
