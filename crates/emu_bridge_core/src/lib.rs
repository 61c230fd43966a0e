//! Emulator Bridge Core
//!
//! Command/event protocol engine that exposes a running emulation core to external
//! tooling over a local Unix socket. Provides the command registry and validation
//! layer, telemetry, event fan-out, write attribution, register tracing, watch
//! triggers, state diffing and savestate synchronization.

pub mod agents;
pub mod bridge;
pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod emulator;
pub mod error;
pub mod events;
pub mod headless;
pub mod hooks;
pub mod logging;
pub mod memwatch;
pub mod metrics;
pub mod ops;
pub mod ptrace;
pub mod registry;
pub mod ring;
pub mod savestate;
pub mod server;
pub mod state_diff;
pub mod sync_watch;
pub mod triggers;
pub mod types;
pub mod validate;

mod sync;

// Re-export commonly used types
pub use bridge::{Bridge, PROTOCOL_VERSION};
pub use config::BridgeConfig;
pub use emulator::{Breakpoint, CpuRegisters, EmulatorCore, HookEvent, RunState, StateTarget};
pub use error::{BridgeError, ErrorCode};
pub use headless::HeadlessCore;
pub use hooks::{HookDispatcher, HookSubscriber};
pub use types::{Command, Response};

/// Result type alias using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;
