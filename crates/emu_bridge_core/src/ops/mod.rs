//! Built-in command set, grouped by concern. Each submodule registers its
//! commands with a declarative schema; handlers stay thin and delegate to the
//! tables owned by [`crate::Bridge`].

mod control;
mod events;
mod memory;
mod savestate;
mod system;
mod trace;

use crate::registry::{ParamSpec, Registry};
use crate::validate::ParamKind;

/// Feature flags reported by `CAPABILITIES`.
pub const FEATURES: &[&str] = &[
    "error_codes",
    "batch",
    "breakpoints",
    "events",
    "help",
    "metrics",
    "history",
    "agents",
    "mem_watch",
    "p_watch",
    "watch_trigger",
    "state_diff",
    "savestate_labels",
    "savestate_sync",
];

pub fn register_builtin(registry: &Registry) {
    system::register(registry);
    control::register(registry);
    memory::register(registry);
    savestate::register(registry);
    events::register(registry);
    trace::register(registry);
}

fn action(choices: &'static [&'static str], description: &'static str) -> ParamSpec {
    ParamSpec::optional("action", ParamKind::Enum(choices), description)
}

fn required_action(choices: &'static [&'static str], description: &'static str) -> ParamSpec {
    ParamSpec::required("action", ParamKind::Enum(choices), description)
}

fn addr(description: &'static str) -> ParamSpec {
    ParamSpec::required("addr", ParamKind::HexAddr, description)
}

fn hex(addr: u32) -> String {
    format!("0x{addr:06X}")
}
