//! Conditional memory watch-triggers.
//!
//! Polling (`check`) and hook-driven evaluation share [`TriggerTable::evaluate`],
//! so both paths compare the same bytes the same way.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::emulator::{EmulatorCore, HookEvent};
use crate::events::{self, EventBus};
use crate::hooks::HookSubscriber;
use crate::sync::lock;
use crate::{BridgeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl Condition {
    pub const TOKENS: &'static [&'static str] = &["eq", "ne", "gt", "lt", "ge", "le"];

    pub fn parse(token: &str) -> Result<Self> {
        match token {
            "eq" => Ok(Condition::Eq),
            "ne" => Ok(Condition::Ne),
            "gt" => Ok(Condition::Gt),
            "lt" => Ok(Condition::Lt),
            "ge" => Ok(Condition::Ge),
            "le" => Ok(Condition::Le),
            other => Err(BridgeError::invalid(
                "condition",
                format!("expected one of {}, got '{other}'", Self::TOKENS.join(", ")),
            )),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Condition::Eq => "eq",
            Condition::Ne => "ne",
            Condition::Gt => "gt",
            Condition::Lt => "lt",
            Condition::Ge => "ge",
            Condition::Le => "le",
        }
    }

    pub fn evaluate(self, current: u32, target: u32) -> bool {
        match self {
            Condition::Eq => current == target,
            Condition::Ne => current != target,
            Condition::Gt => current > target,
            Condition::Lt => current < target,
            Condition::Ge => current >= target,
            Condition::Le => current <= target,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTrigger {
    pub id: u32,
    pub addr: u32,
    pub value: u32,
    /// Bytes compared, little-endian: 1 or 2.
    pub width: u8,
    pub condition: Condition,
    pub enabled: bool,
    pub last_triggered: Option<u64>,
    pub fire_count: u64,
}

impl WatchTrigger {
    fn covers(&self, addr: u32) -> bool {
        (u64::from(self.addr)..u64::from(self.addr) + u64::from(self.width))
            .contains(&u64::from(addr))
    }

    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "addr": self.addr,
            "value": self.value,
            "width": self.width,
            "condition": self.condition.as_str(),
            "enabled": self.enabled,
            "lastTriggered": self.last_triggered,
            "fireCount": self.fire_count,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Firing {
    pub id: u32,
    pub addr: u32,
    pub value: u32,
    pub condition: Condition,
    pub current: u32,
    pub frame: u64,
}

impl Firing {
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "addr": self.addr,
            "value": self.value,
            "condition": self.condition.as_str(),
            "current": self.current,
            "frame": self.frame,
        })
    }
}

pub struct TriggerTable {
    triggers: Mutex<BTreeMap<u32, WatchTrigger>>,
    next_id: AtomicU32,
    enabled: AtomicUsize,
}

impl Default for TriggerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TriggerTable {
    pub fn new() -> Self {
        Self {
            triggers: Mutex::new(BTreeMap::new()),
            next_id: AtomicU32::new(1),
            enabled: AtomicUsize::new(0),
        }
    }

    pub fn add(&self, addr: u32, value: u32, condition: Condition, width: u8) -> Result<WatchTrigger> {
        if !matches!(width, 1 | 2) {
            return Err(BridgeError::invalid("width", "must be 1 or 2"));
        }
        let max = if width == 1 { 0xFF } else { 0xFFFF };
        if value > max {
            return Err(BridgeError::invalid(
                "value",
                format!("{value} does not fit in {width} byte(s)"),
            ));
        }
        let trigger = WatchTrigger {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            addr,
            value,
            width,
            condition,
            enabled: true,
            last_triggered: None,
            fire_count: 0,
        };
        let mut triggers = lock(&self.triggers);
        triggers.insert(trigger.id, trigger.clone());
        self.refresh_enabled(&triggers);
        drop(triggers);

        info!(
            trigger_id = trigger.id,
            addr = %format!("0x{addr:06X}"),
            condition = condition.as_str(),
            value,
            "watch trigger added"
        );
        Ok(trigger)
    }

    pub fn list(&self) -> Vec<WatchTrigger> {
        lock(&self.triggers).values().cloned().collect()
    }

    pub fn remove(&self, id: u32) -> Result<()> {
        let mut triggers = lock(&self.triggers);
        triggers
            .remove(&id)
            .ok_or_else(|| BridgeError::not_found("trigger", id))?;
        self.refresh_enabled(&triggers);
        Ok(())
    }

    pub fn set_enabled(&self, id: u32, enabled: bool) -> Result<WatchTrigger> {
        let mut triggers = lock(&self.triggers);
        let trigger = triggers
            .get_mut(&id)
            .ok_or_else(|| BridgeError::not_found("trigger", id))?;
        trigger.enabled = enabled;
        let updated = trigger.clone();
        self.refresh_enabled(&triggers);
        Ok(updated)
    }

    pub fn len(&self) -> usize {
        lock(&self.triggers).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn enabled_count(&self) -> usize {
        self.enabled.load(Ordering::Acquire)
    }

    /// Evaluate enabled triggers selected by `filter` against memory read
    /// through `read`. Firing does not disable a trigger; a read failure
    /// disables only the trigger that hit it.
    pub fn evaluate<F, R>(&self, frame: u64, filter: F, read: R) -> Vec<Firing>
    where
        F: Fn(&WatchTrigger) -> bool,
        R: Fn(u32) -> Result<u8>,
    {
        if self.enabled_count() == 0 {
            return Vec::new();
        }
        let mut triggers = lock(&self.triggers);
        let mut fired = Vec::new();
        let mut disabled_any = false;

        for trigger in triggers.values_mut().filter(|t| t.enabled && filter(t)) {
            match read_value(&read, trigger.addr, trigger.width) {
                Ok(current) => {
                    if trigger.condition.evaluate(current, trigger.value) {
                        trigger.last_triggered = Some(frame);
                        trigger.fire_count += 1;
                        fired.push(Firing {
                            id: trigger.id,
                            addr: trigger.addr,
                            value: trigger.value,
                            condition: trigger.condition,
                            current,
                            frame,
                        });
                    }
                }
                Err(err) => {
                    warn!(trigger_id = trigger.id, error = %err, "trigger evaluation failed, disabling");
                    trigger.enabled = false;
                    disabled_any = true;
                }
            }
        }

        if disabled_any {
            self.refresh_enabled(&triggers);
        }
        fired
    }

    /// Synchronous poll over every enabled trigger.
    pub fn check<R>(&self, frame: u64, read: R) -> Vec<Firing>
    where
        R: Fn(u32) -> Result<u8>,
    {
        self.evaluate(frame, |_| true, read)
    }

    fn refresh_enabled(&self, triggers: &BTreeMap<u32, WatchTrigger>) {
        let count = triggers.values().filter(|t| t.enabled).count();
        self.enabled.store(count, Ordering::Release);
    }

    fn any_covers(&self, addr: u32) -> bool {
        lock(&self.triggers)
            .values()
            .any(|t| t.enabled && t.covers(addr))
    }
}

fn read_value<R>(read: &R, addr: u32, width: u8) -> Result<u32>
where
    R: Fn(u32) -> Result<u8>,
{
    let lo = u32::from(read(addr)?);
    if width == 1 {
        return Ok(lo);
    }
    let hi_addr = addr
        .checked_add(1)
        .ok_or_else(|| BridgeError::invalid("addr", "word read past end of address space"))?;
    let hi = u32::from(read(hi_addr)?);
    Ok(lo | (hi << 8))
}

/// Evaluates triggers on memory writes and publishes `watch_trigger` events.
pub struct TriggerHook {
    core: Weak<dyn EmulatorCore>,
    table: Arc<TriggerTable>,
    bus: Arc<EventBus>,
}

impl TriggerHook {
    pub fn new(core: Weak<dyn EmulatorCore>, table: Arc<TriggerTable>, bus: Arc<EventBus>) -> Self {
        Self { core, table, bus }
    }
}

impl HookSubscriber for TriggerHook {
    fn name(&self) -> &'static str {
        "watch_trigger"
    }

    fn on_hook(&self, event: &HookEvent) {
        let HookEvent::MemoryWrite { addr, .. } = *event else {
            return;
        };
        if self.table.enabled_count() == 0 || !self.table.any_covers(addr) {
            return;
        }
        let Some(core) = self.core.upgrade() else {
            return;
        };
        let frame = core.run_state().frame;
        let fired = self
            .table
            .evaluate(frame, |t| t.covers(addr), |a| core.read_byte(a));
        for firing in fired {
            self.bus.publish(
                events::WATCH_TRIGGER,
                events::payload(json!({
                    "trigger_id": firing.id,
                    "addr": firing.addr,
                    "value": firing.value,
                    "condition": firing.condition.as_str(),
                    "current": firing.current,
                    "frame": firing.frame,
                })),
            );
        }
    }
}
