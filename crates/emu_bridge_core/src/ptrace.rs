use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::emulator::HookEvent;
use crate::hooks::HookSubscriber;
use crate::ring::Ring;
use crate::sync::lock;

/// 65816 status register bits, most significant first.
pub const FLAG_BITS: [(u8, char); 8] = [
    (0x80, 'N'),
    (0x40, 'V'),
    (0x20, 'M'),
    (0x10, 'X'),
    (0x08, 'D'),
    (0x04, 'I'),
    (0x02, 'Z'),
    (0x01, 'C'),
];

/// Letters of the flags set in `mask`, in `NVMXDIZC` order.
pub fn describe_flags(mask: u8) -> String {
    FLAG_BITS
        .iter()
        .filter(|(bit, _)| mask & bit != 0)
        .map(|(_, letter)| *letter)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PChangeEvent {
    pub pc: u32,
    pub old_p: u8,
    pub new_p: u8,
    pub opcode: u8,
    pub cycle: u64,
}

impl PChangeEvent {
    pub fn mask(&self) -> u8 {
        self.old_p ^ self.new_p
    }

    pub fn to_json(&self) -> Value {
        json!({
            "pc": format!("{:06X}", self.pc),
            "old_p": format!("{:02X}", self.old_p),
            "new_p": format!("{:02X}", self.new_p),
            "flags_changed": describe_flags(self.mask()),
            "mask": format!("{:02X}", self.mask()),
            "opcode": format!("{:02X}", self.opcode),
            "cycle": self.cycle,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PTraceStatus {
    pub enabled: bool,
    pub depth: usize,
    pub total: u64,
    pub logged: usize,
}

struct TraceState {
    log: Ring<PChangeEvent>,
}

/// The single status-register change tracer. Only instructions that change P
/// are logged.
pub struct PTracer {
    enabled: AtomicBool,
    state: Mutex<TraceState>,
}

impl PTracer {
    pub fn new(default_depth: usize) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            state: Mutex::new(TraceState {
                log: Ring::new(default_depth),
            }),
        }
    }

    /// Starting an already-running tracer applies the new depth and clears the log.
    pub fn start(&self, depth: usize) -> PTraceStatus {
        let mut state = lock(&self.state);
        state.log = Ring::new(depth);
        self.enabled.store(true, Ordering::Release);
        info!(depth = state.log.capacity(), "P register trace started");
        status_of(true, &state)
    }

    pub fn stop(&self) -> PTraceStatus {
        let state = lock(&self.state);
        let was_enabled = self.enabled.swap(false, Ordering::AcqRel);
        if was_enabled {
            info!(total = state.log.total_pushed(), "P register trace stopped");
        }
        status_of(false, &state)
    }

    pub fn status(&self) -> PTraceStatus {
        let state = lock(&self.state);
        status_of(self.is_enabled(), &state)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Changes recorded since start, plus the most recent `count` entries
    /// oldest to newest.
    pub fn log(&self, count: usize) -> (u64, Vec<PChangeEvent>) {
        let state = lock(&self.state);
        (state.log.total_pushed(), state.log.last(count).copied().collect())
    }

    pub fn observe(&self, pc: u32, opcode: u8, p_before: u8, p_after: u8, cycle: u64) {
        if p_before == p_after || !self.is_enabled() {
            return;
        }
        let mut state = lock(&self.state);
        if !self.is_enabled() {
            return;
        }
        state.log.push(PChangeEvent {
            pc,
            old_p: p_before,
            new_p: p_after,
            opcode,
            cycle,
        });
    }
}

fn status_of(enabled: bool, state: &TraceState) -> PTraceStatus {
    PTraceStatus {
        enabled,
        depth: state.log.capacity(),
        total: state.log.total_pushed(),
        logged: state.log.len(),
    }
}

impl HookSubscriber for PTracer {
    fn name(&self) -> &'static str {
        "p_watch"
    }

    fn on_hook(&self, event: &HookEvent) {
        if let HookEvent::InstructionExecuted {
            pc,
            opcode,
            p_before,
            p_after,
            cycle,
        } = *event
        {
            self.observe(pc, opcode, p_before, p_after, cycle);
        }
    }
}
