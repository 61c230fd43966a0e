//! Capability surface of the emulation core the bridge drives.
//!
//! The bridge never reaches into emulator internals; everything it needs goes
//! through [`EmulatorCore`], and everything the core reports back arrives as a
//! [`HookEvent`] through the [`crate::HookDispatcher`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub running: bool,
    pub paused: bool,
    pub frame: u64,
    pub fps: f64,
    pub console: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuRegisters {
    pub pc: u32,
    pub a: u16,
    pub x: u16,
    pub y: u16,
    pub sp: u16,
    pub d: u16,
    pub k: u8,
    pub dbr: u8,
    pub p: u8,
    pub cycles: u64,
}

impl CpuRegisters {
    /// Register dump as returned by `CPU`: hex strings, cycles as an integer.
    pub fn to_json(&self) -> Value {
        json!({
            "pc": format!("0x{:06X}", self.pc),
            "a": format!("0x{:04X}", self.a),
            "x": format!("0x{:04X}", self.x),
            "y": format!("0x{:04X}", self.y),
            "sp": format!("0x{:04X}", self.sp),
            "d": format!("0x{:04X}", self.d),
            "k": format!("0x{:02X}", self.k),
            "dbr": format!("0x{:02X}", self.dbr),
            "p": format!("0x{:02X}", self.p),
            "cycles": self.cycles,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Breakpoint {
    pub id: u32,
    pub addr: u32,
}

impl Breakpoint {
    pub fn to_json(&self) -> Value {
        json!({
            "breakpoint_id": self.id,
            "addr": format!("0x{:06X}", self.addr),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateTarget {
    Slot(u32),
    Path(PathBuf),
}

impl StateTarget {
    pub fn describe(&self) -> String {
        match self {
            StateTarget::Slot(slot) => format!("slot {slot}"),
            StateTarget::Path(path) => path.display().to_string(),
        }
    }
}

/// Execution hooks raised synchronously by the emulation thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    InstructionExecuted {
        pc: u32,
        opcode: u8,
        p_before: u8,
        p_after: u8,
        cycle: u64,
    },
    MemoryWrite {
        addr: u32,
        value: u8,
        pc: u32,
        cycle: u64,
    },
    FrameComplete {
        frame: u64,
    },
    BreakpointHit {
        pc: u32,
        breakpoint_id: u32,
    },
}

impl HookEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            HookEvent::InstructionExecuted { .. } => "instruction_executed",
            HookEvent::MemoryWrite { .. } => "memory_write",
            HookEvent::FrameComplete { .. } => "frame_complete",
            HookEvent::BreakpointHit { .. } => "breakpoint_hit",
        }
    }
}

pub trait EmulatorCore: Send + Sync {
    fn run_state(&self) -> RunState;

    /// Content hash of the loaded ROM, `None` when nothing is loaded.
    fn rom_hash(&self) -> Option<String>;

    fn read_byte(&self, addr: u32) -> Result<u8>;

    fn write_byte(&self, addr: u32, value: u8) -> Result<()>;

    fn registers(&self) -> Result<CpuRegisters>;

    fn pause(&self);

    fn resume(&self);

    fn reset(&self) -> Result<()>;

    fn step(&self, count: u32) -> Result<()>;

    fn run_frames(&self, count: u32) -> Result<()>;

    /// Returns the file the state was written to.
    fn save_state(&self, target: &StateTarget) -> Result<PathBuf>;

    fn load_state(&self, target: &StateTarget) -> Result<()>;

    fn state_path(&self, slot: u32) -> PathBuf;

    /// Arm an execution breakpoint; returns its id. Arming an address that
    /// already has one returns the existing id.
    fn add_breakpoint(&self, addr: u32) -> Result<u32>;

    fn remove_breakpoint(&self, id: u32) -> Result<()>;

    /// Removes every breakpoint and returns how many there were.
    fn clear_breakpoints(&self) -> usize;

    /// Ordered by id.
    fn list_breakpoints(&self) -> Vec<Breakpoint>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_dump_formats_hex() {
        let regs = CpuRegisters {
            pc: 0x008000,
            a: 0x1234,
            p: 0x30,
            k: 0x7E,
            cycles: 42,
            ..CpuRegisters::default()
        };
        let json = regs.to_json();
        assert_eq!(json["pc"], "0x008000");
        assert_eq!(json["a"], "0x1234");
        assert_eq!(json["p"], "0x30");
        assert_eq!(json["k"], "0x7E");
        assert_eq!(json["cycles"], 42);
    }

    #[test]
    fn test_state_target_describe() {
        assert_eq!(StateTarget::Slot(3).describe(), "slot 3");
        assert_eq!(
            StateTarget::Path(PathBuf::from("/tmp/a.mss")).describe(),
            "/tmp/a.mss"
        );
    }
}
