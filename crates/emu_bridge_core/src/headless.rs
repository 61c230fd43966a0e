//! In-memory emulation core.
//!
//! Runs a small 65816 instruction subset over a sparse 24-bit address space so
//! the bridge can be driven end to end without a real emulator attached. Hooks
//! are collected while the machine lock is held and dispatched after it is
//! released, so subscribers may call back into the core.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::{debug, info};

use crate::emulator::{Breakpoint, CpuRegisters, EmulatorCore, HookEvent, RunState, StateTarget};
use crate::hooks::HookDispatcher;
use crate::sync::lock;
use crate::validate::MAX_ADDRESS;
use crate::{BridgeError, Result};

pub const PROGRAM_BASE: u32 = 0x00_8000;
pub const INSTRUCTIONS_PER_FRAME: u32 = 64;
const CYCLES_PER_INSTRUCTION: u64 = 2;
const RESET_P: u8 = 0x34;
const RESET_SP: u16 = 0x01FF;

/// Counter loop: `SEP #$30; LDA #0; loop: INC A; STA $7E0020; REP #$30; SEP #$30; BRA loop`.
pub const DEMO_PROGRAM: &[u8] = &[
    0xE2, 0x30, 0xA9, 0x00, 0x1A, 0x8F, 0x20, 0x00, 0x7E, 0xC2, 0x30, 0xE2, 0x30, 0x80, 0xF5,
];

struct Machine {
    rom_name: Option<String>,
    rom_hash: Option<String>,
    memory: HashMap<u32, u8>,
    regs: CpuRegisters,
    paused: bool,
    frame: u64,
    breakpoints: BTreeMap<u32, u32>,
    next_breakpoint: u32,
}

impl Machine {
    fn read(&self, addr: u32) -> u8 {
        self.memory.get(&addr).copied().unwrap_or(0)
    }

    fn operand(&self, offset: u32) -> u8 {
        self.read(advance(self.regs.pc, offset))
    }

    fn reset_registers(&mut self) {
        let cycles = self.regs.cycles;
        self.regs = CpuRegisters {
            pc: PROGRAM_BASE,
            sp: RESET_SP,
            p: RESET_P,
            cycles,
            ..CpuRegisters::default()
        };
    }

    fn set_nz(&mut self, value: u8) {
        self.regs.p &= !0x82;
        if value == 0 {
            self.regs.p |= 0x02;
        }
        if value & 0x80 != 0 {
            self.regs.p |= 0x80;
        }
    }

    /// Execute one instruction. Returns true when a breakpoint was reached.
    fn execute(&mut self, events: &mut Vec<HookEvent>) -> bool {
        let pc = self.regs.pc;
        let opcode = self.read(pc);
        let p_before = self.regs.p;
        let mut next = advance(pc, 1);

        match opcode {
            0x18 => self.regs.p &= !0x01,
            0x38 => self.regs.p |= 0x01,
            0x58 => self.regs.p &= !0x04,
            0x78 => self.regs.p |= 0x04,
            0xD8 => self.regs.p &= !0x08,
            0xF8 => self.regs.p |= 0x08,
            0xC2 => {
                self.regs.p &= !self.operand(1);
                next = advance(pc, 2);
            }
            0xE2 => {
                self.regs.p |= self.operand(1);
                next = advance(pc, 2);
            }
            0xA9 => {
                let value = self.operand(1);
                self.regs.a = (self.regs.a & 0xFF00) | u16::from(value);
                self.set_nz(value);
                next = advance(pc, 2);
            }
            0x1A => {
                let value = (self.regs.a as u8).wrapping_add(1);
                self.regs.a = (self.regs.a & 0xFF00) | u16::from(value);
                self.set_nz(value);
            }
            0x8F => {
                let addr = u32::from(self.operand(1))
                    | u32::from(self.operand(2)) << 8
                    | u32::from(self.operand(3)) << 16;
                let value = self.regs.a as u8;
                self.memory.insert(addr, value);
                events.push(HookEvent::MemoryWrite {
                    addr,
                    value,
                    pc,
                    cycle: self.regs.cycles,
                });
                next = advance(pc, 4);
            }
            0x80 => {
                let offset = self.operand(1) as i8;
                let base = advance(pc, 2);
                next = (base & 0xFF_0000) | (base as u16).wrapping_add_signed(i16::from(offset)) as u32;
            }
            _ => {}
        }

        self.regs.pc = next;
        self.regs.cycles += CYCLES_PER_INSTRUCTION;
        events.push(HookEvent::InstructionExecuted {
            pc,
            opcode,
            p_before,
            p_after: self.regs.p,
            cycle: self.regs.cycles,
        });

        if let Some(&breakpoint_id) = self.breakpoints.get(&next) {
            self.paused = true;
            events.push(HookEvent::BreakpointHit {
                pc: next,
                breakpoint_id,
            });
            return true;
        }
        false
    }

    /// Returns false when a breakpoint interrupted the frame.
    fn run_frame(&mut self, events: &mut Vec<HookEvent>) -> bool {
        for _ in 0..INSTRUCTIONS_PER_FRAME {
            if self.execute(events) {
                return false;
            }
        }
        self.frame += 1;
        events.push(HookEvent::FrameComplete { frame: self.frame });
        true
    }
}

/// Advance within the current bank.
fn advance(pc: u32, by: u32) -> u32 {
    (pc & 0xFF_0000) | (pc.wrapping_add(by) & 0xFFFF)
}

#[derive(Serialize, Deserialize)]
struct SavedState {
    rom_hash: Option<String>,
    frame: u64,
    regs: CpuRegisters,
    memory: Vec<(u32, u8)>,
}

pub struct HeadlessCore {
    machine: Mutex<Machine>,
    hooks: Arc<HookDispatcher>,
    state_dir: PathBuf,
}

impl HeadlessCore {
    pub fn new(state_dir: impl Into<PathBuf>, hooks: Arc<HookDispatcher>) -> Self {
        Self {
            machine: Mutex::new(Machine {
                rom_name: None,
                rom_hash: None,
                memory: HashMap::new(),
                regs: CpuRegisters::default(),
                paused: false,
                frame: 0,
                breakpoints: BTreeMap::new(),
                next_breakpoint: 1,
            }),
            hooks,
            state_dir: state_dir.into(),
        }
    }

    /// Map `program` at `PROGRAM_BASE` and reset the CPU.
    pub fn load_program(&self, name: &str, program: &[u8]) {
        let mut hasher = Sha1::new();
        hasher.update(program);
        let hash = format!("{:x}", hasher.finalize());

        let mut m = lock(&self.machine);
        m.memory.clear();
        for (offset, byte) in program.iter().enumerate() {
            m.memory.insert(PROGRAM_BASE + offset as u32, *byte);
        }
        m.rom_name = Some(name.to_string());
        m.rom_hash = Some(hash.clone());
        m.frame = 0;
        m.paused = false;
        m.regs.cycles = 0;
        m.reset_registers();
        info!(rom = name, hash = %hash, bytes = program.len(), "program loaded");
    }

    pub fn load_demo(&self) {
        self.load_program("demo", DEMO_PROGRAM);
    }

    /// Advance one frame if a program is loaded and not paused. Driven by the
    /// emulation thread.
    pub fn tick(&self) -> bool {
        let mut events = Vec::new();
        let advanced = {
            let mut m = lock(&self.machine);
            if m.rom_hash.is_none() || m.paused {
                false
            } else {
                m.run_frame(&mut events);
                true
            }
        };
        self.emit(&events);
        advanced
    }

    fn require_loaded(m: &Machine) -> Result<()> {
        if m.rom_hash.is_none() {
            return Err(BridgeError::unavailable("No ROM loaded"));
        }
        Ok(())
    }

    fn emit(&self, events: &[HookEvent]) {
        for event in events {
            self.hooks.dispatch(event);
        }
    }

    fn resolve(&self, target: &StateTarget) -> PathBuf {
        match target {
            StateTarget::Slot(slot) => self.state_path(*slot),
            StateTarget::Path(path) => path.clone(),
        }
    }
}

fn check_addr(addr: u32) -> Result<()> {
    if addr > MAX_ADDRESS {
        return Err(BridgeError::invalid(
            "addr",
            format!("0x{addr:X} is beyond the 24-bit address space"),
        ));
    }
    Ok(())
}

impl EmulatorCore for HeadlessCore {
    fn run_state(&self) -> RunState {
        let m = lock(&self.machine);
        let running = m.rom_hash.is_some();
        RunState {
            running,
            paused: m.paused,
            frame: m.frame,
            fps: if running && !m.paused { 60.0 } else { 0.0 },
            console: "SNES".to_string(),
        }
    }

    fn rom_hash(&self) -> Option<String> {
        lock(&self.machine).rom_hash.clone()
    }

    fn read_byte(&self, addr: u32) -> Result<u8> {
        check_addr(addr)?;
        Ok(lock(&self.machine).read(addr))
    }

    fn write_byte(&self, addr: u32, value: u8) -> Result<()> {
        check_addr(addr)?;
        let event = {
            let mut m = lock(&self.machine);
            m.memory.insert(addr, value);
            HookEvent::MemoryWrite {
                addr,
                value,
                pc: m.regs.pc,
                cycle: m.regs.cycles,
            }
        };
        self.hooks.dispatch(&event);
        Ok(())
    }

    fn registers(&self) -> Result<CpuRegisters> {
        Ok(lock(&self.machine).regs)
    }

    fn pause(&self) {
        lock(&self.machine).paused = true;
    }

    fn resume(&self) {
        lock(&self.machine).paused = false;
    }

    fn reset(&self) -> Result<()> {
        let mut m = lock(&self.machine);
        Self::require_loaded(&m)?;
        m.reset_registers();
        debug!("cpu reset");
        Ok(())
    }

    fn step(&self, count: u32) -> Result<()> {
        let mut events = Vec::new();
        {
            let mut m = lock(&self.machine);
            Self::require_loaded(&m)?;
            for _ in 0..count {
                if m.execute(&mut events) {
                    break;
                }
            }
        }
        self.emit(&events);
        Ok(())
    }

    fn run_frames(&self, count: u32) -> Result<()> {
        for _ in 0..count {
            let mut events = Vec::new();
            let completed = {
                let mut m = lock(&self.machine);
                Self::require_loaded(&m)?;
                m.run_frame(&mut events)
            };
            self.emit(&events);
            if !completed {
                break;
            }
        }
        Ok(())
    }

    fn save_state(&self, target: &StateTarget) -> Result<PathBuf> {
        let path = self.resolve(target);
        let saved = {
            let m = lock(&self.machine);
            Self::require_loaded(&m)?;
            let mut memory: Vec<(u32, u8)> = m.memory.iter().map(|(a, v)| (*a, *v)).collect();
            memory.sort_unstable();
            SavedState {
                rom_hash: m.rom_hash.clone(),
                frame: m.frame,
                regs: m.regs,
                memory,
            }
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_vec(&saved)?)?;
        debug!(path = %path.display(), "state saved");
        Ok(path)
    }

    fn load_state(&self, target: &StateTarget) -> Result<()> {
        let path = self.resolve(target);
        let saved: SavedState = read_saved(&path)?;
        let mut m = lock(&self.machine);
        Self::require_loaded(&m)?;
        if saved.rom_hash != m.rom_hash {
            return Err(BridgeError::invalid(
                "path",
                format!("{} was saved from a different ROM", path.display()),
            ));
        }
        m.memory = saved.memory.into_iter().collect();
        m.regs = saved.regs;
        m.frame = saved.frame;
        debug!(path = %path.display(), frame = m.frame, "state loaded");
        Ok(())
    }

    fn state_path(&self, slot: u32) -> PathBuf {
        let name = lock(&self.machine)
            .rom_name
            .clone()
            .unwrap_or_else(|| "no-rom".to_string());
        self.state_dir.join(format!("{name}_{slot}.mss"))
    }

    fn add_breakpoint(&self, addr: u32) -> Result<u32> {
        check_addr(addr)?;
        let mut m = lock(&self.machine);
        if let Some(&id) = m.breakpoints.get(&addr) {
            return Ok(id);
        }
        let id = m.next_breakpoint;
        m.next_breakpoint += 1;
        m.breakpoints.insert(addr, id);
        debug!(breakpoint_id = id, addr = %format!("0x{addr:06X}"), "breakpoint armed");
        Ok(id)
    }

    fn remove_breakpoint(&self, id: u32) -> Result<()> {
        let mut m = lock(&self.machine);
        let addr = m
            .breakpoints
            .iter()
            .find(|(_, bp)| **bp == id)
            .map(|(addr, _)| *addr)
            .ok_or_else(|| BridgeError::not_found("breakpoint", id))?;
        m.breakpoints.remove(&addr);
        Ok(())
    }

    fn clear_breakpoints(&self) -> usize {
        let mut m = lock(&self.machine);
        let removed = m.breakpoints.len();
        m.breakpoints.clear();
        removed
    }

    fn list_breakpoints(&self) -> Vec<Breakpoint> {
        let mut list: Vec<Breakpoint> = lock(&self.machine)
            .breakpoints
            .iter()
            .map(|(&addr, &id)| Breakpoint { id, addr })
            .collect();
        list.sort_unstable_by_key(|bp| bp.id);
        list
    }
}

fn read_saved(path: &Path) -> Result<SavedState> {
    let body = match fs::read(path) {
        Ok(body) => body,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(BridgeError::invalid(
                "path",
                format!("no state file at {}", path.display()),
            ))
        }
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&body)
        .map_err(|e| BridgeError::invalid("path", format!("unreadable state file: {e}")))
}
