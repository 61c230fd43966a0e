use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::emulator::HookEvent;
use crate::hooks::HookSubscriber;
use crate::ring::Ring;
use crate::sync::lock;
use crate::{BridgeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteEvent {
    pub addr: u32,
    pub pc: u32,
    pub value: u8,
    pub cycle: u64,
}

impl WriteEvent {
    pub fn to_json(&self) -> Value {
        json!({
            "addr": format!("0x{:06X}", self.addr),
            "pc": format!("{:06X}", self.pc),
            "value": self.value,
            "cycle": self.cycle,
        })
    }
}

#[derive(Debug)]
pub struct MemoryWatch {
    pub id: u32,
    pub addr: u32,
    pub size: u32,
    pub depth: usize,
    log: Ring<WriteEvent>,
}

impl MemoryWatch {
    fn covers(&self, addr: u32) -> bool {
        let start = u64::from(self.addr);
        let end = start + u64::from(self.size);
        (start..end).contains(&u64::from(addr))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchSummary {
    pub watch_id: u32,
    pub addr: String,
    pub size: u32,
    pub depth: usize,
    pub log_count: usize,
}

/// Process-wide table of write-attribution watches. Watches observe only; they
/// never pause execution.
pub struct WriteWatchTable {
    watches: Mutex<BTreeMap<u32, MemoryWatch>>,
    next_id: AtomicU32,
    active: AtomicUsize,
    max_depth: usize,
}

impl WriteWatchTable {
    pub fn new(max_depth: usize) -> Self {
        Self {
            watches: Mutex::new(BTreeMap::new()),
            next_id: AtomicU32::new(1),
            active: AtomicUsize::new(0),
            max_depth: max_depth.max(1),
        }
    }

    /// Depth above the configured maximum is clamped; zero is rejected.
    pub fn add(&self, addr: u32, size: u32, depth: usize) -> Result<WatchSummary> {
        if size == 0 {
            return Err(BridgeError::invalid("size", "must be at least 1"));
        }
        if depth == 0 {
            return Err(BridgeError::invalid("depth", "must be at least 1"));
        }
        let depth = depth.min(self.max_depth);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let watch = MemoryWatch {
            id,
            addr,
            size,
            depth,
            log: Ring::new(depth),
        };
        let summary = summarize(&watch);

        let mut watches = lock(&self.watches);
        watches.insert(id, watch);
        self.active.store(watches.len(), Ordering::Release);
        drop(watches);

        info!(watch_id = id, addr = %format!("0x{addr:06X}"), size, depth, "memory write watch added");
        Ok(summary)
    }

    pub fn remove(&self, id: u32) -> Result<()> {
        let mut watches = lock(&self.watches);
        watches
            .remove(&id)
            .ok_or_else(|| BridgeError::not_found("watch", id))?;
        self.active.store(watches.len(), Ordering::Release);
        info!(watch_id = id, "memory write watch removed");
        Ok(())
    }

    pub fn clear(&self) -> usize {
        let mut watches = lock(&self.watches);
        let removed = watches.len();
        watches.clear();
        self.active.store(0, Ordering::Release);
        removed
    }

    pub fn list(&self) -> Vec<WatchSummary> {
        lock(&self.watches).values().map(summarize).collect()
    }

    pub fn len(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lowest-id watch whose range contains `addr`.
    pub fn find_by_addr(&self, addr: u32) -> Option<u32> {
        lock(&self.watches)
            .values()
            .find(|w| w.covers(addr))
            .map(|w| w.id)
    }

    /// Logged writes, newest first.
    pub fn blame(&self, id: u32) -> Result<(WatchSummary, Vec<WriteEvent>)> {
        let watches = lock(&self.watches);
        let watch = watches
            .get(&id)
            .ok_or_else(|| BridgeError::not_found("watch", id))?;
        Ok((summarize(watch), watch.log.iter().rev().copied().collect()))
    }

    pub fn record(&self, event: WriteEvent) {
        if self.active.load(Ordering::Acquire) == 0 {
            return;
        }
        let mut watches = lock(&self.watches);
        for watch in watches.values_mut().filter(|w| w.covers(event.addr)) {
            watch.log.push(event);
        }
    }
}

fn summarize(watch: &MemoryWatch) -> WatchSummary {
    WatchSummary {
        watch_id: watch.id,
        addr: format!("0x{:06X}", watch.addr),
        size: watch.size,
        depth: watch.depth,
        log_count: watch.log.len(),
    }
}

impl HookSubscriber for WriteWatchTable {
    fn name(&self) -> &'static str {
        "mem_watch"
    }

    fn on_hook(&self, event: &HookEvent) {
        if let HookEvent::MemoryWrite {
            addr,
            value,
            pc,
            cycle,
        } = *event
        {
            self.record(WriteEvent {
                addr,
                pc,
                value,
                cycle,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;

    fn write(addr: u32, value: u8, cycle: u64) -> HookEvent {
        HookEvent::MemoryWrite {
            addr,
            value,
            pc: 0x008005,
            cycle,
        }
    }

    #[test]
    fn test_write_in_range_is_attributed() {
        let table = WriteWatchTable::new(100);
        let watch = table.add(0x7E0020, 2, 10).unwrap();

        table.on_hook(&write(0x7E0021, 0xAB, 100));
        table.on_hook(&write(0x7E0022, 0x01, 101));
        table.on_hook(&write(0x7E001F, 0x01, 102));

        let (summary, writes) = table.blame(watch.watch_id).unwrap();
        assert_eq!(summary.log_count, 1);
        assert_eq!(writes[0].value, 0xAB);
        assert_eq!(writes[0].to_json()["pc"], "008005");
    }

    #[test]
    fn test_blame_is_newest_first_and_depth_bounded() {
        let table = WriteWatchTable::new(100);
        let id = table.add(0x10, 1, 3).unwrap().watch_id;
        for cycle in 0..5 {
            table.on_hook(&write(0x10, cycle as u8, cycle));
        }
        let (_, writes) = table.blame(id).unwrap();
        let cycles: Vec<u64> = writes.iter().map(|w| w.cycle).collect();
        assert_eq!(cycles, vec![4, 3, 2]);
    }

    #[test]
    fn test_ids_are_monotonic_and_remove_forgets() {
        let table = WriteWatchTable::new(100);
        let a = table.add(0x10, 1, 4).unwrap().watch_id;
        let b = table.add(0x20, 1, 4).unwrap().watch_id;
        assert!(b > a);

        table.remove(a).unwrap();
        let c = table.add(0x30, 1, 4).unwrap().watch_id;
        assert!(c > b);

        let err = table.blame(a).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidParameterValue);
        let err = table.remove(a).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidParameterValue);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_depth_is_clamped_and_zero_rejected() {
        let table = WriteWatchTable::new(8);
        assert_eq!(table.add(0x10, 1, 1000).unwrap().depth, 8);
        assert_eq!(
            table.add(0x10, 1, 0).unwrap_err().code(),
            ErrorCode::InvalidParameterValue
        );
    }

    #[test]
    fn test_range_at_top_of_bus_does_not_overflow() {
        let table = WriteWatchTable::new(8);
        let id = table.add(0xFFFFFF, u32::MAX, 4).unwrap().watch_id;
        table.on_hook(&write(0xFFFFFF, 1, 1));
        assert_eq!(table.blame(id).unwrap().1.len(), 1);
        assert_eq!(table.find_by_addr(0xFFFFFF), Some(id));
        assert_eq!(table.find_by_addr(0x0), None);
    }

    #[test]
    fn test_list_and_clear() {
        let table = WriteWatchTable::new(8);
        table.add(0x7E0020, 1, 4).unwrap();
        table.add(0x7E0030, 4, 4).unwrap();
        let list = table.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].addr, "0x7E0020");
        assert_eq!(table.clear(), 2);
        assert!(table.is_empty());
    }
}
