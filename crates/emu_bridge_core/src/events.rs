//! Per-connection event fan-out.
//!
//! Hooks publish into bounded per-session queues and return immediately; each
//! connection's writer task drains its own queue. A full queue drops its oldest
//! frame, so a stalled client never holds up the emulation thread.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde_json::{json, Map, Value};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::emulator::HookEvent;
use crate::hooks::HookSubscriber;
use crate::sync::{lock, read, write};
use crate::types::event_frame;
use crate::{BridgeError, Result};

pub const BREAKPOINT_HIT: &str = "breakpoint_hit";
pub const FRAME_COMPLETE: &str = "frame_complete";
pub const STATE_LOADED: &str = "state_loaded";
pub const STATE_SAVED: &str = "state_saved";
pub const WATCH_TRIGGER: &str = "watch_trigger";
pub const ALL: &str = "all";

pub const EVENT_CATALOG: &[&str] = &[
    BREAKPOINT_HIT,
    FRAME_COMPLETE,
    STATE_LOADED,
    STATE_SAVED,
    WATCH_TRIGGER,
    ALL,
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subscriptions {
    all: bool,
    names: BTreeSet<String>,
}

impl Subscriptions {
    /// Comma-separated event names; `all` subscribes to everything.
    pub fn parse(list: &str) -> Result<Self> {
        let mut subs = Self::default();
        for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if !EVENT_CATALOG.contains(&name) {
                return Err(BridgeError::invalid(
                    "events",
                    format!("unknown event '{name}', expected any of {}", EVENT_CATALOG.join(", ")),
                ));
            }
            if name == ALL {
                subs.all = true;
            } else {
                subs.names.insert(name.to_string());
            }
        }
        Ok(subs)
    }

    pub fn matches(&self, event: &str) -> bool {
        self.all || self.names.contains(event)
    }

    pub fn is_empty(&self) -> bool {
        !self.all && self.names.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        if self.all {
            vec![ALL.to_string()]
        } else {
            self.names.iter().cloned().collect()
        }
    }
}

/// Bounded drop-oldest queue with a single async consumer.
pub struct EventQueue {
    frames: Mutex<VecDeque<Value>>,
    capacity: usize,
    closed: AtomicBool,
    dropped: AtomicU64,
    notify: Notify,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Never blocks. Returns false once the queue is closed.
    pub fn push(&self, frame: Value) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        {
            let mut frames = lock(&self.frames);
            if frames.len() >= self.capacity {
                frames.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            frames.push_back(frame);
        }
        self.notify.notify_one();
        true
    }

    /// Waits for at least one frame. `None` after close; frames still queued at
    /// close time are discarded.
    pub async fn next_batch(&self) -> Option<Vec<Value>> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            {
                let mut frames = lock(&self.frames);
                if !frames.is_empty() {
                    return Some(frames.drain(..).collect());
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        lock(&self.frames).clear();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        lock(&self.frames).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// One client connection's view of the bus.
pub struct Session {
    id: u64,
    subscriptions: Mutex<Subscriptions>,
    queue: EventQueue,
}

impl Session {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub fn subscriptions(&self) -> Subscriptions {
        lock(&self.subscriptions).clone()
    }

    pub fn set_subscriptions(&self, subs: Subscriptions) {
        *lock(&self.subscriptions) = subs;
    }

    fn deliver(&self, event: &str, frame: &Value) -> bool {
        if !lock(&self.subscriptions).matches(event) {
            return false;
        }
        let before = self.queue.dropped();
        let pushed = self.queue.push(frame.clone());
        if self.queue.dropped() > before {
            debug!(session = self.id, event, "event queue full, dropped oldest frame");
        }
        pushed
    }
}

pub struct EventBus {
    sessions: RwLock<HashMap<u64, Arc<Session>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
    published: AtomicU64,
    closed: AtomicBool,
}

impl EventBus {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity,
            published: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn open_session(&self) -> Arc<Session> {
        let session = Arc::new(Session {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            subscriptions: Mutex::new(Subscriptions::default()),
            queue: EventQueue::new(self.queue_capacity),
        });
        if self.closed.load(Ordering::Acquire) {
            session.queue.close();
        } else {
            write(&self.sessions).insert(session.id, session.clone());
        }
        session
    }

    pub fn close_session(&self, id: u64) {
        if let Some(session) = write(&self.sessions).remove(&id) {
            session.queue.close();
        }
    }

    /// Closes every queue; no event is delivered afterwards.
    pub fn close_all(&self) {
        self.closed.store(true, Ordering::Release);
        let sessions: Vec<_> = write(&self.sessions).drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.queue.close();
        }
    }

    /// Returns how many sessions received the frame.
    pub fn publish(&self, event: &str, payload: Map<String, Value>) -> usize {
        if self.closed.load(Ordering::Acquire) {
            return 0;
        }
        self.published.fetch_add(1, Ordering::Relaxed);
        let frame = event_frame(event, &payload);
        read(&self.sessions)
            .values()
            .filter(|s| s.deliver(event, &frame))
            .count()
    }

    pub fn session_count(&self) -> usize {
        read(&self.sessions).len()
    }

    /// Sessions with a non-empty subscription set.
    pub fn subscription_count(&self) -> usize {
        read(&self.sessions)
            .values()
            .filter(|s| !lock(&s.subscriptions).is_empty())
            .count()
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn dropped_total(&self) -> u64 {
        read(&self.sessions).values().map(|s| s.queue.dropped()).sum()
    }
}

pub(crate) fn payload(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            warn!(?other, "event payload is not an object");
            Map::new()
        }
    }
}

impl HookSubscriber for EventBus {
    fn name(&self) -> &'static str {
        "event_bus"
    }

    fn on_hook(&self, event: &HookEvent) {
        match *event {
            HookEvent::FrameComplete { frame } => {
                self.publish(FRAME_COMPLETE, payload(json!({ "frame": frame })));
            }
            HookEvent::BreakpointHit { pc, breakpoint_id } => {
                self.publish(
                    BREAKPOINT_HIT,
                    payload(json!({
                        "pc": format!("0x{pc:06X}"),
                        "breakpoint_id": breakpoint_id,
                    })),
                );
            }
            HookEvent::InstructionExecuted { .. } | HookEvent::MemoryWrite { .. } => {}
        }
    }
}
