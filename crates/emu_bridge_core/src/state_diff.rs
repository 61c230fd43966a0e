use std::sync::Mutex;

use serde_json::{json, Map, Value};

use crate::emulator::EmulatorCore;
use crate::sync::lock;

/// Flattened run state and registers, the unit compared by `STATE_DIFF`.
pub fn sample_state(core: &dyn EmulatorCore) -> Map<String, Value> {
    let state = core.run_state();
    let mut sample = Map::new();
    sample.insert("running".into(), json!(state.running));
    sample.insert("paused".into(), json!(state.paused));
    sample.insert("frame".into(), json!(state.frame));
    sample.insert("fps".into(), json!(state.fps));
    sample.insert("console".into(), json!(state.console));
    if let Ok(regs) = core.registers() {
        if let Value::Object(regs) = regs.to_json() {
            sample.extend(regs);
        }
    }
    sample
}

/// One-slot memo of the previous sample.
#[derive(Default)]
pub struct StateDiffCache {
    previous: Mutex<Option<Map<String, Value>>>,
}

impl StateDiffCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare `sample` with the cached one and replace it. The first call after
    /// a reset returns the whole sample with `firstCall=true`. Fields that
    /// disappeared are reported as `null`.
    pub fn diff(&self, sample: Map<String, Value>) -> Value {
        let mut previous = lock(&self.previous);
        let result = match previous.as_ref() {
            None => {
                let mut full = sample.clone();
                full.insert("firstCall".into(), json!(true));
                Value::Object(full)
            }
            Some(before) => {
                let mut changes = Map::new();
                for (key, value) in &sample {
                    if before.get(key) != Some(value) {
                        changes.insert(key.clone(), value.clone());
                    }
                }
                for key in before.keys().filter(|k| !sample.contains_key(*k)) {
                    changes.insert(key.clone(), Value::Null);
                }
                json!({ "firstCall": false, "changes": changes })
            }
        };
        *previous = Some(sample);
        result
    }

    pub fn reset(&self) {
        *lock(&self.previous) = None;
    }
}
