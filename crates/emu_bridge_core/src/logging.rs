use std::sync::Mutex;

use crate::sync::lock;
use crate::{BridgeError, Result};

pub const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

type Applier = Box<dyn Fn(&str) -> std::result::Result<(), String> + Send + Sync>;

/// Canonical level token, case and whitespace insensitive.
pub fn parse_level(raw: &str) -> Option<&'static str> {
    let raw = raw.trim();
    LEVELS.iter().copied().find(|l| l.eq_ignore_ascii_case(raw))
}

struct LevelState {
    /// Filter directive currently in force.
    current: String,
    applier: Option<Applier>,
}

/// Runtime log level. The process entry installs an applier that swaps the
/// live subscriber filter; without one only the recorded level changes.
/// Applying and recording happen under one lock, so the recorded level is
/// always the one last applied.
pub struct LogLevel {
    state: Mutex<LevelState>,
}

impl LogLevel {
    pub fn new(initial: &str) -> Self {
        Self {
            state: Mutex::new(LevelState {
                current: parse_level(initial).unwrap_or("info").to_string(),
                applier: None,
            }),
        }
    }

    /// Attach the live filter. `active` is the directive that filter was
    /// built from, which may be a full `RUST_LOG` expression.
    pub fn install<F>(&self, active: impl Into<String>, applier: F)
    where
        F: Fn(&str) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        let mut state = lock(&self.state);
        state.current = active.into();
        state.applier = Some(Box::new(applier));
    }

    pub fn get(&self) -> String {
        lock(&self.state).current.clone()
    }

    pub fn set(&self, level: &str) -> Result<String> {
        let level = parse_level(level).ok_or_else(|| {
            BridgeError::invalid("level", format!("expected one of {}", LEVELS.join(", ")))
        })?;
        let mut state = lock(&self.state);
        if let Some(apply) = state.applier.as_ref() {
            apply(level).map_err(BridgeError::Internal)?;
        }
        state.current = level.to_string();
        drop(state);
        tracing::info!(level, "log level changed");
        Ok(level.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_invalid_initial_level_falls_back() {
        assert_eq!(LogLevel::new("LOUD").get(), "info");
        assert_eq!(LogLevel::new("Debug").get(), "debug");
        assert_eq!(parse_level(" WARN "), Some("warn"));
        assert_eq!(parse_level("verbose"), None);
    }

    #[test]
    fn test_set_validates_and_applies() {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let level = LogLevel::new("info");
        {
            let applied = applied.clone();
            level.install("info", move |l| {
                applied.lock().unwrap().push(l.to_string());
                Ok(())
            });
        }

        assert_eq!(level.set("WARN").unwrap(), "warn");
        assert_eq!(level.get(), "warn");
        assert_eq!(*applied.lock().unwrap(), vec!["warn".to_string()]);

        let err = level.set("verbose").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidParameterValue);
        assert_eq!(level.get(), "warn");
    }

    #[test]
    fn test_applier_failure_keeps_previous_level() {
        let level = LogLevel::new("info");
        level.install("info", |_| Err("reload failed".to_string()));
        let err = level.set("debug").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InternalFailure);
        assert_eq!(level.get(), "info");
    }

    #[test]
    fn test_get_reports_installed_directive() {
        let level = LogLevel::new("warn");
        level.install("emu_bridge_core=trace,info", |_| Ok(()));
        assert_eq!(level.get(), "emu_bridge_core=trace,info");
        level.set("error").unwrap();
        assert_eq!(level.get(), "error");
    }

    #[test]
    fn test_concurrent_sets_record_the_last_applied_level() {
        let live = Arc::new(Mutex::new(String::new()));
        let level = Arc::new(LogLevel::new("info"));
        {
            let live = live.clone();
            level.install("info", move |l| {
                thread::yield_now();
                *live.lock().unwrap() = l.to_string();
                Ok(())
            });
        }

        let workers: Vec<_> = LEVELS
            .iter()
            .cycle()
            .take(40)
            .map(|l| {
                let level = level.clone();
                thread::spawn(move || level.set(l).unwrap())
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(level.get(), *live.lock().unwrap());
    }
}
