use std::sync::Mutex;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::error::ErrorCode;
use crate::ring::Ring;
use crate::sync::lock;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandHistoryEntry {
    pub command: String,
    pub timestamp: String,
    pub latency_us: u64,
    pub error_code: Option<ErrorCode>,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_commands: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub avg_latency_us: f64,
}

struct Totals {
    total: u64,
    errors: u64,
    latency_sum_us: u128,
    history: Ring<CommandHistoryEntry>,
}

/// Command telemetry. Counters and the history ring share one lock so a
/// snapshot never sees a command counted but not logged.
pub struct MetricsRecorder {
    inner: Mutex<Totals>,
}

impl MetricsRecorder {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Totals {
                total: 0,
                errors: 0,
                latency_sum_us: 0,
                history: Ring::new(history_capacity),
            }),
        }
    }

    pub fn record(&self, command: &str, latency: Duration, error_code: Option<ErrorCode>) {
        let latency_us = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        let entry = CommandHistoryEntry {
            command: command.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            latency_us,
            error_code,
            success: error_code.is_none(),
        };

        let mut totals = lock(&self.inner);
        totals.total += 1;
        if error_code.is_some() {
            totals.errors += 1;
        }
        totals.latency_sum_us += u128::from(latency_us);
        totals.history.push(entry);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let totals = lock(&self.inner);
        let (error_rate, avg_latency_us) = if totals.total == 0 {
            (0.0, 0.0)
        } else {
            (
                totals.errors as f64 / totals.total as f64,
                totals.latency_sum_us as f64 / totals.total as f64,
            )
        };
        MetricsSnapshot {
            total_commands: totals.total,
            error_count: totals.errors,
            error_rate,
            avg_latency_us,
        }
    }

    /// Most recent `count` entries, oldest to newest.
    pub fn history(&self, count: usize) -> Vec<CommandHistoryEntry> {
        lock(&self.inner).history.last(count).cloned().collect()
    }

    pub fn history_capacity(&self) -> usize {
        lock(&self.inner).history.capacity()
    }
}
