//! Bounded operator-facing event log.

use std::{
    collections::VecDeque,
    sync::{Mutex, PoisonError},
};

use chrono::{DateTime, Local};
use serde::{Serialize, Serializer};

pub const EVENT_LOG_CAPACITY: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Info,
    Warning,
    Error,
    Danger,
    Resume,
    Command,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EventEntry {
    #[serde(serialize_with = "clock_time")]
    pub time: DateTime<Local>,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub message: String,
}

fn clock_time<S: Serializer>(time: &DateTime<Local>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&time.format("%H:%M:%S"))
}

/// Ring of the most recent [`EVENT_LOG_CAPACITY`] entries.
#[derive(Debug)]
pub struct EventLog {
    entries: Mutex<VecDeque<EventEntry>>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(EVENT_LOG_CAPACITY)
    }
}

impl EventLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, kind: EventKind, message: impl Into<String>) {
        let entry = EventEntry {
            time: Local::now(),
            kind,
            message: message.into(),
        };
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Up to `n` newest entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<EventEntry> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
