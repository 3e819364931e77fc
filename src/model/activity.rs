//! Bounded history of the lifecycle callbacks the coordinator received.

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_with::{DurationMilliSeconds, serde_as};
use tokio::time::Instant;

use crate::common::collections::VecDeque;
use crate::model::window::{LifecycleState, WindowId};

pub const DEFAULT_ACTIVITY_CAPACITY: usize = 100;

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityRecord {
    /// Time since the log was created.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub at: Duration,
    pub window_id: WindowId,
    pub window_name: String,
    pub state: LifecycleState,
}

impl fmt::Display for ActivityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{:.3}s {}: {}", self.at.as_secs_f64(), self.window_name, self.state)
    }
}

pub struct ActivityLog {
    started: Instant,
    capacity: usize,
    records: Mutex<VecDeque<ActivityRecord>>,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            started: Instant::now(),
            capacity,
            records: Mutex::default(),
        }
    }

    pub fn record(&self, window_id: WindowId, window_name: &str, state: LifecycleState) {
        if self.capacity == 0 {
            return;
        }
        let record = ActivityRecord {
            at: self.started.elapsed(),
            window_id,
            window_name: window_name.to_owned(),
            state,
        };
        let mut records = self.records.lock();
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Oldest first.
    pub fn records(&self) -> Vec<ActivityRecord> { self.records.lock().iter().cloned().collect() }

    pub fn len(&self) -> usize { self.records.lock().len() }

    pub fn is_empty(&self) -> bool { self.records.lock().is_empty() }
}

impl Default for ActivityLog {
    fn default() -> Self { Self::new(DEFAULT_ACTIVITY_CAPACITY) }
}

impl fmt::Debug for ActivityLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityLog")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
