//! Panics recorded by a process-wide hook so they can be read back from the
//! overlay after the fact.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::panic::{self, PanicHookInfo};
use std::sync::{Arc, Once, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::common::collections::VecDeque;
use crate::sys::scope::panic_message;

pub const DEFAULT_CRASH_CAPACITY: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrashRecord {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub thread: String,
    pub message: String,
    pub location: Option<String>,
    pub backtrace: Option<String>,
}

impl CrashRecord {
    fn from_hook(info: &PanicHookInfo<'_>) -> Self {
        let backtrace = Backtrace::capture();
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |since| u64::try_from(since.as_millis()).unwrap_or(u64::MAX));
        Self {
            timestamp_ms,
            thread: std::thread::current().name().unwrap_or("<unnamed>").to_owned(),
            message: panic_message(info.payload()),
            location: info.location().map(|at| format!("{}:{}", at.file(), at.line())),
            backtrace: (backtrace.status() == BacktraceStatus::Captured).then(|| backtrace.to_string()),
        }
    }
}

impl fmt::Display for CrashRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread '{}' panicked", self.thread)?;
        if let Some(location) = &self.location {
            write!(f, " at {location}")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Keeps the most recent panics, newest last.
pub struct CrashLog {
    capacity: usize,
    records: Mutex<VecDeque<CrashRecord>>,
}

impl CrashLog {
    pub fn new(capacity: usize) -> Self { Self { capacity, records: Mutex::default() } }

    /// The log the panic hook writes to.
    pub fn global() -> Arc<CrashLog> {
        static GLOBAL: OnceLock<Arc<CrashLog>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(CrashLog::new(DEFAULT_CRASH_CAPACITY))).clone()
    }

    pub fn record(&self, record: CrashRecord) {
        if self.capacity == 0 {
            return;
        }
        let mut records = self.records.lock();
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    pub fn records(&self) -> Vec<CrashRecord> { self.records.lock().iter().cloned().collect() }

    /// Returns how many records were dropped.
    pub fn clear(&self) -> usize {
        let mut records = self.records.lock();
        let cleared = records.len();
        records.clear();
        cleared
    }

    pub fn len(&self) -> usize { self.records.lock().len() }

    pub fn is_empty(&self) -> bool { self.records.lock().is_empty() }
}

impl fmt::Debug for CrashLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrashLog")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

/// Chains a hook in front of the current one that records every panic into
/// [`CrashLog::global`]. Later calls do nothing.
pub fn install_panic_hook() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        let log = CrashLog::global();
        panic::set_hook(Box::new(move |info| {
            log.record(CrashRecord::from_hook(info));
            previous(info);
        }));
        debug!("panic hook installed");
    });
}
