//! Providers over the coordinator's own records: lifecycle history, crash
//! log and feature flags.

use std::sync::Arc;

use tracing::debug;

use crate::common::crash::CrashLog;
use crate::model::activity::ActivityLog;
use crate::model::flags::{FEATURE_FLAGS_NAMESPACE, FeatureFlags};
use crate::model::registry::{ActionFuture, InfoProvider, InfoRow, OverlayAction, PluginContext};

/// Recent lifecycle callbacks across all windows, oldest first.
pub struct LifecycleInfo {
    log: Arc<ActivityLog>,
}

impl LifecycleInfo {
    pub fn new(log: Arc<ActivityLog>) -> Self { Self { log } }
}

impl InfoProvider for LifecycleInfo {
    fn title(&self) -> &str { "Lifecycle" }

    fn render(&self, _: &PluginContext) -> anyhow::Result<Vec<InfoRow>> {
        let rows = self
            .log
            .records()
            .into_iter()
            .map(|record| {
                InfoRow::new(
                    format!("+{:.3}s", record.at.as_secs_f64()),
                    format!("{}: {}", record.window_name, record.state),
                )
            })
            .collect();
        Ok(rows)
    }
}

/// Flags with their current values. Rows are editable as `true`/`false`.
pub struct FeatureFlagsInfo {
    flags: Arc<FeatureFlags>,
}

impl FeatureFlagsInfo {
    pub fn new(flags: Arc<FeatureFlags>) -> Self { Self { flags } }
}

impl InfoProvider for FeatureFlagsInfo {
    fn title(&self) -> &str { "Feature flags" }

    fn render(&self, _: &PluginContext) -> anyhow::Result<Vec<InfoRow>> {
        let rows = self
            .flags
            .flags()
            .into_iter()
            .map(|(flag, enabled)| {
                InfoRow::new(flag.key.as_str(), enabled).editing(FEATURE_FLAGS_NAMESPACE, flag.key)
            })
            .collect();
        Ok(rows)
    }
}

/// Recorded panics, newest first.
pub struct CrashLogInfo {
    log: Arc<CrashLog>,
}

impl CrashLogInfo {
    pub fn new(log: Arc<CrashLog>) -> Self { Self { log } }
}

impl InfoProvider for CrashLogInfo {
    fn title(&self) -> &str { "Crash log" }

    fn render(&self, _: &PluginContext) -> anyhow::Result<Vec<InfoRow>> {
        let rows = self
            .log
            .records()
            .into_iter()
            .rev()
            .map(|record| {
                let location = record.location.as_deref().unwrap_or("unknown location");
                InfoRow::new(location, format!("thread '{}': {}", record.thread, record.message))
            })
            .collect();
        Ok(rows)
    }
}

pub struct ClearCrashLog {
    log: Arc<CrashLog>,
}

impl ClearCrashLog {
    pub fn new(log: Arc<CrashLog>) -> Self { Self { log } }
}

impl OverlayAction for ClearCrashLog {
    fn title(&self) -> &str { "Clear crash log" }

    fn description(&self) -> Option<&str> { Some("Forget every recorded panic") }

    fn execute(&self, _: PluginContext) -> ActionFuture {
        let log = self.log.clone();
        Box::pin(async move {
            let cleared = log.clear();
            debug!(cleared, "crash log cleared");
            Ok(())
        })
    }
}
