//! Plugins registered on every overlay unless
//! `settings.overlay.register_defaults` is off.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::common::config::INTERNAL_NAMESPACE;
use crate::common::crash::CrashLog;
use crate::model::activity::ActivityLog;
use crate::model::flags::FeatureFlags;
use crate::model::registry::{ActionFuture, InfoProvider, InfoRow, OverlayAction, PluginContext, Registry};

pub mod diagnostics;

use diagnostics::{ClearCrashLog, CrashLogInfo, FeatureFlagsInfo, LifecycleInfo};

/// Records the built-in plugins read from.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    pub activity: Arc<ActivityLog>,
    pub crashes: Arc<CrashLog>,
    pub flags: Arc<FeatureFlags>,
}

pub fn register_defaults(registry: &Registry, diagnostics: &Diagnostics) {
    registry.register_provider(RuntimeInfo::new());
    registry.register_provider(LifecycleInfo::new(diagnostics.activity.clone()));
    registry.register_provider(PreferencesInfo);
    registry.register_provider(FeatureFlagsInfo::new(diagnostics.flags.clone()));
    registry.register_provider(CrashLogInfo::new(diagnostics.crashes.clone()));
    registry.register_action(ResetPreferences);
    registry.register_action(ClearCrashLog::new(diagnostics.crashes.clone()));
}

/// Build and process facts.
pub struct RuntimeInfo {
    started: Instant,
}

impl RuntimeInfo {
    pub fn new() -> Self { Self { started: Instant::now() } }
}

impl Default for RuntimeInfo {
    fn default() -> Self { Self::new() }
}

impl InfoProvider for RuntimeInfo {
    fn title(&self) -> &str { "Runtime" }

    fn render(&self, ctx: &PluginContext) -> anyhow::Result<Vec<InfoRow>> {
        Ok(vec![
            InfoRow::new("version", env!("CARGO_PKG_VERSION")),
            InfoRow::new("os", std::env::consts::OS),
            InfoRow::new("arch", std::env::consts::ARCH),
            InfoRow::new("pid", std::process::id()),
            InfoRow::new("uptime", format!("{}s", self.started.elapsed().as_secs())),
            InfoRow::new("window", ctx.window_name()),
        ])
    }
}

/// Every stored preference as `namespace.key = value`. Rows are editable.
pub struct PreferencesInfo;

impl InfoProvider for PreferencesInfo {
    fn title(&self) -> &str { "Preferences" }

    fn render(&self, ctx: &PluginContext) -> anyhow::Result<Vec<InfoRow>> {
        let prefs = ctx.prefs();
        let rows = prefs
            .namespaces()
            .into_iter()
            .flat_map(|namespace| {
                prefs
                    .entries(&namespace)
                    .into_iter()
                    .map(move |(key, value)| {
                        InfoRow::new(format!("{namespace}.{key}"), value).editing(namespace.as_str(), key)
                    })
            })
            .collect();
        Ok(rows)
    }
}

/// Clears application preferences, leaving the overlay's own settings alone.
pub struct ResetPreferences;

impl OverlayAction for ResetPreferences {
    fn title(&self) -> &str { "Reset preferences" }

    fn description(&self) -> Option<&str> { Some("Clear every stored preference namespace") }

    fn execute(&self, ctx: PluginContext) -> ActionFuture {
        Box::pin(async move {
            for namespace in ctx.prefs().namespaces() {
                if ctx.is_cancelled() {
                    anyhow::bail!("reset interrupted before {namespace}");
                }
                if namespace == INTERNAL_NAMESPACE {
                    continue;
                }
                ctx.prefs().clear(&namespace);
                debug!(%namespace, "cleared preferences");
                tokio::task::yield_now().await;
            }
            Ok(())
        })
    }
}
