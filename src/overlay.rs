//! The handle an application keeps after installing the overlay.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::DropGuard;
use tracing::{Instrument, debug, info_span, trace};

use crate::actor::broadcast::{BroadcastReceiver, BroadcastSender};
use crate::actor::lifecycle::{self, Event, LifecycleCoordinator, Services};
use crate::actor;
use crate::common::config::{
    Config, ConfigSource, INTERNAL_NAMESPACE, LONG_PRESS_DELAY_KEY, StoredConfig,
};
use crate::common::crash::{self, CrashLog};
use crate::common::prefs::{MemoryStore, PreferenceStore, PreferenceStoreExt};
use crate::model::activity::ActivityLog;
use crate::model::flags::FeatureFlags;
use crate::model::registry::Registry;
use crate::model::snapshot::{CoordinatorStats, WindowSnapshot};
use crate::model::window::{DismissReason, LifecycleState, WindowId};
use crate::plugins::{self, Diagnostics};
use crate::sys::host::{HostApplication, HostWindow, LifecycleListener, LogNotifier, Notifier, WindowHandle};

const BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("overlay coordinator has stopped")]
    Stopped,
}

/// Collects the collaborators of an [`Overlay`]. Anything not supplied gets
/// an in-process default.
pub struct OverlayBuilder {
    config: Config,
    registry: Option<Arc<Registry>>,
    prefs: Option<Arc<dyn PreferenceStore>>,
    config_source: Option<Arc<dyn ConfigSource>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl OverlayBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry: None,
            prefs: None,
            config_source: None,
            notifier: None,
        }
    }

    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn prefs(mut self, prefs: Arc<dyn PreferenceStore>) -> Self {
        self.prefs = Some(prefs);
        self
    }

    /// Replaces the preference-backed delay lookup.
    pub fn config_source(mut self, source: Arc<dyn ConfigSource>) -> Self {
        self.config_source = Some(source);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Wires everything up without starting the coordinator. The caller
    /// must drive [`LifecycleCoordinator::run`].
    pub fn build(self) -> (Overlay, LifecycleCoordinator) {
        let settings = self.config.settings;
        let prefs = self.prefs.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let config = self
            .config_source
            .unwrap_or_else(|| Arc::new(StoredConfig::new(prefs.clone(), settings.gesture.clone())));
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(LogNotifier));
        if settings.overlay.capture_panics {
            crash::install_panic_hook();
        }
        let diagnostics = Diagnostics {
            activity: Arc::new(ActivityLog::new(settings.overlay.max_lifecycle_records)),
            crashes: CrashLog::global(),
            flags: Arc::new(FeatureFlags::new(prefs.clone())),
        };
        let registry = self.registry.unwrap_or_default();
        if settings.overlay.register_defaults {
            plugins::register_defaults(&registry, &diagnostics);
        }

        let (events_tx, events_rx) = actor::channel();
        let (broadcast, _) = broadcast::channel(BROADCAST_CAPACITY);
        let services = Services {
            registry: registry.clone(),
            config,
            prefs: prefs.clone(),
            notifier,
            activity: diagnostics.activity.clone(),
        };
        let coordinator = LifecycleCoordinator::new(
            events_rx,
            events_tx.clone(),
            services,
            broadcast.clone(),
            settings.overlay.max_recorded_outcomes,
        );
        let overlay = Overlay {
            events: events_tx,
            registry,
            prefs,
            diagnostics,
            broadcast,
            _release: Arc::new(coordinator.release_guard()),
        };
        (overlay, coordinator)
    }

    /// Builds and runs the coordinator on the current tokio runtime. It runs
    /// until [`Overlay::shutdown`], or until every [`Overlay`] clone is gone,
    /// including the one [`Overlay::install`] hands to the host.
    pub fn spawn(self) -> (Overlay, JoinHandle<()>) {
        let (overlay, coordinator) = self.build();
        let task = tokio::spawn(coordinator.run().instrument(info_span!("overlay")));
        (overlay, task)
    }
}

/// Cheap to clone; every clone talks to the same coordinator.
#[derive(Clone)]
pub struct Overlay {
    events: lifecycle::Sender,
    registry: Arc<Registry>,
    prefs: Arc<dyn PreferenceStore>,
    diagnostics: Diagnostics,
    broadcast: BroadcastSender,
    _release: Arc<DropGuard>,
}

impl Overlay {
    pub fn builder(config: Config) -> OverlayBuilder { OverlayBuilder::new(config) }

    /// Registers for lifecycle callbacks of every window the host creates
    /// from now on. Windows that already exist are picked up on their next
    /// callback.
    pub fn install(&self, app: &dyn HostApplication) {
        app.register_lifecycle_listener(Arc::new(self.clone()));
        debug!("overlay installed");
    }

    pub fn registry(&self) -> &Arc<Registry> { &self.registry }

    pub fn prefs(&self) -> &Arc<dyn PreferenceStore> { &self.prefs }

    /// Flags the host defines; users flip them from the overlay.
    pub fn feature_flags(&self) -> &Arc<FeatureFlags> { &self.diagnostics.flags }

    pub fn activity(&self) -> &Arc<ActivityLog> { &self.diagnostics.activity }

    pub fn crash_log(&self) -> &Arc<CrashLog> { &self.diagnostics.crashes }

    pub fn subscribe(&self) -> BroadcastReceiver { self.broadcast.subscribe() }

    /// Persists a new delay; the next pointer-down uses it.
    pub fn set_long_press_delay(&self, delay: Duration) {
        let ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        self.prefs.put(INTERNAL_NAMESPACE, LONG_PRESS_DELAY_KEY, ms);
    }

    /// Opens the overlay on a window as if it had been long-pressed.
    pub fn show(&self, window_id: WindowId) { self.post(Event::Show(window_id)); }

    pub fn dismiss(&self, window_id: WindowId) {
        self.post(Event::Dismiss {
            window_id,
            scope_id: None,
            reason: DismissReason::Programmatic,
        });
    }

    pub async fn snapshot(&self, window_id: WindowId) -> Result<Option<WindowSnapshot>, OverlayError> {
        self.query(|response| Event::QueryWindow { window_id, response }).await
    }

    /// Every tracked window, ordered by id.
    pub async fn windows(&self) -> Result<Vec<WindowSnapshot>, OverlayError> {
        self.query(|response| Event::QueryWindows { response }).await
    }

    /// Answered after every event queued before it, so it doubles as a flush.
    pub async fn stats(&self) -> Result<CoordinatorStats, OverlayError> {
        self.query(|response| Event::QueryStats { response }).await
    }

    /// Hides every surface and restores every event chain. The coordinator
    /// task ends afterwards.
    pub fn shutdown(&self) { self.post(Event::Shutdown); }

    pub fn is_running(&self) -> bool { !self.events.is_closed() }

    async fn query<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Event) -> Result<T, OverlayError> {
        let (tx, rx) = oneshot::channel();
        self.events.send(make(tx)).map_err(|_| OverlayError::Stopped)?;
        rx.await.map_err(|_| OverlayError::Stopped)
    }

    fn post(&self, event: Event) {
        if let Err(err) = self.events.send(event) {
            trace!(event = ?err.0, "overlay stopped; dropping event");
        }
    }

    fn lifecycle(&self, window: &Arc<dyn HostWindow>, state: LifecycleState) {
        self.post(Event::Lifecycle(WindowHandle::new(window.clone()), state));
    }
}

impl LifecycleListener for Overlay {
    fn created(&self, window: &Arc<dyn HostWindow>) { self.lifecycle(window, LifecycleState::Created) }

    fn started(&self, window: &Arc<dyn HostWindow>) { self.lifecycle(window, LifecycleState::Started) }

    fn resumed(&self, window: &Arc<dyn HostWindow>) { self.lifecycle(window, LifecycleState::Resumed) }

    fn paused(&self, window: &Arc<dyn HostWindow>) { self.lifecycle(window, LifecycleState::Paused) }

    fn stopped(&self, window: &Arc<dyn HostWindow>) { self.lifecycle(window, LifecycleState::Stopped) }

    fn destroyed(&self, window: &Arc<dyn HostWindow>) { self.lifecycle(window, LifecycleState::Destroyed) }
}
