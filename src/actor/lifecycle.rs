//! The lifecycle coordinator owns all per-window overlay state.
//!
//! Lifecycle callbacks, pointer observations, timer fires, dismiss requests
//! and plugin outcomes all arrive as [`Event`]s and are handled one at a time
//! on the coordinator's task, which plays the role of the host's UI thread.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio::sync::oneshot;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::actor::broadcast::{BroadcastEvent, BroadcastSender};
use crate::actor;
use crate::common::collections::{HashMap, VecDeque};
use crate::common::config::ConfigSource;
use crate::common::prefs::PreferenceStore;
use crate::model::activity::ActivityLog;
use crate::model::registry::{PluginKind, Registry};
use crate::model::snapshot::{CoordinatorStats, PluginReport, WindowSnapshot};
use crate::model::window::{DismissReason, GestureState, LifecycleState, WindowId};
use crate::sys::event::{PointerAction, PointerEvent};
use crate::sys::host::{self, HostWindow, Notice, Notifier, WindowHandle, WindowRef};
use crate::sys::interceptor::{self, PointerObserver, Restore, TouchInterceptor};
use crate::sys::scope::{ScopeId, UnitOutcome, panic_message};
use crate::sys::timer::{GestureTimer, TimerToken};
use crate::ui::overlay::{OverlayPresenter, ShowError, ShowOutcome, SurfaceSlot};

#[derive(Debug)]
pub enum Event {
    Lifecycle(WindowHandle, LifecycleState),
    Pointer(WindowId, PointerEvent),
    GestureTimerFired(WindowId, TimerToken),
    /// Programmatic show, bypassing the gesture.
    Show(WindowId),
    /// `scope_id` pins the request to one surface; `None` hides whatever is
    /// attached.
    Dismiss {
        window_id: WindowId,
        scope_id: Option<ScopeId>,
        reason: DismissReason,
    },
    PluginReported {
        window_id: WindowId,
        scope_id: ScopeId,
        report: PluginReport,
    },
    QueryWindow {
        window_id: WindowId,
        response: oneshot::Sender<Option<WindowSnapshot>>,
    },
    QueryWindows {
        response: oneshot::Sender<Vec<WindowSnapshot>>,
    },
    QueryStats {
        response: oneshot::Sender<CoordinatorStats>,
    },
    /// Hides every surface, restores every event chain and stops the actor.
    Shutdown,
}

pub type Sender = actor::Sender<Event>;
pub type Receiver = actor::Receiver<Event>;

/// Collaborators shared with the rest of the process.
#[derive(Clone)]
pub struct Services {
    pub registry: Arc<Registry>,
    pub config: Arc<dyn ConfigSource>,
    pub prefs: Arc<dyn PreferenceStore>,
    pub notifier: Arc<dyn Notifier>,
    pub activity: Arc<ActivityLog>,
}

struct WindowEntry {
    window: WindowRef,
    name: String,
    lifecycle: LifecycleState,
    gesture: GestureState,
    timer: GestureTimer,
    surface: SurfaceSlot,
    interceptor: Option<Arc<TouchInterceptor>>,
    outcomes: VecDeque<PluginReport>,
}

pub struct LifecycleCoordinator {
    rx: Receiver,
    tx: Sender,
    windows: HashMap<WindowId, WindowEntry>,
    foreground: Option<WindowRef>,
    presenter: OverlayPresenter,
    config: Arc<dyn ConfigSource>,
    notifier: Arc<dyn Notifier>,
    activity: Arc<ActivityLog>,
    broadcast: BroadcastSender,
    max_outcomes: usize,
    released: CancellationToken,
}

impl LifecycleCoordinator {
    pub fn new(
        rx: Receiver,
        tx: Sender,
        services: Services,
        broadcast: BroadcastSender,
        max_outcomes: usize,
    ) -> Self {
        let presenter = OverlayPresenter::new(
            services.registry,
            services.config.clone(),
            services.prefs,
            tx.clone(),
        );
        Self {
            rx,
            tx,
            windows: HashMap::default(),
            foreground: None,
            presenter,
            config: services.config,
            notifier: services.notifier,
            activity: services.activity,
            broadcast,
            max_outcomes,
            released: CancellationToken::new(),
        }
    }

    pub fn sender(&self) -> Sender { self.tx.clone() }

    /// Once every clone of the returned guard is dropped, [`run`](Self::run)
    /// uninstalls the overlay and returns. Interceptors and open surfaces
    /// hold their own senders, so the channel alone never closes.
    pub fn release_guard(&self) -> DropGuard { self.released.clone().drop_guard() }

    pub async fn run(mut self) {
        loop {
            let next = tokio::select! {
                biased;
                next = self.rx.recv() => next,
                () = self.released.cancelled() => None,
            };
            let Some((span, event)) = next else {
                debug!("every overlay handle dropped; uninstalling");
                self.shutdown();
                break;
            };
            let stop = matches!(event, Event::Shutdown);
            let handled = panic::catch_unwind(AssertUnwindSafe(|| span.in_scope(|| self.handle_event(event))));
            if let Err(payload) = handled {
                error!(panic = %panic_message(&*payload), "lifecycle event handler panicked");
            }
            if stop {
                break;
            }
        }
        debug!("lifecycle coordinator stopped");
    }

    #[instrument(name = "lifecycle::handle_event", skip(self))]
    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::Lifecycle(handle, state) => self.handle_lifecycle(&handle, state),
            Event::Pointer(window_id, pointer) => self.handle_pointer(window_id, pointer),
            Event::GestureTimerFired(window_id, token) => self.handle_timer_fired(window_id, token),
            Event::Show(window_id) => {
                self.show(window_id);
            }
            Event::Dismiss { window_id, scope_id, reason } => {
                self.handle_dismiss(window_id, scope_id, reason)
            }
            Event::PluginReported { window_id, scope_id, report } => {
                self.handle_plugin_reported(window_id, scope_id, report)
            }
            Event::QueryWindow { window_id, response } => {
                _ = response.send(self.snapshot(window_id));
            }
            Event::QueryWindows { response } => {
                let mut ids: Vec<_> = self.windows.keys().copied().collect();
                ids.sort();
                _ = response.send(ids.into_iter().filter_map(|id| self.snapshot(id)).collect());
            }
            Event::QueryStats { response } => {
                _ = response.send(self.stats());
            }
            Event::Shutdown => self.shutdown(),
        }
    }

    fn handle_lifecycle(&mut self, handle: &WindowHandle, state: LifecycleState) {
        self.activity.record(handle.id(), &handle.window().name(), state);
        if let Some(entry) = self.windows.get_mut(&handle.id()) {
            entry.window = handle.downgrade();
        }
        match state {
            LifecycleState::Created => self.on_created(handle),
            LifecycleState::Started => self.on_started(handle),
            LifecycleState::Resumed => self.on_resumed(handle),
            LifecycleState::Paused => self.on_paused(handle),
            LifecycleState::Stopped => self.on_stopped(handle),
            LifecycleState::Destroyed => self.on_destroyed(handle),
        }
    }

    fn on_created(&mut self, handle: &WindowHandle) {
        let window_id = handle.id();
        if self.windows.contains_key(&window_id) {
            debug!(%window_id, "window already tracked");
            return;
        }
        self.track(handle, LifecycleState::Created);
    }

    fn on_started(&mut self, handle: &WindowHandle) { self.enter(handle, LifecycleState::Started); }

    fn on_resumed(&mut self, handle: &WindowHandle) {
        if !self.enter(handle, LifecycleState::Resumed) {
            return;
        }
        let window_id = handle.id();
        self.foreground = Some(handle.downgrade());

        let Some(entry) = self.windows.get(&window_id) else { return };
        if let Some(installed) = &entry.interceptor
            && !chain_starts_with(handle.window().as_ref(), installed)
        {
            warn!(%window_id, "event chain was replaced after creation; long press may not be detected");
        }
    }

    fn on_paused(&mut self, handle: &WindowHandle) {
        let window_id = handle.id();
        self.cancel_gesture(window_id);
        self.hide(window_id, DismissReason::Paused);
        self.transition(window_id, LifecycleState::Paused);
        self.release_foreground(window_id);
    }

    fn on_stopped(&mut self, handle: &WindowHandle) {
        let window_id = handle.id();
        self.cancel_gesture(window_id);
        if self.hide(window_id, DismissReason::Stopped) {
            debug!(%window_id, "surface outlived pause; removed on stop");
        }
        self.transition(window_id, LifecycleState::Stopped);
    }

    fn on_destroyed(&mut self, handle: &WindowHandle) {
        let window_id = handle.id();
        self.cancel_gesture(window_id);
        self.hide(window_id, DismissReason::Destroyed);
        self.release_foreground(window_id);

        let Some(mut entry) = self.windows.remove(&window_id) else {
            debug!(%window_id, "destroy for an untracked window");
            return;
        };
        if let Err(err) = entry.lifecycle.transition(LifecycleState::Destroyed) {
            warn!(%window_id, %err, "following the host's lifecycle order");
        }
        if let Some(installed) = entry.interceptor.take() {
            restore_chain(handle.window().as_ref(), &installed);
        }
        drop(entry);

        self.publish(BroadcastEvent::LifecycleChanged {
            window_id,
            state: LifecycleState::Destroyed,
        });
        self.publish(BroadcastEvent::WindowReleased { window_id });
    }

    /// Moves a tracked window to `state`. A window first seen here was
    /// created before the overlay was installed and starts tracking in
    /// `state`; destroyed windows are never tracked.
    fn enter(&mut self, handle: &WindowHandle, state: LifecycleState) -> bool {
        let window_id = handle.id();
        if self.windows.contains_key(&window_id) {
            self.transition(window_id, state);
            return true;
        }
        if handle.window().is_destroyed() {
            debug!(%window_id, %state, "ignoring lifecycle event for a destroyed window");
            return false;
        }
        debug!(%window_id, %state, "tracking a window created before installation");
        self.track(handle, state);
        true
    }

    fn track(&mut self, handle: &WindowHandle, state: LifecycleState) {
        let window = handle.window();
        let window_id = window.id();
        let name = window.name();
        let surface = SurfaceSlot::new();
        let interceptor = self.install_interceptor(window.as_ref(), surface.visible_flag());

        self.windows.insert(
            window_id,
            WindowEntry {
                window: handle.downgrade(),
                name: name.clone(),
                lifecycle: state,
                gesture: GestureState::Idle,
                timer: GestureTimer::new(),
                surface,
                interceptor,
                outcomes: VecDeque::new(),
            },
        );
        self.publish(BroadcastEvent::WindowTracked { window_id, name });
        self.publish(BroadcastEvent::LifecycleChanged { window_id, state });
    }

    fn install_interceptor(
        &self,
        window: &dyn HostWindow,
        visible: Arc<AtomicBool>,
    ) -> Option<Arc<TouchInterceptor>> {
        let window_id = window.id();
        let events = self.tx.clone();
        let observer: PointerObserver = Box::new(move |pointer: &PointerEvent| {
            _ = events.send(Event::Pointer(window_id, *pointer));
        });
        match host::guarded("set_event_callback", || interceptor::wrap(window, visible, observer)) {
            Ok(Some(installed)) => Some(installed),
            Ok(None) => {
                debug!(%window_id, "event chain already intercepted; skipping");
                None
            }
            Err(err) => {
                warn!(%window_id, %err, "cannot observe pointer events");
                None
            }
        }
    }

    /// Records a lifecycle transition. Unexpected orders are logged and the
    /// host's order wins.
    fn transition(&mut self, window_id: WindowId, next: LifecycleState) {
        let Some(entry) = self.windows.get_mut(&window_id) else {
            trace!(%window_id, %next, "lifecycle event for an untracked window");
            return;
        };
        if let Err(err) = entry.lifecycle.transition(next) {
            warn!(%window_id, %err, "following the host's lifecycle order");
        }
        entry.lifecycle = next;
        self.publish(BroadcastEvent::LifecycleChanged { window_id, state: next });
    }

    fn release_foreground(&mut self, window_id: WindowId) {
        if self.foreground.as_ref().is_some_and(|fg| fg.id() == window_id) {
            self.foreground = None;
        }
    }

    fn handle_pointer(&mut self, window_id: WindowId, pointer: PointerEvent) {
        let Some(entry) = self.windows.get_mut(&window_id) else {
            trace!(%window_id, "pointer event for an untracked window");
            return;
        };
        match pointer.action {
            PointerAction::Down => {
                if entry.surface.is_attached() || !entry.lifecycle.accepts_gestures() {
                    trace!(%window_id, lifecycle = %entry.lifecycle, "not arming gesture");
                    return;
                }
                let delay = self.config.snapshot().long_press_delay;
                let events = self.tx.clone();
                let armed = entry.timer.arm(delay, move |token| {
                    _ = events.send(Event::GestureTimerFired(window_id, token));
                });
                if armed.is_some() {
                    entry.gesture = GestureState::TimerArmed;
                    self.publish(BroadcastEvent::GestureArmed {
                        window_id,
                        delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    });
                }
            }
            PointerAction::Up | PointerAction::Cancel => self.cancel_gesture(window_id),
            PointerAction::Move => {}
        }
    }

    fn cancel_gesture(&mut self, window_id: WindowId) {
        let Some(entry) = self.windows.get_mut(&window_id) else { return };
        if !entry.timer.cancel() {
            return;
        }
        if entry.gesture == GestureState::TimerArmed {
            entry.gesture = GestureState::Idle;
        }
        self.publish(BroadcastEvent::GestureCancelled { window_id });
    }

    fn handle_timer_fired(&mut self, window_id: WindowId, token: TimerToken) {
        let Some(entry) = self.windows.get_mut(&window_id) else {
            trace!(%window_id, "timer fired for a released window");
            return;
        };
        if !entry.timer.claim(token) {
            trace!(%window_id, "discarding stale gesture timer");
            return;
        }
        entry.gesture = GestureState::Fired;
        if let Some(foreground) = &self.foreground
            && foreground.id() != window_id
        {
            debug!(%window_id, foreground = %foreground.id(), "long press on a background window");
            entry.gesture = GestureState::Idle;
            return;
        }
        info!(%window_id, "long press detected");
        self.show(window_id);
    }

    fn show(&mut self, window_id: WindowId) -> bool {
        let Some(entry) = self.windows.get_mut(&window_id) else {
            debug!(%window_id, "show requested for an untracked window");
            return false;
        };
        let Some(window) = entry.window.upgrade() else {
            debug!(%window_id, "window already released");
            entry.gesture = GestureState::Idle;
            return false;
        };
        match self.presenter.show(&window, &mut entry.surface) {
            Ok(ShowOutcome::Attached(scope_id)) => {
                entry.timer.cancel();
                entry.gesture = GestureState::Fired;
                let (providers, actions) = entry.surface.plugin_counts();
                self.publish(BroadcastEvent::SurfaceShown { window_id, scope_id, providers, actions });
                true
            }
            Ok(ShowOutcome::AlreadyAttached(_)) => false,
            Err(ShowError::WindowFinishing(_)) => {
                warn!(%window_id, "window is finishing; overlay not shown");
                entry.gesture = GestureState::Idle;
                false
            }
            Err(err) => {
                warn!(%window_id, %err, "failed to show overlay");
                entry.gesture = GestureState::Idle;
                false
            }
        }
    }

    /// Returns whether a surface was attached.
    fn hide(&mut self, window_id: WindowId, reason: DismissReason) -> bool {
        let Some(entry) = self.windows.get_mut(&window_id) else { return false };
        let window = entry.window.upgrade();
        let Some(scope_id) = self.presenter.hide(window.as_ref(), &mut entry.surface, reason) else {
            return false;
        };
        entry.gesture = GestureState::Idle;
        self.publish(BroadcastEvent::SurfaceHidden { window_id, scope_id, reason });
        true
    }

    fn handle_dismiss(&mut self, window_id: WindowId, scope_id: Option<ScopeId>, reason: DismissReason) {
        if let Some(expected) = scope_id {
            let current = self.windows.get(&window_id).and_then(|entry| entry.surface.scope_id());
            if current != Some(expected) {
                debug!(%window_id, %reason, "dismiss for a surface that is already gone");
                return;
            }
        }
        if !self.hide(window_id, reason) {
            trace!(%window_id, %reason, "nothing to dismiss");
        }
    }

    fn handle_plugin_reported(&mut self, window_id: WindowId, scope_id: ScopeId, report: PluginReport) {
        let Some(entry) = self.windows.get_mut(&window_id) else { return };
        if entry.surface.scope_id() != Some(scope_id) {
            debug!(%window_id, title = %report.title, outcome = %report.outcome, "discarding outcome from a closed surface");
            return;
        }
        match &report.outcome {
            UnitOutcome::Failed(message) | UnitOutcome::Panicked(message) => {
                deliver(self.notifier.as_ref(), window_id, &Notice::error(format!("{} failed: {message}", report.title)));
            }
            UnitOutcome::Completed if report.kind == PluginKind::Action => {
                deliver(self.notifier.as_ref(), window_id, &Notice::info(format!("{} finished", report.title)));
            }
            _ => {}
        }
        let event = BroadcastEvent::plugin_outcome(window_id, &report);
        entry.outcomes.push_back(report);
        while entry.outcomes.len() > self.max_outcomes {
            entry.outcomes.pop_front();
        }
        self.publish(event);
    }

    fn snapshot(&self, window_id: WindowId) -> Option<WindowSnapshot> {
        let entry = self.windows.get(&window_id)?;
        Some(WindowSnapshot {
            id: window_id,
            name: entry.name.clone(),
            lifecycle: entry.lifecycle,
            gesture: entry.gesture,
            surface: entry.surface.state(),
            is_foreground: self.foreground.as_ref().is_some_and(|fg| fg.id() == window_id),
            timer_armed: entry.timer.is_armed(),
            interceptor_installed: entry.interceptor.as_ref().is_some_and(|i| i.is_live()),
            outcomes: entry.outcomes.iter().cloned().collect(),
        })
    }

    fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            tracked_windows: self.windows.len(),
            live_scopes: self.presenter.live_scopes(),
            foreground: self.foreground.as_ref().map(WindowRef::id),
        }
    }

    fn shutdown(&mut self) {
        let mut ids: Vec<_> = self.windows.keys().copied().collect();
        ids.sort();
        for window_id in ids {
            self.cancel_gesture(window_id);
            self.hide(window_id, DismissReason::Shutdown);
            let Some(mut entry) = self.windows.remove(&window_id) else { continue };
            if let (Some(installed), Some(window)) = (entry.interceptor.take(), entry.window.upgrade()) {
                restore_chain(window.as_ref(), &installed);
            }
            self.publish(BroadcastEvent::WindowReleased { window_id });
        }
        self.foreground = None;
        info!("overlay uninstalled");
    }

    fn publish(&self, event: BroadcastEvent) {
        // No subscribers is fine.
        _ = self.broadcast.send(event);
    }
}

fn deliver(notifier: &dyn Notifier, window_id: WindowId, notice: &Notice) {
    let delivered = host::guarded("notify", || {
        notifier.notify(window_id, notice);
        Ok(())
    });
    if let Err(err) = delivered {
        warn!(%window_id, %err, message = %notice.message, "notice not delivered");
    }
}

fn chain_starts_with(window: &dyn HostWindow, installed: &Arc<TouchInterceptor>) -> bool {
    window
        .event_callback()
        .is_some_and(|head| head.as_interceptor().is_some_and(|i| std::ptr::eq(i, installed.as_ref())))
}

fn restore_chain(window: &dyn HostWindow, installed: &Arc<TouchInterceptor>) {
    let window_id = window.id();
    match host::guarded("set_event_callback", || interceptor::unwrap(window, installed)) {
        Ok(Restore::Restored) => trace!(%window_id, "restored original event chain"),
        Ok(Restore::Replaced) => {
            warn!(%window_id, "event chain was replaced by someone else; leaving it in place")
        }
        Ok(Restore::ChainMissing) => warn!(%window_id, "window lost its event chain"),
        Err(err) => {
            error!(%window_id, %err, "failed to restore the original event chain; host input may be broken")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use test_log::test;

    use super::*;
    use crate::actor::broadcast::BroadcastReceiver;
    use crate::common::config::Configuration;
    use crate::common::prefs::MemoryStore;
    use crate::model::window::SurfaceState;
    use crate::sim::{RecordingNotifier, SimWindow};
    use crate::sys::host::NoticeLevel;

    const DELAY: Duration = Duration::from_millis(2000);

    struct Harness {
        coordinator: LifecycleCoordinator,
        events: BroadcastReceiver,
        registry: Arc<Registry>,
        notifier: Arc<RecordingNotifier>,
        activity: Arc<ActivityLog>,
    }

    impl Harness {
        fn new() -> Self {
            let (tx, rx) = actor::channel();
            let (broadcast, events) = tokio::sync::broadcast::channel(256);
            let registry = Arc::new(Registry::new());
            let notifier = RecordingNotifier::new();
            let activity = Arc::new(ActivityLog::default());
            let services = Services {
                registry: registry.clone(),
                config: Arc::new(Configuration { long_press_delay: DELAY }),
                prefs: Arc::new(MemoryStore::new()),
                notifier: notifier.clone(),
                activity: activity.clone(),
            };
            let coordinator = LifecycleCoordinator::new(rx, tx, services, broadcast, 4);
            Self { coordinator, events, registry, notifier, activity }
        }

        fn lifecycle(&mut self, window: &Arc<SimWindow>, state: LifecycleState) {
            self.coordinator.handle_event(Event::Lifecycle(WindowHandle::new(window.clone()), state));
        }

        fn launch(&mut self, id: u64) -> Arc<SimWindow> {
            let window = SimWindow::new(id, "main");
            for state in [LifecycleState::Created, LifecycleState::Started, LifecycleState::Resumed] {
                self.lifecycle(&window, state);
            }
            window
        }

        /// Handles everything the coordinator posted to itself.
        fn pump(&mut self) {
            while let Some((_, event)) = self.coordinator.rx.try_recv() {
                self.coordinator.handle_event(event);
            }
        }

        async fn advance(&mut self, by: Duration) {
            self.pump();
            tokio::time::sleep(by).await;
            for _ in 0..4 {
                tokio::task::yield_now().await;
                self.pump();
            }
        }

        async fn long_press(&mut self, window: &Arc<SimWindow>) {
            window.touch(PointerEvent::down(10.0, 10.0));
            self.advance(DELAY + Duration::from_millis(1)).await;
        }

        fn snapshot(&self, window: &Arc<SimWindow>) -> WindowSnapshot {
            self.coordinator.snapshot(window.id()).expect("window is tracked")
        }

        fn broadcasts(&mut self) -> Vec<BroadcastEvent> {
            std::iter::from_fn(|| self.events.try_recv().ok()).collect()
        }
    }

    #[test(tokio::test(start_paused = true))]
    async fn long_press_shows_overlay() {
        let mut h = Harness::new();
        h.registry.add_provider("info", |_| Ok(vec![]));
        let window = h.launch(1);

        window.touch(PointerEvent::down(10.0, 10.0));
        h.pump();
        assert_eq!(h.snapshot(&window).gesture, GestureState::TimerArmed);

        h.advance(DELAY + Duration::from_millis(1)).await;
        let snapshot = h.snapshot(&window);
        assert!(snapshot.surface.is_attached());
        assert_eq!(snapshot.gesture, GestureState::Fired);
        assert!(!snapshot.timer_armed);
        assert_eq!(window.surfaces().len(), 1);
        assert!(h.broadcasts().iter().any(|event| matches!(
            event,
            BroadcastEvent::SurfaceShown { providers: 1, actions: 0, .. }
        )));
    }

    #[test(tokio::test(start_paused = true))]
    async fn release_before_delay_cancels() {
        let mut h = Harness::new();
        let window = h.launch(1);

        window.touch(PointerEvent::down(0.0, 0.0));
        h.advance(DELAY - Duration::from_millis(1)).await;
        window.touch(PointerEvent::up(0.0, 0.0));
        h.advance(Duration::from_secs(5)).await;

        let snapshot = h.snapshot(&window);
        assert_eq!(snapshot.surface, SurfaceState::Detached);
        assert_eq!(snapshot.gesture, GestureState::Idle);
        assert!(window.surfaces().is_empty());
    }

    #[test(tokio::test(start_paused = true))]
    async fn pointer_cancel_and_pause_disarm_the_timer() {
        let mut h = Harness::new();
        let window = h.launch(1);

        window.touch(PointerEvent::down(0.0, 0.0));
        window.touch(PointerEvent::cancel());
        h.advance(DELAY * 2).await;
        assert!(window.surfaces().is_empty());

        window.touch(PointerEvent::down(0.0, 0.0));
        h.pump();
        h.lifecycle(&window, LifecycleState::Paused);
        h.advance(DELAY * 2).await;
        assert!(window.surfaces().is_empty());
        assert!(!h.snapshot(&window).timer_armed);
    }

    #[test(tokio::test(start_paused = true))]
    async fn pause_hides_and_cancels_scope() {
        let mut h = Harness::new();
        let window = h.launch(1);
        h.long_press(&window).await;
        let surface = window.top_surface().unwrap();

        h.lifecycle(&window, LifecycleState::Paused);
        assert!(window.surfaces().is_empty());
        assert!(!surface.is_open());
        assert_eq!(h.coordinator.stats().live_scopes, 0);
        assert_eq!(window.back_handler_count(), 0);
        assert_eq!(h.snapshot(&window).gesture, GestureState::Idle);
        assert_eq!(h.coordinator.stats().foreground, None);
    }

    #[test(tokio::test(start_paused = true))]
    async fn destroy_restores_chain_and_forgets_window() {
        let mut h = Harness::new();
        let window = h.launch(1);
        h.long_press(&window).await;

        for state in [LifecycleState::Paused, LifecycleState::Stopped, LifecycleState::Destroyed] {
            h.lifecycle(&window, state);
        }
        assert!(window.event_callback().unwrap().as_interceptor().is_none());
        assert_eq!(h.coordinator.snapshot(window.id()), None);
        assert_eq!(h.coordinator.stats(), CoordinatorStats::default());
        assert!(matches!(
            h.broadcasts().last(),
            Some(BroadcastEvent::WindowReleased { window_id: WindowId(1) })
        ));
    }

    #[test(tokio::test(start_paused = true))]
    async fn finishing_window_never_shows() {
        let mut h = Harness::new();
        let window = h.launch(1);
        window.finish();

        h.long_press(&window).await;
        assert!(window.surfaces().is_empty());
        assert_eq!(h.snapshot(&window).gesture, GestureState::Idle);
    }

    #[test(tokio::test(start_paused = true))]
    async fn back_press_dismisses() {
        let mut h = Harness::new();
        let window = h.launch(1);
        h.long_press(&window).await;

        assert!(window.press_back());
        h.pump();
        assert!(window.surfaces().is_empty());
        assert!(h.broadcasts().iter().any(|event| matches!(
            event,
            BroadcastEvent::SurfaceHidden { reason: DismissReason::BackNavigation, .. }
        )));
    }

    #[test(tokio::test(start_paused = true))]
    async fn stale_dismiss_does_not_touch_new_surface() {
        let mut h = Harness::new();
        let window = h.launch(1);
        h.coordinator.handle_event(Event::Show(window.id()));
        let first = window.top_surface().unwrap();
        h.coordinator.handle_event(Event::Dismiss {
            window_id: window.id(),
            scope_id: None,
            reason: DismissReason::Programmatic,
        });
        h.coordinator.handle_event(Event::Show(window.id()));

        first.dismiss();
        h.pump();
        let second = window.top_surface().unwrap();
        assert_ne!(first.scope_id(), second.scope_id());
        assert_eq!(h.snapshot(&window).surface, SurfaceState::Attached(second.scope_id()));
    }

    #[test(tokio::test(start_paused = true))]
    async fn visible_overlay_suppresses_new_gestures() {
        let mut h = Harness::new();
        let window = h.launch(1);
        h.long_press(&window).await;

        window.touch(PointerEvent::down(0.0, 0.0));
        h.pump();
        assert!(!h.snapshot(&window).timer_armed);
        assert_eq!(window.surfaces().len(), 1);
    }

    #[test(tokio::test(start_paused = true))]
    async fn background_window_does_not_open() {
        let mut h = Harness::new();
        let background = h.launch(1);
        let _foreground = h.launch(2);

        h.long_press(&background).await;
        assert!(background.surfaces().is_empty());
        assert_eq!(h.snapshot(&background).gesture, GestureState::Idle);
    }

    #[test(tokio::test(start_paused = true))]
    async fn windows_seen_late_are_tracked_on_start() {
        let mut h = Harness::new();
        let window = SimWindow::new(9, "late");
        h.lifecycle(&window, LifecycleState::Started);

        let snapshot = h.snapshot(&window);
        assert_eq!(snapshot.lifecycle, LifecycleState::Started);
        assert!(snapshot.interceptor_installed);

        let gone = SimWindow::new(10, "gone");
        gone.mark_destroyed();
        h.lifecycle(&gone, LifecycleState::Resumed);
        assert_eq!(h.coordinator.snapshot(gone.id()), None);
    }

    #[test(tokio::test(start_paused = true))]
    async fn duplicate_create_wraps_once() {
        let mut h = Harness::new();
        let window = SimWindow::new(1, "main");
        h.lifecycle(&window, LifecycleState::Created);
        let head = window.event_callback().unwrap();
        h.lifecycle(&window, LifecycleState::Created);

        assert!(Arc::ptr_eq(&head, &window.event_callback().unwrap()));
        assert_eq!(h.coordinator.stats().tracked_windows, 1);
    }

    async fn disk_full(_: crate::model::registry::PluginContext) -> anyhow::Result<()> { anyhow::bail!("disk full") }

    #[test(tokio::test(start_paused = true))]
    async fn action_outcomes_are_recorded_and_notified() {
        let mut h = Harness::new();
        h.registry.add_action("explode", None, disk_full);
        h.registry.add_action("noop", None, |_| async { anyhow::Ok(()) });
        let window = h.launch(1);
        h.long_press(&window).await;
        let surface = window.top_surface().unwrap();

        surface.run_action(0).unwrap();
        surface.run_action(1).unwrap();
        h.advance(Duration::from_millis(1)).await;

        let outcomes: Vec<_> = h.snapshot(&window).outcomes.into_iter().map(|r| r.outcome).collect();
        assert!(outcomes.contains(&UnitOutcome::Failed("disk full".into())));
        assert!(outcomes.contains(&UnitOutcome::Completed));
        let levels: Vec<_> = h.notifier.notices().into_iter().map(|(_, n)| n.level).collect();
        assert!(levels.contains(&NoticeLevel::Error));
        assert!(levels.contains(&NoticeLevel::Info));
        assert!(h.coordinator.snapshot(window.id()).is_some());
    }

    #[test(tokio::test(start_paused = true))]
    async fn outcome_history_is_bounded() {
        let mut h = Harness::new();
        h.registry.add_action("noop", None, |_| async { anyhow::Ok(()) });
        let window = h.launch(1);
        h.long_press(&window).await;
        let surface = window.top_surface().unwrap();

        for _ in 0..6 {
            surface.run_action(0).unwrap();
        }
        h.advance(Duration::from_millis(1)).await;
        assert_eq!(h.snapshot(&window).outcomes.len(), 4);
    }

    #[test(tokio::test(start_paused = true))]
    async fn outcomes_from_closed_surfaces_are_dropped() {
        let mut h = Harness::new();
        h.registry.add_action("slow", None, |_| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            anyhow::Ok(())
        });
        let window = h.launch(1);
        h.long_press(&window).await;
        window.top_surface().unwrap().run_action(0).unwrap();

        h.lifecycle(&window, LifecycleState::Paused);
        h.advance(Duration::from_secs(60)).await;
        assert!(h.snapshot(&window).outcomes.is_empty());
        assert!(h.notifier.notices().is_empty());
    }

    #[test(tokio::test(start_paused = true))]
    async fn shutdown_uninstalls_everything() {
        let mut h = Harness::new();
        let window = h.launch(1);
        h.long_press(&window).await;

        h.coordinator.handle_event(Event::Shutdown);
        assert!(window.surfaces().is_empty());
        assert!(window.event_callback().unwrap().as_interceptor().is_none());
        assert_eq!(h.coordinator.stats(), CoordinatorStats::default());
    }

    #[test(tokio::test(start_paused = true))]
    async fn host_panic_during_show_is_rolled_back() {
        let mut h = Harness::new();
        let window = h.launch(1);
        window.panic_on_attach(true);

        h.long_press(&window).await;
        let snapshot = h.snapshot(&window);
        assert_eq!(snapshot.surface, SurfaceState::Detached);
        assert_eq!(snapshot.gesture, GestureState::Idle);
        assert_eq!(h.coordinator.stats().live_scopes, 0);

        window.panic_on_attach(false);
        window.touch(PointerEvent::up(10.0, 10.0));
        h.long_press(&window).await;
        assert_eq!(window.surfaces().len(), 1);

        for state in [LifecycleState::Paused, LifecycleState::Stopped, LifecycleState::Destroyed] {
            h.lifecycle(&window, state);
        }
        assert!(window.event_callback().unwrap().as_interceptor().is_none());
    }

    #[test(tokio::test(start_paused = true))]
    async fn failed_chain_restore_still_releases_the_window() {
        let mut h = Harness::new();
        let window = h.launch(1);
        let installed = window.event_callback().unwrap();
        window.fail_set_callback(true);

        for state in [LifecycleState::Paused, LifecycleState::Stopped, LifecycleState::Destroyed] {
            h.lifecycle(&window, state);
        }
        assert_eq!(h.coordinator.snapshot(window.id()), None);
        assert!(matches!(
            h.broadcasts().last(),
            Some(BroadcastEvent::WindowReleased { window_id: WindowId(1) })
        ));
        // The host kept the interceptor; it only forwards from now on.
        let head = window.event_callback().unwrap();
        assert!(Arc::ptr_eq(&head, &installed));
        assert!(head.as_interceptor().is_some_and(|i| !i.is_live()));
        window.touch(PointerEvent::down(0.0, 0.0));
        assert!(h.coordinator.rx.try_recv().is_none());
    }

    #[test(tokio::test(start_paused = true))]
    async fn panicking_notifier_does_not_lose_outcomes() {
        let mut h = Harness::new();
        h.registry.add_action("noop", None, |_| async { anyhow::Ok(()) });
        let window = h.launch(1);
        h.long_press(&window).await;
        h.notifier.panic_on_notify(true);

        window.top_surface().unwrap().run_action(0).unwrap();
        h.advance(Duration::from_millis(1)).await;
        assert_eq!(h.snapshot(&window).outcomes.len(), 1);
        assert!(h.snapshot(&window).surface.is_attached());
    }

    #[test(tokio::test(start_paused = true))]
    async fn window_reference_follows_the_latest_callback() {
        let mut h = Harness::new();
        let first = SimWindow::new(1, "main");
        h.lifecycle(&first, LifecycleState::Created);
        // The host hands out a new object for the same window from here on.
        let second = SimWindow::new(1, "main");
        h.lifecycle(&second, LifecycleState::Started);
        h.lifecycle(&second, LifecycleState::Resumed);
        drop(first);

        h.coordinator.handle_event(Event::Show(WindowId(1)));
        assert_eq!(second.surfaces().len(), 1);
        assert!(h.snapshot(&second).surface.is_attached());
    }

    #[test(tokio::test(start_paused = true))]
    async fn every_callback_is_logged() {
        let mut h = Harness::new();
        let window = h.launch(1);
        h.lifecycle(&window, LifecycleState::Paused);

        let states: Vec<_> = h.activity.records().into_iter().map(|r| r.state).collect();
        assert_eq!(
            states,
            [
                LifecycleState::Created,
                LifecycleState::Started,
                LifecycleState::Resumed,
                LifecycleState::Paused,
            ]
        );
        assert!(h.activity.records().iter().all(|r| r.window_name == "main"));
    }
}
