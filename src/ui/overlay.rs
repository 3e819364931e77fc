//! The debug overlay surface and the presenter that attaches it to windows.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bitflags::bitflags;
use tracing::{debug, instrument, warn};

use crate::actor::lifecycle::{self, Event};
use crate::common::config::{ConfigSource, Configuration};
use crate::common::prefs::{PrefParseError, PrefValue, PreferenceStore};
use crate::model::registry::{InfoRow, PluginContext, PluginEntry, PluginKind, Registry};
use crate::model::snapshot::PluginReport;
use crate::model::window::{DismissReason, SurfaceState, WindowId};
use crate::sys::host::{self, BackHookId, HostError, HostWindow};
use crate::sys::scope::{OverlayScope, ScopeId, ScopeManager, UnitOutcome, panic_message};

bitflags! {
    /// How the host must place the surface.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SurfaceFlags: u8 {
        const FOCUSABLE = 1 << 0;
        const INTERACTIVE = 1 << 1;
        const ABOVE_CONTENT = 1 << 2;
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PluginError {
    #[error("overlay surface is closed")]
    SurfaceClosed,
    #[error("no plugin at index {0}")]
    NoSuchEntry(usize),
    #[error("plugin `{title}` {outcome}")]
    Plugin { title: String, outcome: UnitOutcome },
    #[error(transparent)]
    InvalidValue(#[from] PrefParseError),
}

#[derive(Debug, thiserror::Error)]
pub enum ShowError {
    #[error("{0} is finishing or destroyed")]
    WindowFinishing(WindowId),
    #[error(transparent)]
    Host(#[from] HostError),
}

/// What the host renders: a snapshot of the registry plus the configuration
/// in effect when the surface was shown.
pub struct OverlaySurface {
    window_id: WindowId,
    window_name: Arc<str>,
    scope: OverlayScope,
    providers: Vec<PluginEntry>,
    actions: Vec<PluginEntry>,
    configuration: Configuration,
    prefs: Arc<dyn PreferenceStore>,
    events: lifecycle::Sender,
}

impl OverlaySurface {
    pub fn window_id(&self) -> WindowId { self.window_id }

    pub fn scope_id(&self) -> ScopeId { self.scope.id() }

    pub fn flags(&self) -> SurfaceFlags {
        SurfaceFlags::FOCUSABLE | SurfaceFlags::INTERACTIVE | SurfaceFlags::ABOVE_CONTENT
    }

    pub fn providers(&self) -> &[PluginEntry] { &self.providers }

    pub fn actions(&self) -> &[PluginEntry] { &self.actions }

    pub fn configuration(&self) -> Configuration { self.configuration }

    /// False once the surface has been dismissed.
    pub fn is_open(&self) -> bool { !self.scope.is_cancelled() }

    fn context(&self) -> PluginContext {
        PluginContext::new(
            self.window_id,
            self.window_name.clone(),
            self.prefs.clone(),
            self.scope.child_token(),
        )
    }

    /// Renders one provider. Failures and panics are reported to the
    /// coordinator and returned; they never escape as panics.
    pub fn render_provider(&self, index: usize) -> Result<Vec<InfoRow>, PluginError> {
        if !self.is_open() {
            return Err(PluginError::SurfaceClosed);
        }
        let entry = self.providers.get(index).ok_or(PluginError::NoSuchEntry(index))?;
        let ctx = self.context();
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| entry.render(&ctx))) {
            Ok(Some(Ok(rows))) => return Ok(rows),
            Ok(Some(Err(err))) => UnitOutcome::Failed(format!("{err:#}")),
            Ok(None) => return Err(PluginError::NoSuchEntry(index)),
            Err(payload) => UnitOutcome::Panicked(panic_message(&*payload)),
        };
        warn!(window = %self.window_id, title = entry.title(), %outcome, "provider failed");
        self.report(entry.title(), PluginKind::Provider, outcome.clone());
        Err(PluginError::Plugin { title: entry.title().to_owned(), outcome })
    }

    /// Starts one action inside this surface's scope. The outcome reaches the
    /// coordinator when the action finishes.
    pub fn run_action(&self, index: usize) -> Result<(), PluginError> {
        if !self.is_open() {
            return Err(PluginError::SurfaceClosed);
        }
        let entry = self.actions.get(index).ok_or(PluginError::NoSuchEntry(index))?;
        let title = entry.title().to_owned();
        let work = match panic::catch_unwind(AssertUnwindSafe(|| entry.execute(self.context()))) {
            Ok(Some(work)) => work,
            Ok(None) => return Err(PluginError::NoSuchEntry(index)),
            Err(payload) => {
                let outcome = UnitOutcome::Panicked(panic_message(&*payload));
                self.report(&title, PluginKind::Action, outcome.clone());
                return Err(PluginError::Plugin { title, outcome });
            }
        };

        let events = self.events.clone();
        let (window_id, scope_id) = (self.window_id, self.scope.id());
        let report_title = title.clone();
        let started = self.scope.spawn(&title, work, move |outcome| {
            let report = PluginReport { title: report_title, kind: PluginKind::Action, outcome };
            _ = events.send(Event::PluginReported { window_id, scope_id, report });
        });
        if started { Ok(()) } else { Err(PluginError::SurfaceClosed) }
    }

    /// Stores user input under `namespace.key`. An existing value keeps its
    /// type and input that does not parse as that type is rejected; a new key
    /// gets the type [`PrefValue::infer`] picks.
    pub fn set_preference(&self, namespace: &str, key: &str, raw: &str) -> Result<PrefValue, PluginError> {
        if !self.is_open() {
            return Err(PluginError::SurfaceClosed);
        }
        let value = match self.prefs.read(namespace, key) {
            Some(current) => current.parse_as(raw)?,
            None => PrefValue::infer(raw),
        };
        self.prefs.write(namespace, key, value.clone());
        debug!(window = %self.window_id, namespace, key, %value, "preference edited");
        Ok(value)
    }

    pub fn remove_preference(&self, namespace: &str, key: &str) -> Result<Option<PrefValue>, PluginError> {
        if !self.is_open() {
            return Err(PluginError::SurfaceClosed);
        }
        let removed = self.prefs.remove(namespace, key);
        debug!(window = %self.window_id, namespace, key, removed = removed.is_some(), "preference removed");
        Ok(removed)
    }

    /// The surface's close control.
    pub fn dismiss(&self) {
        _ = self.events.send(Event::Dismiss {
            window_id: self.window_id,
            scope_id: Some(self.scope.id()),
            reason: DismissReason::CloseButton,
        });
    }

    fn report(&self, title: &str, kind: PluginKind, outcome: UnitOutcome) {
        let report = PluginReport { title: title.to_owned(), kind, outcome };
        _ = self.events.send(Event::PluginReported {
            window_id: self.window_id,
            scope_id: self.scope.id(),
            report,
        });
    }
}

impl fmt::Debug for OverlaySurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlaySurface")
            .field("window_id", &self.window_id)
            .field("scope_id", &self.scope.id())
            .field("providers", &self.providers.len())
            .field("actions", &self.actions.len())
            .field("open", &self.is_open())
            .finish()
    }
}

#[derive(Debug)]
struct AttachedSurface {
    surface: Arc<OverlaySurface>,
    back_hook: Option<BackHookId>,
}

/// Per-window presentation state. The visibility flag is shared with the
/// window's touch interceptor.
#[derive(Debug, Default)]
pub struct SurfaceSlot {
    attached: Option<AttachedSurface>,
    visible: Arc<AtomicBool>,
}

impl SurfaceSlot {
    pub fn new() -> Self { Self::default() }

    pub fn state(&self) -> SurfaceState {
        match &self.attached {
            Some(attached) => SurfaceState::Attached(attached.surface.scope_id()),
            None => SurfaceState::Detached,
        }
    }

    pub fn is_attached(&self) -> bool { self.attached.is_some() }

    pub fn scope_id(&self) -> Option<ScopeId> { self.attached.as_ref().map(|a| a.surface.scope_id()) }

    pub fn visible_flag(&self) -> Arc<AtomicBool> { self.visible.clone() }

    /// Provider and action counts of the attached surface.
    pub fn plugin_counts(&self) -> (usize, usize) {
        self.attached
            .as_ref()
            .map_or((0, 0), |a| (a.surface.providers().len(), a.surface.actions().len()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowOutcome {
    Attached(ScopeId),
    AlreadyAttached(ScopeId),
}

/// Cancels a freshly created scope unless the show completes.
struct PendingScope<'a> {
    scopes: &'a mut ScopeManager,
    id: ScopeId,
    armed: bool,
}

impl PendingScope<'_> {
    fn commit(mut self) { self.armed = false; }
}

impl Drop for PendingScope<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!(scope = ?self.id, "rolling back overlay scope");
            self.scopes.cancel(self.id);
        }
    }
}

pub struct OverlayPresenter {
    registry: Arc<Registry>,
    config: Arc<dyn ConfigSource>,
    prefs: Arc<dyn PreferenceStore>,
    scopes: ScopeManager,
    events: lifecycle::Sender,
}

impl OverlayPresenter {
    pub fn new(
        registry: Arc<Registry>,
        config: Arc<dyn ConfigSource>,
        prefs: Arc<dyn PreferenceStore>,
        events: lifecycle::Sender,
    ) -> Self {
        Self {
            registry,
            config,
            prefs,
            scopes: ScopeManager::new(),
            events,
        }
    }

    pub fn live_scopes(&self) -> usize { self.scopes.live_count() }

    /// Attaches a new surface, or does nothing if one is already attached.
    /// On any failure nothing stays attached and the new scope is cancelled.
    #[instrument(skip_all, fields(window = %window.id()))]
    pub fn show(&mut self, window: &Arc<dyn HostWindow>, slot: &mut SurfaceSlot) -> Result<ShowOutcome, ShowError> {
        if let Some(scope_id) = slot.scope_id() {
            debug!("overlay already attached");
            return Ok(ShowOutcome::AlreadyAttached(scope_id));
        }
        let window_id = window.id();
        if window.is_finishing() || window.is_destroyed() {
            return Err(ShowError::WindowFinishing(window_id));
        }

        let scope = self.scopes.create_scope();
        let scope_id = scope.id();
        let pending = PendingScope { scopes: &mut self.scopes, id: scope_id, armed: true };

        let surface = Arc::new(OverlaySurface {
            window_id,
            window_name: window.name().into(),
            scope,
            providers: self.registry.providers(),
            actions: self.registry.actions(),
            configuration: self.config.snapshot(),
            prefs: self.prefs.clone(),
            events: self.events.clone(),
        });
        host::guarded("attach_surface", || window.attach_surface(surface.clone()))?;

        let back_hook = match window.back_navigation() {
            Some(navigation) => {
                let events = self.events.clone();
                let handler = Box::new(move || {
                    _ = events.send(Event::Dismiss {
                        window_id,
                        scope_id: Some(scope_id),
                        reason: DismissReason::BackNavigation,
                    });
                });
                match host::guarded("add_back_handler", || navigation.add_back_handler(handler)) {
                    Ok(hook) => Some(hook),
                    Err(err) => {
                        let detached = host::guarded("detach_surface", || window.detach_surface(&surface));
                        if let Err(detach) = detached {
                            warn!(%detach, "failed to detach surface after back hook error");
                        }
                        return Err(err.into());
                    }
                }
            }
            None => {
                debug!("window has no back navigation; close control only");
                None
            }
        };

        pending.commit();
        slot.visible.store(true, Ordering::Release);
        slot.attached = Some(AttachedSurface { surface, back_hook });
        debug!(?scope_id, "overlay attached");
        Ok(ShowOutcome::Attached(scope_id))
    }

    /// Detaches the surface and cancels its scope. `window` is `None` once the
    /// host has released it; the scope is cancelled regardless.
    #[instrument(skip_all, fields(reason = %reason))]
    pub fn hide(
        &mut self,
        window: Option<&Arc<dyn HostWindow>>,
        slot: &mut SurfaceSlot,
        reason: DismissReason,
    ) -> Option<ScopeId> {
        let attached = slot.attached.take()?;
        slot.visible.store(false, Ordering::Release);
        let scope_id = attached.surface.scope_id();

        match window {
            Some(window) => {
                if let Some(hook) = attached.back_hook {
                    match window.back_navigation() {
                        Some(navigation) => {
                            let removed = host::guarded("remove_back_handler", || navigation.remove_back_handler(hook));
                            if let Err(err) = removed {
                                warn!(%err, "failed to remove back handler");
                            }
                        }
                        None => warn!("back navigation disappeared before the handler was removed"),
                    }
                }
                if window.is_destroyed() {
                    debug!("window destroyed; skipping surface removal");
                } else {
                    let detached = host::guarded("detach_surface", || window.detach_surface(&attached.surface));
                    if let Err(err) = detached {
                        warn!(%err, "failed to detach overlay surface");
                    }
                }
            }
            None => debug!("window already released; skipping surface removal"),
        }

        if !self.scopes.cancel(scope_id) {
            warn!(?scope_id, "overlay scope was already cancelled");
        }
        Some(scope_id)
    }
}
