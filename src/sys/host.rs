//! The traits a host UI toolkit implements to carry the overlay.
//!
//! All calls into these traits are made from the lifecycle coordinator's
//! task, except [`EventCallback`] dispatch which runs wherever the host
//! delivers input.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use serde::Serialize;
use tracing::{info, warn};

use crate::model::window::WindowId;
use crate::sys::interceptor::EventCallback;
use crate::sys::scope::panic_message;
use crate::ui::overlay::OverlaySurface;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("window has no event callback chain")]
    NoEventChain,
    #[error("window is finishing or destroyed")]
    WindowGone,
    #[error("render tree rejected the surface: {0}")]
    RenderTree(String),
    #[error("back navigation: {0}")]
    BackNavigation(String),
    #[error("host panicked in {call}: {message}")]
    Panicked { call: &'static str, message: String },
}

/// Runs one call into host code, reporting a panic as
/// [`HostError::Panicked`] instead of unwinding into the coordinator.
pub fn guarded<T>(call: &'static str, f: impl FnOnce() -> Result<T, HostError>) -> Result<T, HostError> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(HostError::Panicked { call, message: panic_message(&*payload) }))
}

pub trait HostWindow: Send + Sync {
    fn id(&self) -> WindowId;

    fn name(&self) -> String { self.id().to_string() }

    fn is_finishing(&self) -> bool;

    fn is_destroyed(&self) -> bool;

    /// Head of the window's input dispatch chain.
    fn event_callback(&self) -> Option<Arc<dyn EventCallback>>;

    fn set_event_callback(&self, callback: Arc<dyn EventCallback>) -> Result<(), HostError>;

    /// Adds the surface as a top-level layer above the window content.
    fn attach_surface(&self, surface: Arc<OverlaySurface>) -> Result<(), HostError>;

    fn detach_surface(&self, surface: &OverlaySurface) -> Result<(), HostError>;

    /// Windows without back navigation can still close the overlay from its
    /// close control.
    fn back_navigation(&self) -> Option<&dyn BackNavigation> { None }
}

pub type BackHandler = Box<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BackHookId(pub u64);

pub trait BackNavigation: Send + Sync {
    /// The most recently added handler runs first and consumes the press.
    fn add_back_handler(&self, handler: BackHandler) -> Result<BackHookId, HostError>;

    fn remove_back_handler(&self, id: BackHookId) -> Result<(), HostError>;
}

/// Window lifecycle notifications, in the order the host delivers them.
///
/// The overlay keeps only a weak reference to each window, taken from the
/// latest callback. The host must keep that `Arc` alive for as long as the
/// window exists, normally by passing the same `Arc` from `created` to
/// `destroyed`. A host that wraps each callback in a fresh temporary `Arc`
/// has its windows reported as released and the overlay never opens on them.
pub trait LifecycleListener: Send + Sync {
    fn created(&self, window: &Arc<dyn HostWindow>);
    fn started(&self, window: &Arc<dyn HostWindow>);
    fn resumed(&self, window: &Arc<dyn HostWindow>);
    fn paused(&self, window: &Arc<dyn HostWindow>);
    fn stopped(&self, window: &Arc<dyn HostWindow>);
    fn destroyed(&self, window: &Arc<dyn HostWindow>);
}

pub trait HostApplication {
    fn register_lifecycle_listener(&self, listener: Arc<dyn LifecycleListener>);
}

/// A strong reference handed to the coordinator with a lifecycle event. It
/// is only held for the duration of the handler.
#[derive(Clone)]
pub struct WindowHandle(Arc<dyn HostWindow>);

impl WindowHandle {
    pub fn new(window: Arc<dyn HostWindow>) -> Self { Self(window) }

    pub fn id(&self) -> WindowId { self.0.id() }

    pub fn window(&self) -> &Arc<dyn HostWindow> { &self.0 }

    pub fn downgrade(&self) -> WindowRef { WindowRef::new(&self.0) }
}

impl fmt::Debug for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WindowHandle").field(&self.id()).finish()
    }
}

/// Non-owning reference to a host window.
#[derive(Clone)]
pub struct WindowRef {
    id: WindowId,
    inner: Weak<dyn HostWindow>,
}

impl WindowRef {
    pub fn new(window: &Arc<dyn HostWindow>) -> Self {
        Self { id: window.id(), inner: Arc::downgrade(window) }
    }

    pub fn id(&self) -> WindowId { self.id }

    pub fn upgrade(&self) -> Option<Arc<dyn HostWindow>> { self.inner.upgrade() }

    /// Still reachable and not yet destroyed.
    pub fn is_live(&self) -> bool { self.upgrade().is_some_and(|window| !window.is_destroyed()) }
}

impl fmt::Debug for WindowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowRef")
            .field("id", &self.id)
            .field("live", &self.is_live())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A short message for the user, shown the way the host shows toasts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Info, message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Error, message: message.into() }
    }
}

/// Called on the coordinator's task; a panic here is logged and dropped.
pub trait Notifier: Send + Sync {
    fn notify(&self, window: WindowId, notice: &Notice);
}

/// Default notifier: notices only go to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, window: WindowId, notice: &Notice) {
        match notice.level {
            NoticeLevel::Info => info!(%window, message = %notice.message, "notice"),
            NoticeLevel::Error => warn!(%window, message = %notice.message, "notice"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guarded_passes_results_through() {
        assert_eq!(guarded("ok", || Ok(7)).unwrap(), 7);
        assert!(matches!(guarded::<()>("gone", || Err(HostError::WindowGone)), Err(HostError::WindowGone)));
    }

    #[test]
    fn guarded_turns_panics_into_errors() {
        let err = guarded::<()>("attach_surface", || panic!("layer tree locked")).unwrap_err();
        assert_eq!(err.to_string(), "host panicked in attach_surface: layer tree locked");
    }
}
