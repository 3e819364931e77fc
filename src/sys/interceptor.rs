//! Input interception by decorating a window's event callback chain.
//!
//! [`EventCallback`] methods forward to [`EventCallback::delegate`] by
//! default, so a decorator only overrides the calls it cares about.
//! [`TouchInterceptor`] observes pointer events and otherwise forwards
//! everything unchanged, always returning the original chain's answer.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace};

use crate::model::window::WindowId;
use crate::sys::event::{KeyEvent, MotionEvent, PointerEvent};
use crate::sys::host::{HostError, HostWindow};

pub trait EventCallback: Send + Sync {
    /// The callback this one decorates, if any.
    fn delegate(&self) -> Option<&dyn EventCallback> { None }

    fn as_interceptor(&self) -> Option<&TouchInterceptor> { None }

    fn dispatch_pointer(&self, event: &PointerEvent) -> bool {
        self.delegate().is_some_and(|next| next.dispatch_pointer(event))
    }

    fn dispatch_key(&self, event: &KeyEvent) -> bool {
        self.delegate().is_some_and(|next| next.dispatch_key(event))
    }

    fn dispatch_key_shortcut(&self, event: &KeyEvent) -> bool {
        self.delegate().is_some_and(|next| next.dispatch_key_shortcut(event))
    }

    fn dispatch_trackball(&self, event: &MotionEvent) -> bool {
        self.delegate().is_some_and(|next| next.dispatch_trackball(event))
    }

    fn dispatch_generic_motion(&self, event: &MotionEvent) -> bool {
        self.delegate().is_some_and(|next| next.dispatch_generic_motion(event))
    }

    fn on_window_focus_changed(&self, has_focus: bool) {
        if let Some(next) = self.delegate() {
            next.on_window_focus_changed(has_focus);
        }
    }

    fn on_attached_to_window(&self) {
        if let Some(next) = self.delegate() {
            next.on_attached_to_window();
        }
    }

    fn on_detached_from_window(&self) {
        if let Some(next) = self.delegate() {
            next.on_detached_from_window();
        }
    }

    fn on_content_changed(&self) {
        if let Some(next) = self.delegate() {
            next.on_content_changed();
        }
    }

    fn on_menu_opened(&self, feature_id: i32) -> bool {
        self.delegate().is_some_and(|next| next.on_menu_opened(feature_id))
    }

    fn on_panel_closed(&self, feature_id: i32) {
        if let Some(next) = self.delegate() {
            next.on_panel_closed(feature_id);
        }
    }

    fn on_search_requested(&self) -> bool {
        self.delegate().is_some_and(|next| next.on_search_requested())
    }
}

pub type PointerObserver = Box<dyn Fn(&PointerEvent) + Send + Sync>;

pub struct TouchInterceptor {
    window_id: WindowId,
    original: Arc<dyn EventCallback>,
    surface_visible: Arc<AtomicBool>,
    live: AtomicBool,
    observer: PointerObserver,
}

impl TouchInterceptor {
    pub fn window_id(&self) -> WindowId { self.window_id }

    pub fn original(&self) -> &Arc<dyn EventCallback> { &self.original }

    /// Observing pointer events; false once unwrapped.
    pub fn is_live(&self) -> bool { self.live.load(Ordering::Acquire) }

    fn disarm(&self) { self.live.store(false, Ordering::Release); }
}

impl EventCallback for TouchInterceptor {
    fn delegate(&self) -> Option<&dyn EventCallback> { Some(self.original.as_ref()) }

    fn as_interceptor(&self) -> Option<&TouchInterceptor> { Some(self) }

    fn dispatch_pointer(&self, event: &PointerEvent) -> bool {
        // The overlay handles its own input while visible.
        if self.is_live() && !self.surface_visible.load(Ordering::Acquire) {
            (self.observer)(event);
        }
        self.original.dispatch_pointer(event)
    }
}

impl fmt::Debug for TouchInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TouchInterceptor")
            .field("window_id", &self.window_id)
            .field("live", &self.is_live())
            .field("surface_visible", &self.surface_visible.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Installs a [`TouchInterceptor`] at the head of the window's chain.
///
/// Returns `Ok(None)` when the chain already starts with an interceptor.
pub fn wrap(
    window: &dyn HostWindow,
    surface_visible: Arc<AtomicBool>,
    observer: PointerObserver,
) -> Result<Option<Arc<TouchInterceptor>>, HostError> {
    let original = window.event_callback().ok_or(HostError::NoEventChain)?;
    if original.as_interceptor().is_some() {
        return Ok(None);
    }
    let interceptor = Arc::new(TouchInterceptor {
        window_id: window.id(),
        original,
        surface_visible,
        live: AtomicBool::new(true),
        observer,
    });
    window.set_event_callback(interceptor.clone())?;
    trace!(window = %window.id(), "installed touch interceptor");
    Ok(Some(interceptor))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Restore {
    /// The original chain is back in place.
    Restored,
    /// Someone else replaced the chain after us; it was left alone.
    Replaced,
    ChainMissing,
}

/// Undoes [`wrap`]. The interceptor stops observing in every case, so a copy
/// still referenced by a foreign chain degrades to plain forwarding.
pub fn unwrap(window: &dyn HostWindow, installed: &Arc<TouchInterceptor>) -> Result<Restore, HostError> {
    installed.disarm();
    let Some(current) = window.event_callback() else {
        return Ok(Restore::ChainMissing);
    };
    let ours = current
        .as_interceptor()
        .is_some_and(|head| std::ptr::eq(head, installed.as_ref()));
    if !ours {
        debug!(window = %window.id(), "event chain no longer starts with our interceptor");
        return Ok(Restore::Replaced);
    }
    window.set_event_callback(installed.original().clone())?;
    Ok(Restore::Restored)
}
