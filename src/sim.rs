//! An in-process host used by the `overlay-sim` binary and by tests.
//!
//! Windows keep a real event callback chain and a list of attached overlay
//! layers, so interception and presentation behave as they would against a
//! toolkit.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::model::window::WindowId;
use crate::sys::event::{KeyEvent, MotionEvent, PointerEvent};
use crate::sys::host::{
    BackHandler, BackHookId, BackNavigation, HostApplication, HostError, HostWindow, LifecycleListener,
    Notice, Notifier,
};
use crate::sys::interceptor::EventCallback;
use crate::ui::overlay::OverlaySurface;

/// Records every call it receives. Roots answer dispatches with `consume`;
/// decorators record and forward.
pub struct RecordingCallback {
    calls: Mutex<Vec<String>>,
    consume: bool,
    next: Option<Arc<dyn EventCallback>>,
}

impl RecordingCallback {
    pub fn new(consume: bool) -> Arc<Self> {
        Arc::new(Self { calls: Mutex::default(), consume, next: None })
    }

    pub fn decorating(next: Arc<dyn EventCallback>) -> Arc<Self> {
        Arc::new(Self { calls: Mutex::default(), consume: false, next: Some(next) })
    }

    pub fn calls(&self) -> Vec<String> { self.calls.lock().clone() }

    fn record(&self, call: String) { self.calls.lock().push(call); }

    fn answer(&self, forwarded: impl FnOnce(&dyn EventCallback) -> bool) -> bool {
        match &self.next {
            Some(next) => forwarded(next.as_ref()),
            None => self.consume,
        }
    }
}

impl EventCallback for RecordingCallback {
    fn delegate(&self) -> Option<&dyn EventCallback> { self.next.as_deref() }

    fn dispatch_pointer(&self, event: &PointerEvent) -> bool {
        self.record(format!("pointer:{}", event.action));
        self.answer(|next| next.dispatch_pointer(event))
    }

    fn dispatch_key(&self, event: &KeyEvent) -> bool {
        self.record(format!("key:{}", event.code));
        self.answer(|next| next.dispatch_key(event))
    }

    fn dispatch_key_shortcut(&self, event: &KeyEvent) -> bool {
        self.record(format!("shortcut:{}", event.code));
        self.answer(|next| next.dispatch_key_shortcut(event))
    }

    fn dispatch_trackball(&self, event: &MotionEvent) -> bool {
        self.record("trackball".into());
        self.answer(|next| next.dispatch_trackball(event))
    }

    fn dispatch_generic_motion(&self, event: &MotionEvent) -> bool {
        self.record("motion".into());
        self.answer(|next| next.dispatch_generic_motion(event))
    }

    fn on_window_focus_changed(&self, has_focus: bool) {
        self.record(format!("focus:{has_focus}"));
        if let Some(next) = &self.next {
            next.on_window_focus_changed(has_focus);
        }
    }

    fn on_attached_to_window(&self) {
        self.record("attached".into());
        if let Some(next) = &self.next {
            next.on_attached_to_window();
        }
    }

    fn on_detached_from_window(&self) {
        self.record("detached".into());
        if let Some(next) = &self.next {
            next.on_detached_from_window();
        }
    }

    fn on_content_changed(&self) {
        self.record("content_changed".into());
        if let Some(next) = &self.next {
            next.on_content_changed();
        }
    }

    fn on_menu_opened(&self, feature_id: i32) -> bool {
        self.record(format!("menu_opened:{feature_id}"));
        self.answer(|next| next.on_menu_opened(feature_id))
    }

    fn on_panel_closed(&self, feature_id: i32) {
        self.record(format!("panel_closed:{feature_id}"));
        if let Some(next) = &self.next {
            next.on_panel_closed(feature_id);
        }
    }

    fn on_search_requested(&self) -> bool {
        self.record("search".into());
        self.answer(|next| next.on_search_requested())
    }
}

/// Back navigation where the newest handler consumes the press.
#[derive(Default)]
pub struct SimBackDispatcher {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(BackHookId, BackHandler)>>,
    fail_registration: AtomicBool,
    fail_removal: AtomicBool,
}

impl SimBackDispatcher {
    /// Returns false when no handler consumed the press.
    pub fn press(&self) -> bool {
        let handlers = self.handlers.lock();
        match handlers.last() {
            Some((_, handler)) => {
                handler();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize { self.handlers.lock().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl BackNavigation for SimBackDispatcher {
    fn add_back_handler(&self, handler: BackHandler) -> Result<BackHookId, HostError> {
        if self.fail_registration.load(Ordering::SeqCst) {
            return Err(HostError::BackNavigation("dispatcher unavailable".into()));
        }
        let id = BackHookId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.handlers.lock().push((id, handler));
        Ok(id)
    }

    fn remove_back_handler(&self, id: BackHookId) -> Result<(), HostError> {
        if self.fail_removal.load(Ordering::SeqCst) {
            return Err(HostError::BackNavigation("dispatcher unavailable".into()));
        }
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(hook, _)| *hook != id);
        if handlers.len() == before {
            return Err(HostError::BackNavigation(format!("unknown handler {}", id.0)));
        }
        Ok(())
    }
}

pub struct SimWindow {
    id: WindowId,
    name: String,
    finishing: AtomicBool,
    destroyed: AtomicBool,
    callback: Mutex<Option<Arc<dyn EventCallback>>>,
    layers: Mutex<Vec<Arc<OverlaySurface>>>,
    back: Option<SimBackDispatcher>,
    faults: Faults,
}

/// Host failures a test can switch on.
#[derive(Default)]
struct Faults {
    fail_attach: AtomicBool,
    panic_on_attach: AtomicBool,
    fail_detach: AtomicBool,
    fail_set_callback: AtomicBool,
}

impl SimWindow {
    pub fn new(id: u64, name: &str) -> Arc<Self> {
        Self::build(id, name, RecordingCallback::new(false), true)
    }

    pub fn with_content(id: u64, name: &str, content: Arc<RecordingCallback>) -> Arc<Self> {
        Self::build(id, name, content, true)
    }

    pub fn without_back_navigation(id: u64, name: &str) -> Arc<Self> {
        Self::build(id, name, RecordingCallback::new(false), false)
    }

    fn build(id: u64, name: &str, content: Arc<RecordingCallback>, back: bool) -> Arc<Self> {
        let content: Arc<dyn EventCallback> = content;
        Arc::new(Self {
            id: WindowId(id),
            name: name.to_owned(),
            finishing: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            callback: Mutex::new(Some(content)),
            layers: Mutex::default(),
            back: back.then(SimBackDispatcher::default),
            faults: Faults::default(),
        })
    }

    fn head(&self) -> Option<Arc<dyn EventCallback>> { self.callback.lock().clone() }

    /// Delivers a pointer event through the chain; returns whether it was
    /// consumed.
    pub fn touch(&self, event: PointerEvent) -> bool {
        self.head().is_some_and(|head| head.dispatch_pointer(&event))
    }

    pub fn key(&self, event: KeyEvent) -> bool { self.head().is_some_and(|head| head.dispatch_key(&event)) }

    pub fn focus(&self, has_focus: bool) {
        if let Some(head) = self.head() {
            head.on_window_focus_changed(has_focus);
        }
    }

    pub fn press_back(&self) -> bool { self.back.as_ref().is_some_and(SimBackDispatcher::press) }

    pub fn back_handler_count(&self) -> usize { self.back.as_ref().map_or(0, SimBackDispatcher::len) }

    /// Attached overlay layers, bottom first.
    pub fn surfaces(&self) -> Vec<Arc<OverlaySurface>> { self.layers.lock().clone() }

    pub fn top_surface(&self) -> Option<Arc<OverlaySurface>> { self.layers.lock().last().cloned() }

    pub fn finish(&self) { self.finishing.store(true, Ordering::SeqCst); }

    /// The host tore the window down; its render tree is gone.
    pub fn mark_destroyed(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        self.layers.lock().clear();
    }

    /// The host removes every overlay layer on its own, without a detach
    /// call.
    pub fn drop_surfaces(&self) { self.layers.lock().clear(); }

    pub fn fail_attach(&self, fail: bool) { self.faults.fail_attach.store(fail, Ordering::SeqCst); }

    pub fn panic_on_attach(&self, panic: bool) { self.faults.panic_on_attach.store(panic, Ordering::SeqCst); }

    pub fn fail_detach(&self, fail: bool) { self.faults.fail_detach.store(fail, Ordering::SeqCst); }

    pub fn fail_set_callback(&self, fail: bool) { self.faults.fail_set_callback.store(fail, Ordering::SeqCst); }

    pub fn fail_back_registration(&self, fail: bool) {
        if let Some(back) = &self.back {
            back.fail_registration.store(fail, Ordering::SeqCst);
        }
    }

    pub fn fail_back_removal(&self, fail: bool) {
        if let Some(back) = &self.back {
            back.fail_removal.store(fail, Ordering::SeqCst);
        }
    }

    pub fn clear_event_callback(&self) { *self.callback.lock() = None; }
}

impl HostWindow for SimWindow {
    fn id(&self) -> WindowId { self.id }

    fn name(&self) -> String { self.name.clone() }

    fn is_finishing(&self) -> bool { self.finishing.load(Ordering::SeqCst) }

    fn is_destroyed(&self) -> bool { self.destroyed.load(Ordering::SeqCst) }

    fn event_callback(&self) -> Option<Arc<dyn EventCallback>> { self.head() }

    fn set_event_callback(&self, callback: Arc<dyn EventCallback>) -> Result<(), HostError> {
        if self.faults.fail_set_callback.load(Ordering::SeqCst) {
            return Err(HostError::NoEventChain);
        }
        if self.is_destroyed() {
            return Err(HostError::WindowGone);
        }
        *self.callback.lock() = Some(callback);
        Ok(())
    }

    fn attach_surface(&self, surface: Arc<OverlaySurface>) -> Result<(), HostError> {
        if self.faults.panic_on_attach.load(Ordering::SeqCst) {
            panic!("render tree is locked");
        }
        if self.faults.fail_attach.load(Ordering::SeqCst) {
            return Err(HostError::RenderTree("attach refused".into()));
        }
        if self.is_destroyed() {
            return Err(HostError::WindowGone);
        }
        self.layers.lock().push(surface);
        Ok(())
    }

    fn detach_surface(&self, surface: &OverlaySurface) -> Result<(), HostError> {
        if self.faults.fail_detach.load(Ordering::SeqCst) {
            return Err(HostError::RenderTree("detach refused".into()));
        }
        let mut layers = self.layers.lock();
        let before = layers.len();
        layers.retain(|layer| !std::ptr::eq(layer.as_ref(), surface));
        if layers.len() == before {
            return Err(HostError::RenderTree("surface is not attached".into()));
        }
        Ok(())
    }

    fn back_navigation(&self) -> Option<&dyn BackNavigation> {
        self.back.as_ref().map(|back| back as &dyn BackNavigation)
    }
}

/// Delivers lifecycle callbacks to every registered listener.
#[derive(Default)]
pub struct SimApp {
    listeners: Mutex<Vec<Arc<dyn LifecycleListener>>>,
    next_id: AtomicU64,
}

impl HostApplication for SimApp {
    fn register_lifecycle_listener(&self, listener: Arc<dyn LifecycleListener>) {
        self.listeners.lock().push(listener);
    }
}

impl SimApp {
    pub fn new() -> Self { Self::default() }

    /// A fresh window, not yet announced to listeners.
    pub fn new_window(&self, name: &str) -> Arc<SimWindow> {
        SimWindow::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1, name)
    }

    /// Creates, starts and resumes a new window.
    pub fn launch(&self, name: &str) -> Arc<SimWindow> {
        let window = self.new_window(name);
        self.create(&window);
        self.start(&window);
        self.resume(&window);
        window
    }

    pub fn create(&self, window: &Arc<SimWindow>) { self.each(window, |l, w| l.created(w)); }

    pub fn start(&self, window: &Arc<SimWindow>) { self.each(window, |l, w| l.started(w)); }

    pub fn resume(&self, window: &Arc<SimWindow>) { self.each(window, |l, w| l.resumed(w)); }

    pub fn pause(&self, window: &Arc<SimWindow>) { self.each(window, |l, w| l.paused(w)); }

    pub fn stop(&self, window: &Arc<SimWindow>) { self.each(window, |l, w| l.stopped(w)); }

    /// Finishing windows are destroyed; the destroyed flag itself is only set
    /// by [`SimWindow::mark_destroyed`].
    pub fn destroy(&self, window: &Arc<SimWindow>) {
        window.finish();
        self.each(window, |l, w| l.destroyed(w));
    }

    fn each(&self, window: &Arc<SimWindow>, notify: impl Fn(&dyn LifecycleListener, &Arc<dyn HostWindow>)) {
        let host: Arc<dyn HostWindow> = window.clone();
        let listeners = self.listeners.lock().clone();
        for listener in &listeners {
            notify(listener.as_ref(), &host);
        }
    }
}

/// Keeps every notice for inspection.
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<(WindowId, Notice)>>,
    panic_on_notify: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> { Arc::default() }

    pub fn notices(&self) -> Vec<(WindowId, Notice)> { self.notices.lock().clone() }

    pub fn panic_on_notify(&self, panic: bool) { self.panic_on_notify.store(panic, Ordering::SeqCst); }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, window: WindowId, notice: &Notice) {
        if self.panic_on_notify.load(Ordering::SeqCst) {
            panic!("toast queue is gone");
        }
        self.notices.lock().push((window, notice.clone()));
    }
}
