use std::sync::Arc;
use std::time::Duration;

use overlay_hook::Overlay;
use overlay_hook::actor::broadcast::{BroadcastEvent, BroadcastReceiver};
use overlay_hook::common::config::Config;
use overlay_hook::model::{DismissReason, GestureState, LifecycleState, PluginContext, SurfaceState, WindowSnapshot};
use overlay_hook::sim::{RecordingCallback, RecordingNotifier, SimApp, SimWindow};
use overlay_hook::sys::event::PointerEvent;
use overlay_hook::sys::host::{HostWindow, NoticeLevel};
use overlay_hook::sys::interceptor::EventCallback;
use overlay_hook::sys::scope::UnitOutcome;
use pretty_assertions::assert_eq;
use tokio::task::JoinHandle;

const DELAY: Duration = Duration::from_millis(2000);

struct Fixture {
    app: SimApp,
    overlay: Overlay,
    coordinator: JoinHandle<()>,
    notifier: Arc<RecordingNotifier>,
    events: BroadcastReceiver,
}

impl Fixture {
    fn new() -> Self { Self::with_config(Config::default()) }

    fn with_config(config: Config) -> Self {
        let notifier = RecordingNotifier::new();
        let (overlay, coordinator) = Overlay::builder(config).notifier(notifier.clone()).spawn();
        let events = overlay.subscribe();
        let app = SimApp::new();
        overlay.install(&app);
        Self { app, overlay, coordinator, notifier, events }
    }

    fn without_defaults() -> Self {
        let mut config = Config::default();
        config.settings.overlay.register_defaults = false;
        Self::with_config(config)
    }

    async fn flush(&self) { self.overlay.stats().await.unwrap(); }

    async fn snapshot(&self, window: &Arc<SimWindow>) -> WindowSnapshot {
        self.overlay.snapshot(window.id()).await.unwrap().unwrap()
    }

    async fn hold(&self, window: &Arc<SimWindow>, duration: Duration) {
        window.touch(PointerEvent::down(5.0, 5.0));
        self.flush().await;
        tokio::time::sleep(duration).await;
        self.flush().await;
    }

    async fn long_press(&self, window: &Arc<SimWindow>) { self.hold(window, DELAY + Duration::from_millis(1)).await }

    fn broadcasts(&mut self) -> Vec<BroadcastEvent> { std::iter::from_fn(|| self.events.try_recv().ok()).collect() }

    async fn finish(self) {
        self.overlay.shutdown();
        self.coordinator.await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn long_press_then_close_button() {
    let mut fx = Fixture::new();
    let window = fx.app.launch("main");

    fx.long_press(&window).await;
    let surface = window.top_surface().expect("overlay attached");
    assert_eq!(surface.providers().len(), 5);
    assert_eq!(fx.snapshot(&window).await.surface, SurfaceState::Attached(surface.scope_id()));

    window.touch(PointerEvent::up(5.0, 5.0));
    surface.dismiss();
    fx.flush().await;

    let snapshot = fx.snapshot(&window).await;
    assert_eq!(snapshot.surface, SurfaceState::Detached);
    assert_eq!(snapshot.gesture, GestureState::Idle);
    assert!(!surface.is_open());
    assert!(window.surfaces().is_empty());

    let kinds: Vec<_> = fx
        .broadcasts()
        .into_iter()
        .filter(|event| {
            matches!(
                event,
                BroadcastEvent::GestureArmed { .. }
                    | BroadcastEvent::SurfaceShown { .. }
                    | BroadcastEvent::SurfaceHidden { .. }
            )
        })
        .collect();
    assert_eq!(kinds.len(), 3);
    assert!(matches!(
        kinds[2],
        BroadcastEvent::SurfaceHidden { reason: DismissReason::CloseButton, .. }
    ));
    fx.finish().await;
}

#[tokio::test(start_paused = true)]
async fn release_just_before_delay_attaches_nothing() {
    let fx = Fixture::new();
    let window = fx.app.launch("main");

    fx.hold(&window, DELAY - Duration::from_millis(1)).await;
    window.touch(PointerEvent::up(5.0, 5.0));
    fx.flush().await;
    tokio::time::sleep(DELAY).await;
    fx.flush().await;

    assert!(window.surfaces().is_empty());
    assert_eq!(fx.snapshot(&window).await.gesture, GestureState::Idle);
    fx.finish().await;
}

#[tokio::test(start_paused = true)]
async fn stop_without_pause_still_detaches() {
    let fx = Fixture::new();
    let window = fx.app.launch("main");
    fx.long_press(&window).await;
    assert_eq!(window.surfaces().len(), 1);

    fx.app.stop(&window);
    fx.flush().await;

    let snapshot = fx.snapshot(&window).await;
    assert_eq!(snapshot.lifecycle, LifecycleState::Stopped);
    assert_eq!(snapshot.surface, SurfaceState::Detached);
    assert!(window.surfaces().is_empty());
    assert_eq!(fx.overlay.stats().await.unwrap().live_scopes, 0);
    fx.finish().await;
}

#[tokio::test(start_paused = true)]
async fn pause_is_handled_before_a_later_resume() {
    let fx = Fixture::new();
    let window = fx.app.launch("main");
    fx.long_press(&window).await;
    let surface = window.top_surface().unwrap();

    fx.app.pause(&window);
    fx.app.resume(&window);
    fx.flush().await;

    assert!(!surface.is_open());
    assert!(window.surfaces().is_empty());
    let snapshot = fx.snapshot(&window).await;
    assert_eq!(snapshot.lifecycle, LifecycleState::Resumed);
    assert!(snapshot.is_foreground);
    fx.finish().await;
}

#[tokio::test(start_paused = true)]
async fn destroy_restores_the_original_chain() {
    let fx = Fixture::new();
    let content = RecordingCallback::new(true);
    let original: Arc<dyn EventCallback> = content.clone();
    let window = SimWindow::with_content(7, "content", content.clone());
    fx.app.create(&window);
    fx.app.start(&window);
    fx.app.resume(&window);
    fx.flush().await;

    let head = window.event_callback().unwrap();
    assert!(!Arc::ptr_eq(&head, &original));
    assert!(window.touch(PointerEvent::down(1.0, 1.0)));
    assert!(window.touch(PointerEvent::up(1.0, 1.0)));
    window.focus(true);

    fx.app.pause(&window);
    fx.app.stop(&window);
    fx.app.destroy(&window);
    fx.flush().await;

    assert!(Arc::ptr_eq(&window.event_callback().unwrap(), &original));
    assert_eq!(content.calls(), ["pointer:down", "pointer:up", "focus:true"]);
    assert_eq!(fx.overlay.snapshot(window.id()).await.unwrap(), None);
    fx.finish().await;
}

#[tokio::test(start_paused = true)]
async fn show_hide_show_uses_fresh_scopes() {
    let fx = Fixture::new();
    let window = fx.app.launch("main");

    fx.overlay.show(window.id());
    fx.overlay.show(window.id());
    fx.flush().await;
    assert_eq!(window.surfaces().len(), 1);
    let first = window.top_surface().unwrap();

    fx.overlay.dismiss(window.id());
    fx.overlay.dismiss(window.id());
    fx.overlay.show(window.id());
    fx.flush().await;
    let second = window.top_surface().unwrap();

    assert_ne!(first.scope_id(), second.scope_id());
    assert!(!first.is_open());
    assert!(second.is_open());
    assert_eq!(fx.overlay.stats().await.unwrap().live_scopes, 1);
    fx.finish().await;
}

#[tokio::test(start_paused = true)]
async fn delay_changes_apply_to_the_next_gesture() {
    let fx = Fixture::new();
    let window = fx.app.launch("main");
    fx.overlay.set_long_press_delay(Duration::from_millis(300));

    fx.hold(&window, Duration::from_millis(301)).await;
    assert_eq!(window.surfaces().len(), 1);
    fx.finish().await;
}

async fn crash(_: PluginContext) -> anyhow::Result<()> { panic!("action exploded") }

#[tokio::test(start_paused = true)]
async fn plugin_failures_are_isolated_and_reported() {
    let fx = Fixture::without_defaults();
    fx.overlay.registry().add_provider("broken", |_| -> anyhow::Result<_> { panic!("render exploded") });
    fx.overlay.registry().add_action("crash", None, crash);
    fx.overlay.registry().add_action("ok", Some("does nothing"), |_| async { anyhow::Ok(()) });
    let window = fx.app.launch("main");
    fx.long_press(&window).await;
    let surface = window.top_surface().unwrap();

    assert!(surface.render_provider(0).is_err());
    surface.run_action(0).unwrap();
    surface.run_action(1).unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    fx.flush().await;

    let outcomes: Vec<_> = fx.snapshot(&window).await.outcomes.into_iter().map(|r| r.outcome).collect();
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.contains(&UnitOutcome::Panicked("render exploded".into())));
    assert!(outcomes.contains(&UnitOutcome::Panicked("action exploded".into())));
    assert!(outcomes.contains(&UnitOutcome::Completed));
    assert!(surface.is_open());

    let errors = fx.notifier.notices().into_iter().filter(|(_, n)| n.level == NoticeLevel::Error).count();
    assert_eq!(errors, 2);
    fx.finish().await;
}

#[tokio::test(start_paused = true)]
async fn windows_are_independent() {
    let fx = Fixture::new();
    let first = fx.app.launch("first");
    fx.long_press(&first).await;
    let second = fx.app.launch("second");
    fx.flush().await;

    // Launching over the first window pauses it in a real host.
    fx.app.pause(&first);
    fx.long_press(&second).await;
    fx.flush().await;

    assert!(first.surfaces().is_empty());
    assert_eq!(second.surfaces().len(), 1);
    let windows = fx.overlay.windows().await.unwrap();
    assert_eq!(windows.len(), 2);
    assert!(windows[1].is_foreground);
    fx.finish().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_leaves_hosts_untouched() {
    let fx = Fixture::new();
    let window = fx.app.launch("main");
    fx.long_press(&window).await;
    let overlay = fx.overlay.clone();
    fx.finish().await;

    assert!(window.surfaces().is_empty());
    assert!(window.event_callback().unwrap().as_interceptor().is_none());
    assert!(!overlay.is_running());

    // Callbacks after shutdown are dropped quietly.
    overlay.dismiss(window.id());
    assert!(!window.touch(PointerEvent::down(0.0, 0.0)));
}

#[tokio::test(start_paused = true)]
async fn host_panic_does_not_stop_the_overlay() {
    let fx = Fixture::new();
    let content = RecordingCallback::new(false);
    let original: Arc<dyn EventCallback> = content.clone();
    let window = SimWindow::with_content(3, "fragile", content);
    fx.app.create(&window);
    fx.app.start(&window);
    fx.app.resume(&window);

    window.panic_on_attach(true);
    fx.long_press(&window).await;
    assert!(window.surfaces().is_empty());
    assert_eq!(fx.snapshot(&window).await.surface, SurfaceState::Detached);
    assert_eq!(fx.overlay.stats().await.unwrap().live_scopes, 0);

    window.panic_on_attach(false);
    window.touch(PointerEvent::up(5.0, 5.0));
    fx.long_press(&window).await;
    assert_eq!(window.surfaces().len(), 1);

    fx.app.pause(&window);
    fx.app.stop(&window);
    fx.app.destroy(&window);
    fx.flush().await;
    assert!(Arc::ptr_eq(&window.event_callback().unwrap(), &original));
    fx.finish().await;
}

#[tokio::test(start_paused = true)]
async fn dropping_every_handle_uninstalls() {
    let content = RecordingCallback::new(false);
    let original: Arc<dyn EventCallback> = content.clone();
    let window = SimWindow::with_content(4, "main", content);
    let Fixture { app, overlay, coordinator, .. } = Fixture::new();
    app.create(&window);
    app.start(&window);
    app.resume(&window);
    overlay.show(window.id());
    overlay.stats().await.unwrap();
    assert_eq!(window.surfaces().len(), 1);

    drop(overlay);
    drop(app);
    coordinator.await.unwrap();

    assert!(window.surfaces().is_empty());
    assert!(Arc::ptr_eq(&window.event_callback().unwrap(), &original));
}

#[tokio::test(start_paused = true)]
async fn lifecycle_and_flags_show_up_in_the_overlay() {
    let fx = Fixture::new();
    fx.overlay.feature_flags().define("compact_rows", false, None);
    let window = fx.app.launch("main");
    fx.long_press(&window).await;

    let states: Vec<_> = fx.overlay.activity().records().into_iter().map(|r| r.state).collect();
    assert_eq!(states, [LifecycleState::Created, LifecycleState::Started, LifecycleState::Resumed]);

    let surface = window.top_surface().unwrap();
    let flags = surface.render_provider(3).unwrap();
    assert_eq!(flags[0].value, "false");
    surface.set_preference("feature_flags", "compact_rows", "true").unwrap();
    assert!(fx.overlay.feature_flags().is_enabled("compact_rows"));
    fx.finish().await;
}
