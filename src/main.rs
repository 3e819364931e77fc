//! Replays a scripted sequence of host events against the simulated host and
//! prints every observable overlay transition as a JSON line.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use overlay_hook::common::collections::HashMap;
use overlay_hook::common::config::Config;
use overlay_hook::common::log;
use overlay_hook::sim::{SimApp, SimWindow};
use overlay_hook::sys::event::PointerEvent;
use overlay_hook::sys::host::HostWindow;
use overlay_hook::Overlay;
use serde::Deserialize;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{Instrument, debug, info_span, warn};

#[derive(Debug, Parser)]
#[command(about = "Replay a window lifecycle scenario against the overlay", version)]
struct Cli {
    /// Scenario file (TOML, one `[[step]]` table per host event).
    scenario: PathBuf,

    /// Config file; defaults to the user config directory when present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides `settings.gesture.long_press_delay`.
    #[arg(long = "delay-ms")]
    delay_ms: Option<u64>,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Deserialize)]
struct Scenario {
    #[serde(rename = "step", default)]
    steps: Vec<Step>,
}

impl Scenario {
    fn read(path: &Path) -> anyhow::Result<Self> {
        let buf = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        toml::from_str(&buf).with_context(|| format!("parsing scenario {}", path.display()))
    }
}

#[derive(Debug, Deserialize)]
struct Step {
    #[serde(flatten)]
    op: Op,
    #[serde(default = "default_window")]
    window: String,
}

fn default_window() -> String { "main".to_owned() }

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Op {
    Create,
    Start,
    Resume,
    Pause,
    Stop,
    Destroy,
    Finish,
    PointerDown,
    PointerUp,
    PointerCancel,
    Back,
    /// Presses the close control of the visible surface.
    Dismiss,
    Show,
    RunAction { index: usize },
    Wait { ms: u64 },
}

struct Replay {
    app: SimApp,
    overlay: Overlay,
    windows: HashMap<String, Arc<SimWindow>>,
}

impl Replay {
    fn window(&self, name: &str) -> anyhow::Result<&Arc<SimWindow>> {
        self.windows
            .get(name)
            .with_context(|| format!("unknown window {name:?}; add a `create` step first"))
    }

    async fn apply(&mut self, step: Step) -> anyhow::Result<()> {
        let name = step.window.as_str();
        match step.op {
            Op::Create => {
                let window = self.app.new_window(name);
                self.windows.insert(name.to_owned(), window.clone());
                self.app.create(&window);
            }
            Op::Start => self.app.start(self.window(name)?),
            Op::Resume => self.app.resume(self.window(name)?),
            Op::Pause => self.app.pause(self.window(name)?),
            Op::Stop => self.app.stop(self.window(name)?),
            Op::Destroy => self.app.destroy(self.window(name)?),
            Op::Finish => self.window(name)?.finish(),
            Op::PointerDown => {
                self.window(name)?.touch(PointerEvent::down(0.0, 0.0));
            }
            Op::PointerUp => {
                self.window(name)?.touch(PointerEvent::up(0.0, 0.0));
            }
            Op::PointerCancel => {
                self.window(name)?.touch(PointerEvent::cancel());
            }
            Op::Back => {
                if !self.window(name)?.press_back() {
                    debug!(window = name, "back press not consumed");
                }
            }
            Op::Dismiss => match self.window(name)?.top_surface() {
                Some(surface) => surface.dismiss(),
                None => warn!(window = name, "no surface to dismiss"),
            },
            Op::Show => self.overlay.show(self.window(name)?.id()),
            Op::RunAction { index } => match self.window(name)?.top_surface() {
                Some(surface) => {
                    if let Err(err) = surface.run_action(index) {
                        warn!(window = name, index, %err, "action not started");
                    }
                }
                None => warn!(window = name, "no surface to run an action on"),
            },
            Op::Wait { ms } => tokio::time::sleep(Duration::from_millis(ms)).await,
        }
        self.overlay.stats().await?;
        Ok(())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    log::init(cli.verbose);

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(ms) = cli.delay_ms {
        anyhow::ensure!(ms > 0, "--delay-ms must be greater than zero");
        config.settings.gesture.long_press_delay = Duration::from_millis(ms);
    }
    let scenario = Scenario::read(&cli.scenario)?;

    let (overlay, coordinator) = Overlay::builder(config).spawn();
    let mut events = BroadcastStream::new(overlay.subscribe());
    let printer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(BroadcastStreamRecvError::Lagged(missed)) => warn!(missed, "output fell behind"),
            }
        }
        anyhow::Ok(())
    });

    let app = SimApp::new();
    overlay.install(&app);
    let mut replay = Replay { app, overlay, windows: HashMap::default() };
    for (index, step) in scenario.steps.into_iter().enumerate() {
        let span = info_span!("step", index, op = ?step.op, window = %step.window);
        replay.apply(step).instrument(span).await.with_context(|| format!("step {index}"))?;
    }

    replay.overlay.shutdown();
    coordinator.await.context("lifecycle coordinator panicked")?;
    // The printer ends once every broadcast sender is gone.
    drop(replay);
    printer.await.context("event printer panicked")?
}
