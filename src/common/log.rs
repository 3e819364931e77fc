//! Logging setup for binaries and tests.
//!
//! The library itself only emits `tracing` events; a host embedding the
//! overlay installs whatever subscriber it already uses.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_tree::HierarchicalLayer;
use tracing_tree::time::Uptime;

/// Installs a hierarchical stderr logger. `RUST_LOG` overrides the level
/// chosen by `verbose`.
pub fn init(verbose: bool) {
    let level = if verbose { "overlay_hook=trace,debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let tree = HierarchicalLayer::default()
        .with_writer(std::io::stderr)
        .with_indent_lines(true)
        .with_targets(true)
        .with_deferred_spans(true)
        .with_timer(Uptime::default());

    // A subscriber may already be installed by the embedding host or a test.
    let _ = tracing_subscriber::registry().with(filter).with(tree).try_init();
}
