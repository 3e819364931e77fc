pub mod activity;
pub mod flags;
pub mod registry;
pub mod snapshot;
pub mod window;

pub use registry::{InfoRow, PluginContext, PluginEntry, Registry};
pub use snapshot::{CoordinatorStats, PluginReport, WindowSnapshot};
pub use window::{DismissReason, GestureState, LifecycleState, SurfaceState, WindowId};
