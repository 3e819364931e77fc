use serde::{Deserialize, Serialize};

use crate::model::registry::PluginKind;
use crate::model::window::{GestureState, LifecycleState, SurfaceState, WindowId};
use crate::sys::scope::UnitOutcome;

/// How one provider render or action run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginReport {
    pub title: String,
    pub kind: PluginKind,
    pub outcome: UnitOutcome,
}

/// Point-in-time view of one tracked window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSnapshot {
    pub id: WindowId,
    pub name: String,
    pub lifecycle: LifecycleState,
    pub gesture: GestureState,
    pub surface: SurfaceState,
    pub is_foreground: bool,
    pub timer_armed: bool,
    pub interceptor_installed: bool,
    /// Most recent last.
    #[serde(default)]
    pub outcomes: Vec<PluginReport>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub tracked_windows: usize,
    pub live_scopes: usize,
    pub foreground: Option<WindowId>,
}
