use serde::{Deserialize, Serialize};

use crate::model::registry::PluginKind;
use crate::model::snapshot::PluginReport;
use crate::model::window::{DismissReason, LifecycleState, WindowId};
use crate::sys::scope::ScopeId;

/// Observable state changes, published by the lifecycle coordinator.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
#[serde(tag = "type")]
pub enum BroadcastEvent {
    WindowTracked {
        window_id: WindowId,
        name: String,
    },
    LifecycleChanged {
        window_id: WindowId,
        state: LifecycleState,
    },
    GestureArmed {
        window_id: WindowId,
        delay_ms: u64,
    },
    GestureCancelled {
        window_id: WindowId,
    },
    SurfaceShown {
        window_id: WindowId,
        scope_id: ScopeId,
        providers: usize,
        actions: usize,
    },
    SurfaceHidden {
        window_id: WindowId,
        scope_id: ScopeId,
        reason: DismissReason,
    },
    PluginOutcome {
        window_id: WindowId,
        title: String,
        kind: PluginKind,
        outcome: crate::sys::scope::UnitOutcome,
    },
    WindowReleased {
        window_id: WindowId,
    },
}

impl BroadcastEvent {
    pub fn window_id(&self) -> WindowId {
        match self {
            BroadcastEvent::WindowTracked { window_id, .. }
            | BroadcastEvent::LifecycleChanged { window_id, .. }
            | BroadcastEvent::GestureArmed { window_id, .. }
            | BroadcastEvent::GestureCancelled { window_id }
            | BroadcastEvent::SurfaceShown { window_id, .. }
            | BroadcastEvent::SurfaceHidden { window_id, .. }
            | BroadcastEvent::PluginOutcome { window_id, .. }
            | BroadcastEvent::WindowReleased { window_id } => *window_id,
        }
    }

    pub(crate) fn plugin_outcome(window_id: WindowId, report: &PluginReport) -> Self {
        BroadcastEvent::PluginOutcome {
            window_id,
            title: report.title.clone(),
            kind: report.kind,
            outcome: report.outcome.clone(),
        }
    }
}

pub type BroadcastSender = tokio::sync::broadcast::Sender<BroadcastEvent>;
pub type BroadcastReceiver = tokio::sync::broadcast::Receiver<BroadcastEvent>;
