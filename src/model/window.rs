use std::fmt;

use serde::{Deserialize, Serialize};

use crate::sys::scope::ScopeId;

/// Host-assigned identity of a window, stable for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(pub u64);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "window#{}", self.0) }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LifecycleState {
    Created,
    Started,
    Resumed,
    Paused,
    Stopped,
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unexpected lifecycle transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: LifecycleState,
    pub to: LifecycleState,
}

impl LifecycleState {
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Created, Started)
                | (Started, Resumed)
                | (Resumed, Paused)
                | (Paused, Resumed)
                | (Paused, Stopped)
                | (Stopped, Started)
                | (Created | Started | Paused | Stopped, Destroyed)
        )
    }

    pub fn transition(self, next: LifecycleState) -> Result<LifecycleState, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition { from: self, to: next })
        }
    }

    /// Paused, stopped and destroyed windows never start a gesture.
    pub fn accepts_gestures(self) -> bool {
        matches!(self, LifecycleState::Created | LifecycleState::Started | LifecycleState::Resumed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GestureState {
    #[default]
    Idle,
    TimerArmed,
    Fired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "scope")]
pub enum SurfaceState {
    #[default]
    Detached,
    Attached(ScopeId),
}

impl SurfaceState {
    pub fn is_attached(self) -> bool { matches!(self, SurfaceState::Attached(_)) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DismissReason {
    CloseButton,
    BackNavigation,
    Programmatic,
    Paused,
    Stopped,
    Destroyed,
    Shutdown,
}
