use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PointerAction {
    Down,
    Up,
    Cancel,
    Move,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct PointerEvent {
    pub action: PointerAction,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub pointer_id: u32,
}

impl PointerEvent {
    pub fn new(action: PointerAction, x: f64, y: f64) -> Self {
        Self { action, x, y, pointer_id: 0 }
    }

    pub fn down(x: f64, y: f64) -> Self { Self::new(PointerAction::Down, x, y) }

    pub fn up(x: f64, y: f64) -> Self { Self::new(PointerAction::Up, x, y) }

    pub fn cancel() -> Self { Self::new(PointerAction::Cancel, 0.0, 0.0) }

    pub fn moved(x: f64, y: f64) -> Self { Self::new(PointerAction::Move, x, y) }
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq)]
pub struct KeyEvent {
    pub code: u32,
    pub pressed: bool,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct MotionEvent {
    pub source: u32,
    pub x: f64,
    pub y: f64,
}
