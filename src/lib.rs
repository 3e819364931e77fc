//! A long-press debug overlay for host UI toolkits.
//!
//! The host implements the traits in [`sys::host`] and installs an
//! [`Overlay`]; holding a finger on any window for the configured delay then
//! attaches a surface listing the registered info providers and actions.

pub mod actor;
pub mod common;
pub mod model;
pub mod overlay;
pub mod plugins;
pub mod sim;
pub mod sys;
pub mod ui;

pub use overlay::{Overlay, OverlayBuilder};
