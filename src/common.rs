pub mod collections;
pub mod config;
pub mod crash;
pub mod log;
pub mod prefs;
