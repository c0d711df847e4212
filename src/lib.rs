//! Library behind the `solo` binary.
//!
//! Modes, saved settings, port detection and process launching live here so
//! the integration tests can drive a whole session without a terminal.

pub mod cli;
pub mod config;
pub mod datasets;
pub mod devices;
pub mod hardware;
pub mod launcher;
pub mod modes;
pub mod plans;
pub mod prompt;
pub mod robots;
pub mod servers;
pub mod session;
pub mod settings;
