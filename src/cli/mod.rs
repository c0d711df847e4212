//! The `solo` command line: argument parsing, value enums and the handler
//! behind each subcommand.

mod args;
mod commands;
mod enums;

pub use args::{Args, Command, ConfigAction, LaunchArgs, RoboArgs, ServeArgs};
pub use commands::{
    handle_config_action, list_ports, run_mode, run_setup, show_status, CommandError, ModeRun,
};
pub use enums::{ModeChoice, PolicyChoice, RoboMode, RobotChoice, ServerChoice};
