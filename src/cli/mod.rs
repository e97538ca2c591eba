//! Command-line interface components
//!
//! This module contains CLI-specific code for the media cache: argument
//! parsing, command handlers and operator confirmation.

pub mod args;
pub mod commands;

pub use args::{
    ClearArgs, Cli, Commands, ConfigAction, ConfigArgs, GlobalArgs, JobSelection, MonitorArgs,
    MountAction, MountArgs, RollbackArgs, SweepArgs,
};
pub use commands::{
    handle_clear, handle_config, handle_disable, handle_enable, handle_health, handle_monitor,
    handle_mount, handle_rollback, handle_status, handle_sweep, handle_top, handle_usage,
};
