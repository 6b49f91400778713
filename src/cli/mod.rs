//! CLI module for the pushdeck tool.
//!
//! This module provides the command-line interface for pushing
//! applications and previewing push plans.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, PushArgs};
pub use output::OutputFormatter;
