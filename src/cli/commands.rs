//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{CommandLineSettings, HealthCheckType, parse_megabytes};

/// Pushdeck - Declarative application pushes.
#[derive(Parser, Debug)]
#[command(name = "pushdeck")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Platform API endpoint.
    #[arg(long, global = true, env = "PUSHDECK_API")]
    pub api: Option<String>,

    /// Platform API token.
    #[arg(long, global = true, env = "PUSHDECK_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Target space GUID.
    #[arg(long, global = true, env = "PUSHDECK_SPACE")]
    pub space: Option<String>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Push an application.
    Push {
        /// Push settings.
        #[command(flatten)]
        args: PushArgs,

        /// Do not wait for the application to start.
        #[arg(long)]
        no_wait: bool,
    },

    /// Show what a push would change.
    Plan {
        /// Push settings.
        #[command(flatten)]
        args: PushArgs,

        /// Show field-level differences.
        #[arg(short, long)]
        detailed: bool,
    },
}

/// Settings shared by `push` and `plan`.
#[derive(Args, Debug, Clone, Default)]
pub struct PushArgs {
    /// Application name. Optional when the manifest defines one application.
    pub name: Option<String>,

    /// Buildpack name or URL; repeat for several.
    #[arg(short = 'b', long = "buildpack")]
    pub buildpacks: Vec<String>,

    /// Start command.
    #[arg(short = 'c', long)]
    pub command: Option<String>,

    /// Disk quota, e.g. `1G` or `512M`.
    #[arg(short = 'k', long = "disk", value_parser = parse_megabytes)]
    pub disk: Option<u64>,

    /// Docker image to deploy instead of bits.
    #[arg(short = 'o', long)]
    pub docker_image: Option<String>,

    /// Docker registry username.
    #[arg(long)]
    pub docker_username: Option<String>,

    /// Docker registry password.
    #[arg(long, env = "PUSHDECK_DOCKER_PASSWORD", hide = true, hide_env_values = true)]
    pub docker_password: Option<String>,

    /// Health check type (port, process, http).
    #[arg(short = 'u', long)]
    pub health_check_type: Option<HealthCheckType>,

    /// Health check timeout in seconds.
    #[arg(short = 't', long)]
    pub health_check_timeout: Option<u32>,

    /// Number of instances.
    #[arg(short = 'i', long)]
    pub instances: Option<u32>,

    /// Memory quota, e.g. `256M` or `1G`.
    #[arg(short = 'm', long, value_parser = parse_megabytes)]
    pub memory: Option<u64>,

    /// Path to the application directory or archive.
    #[arg(short = 'p', long)]
    pub path: Option<String>,

    /// Stack to run on.
    #[arg(short = 's', long)]
    pub stack: Option<String>,

    /// Path to the manifest file.
    #[arg(short = 'f', long = "manifest")]
    pub manifest: Option<PathBuf>,

    /// Ignore any manifest file.
    #[arg(long, conflicts_with = "manifest")]
    pub no_manifest: bool,

    /// Seconds to wait for the application to start.
    #[arg(long, default_value = "300")]
    pub wait_timeout: u64,
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl PushArgs {
    /// Converts the flags into command-line settings for the push engine.
    #[must_use]
    pub fn to_settings(&self, current_directory: PathBuf) -> CommandLineSettings {
        CommandLineSettings {
            buildpacks: self.buildpacks.clone(),
            command: self.command.clone().unwrap_or_default(),
            current_directory,
            disk_quota_mb: self.disk.unwrap_or_default(),
            docker_image: self.docker_image.clone().unwrap_or_default(),
            docker_password: self.docker_password.clone().unwrap_or_default(),
            docker_username: self.docker_username.clone().unwrap_or_default(),
            health_check_timeout: self.health_check_timeout.unwrap_or_default(),
            health_check_type: self.health_check_type,
            instances: self.instances,
            memory_mb: self.memory.unwrap_or_default(),
            name: self.name.clone().unwrap_or_default(),
            provided_app_path: self.path.clone().unwrap_or_default(),
            stack: self.stack.clone().unwrap_or_default(),
        }
    }

    /// Returns the polling timeout.
    #[must_use]
    pub const fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout)
    }
}
