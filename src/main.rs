//! Pushdeck CLI entrypoint.
//!
//! This is the main entrypoint for the pushdeck command-line tool.

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use pushdeck::cli::{Cli, Commands, OutputFormatter, PushArgs};
use pushdeck::config::{ManifestApplication, ManifestParser, PlatformConfig, find_manifest_file};
use pushdeck::error::Result;
use pushdeck::events::ExecutionEvent;
use pushdeck::platform::PlatformClient;
use pushdeck::push::{PushOptions, PushPipeline};
use pushdeck::state::{LocalRecordStore, RECORD_DIR};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    // Values from .env feed the env-backed flags
    if let Err(e) = ManifestParser::new().load_dotenv() {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }

    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let formatter = OutputFormatter::new(cli.output);
    match runtime.block_on(run(cli, &formatter)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{}", formatter.format_error(&format!("Error: {e}")));
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Main async entry point. Returns whether the command succeeded.
async fn run(cli: Cli, formatter: &OutputFormatter) -> Result<bool> {
    let platform = PlatformConfig::from_parts(cli.api, cli.token, cli.space)?;
    let current_dir = std::env::current_dir()?;
    debug!("Platform: {:?}", platform);

    match cli.command {
        Commands::Push { args, no_wait } => {
            cmd_push(&platform, &current_dir, &args, no_wait, formatter).await
        }
        Commands::Plan { args, detailed } => {
            cmd_plan(&platform, &current_dir, &args, detailed, formatter).await
        }
    }
}

/// Push an application.
async fn cmd_push(
    platform: &PlatformConfig,
    current_dir: &Path,
    args: &PushArgs,
    no_wait: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let mut options = PushOptions::default().with_wait_timeout(args.wait_timeout());
    if no_wait {
        options = options.without_wait();
    }
    let pipeline = create_pipeline(platform, current_dir)?.with_options(options);

    let manifest = load_manifest(current_dir, args)?;
    let app_name = display_name(args, manifest.as_ref());
    let settings = args.to_settings(current_dir.to_path_buf());

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping after the current change");
                cancel.cancel();
            }
        })
    };

    let mut handle = pipeline.push(settings, manifest, cancel);
    while let Some(event) = handle.events().next().await {
        if let Some(line) = formatter.format_event(&event, &app_name) {
            emit(&line);
        }
    }

    let outcome = handle.outcome().await;
    interrupt.abort();
    let outcome = outcome?;

    emit(&formatter.format_outcome(&outcome));
    Ok(outcome.is_success())
}

/// Show what a push would change.
async fn cmd_plan(
    platform: &PlatformConfig,
    current_dir: &Path,
    args: &PushArgs,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let pipeline = create_pipeline(platform, current_dir)?;

    let manifest = load_manifest(current_dir, args)?;
    let app_name = display_name(args, manifest.as_ref());
    let settings = args.to_settings(current_dir.to_path_buf());

    let plan = pipeline.plan(&settings, manifest).await?;

    // Warnings go to stderr so stdout stays a single document
    for message in plan.warnings {
        let event = ExecutionEvent::Warning { message };
        if let Some(line) = formatter.format_event(&event, &app_name) {
            eprintln!("{line}");
        }
    }

    emit(&formatter.format_plan(&plan.value, detailed));
    Ok(true)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Creates the push pipeline for the configured platform.
fn create_pipeline(
    platform: &PlatformConfig,
    current_dir: &Path,
) -> Result<PushPipeline<PlatformClient, LocalRecordStore>> {
    let api = Arc::new(PlatformClient::new(platform)?);
    let store = Arc::new(LocalRecordStore::with_base_dir(current_dir.join(RECORD_DIR)));
    Ok(PushPipeline::new(api, store, platform.space.clone()))
}

/// Loads the manifest entry to push, if any.
fn load_manifest(current_dir: &Path, args: &PushArgs) -> Result<Option<ManifestApplication>> {
    if args.no_manifest {
        return Ok(None);
    }

    let path = match &args.manifest {
        Some(path) => Some(current_dir.join(path)),
        None => find_manifest_file(current_dir),
    };
    let Some(path) = path else {
        debug!("No manifest, pushing from command-line settings only");
        return Ok(None);
    };

    let base = path.parent().unwrap_or(current_dir);
    let manifest = ManifestParser::new().with_base_path(base).load_file(&path)?;
    manifest.application(args.name.as_deref())
}

/// Name used when describing changes.
fn display_name(args: &PushArgs, manifest: Option<&ManifestApplication>) -> String {
    args.name
        .clone()
        .filter(|n| !n.is_empty())
        .or_else(|| manifest.map(|m| m.name.clone()))
        .unwrap_or_default()
}

/// Writes command output to stdout.
fn emit(text: &str) {
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{text}");
}
