//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use chrono::Utc;
use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::events::ExecutionEvent;
use crate::planner::{Change, Plan};
use crate::platform::{ActualApplication, InstanceSnapshot, InstanceState, PollStatus};
use crate::push::PushOutcome;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan change row for table display.
#[derive(Tabled)]
struct PlanChangeRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Description")]
    description: String,
}

/// Instance row for table display.
#[derive(Tabled)]
struct InstanceRow {
    #[tabled(rename = "")]
    index: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "since")]
    since: String,
    #[tabled(rename = "cpu")]
    cpu: String,
    #[tabled(rename = "memory")]
    memory: String,
    #[tabled(rename = "disk")]
    disk: String,
    #[tabled(rename = "details")]
    details: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a push plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plan).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    fn format_plan_text(plan: &Plan, detailed: bool) -> String {
        if plan.is_empty() {
            return format!(
                "{} No changes required - '{}' is up to date.\n",
                "✓".green(),
                plan.application
            );
        }

        let mut output = String::new();
        let _ = write!(output, "\nPush plan for {}\n\n", plan.application.bold());

        let rows: Vec<PlanChangeRow> = plan
            .changes
            .iter()
            .enumerate()
            .map(|(i, change)| PlanChangeRow {
                index: i + 1,
                action: Self::format_change_kind(change),
                description: Self::truncate(&change.description(&plan.application), 60),
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            for change in &plan.changes {
                if let Change::UpdateApplication { details, .. } = change {
                    output.push_str("\nField changes:\n");
                    for detail in details {
                        let _ = writeln!(output, "   {detail}");
                    }
                }
            }
        }

        let _ = write!(
            output,
            "\nPlan: {} changes ({} route bindings, {} uploads)\n",
            plan.len().to_string().yellow(),
            plan.count_of("bind-route"),
            plan.count_of("upload")
        );

        output
    }

    /// Formats one event, or returns `None` for events not shown in text.
    #[must_use]
    pub fn format_event(&self, event: &ExecutionEvent, application: &str) -> Option<String> {
        if self.format == OutputFormat::Json {
            return serde_json::to_string(event).ok();
        }

        match event {
            ExecutionEvent::Warning { message } => Some(format!("{} {message}", "⚠".yellow())),
            ExecutionEvent::Changed { change, result } => Some(format!(
                "{} {} ({result})",
                "✓".green(),
                change.description(application)
            )),
            ExecutionEvent::InstanceSnapshot { instances } => {
                let running = instances
                    .iter()
                    .filter(|i| i.state == InstanceState::Running)
                    .count();
                Some(format!(
                    "   {} of {} instances running",
                    running,
                    instances.len()
                ))
            }
            ExecutionEvent::UploadProgress { sent, total } => (sent == total).then(|| {
                format!("   Uploaded {}", Self::format_bytes(*total))
            }),
        }
    }

    /// Formats the outcome of a push.
    #[must_use]
    pub fn format_outcome(&self, outcome: &PushOutcome) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(outcome).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();

                match &outcome.status {
                    Some(status) => {
                        let _ = writeln!(output, "\n{}", Self::format_status(status));
                    }
                    None if outcome.report.is_none() => {
                        let _ = writeln!(
                            output,
                            "\n{} '{}' is up to date",
                            "✓".green(),
                            outcome.plan.application
                        );
                    }
                    None => {}
                }

                if let Some(app) = &outcome.application {
                    output.push_str(&Self::format_application(app));
                }

                output
            }
        }
    }

    /// Formats the application summary and its instances.
    fn format_application(app: &ActualApplication) -> String {
        let mut output = String::new();

        let expected = app
            .instances
            .map_or_else(|| app.instance_stats.len(), |n| {
                usize::try_from(n).unwrap_or(usize::MAX)
            });
        let routes: Vec<String> = app.routes.iter().map(|r| r.spec().to_string()).collect();

        let _ = writeln!(output, "\nname:              {}", app.name.bold());
        let _ = writeln!(output, "requested state:   {}", app.state);
        let _ = writeln!(
            output,
            "instances:         {}/{}",
            app.running_instances(),
            expected
        );
        let _ = writeln!(
            output,
            "usage:             {} x {} instances",
            app.memory_mb
                .map_or_else(|| String::from("?"), |mb| format!("{mb}M")),
            expected
        );
        let _ = writeln!(output, "routes:            {}", routes.join(", "));
        let _ = writeln!(
            output,
            "stack:             {}",
            app.stack.as_deref().unwrap_or("")
        );
        let _ = writeln!(output, "buildpacks:        {}", app.buildpacks.join(", "));
        if let Some(image) = &app.docker_image {
            let _ = writeln!(output, "docker image:      {image}");
        }
        let _ = writeln!(
            output,
            "start command:     {}",
            app.command.as_deref().unwrap_or("")
        );

        if !app.instance_stats.is_empty() {
            output.push('\n');
            output.push_str(&Self::format_instances(&app.instance_stats));
            output.push('\n');
        }

        output
    }

    /// Formats an instance table.
    #[must_use]
    pub fn format_instances(instances: &[InstanceSnapshot]) -> String {
        let now = Utc::now();
        let rows: Vec<InstanceRow> = instances
            .iter()
            .map(|i| {
                let since = now
                    - chrono::Duration::seconds(i64::try_from(i.since_secs).unwrap_or(i64::MAX));
                InstanceRow {
                    index: format!("#{}", i.index),
                    state: Self::format_instance_state(i.state),
                    since: since.format("%Y-%m-%d %H:%M:%S").to_string(),
                    cpu: format!("{:.1}%", i.cpu * 100.0),
                    memory: format!(
                        "{} of {}",
                        Self::format_bytes(i.memory_bytes),
                        Self::format_bytes(i.memory_quota_bytes)
                    ),
                    disk: format!(
                        "{} of {}",
                        Self::format_bytes(i.disk_bytes),
                        Self::format_bytes(i.disk_quota_bytes)
                    ),
                    details: i.details.clone().unwrap_or_default(),
                }
            })
            .collect();

        Table::new(rows).to_string()
    }

    /// Formats a polling status with color.
    fn format_status(status: &PollStatus) -> String {
        match status {
            PollStatus::Running => format!("{} Application is running", "✓".green()),
            PollStatus::Crashed => format!("{} Application crashed", "✗".red()),
            PollStatus::StagingFailed { reason } => {
                format!("{} Staging failed: {reason}", "✗".red())
            }
            PollStatus::TimedOut { phase } => format!(
                "{} Timed out while {phase}; the push was submitted, check the application status later",
                "⚠".yellow()
            ),
            PollStatus::Cancelled => format!("{} Cancelled", "⚠".yellow()),
        }
    }

    /// Formats a change kind with color.
    fn format_change_kind(change: &Change) -> String {
        let kind = change.kind();
        match change {
            Change::CreateApplication { .. } | Change::CreateRoute { .. } => {
                format!("+{kind}").green().to_string()
            }
            Change::UpdateApplication { .. } | Change::UploadPackage { .. } => {
                format!("~{kind}").yellow().to_string()
            }
            Change::UnmapRoute { .. } => format!("-{kind}").red().to_string(),
            Change::BindRoute { .. }
            | Change::StartApplication
            | Change::RestartApplication => kind.cyan().to_string(),
        }
    }

    /// Formats an instance state with color.
    fn format_instance_state(state: InstanceState) -> String {
        let text = state.to_string();
        match state {
            InstanceState::Running => text.green().to_string(),
            InstanceState::Starting => text.yellow().to_string(),
            InstanceState::Crashed | InstanceState::Down => text.red().to_string(),
            InstanceState::Unknown => text.dimmed().to_string(),
        }
    }

    /// Formats a byte count with a binary unit suffix.
    fn format_bytes(bytes: u64) -> String {
        const UNITS: [&str; 4] = ["B", "K", "M", "G"];
        let mut value = bytes as f64;
        let mut unit = 0;
        while value >= 1024.0 && unit < UNITS.len() - 1 {
            value /= 1024.0;
            unit += 1;
        }
        if unit == 0 {
            format!("{bytes}{}", UNITS[0])
        } else {
            format!("{value:.1}{}", UNITS[unit])
        }
    }

    /// Truncates a string to a maximum length.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }

    /// Formats an error message.
    #[must_use]
    pub fn format_error(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": "error", "message": message });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => format!("{} {message}", "✗".red()),
        }
    }
}
