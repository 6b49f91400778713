//! Polling an application until it settles.
//!
//! The poller first waits for staging to finish, then watches instances
//! until they are all running, a majority crashed, or the timeout elapses.
//! The interval is fixed: the user is waiting interactively and a bounded
//! total duration matters more than backing off.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::events::EventSender;

use super::api::PlatformApi;
use super::types::{AppState, InstanceSnapshot, InstanceState, PackageState};

/// Default time to wait for an application to settle.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Tunables for polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between polls.
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

/// Phase the poller last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollPhase {
    /// The build has not finished.
    Staging,
    /// Staged, no instance running yet.
    Starting,
    /// Some but not all expected instances are running.
    PartiallyRunning,
}

/// Terminal outcome of polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PollStatus {
    /// Every expected instance is running.
    Running,
    /// All or a majority of instances crashed.
    Crashed,
    /// The build failed; instances were not polled.
    StagingFailed {
        /// Failure reason reported by the platform.
        reason: String,
    },
    /// The timeout elapsed first. The push may still succeed later.
    TimedOut {
        /// Last observed phase.
        phase: PollPhase,
    },
    /// Polling was cancelled.
    Cancelled,
}

impl PollStatus {
    /// Returns true for outcomes that should fail the command.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Crashed | Self::StagingFailed { .. })
    }
}

/// Polls an application's staging and instance state.
#[derive(Debug)]
pub struct Poller<'a, A: PlatformApi + ?Sized> {
    /// Platform API.
    api: &'a A,
    /// Tunables.
    config: PollConfig,
}

impl<'a, A: PlatformApi + ?Sized> Poller<'a, A> {
    /// Creates a new poller with the default interval.
    #[must_use]
    pub fn new(api: &'a A) -> Self {
        Self {
            api,
            config: PollConfig::default(),
        }
    }

    /// Sets the tunables.
    #[must_use]
    pub const fn with_config(mut self, config: PollConfig) -> Self {
        self.config = config;
        self
    }

    /// Polls until the application reaches a terminal state.
    ///
    /// Each instance poll publishes the full instance set as a snapshot.
    /// Timeouts and staging failures are statuses, not errors.
    ///
    /// # Errors
    ///
    /// Returns an error if a platform call fails.
    pub async fn poll(
        &self,
        app_guid: &str,
        timeout: Duration,
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> Result<PollStatus> {
        info!("Waiting up to {:?} for application {} to start", timeout, app_guid);

        let deadline = Instant::now() + timeout;
        let mut phase = PollPhase::Staging;
        let mut expected: Option<u32> = None;

        loop {
            let observed = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(PollStatus::Cancelled),
                observed = self.observe(app_guid, phase, expected, events) => observed?,
            };

            match observed {
                Observation::Settled(status) => return Ok(status),
                Observation::Staged(instances) => {
                    debug!("Application {} staged", app_guid);
                    expected = instances;
                    phase = PollPhase::Starting;
                    continue;
                }
                Observation::Pending(next) => phase = next,
            }

            let now = Instant::now();
            if now >= deadline {
                warn!("Timed out waiting for application {} ({:?})", app_guid, phase);
                return Ok(PollStatus::TimedOut { phase });
            }

            let wake = (now + self.config.interval).min(deadline);
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(PollStatus::Cancelled),
                () = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    async fn observe(
        &self,
        app_guid: &str,
        phase: PollPhase,
        expected: Option<u32>,
        events: &EventSender,
    ) -> Result<Observation> {
        if phase == PollPhase::Staging {
            let app = self.api.get_application(app_guid).await?;
            events.warnings(app.warnings).await;
            let app = app.value;

            if app.package_state == Some(PackageState::Failed) {
                return Ok(Observation::Settled(PollStatus::StagingFailed {
                    reason: app
                        .staging_failed_reason
                        .unwrap_or_else(|| String::from("unknown staging error")),
                }));
            }

            let staging = app.state == AppState::Staging
                || app.package_state == Some(PackageState::Pending);
            return Ok(if staging {
                Observation::Pending(PollPhase::Staging)
            } else {
                Observation::Staged(app.instances)
            });
        }

        let stats = self.api.get_instance_stats(app_guid).await?;
        events.warnings(stats.warnings).await;
        let evaluation = evaluate(&stats.value, expected);
        events.publish_snapshot(stats.value);

        Ok(evaluation)
    }
}

enum Observation {
    Settled(PollStatus),
    Staged(Option<u32>),
    Pending(PollPhase),
}

/// Classifies one instance snapshot.
fn evaluate(instances: &[InstanceSnapshot], expected: Option<u32>) -> Observation {
    let expected = match expected {
        Some(n) => usize::try_from(n).unwrap_or(usize::MAX),
        None if instances.is_empty() => return Observation::Pending(PollPhase::Starting),
        None => instances.len(),
    };
    if expected == 0 {
        return Observation::Settled(PollStatus::Running);
    }

    let running = count(instances, InstanceState::Running);
    let crashed = count(instances, InstanceState::Crashed);
    let total = instances.len().max(expected);

    debug!("{running} of {expected} instances running, {crashed} crashed");

    if running >= expected {
        Observation::Settled(PollStatus::Running)
    } else if crashed > 0 && crashed * 2 > total {
        Observation::Settled(PollStatus::Crashed)
    } else if running > 0 {
        Observation::Pending(PollPhase::PartiallyRunning)
    } else {
        Observation::Pending(PollPhase::Starting)
    }
}

fn count(instances: &[InstanceSnapshot], state: InstanceState) -> usize {
    instances.iter().filter(|i| i.state == state).count()
}

impl fmt::Display for PollPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Staging => "staging",
            Self::Starting => "starting",
            Self::PartiallyRunning => "partially running",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for PollStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Crashed => write!(f, "crashed"),
            Self::StagingFailed { reason } => write!(f, "staging failed: {reason}"),
            Self::TimedOut { phase } => write!(f, "timed out while {phase}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}
