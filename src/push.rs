//! The push pipeline.
//!
//! One push runs merge, validation, state reading, planning, execution and
//! polling in sequence on a spawned task, under the application's push lock.
//! The caller gets a [`PushHandle`]: the event stream plus the final outcome.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bits::BitsArchive;
use crate::config::{
    ApplicationValidator, CommandLineSettings, DesiredApplication, ManifestApplication,
};
use crate::error::{PushError, Result};
use crate::events::{self, DEFAULT_EVENT_BUFFER, EventSender, EventStream, ExecutionEvent};
use crate::planner::{ExecutionContext, ExecutionReport, Executor, ExecutorConfig, Plan, Planner};
use crate::platform::{
    ActualApplication, DEFAULT_WAIT_TIMEOUT, PlatformApi, PollConfig, PollStatus, Poller,
    RouteCatalog, StateReader, Warned,
};
use crate::state::{
    LOCK_EXPIRY_SECS, PushHistoryEntry, PushRecord, RecordStore, generate_holder_id,
};

/// Tunables for one push.
#[derive(Debug, Clone)]
pub struct PushOptions {
    /// Whether to poll the application after starting it.
    pub wait: bool,
    /// How long polling may take.
    pub wait_timeout: Duration,
    /// Executor tunables.
    pub executor: ExecutorConfig,
    /// Poller tunables.
    pub poll: PollConfig,
    /// Capacity of the event channel.
    pub event_buffer: usize,
    /// Identifier written into the push lock.
    pub holder: String,
    /// How often the push lock is refreshed while the push runs.
    pub lock_refresh: Duration,
}

/// Default lock refresh period, a third of the lock lifetime.
pub const DEFAULT_LOCK_REFRESH: Duration = Duration::from_secs(LOCK_EXPIRY_SECS.unsigned_abs() / 3);

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            wait: true,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            executor: ExecutorConfig::default(),
            poll: PollConfig::default(),
            event_buffer: DEFAULT_EVENT_BUFFER,
            holder: generate_holder_id(),
            lock_refresh: DEFAULT_LOCK_REFRESH,
        }
    }
}

impl PushOptions {
    /// Sets the polling timeout.
    #[must_use]
    pub const fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Skips polling after the start.
    #[must_use]
    pub const fn without_wait(mut self) -> Self {
        self.wait = false;
        self
    }

    /// Sets the executor tunables.
    #[must_use]
    pub const fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }

    /// Sets the poller tunables.
    #[must_use]
    pub const fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }
}

/// What a finished push did.
#[derive(Debug, Serialize)]
pub struct PushOutcome {
    /// The plan that was computed.
    pub plan: Plan,
    /// Execution report; `None` when the plan was empty.
    pub report: Option<ExecutionReport>,
    /// Polling outcome; `None` when the application was not polled.
    pub status: Option<PollStatus>,
    /// The application as the platform reports it after the push.
    pub application: Option<ActualApplication>,
}

impl PushOutcome {
    /// Returns true unless polling ended in a failure status.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.status.as_ref().is_some_and(PollStatus::is_failure)
    }
}

/// A running push.
#[derive(Debug)]
pub struct PushHandle {
    events: EventStream,
    outcome: JoinHandle<Result<PushOutcome>>,
}

impl PushHandle {
    /// Returns the event stream.
    ///
    /// The stream ends when the push finishes. A consumer that stops reading
    /// applies backpressure to the push.
    pub fn events(&mut self) -> &mut EventStream {
        &mut self.events
    }

    /// Waits for the outcome, discarding unread events.
    ///
    /// # Errors
    ///
    /// Returns the terminal error of the push.
    pub async fn outcome(self) -> Result<PushOutcome> {
        drop(self.events);
        joined(self.outcome.await)
    }

    /// Collects every event and waits for the outcome.
    pub async fn finish(self) -> (Vec<ExecutionEvent>, Result<PushOutcome>) {
        let (events, outcome) = tokio::join!(self.events.collect(), self.outcome);
        (events, joined(outcome))
    }
}

fn joined<T>(result: std::result::Result<Result<T>, JoinError>) -> Result<T> {
    result.map_err(|e| PushError::internal(format!("Push task failed: {e}")))?
}

/// Everything known before execution.
struct Prepared {
    desired: DesiredApplication,
    archive: Option<Arc<BitsArchive>>,
    actual: Option<ActualApplication>,
    catalog: RouteCatalog,
    record: Option<PushRecord>,
    plan: Plan,
}

/// Pushes applications into one space.
pub struct PushPipeline<A: ?Sized, S: ?Sized> {
    api: Arc<A>,
    store: Arc<S>,
    space: String,
    options: PushOptions,
}

impl<A: ?Sized, S: ?Sized> Clone for PushPipeline<A, S> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            store: Arc::clone(&self.store),
            space: self.space.clone(),
            options: self.options.clone(),
        }
    }
}

impl<A, S> PushPipeline<A, S>
where
    A: PlatformApi + ?Sized + 'static,
    S: RecordStore + ?Sized + 'static,
{
    /// Creates a pipeline for a space.
    #[must_use]
    pub fn new(api: Arc<A>, store: Arc<S>, space: impl Into<String>) -> Self {
        Self {
            api,
            store,
            space: space.into(),
            options: PushOptions::default(),
        }
    }

    /// Sets the push tunables.
    #[must_use]
    pub fn with_options(mut self, options: PushOptions) -> Self {
        self.options = options;
        self
    }

    /// Starts a push on a new task.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn push(
        &self,
        settings: CommandLineSettings,
        manifest: Option<ManifestApplication>,
        cancel: CancellationToken,
    ) -> PushHandle {
        let (sender, events) = events::channel(self.options.event_buffer);
        let pipeline = self.clone();
        let outcome =
            tokio::spawn(async move { pipeline.run(settings, manifest, sender, cancel).await });

        PushHandle { events, outcome }
    }

    /// Computes the plan a push would execute, without changing anything.
    ///
    /// # Errors
    ///
    /// Returns an error if validation, the archive build or a platform read
    /// fails.
    pub async fn plan(
        &self,
        settings: &CommandLineSettings,
        manifest: Option<ManifestApplication>,
    ) -> Result<Warned<Plan>> {
        let desired = desired_application(settings, manifest)?;
        let mut warnings = desired.warnings;
        let prepared = self.prepare(desired.value).await?;
        warnings.extend(prepared.warnings);
        Ok(Warned::with_warnings(prepared.value.plan, warnings))
    }

    async fn run(
        self,
        settings: CommandLineSettings,
        manifest: Option<ManifestApplication>,
        events: EventSender,
        cancel: CancellationToken,
    ) -> Result<PushOutcome> {
        debug!("Push settings: {}", settings);
        let desired = desired_application(&settings, manifest)?;
        events.warnings(desired.warnings).await;
        let desired = desired.value;
        let name = desired.name.clone();

        let lock = self
            .store
            .acquire_lock(&self.space, &name, &self.options.holder)
            .await?;

        let keep_alive = CancellationToken::new();
        let refresher = tokio::spawn(keep_lock_alive(
            Arc::clone(&self.store),
            self.space.clone(),
            name.clone(),
            lock.lock_id.clone(),
            self.options.lock_refresh,
            keep_alive.clone(),
        ));

        let result = self.run_locked(desired, &events, &cancel).await;

        keep_alive.cancel();
        if let Err(e) = refresher.await {
            warn!("Push lock refresher for '{}' failed: {}", name, e);
        }

        if let Err(e) = self
            .store
            .release_lock(&self.space, &name, &lock.lock_id)
            .await
        {
            warn!("Failed to release push lock for '{}': {}", name, e);
        }

        result
    }

    async fn run_locked(
        &self,
        desired: DesiredApplication,
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> Result<PushOutcome> {
        let prepared = self.prepare(desired).await?;
        events.warnings(prepared.warnings).await;
        let Prepared {
            desired,
            archive,
            actual,
            catalog,
            record,
            plan,
        } = prepared.value;

        debug!("{}", plan);

        if plan.is_empty() {
            info!("Application '{}' is up to date", desired.name);
            return Ok(PushOutcome {
                plan,
                report: None,
                status: None,
                application: actual,
            });
        }

        let mut context = ExecutionContext::new(self.space.clone()).with_routes(catalog);
        if let Some(app) = &actual {
            context = context.with_app_guid(app.guid.clone());
        }
        if let Some(archive) = &archive {
            context = context.with_archive(Arc::clone(archive));
        }

        let executed = Executor::new(&*self.api)
            .with_config(self.options.executor)
            .execute(&plan, context, events, cancel)
            .await;

        let mut record = record.unwrap_or_else(|| PushRecord::new(&self.space, &desired.name));
        let kinds: Vec<String> = plan.changes.iter().map(|c| c.kind().to_string()).collect();

        let report = match executed {
            Ok(report) => report,
            Err(e) => {
                let entry = PushHistoryEntry::new(kinds, desired.bits_digest.clone());
                record.add_history(entry.failed(e.to_string()));
                if let Err(save_err) = self.store.save(&record).await {
                    warn!("Failed to save push record for '{}': {}", desired.name, save_err);
                }
                return Err(e);
            }
        };

        record.app_guid.clone_from(&report.app_guid);
        if plan.uploads_bits() {
            record.bits_digest.clone_from(&desired.bits_digest);
        }
        record.add_history(PushHistoryEntry::new(kinds, desired.bits_digest.clone()));
        self.store.save(&record).await?;

        let status = match &report.app_guid {
            Some(guid) if self.options.wait && plan.starts_application() => Some(
                Poller::new(&*self.api)
                    .with_config(self.options.poll)
                    .poll(guid, self.options.wait_timeout, events, cancel)
                    .await?,
            ),
            _ => None,
        };

        let application = if cancel.is_cancelled() {
            None
        } else {
            let refreshed = StateReader::new(&*self.api)
                .fetch(&desired.name, &self.space)
                .await?;
            events.warnings(refreshed.warnings).await;
            refreshed.value
        };

        if let Some(status) = &status {
            info!("Application '{}' {}", desired.name, status);
        }

        Ok(PushOutcome {
            plan,
            report: Some(report),
            status,
            application,
        })
    }

    /// Builds the archive, reads actual state and plans.
    async fn prepare(&self, mut desired: DesiredApplication) -> Result<Warned<Prepared>> {
        let archive = match desired.bits_path().cloned() {
            Some(path) => {
                let archive = tokio::task::spawn_blocking(move || BitsArchive::build(path))
                    .await
                    .map_err(|e| PushError::internal(format!("Archive task failed: {e}")))??;
                desired.bits_digest = Some(archive.digest().to_string());
                Some(Arc::new(archive))
            }
            None => None,
        };

        let reader = StateReader::new(&*self.api);
        let fetched = reader.fetch(&desired.name, &self.space).await?;
        let mut warnings = fetched.warnings;
        let mut actual = fetched.value;

        let record = self.store.load(&self.space, &desired.name).await?;
        if let (Some(app), Some(record)) = (actual.as_mut(), record.as_ref()) {
            if app.package_digest.is_none() && record.app_guid.as_deref() == Some(&app.guid) {
                debug!("Using recorded bits digest for '{}'", app.name);
                app.package_digest.clone_from(&record.bits_digest);
            }
        }

        let catalog = reader.fetch_route_catalog(&desired.routes).await?;
        warnings.extend(catalog.warnings);

        let plan = Planner::new().plan(&desired, actual.as_ref(), &catalog.value);

        Ok(Warned::with_warnings(
            Prepared {
                desired,
                archive,
                actual,
                catalog: catalog.value,
                record,
                plan,
            },
            warnings,
        ))
    }
}

/// Refreshes a held push lock every `period` until `stop` fires.
async fn keep_lock_alive<S: RecordStore + ?Sized>(
    store: Arc<S>,
    space: String,
    app: String,
    lock_id: String,
    period: Duration,
    stop: CancellationToken,
) {
    let mut ticks = tokio::time::interval(period.max(Duration::from_millis(1)));
    ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticks.tick().await;

    loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => return,
            _ = ticks.tick() => {}
        }

        if let Err(e) = store.refresh_lock(&space, &app, &lock_id).await {
            warn!("Failed to refresh push lock for '{}': {}", app, e);
        }
    }
}

/// Merges and validates the desired application, keeping validation warnings.
fn desired_application(
    settings: &CommandLineSettings,
    manifest: Option<ManifestApplication>,
) -> Result<Warned<DesiredApplication>> {
    let desired = settings.merge(manifest);
    let validation = ApplicationValidator::new().validate(&desired)?;
    Ok(Warned::with_warnings(desired, validation.warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{LocalRecordStore, LockInfo};

    #[test]
    fn test_options_builders() {
        let options = PushOptions::default()
            .with_wait_timeout(Duration::from_secs(30))
            .without_wait();
        assert!(!options.wait);
        assert_eq!(options.wait_timeout, Duration::from_secs(30));
        assert_eq!(options.event_buffer, DEFAULT_EVENT_BUFFER);
        assert_eq!(options.lock_refresh, Duration::from_secs(100));
    }

    #[tokio::test]
    async fn test_lock_refreshed_until_stopped() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(LocalRecordStore::with_base_dir(temp_dir.path()));
        let lock_path = temp_dir.path().join("space").join("foo.lock");

        let mut lock = store.acquire_lock("space", "foo", "first").await.unwrap();
        lock.expires_at = chrono::Utc::now() + chrono::Duration::seconds(2);
        std::fs::write(&lock_path, serde_json::to_string(&lock).unwrap()).unwrap();

        let stop = CancellationToken::new();
        let refresher = tokio::spawn(keep_lock_alive(
            Arc::clone(&store),
            String::from("space"),
            String::from("foo"),
            lock.lock_id.clone(),
            Duration::from_millis(10),
            stop.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(100)).await;
        stop.cancel();
        refresher.await.unwrap();

        let on_disk: LockInfo =
            serde_json::from_str(&std::fs::read_to_string(&lock_path).unwrap()).unwrap();
        assert_eq!(on_disk.lock_id, lock.lock_id);
        assert!(on_disk.remaining_secs() > LOCK_EXPIRY_SECS - 5);
    }

    #[test]
    fn test_outcome_success() {
        let mut outcome = PushOutcome {
            plan: Plan::empty("foo"),
            report: None,
            status: None,
            application: None,
        };
        assert!(outcome.is_success());

        outcome.status = Some(PollStatus::TimedOut {
            phase: crate::platform::PollPhase::Starting,
        });
        assert!(outcome.is_success());

        outcome.status = Some(PollStatus::StagingFailed {
            reason: String::from("no buildpack"),
        });
        assert!(!outcome.is_success());
    }

    #[test]
    fn test_outcome_serializes() {
        let outcome = PushOutcome {
            plan: Plan::empty("foo"),
            report: Some(ExecutionReport::default()),
            status: Some(PollStatus::Running),
            application: None,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"]["status"], "running");
        assert_eq!(json["plan"]["application"], "foo");
    }
}
