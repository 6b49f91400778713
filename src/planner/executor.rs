//! Plan executor for applying push plans.
//!
//! Changes are applied strictly in plan order. A contiguous run of route
//! bindings is the one exception: those have no ordering dependency and go
//! through a small bounded pool. There is no rollback; a failed change leaves
//! everything before it in place.

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bits::BitsArchive;
use crate::config::RouteSpec;
use crate::error::{ExecutionError, PlatformError, PushError, Result};
use crate::events::EventSender;
use crate::platform::{PlatformApi, ProgressFn, RouteCatalog, Warned};

use super::plan::{Change, ChangeResult, Plan};

/// Tunables for plan execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Maximum route bindings in flight at once.
    pub bind_concurrency: usize,
    /// Upload attempts before giving up.
    pub upload_attempts: u32,
    /// Base delay between upload attempts, multiplied by the attempt number.
    pub upload_backoff: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            bind_concurrency: 4,
            upload_attempts: 3,
            upload_backoff: Duration::from_secs(1),
        }
    }
}

/// What the executor knows about the target while applying a plan.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// Space GUID new resources are created in.
    pub space: String,
    /// Application GUID, known up front or learned from the create result.
    pub app_guid: Option<String>,
    /// Route GUIDs, from the catalog and from created routes.
    pub routes: RouteCatalog,
    /// Bits to upload.
    pub archive: Option<Arc<BitsArchive>>,
}

impl ExecutionContext {
    /// Creates a context for a space.
    #[must_use]
    pub fn new(space: impl Into<String>) -> Self {
        Self {
            space: space.into(),
            ..Self::default()
        }
    }

    /// Sets the GUID of an existing application.
    #[must_use]
    pub fn with_app_guid(mut self, guid: impl Into<String>) -> Self {
        self.app_guid = Some(guid.into());
        self
    }

    /// Sets the known route GUIDs.
    #[must_use]
    pub fn with_routes(mut self, routes: RouteCatalog) -> Self {
        self.routes = routes;
        self
    }

    /// Sets the bits archive to upload.
    #[must_use]
    pub fn with_archive(mut self, archive: Arc<BitsArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    fn app_guid(&self) -> Result<&str> {
        self.app_guid.as_deref().ok_or_else(|| {
            PushError::Execution(ExecutionError::Unresolved {
                message: String::from("application GUID is not known yet"),
            })
        })
    }

    fn route_guid(&self, route: &RouteSpec) -> Result<String> {
        self.routes.guid(route).map(String::from).ok_or_else(|| {
            PushError::Execution(ExecutionError::Unresolved {
                message: format!("route {route} has no GUID"),
            })
        })
    }
}

/// A change that was applied, with its result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedChange {
    /// The change.
    pub change: Change,
    /// What the platform returned.
    pub result: ChangeResult,
}

/// Result of executing a plan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionReport {
    /// GUID of the application after execution.
    pub app_guid: Option<String>,
    /// Applied changes, in order.
    pub applied: Vec<AppliedChange>,
}

impl ExecutionReport {
    /// Returns the number of applied changes.
    #[must_use]
    pub const fn applied_count(&self) -> usize {
        self.applied.len()
    }

    /// Returns the upload attempts, if bits were uploaded.
    #[must_use]
    pub fn upload_attempts(&self) -> Option<u32> {
        self.applied.iter().find_map(|a| match a.result {
            ChangeResult::PackageUploaded { attempts, .. } => Some(attempts),
            _ => None,
        })
    }
}

/// Executor for push plans.
pub struct Executor<'a, A: PlatformApi + ?Sized> {
    /// Platform API.
    api: &'a A,
    /// Tunables.
    config: ExecutorConfig,
}

impl<A: PlatformApi + ?Sized> std::fmt::Debug for Executor<'_, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<'a, A: PlatformApi + ?Sized> Executor<'a, A> {
    /// Creates a new executor with default tunables.
    #[must_use]
    pub fn new(api: &'a A) -> Self {
        Self {
            api,
            config: ExecutorConfig::default(),
        }
    }

    /// Sets the tunables.
    #[must_use]
    pub const fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Executes a plan.
    ///
    /// Emits a `Changed` event after each applied change and forwards every
    /// platform warning. Cancellation is checked before each change; calls
    /// already in flight complete.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error. Changes after it are never started.
    pub async fn execute(
        &self,
        plan: &Plan,
        mut context: ExecutionContext,
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport> {
        info!(
            "Executing push plan for '{}' with {} changes",
            plan.application,
            plan.len()
        );

        let mut report = ExecutionReport::default();
        let changes = &plan.changes;
        let mut index = 0;

        while index < changes.len() {
            if cancel.is_cancelled() {
                return Err(cancelled(report.applied_count()));
            }

            if matches!(changes[index], Change::BindRoute { .. }) {
                let end = changes[index..]
                    .iter()
                    .position(|c| !matches!(c, Change::BindRoute { .. }))
                    .map_or(changes.len(), |offset| index + offset);

                let batch = &changes[index..end];
                self.bind_routes(plan, index, batch, &context, events, cancel, &mut report)
                    .await?;
                index = end;
                continue;
            }

            let change = &changes[index];
            debug!("Applying change {}: {}", index, change);

            let outcome = self.apply(change, &mut context, events, cancel).await;
            let warned = outcome.map_err(|e| match e {
                PushError::Execution(ExecutionError::Cancelled { .. }) => {
                    cancelled(report.applied_count())
                }
                e => change_failed(plan, index, change, e),
            })?;
            self.record(change, warned, events, &mut report).await;

            index += 1;
        }

        report.app_guid = context.app_guid;
        info!("Applied {} changes", report.applied_count());
        Ok(report)
    }

    /// Applies a single change other than a route binding.
    async fn apply(
        &self,
        change: &Change,
        context: &mut ExecutionContext,
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> Result<Warned<ChangeResult>> {
        match change {
            Change::CreateApplication { fields } => {
                let created = self.api.create_application(&context.space, fields).await?;
                let guid = created.value.guid.clone();
                info!("Created application '{}' ({})", fields.name, guid);
                context.app_guid = Some(guid.clone());
                Ok(created.map(|_| ChangeResult::ApplicationCreated { guid }))
            }
            Change::UpdateApplication { fields, .. } => {
                let guid = context.app_guid()?;
                let updated = self.api.update_application(guid, fields).await?;
                Ok(updated.map(|_| ChangeResult::ApplicationUpdated))
            }
            Change::CreateRoute { route } => {
                let created = self.api.create_route(&context.space, route).await?;
                let guid = created.value.guid.clone();
                context.routes.insert(route.clone(), guid.clone());
                Ok(created.map(|_| ChangeResult::RouteCreated { guid }))
            }
            Change::BindRoute { route } => {
                let route_guid = context.route_guid(route)?;
                let bound = self.api.bind_route(context.app_guid()?, &route_guid).await?;
                Ok(bound.map(|()| ChangeResult::RouteBound))
            }
            Change::UnmapRoute { route_guid, .. } => {
                let unmapped = self
                    .api
                    .unmap_route(context.app_guid()?, route_guid)
                    .await?;
                Ok(unmapped.map(|()| ChangeResult::RouteUnmapped))
            }
            Change::UploadPackage { .. } => {
                let archive = context.archive.clone().ok_or_else(|| {
                    PushError::Execution(ExecutionError::Unresolved {
                        message: String::from("no bits archive to upload"),
                    })
                })?;
                self.upload(context.app_guid()?, &archive, events, cancel)
                    .await
            }
            Change::StartApplication => {
                let started = self.api.start_application(context.app_guid()?).await?;
                Ok(started.map(|()| ChangeResult::ApplicationStarted))
            }
            Change::RestartApplication => {
                let restarted = self.api.restart_application(context.app_guid()?).await?;
                Ok(restarted.map(|()| ChangeResult::ApplicationRestarted))
            }
        }
    }

    /// Applies a run of route bindings through the bounded pool.
    ///
    /// No new binding starts once one has failed or the push is cancelled;
    /// bindings already in flight complete. Completed bindings are reported
    /// in plan order, then the earliest failure, if any, is returned.
    #[allow(clippy::too_many_arguments)]
    async fn bind_routes(
        &self,
        plan: &Plan,
        start: usize,
        batch: &[Change],
        context: &ExecutionContext,
        events: &EventSender,
        cancel: &CancellationToken,
        report: &mut ExecutionReport,
    ) -> Result<()> {
        debug!(
            "Binding {} routes with concurrency {}",
            batch.len(),
            self.config.bind_concurrency
        );

        let app_guid = context.app_guid()?;
        let mut queued = batch.iter().enumerate();
        let mut in_flight = FuturesUnordered::new();
        for (offset, change) in queued.by_ref().take(self.config.bind_concurrency.max(1)) {
            in_flight.push(self.bind_one(offset, change, context, app_guid));
        }

        let mut completed: Vec<Option<Warned<ChangeResult>>> =
            batch.iter().map(|_| None).collect();
        let mut first_error: Option<(usize, PushError)> = None;
        let mut started = in_flight.len();

        while let Some((offset, outcome)) = in_flight.next().await {
            match outcome {
                Ok(warned) => completed[offset] = Some(warned),
                Err(e) => {
                    warn!("Route binding {} failed: {}", start + offset, e);
                    if first_error.as_ref().is_none_or(|(first, _)| offset < *first) {
                        first_error = Some((offset, e));
                    }
                }
            }

            if first_error.is_some() || cancel.is_cancelled() {
                continue;
            }
            if let Some((offset, change)) = queued.next() {
                in_flight.push(self.bind_one(offset, change, context, app_guid));
                started += 1;
            }
        }

        for (change, warned) in batch.iter().zip(completed) {
            if let Some(warned) = warned {
                self.record(change, warned, events, report).await;
            }
        }

        match first_error {
            Some((offset, e)) => Err(change_failed(plan, start + offset, &batch[offset], e)),
            None if started < batch.len() => Err(cancelled(report.applied_count())),
            None => Ok(()),
        }
    }

    async fn bind_one(
        &self,
        offset: usize,
        change: &Change,
        context: &ExecutionContext,
        app_guid: &str,
    ) -> (usize, Result<Warned<ChangeResult>>) {
        let Change::BindRoute { route } = change else {
            return (offset, Err(PushError::internal("non-binding change in bind batch")));
        };
        let bound = match context.route_guid(route) {
            Ok(route_guid) => self.api.bind_route(app_guid, &route_guid).await,
            Err(e) => Err(e),
        };
        (offset, bound.map(|b| b.map(|()| ChangeResult::RouteBound)))
    }

    /// Streams the archive, retrying failed attempts with linear backoff.
    async fn upload(
        &self,
        app_guid: &str,
        archive: &BitsArchive,
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> Result<Warned<ChangeResult>> {
        let progress: ProgressFn = {
            let events = events.clone();
            Arc::new(move |sent, total| events.progress(sent, total))
        };

        let max_attempts = self.config.upload_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!("Upload attempt {attempt} of {max_attempts}");

            match self
                .api
                .upload_package(app_guid, archive, Arc::clone(&progress))
                .await
            {
                Ok(uploaded) => {
                    info!(
                        "Uploaded {} bytes in {} attempt(s)",
                        archive.size(),
                        attempt
                    );
                    return Ok(uploaded.map(|()| ChangeResult::PackageUploaded {
                        bytes: archive.size(),
                        attempts: attempt,
                    }));
                }
                Err(PushError::Platform(e @ PlatformError::AuthenticationFailed { .. })) => {
                    return Err(PushError::Platform(e));
                }
                Err(PushError::Platform(e)) => {
                    if attempt >= max_attempts {
                        return Err(PushError::Execution(ExecutionError::UploadFailed {
                            attempts: attempt,
                            source: e,
                        }));
                    }
                    warn!("Upload attempt {attempt} failed: {e}");
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => {
                            return Err(PushError::Execution(ExecutionError::Cancelled {
                                applied: 0,
                            }));
                        }
                        () = tokio::time::sleep(self.config.upload_backoff * attempt) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn record(
        &self,
        change: &Change,
        warned: Warned<ChangeResult>,
        events: &EventSender,
        report: &mut ExecutionReport,
    ) {
        events.warnings(warned.warnings).await;
        events.changed(change.clone(), warned.value.clone()).await;
        report.applied.push(AppliedChange {
            change: change.clone(),
            result: warned.value,
        });
    }
}

fn cancelled(applied: usize) -> PushError {
    warn!("Push cancelled after {applied} changes");
    PushError::Execution(ExecutionError::Cancelled { applied })
}

/// Wraps a platform failure with the change it happened on.
fn change_failed(plan: &Plan, index: usize, change: &Change, err: PushError) -> PushError {
    match err {
        PushError::Platform(source) => PushError::Execution(ExecutionError::ChangeFailed {
            index,
            change: change.description(&plan.application),
            source,
        }),
        other => other,
    }
}
