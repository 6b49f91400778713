//! In-memory platform used by the integration tests.
//!
//! `FakePlatform` keeps applications, routes and bindings in memory and
//! behaves like the real platform closely enough for the pipeline to reach
//! a fixed point against it.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use pushdeck::bits::BitsArchive;
use pushdeck::config::{CommandLineSettings, RouteSpec};
use pushdeck::error::{PlatformError, PushError, Result};
use pushdeck::platform::{
    ActualApplication, AppFields, AppState, InstanceSnapshot, InstanceState, PackageState,
    PlatformApi, ProgressFn, Route, Warned,
};

/// How the instances of an application behave once started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceBehavior {
    /// Starting until the delay has passed since the last start, then running.
    RunsAfter(Duration),
    /// Crashed as soon as started.
    Crashes,
    /// Starting forever.
    NeverStarts,
}

#[derive(Debug, Default)]
struct Inner {
    apps: BTreeMap<String, ActualApplication>,
    started_at: HashMap<String, Instant>,
    routes: BTreeMap<RouteSpec, String>,
    bindings: BTreeSet<(String, String)>,
    behaviors: HashMap<u32, InstanceBehavior>,
    warnings: HashMap<String, Vec<String>>,
    cancel_on: HashMap<String, CancellationToken>,
    calls: Vec<String>,
    upload_failures: u32,
    upload_attempts: u32,
    staging_failure: Option<String>,
    next_id: u32,
}

impl Inner {
    fn next_guid(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn record(&mut self, op: &str) -> Vec<String> {
        self.calls.push(op.to_string());
        if let Some(token) = self.cancel_on.get(op) {
            token.cancel();
        }
        self.warnings.get(op).cloned().unwrap_or_default()
    }

    fn app_mut(&mut self, guid: &str) -> Result<&mut ActualApplication> {
        self.apps.get_mut(guid).ok_or_else(|| not_found("Application", guid))
    }

    fn start(&mut self, guid: &str) -> Result<()> {
        let failure = self.staging_failure.clone();
        let app = self.app_mut(guid)?;
        app.state = AppState::Started;
        match failure {
            Some(reason) => {
                app.package_state = Some(PackageState::Failed);
                app.staging_failed_reason = Some(reason);
            }
            None => {
                app.package_state = Some(PackageState::Staged);
                app.staging_failed_reason = None;
            }
        }
        self.started_at.insert(guid.to_string(), Instant::now());
        Ok(())
    }

    fn bound_routes(&self, app_guid: &str) -> Vec<Route> {
        self.routes
            .iter()
            .filter(|(_, guid)| {
                self.bindings
                    .contains(&(app_guid.to_string(), (*guid).clone()))
            })
            .map(|(spec, guid)| route(spec, guid))
            .collect()
    }

    fn instance_stats(&self, app_guid: &str) -> Vec<InstanceSnapshot> {
        let Some(app) = self.apps.get(app_guid) else {
            return Vec::new();
        };
        let count = app.instances.unwrap_or(1);
        let started = self
            .started_at
            .get(app_guid)
            .filter(|_| app.state == AppState::Started);

        (0..count)
            .map(|index| {
                let state = match started {
                    None => InstanceState::Down,
                    Some(at) => match self
                        .behaviors
                        .get(&index)
                        .copied()
                        .unwrap_or(InstanceBehavior::RunsAfter(Duration::ZERO))
                    {
                        InstanceBehavior::RunsAfter(delay) if at.elapsed() >= delay => {
                            InstanceState::Running
                        }
                        InstanceBehavior::RunsAfter(_) | InstanceBehavior::NeverStarts => {
                            InstanceState::Starting
                        }
                        InstanceBehavior::Crashes => InstanceState::Crashed,
                    },
                };
                InstanceSnapshot {
                    index,
                    state,
                    memory_quota_bytes: app.memory_mb.unwrap_or(0) * 1024 * 1024,
                    disk_quota_bytes: app.disk_mb.unwrap_or(0) * 1024 * 1024,
                    ..InstanceSnapshot::default()
                }
            })
            .collect()
    }
}

/// A stateful in-memory platform.
#[derive(Debug, Default)]
pub struct FakePlatform {
    inner: Mutex<Inner>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    /// Attaches a warning to every response of an operation.
    pub fn warn_on(&self, op: &str, warning: &str) {
        self.lock()
            .warnings
            .entry(op.to_string())
            .or_default()
            .push(warning.to_string());
    }

    /// Cancels `token` while serving an operation.
    pub fn cancel_on(&self, op: &str, token: &CancellationToken) {
        self.lock().cancel_on.insert(op.to_string(), token.clone());
    }

    /// Makes the next `n` uploads fail with a transport error.
    pub fn fail_uploads(&self, n: u32) {
        self.lock().upload_failures = n;
    }

    /// Makes staging fail with the given reason.
    pub fn fail_staging(&self, reason: &str) {
        self.lock().staging_failure = Some(reason.to_string());
    }

    /// Sets the behavior of one instance index.
    pub fn set_behavior(&self, index: u32, behavior: InstanceBehavior) {
        self.lock().behaviors.insert(index, behavior);
    }

    /// Creates a route that exists independently of any application.
    pub fn add_route(&self, spec: RouteSpec) -> String {
        let mut inner = self.lock();
        let guid = inner.next_guid("route");
        inner.routes.insert(spec, guid.clone());
        guid
    }

    /// Inserts an existing application, returning its GUID.
    pub fn add_application(&self, mut app: ActualApplication) -> String {
        let mut inner = self.lock();
        let guid = inner.next_guid("app");
        app.guid.clone_from(&guid);
        if app.state == AppState::Started {
            inner.started_at.insert(guid.clone(), Instant::now());
        }
        inner.apps.insert(guid.clone(), app);
        guid
    }

    /// Returns the application with the given name.
    pub fn application(&self, name: &str) -> Option<ActualApplication> {
        self.lock().apps.values().find(|a| a.name == name).cloned()
    }

    /// Returns the operations called so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Returns the operations that change platform state.
    pub fn mutating_calls(&self) -> Vec<String> {
        const READS: &[&str] = &[
            "get_application_by_name",
            "get_application",
            "get_application_routes",
            "find_route",
            "get_instance_stats",
        ];
        self.calls()
            .into_iter()
            .filter(|c| !READS.contains(&c.as_str()))
            .collect()
    }

    /// Returns how many uploads were attempted.
    pub fn upload_attempts(&self) -> u32 {
        self.lock().upload_attempts
    }

    /// Returns the number of routes that exist.
    pub fn route_count(&self) -> usize {
        self.lock().routes.len()
    }

    /// Clears the call log.
    pub fn reset_calls(&self) {
        self.lock().calls.clear();
    }
}

#[async_trait]
impl PlatformApi for FakePlatform {
    async fn get_application_by_name(
        &self,
        _space: &str,
        name: &str,
    ) -> Result<Warned<Option<ActualApplication>>> {
        let mut inner = self.lock();
        let warnings = inner.record("get_application_by_name");
        let app = inner.apps.values().find(|a| a.name == name).cloned();
        Ok(Warned::with_warnings(app, warnings))
    }

    async fn get_application(&self, guid: &str) -> Result<Warned<ActualApplication>> {
        let mut inner = self.lock();
        let warnings = inner.record("get_application");
        let app = inner.app_mut(guid)?.clone();
        Ok(Warned::with_warnings(app, warnings))
    }

    async fn get_application_routes(&self, guid: &str) -> Result<Warned<Vec<Route>>> {
        let mut inner = self.lock();
        let warnings = inner.record("get_application_routes");
        Ok(Warned::with_warnings(inner.bound_routes(guid), warnings))
    }

    async fn find_route(&self, spec: &RouteSpec) -> Result<Warned<Option<Route>>> {
        let mut inner = self.lock();
        let warnings = inner.record("find_route");
        let found = inner.routes.get(spec).map(|guid| route(spec, guid));
        Ok(Warned::with_warnings(found, warnings))
    }

    async fn create_application(
        &self,
        _space: &str,
        fields: &AppFields,
    ) -> Result<Warned<ActualApplication>> {
        let mut inner = self.lock();
        let warnings = inner.record("create_application");
        if inner.apps.values().any(|a| a.name == fields.name) {
            return Err(PlatformError::rejected(422, "The app name is taken").into());
        }

        let guid = inner.next_guid("app");
        let mut app = ActualApplication {
            guid: guid.clone(),
            name: fields.name.clone(),
            instances: Some(1),
            ..ActualApplication::default()
        };
        apply_fields(&mut app, fields);
        inner.apps.insert(guid, app.clone());
        Ok(Warned::with_warnings(app, warnings))
    }

    async fn update_application(
        &self,
        guid: &str,
        fields: &AppFields,
    ) -> Result<Warned<ActualApplication>> {
        let mut inner = self.lock();
        let warnings = inner.record("update_application");
        let app = inner.app_mut(guid)?;
        apply_fields(app, fields);
        Ok(Warned::with_warnings(app.clone(), warnings))
    }

    async fn create_route(&self, _space: &str, spec: &RouteSpec) -> Result<Warned<Route>> {
        let mut inner = self.lock();
        let warnings = inner.record("create_route");
        if inner.routes.contains_key(spec) {
            return Err(PlatformError::rejected(422, "The route is taken").into());
        }
        let guid = inner.next_guid("route");
        inner.routes.insert(spec.clone(), guid.clone());
        Ok(Warned::with_warnings(route(spec, &guid), warnings))
    }

    async fn bind_route(&self, app_guid: &str, route_guid: &str) -> Result<Warned<()>> {
        let mut inner = self.lock();
        let warnings = inner.record("bind_route");
        inner.app_mut(app_guid)?;
        if !inner.routes.values().any(|g| g == route_guid) {
            return Err(not_found("Route", route_guid));
        }
        inner
            .bindings
            .insert((app_guid.to_string(), route_guid.to_string()));
        Ok(Warned::with_warnings((), warnings))
    }

    async fn unmap_route(&self, app_guid: &str, route_guid: &str) -> Result<Warned<()>> {
        let mut inner = self.lock();
        let warnings = inner.record("unmap_route");
        inner
            .bindings
            .remove(&(app_guid.to_string(), route_guid.to_string()));
        Ok(Warned::with_warnings((), warnings))
    }

    async fn upload_package(
        &self,
        app_guid: &str,
        archive: &BitsArchive,
        progress: ProgressFn,
    ) -> Result<Warned<()>> {
        let warnings = {
            let mut inner = self.lock();
            let warnings = inner.record("upload_package");
            inner.upload_attempts += 1;
            if inner.upload_failures > 0 {
                inner.upload_failures -= 1;
                return Err(PlatformError::transport("connection reset by peer").into());
            }
            let app = inner.app_mut(app_guid)?;
            app.package_digest = Some(archive.digest().to_string());
            app.package_state = Some(PackageState::Pending);
            warnings
        };

        progress(archive.size(), archive.size());
        Ok(Warned::with_warnings((), warnings))
    }

    async fn start_application(&self, guid: &str) -> Result<Warned<()>> {
        let mut inner = self.lock();
        let warnings = inner.record("start_application");
        inner.start(guid)?;
        Ok(Warned::with_warnings((), warnings))
    }

    async fn restart_application(&self, guid: &str) -> Result<Warned<()>> {
        let mut inner = self.lock();
        let warnings = inner.record("restart_application");
        inner.start(guid)?;
        Ok(Warned::with_warnings((), warnings))
    }

    async fn get_instance_stats(&self, guid: &str) -> Result<Warned<Vec<InstanceSnapshot>>> {
        let mut inner = self.lock();
        let warnings = inner.record("get_instance_stats");
        Ok(Warned::with_warnings(inner.instance_stats(guid), warnings))
    }
}

fn apply_fields(app: &mut ActualApplication, fields: &AppFields) {
    app.name.clone_from(&fields.name);
    if let Some(memory) = fields.memory_mb {
        app.memory_mb = Some(memory);
    }
    if let Some(disk) = fields.disk_mb {
        app.disk_mb = Some(disk);
    }
    if let Some(instances) = fields.instances {
        app.instances = Some(instances);
    }
    if let Some(buildpacks) = &fields.buildpacks {
        app.buildpacks.clone_from(buildpacks);
    }
    if let Some(command) = &fields.command {
        app.command = Some(command.clone());
    }
    if let Some(check) = fields.health_check_type {
        app.health_check_type = Some(check);
    }
    if let Some(timeout) = fields.health_check_timeout {
        app.health_check_timeout = Some(timeout);
    }
    if let Some(stack) = &fields.stack {
        app.stack = Some(stack.clone());
    }
    if let Some(image) = &fields.docker_image {
        app.docker_image = Some(image.clone());
    }
    if let Some(username) = fields.docker_username() {
        app.docker_username = Some(username.to_string());
    }
}

fn route(spec: &RouteSpec, guid: &str) -> Route {
    Route {
        guid: guid.to_string(),
        host: spec.host.clone(),
        domain: spec.domain.clone(),
        path: spec.path.clone(),
    }
}

fn not_found(resource: &str, guid: &str) -> PushError {
    PlatformError::NotFound {
        resource: resource.to_string(),
        guid: guid.to_string(),
    }
    .into()
}

/// Writes a small application into `dir`.
pub fn write_app(dir: &Path) {
    std::fs::write(dir.join("index.html"), "<h1>hello</h1>").unwrap();
    std::fs::write(dir.join("Procfile"), "web: ./serve").unwrap();
}

/// Command-line settings pushing `name` from `dir`.
pub fn settings(name: &str, dir: &Path) -> CommandLineSettings {
    CommandLineSettings {
        name: name.to_string(),
        current_directory: dir.to_path_buf(),
        ..CommandLineSettings::default()
    }
}
