//! Platform API types and data structures.
//!
//! This module defines the platform-side view of an application and the
//! payloads exchanged with the platform API.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::{DesiredApplication, DockerCredentials, HealthCheckType, RouteSpec};

/// A value returned by the platform together with its warnings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Warned<T> {
    /// The returned value.
    pub value: T,
    /// Warnings attached to the response, verbatim.
    pub warnings: Vec<String>,
}

impl<T> Warned<T> {
    /// Wraps a value with no warnings.
    pub const fn new(value: T) -> Self {
        Self {
            value,
            warnings: Vec::new(),
        }
    }

    /// Wraps a value with warnings.
    pub const fn with_warnings(value: T, warnings: Vec<String>) -> Self {
        Self { value, warnings }
    }

    /// Maps the value, keeping the warnings.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Warned<U> {
        Warned {
            value: f(self.value),
            warnings: self.warnings,
        }
    }
}

/// Application fields sent on create and update.
///
/// On update only the fields that are `Some` (or non-empty) are changed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct AppFields {
    /// Application name.
    pub name: String,
    /// Memory quota in megabytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
    /// Disk quota in megabytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_mb: Option<u64>,
    /// Instance count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instances: Option<u32>,
    /// Buildpacks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buildpacks: Option<Vec<String>>,
    /// Start command.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Health check type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_type: Option<HealthCheckType>,
    /// Health check timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_timeout: Option<u32>,
    /// Stack.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Docker image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_image: Option<String>,
    /// Docker registry credentials.
    #[serde(skip)]
    pub docker_credentials: Option<DockerCredentials>,
}

impl AppFields {
    /// Builds the full field set of a desired application, for creation.
    #[must_use]
    pub fn from_desired(desired: &DesiredApplication) -> Self {
        Self {
            name: desired.name.clone(),
            memory_mb: desired.memory_mb,
            disk_mb: desired.disk_mb,
            instances: desired.instances,
            buildpacks: (!desired.buildpacks.is_empty()).then(|| desired.buildpacks.clone()),
            command: desired.command.clone(),
            health_check_type: desired.health_check_type,
            health_check_timeout: desired.health_check_timeout,
            stack: desired.stack.clone(),
            docker_image: desired.docker_image.clone(),
            docker_credentials: desired.docker_credentials.clone(),
        }
    }

    /// Returns the docker username, if any.
    #[must_use]
    pub fn docker_username(&self) -> Option<&str> {
        self.docker_credentials.as_ref().map(|c| c.username.as_str())
    }
}

/// Lifecycle state of an application.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppState {
    /// Not running.
    #[default]
    Stopped,
    /// Requested to run.
    Started,
    /// A build is in progress.
    Staging,
    /// Instances keep crashing.
    Crashed,
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Started => "started",
            Self::Staging => "staging",
            Self::Crashed => "crashed",
        };
        write!(f, "{s}")
    }
}

/// State of the application's current package.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PackageState {
    /// Uploaded, not yet staged.
    Pending,
    /// Staged into a droplet.
    Staged,
    /// Staging failed.
    Failed,
}

/// A route known to the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Route GUID.
    pub guid: String,
    /// Host label.
    pub host: String,
    /// Domain name.
    pub domain: String,
    /// Path, or empty.
    #[serde(default)]
    pub path: String,
}

impl Route {
    /// Returns the route as a comparable spec.
    #[must_use]
    pub fn spec(&self) -> RouteSpec {
        RouteSpec::new(
            self.host.to_lowercase(),
            self.domain.to_lowercase(),
            self.path.trim_end_matches('/'),
        )
    }
}

/// Platform-side snapshot of an application.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActualApplication {
    /// Application GUID.
    pub guid: String,
    /// Application name.
    pub name: String,
    /// Lifecycle state.
    #[serde(default)]
    pub state: AppState,
    /// State of the current package, if any.
    #[serde(default)]
    pub package_state: Option<PackageState>,
    /// Reason the last staging failed.
    #[serde(default)]
    pub staging_failed_reason: Option<String>,
    /// Memory quota in megabytes.
    #[serde(default)]
    pub memory_mb: Option<u64>,
    /// Disk quota in megabytes.
    #[serde(default)]
    pub disk_mb: Option<u64>,
    /// Instance count.
    #[serde(default)]
    pub instances: Option<u32>,
    /// Buildpacks.
    #[serde(default)]
    pub buildpacks: Vec<String>,
    /// Start command.
    #[serde(default)]
    pub command: Option<String>,
    /// Health check type.
    #[serde(default)]
    pub health_check_type: Option<HealthCheckType>,
    /// Health check timeout in seconds.
    #[serde(default)]
    pub health_check_timeout: Option<u32>,
    /// Stack.
    #[serde(default)]
    pub stack: Option<String>,
    /// Docker image.
    #[serde(default)]
    pub docker_image: Option<String>,
    /// Docker registry username.
    #[serde(default)]
    pub docker_username: Option<String>,
    /// Digest of the last uploaded package.
    #[serde(default)]
    pub package_digest: Option<String>,
    /// Routes bound to the application.
    #[serde(default)]
    pub routes: Vec<Route>,
    /// Per-instance runtime stats.
    #[serde(default)]
    pub instance_stats: Vec<InstanceSnapshot>,
}

impl ActualApplication {
    /// Returns the number of running instances.
    #[must_use]
    pub fn running_instances(&self) -> usize {
        self.instance_stats
            .iter()
            .filter(|i| i.state == InstanceState::Running)
            .count()
    }
}

/// State of a single application instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
    /// Booting.
    Starting,
    /// Up and passing health checks.
    Running,
    /// Exited unexpectedly.
    Crashed,
    /// Not placed.
    Down,
    /// Anything the client does not recognize.
    #[default]
    #[serde(other)]
    Unknown,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Crashed => "crashed",
            Self::Down => "down",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Runtime stats of one instance at one poll.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    /// Instance index.
    pub index: u32,
    /// Instance state.
    pub state: InstanceState,
    /// CPU usage as a fraction of one core.
    #[serde(default)]
    pub cpu: f64,
    /// Memory in use, in bytes.
    #[serde(default)]
    pub memory_bytes: u64,
    /// Memory quota, in bytes.
    #[serde(default)]
    pub memory_quota_bytes: u64,
    /// Disk in use, in bytes.
    #[serde(default)]
    pub disk_bytes: u64,
    /// Disk quota, in bytes.
    #[serde(default)]
    pub disk_quota_bytes: u64,
    /// Seconds since the last state change.
    #[serde(default)]
    pub since_secs: u64,
    /// Extra details, such as the crash reason.
    #[serde(default)]
    pub details: Option<String>,
}

/// Which desired routes already exist platform-wide, with their GUIDs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RouteCatalog {
    routes: BTreeMap<RouteSpec, String>,
}

impl RouteCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            routes: BTreeMap::new(),
        }
    }

    /// Records an existing route.
    pub fn insert(&mut self, route: RouteSpec, guid: impl Into<String>) {
        self.routes.insert(route, guid.into());
    }

    /// Returns the GUID of a route, if it exists.
    #[must_use]
    pub fn guid(&self, route: &RouteSpec) -> Option<&str> {
        self.routes.get(route).map(String::as_str)
    }

    /// Returns true if the route exists on the platform.
    #[must_use]
    pub fn contains(&self, route: &RouteSpec) -> bool {
        self.routes.contains_key(route)
    }

    /// Returns the number of known routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns true if no routes are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actual_application_deserialize() {
        let json = r#"{
            "guid": "app-1",
            "name": "foo",
            "state": "STARTED",
            "package_state": "STAGED",
            "instances": 2,
            "instance_stats": [
                {"index": 0, "state": "RUNNING", "cpu": 0.25},
                {"index": 1, "state": "EVACUATING"}
            ]
        }"#;
        let app: ActualApplication = serde_json::from_str(json).unwrap();
        assert_eq!(app.state, AppState::Started);
        assert_eq!(app.package_state, Some(PackageState::Staged));
        assert_eq!(app.instances, Some(2));
        assert_eq!(app.instance_stats[1].state, InstanceState::Unknown);
        assert_eq!(app.running_instances(), 1);
        assert!(app.routes.is_empty());
    }

    #[test]
    fn test_app_fields_skip_unset() {
        let fields = AppFields {
            name: String::from("foo"),
            instances: Some(0),
            ..AppFields::default()
        };
        let json = serde_json::to_value(&fields).unwrap();
        assert_eq!(json, serde_json::json!({"name": "foo", "instances": 0}));
    }

    #[test]
    fn test_route_spec_normalized() {
        let route = Route {
            guid: String::from("r-1"),
            host: String::from("Foo"),
            domain: String::from("Example.com"),
            path: String::from("/api/"),
        };
        assert_eq!(route.spec(), RouteSpec::new("foo", "example.com", "/api"));
    }

    #[test]
    fn test_route_catalog() {
        let mut catalog = RouteCatalog::new();
        let route = RouteSpec::new("foo", "example.com", "");
        assert!(catalog.is_empty());
        catalog.insert(route.clone(), "r-1");
        assert!(catalog.contains(&route));
        assert_eq!(catalog.guid(&route), Some("r-1"));
        assert_eq!(catalog.len(), 1);
    }
}
