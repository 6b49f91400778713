//! Diff engine for comparing desired vs actual application state.
//!
//! This module computes the field-level difference between the desired
//! application and the platform's view of it, along with the route and
//! bits differences.

use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

use crate::config::{DesiredApplication, RouteSpec};
use crate::platform::{ActualApplication, AppFields, Route};

/// Engine for computing diffs between desired and actual states.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiffEngine;

/// Difference for one application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationDiff {
    /// Application name.
    pub name: String,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Field-level details.
    pub details: Vec<DiffDetail>,
    /// Fields to send: everything on create, only differing fields on update.
    pub fields: AppFields,
    /// Desired routes not bound yet, in desired order.
    pub routes_added: Vec<RouteSpec>,
    /// Bound routes no longer desired.
    pub routes_removed: Vec<Route>,
    /// Whether new bits must be uploaded.
    pub upload_needed: bool,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffType {
    /// Application needs to be created.
    Create,
    /// Application fields need to be updated.
    Update,
    /// Application fields are unchanged.
    NoChange,
}

/// Detail about a specific difference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffDetail {
    /// Field that differs.
    pub field: String,
    /// Old value.
    pub old_value: Option<String>,
    /// New value.
    pub new_value: Option<String>,
}

impl DiffDetail {
    fn new(field: &str, old_value: Option<String>, new_value: Option<String>) -> Self {
        Self {
            field: field.to_string(),
            old_value,
            new_value,
        }
    }
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the diff between the desired application and the platform.
    #[must_use]
    pub fn compute_diff(
        &self,
        desired: &DesiredApplication,
        actual: Option<&ActualApplication>,
    ) -> ApplicationDiff {
        let desired_routes = dedup_routes(&desired.routes);

        let Some(actual) = actual else {
            debug!("Application {} needs to be created", desired.name);
            return ApplicationDiff {
                name: desired.name.clone(),
                diff_type: DiffType::Create,
                details: Self::creation_details(desired),
                fields: AppFields::from_desired(desired),
                routes_added: desired_routes,
                routes_removed: Vec::new(),
                upload_needed: !desired.is_docker(),
            };
        };

        let (fields, details) = Self::compare_fields(desired, actual);
        let diff_type = if details.is_empty() {
            DiffType::NoChange
        } else {
            DiffType::Update
        };

        let (routes_added, routes_removed) = Self::compare_routes(&desired_routes, actual);

        let upload_needed = !desired.is_docker()
            && match (&desired.bits_digest, &actual.package_digest) {
                (Some(local), Some(remote)) => local != remote,
                _ => true,
            };

        debug!(
            "Application {}: {:?}, {} routes to add, {} to remove, upload: {}",
            desired.name,
            diff_type,
            routes_added.len(),
            routes_removed.len(),
            upload_needed
        );

        ApplicationDiff {
            name: desired.name.clone(),
            diff_type,
            details,
            fields,
            routes_added,
            routes_removed,
            upload_needed,
        }
    }

    /// Lists every set field of a new application as a detail.
    fn creation_details(desired: &DesiredApplication) -> Vec<DiffDetail> {
        let fields = AppFields::from_desired(desired);
        let mut details = vec![DiffDetail::new("name", None, Some(desired.name.clone()))];

        let mut push = |field: &str, value: Option<String>| {
            if value.is_some() {
                details.push(DiffDetail::new(field, None, value));
            }
        };
        push("memory", fields.memory_mb.map(|m| format!("{m}M")));
        push("disk_quota", fields.disk_mb.map(|d| format!("{d}M")));
        push("instances", fields.instances.map(|i| i.to_string()));
        push("buildpacks", fields.buildpacks.map(|b| b.join(", ")));
        push("command", fields.command);
        push("health_check_type", fields.health_check_type.map(|t| t.to_string()));
        push("health_check_timeout", fields.health_check_timeout.map(|t| t.to_string()));
        push("stack", fields.stack);
        push("docker_image", fields.docker_image);
        push("docker_username", desired.docker_username().map(String::from));

        details
    }

    /// Compares every field the user set against the platform's value.
    fn compare_fields(
        desired: &DesiredApplication,
        actual: &ActualApplication,
    ) -> (AppFields, Vec<DiffDetail>) {
        let mut fields = AppFields {
            name: desired.name.clone(),
            ..AppFields::default()
        };
        let mut details = Vec::new();

        if desired.name != actual.name {
            details.push(DiffDetail::new(
                "name",
                Some(actual.name.clone()),
                Some(desired.name.clone()),
            ));
        }

        if let Some(memory) = differs(desired.memory_mb, actual.memory_mb) {
            details.push(DiffDetail::new(
                "memory",
                actual.memory_mb.map(|m| format!("{m}M")),
                Some(format!("{memory}M")),
            ));
            fields.memory_mb = Some(memory);
        }

        if let Some(disk) = differs(desired.disk_mb, actual.disk_mb) {
            details.push(DiffDetail::new(
                "disk_quota",
                actual.disk_mb.map(|d| format!("{d}M")),
                Some(format!("{disk}M")),
            ));
            fields.disk_mb = Some(disk);
        }

        if let Some(instances) = differs(desired.instances, actual.instances) {
            details.push(DiffDetail::new(
                "instances",
                actual.instances.map(|i| i.to_string()),
                Some(instances.to_string()),
            ));
            fields.instances = Some(instances);
        }

        if !desired.buildpacks.is_empty() && desired.buildpacks != actual.buildpacks {
            details.push(DiffDetail::new(
                "buildpacks",
                (!actual.buildpacks.is_empty()).then(|| actual.buildpacks.join(", ")),
                Some(desired.buildpacks.join(", ")),
            ));
            fields.buildpacks = Some(desired.buildpacks.clone());
        }

        if let Some(command) = differs(desired.command.as_ref(), actual.command.as_ref()) {
            details.push(DiffDetail::new(
                "command",
                actual.command.clone(),
                Some(command.clone()),
            ));
            fields.command = Some(command.clone());
        }

        if let Some(check) = differs(desired.health_check_type, actual.health_check_type) {
            details.push(DiffDetail::new(
                "health_check_type",
                actual.health_check_type.map(|t| t.to_string()),
                Some(check.to_string()),
            ));
            fields.health_check_type = Some(check);
        }

        if let Some(timeout) = differs(desired.health_check_timeout, actual.health_check_timeout) {
            details.push(DiffDetail::new(
                "health_check_timeout",
                actual.health_check_timeout.map(|t| t.to_string()),
                Some(timeout.to_string()),
            ));
            fields.health_check_timeout = Some(timeout);
        }

        if let Some(stack) = differs(desired.stack.as_ref(), actual.stack.as_ref()) {
            details.push(DiffDetail::new(
                "stack",
                actual.stack.clone(),
                Some(stack.clone()),
            ));
            fields.stack = Some(stack.clone());
        }

        if let Some(image) = differs(desired.docker_image.as_ref(), actual.docker_image.as_ref()) {
            details.push(DiffDetail::new(
                "docker_image",
                actual.docker_image.clone(),
                Some(image.clone()),
            ));
            fields.docker_image = Some(image.clone());
        }

        if let Some(username) = differs(desired.docker_username(), actual.docker_username.as_deref())
        {
            details.push(DiffDetail::new(
                "docker_username",
                actual.docker_username.clone(),
                Some(username.to_string()),
            ));
            fields.docker_credentials.clone_from(&desired.docker_credentials);
        }

        (fields, details)
    }

    /// Computes the route set differences.
    ///
    /// An application that declares no routes keeps whatever is bound.
    fn compare_routes(
        desired: &[RouteSpec],
        actual: &ActualApplication,
    ) -> (Vec<RouteSpec>, Vec<Route>) {
        let bound: HashSet<RouteSpec> = actual.routes.iter().map(Route::spec).collect();
        let added = desired
            .iter()
            .filter(|r| !bound.contains(*r))
            .cloned()
            .collect();

        if desired.is_empty() {
            return (added, Vec::new());
        }

        let wanted: HashSet<&RouteSpec> = desired.iter().collect();
        let removed = actual
            .routes
            .iter()
            .filter(|r| !wanted.contains(&r.spec()))
            .cloned()
            .collect();

        (added, removed)
    }
}

/// Returns the desired value when it is set and differs from the actual one.
fn differs<T: PartialEq>(desired: Option<T>, actual: Option<T>) -> Option<T> {
    match desired {
        Some(value) if actual.as_ref() != Some(&value) => Some(value),
        _ => None,
    }
}

/// Removes duplicate routes, keeping the first occurrence.
fn dedup_routes(routes: &[RouteSpec]) -> Vec<RouteSpec> {
    let mut seen = HashSet::new();
    routes
        .iter()
        .filter(|r| seen.insert(*r))
        .cloned()
        .collect()
}

impl ApplicationDiff {
    /// Returns true if the application fields differ.
    #[must_use]
    pub fn has_field_changes(&self) -> bool {
        self.diff_type != DiffType::NoChange
    }

    /// Returns true if anything at all differs.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.has_field_changes()
            || self.upload_needed
            || !self.routes_added.is_empty()
            || !self.routes_removed.is_empty()
    }
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::NoChange => "no change",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for DiffDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} -> {}",
            self.field,
            self.old_value.as_deref().unwrap_or("(unset)"),
            self.new_value.as_deref().unwrap_or("(unset)")
        )
    }
}

impl std::fmt::Display for ApplicationDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.diff_type)?;
        if !self.details.is_empty() {
            write!(f, " (")?;
            for (i, detail) in self.details.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", detail.field)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}
