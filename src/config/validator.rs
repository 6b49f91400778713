//! Validation of the effective desired application.
//!
//! Merging never fails; conflicting combinations are rejected here, before
//! any call reaches the platform.

use std::collections::HashSet;
use tracing::{debug, warn};

use crate::error::{ConfigError, PushError, Result};

use super::spec::DesiredApplication;

/// Validator for desired applications.
#[derive(Debug, Default)]
pub struct ApplicationValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ApplicationValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a desired application.
    ///
    /// # Errors
    ///
    /// Returns the first validation error found.
    pub fn validate(&self, app: &DesiredApplication) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_name(app, &mut result);
        Self::validate_source(app, &mut result);
        Self::validate_quotas(app, &mut result);
        Self::validate_routes(app, &mut result);

        for warning in &result.warnings {
            warn!("{}", warning);
        }

        if result.errors.is_empty() {
            debug!("Application '{}' passed validation", app.name);
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(PushError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    fn validate_name(app: &DesiredApplication, result: &mut ValidationResult) {
        if app.name.trim().is_empty() {
            result.errors.push(ValidationError {
                field: String::from("name"),
                message: String::from("Application name cannot be empty"),
            });
        }
    }

    fn validate_source(app: &DesiredApplication, result: &mut ValidationResult) {
        if app.docker_image.is_some() {
            if app.path.is_some() {
                result.errors.push(ValidationError {
                    field: String::from("path"),
                    message: String::from(
                        "Cannot use a bits path together with a docker image",
                    ),
                });
            }
            if !app.buildpacks.is_empty() {
                result.errors.push(ValidationError {
                    field: String::from("buildpacks"),
                    message: String::from("Cannot use buildpacks together with a docker image"),
                });
            }
        }

        match &app.docker_credentials {
            Some(_) if app.docker_image.is_none() => {
                result.errors.push(ValidationError {
                    field: String::from("docker.username"),
                    message: String::from("Docker credentials require a docker image"),
                });
            }
            Some(creds) if creds.password.is_none() => {
                result.errors.push(ValidationError {
                    field: String::from("docker.password"),
                    message: String::from(
                        "Docker username given without a password (set PUSHDECK_DOCKER_PASSWORD)",
                    ),
                });
            }
            _ => {}
        }
    }

    fn validate_quotas(app: &DesiredApplication, result: &mut ValidationResult) {
        if app.memory_mb == Some(0) {
            result.errors.push(ValidationError {
                field: String::from("memory"),
                message: String::from("Memory quota must be greater than zero"),
            });
        }
        if app.disk_mb == Some(0) {
            result.errors.push(ValidationError {
                field: String::from("disk_quota"),
                message: String::from("Disk quota must be greater than zero"),
            });
        }
        if app.instances == Some(0) {
            result.warnings.push(format!(
                "Application '{}' is requested with 0 instances and will not run",
                app.name
            ));
        }
    }

    fn validate_routes(app: &DesiredApplication, result: &mut ValidationResult) {
        let mut seen = HashSet::new();
        for route in &app.routes {
            if !seen.insert(route) {
                result
                    .warnings
                    .push(format!("Route '{route}' is listed more than once"));
            }
        }
    }
}
