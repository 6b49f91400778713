//! Configuration module for the pushdeck push engine.
//!
//! This module handles everything that describes the desired application:
//! - Parsing `manifest.yml` application entries
//! - Merging command-line overrides over a manifest entry
//! - Validation of the effective desired application
//! - Platform connection settings

mod manifest;
mod settings;
mod spec;
mod validator;

pub use manifest::{
    DEFAULT_MANIFEST_FILES, Manifest, ManifestApplication, ManifestParser, find_manifest_file,
    parse_megabytes,
};
pub use settings::{CommandLineSettings, PlatformConfig};
pub use spec::{DesiredApplication, DockerCredentials, HealthCheckType, RouteSpec};
pub use validator::{ApplicationValidator, ValidationError, ValidationResult};
