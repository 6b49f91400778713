//! Manifest loading for application descriptions.
//!
//! This module handles loading application descriptions from YAML manifest
//! files. Quantities (`memory`, `disk_quota`) are normalized to megabytes and
//! relative `path` entries are resolved against the manifest's directory.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ConfigError, PushError, Result};

use super::spec::{HealthCheckType, RouteSpec};

/// Default manifest file names to search for.
pub const DEFAULT_MANIFEST_FILES: &[&str] = &["manifest.yml", "manifest.yaml"];

/// A parsed manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    /// Applications defined in the manifest, in file order.
    pub applications: Vec<ManifestApplication>,
}

/// One application entry of a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestApplication {
    /// Application name.
    pub name: String,
    /// Absolute path to the bits.
    pub path: Option<PathBuf>,
    /// Buildpack names.
    pub buildpacks: Vec<String>,
    /// Start command.
    pub command: Option<String>,
    /// Memory quota in megabytes.
    pub memory_mb: Option<u64>,
    /// Disk quota in megabytes.
    pub disk_mb: Option<u64>,
    /// Instance count.
    pub instances: Option<u32>,
    /// Health check type.
    pub health_check_type: Option<HealthCheckType>,
    /// Health check timeout in seconds.
    pub health_check_timeout: Option<u32>,
    /// Stack name.
    pub stack: Option<String>,
    /// Docker image.
    pub docker_image: Option<String>,
    /// Docker registry username.
    pub docker_username: Option<String>,
    /// Routes.
    pub routes: Vec<RouteSpec>,
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default)]
    applications: Vec<RawApplication>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawApplication {
    name: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    buildpack: Option<String>,
    #[serde(default)]
    buildpacks: Vec<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    memory: Option<RawQuantity>,
    #[serde(default, alias = "disk_quota")]
    disk_quota: Option<RawQuantity>,
    #[serde(default)]
    instances: Option<u32>,
    #[serde(default, alias = "health_check_type")]
    health_check_type: Option<String>,
    #[serde(default)]
    timeout: Option<u32>,
    #[serde(default)]
    stack: Option<String>,
    #[serde(default)]
    docker: Option<RawDocker>,
    #[serde(default)]
    routes: Vec<RawRoute>,
}

#[derive(Debug, Deserialize)]
struct RawDocker {
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRoute {
    route: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawQuantity {
    Number(u64),
    Text(String),
}

/// Parser for manifest files.
#[derive(Debug, Default)]
pub struct ManifestParser {
    /// Base path for resolving relative application paths.
    base_path: Option<PathBuf>,
}

impl ManifestParser {
    /// Creates a new manifest parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative application paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a manifest from a YAML file.
    ///
    /// Relative `path` entries are resolved against the manifest's directory
    /// unless a base path was set explicitly.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Manifest> {
        let path = path.as_ref();
        info!("Loading manifest from: {}", path.display());

        if !path.exists() {
            return Err(PushError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            PushError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        if self.base_path.is_some() {
            return self.parse_yaml(&content, Some(path));
        }

        let base = path.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self::new().with_base_path(base).parse_yaml(&content, Some(path))
    }

    /// Parses a manifest from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid, a quantity or route cannot be
    /// parsed, or two applications share a name.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<Manifest> {
        debug!("Parsing YAML manifest");

        let raw: RawManifest = serde_yaml::from_str(content).map_err(|e| {
            PushError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location: source.map(|p| p.display().to_string()),
            })
        })?;

        let mut seen = HashSet::new();
        let mut applications = Vec::with_capacity(raw.applications.len());

        for app in raw.applications {
            if !seen.insert(app.name.clone()) {
                return Err(PushError::Config(ConfigError::DuplicateName { name: app.name }));
            }
            applications.push(self.convert(app)?);
        }

        debug!("Parsed manifest with {} applications", applications.len());
        Ok(Manifest { applications })
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                PushError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    fn convert(&self, raw: RawApplication) -> Result<ManifestApplication> {
        let path = raw.path.map(|p| self.resolve_path(&p));

        let mut buildpacks = raw.buildpacks;
        if buildpacks.is_empty()
            && let Some(buildpack) = raw.buildpack
        {
            buildpacks.push(buildpack);
        }

        let memory_mb = raw
            .memory
            .map(|q| parse_megabytes_field("memory", q))
            .transpose()?;
        let disk_mb = raw
            .disk_quota
            .map(|q| parse_megabytes_field("disk_quota", q))
            .transpose()?;

        let health_check_type = raw
            .health_check_type
            .map(|t| {
                t.parse::<HealthCheckType>().map_err(|message| {
                    PushError::Config(ConfigError::validation(message, "health-check-type"))
                })
            })
            .transpose()?;

        let routes = raw
            .routes
            .into_iter()
            .map(|r| {
                RouteSpec::parse(&r.route)
                    .map_err(|_| PushError::Config(ConfigError::InvalidRoute { route: r.route }))
            })
            .collect::<Result<Vec<_>>>()?;

        let (docker_image, docker_username) = raw
            .docker
            .map_or((None, None), |d| (d.image, d.username));

        Ok(ManifestApplication {
            name: raw.name,
            path,
            buildpacks,
            command: raw.command,
            memory_mb,
            disk_mb,
            instances: raw.instances,
            health_check_type,
            health_check_timeout: raw.timeout,
            stack: raw.stack,
            docker_image,
            docker_username,
            routes,
        })
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = PathBuf::from(path);
        match &self.base_path {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        }
    }
}

impl Manifest {
    /// Selects the application to push.
    ///
    /// With a name, the matching entry is returned. Without one, the manifest
    /// must contain exactly one application.
    ///
    /// # Errors
    ///
    /// Returns an error if the named application is absent, or if no name is
    /// given and the manifest holds several applications.
    pub fn application(&self, name: Option<&str>) -> Result<Option<ManifestApplication>> {
        match name {
            Some(name) => self
                .applications
                .iter()
                .find(|a| a.name == name)
                .cloned()
                .map(Some)
                .ok_or_else(|| {
                    PushError::Config(ConfigError::ApplicationNotInManifest {
                        name: name.to_string(),
                    })
                }),
            None => match self.applications.as_slice() {
                [] => Ok(None),
                [only] => Ok(Some(only.clone())),
                _ => Err(PushError::Config(ConfigError::validation(
                    "Manifest defines several applications; specify which one to push",
                    "name",
                ))),
            },
        }
    }
}

/// Parses a quantity like `256M`, `1G`, `512MB` or `1024` into megabytes.
///
/// # Errors
///
/// Returns the offending string if it is not a valid quantity.
pub fn parse_megabytes(value: &str) -> std::result::Result<u64, String> {
    let upper = value.trim().to_uppercase();
    let upper = upper.trim_end_matches('B');

    let (digits, multiplier) = if let Some(n) = upper.strip_suffix('G') {
        (n, 1024)
    } else if let Some(n) = upper.strip_suffix('M') {
        (n, 1)
    } else {
        (upper, 1)
    };

    digits
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| value.to_string())
}

fn parse_megabytes_field(field: &str, quantity: RawQuantity) -> Result<u64> {
    match quantity {
        RawQuantity::Number(n) => Ok(n),
        RawQuantity::Text(text) => parse_megabytes(&text).map_err(|value| {
            PushError::Config(ConfigError::InvalidQuantity {
                field: field.to_string(),
                value,
            })
        }),
    }
}

/// Finds a manifest file in the given directory.
#[must_use]
pub fn find_manifest_file(dir: impl AsRef<Path>) -> Option<PathBuf> {
    let dir = dir.as_ref();
    DEFAULT_MANIFEST_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|candidate| candidate.exists())
        .inspect(|found| info!("Found manifest file: {}", found.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_manifest() {
        let yaml = r"
applications:
  - name: foo
";
        let manifest = ManifestParser::new().parse_yaml(yaml, None).unwrap();
        assert_eq!(manifest.applications.len(), 1);
        assert_eq!(manifest.applications[0].name, "foo");
        assert_eq!(manifest.applications[0].instances, None);
        assert!(manifest.applications[0].path.is_none());
    }

    #[test]
    fn test_parse_full_manifest() {
        let yaml = r"
applications:
  - name: api
    path: ./build
    buildpacks:
      - nodejs_buildpack
    command: node server.js
    memory: 1G
    disk_quota: 512M
    instances: 0
    health-check-type: http
    timeout: 90
    stack: cflinuxfs4
    routes:
      - route: api.example.com
      - route: example.com/api
";
        let manifest = ManifestParser::new()
            .with_base_path("/srv/project")
            .parse_yaml(yaml, None)
            .unwrap();

        let app = &manifest.applications[0];
        assert_eq!(app.path, Some(PathBuf::from("/srv/project/build")));
        assert_eq!(app.buildpacks, vec![String::from("nodejs_buildpack")]);
        assert_eq!(app.memory_mb, Some(1024));
        assert_eq!(app.disk_mb, Some(512));
        assert_eq!(app.instances, Some(0));
        assert_eq!(app.health_check_type, Some(HealthCheckType::Http));
        assert_eq!(app.health_check_timeout, Some(90));
        assert_eq!(app.routes.len(), 2);
        assert_eq!(app.routes[1], RouteSpec::new("example", "com", "/api"));
    }

    #[test]
    fn test_legacy_buildpack_and_docker() {
        let yaml = r"
applications:
  - name: worker
    buildpack: go_buildpack
  - name: web
    docker:
      image: registry.example.com/web:1.2
      username: ci
";
        let manifest = ManifestParser::new().parse_yaml(yaml, None).unwrap();
        assert_eq!(manifest.applications[0].buildpacks, vec![String::from("go_buildpack")]);
        assert_eq!(
            manifest.applications[1].docker_image.as_deref(),
            Some("registry.example.com/web:1.2")
        );
        assert_eq!(manifest.applications[1].docker_username.as_deref(), Some("ci"));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let yaml = r"
applications:
  - name: foo
  - name: foo
";
        let result = ManifestParser::new().parse_yaml(yaml, None);
        assert!(matches!(
            result,
            Err(PushError::Config(ConfigError::DuplicateName { .. }))
        ));
    }

    #[test]
    fn test_invalid_quantity_rejected() {
        let yaml = r"
applications:
  - name: foo
    memory: lots
";
        let result = ManifestParser::new().parse_yaml(yaml, None);
        assert!(matches!(
            result,
            Err(PushError::Config(ConfigError::InvalidQuantity { .. }))
        ));
    }

    #[test]
    fn test_parse_megabytes() {
        assert_eq!(parse_megabytes("256M"), Ok(256));
        assert_eq!(parse_megabytes("2g"), Ok(2048));
        assert_eq!(parse_megabytes("512MB"), Ok(512));
        assert_eq!(parse_megabytes("1GB"), Ok(1024));
        assert_eq!(parse_megabytes("64"), Ok(64));
        assert!(parse_megabytes("1T").is_err());
    }

    #[test]
    fn test_select_application() {
        let manifest = Manifest {
            applications: vec![
                ManifestApplication {
                    name: String::from("a"),
                    ..ManifestApplication::default()
                },
                ManifestApplication {
                    name: String::from("b"),
                    ..ManifestApplication::default()
                },
            ],
        };

        assert_eq!(manifest.application(Some("b")).unwrap().unwrap().name, "b");
        assert!(manifest.application(Some("c")).is_err());
        assert!(manifest.application(None).is_err());
        assert!(Manifest::default().application(None).unwrap().is_none());
    }

    #[test]
    fn test_load_file_resolves_relative_to_manifest() {
        let dir = tempfile::TempDir::new().unwrap();
        let manifest_path = dir.path().join("manifest.yml");
        std::fs::write(&manifest_path, "applications:\n  - name: foo\n    path: dist\n").unwrap();

        assert_eq!(find_manifest_file(dir.path()), Some(manifest_path.clone()));

        let manifest = ManifestParser::new().load_file(&manifest_path).unwrap();
        assert_eq!(manifest.applications[0].path, Some(dir.path().join("dist")));
    }
}
