//! Command-line overrides and platform connection settings.
//!
//! [`CommandLineSettings`] is what the user typed on the command line. Merging
//! it over a [`ManifestApplication`] yields the effective
//! [`DesiredApplication`] for one push.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, PushError, Result};

use super::manifest::ManifestApplication;
use super::spec::{DesiredApplication, DockerCredentials, HealthCheckType};

/// Overrides supplied on the command line.
///
/// Empty strings and zero quotas mean "not given". Instances is the exception:
/// it is an `Option` so an explicit `0` can be told apart from absence.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CommandLineSettings {
    /// Buildpack names (`-b`).
    pub buildpacks: Vec<String>,
    /// Start command (`-c`).
    pub command: String,
    /// Working directory of the invocation.
    pub current_directory: PathBuf,
    /// Disk quota in megabytes (`-k`).
    pub disk_quota_mb: u64,
    /// Docker image (`-o`).
    pub docker_image: String,
    /// Docker registry password, read from the environment.
    pub docker_password: String,
    /// Docker registry username.
    pub docker_username: String,
    /// Health check timeout in seconds (`-t`).
    pub health_check_timeout: u32,
    /// Health check type (`-u`).
    pub health_check_type: Option<HealthCheckType>,
    /// Instance count (`-i`).
    pub instances: Option<u32>,
    /// Memory quota in megabytes (`-m`).
    pub memory_mb: u64,
    /// Application name.
    pub name: String,
    /// Path to the bits, as typed (`-p`).
    pub provided_app_path: String,
    /// Stack (`-s`).
    pub stack: String,
}

impl CommandLineSettings {
    /// Returns the path the bits would be read from.
    ///
    /// A provided relative path is resolved against the working directory.
    /// Without a provided path, the working directory itself is used.
    #[must_use]
    pub fn application_path(&self) -> PathBuf {
        self.resolved_provided_path()
            .unwrap_or_else(|| self.current_directory.clone())
    }

    fn resolved_provided_path(&self) -> Option<PathBuf> {
        if self.provided_app_path.is_empty() {
            return None;
        }

        let provided = Path::new(&self.provided_app_path);
        if provided.is_absolute() {
            return Some(provided.to_path_buf());
        }

        let relative = provided.strip_prefix(".").unwrap_or(provided);
        Some(self.current_directory.join(relative))
    }

    /// Merges these overrides over a manifest entry.
    ///
    /// Every field given on the command line replaces the manifest's value.
    /// Fields not given keep the manifest's value, which may itself be unset.
    #[must_use]
    pub fn override_manifest(&self, app: ManifestApplication) -> DesiredApplication {
        let mut desired = DesiredApplication {
            name: app.name,
            path: app.path,
            docker_image: app.docker_image,
            docker_credentials: None,
            buildpacks: app.buildpacks,
            command: app.command,
            memory_mb: app.memory_mb,
            disk_mb: app.disk_mb,
            instances: app.instances,
            health_check_type: app.health_check_type,
            health_check_timeout: app.health_check_timeout,
            stack: app.stack,
            routes: app.routes,
            bits_digest: None,
        };

        override_string(&mut desired.name, &self.name);
        override_option(&mut desired.command, &self.command);
        override_option(&mut desired.docker_image, &self.docker_image);
        override_option(&mut desired.stack, &self.stack);

        if !self.buildpacks.is_empty() {
            desired.buildpacks.clone_from(&self.buildpacks);
        }
        if self.memory_mb > 0 {
            desired.memory_mb = Some(self.memory_mb);
        }
        if self.disk_quota_mb > 0 {
            desired.disk_mb = Some(self.disk_quota_mb);
        }
        if self.health_check_timeout > 0 {
            desired.health_check_timeout = Some(self.health_check_timeout);
        }
        if self.health_check_type.is_some() {
            desired.health_check_type = self.health_check_type;
        }
        if self.instances.is_some() {
            desired.instances = self.instances;
        }

        if let Some(path) = self.resolved_provided_path() {
            desired.path = Some(path);
        } else if desired.path.is_none() && desired.docker_image.is_none() {
            desired.path = Some(self.current_directory.clone());
        }

        let mut username = app.docker_username;
        override_option(&mut username, &self.docker_username);
        desired.docker_credentials = username.map(|username| DockerCredentials {
            username,
            password: (!self.docker_password.is_empty()).then(|| self.docker_password.clone()),
        });

        desired
    }

    /// Merges these overrides over an optional manifest entry.
    ///
    /// Without a manifest the command line alone describes the application.
    #[must_use]
    pub fn merge(&self, app: Option<ManifestApplication>) -> DesiredApplication {
        self.override_manifest(app.unwrap_or_default())
    }
}

fn override_string(target: &mut String, value: &str) {
    if !value.is_empty() {
        *target = value.to_string();
    }
}

fn override_option(target: &mut Option<String>, value: &str) {
    if !value.is_empty() {
        *target = Some(value.to_string());
    }
}

impl fmt::Debug for CommandLineSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandLineSettings")
            .field("name", &self.name)
            .field("buildpacks", &self.buildpacks)
            .field("command", &self.command)
            .field("current_directory", &self.current_directory)
            .field("disk_quota_mb", &self.disk_quota_mb)
            .field("docker_image", &self.docker_image)
            .field("docker_username", &self.docker_username)
            .field(
                "docker_password",
                &(!self.docker_password.is_empty()).then_some("<redacted>"),
            )
            .field("health_check_timeout", &self.health_check_timeout)
            .field("health_check_type", &self.health_check_type)
            .field("instances", &self.instances)
            .field("memory_mb", &self.memory_mb)
            .field("provided_app_path", &self.provided_app_path)
            .field("stack", &self.stack)
            .finish()
    }
}

impl fmt::Display for CommandLineSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "name: {:?}, buildpacks: {:?}, command: {:?}, current directory: {}, \
             disk quota: {}, docker image: {:?}, docker username: {:?}, \
             health check timeout: {}, health check type: {}, instances: {}, \
             memory: {}, provided path: {:?}, stack: {:?}",
            self.name,
            self.buildpacks,
            self.command,
            self.current_directory.display(),
            self.disk_quota_mb,
            self.docker_image,
            self.docker_username,
            self.health_check_timeout,
            self.health_check_type
                .map_or_else(|| String::from("unset"), |t| t.to_string()),
            self.instances
                .map_or_else(|| String::from("unset"), |n| n.to_string()),
            self.memory_mb,
            self.provided_app_path,
            self.stack,
        )
    }
}

/// Connection settings for the platform API.
#[derive(Clone, PartialEq, Eq)]
pub struct PlatformConfig {
    /// Base URL of the platform API.
    pub api_url: String,
    /// Bearer token.
    pub token: String,
    /// GUID of the target space.
    pub space: String,
}

impl PlatformConfig {
    /// Builds a platform configuration from optional values.
    ///
    /// # Errors
    ///
    /// Returns `MissingEnvVar` naming the variable of the first absent value.
    pub fn from_parts(
        api_url: Option<String>,
        token: Option<String>,
        space: Option<String>,
    ) -> Result<Self> {
        Ok(Self {
            api_url: require(api_url, "PUSHDECK_API")?
                .trim_end_matches('/')
                .to_string(),
            token: require(token, "PUSHDECK_TOKEN")?,
            space: require(space, "PUSHDECK_SPACE")?,
        })
    }
}

fn require(value: Option<String>, name: &str) -> Result<String> {
    value.filter(|v| !v.trim().is_empty()).ok_or_else(|| {
        PushError::Config(ConfigError::MissingEnvVar {
            name: name.to_string(),
        })
    })
}

impl fmt::Debug for PlatformConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformConfig")
            .field("api_url", &self.api_url)
            .field("token", &"<redacted>")
            .field("space", &self.space)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteSpec;

    fn manifest_app() -> ManifestApplication {
        ManifestApplication {
            name: String::from("foo"),
            buildpacks: vec![String::from("ruby_buildpack")],
            command: Some(String::from("bundle exec rackup")),
            memory_mb: Some(256),
            instances: Some(3),
            stack: Some(String::from("cflinuxfs3")),
            routes: vec![RouteSpec::new("foo", "example.com", "")],
            ..ManifestApplication::default()
        }
    }

    fn settings() -> CommandLineSettings {
        CommandLineSettings {
            current_directory: PathBuf::from("/home/u/app"),
            ..CommandLineSettings::default()
        }
    }

    #[test]
    fn test_cli_overrides_manifest() {
        let cli = CommandLineSettings {
            memory_mb: 1024,
            stack: String::from("cflinuxfs4"),
            buildpacks: vec![String::from("go_buildpack")],
            ..settings()
        };

        let desired = cli.override_manifest(manifest_app());
        assert_eq!(desired.memory_mb, Some(1024));
        assert_eq!(desired.stack.as_deref(), Some("cflinuxfs4"));
        assert_eq!(desired.buildpacks, vec![String::from("go_buildpack")]);
        assert_eq!(desired.command.as_deref(), Some("bundle exec rackup"));
        assert_eq!(desired.instances, Some(3));
        assert_eq!(desired.routes.len(), 1);
    }

    #[test]
    fn test_unset_cli_fields_keep_manifest_values() {
        let desired = settings().override_manifest(manifest_app());
        assert_eq!(desired.name, "foo");
        assert_eq!(desired.memory_mb, Some(256));
        assert_eq!(desired.disk_mb, None);
        assert_eq!(desired.health_check_type, None);
    }

    #[test]
    fn test_explicit_zero_instances_wins() {
        let cli = CommandLineSettings {
            instances: Some(0),
            ..settings()
        };
        assert_eq!(cli.override_manifest(manifest_app()).instances, Some(0));
        assert_eq!(settings().override_manifest(manifest_app()).instances, Some(3));

        let no_manifest = settings().merge(None);
        assert_eq!(no_manifest.instances, None);
    }

    #[test]
    fn test_relative_path_resolves_against_working_directory() {
        let cli = CommandLineSettings {
            provided_app_path: String::from("./dist"),
            ..settings()
        };
        assert_eq!(cli.application_path(), PathBuf::from("/home/u/app/dist"));

        let desired = cli.override_manifest(ManifestApplication {
            path: Some(PathBuf::from("/manifest/dir/build")),
            ..manifest_app()
        });
        assert_eq!(desired.path, Some(PathBuf::from("/home/u/app/dist")));
    }

    #[test]
    fn test_absolute_path_unchanged() {
        let cli = CommandLineSettings {
            provided_app_path: String::from("/abs/dist"),
            ..settings()
        };
        assert_eq!(cli.application_path(), PathBuf::from("/abs/dist"));
    }

    #[test]
    fn test_default_path_is_working_directory() {
        let desired = settings().override_manifest(manifest_app());
        assert_eq!(desired.path, Some(PathBuf::from("/home/u/app")));
        assert_eq!(settings().application_path(), PathBuf::from("/home/u/app"));
    }

    #[test]
    fn test_docker_app_gets_no_default_path() {
        let cli = CommandLineSettings {
            docker_image: String::from("nginx:1.27"),
            docker_username: String::from("ci"),
            docker_password: String::from("secret"),
            ..settings()
        };
        let desired = cli.override_manifest(manifest_app());
        assert!(desired.path.is_none());
        assert!(desired.is_docker());
        assert_eq!(desired.docker_username(), Some("ci"));
        assert_eq!(
            desired.docker_credentials.and_then(|c| c.password).as_deref(),
            Some("secret")
        );
    }

    #[test]
    fn test_display_hides_password() {
        let cli = CommandLineSettings {
            docker_password: String::from("hunter2"),
            ..settings()
        };
        assert!(!cli.to_string().contains("hunter2"));
        assert!(!format!("{cli:?}").contains("hunter2"));
    }

    #[test]
    fn test_platform_config_requires_values() {
        let config = PlatformConfig::from_parts(
            Some(String::from("https://api.example.com/")),
            Some(String::from("token")),
            Some(String::from("space-guid")),
        )
        .unwrap();
        assert_eq!(config.api_url, "https://api.example.com");

        let missing = PlatformConfig::from_parts(Some(String::from("x")), None, None);
        assert!(matches!(
            missing,
            Err(PushError::Config(ConfigError::MissingEnvVar { name })) if name == "PUSHDECK_TOKEN"
        ));
    }
}
