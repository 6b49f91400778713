//! Desired-state types for the push engine.
//!
//! This module defines the effective application description produced by
//! merging command-line overrides with a manifest entry, along with the
//! small value types it is built from (routes, health checks, docker
//! credentials).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The effective desired state of one application.
///
/// Every optional field distinguishes "not specified" (`None`, keep whatever
/// the platform has) from an explicit value, including zero.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DesiredApplication {
    /// Application name, unique within a space.
    pub name: String,
    /// Directory (or archive) holding the application bits.
    pub path: Option<PathBuf>,
    /// Container image reference for docker applications.
    pub docker_image: Option<String>,
    /// Registry credentials for the docker image.
    #[serde(skip)]
    pub docker_credentials: Option<DockerCredentials>,
    /// Buildpack names, in detection order.
    pub buildpacks: Vec<String>,
    /// Start command override.
    pub command: Option<String>,
    /// Memory quota in megabytes.
    pub memory_mb: Option<u64>,
    /// Disk quota in megabytes.
    pub disk_mb: Option<u64>,
    /// Requested instance count.
    pub instances: Option<u32>,
    /// Health check type.
    pub health_check_type: Option<HealthCheckType>,
    /// Health check timeout in seconds.
    pub health_check_timeout: Option<u32>,
    /// Target stack.
    pub stack: Option<String>,
    /// Routes the application should be reachable on.
    pub routes: Vec<RouteSpec>,
    /// SHA-256 digest of the local bits, once the archive has been built.
    pub bits_digest: Option<String>,
}

/// Docker registry credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct DockerCredentials {
    /// Registry username.
    pub username: String,
    /// Registry password.
    pub password: Option<String>,
}

/// Health check types understood by the platform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckType {
    /// TCP connection to the application port.
    #[default]
    Port,
    /// The process staying alive is enough.
    Process,
    /// HTTP GET against an endpoint.
    Http,
}

/// A route as `host.domain[/path]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RouteSpec {
    /// Host label.
    pub host: String,
    /// Domain the host lives under.
    pub domain: String,
    /// Optional path, including the leading slash, or empty.
    pub path: String,
}

impl DesiredApplication {
    /// Returns true if this application deploys a container image.
    #[must_use]
    pub const fn is_docker(&self) -> bool {
        self.docker_image.is_some()
    }

    /// Returns the bits path for applications that upload bits.
    #[must_use]
    pub fn bits_path(&self) -> Option<&PathBuf> {
        if self.is_docker() {
            None
        } else {
            self.path.as_ref()
        }
    }

    /// Returns the docker username, if credentials are set.
    #[must_use]
    pub fn docker_username(&self) -> Option<&str> {
        self.docker_credentials.as_ref().map(|c| c.username.as_str())
    }
}

impl fmt::Debug for DockerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DockerCredentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl std::str::FromStr for HealthCheckType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "port" => Ok(Self::Port),
            // "none" is the legacy spelling of process.
            "process" | "none" => Ok(Self::Process),
            "http" => Ok(Self::Http),
            other => Err(format!("Unknown health check type: {other}")),
        }
    }
}

impl fmt::Display for HealthCheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Port => "port",
            Self::Process => "process",
            Self::Http => "http",
        };
        write!(f, "{s}")
    }
}

impl TryFrom<String> for RouteSpec {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<RouteSpec> for String {
    fn from(route: RouteSpec) -> Self {
        route.to_string()
    }
}

impl RouteSpec {
    /// Parses a route string like `myapp.example.com/api`.
    ///
    /// # Errors
    ///
    /// Returns an error if the host or domain part is missing.
    pub fn parse(s: &str) -> Result<Self, String> {
        let trimmed = s
            .trim()
            .trim_start_matches("https://")
            .trim_start_matches("http://");

        let (fqdn, path) = trimmed
            .find('/')
            .map_or((trimmed, ""), |idx| trimmed.split_at(idx));

        let Some((host, domain)) = fqdn.split_once('.') else {
            return Err(format!("Route '{s}' must be of the form host.domain[/path]"));
        };

        if host.is_empty() || domain.is_empty() {
            return Err(format!("Route '{s}' must be of the form host.domain[/path]"));
        }

        let path = path.trim_end_matches('/');

        Ok(Self {
            host: host.to_lowercase(),
            domain: domain.to_lowercase(),
            path: path.to_string(),
        })
    }

    /// Creates a route from its parts.
    #[must_use]
    pub fn new(host: impl Into<String>, domain: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            domain: domain.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for RouteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.host, self.domain, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_parse() {
        let route = RouteSpec::parse("MyApp.example.com/api/").unwrap();
        assert_eq!(route.host, "myapp");
        assert_eq!(route.domain, "example.com");
        assert_eq!(route.path, "/api");
        assert_eq!(route.to_string(), "myapp.example.com/api");
    }

    #[test]
    fn test_route_parse_without_path() {
        let route = RouteSpec::parse("https://foo.apps.internal").unwrap();
        assert_eq!(route, RouteSpec::new("foo", "apps.internal", ""));
    }

    #[test]
    fn test_route_parse_invalid() {
        assert!(RouteSpec::parse("localhost").is_err());
        assert!(RouteSpec::parse(".example.com").is_err());
    }

    #[test]
    fn test_health_check_type_parse() {
        assert_eq!("HTTP".parse::<HealthCheckType>(), Ok(HealthCheckType::Http));
        assert_eq!("none".parse::<HealthCheckType>(), Ok(HealthCheckType::Process));
        assert!("tcp".parse::<HealthCheckType>().is_err());
    }

    #[test]
    fn test_docker_credentials_debug_redacts_password() {
        let creds = DockerCredentials {
            username: String::from("ci"),
            password: Some(String::from("hunter2")),
        };
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("ci"));
        assert!(!rendered.contains("hunter2"));
    }
}
