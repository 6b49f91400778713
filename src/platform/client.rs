//! Platform API client implementation.
//!
//! This module provides the HTTP client for the platform's JSON REST API.
//! Reads are retried on transient failures; mutations are sent once.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode, header};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{debug, trace};

use crate::bits::{BitsArchive, CHUNK_SIZE};
use crate::config::{PlatformConfig, RouteSpec};
use crate::error::{PlatformError, PushError, Result};

use super::api::{PlatformApi, ProgressFn};
use super::types::{ActualApplication, AppFields, InstanceSnapshot, Route, Warned};

/// Response header carrying platform warnings, one per value.
pub const WARNINGS_HEADER: &str = "x-platform-warnings";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Slowest upload rate, in bytes per second, that still completes in time.
const MIN_UPLOAD_BYTES_PER_SEC: u64 = 64 * 1024;

/// Maximum number of attempts for reads.
const MAX_RETRIES: u32 = 3;

/// Delay between retries in milliseconds.
const RETRY_DELAY_MS: u64 = 1000;

/// Platform API client.
#[derive(Debug, Clone)]
pub struct PlatformClient {
    /// HTTP client, sharing one connection pool across clones.
    client: Client,
    /// API base URL without trailing slash.
    base_url: String,
    /// Bearer token.
    token: String,
    /// Deadline for a read or mutation, and the connect deadline for all requests.
    timeout: Duration,
}

/// Paginated list envelope.
#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    resources: Vec<T>,
}

/// Error envelope.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    title: String,
    #[serde(default)]
    detail: String,
}

#[derive(Debug, Serialize)]
struct CreateAppRequest<'a> {
    space_guid: &'a str,
    #[serde(flatten)]
    fields: &'a AppFields,
    #[serde(skip_serializing_if = "Option::is_none")]
    docker_username: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    docker_password: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct UpdateAppRequest<'a> {
    #[serde(flatten)]
    fields: &'a AppFields,
    #[serde(skip_serializing_if = "Option::is_none")]
    docker_username: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    docker_password: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct CreateRouteRequest<'a> {
    space_guid: &'a str,
    host: &'a str,
    domain: &'a str,
    path: &'a str,
}

#[derive(Debug, Serialize)]
struct DestinationRequest<'a> {
    app_guid: &'a str,
}

impl PlatformClient {
    /// Creates a new platform API client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: &PlatformConfig) -> Result<Self> {
        Self::with_timeout(config, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client with a custom timeout.
    ///
    /// The timeout bounds connecting and every read or mutation. Bits uploads
    /// get a deadline sized to the archive instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(config: &PlatformConfig, timeout_secs: u64) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs);
        let client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| PlatformError::transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorized(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
            .header(header::ACCEPT, "application/json")
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.authorized(method, path).timeout(self.timeout)
    }

    /// Deadline for streaming `bytes` of bits at the slowest accepted rate.
    fn upload_timeout(&self, bytes: u64) -> Duration {
        self.timeout + Duration::from_secs(bytes.div_ceil(MIN_UPLOAD_BYTES_PER_SEC))
    }

    /// Executes a GET, retrying transient failures.
    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        resource: &str,
        id: &str,
    ) -> Result<Warned<T>> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                debug!("Retry attempt {attempt} of {MAX_RETRIES} for GET {path}");
                tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS * u64::from(attempt)))
                    .await;
            }

            let request = self.request(reqwest::Method::GET, path).query(query);
            match self.send_once(request, resource, id).await {
                Ok(response) => return Self::parse_json(response).await,
                Err(e) => {
                    if e.is_retryable() {
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            PushError::Platform(PlatformError::transport("Max retries exceeded"))
        }))
    }

    /// Sends a mutation once and parses its JSON body.
    async fn mutate<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        resource: &str,
        id: &str,
    ) -> Result<Warned<T>> {
        let response = self.send_once(request, resource, id).await?;
        Self::parse_json(response).await
    }

    /// Sends a mutation once, ignoring its body.
    async fn mutate_empty(
        &self,
        request: RequestBuilder,
        resource: &str,
        id: &str,
    ) -> Result<Warned<()>> {
        let response = self.send_once(request, resource, id).await?;
        Ok(Warned::with_warnings((), extract_warnings(&response)))
    }

    /// Sends a single request and maps failure statuses to errors.
    async fn send_once(
        &self,
        request: RequestBuilder,
        resource: &str,
        id: &str,
    ) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| PlatformError::transport(format!("Request failed: {e}")))?;

        let status = response.status();
        trace!("{} {} -> {}", resource, id, status);

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or_default();
            let retry_after = if retry_after == 0 { 60 } else { retry_after };

            return Err(PushError::Platform(PlatformError::RateLimited {
                retry_after_secs: retry_after,
            }));
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let message = error_message(response).await;
            return Err(PushError::Platform(PlatformError::AuthenticationFailed {
                message: if message.is_empty() {
                    String::from("Invalid or expired token")
                } else {
                    message
                },
            }));
        }

        if status == StatusCode::NOT_FOUND {
            return Err(PushError::Platform(PlatformError::NotFound {
                resource: resource.to_string(),
                guid: id.to_string(),
            }));
        }

        if status.is_server_error() {
            let message = error_message(response).await;
            return Err(PushError::Platform(PlatformError::transport(format!(
                "Server error {}: {message}",
                status.as_u16()
            ))));
        }

        if !status.is_success() {
            let message = error_message(response).await;
            return Err(PushError::Platform(PlatformError::rejected(
                status.as_u16(),
                message,
            )));
        }

        Ok(response)
    }

    async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<Warned<T>> {
        let warnings = extract_warnings(&response);
        let value = response.json::<T>().await.map_err(|e| {
            PushError::Platform(PlatformError::InvalidResponse {
                message: format!("Failed to parse response: {e}"),
            })
        })?;
        Ok(Warned::with_warnings(value, warnings))
    }
}

/// Collects warnings from the response headers, verbatim and in order.
fn extract_warnings(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(WARNINGS_HEADER)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|w| !w.is_empty())
        .map(String::from)
        .collect()
}

/// Extracts the human-readable message from an error body.
async fn error_message(response: Response) -> String {
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(parsed) if !parsed.errors.is_empty() => parsed
            .errors
            .iter()
            .map(|e| if e.detail.is_empty() { e.title.as_str() } else { e.detail.as_str() })
            .collect::<Vec<_>>()
            .join("; "),
        _ => body,
    }
}

fn docker_password(fields: &AppFields) -> Option<&str> {
    fields
        .docker_credentials
        .as_ref()
        .and_then(|c| c.password.as_deref())
}

#[async_trait]
impl PlatformApi for PlatformClient {
    async fn get_application_by_name(
        &self,
        space: &str,
        name: &str,
    ) -> Result<Warned<Option<ActualApplication>>> {
        debug!("Looking up application '{}' in space {}", name, space);
        let list: Result<Warned<ListResponse<ActualApplication>>> = self
            .get(
                "/v3/apps",
                &[("names", name), ("space_guids", space)],
                "Application",
                name,
            )
            .await;
        match list {
            Ok(list) => Ok(list.map(|l| l.resources.into_iter().next())),
            Err(PushError::Platform(PlatformError::NotFound { .. })) => Ok(Warned::new(None)),
            Err(e) => Err(e),
        }
    }

    async fn get_application(&self, guid: &str) -> Result<Warned<ActualApplication>> {
        self.get(&format!("/v3/apps/{guid}"), &[], "Application", guid)
            .await
    }

    async fn get_application_routes(&self, guid: &str) -> Result<Warned<Vec<Route>>> {
        let list: Warned<ListResponse<Route>> = self
            .get(&format!("/v3/apps/{guid}/routes"), &[], "Application", guid)
            .await?;
        Ok(list.map(|l| l.resources))
    }

    async fn find_route(&self, route: &RouteSpec) -> Result<Warned<Option<Route>>> {
        let id = route.to_string();
        let list: Warned<ListResponse<Route>> = self
            .get(
                "/v3/routes",
                &[
                    ("hosts", route.host.as_str()),
                    ("domains", route.domain.as_str()),
                    ("paths", route.path.as_str()),
                ],
                "Route",
                &id,
            )
            .await?;
        Ok(list.map(|l| l.resources.into_iter().next()))
    }

    async fn create_application(
        &self,
        space: &str,
        fields: &AppFields,
    ) -> Result<Warned<ActualApplication>> {
        debug!("Creating application '{}'", fields.name);
        let body = CreateAppRequest {
            space_guid: space,
            fields,
            docker_username: fields.docker_username(),
            docker_password: docker_password(fields),
        };
        let request = self.request(reqwest::Method::POST, "/v3/apps").json(&body);
        self.mutate(request, "Application", &fields.name).await
    }

    async fn update_application(
        &self,
        guid: &str,
        fields: &AppFields,
    ) -> Result<Warned<ActualApplication>> {
        debug!("Updating application {}", guid);
        let body = UpdateAppRequest {
            fields,
            docker_username: fields.docker_username(),
            docker_password: docker_password(fields),
        };
        let request = self
            .request(reqwest::Method::PATCH, &format!("/v3/apps/{guid}"))
            .json(&body);
        self.mutate(request, "Application", guid).await
    }

    async fn create_route(&self, space: &str, route: &RouteSpec) -> Result<Warned<Route>> {
        debug!("Creating route {}", route);
        let body = CreateRouteRequest {
            space_guid: space,
            host: &route.host,
            domain: &route.domain,
            path: &route.path,
        };
        let request = self.request(reqwest::Method::POST, "/v3/routes").json(&body);
        self.mutate(request, "Route", &route.to_string()).await
    }

    async fn bind_route(&self, app_guid: &str, route_guid: &str) -> Result<Warned<()>> {
        debug!("Binding route {} to application {}", route_guid, app_guid);
        let request = self
            .request(
                reqwest::Method::POST,
                &format!("/v3/routes/{route_guid}/destinations"),
            )
            .json(&DestinationRequest { app_guid });
        self.mutate_empty(request, "Route", route_guid).await
    }

    async fn unmap_route(&self, app_guid: &str, route_guid: &str) -> Result<Warned<()>> {
        debug!("Unmapping route {} from application {}", route_guid, app_guid);
        let request = self.request(
            reqwest::Method::DELETE,
            &format!("/v3/routes/{route_guid}/destinations/{app_guid}"),
        );
        self.mutate_empty(request, "Route", route_guid).await
    }

    async fn upload_package(
        &self,
        app_guid: &str,
        archive: &BitsArchive,
        progress: ProgressFn,
    ) -> Result<Warned<()>> {
        debug!(
            "Uploading {} bytes of bits to application {}",
            archive.size(),
            app_guid
        );

        let file = tokio::fs::File::open(archive.path()).await?;
        let total = archive.size();
        let mut sent = 0u64;
        let stream = ReaderStream::with_capacity(file, CHUNK_SIZE).map(move |chunk| {
            if let Ok(bytes) = &chunk {
                sent += bytes.len() as u64;
                progress(sent, total);
            }
            chunk
        });

        let request = self
            .authorized(reqwest::Method::POST, &format!("/v3/apps/{app_guid}/bits"))
            .timeout(self.upload_timeout(total))
            .header(header::CONTENT_TYPE, "application/zip")
            .header(header::CONTENT_LENGTH, total)
            .header("x-bits-digest", archive.digest())
            .body(reqwest::Body::wrap_stream(stream));

        self.mutate_empty(request, "Application", app_guid).await
    }

    async fn start_application(&self, guid: &str) -> Result<Warned<()>> {
        debug!("Starting application {}", guid);
        let request = self.request(
            reqwest::Method::POST,
            &format!("/v3/apps/{guid}/actions/start"),
        );
        self.mutate_empty(request, "Application", guid).await
    }

    async fn restart_application(&self, guid: &str) -> Result<Warned<()>> {
        debug!("Restarting application {}", guid);
        let request = self.request(
            reqwest::Method::POST,
            &format!("/v3/apps/{guid}/actions/restart"),
        );
        self.mutate_empty(request, "Application", guid).await
    }

    async fn get_instance_stats(&self, guid: &str) -> Result<Warned<Vec<InstanceSnapshot>>> {
        let list: Warned<ListResponse<InstanceSnapshot>> = self
            .get(&format!("/v3/apps/{guid}/instances"), &[], "Application", guid)
            .await?;
        Ok(list.map(|l| l.resources))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PlatformConfig {
        PlatformConfig {
            api_url: String::from("https://api.example.com/"),
            token: String::from("token"),
            space: String::from("space"),
        }
    }

    #[test]
    fn test_client_creation() {
        let client = PlatformClient::new(&config()).unwrap();
        assert_eq!(client.url("/v3/apps"), "https://api.example.com/v3/apps");
    }

    #[test]
    fn test_upload_deadline_grows_with_archive() {
        let client = PlatformClient::with_timeout(&config(), 30).unwrap();
        assert_eq!(client.upload_timeout(0), Duration::from_secs(30));
        assert_eq!(client.upload_timeout(1), Duration::from_secs(31));
        assert_eq!(
            client.upload_timeout(100 * 1024 * 1024),
            Duration::from_secs(30 + 1600)
        );
    }

    #[test]
    fn test_create_request_flattens_fields() {
        let fields = AppFields {
            name: String::from("foo"),
            memory_mb: Some(256),
            ..AppFields::default()
        };
        let body = CreateAppRequest {
            space_guid: "space",
            fields: &fields,
            docker_username: None,
            docker_password: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"space_guid": "space", "name": "foo", "memory_mb": 256})
        );
    }
}
