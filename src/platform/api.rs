//! The platform API seam.
//!
//! Everything the push engine needs from the platform goes through
//! [`PlatformApi`], so the engine can run against the HTTP client, an
//! in-memory fake, or a mock.

use async_trait::async_trait;
use std::sync::Arc;

use crate::bits::BitsArchive;
use crate::config::RouteSpec;
use crate::error::Result;

use super::types::{ActualApplication, AppFields, InstanceSnapshot, Route, Warned};

/// Callback receiving `(bytes_sent, total_bytes)` while an upload streams.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Remote operations of the application platform.
///
/// Every call returns the platform's warnings alongside its value.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// Looks an application up by name within a space.
    ///
    /// # Errors
    ///
    /// Returns an error on transport or authorization failures. A missing
    /// application is `Ok` with `None`.
    async fn get_application_by_name(
        &self,
        space: &str,
        name: &str,
    ) -> Result<Warned<Option<ActualApplication>>>;

    /// Fetches an application by GUID.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the application is gone.
    async fn get_application(&self, guid: &str) -> Result<Warned<ActualApplication>>;

    /// Lists the routes bound to an application.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn get_application_routes(&self, guid: &str) -> Result<Warned<Vec<Route>>>;

    /// Looks a route up platform-wide.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails. A missing route is `Ok` with `None`.
    async fn find_route(&self, route: &RouteSpec) -> Result<Warned<Option<Route>>>;

    /// Creates an application in a space.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform refuses the application.
    async fn create_application(
        &self,
        space: &str,
        fields: &AppFields,
    ) -> Result<Warned<ActualApplication>>;

    /// Updates the given fields of an application.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform refuses the update.
    async fn update_application(
        &self,
        guid: &str,
        fields: &AppFields,
    ) -> Result<Warned<ActualApplication>>;

    /// Creates a route in a space.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform refuses the route.
    async fn create_route(&self, space: &str, route: &RouteSpec) -> Result<Warned<Route>>;

    /// Binds a route to an application.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform refuses the binding.
    async fn bind_route(&self, app_guid: &str, route_guid: &str) -> Result<Warned<()>>;

    /// Removes a route from an application without deleting the route.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform refuses the unmapping.
    async fn unmap_route(&self, app_guid: &str, route_guid: &str) -> Result<Warned<()>>;

    /// Streams a bits archive to an application.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive cannot be read or the upload fails.
    async fn upload_package(
        &self,
        app_guid: &str,
        archive: &BitsArchive,
        progress: ProgressFn,
    ) -> Result<Warned<()>>;

    /// Starts a stopped application.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform refuses the start.
    async fn start_application(&self, guid: &str) -> Result<Warned<()>>;

    /// Restarts an application, restaging if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform refuses the restart.
    async fn restart_application(&self, guid: &str) -> Result<Warned<()>>;

    /// Fetches per-instance stats.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn get_instance_stats(&self, guid: &str) -> Result<Warned<Vec<InstanceSnapshot>>>;
}
