//! Reading the platform's current view of an application.

use tracing::{debug, info};

use crate::config::RouteSpec;
use crate::error::Result;

use super::api::PlatformApi;
use super::types::{ActualApplication, RouteCatalog, Warned};

/// Fetches actual application state from the platform.
#[derive(Debug)]
pub struct StateReader<'a, A: PlatformApi + ?Sized> {
    /// Platform API.
    api: &'a A,
}

impl<'a, A: PlatformApi + ?Sized> StateReader<'a, A> {
    /// Creates a new state reader.
    #[must_use]
    pub const fn new(api: &'a A) -> Self {
        Self { api }
    }

    /// Fetches an application by name, with its routes and instance stats.
    ///
    /// A missing application is `Ok` with `None`; that is a planning signal,
    /// not a failure. Warnings from every call are collected in order.
    ///
    /// # Errors
    ///
    /// Returns an error on transport or authorization failures.
    pub async fn fetch(
        &self,
        name: &str,
        space: &str,
    ) -> Result<Warned<Option<ActualApplication>>> {
        let found = self.api.get_application_by_name(space, name).await?;
        let mut warnings = found.warnings;

        let Some(mut app) = found.value else {
            info!("Application '{}' not found in space {}", name, space);
            return Ok(Warned::with_warnings(None, warnings));
        };

        debug!("Found application '{}' ({}), state {}", name, app.guid, app.state);

        let routes = self.api.get_application_routes(&app.guid).await?;
        warnings.extend(routes.warnings);
        app.routes = routes.value;

        let stats = self.api.get_instance_stats(&app.guid).await?;
        warnings.extend(stats.warnings);
        app.instance_stats = stats.value;

        Ok(Warned::with_warnings(Some(app), warnings))
    }

    /// Looks up which of the given routes already exist platform-wide.
    ///
    /// # Errors
    ///
    /// Returns an error if a lookup fails.
    pub async fn fetch_route_catalog(&self, routes: &[RouteSpec]) -> Result<Warned<RouteCatalog>> {
        let mut catalog = RouteCatalog::new();
        let mut warnings = Vec::new();

        for route in routes {
            if catalog.contains(route) {
                continue;
            }
            let found = self.api.find_route(route).await?;
            warnings.extend(found.warnings);
            if let Some(existing) = found.value {
                debug!("Route {} exists ({})", route, existing.guid);
                catalog.insert(route.clone(), existing.guid);
            }
        }

        Ok(Warned::with_warnings(catalog, warnings))
    }
}
