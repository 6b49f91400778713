//! Push plan types and construction.
//!
//! A [`Plan`] is the ordered list of [`Change`]s that takes the platform from
//! its actual state to the desired one. [`Planner`] builds it from a diff.

use serde::Serialize;
use std::fmt;
use tracing::debug;

use crate::config::{DesiredApplication, RouteSpec};
use crate::platform::{ActualApplication, AppFields, AppState, RouteCatalog};

use super::diff::{DiffDetail, DiffEngine};

/// One remote action of a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Change {
    /// Create the application with every desired field.
    CreateApplication {
        /// Fields of the new application.
        fields: AppFields,
    },
    /// Update the fields that differ.
    UpdateApplication {
        /// Fields to change.
        fields: AppFields,
        /// What changed, for display.
        details: Vec<DiffDetail>,
    },
    /// Create a route that does not exist anywhere on the platform yet.
    CreateRoute {
        /// Route to create.
        route: RouteSpec,
    },
    /// Bind a route to the application.
    BindRoute {
        /// Route to bind.
        route: RouteSpec,
    },
    /// Remove a route from the application, keeping the route itself.
    UnmapRoute {
        /// Route to unmap.
        route: RouteSpec,
        /// GUID of the bound route.
        route_guid: String,
    },
    /// Upload the bits archive.
    UploadPackage {
        /// Digest of the bits being uploaded.
        digest: Option<String>,
    },
    /// Start the application.
    StartApplication,
    /// Restart the application so changes take effect.
    RestartApplication,
}

/// What the platform returned for an applied change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ChangeResult {
    /// The application was created.
    ApplicationCreated {
        /// GUID of the new application.
        guid: String,
    },
    /// The application was updated.
    ApplicationUpdated,
    /// The route was created.
    RouteCreated {
        /// GUID of the new route.
        guid: String,
    },
    /// The route was bound.
    RouteBound,
    /// The route was unmapped.
    RouteUnmapped,
    /// The bits were uploaded.
    PackageUploaded {
        /// Archive size in bytes.
        bytes: u64,
        /// Attempts it took.
        attempts: u32,
    },
    /// The application was started.
    ApplicationStarted,
    /// The application was restarted.
    ApplicationRestarted,
}

/// An ordered push plan for one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    /// Application name.
    pub application: String,
    /// Changes in execution order.
    pub changes: Vec<Change>,
}

/// Builds plans from desired and actual state.
#[derive(Debug, Default, Clone, Copy)]
pub struct Planner {
    diff: DiffEngine,
}

impl Planner {
    /// Creates a new planner.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            diff: DiffEngine::new(),
        }
    }

    /// Plans the changes that bring `actual` to `desired`.
    ///
    /// `actual` is `None` when the application does not exist. `catalog`
    /// lists which desired routes already exist platform-wide.
    #[must_use]
    pub fn plan(
        &self,
        desired: &DesiredApplication,
        actual: Option<&ActualApplication>,
        catalog: &RouteCatalog,
    ) -> Plan {
        let diff = self.diff.compute_diff(desired, actual);
        let mut changes = Vec::new();

        match actual {
            None => changes.push(Change::CreateApplication {
                fields: diff.fields.clone(),
            }),
            Some(_) if diff.has_field_changes() => changes.push(Change::UpdateApplication {
                fields: diff.fields.clone(),
                details: diff.details.clone(),
            }),
            Some(_) => {}
        }

        for route in &diff.routes_added {
            if !catalog.contains(route) {
                changes.push(Change::CreateRoute {
                    route: route.clone(),
                });
            }
        }
        for route in &diff.routes_added {
            changes.push(Change::BindRoute {
                route: route.clone(),
            });
        }
        for route in &diff.routes_removed {
            changes.push(Change::UnmapRoute {
                route: route.spec(),
                route_guid: route.guid.clone(),
            });
        }

        if diff.upload_needed {
            changes.push(Change::UploadPackage {
                digest: desired.bits_digest.clone(),
            });
        }

        let deployed = actual.is_none() || diff.has_field_changes() || diff.upload_needed;
        let terminal = match actual.map(|a| a.state) {
            None | Some(AppState::Stopped) => Some(Change::StartApplication),
            Some(AppState::Crashed) => Some(Change::RestartApplication),
            Some(AppState::Started | AppState::Staging) if deployed => {
                Some(Change::RestartApplication)
            }
            Some(AppState::Started | AppState::Staging) => None,
        };
        changes.extend(terminal);

        debug!("Planned {} changes for {}", changes.len(), desired.name);

        Plan {
            application: desired.name.clone(),
            changes,
        }
    }
}

impl Plan {
    /// Creates an empty plan.
    #[must_use]
    pub fn empty(application: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            changes: Vec::new(),
        }
    }

    /// Returns true if the plan is empty (no changes).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Returns the number of changes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns true if the plan starts or restarts the application.
    #[must_use]
    pub fn starts_application(&self) -> bool {
        self.changes.iter().any(|c| {
            matches!(
                c,
                Change::StartApplication | Change::RestartApplication
            )
        })
    }

    /// Returns true if the plan uploads bits.
    #[must_use]
    pub fn uploads_bits(&self) -> bool {
        self.changes
            .iter()
            .any(|c| matches!(c, Change::UploadPackage { .. }))
    }

    /// Returns the number of changes of each kind, by kind name.
    #[must_use]
    pub fn count_of(&self, kind: &str) -> usize {
        self.changes.iter().filter(|c| c.kind() == kind).count()
    }
}

impl Change {
    /// Returns the short kind name of the change.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CreateApplication { .. } => "create-app",
            Self::UpdateApplication { .. } => "update-app",
            Self::CreateRoute { .. } => "create-route",
            Self::BindRoute { .. } => "bind-route",
            Self::UnmapRoute { .. } => "unmap-route",
            Self::UploadPackage { .. } => "upload",
            Self::StartApplication => "start",
            Self::RestartApplication => "restart",
        }
    }

    /// Returns a human-readable description of the change.
    #[must_use]
    pub fn description(&self, application: &str) -> String {
        match self {
            Self::CreateApplication { fields } => format!("Create application '{}'", fields.name),
            Self::UpdateApplication { details, .. } => {
                let fields: Vec<_> = details.iter().map(|d| d.field.as_str()).collect();
                format!(
                    "Update application '{application}' ({})",
                    fields.join(", ")
                )
            }
            Self::CreateRoute { route } => format!("Create route {route}"),
            Self::BindRoute { route } => format!("Bind route {route} to '{application}'"),
            Self::UnmapRoute { route, .. } => format!("Unmap route {route} from '{application}'"),
            Self::UploadPackage { digest } => match digest {
                Some(d) => format!("Upload bits ({})", &d[..12.min(d.len())]),
                None => String::from("Upload bits"),
            },
            Self::StartApplication => format!("Start application '{application}'"),
            Self::RestartApplication => format!("Restart application '{application}'"),
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateApplication { fields } => write!(f, "{} {}", self.kind(), fields.name),
            Self::CreateRoute { route }
            | Self::BindRoute { route }
            | Self::UnmapRoute { route, .. } => write!(f, "{} {route}", self.kind()),
            _ => write!(f, "{}", self.kind()),
        }
    }
}

impl fmt::Display for ChangeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApplicationCreated { guid } => write!(f, "created ({guid})"),
            Self::ApplicationUpdated => write!(f, "updated"),
            Self::RouteCreated { guid } => write!(f, "route created ({guid})"),
            Self::RouteBound => write!(f, "bound"),
            Self::RouteUnmapped => write!(f, "unmapped"),
            Self::PackageUploaded { bytes, attempts } => {
                write!(f, "uploaded {bytes} bytes")?;
                if *attempts > 1 {
                    write!(f, " after {attempts} attempts")?;
                }
                Ok(())
            }
            Self::ApplicationStarted => write!(f, "started"),
            Self::ApplicationRestarted => write!(f, "restarted"),
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.changes.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Push Plan for '{}' ({} changes):", self.application, self.changes.len())?;
        for (i, change) in self.changes.iter().enumerate() {
            writeln!(f, "  {}. {}", i + 1, change.description(&self.application))?;
        }
        Ok(())
    }
}
