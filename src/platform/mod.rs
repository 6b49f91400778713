//! Platform integration module.
//!
//! This module provides everything that talks to the application platform:
//! - The [`PlatformApi`] trait the engine depends on
//! - [`PlatformClient`], its HTTP implementation
//! - [`StateReader`] for the actual application state
//! - [`Poller`] for waiting on staging and instances

mod api;
mod client;
mod poller;
mod reader;
mod types;

pub use api::{PlatformApi, ProgressFn};
pub use client::{PlatformClient, WARNINGS_HEADER};
pub use poller::{DEFAULT_WAIT_TIMEOUT, PollConfig, PollPhase, PollStatus, Poller};
pub use reader::StateReader;
pub use types::{
    ActualApplication, AppFields, AppState, InstanceSnapshot, InstanceState, PackageState, Route,
    RouteCatalog, Warned,
};
