// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Pushdeck
//!
//! A declarative, idempotent push engine for applications on a multi-tenant
//! application platform.
//!
//! ## Overview
//!
//! A push takes the application described by command-line flags and an
//! optional `manifest.yml`, compares it with what the platform runs, and
//! applies only the changes needed:
//!
//! - Create or update the application record
//! - Create, bind and unmap routes
//! - Upload the application bits when their digest changed
//! - Start or restart the application and wait for its instances
//!
//! ## Architecture
//!
//! Each push flows through a fixed pipeline:
//!
//! 1. **Merge**: command-line settings override the manifest entry
//! 2. **Read**: the platform's actual state of the application
//! 3. **Plan**: an ordered list of changes from desired vs. actual
//! 4. **Execute**: apply the changes, streaming events
//! 5. **Poll**: wait for staging and instances to settle
//!
//! ## Modules
//!
//! - [`config`]: Manifest parsing, settings merging and validation
//! - [`bits`]: Bits archiving and digests
//! - [`platform`]: Platform API client, state reader and poller
//! - [`planner`]: Diff computation, planning and execution
//! - [`events`]: The push event stream
//! - [`state`]: Local push records and locks
//! - [`push`]: The push pipeline
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! applications:
//!   - name: my-app
//!     memory: 256M
//!     instances: 2
//!     buildpacks:
//!       - go_buildpack
//!     routes:
//!       - route: my-app.example.com
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod bits;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod planner;
pub mod platform;
pub mod push;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{CommandLineSettings, DesiredApplication, ManifestParser, PlatformConfig};
pub use error::{PushError, Result};
pub use events::{EventStream, ExecutionEvent};
pub use planner::{Change, Executor, Plan, Planner};
pub use platform::{PlatformApi, PlatformClient, Poller, StateReader};
pub use push::{PushHandle, PushOptions, PushOutcome, PushPipeline};
pub use state::{LocalRecordStore, RecordStore};
