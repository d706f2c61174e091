// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention
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
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity
#![cfg_attr(not(test), warn(clippy::expect_used))] // expect() warning outside tests

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # chartmgr
//!
//! A reconciliation controller that drives chart releases toward the state
//! operators declare.
//!
//! ## Overview
//!
//! Each desired-state object names a chart, value overrides and lifecycle
//! options. For every change to such an object the controller:
//!
//! - Computes the release name (explicit override or `chartmgr-rls-<uid>`)
//! - Removes an orphaned release left behind by an earlier name
//! - Installs the release if absent, updates it otherwise
//! - Waits for the backend to report it deployed
//! - Writes the outcome back as the object's status
//!
//! Deleting the object deletes the release, unless `createOnly` is set.
//!
//! ## Modules
//!
//! - [`resource`]: Desired-state types, release naming and validation
//! - [`release`]: Deployment backend traits, HTTP client and lifecycle operations
//! - [`convergence`]: Convergence polling, clock and shutdown
//! - [`status`]: Release state mapping and status write-back
//! - [`store`]: Desired-state stores and change feeds
//! - [`reconciler`]: The per-event reconciliation decisions
//! - [`controller`]: Change feed dispatch and liveness endpoint
//! - [`config`]: Controller configuration
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! metadata:
//!   name: web
//!   namespace: frontend
//! spec:
//!   chart:
//!     name: nginx
//!     version: 1.2.0
//!     repository:
//!       name: bitnami
//!       url: https://charts.bitnami.com/bitnami
//!   values:
//!     - name: image.tag
//!       value: stable
//!   options:
//!     createOnly: false
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod controller;
pub mod convergence;
pub mod error;
pub mod reconciler;
pub mod release;
pub mod resource;
pub mod status;
pub mod store;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ControllerConfig};
pub use controller::{Controller, LivenessServer};
pub use convergence::{ConvergenceMonitor, Shutdown};
pub use error::{ChartMgrError, Result};
pub use reconciler::{ReconcileOutcome, ReconcileSettings, Reconciler};
pub use release::{HttpBackend, ReleaseManager};
pub use resource::{compute_release_name, DesiredRelease, ReconciliationStatus};
pub use store::{LocalResourceStore, MemoryResourceStore, ResourceStore};
