//! Deployment backend integration.
//!
//! This module provides:
//! - The backend and chart resolver traits
//! - An HTTP client implementing both
//! - The release lifecycle manager used by the reconciler
//! - Value override rendering

mod backend;
mod client;
mod lifecycle;
mod types;
mod values;

#[cfg(test)]
pub use backend::{MockChartResolver, MockDeploymentBackend};
pub use backend::{ChartResolver, DeploymentBackend};
pub use client::{HttpBackend, STABLE_REPO_NAME, STABLE_REPO_URL};
pub use lifecycle::ReleaseManager;
pub use types::{
    DeleteOutcome, DeleteRequest, InstallRequest, ListFilter, ObservedRelease, PackagedChart,
    StatusCode, UpdateRequest,
};
pub use values::render_values;
