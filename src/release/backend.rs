//! Deployment backend trait definitions.
//!
//! This module defines the interfaces the controller needs from the
//! system that actually runs releases, and from chart resolution.

use async_trait::async_trait;

use crate::error::ReleaseResult;
use crate::resource::ChartRef;

use super::types::{
    DeleteOutcome, DeleteRequest, InstallRequest, ListFilter, ObservedRelease, PackagedChart,
    UpdateRequest,
};

/// Trait for deployment backends.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeploymentBackend: Send + Sync {
    /// Lists releases matching a name filter and status set.
    async fn list_releases(&self, filter: &ListFilter) -> ReleaseResult<Vec<ObservedRelease>>;

    /// Installs a new release.
    async fn install_release(&self, request: &InstallRequest) -> ReleaseResult<ObservedRelease>;

    /// Updates an existing release.
    async fn update_release(&self, request: &UpdateRequest) -> ReleaseResult<ObservedRelease>;

    /// Deletes a release.
    async fn delete_release(&self, request: &DeleteRequest) -> ReleaseResult<DeleteOutcome>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

/// Trait for resolving chart references to packages.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChartResolver: Send + Sync {
    /// Resolves a chart reference.
    ///
    /// Fails with a resolution error when the chart or repository is unknown.
    async fn resolve(&self, chart: &ChartRef) -> ReleaseResult<PackagedChart>;
}
