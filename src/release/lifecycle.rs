//! Release lifecycle operations.
//!
//! `ReleaseManager` wraps one deployment backend and performs exactly one
//! bounded remote call per operation. It never retries.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::error::{ReleaseError, ReleaseResult};
use crate::resource::ValuePair;

use super::backend::DeploymentBackend;
use super::types::{
    DeleteOutcome, DeleteRequest, InstallRequest, ListFilter, ObservedRelease, PackagedChart,
    StatusCode, UpdateRequest,
};

/// Default bound on a query call.
const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Performs install, update, delete and query against a backend.
#[derive(Clone)]
pub struct ReleaseManager {
    /// Deployment backend.
    backend: Arc<dyn DeploymentBackend>,
    /// Bound on query calls.
    query_timeout: Duration,
}

impl std::fmt::Debug for ReleaseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseManager")
            .field("backend", &self.backend.backend_type())
            .field("query_timeout", &self.query_timeout)
            .finish()
    }
}

impl ReleaseManager {
    /// Creates a manager over the given backend.
    #[must_use]
    pub fn new(backend: Arc<dyn DeploymentBackend>) -> Self {
        Self {
            backend,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    /// Sets the bound on query calls.
    #[must_use]
    pub const fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Installs a new release, reusing the name of a deleted one and waiting
    /// for its resources.
    ///
    /// # Errors
    ///
    /// Returns the backend error, or `Timeout` if the call outlives `timeout`.
    #[instrument(skip(self, chart, values), fields(chart = %chart.reference()))]
    pub async fn install(
        &self,
        chart: &PackagedChart,
        name: &str,
        namespace: &str,
        values: &[ValuePair],
        timeout: Duration,
    ) -> ReleaseResult<ObservedRelease> {
        let request = InstallRequest {
            chart: chart.clone(),
            name: name.to_string(),
            namespace: namespace.to_string(),
            values: values.to_vec(),
            reuse_name: true,
            wait: true,
            timeout,
        };

        let release = bounded(name, "install", timeout, self.backend.install_release(&request)).await?;
        info!("Installed release {name} (status {})", release.status);
        Ok(release)
    }

    /// Updates an existing release.
    ///
    /// # Errors
    ///
    /// Returns the backend error, or `Timeout` if the call outlives `timeout`.
    #[instrument(skip(self, chart, values), fields(chart = %chart.reference()))]
    pub async fn update(
        &self,
        name: &str,
        chart: &PackagedChart,
        values: &[ValuePair],
        timeout: Duration,
    ) -> ReleaseResult<ObservedRelease> {
        let request = UpdateRequest {
            name: name.to_string(),
            chart: chart.clone(),
            values: values.to_vec(),
            wait: true,
            timeout,
        };

        let release = bounded(name, "update", timeout, self.backend.update_release(&request)).await?;
        info!("Updated release {name} (status {})", release.status);
        Ok(release)
    }

    /// Deletes and purges a release. Returns `None` if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns the backend error, or `Timeout` if the call outlives `timeout`.
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str, timeout: Duration) -> ReleaseResult<Option<ObservedRelease>> {
        let request = DeleteRequest {
            name: name.to_string(),
            purge: true,
            timeout,
        };

        match bounded(name, "delete", timeout, self.backend.delete_release(&request)).await? {
            DeleteOutcome::Deleted(release) => {
                info!("Deleted release {name}");
                Ok(Some(release))
            }
            DeleteOutcome::NotFound => {
                debug!("Release {name} not found, nothing to delete");
                Ok(None)
            }
        }
    }

    /// Looks up the live release with this name.
    ///
    /// # Errors
    ///
    /// Returns `AmbiguousRelease` if more than one release matches, the
    /// backend error, or `Timeout`.
    pub async fn query(&self, name: &str) -> ReleaseResult<Option<ObservedRelease>> {
        let filter = ListFilter {
            name: name.to_string(),
            statuses: StatusCode::LIVE.to_vec(),
        };

        let mut releases = bounded(
            name,
            "answer a query",
            self.query_timeout,
            self.backend.list_releases(&filter),
        )
        .await?;

        if releases.len() > 1 {
            return Err(ReleaseError::AmbiguousRelease {
                name: name.to_string(),
                count: releases.len(),
            });
        }

        debug!("Query for {name} matched {} release(s)", releases.len());
        Ok(releases.pop())
    }

    /// Gets the backend type name.
    #[must_use]
    pub fn backend_type(&self) -> &'static str {
        self.backend.backend_type()
    }
}

async fn bounded<T>(
    name: &str,
    operation: &str,
    limit: Duration,
    call: impl Future<Output = ReleaseResult<T>>,
) -> ReleaseResult<T> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| ReleaseError::Timeout {
            name: name.to_string(),
            operation: operation.to_string(),
            waited: limit,
        })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::backend::MockDeploymentBackend;

    fn observed(name: &str, status: StatusCode) -> ObservedRelease {
        ObservedRelease {
            name: name.to_string(),
            namespace: String::from("default"),
            chart: String::from("nginx-1.0.0"),
            revision: 1,
            status,
        }
    }

    fn packaged() -> PackagedChart {
        PackagedChart {
            name: String::from("nginx"),
            version: String::from("1.0.0"),
            url: String::from("https://charts.example.com/nginx-1.0.0.tgz"),
            digest: None,
        }
    }

    #[tokio::test]
    async fn test_query_absent() {
        let mut backend = MockDeploymentBackend::new();
        backend
            .expect_list_releases()
            .withf(|f| f.name == "rls" && f.statuses == StatusCode::LIVE.to_vec())
            .times(1)
            .returning(|_| Ok(vec![]));

        let manager = ReleaseManager::new(Arc::new(backend));
        assert!(manager.query("rls").await.expect("query").is_none());
    }

    #[tokio::test]
    async fn test_query_ambiguous() {
        let mut backend = MockDeploymentBackend::new();
        backend.expect_list_releases().returning(|_| {
            Ok(vec![
                observed("rls", StatusCode::DEPLOYED),
                observed("rls", StatusCode::FAILED),
            ])
        });

        let manager = ReleaseManager::new(Arc::new(backend));
        let err = manager.query("rls").await.expect_err("should be ambiguous");
        assert!(matches!(err, ReleaseError::AmbiguousRelease { count: 2, .. }));
    }

    #[tokio::test]
    async fn test_install_uses_reuse_and_wait() {
        let mut backend = MockDeploymentBackend::new();
        backend
            .expect_install_release()
            .withf(|r| r.reuse_name && r.wait && r.name == "rls" && r.namespace == "apps")
            .times(1)
            .returning(|r| Ok(observed(&r.name, StatusCode::PENDING_INSTALL)));

        let manager = ReleaseManager::new(Arc::new(backend));
        let release = manager
            .install(&packaged(), "rls", "apps", &[], Duration::from_secs(300))
            .await
            .expect("install");
        assert_eq!(release.status, StatusCode::PENDING_INSTALL);
    }

    #[tokio::test]
    async fn test_delete_purges_and_maps_not_found() {
        let mut backend = MockDeploymentBackend::new();
        backend
            .expect_delete_release()
            .withf(|r| r.purge)
            .times(1)
            .returning(|_| Ok(DeleteOutcome::NotFound));

        let manager = ReleaseManager::new(Arc::new(backend));
        let result = manager.delete("rls", Duration::from_secs(300)).await.expect("delete");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_backend_error_propagates() {
        let mut backend = MockDeploymentBackend::new();
        backend
            .expect_update_release()
            .times(1)
            .returning(|_| Err(ReleaseError::unavailable("connection refused")));

        let manager = ReleaseManager::new(Arc::new(backend));
        let err = manager
            .update("rls", &packaged(), &[], Duration::from_secs(300))
            .await
            .expect_err("should fail");
        assert!(matches!(err, ReleaseError::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let err = bounded("rls", "install", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), ReleaseError>(())
        })
        .await
        .expect_err("should time out");
        assert!(matches!(err, ReleaseError::Timeout { .. }));
    }
}
