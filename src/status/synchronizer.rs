//! Status write-back.
//!
//! Turns the outcome of a reconciliation into the status sub-object and
//! persists it, keyed by the object's identity.

use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::release::ObservedRelease;
use crate::resource::{DesiredRelease, ReconciliationStatus, ReleaseState};
use crate::store::ResourceStore;

use super::mapping::state_for_code;

/// Writes reconciliation status to a resource store.
#[derive(Clone)]
pub struct StatusSynchronizer {
    store: Arc<dyn ResourceStore>,
}

impl std::fmt::Debug for StatusSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusSynchronizer")
            .field("store", &self.store.backend_type())
            .finish()
    }
}

impl StatusSynchronizer {
    /// Creates a synchronizer over a store.
    #[must_use]
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Builds the status for an outcome without persisting it.
    ///
    /// An error wins over any observed release. The release name is taken
    /// from the observed release when there is one, else `release_name`.
    #[must_use]
    pub fn status_for(
        release_name: &str,
        observed: Option<&ObservedRelease>,
        error: Option<&str>,
    ) -> ReconciliationStatus {
        let name = observed.map_or(release_name, |r| r.name.as_str());

        match (observed, error) {
            (_, Some(message)) => ReconciliationStatus::failed(name, message),
            (Some(release), None) => {
                let state = state_for_code(release.status);
                ReconciliationStatus::new(state, name, state.as_str())
            }
            (None, None) => {
                ReconciliationStatus::new(ReleaseState::Unknown, name, ReleaseState::Unknown.as_str())
            }
        }
    }

    /// Computes and persists the status for a desired release.
    ///
    /// Always a full overwrite. Returns what was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub async fn sync(
        &self,
        desired: &DesiredRelease,
        release_name: &str,
        observed: Option<&ObservedRelease>,
        error: Option<&str>,
    ) -> Result<ReconciliationStatus> {
        let status = Self::status_for(release_name, observed, error);

        debug!(
            identity = desired.identity(),
            release = %status.release_name,
            "Writing status {}",
            status.state
        );
        self.store.put_status(desired.identity(), &status).await?;
        Ok(status)
    }
}
