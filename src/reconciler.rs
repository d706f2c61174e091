//! Reconciler for managed chart releases.
//!
//! This module implements the per-event decision function: given one change
//! to a desired release, it repairs identity mismatches, decides between
//! install, update, delete and no-op, waits for convergence, and writes the
//! resulting status back.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::convergence::{ConvergenceMonitor, Shutdown};
use crate::error::{ChartMgrError, ReconcileError, ReleaseError, Result};
use crate::release::{ChartResolver, ObservedRelease, ReleaseManager};
use crate::resource::{
    compute_release_name, DesiredRelease, ReconciliationStatus, ResourceValidator,
};
use crate::status::StatusSynchronizer;
use crate::store::{ChangeEvent, ChangeKind, ResourceStore};

/// Timing settings for one reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSettings {
    /// Bound on each install, update and delete call.
    pub release_timeout: Duration,
    /// Interval between convergence polls.
    pub poll_interval: Duration,
    /// Total convergence deadline.
    pub deploy_deadline: Duration,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            release_timeout: Duration::from_secs(5 * 60),
            poll_interval: Duration::from_secs(30),
            deploy_deadline: Duration::from_secs(120),
        }
    }
}

/// Action a reconciliation took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReconcileAction {
    /// A new release was installed.
    Installed,
    /// An existing release was updated.
    Updated,
    /// Nothing needed doing.
    Unchanged,
    /// The release was deleted.
    Deleted,
    /// The release is create-only and was left alone.
    Skipped,
}

/// Result of one reconciliation.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileOutcome {
    /// Action taken.
    pub action: ReconcileAction,
    /// Release the action applied to.
    pub release_name: String,
    /// Status written, if any. Deletes write none.
    pub status: Option<ReconciliationStatus>,
}

/// Per-event reconciler.
pub struct Reconciler {
    /// Release lifecycle manager.
    releases: ReleaseManager,
    /// Chart resolver.
    resolver: Arc<dyn ChartResolver>,
    /// Convergence monitor.
    monitor: ConvergenceMonitor,
    /// Status synchronizer.
    status: StatusSynchronizer,
    /// Resource store, for re-reading stored status.
    store: Arc<dyn ResourceStore>,
    /// Manifest validator.
    validator: ResourceValidator,
    /// Timing settings.
    settings: ReconcileSettings,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("releases", &self.releases)
            .field("store", &self.store.backend_type())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler.
    #[must_use]
    pub fn new(
        releases: ReleaseManager,
        resolver: Arc<dyn ChartResolver>,
        monitor: ConvergenceMonitor,
        store: Arc<dyn ResourceStore>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            releases,
            resolver,
            monitor,
            status: StatusSynchronizer::new(Arc::clone(&store)),
            store,
            validator: ResourceValidator::new(),
            settings,
        }
    }

    /// Returns the timing settings.
    #[must_use]
    pub const fn settings(&self) -> &ReconcileSettings {
        &self.settings
    }

    /// Reconciles one change event.
    ///
    /// Added and updated objects always get exactly one status write, also
    /// on failure. Nothing is retried; the error is returned to the caller.
    ///
    /// # Errors
    ///
    /// Returns the first failure of the reconciliation.
    #[instrument(skip_all, fields(object = %event.desired.key(), kind = %event.kind))]
    pub async fn reconcile(&self, event: &ChangeEvent, shutdown: &Shutdown) -> Result<ReconcileOutcome> {
        match event.kind {
            ChangeKind::Added | ChangeKind::Updated => self.apply(&event.desired, shutdown).await,
            ChangeKind::Deleted => self.remove(&event.desired).await,
        }
    }

    /// Drives the backend toward the desired release and records the result.
    async fn apply(&self, desired: &DesiredRelease, shutdown: &Shutdown) -> Result<ReconcileOutcome> {
        let name = compute_release_name(desired);

        match self.converge(desired, &name, shutdown).await {
            Ok((action, observed)) => {
                let status = self
                    .status
                    .sync(desired, &name, observed.as_ref(), None)
                    .await?;
                info!("Release {name}: {action:?} ({})", status.state);
                Ok(ReconcileOutcome {
                    action,
                    release_name: name,
                    status: Some(status),
                })
            }
            Err(err) => {
                // Neither a failed stale cleanup nor an ambiguous query has
                // confirmed the computed name.
                let recorded = match &err {
                    ChartMgrError::Reconcile(ReconcileError::StaleIdentityDelete { stale, .. }) => {
                        stale.clone()
                    }
                    ChartMgrError::Release(ReleaseError::AmbiguousRelease { .. }) => {
                        self.stored_release_name(desired).await
                    }
                    _ => name.clone(),
                };

                let message = err.to_string();
                if let Err(write_err) = self.status.sync(desired, &recorded, None, Some(&message)).await {
                    warn!("Failed to record failure status for {}: {write_err}", desired.key());
                }
                Err(err)
            }
        }
    }

    async fn converge(
        &self,
        desired: &DesiredRelease,
        name: &str,
        shutdown: &Shutdown,
    ) -> Result<(ReconcileAction, Option<ObservedRelease>)> {
        let findings = self.validator.check(desired);
        if let Some(first) = findings.errors.first() {
            return Err(ReconcileError::InvalidResource {
                identity: desired.identity().to_string(),
                message: first.to_string(),
            }
            .into());
        }

        let stored = self.store.get_status(desired.identity()).await?;
        if let Some(stored) = stored.filter(|s| !s.release_name.is_empty() && s.release_name != name) {
            self.delete_stale(&stored.release_name, name).await?;
        }

        let existing = self.releases.query(name).await?;
        let timeout = self.settings.release_timeout;

        let action = match existing {
            Some(release) if desired.create_only() => {
                debug!("Release {name} is create-only and exists, leaving it alone");
                return Ok((ReconcileAction::Skipped, Some(release)));
            }
            Some(_) => {
                let chart = self.resolver.resolve(&desired.spec.chart).await?;
                self.releases
                    .update(name, &chart, &desired.spec.values, timeout)
                    .await?;
                ReconcileAction::Updated
            }
            None => {
                let chart = self.resolver.resolve(&desired.spec.chart).await?;
                self.releases
                    .install(&chart, name, desired.namespace(), &desired.spec.values, timeout)
                    .await?;
                ReconcileAction::Installed
            }
        };

        let converged = self
            .monitor
            .wait_for_deployed(
                name,
                self.settings.poll_interval,
                self.settings.deploy_deadline,
                shutdown,
            )
            .await?;

        Ok((action, Some(converged)))
    }

    /// Release name of the stored status, empty if there is none.
    async fn stored_release_name(&self, desired: &DesiredRelease) -> String {
        match self.store.get_status(desired.identity()).await {
            Ok(stored) => stored.map(|s| s.release_name).unwrap_or_default(),
            Err(e) => {
                warn!("Failed to read stored status for {}: {e}", desired.key());
                String::new()
            }
        }
    }

    /// Deletes the release left behind by an identity change.
    async fn delete_stale(&self, stale: &str, computed: &str) -> Result<()> {
        info!("Release name changed from {stale} to {computed}, deleting {stale}");

        self.releases
            .delete(stale, self.settings.release_timeout)
            .await
            .map_err(|source| ReconcileError::StaleIdentityDelete {
                stale: stale.to_string(),
                computed: computed.to_string(),
                source,
            })?;
        Ok(())
    }

    /// Removes the release of a deleted object.
    async fn remove(&self, desired: &DesiredRelease) -> Result<ReconcileOutcome> {
        let name = compute_release_name(desired);
        let outcome = |action| ReconcileOutcome {
            action,
            release_name: name.clone(),
            status: None,
        };

        if desired.create_only() {
            info!("Release {name} is create-only, keeping it after object deletion");
            return Ok(outcome(ReconcileAction::Skipped));
        }

        if self.releases.query(&name).await?.is_none() {
            debug!("Release {name} already absent");
            return Ok(outcome(ReconcileAction::Unchanged));
        }

        self.releases
            .delete(&name, self.settings.release_timeout)
            .await?;
        Ok(outcome(ReconcileAction::Deleted))
    }
}

impl std::fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} release {}", self.action, self.release_name)?;
        if let Some(status) = &self.status {
            write!(f, " ({})", status.state)?;
        }
        Ok(())
    }
}
