//! Convergence waiting.
//!
//! After an install or update the backend may still be rolling the release
//! out. The monitor polls the release until it is deployed, the deadline
//! passes, or shutdown is requested.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{ReleaseError, ReleaseResult};
use crate::release::{ObservedRelease, ReleaseManager};

use super::clock::{Clock, TokioClock};
use super::shutdown::Shutdown;

/// Polls a release until it reaches the deployed state.
#[derive(Clone)]
pub struct ConvergenceMonitor {
    /// Release lifecycle manager used for queries.
    releases: ReleaseManager,
    /// Time source.
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ConvergenceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvergenceMonitor")
            .field("releases", &self.releases)
            .finish_non_exhaustive()
    }
}

impl ConvergenceMonitor {
    /// Creates a monitor using the tokio clock.
    #[must_use]
    pub fn new(releases: ReleaseManager) -> Self {
        Self::with_clock(releases, Arc::new(TokioClock))
    }

    /// Creates a monitor with a custom clock.
    #[must_use]
    pub fn with_clock(releases: ReleaseManager, clock: Arc<dyn Clock>) -> Self {
        Self { releases, clock }
    }

    /// Waits for a release to be reported as deployed.
    ///
    /// The release is queried immediately, then every `poll_interval` until
    /// `deadline` has elapsed. A deadline too large to represent as an
    /// instant means no deadline.
    ///
    /// # Errors
    ///
    /// - Any query error, returned at once without further polling.
    /// - `Timeout` if the deadline passes first.
    /// - `Cancelled` if shutdown is requested while waiting.
    pub async fn wait_for_deployed(
        &self,
        name: &str,
        poll_interval: Duration,
        deadline: Duration,
        shutdown: &Shutdown,
    ) -> ReleaseResult<ObservedRelease> {
        let started = self.clock.now();
        let limit = started.checked_add(deadline);
        let cancelled = || ReleaseError::Cancelled {
            name: name.to_string(),
        };

        info!("Waiting up to {}s for release {name} to deploy", deadline.as_secs());

        loop {
            if shutdown.is_triggered() {
                return Err(cancelled());
            }

            let observed = tokio::select! {
                biased;
                () = shutdown.cancelled() => return Err(cancelled()),
                result = self.releases.query(name) => result?,
            };

            match observed {
                Some(release) if release.is_deployed() => {
                    info!("Release {name} is deployed (revision {})", release.revision);
                    return Ok(release);
                }
                Some(release) => debug!("Release {name} is {}", release.status),
                None => debug!("Release {name} is not visible yet"),
            }

            let now = self.clock.now();
            let pause = match limit {
                Some(limit) if now >= limit => {
                    warn!("Release {name} did not deploy in time");
                    return Err(ReleaseError::Timeout {
                        name: name.to_string(),
                        operation: String::from("deploy"),
                        waited: now - started,
                    });
                }
                Some(limit) => poll_interval.min(limit - now),
                None => poll_interval,
            };
            tokio::select! {
                biased;
                () = shutdown.cancelled() => return Err(cancelled()),
                () = self.clock.sleep(pause) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convergence::clock::ManualClock;
    use crate::release::{MockDeploymentBackend, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const POLL: Duration = Duration::from_secs(30);
    const DEADLINE: Duration = Duration::from_secs(120);

    fn observed(status: StatusCode) -> ObservedRelease {
        ObservedRelease {
            name: String::from("rls"),
            namespace: String::from("default"),
            chart: String::from("nginx-1.0.0"),
            revision: 1,
            status,
        }
    }

    fn monitor(backend: MockDeploymentBackend, clock: Arc<ManualClock>) -> ConvergenceMonitor {
        ConvergenceMonitor::with_clock(ReleaseManager::new(Arc::new(backend)), clock)
    }

    #[tokio::test]
    async fn test_returns_once_deployed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut backend = MockDeploymentBackend::new();
        backend.expect_list_releases().returning(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let status = if n < 2 {
                StatusCode::PENDING_INSTALL
            } else {
                StatusCode::DEPLOYED
            };
            Ok(vec![observed(status)])
        });

        let clock = Arc::new(ManualClock::new());
        let release = monitor(backend, Arc::clone(&clock))
            .wait_for_deployed("rls", POLL, DEADLINE, &Shutdown::never())
            .await
            .expect("should converge");

        assert!(release.is_deployed());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(clock.sleeps(), 2);
    }

    #[tokio::test]
    async fn test_unrepresentable_deadline_does_not_overflow() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut backend = MockDeploymentBackend::new();
        backend.expect_list_releases().returning(move |_| {
            let status = if counter.fetch_add(1, Ordering::SeqCst) < 1 {
                StatusCode::PENDING_INSTALL
            } else {
                StatusCode::DEPLOYED
            };
            Ok(vec![observed(status)])
        });

        let clock = Arc::new(ManualClock::new());
        let release = monitor(backend, Arc::clone(&clock))
            .wait_for_deployed("rls", POLL, Duration::from_secs(u64::MAX), &Shutdown::never())
            .await
            .expect("should converge without a deadline");

        assert!(release.is_deployed());
        assert_eq!(clock.sleeps(), 1);
    }

    #[tokio::test]
    async fn test_times_out_on_pending() {
        let mut backend = MockDeploymentBackend::new();
        backend
            .expect_list_releases()
            .returning(|_| Ok(vec![observed(StatusCode::PENDING_INSTALL)]));

        let err = monitor(backend, Arc::new(ManualClock::new()))
            .wait_for_deployed("rls", POLL, DEADLINE, &Shutdown::never())
            .await
            .expect_err("should time out");

        match err {
            ReleaseError::Timeout { waited, .. } => assert_eq!(waited, DEADLINE),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_is_not_success() {
        let mut backend = MockDeploymentBackend::new();
        backend
            .expect_list_releases()
            .returning(|_| Ok(vec![observed(StatusCode::FAILED)]));

        let err = monitor(backend, Arc::new(ManualClock::new()))
            .wait_for_deployed("rls", POLL, DEADLINE, &Shutdown::never())
            .await
            .expect_err("failed release should not converge");
        assert!(matches!(err, ReleaseError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_query_error_aborts() {
        let mut backend = MockDeploymentBackend::new();
        backend
            .expect_list_releases()
            .times(1)
            .returning(|_| Err(ReleaseError::unavailable("down")));

        let clock = Arc::new(ManualClock::new());
        let err = monitor(backend, Arc::clone(&clock))
            .wait_for_deployed("rls", POLL, DEADLINE, &Shutdown::never())
            .await
            .expect_err("should abort");

        assert!(matches!(err, ReleaseError::BackendUnavailable { .. }));
        assert_eq!(clock.sleeps(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_is_distinct_from_timeout() {
        let mut backend = MockDeploymentBackend::new();
        backend.expect_list_releases().times(0);

        let (trigger, shutdown) = Shutdown::channel();
        trigger.trigger();

        let err = monitor(backend, Arc::new(ManualClock::new()))
            .wait_for_deployed("rls", POLL, DEADLINE, &shutdown)
            .await
            .expect_err("should be cancelled");
        assert!(matches!(err, ReleaseError::Cancelled { .. }));
    }
}
