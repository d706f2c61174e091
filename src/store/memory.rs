//! In-memory resource store.
//!
//! Holds desired-state objects and statuses in process. Used by tests and
//! by embedders that feed objects from their own source.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, warn};

use crate::convergence::Shutdown;
use crate::error::Result;
use crate::resource::{DesiredRelease, ReconciliationStatus};

use super::backend::{ChangeEvent, ChangeKind, ResourceStore, FEED_CAPACITY};

/// In-memory resource store.
#[derive(Debug, Clone)]
pub struct MemoryResourceStore {
    objects: Arc<RwLock<HashMap<String, DesiredRelease>>>,
    statuses: Arc<RwLock<HashMap<String, ReconciliationStatus>>>,
    events: broadcast::Sender<ChangeEvent>,
}

impl Default for MemoryResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryResourceStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
            statuses: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    /// Inserts or replaces an object and publishes the change.
    ///
    /// Objects without a uid get one derived from namespace and name.
    /// Re-applying an identical object publishes nothing and returns `None`.
    pub async fn apply(&self, desired: DesiredRelease) -> Option<ChangeKind> {
        let desired = desired.with_derived_uid();
        let identity = desired.identity().to_string();

        let kind = {
            let mut objects = self.objects.write().await;
            match objects.insert(identity.clone(), desired.clone()) {
                None => ChangeKind::Added,
                Some(previous) if previous == desired => return None,
                Some(_) => ChangeKind::Updated,
            }
        };

        debug!("Object {identity} {kind}");
        self.publish(ChangeEvent::new(kind, desired));
        Some(kind)
    }

    /// Removes an object and its status, publishing a delete.
    ///
    /// Returns false if the object was unknown.
    pub async fn remove(&self, identity: &str) -> bool {
        let removed = self.objects.write().await.remove(identity);
        self.statuses.write().await.remove(identity);

        match removed {
            Some(desired) => {
                debug!("Object {identity} deleted");
                self.publish(ChangeEvent::new(ChangeKind::Deleted, desired));
                true
            }
            None => false,
        }
    }

    fn publish(&self, event: ChangeEvent) {
        // No subscribers is fine; the next watch replays current objects.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl ResourceStore for MemoryResourceStore {
    async fn list(&self) -> Result<Vec<DesiredRelease>> {
        let objects = self.objects.read().await;
        Ok(objects.values().cloned().collect())
    }

    async fn get_status(&self, identity: &str) -> Result<Option<ReconciliationStatus>> {
        let statuses = self.statuses.read().await;
        Ok(statuses.get(identity).cloned())
    }

    async fn put_status(&self, identity: &str, status: &ReconciliationStatus) -> Result<()> {
        let mut statuses = self.statuses.write().await;
        statuses.insert(identity.to_string(), status.clone());
        Ok(())
    }

    async fn watch(&self, shutdown: Shutdown) -> Result<mpsc::Receiver<ChangeEvent>> {
        // Subscribe before the snapshot so nothing falls between the two.
        let mut updates = self.events.subscribe();
        let snapshot = self.list().await?;
        let objects = Arc::clone(&self.objects);
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);

        tokio::spawn(async move {
            for desired in snapshot {
                if tx.send(ChangeEvent::new(ChangeKind::Added, desired)).await.is_err() {
                    return;
                }
            }

            loop {
                let event = tokio::select! {
                    () = shutdown.cancelled() => break,
                    received = updates.recv() => received,
                };

                match event {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Change feed lagged by {missed} events, resyncing");
                        let current: Vec<DesiredRelease> =
                            objects.read().await.values().cloned().collect();
                        for desired in current {
                            if tx.send(ChangeEvent::new(ChangeKind::Updated, desired)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Memory change feed stopped");
        });

        Ok(rx)
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{ChartRef, ObjectMeta, ReleaseSpec, ReleaseState};

    fn desired(name: &str, version: &str) -> DesiredRelease {
        DesiredRelease {
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: String::from("default"),
                uid: format!("uid-{name}"),
            },
            spec: ReleaseSpec {
                chart: ChartRef {
                    name: String::from("nginx"),
                    version: Some(version.to_string()),
                    repository: None,
                },
                values: vec![],
                release: None,
                options: None,
            },
        }
    }

    #[tokio::test]
    async fn test_watch_replays_then_streams() {
        let store = MemoryResourceStore::new();
        store.apply(desired("a", "1.0.0")).await;

        let (trigger, shutdown) = Shutdown::channel();
        let mut feed = store.watch(shutdown).await.expect("watch");

        let first = feed.recv().await.expect("replayed event");
        assert_eq!(first.kind, ChangeKind::Added);
        assert_eq!(first.identity(), "uid-a");

        assert_eq!(store.apply(desired("a", "2.0.0")).await, Some(ChangeKind::Updated));
        let second = feed.recv().await.expect("update event");
        assert_eq!(second.kind, ChangeKind::Updated);
        assert_eq!(second.desired.spec.chart.version(), "2.0.0");

        assert!(store.remove("uid-a").await);
        let third = feed.recv().await.expect("delete event");
        assert_eq!(third.kind, ChangeKind::Deleted);

        trigger.trigger();
        assert!(feed.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_status_overwrite() {
        let store = MemoryResourceStore::new();
        assert!(store.get_status("x").await.expect("get").is_none());

        store
            .put_status("x", &ReconciliationStatus::new(ReleaseState::Deployed, "rls", "Deployed"))
            .await
            .expect("put");
        store
            .put_status("x", &ReconciliationStatus::failed("rls", "boom"))
            .await
            .expect("put");

        let status = store.get_status("x").await.expect("get").expect("status");
        assert_eq!(status.state, ReleaseState::Failed);
        assert_eq!(status.message, "boom");
    }

    #[tokio::test]
    async fn test_identical_apply_is_silent() {
        let store = MemoryResourceStore::new();
        let mut subscriber = store.events.subscribe();
        assert_eq!(store.apply(desired("a", "1.0.0")).await, Some(ChangeKind::Added));
        assert_eq!(store.apply(desired("a", "1.0.0")).await, None);

        assert!(subscriber.try_recv().is_ok());
        assert!(subscriber.try_recv().is_err());
    }
}
