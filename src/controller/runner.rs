//! Change feed consumption.
//!
//! The controller routes every change event to a worker task owned by the
//! event's identity. Events for one identity are handled in delivery order,
//! one at a time; different identities proceed concurrently.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::convergence::Shutdown;
use crate::error::Result;
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::store::{ChangeEvent, ChangeKind, ResourceStore, FEED_CAPACITY};

use super::liveness::Liveness;

/// Handles one change event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handles the event.
    async fn handle(&self, event: &ChangeEvent, shutdown: &Shutdown) -> Result<ReconcileOutcome>;
}

#[async_trait]
impl EventHandler for Reconciler {
    async fn handle(&self, event: &ChangeEvent, shutdown: &Shutdown) -> Result<ReconcileOutcome> {
        self.reconcile(event, shutdown).await
    }
}

/// Counts of handled events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Events handled successfully.
    pub succeeded: usize,
    /// Events whose handling failed.
    pub failed: usize,
}

#[derive(Debug, Default)]
struct Counters {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

/// State every worker shares with the controller.
#[derive(Clone)]
struct WorkerShared {
    handler: Arc<dyn EventHandler>,
    counters: Arc<Counters>,
    active: Arc<AtomicUsize>,
}

/// Sending side of a live worker.
struct WorkerSlot {
    events: mpsc::Sender<ChangeEvent>,
    generation: u64,
    done: oneshot::Receiver<()>,
}

/// Consumes a store's change feed and dispatches events.
pub struct Controller {
    /// Event handler, the reconciler in production.
    handler: Arc<dyn EventHandler>,
    /// Store providing the change feed.
    store: Arc<dyn ResourceStore>,
    /// Liveness flag.
    liveness: Liveness,
    /// Number of worker tasks currently alive.
    active_workers: Arc<AtomicUsize>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("store", &self.store.backend_type())
            .field("liveness", &self.liveness)
            .field("active_workers", &self.active_workers())
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Creates a controller.
    #[must_use]
    pub fn new(handler: Arc<dyn EventHandler>, store: Arc<dyn ResourceStore>) -> Self {
        Self {
            handler,
            store,
            liveness: Liveness::new(),
            active_workers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns the liveness flag, to share with a liveness server.
    #[must_use]
    pub fn liveness(&self) -> Liveness {
        self.liveness.clone()
    }

    /// Returns the number of worker tasks currently alive.
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    /// Runs until shutdown or until the change feed ends.
    ///
    /// A worker is retired once it has drained a `Deleted` event. A later
    /// event for the same identity starts a new worker that first waits for
    /// the retiring one, so per-identity order holds across retirement.
    /// Workers finish the event they are handling before this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the change feed cannot be started.
    pub async fn run(&self, shutdown: Shutdown) -> Result<RunSummary> {
        let mut feed = self.store.watch(shutdown.clone()).await?;
        self.liveness.set_alive(true);
        info!("Controller started on {} store", self.store.backend_type());

        let shared = WorkerShared {
            handler: Arc::clone(&self.handler),
            counters: Arc::new(Counters::default()),
            active: Arc::clone(&self.active_workers),
        };
        let mut workers: HashMap<String, WorkerSlot> = HashMap::new();
        let mut retiring: HashMap<String, (u64, oneshot::Receiver<()>)> = HashMap::new();
        let mut tasks = JoinSet::new();
        let mut next_generation = 0_u64;

        loop {
            let event = tokio::select! {
                () = shutdown.cancelled() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    match joined {
                        Ok((identity, generation)) => {
                            if workers.get(&identity).is_some_and(|w| w.generation == generation) {
                                workers.remove(&identity);
                            }
                            if retiring.get(&identity).is_some_and(|(g, _)| *g == generation) {
                                retiring.remove(&identity);
                            }
                        }
                        Err(e) => error!("Worker task failed: {e}"),
                    }
                    continue;
                }
                event = feed.recv() => event,
            };
            let Some(event) = event else {
                warn!("Change feed ended");
                break;
            };

            let identity = event.identity().to_string();
            let slot = workers.entry(identity.clone()).or_insert_with(|| {
                let (tx, rx) = mpsc::channel(FEED_CAPACITY);
                let (done_tx, done_rx) = oneshot::channel();
                let after = retiring.remove(&identity).map(|(_, done)| done);
                let generation = next_generation;
                next_generation += 1;

                shared.active.fetch_add(1, Ordering::SeqCst);
                tasks.spawn(worker(
                    identity.clone(),
                    generation,
                    after,
                    done_tx,
                    rx,
                    shared.clone(),
                    shutdown.clone(),
                ));
                WorkerSlot {
                    events: tx,
                    generation,
                    done: done_rx,
                }
            });

            let retire = event.kind == ChangeKind::Deleted;
            if slot.events.send(event).await.is_err() {
                error!("Worker for {identity} stopped unexpectedly");
                workers.remove(&identity);
            } else if retire {
                if let Some(slot) = workers.remove(&identity) {
                    debug!("Retiring worker for {identity}");
                    retiring.insert(identity, (slot.generation, slot.done));
                }
            }
        }

        drop(workers);
        drop(retiring);
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Worker task failed: {e}");
            }
        }

        self.liveness.set_alive(false);
        let summary = RunSummary {
            succeeded: shared.counters.succeeded.load(Ordering::SeqCst),
            failed: shared.counters.failed.load(Ordering::SeqCst),
        };
        info!(
            "Controller stopped ({} succeeded, {} failed)",
            summary.succeeded, summary.failed
        );
        Ok(summary)
    }
}

/// Handles one identity's events in order. `after` resolves once the
/// previous worker for the identity has exited; `done` is dropped on exit.
async fn worker(
    identity: String,
    generation: u64,
    after: Option<oneshot::Receiver<()>>,
    done: oneshot::Sender<()>,
    mut events: mpsc::Receiver<ChangeEvent>,
    shared: WorkerShared,
    shutdown: Shutdown,
) -> (String, u64) {
    if let Some(after) = after {
        // Err only means the previous worker is gone, which is what we wait for.
        let _ = after.await;
    }
    debug!("Worker for {identity} started");

    while let Some(event) = events.recv().await {
        if shutdown.is_triggered() {
            break;
        }

        match shared.handler.handle(&event, &shutdown).await {
            Ok(outcome) => {
                shared.counters.succeeded.fetch_add(1, Ordering::SeqCst);
                info!("{} {}: {outcome}", event.desired.key(), event.kind);
            }
            Err(e) if e.is_cancelled() => {
                debug!("Reconciliation of {} cancelled", event.desired.key());
                break;
            }
            Err(e) => {
                shared.counters.failed.fetch_add(1, Ordering::SeqCst);
                if e.is_transient() {
                    warn!("Reconciliation of {} failed: {e}", event.desired.key());
                } else {
                    error!("Reconciliation of {} failed: {e}", event.desired.key());
                }
            }
        }
    }

    shared.active.fetch_sub(1, Ordering::SeqCst);
    drop(done);
    debug!("Worker for {identity} stopped");
    (identity, generation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChartMgrError;
    use crate::reconciler::ReconcileAction;
    use crate::resource::{ChartRef, DesiredRelease, ObjectMeta, ReleaseSpec};
    use crate::store::MemoryResourceStore;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records overlap per identity and the order events were seen in.
    #[derive(Default)]
    struct RecordingHandler {
        in_flight: Mutex<HashMap<String, usize>>,
        max_overlap: AtomicUsize,
        seen: Mutex<Vec<(String, String)>>,
        handled: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        async fn handle(&self, event: &ChangeEvent, _shutdown: &Shutdown) -> Result<ReconcileOutcome> {
            let identity = event.identity().to_string();
            {
                let mut in_flight = self.in_flight.lock().expect("lock");
                let count = in_flight.entry(identity.clone()).or_default();
                *count += 1;
                self.max_overlap.fetch_max(*count, Ordering::SeqCst);
            }

            tokio::time::sleep(Duration::from_millis(5)).await;

            self.seen
                .lock()
                .expect("lock")
                .push((identity.clone(), event.desired.spec.chart.version().to_string()));
            *self.in_flight.lock().expect("lock").entry(identity).or_default() -= 1;
            self.handled.fetch_add(1, Ordering::SeqCst);

            if event.desired.metadata.name == "broken" {
                return Err(ChartMgrError::internal("boom"));
            }
            Ok(ReconcileOutcome {
                action: ReconcileAction::Unchanged,
                release_name: String::new(),
                status: None,
            })
        }
    }

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

    async fn wait_for(handler: &RecordingHandler, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while handler.handled.load(Ordering::SeqCst) < count {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("events should be handled");
    }

    #[tokio::test]
    async fn test_events_serialized_per_identity() {
        let store = Arc::new(MemoryResourceStore::new());
        let handler = Arc::new(RecordingHandler::default());
        let controller = Arc::new(Controller::new(
            Arc::clone(&handler) as Arc<dyn EventHandler>,
            Arc::clone(&store) as Arc<dyn ResourceStore>,
        ));

        let (trigger, shutdown) = Shutdown::channel();
        let runner = Arc::clone(&controller);
        let run = tokio::spawn(async move { runner.run(shutdown).await });

        while !controller.liveness().is_alive() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        for version in ["1", "2", "3"] {
            store.apply(desired("a", version)).await;
            store.apply(desired("b", version)).await;
        }
        wait_for(&handler, 6).await;

        trigger.trigger();
        let summary = run.await.expect("join").expect("run");
        assert_eq!(summary.succeeded, 6);
        assert!(!controller.liveness().is_alive());

        assert_eq!(handler.max_overlap.load(Ordering::SeqCst), 1);
        let seen = handler.seen.lock().expect("lock");
        let versions_of = |id: &str| -> Vec<String> {
            seen.iter().filter(|(i, _)| i == id).map(|(_, v)| v.clone()).collect()
        };
        assert_eq!(versions_of("uid-a"), vec!["1", "2", "3"]);
        assert_eq!(versions_of("uid-b"), vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_fatal() {
        let store = Arc::new(MemoryResourceStore::new());
        store.apply(desired("broken", "1")).await;
        store.apply(desired("fine", "1")).await;

        let handler = Arc::new(RecordingHandler::default());
        let controller = Controller::new(
            Arc::clone(&handler) as Arc<dyn EventHandler>,
            Arc::clone(&store) as Arc<dyn ResourceStore>,
        );

        let (trigger, shutdown) = Shutdown::channel();
        let waiter = Arc::clone(&handler);
        tokio::spawn(async move {
            wait_for(&waiter, 2).await;
            trigger.trigger();
        });

        let summary = controller.run(shutdown).await.expect("run");
        assert_eq!(summary, RunSummary { succeeded: 1, failed: 1 });
    }

    #[tokio::test]
    async fn test_worker_retired_after_delete() {
        let store = Arc::new(MemoryResourceStore::new());
        let handler = Arc::new(RecordingHandler::default());
        let controller = Arc::new(Controller::new(
            Arc::clone(&handler) as Arc<dyn EventHandler>,
            Arc::clone(&store) as Arc<dyn ResourceStore>,
        ));

        let (trigger, shutdown) = Shutdown::channel();
        let runner = Arc::clone(&controller);
        let run = tokio::spawn(async move { runner.run(shutdown).await });

        while !controller.liveness().is_alive() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        store.apply(desired("a", "1")).await;
        wait_for(&handler, 1).await;
        assert_eq!(controller.active_workers(), 1);

        assert!(store.remove("uid-a").await);
        wait_for(&handler, 2).await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while controller.active_workers() > 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("worker should retire");

        // A recreated object gets a fresh worker.
        store.apply(desired("a", "2")).await;
        wait_for(&handler, 3).await;
        assert_eq!(controller.active_workers(), 1);

        trigger.trigger();
        let summary = run.await.expect("join").expect("run");
        assert_eq!(summary.succeeded, 3);
        assert_eq!(controller.active_workers(), 0);

        let seen = handler.seen.lock().expect("lock");
        let versions: Vec<_> = seen.iter().map(|(_, v)| v.as_str()).collect();
        assert_eq!(versions, vec!["1", "1", "2"]);
    }
}
