//! Local manifest-directory resource store.
//!
//! Desired-state objects are read from `*.yaml`/`*.yml` files in a
//! directory, one object per file. The directory is rescanned periodically
//! and changes are detected by spec hash. Statuses live next to the
//! manifests under `.chartmgr/status/<uid>.json`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::convergence::Shutdown;
use crate::error::{ChartMgrError, Result, StoreError};
use crate::resource::{is_valid_identity, DesiredRelease, ReconciliationStatus, SpecHasher};

use super::backend::{ChangeEvent, ChangeKind, ResourceStore, FEED_CAPACITY};

/// Controller state directory name, inside the manifest directory.
const STATE_DIR: &str = ".chartmgr";

/// Status subdirectory name.
const STATUS_DIR: &str = "status";

/// Default rescan interval in seconds.
const DEFAULT_RESYNC_SECS: u64 = 10;

/// Manifest-directory resource store.
#[derive(Debug, Clone)]
pub struct LocalResourceStore {
    /// Directory holding manifests.
    manifest_dir: PathBuf,
    /// Directory holding status files.
    status_dir: PathBuf,
    /// How often the directory is rescanned.
    resync_interval: Duration,
}

/// A manifest as last seen on disk.
#[derive(Debug, Clone)]
struct Tracked {
    hash: String,
    desired: DesiredRelease,
}

impl LocalResourceStore {
    /// Creates a store over a manifest directory.
    #[must_use]
    pub fn new(manifest_dir: impl Into<PathBuf>) -> Self {
        let manifest_dir = manifest_dir.into();
        let status_dir = manifest_dir.join(STATE_DIR).join(STATUS_DIR);

        Self {
            manifest_dir,
            status_dir,
            resync_interval: Duration::from_secs(DEFAULT_RESYNC_SECS),
        }
    }

    /// Sets the rescan interval.
    #[must_use]
    pub const fn with_resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = interval;
        self
    }

    /// Returns the manifest directory.
    #[must_use]
    pub fn manifest_dir(&self) -> &Path {
        &self.manifest_dir
    }

    /// Path of the status file for `identity`. Identities that could escape
    /// the status directory are rejected.
    fn status_path(&self, identity: &str) -> Result<PathBuf> {
        if !is_valid_identity(identity) {
            return Err(ChartMgrError::Store(StoreError::InvalidIdentity {
                identity: identity.to_string(),
            }));
        }
        Ok(self.status_dir.join(format!("{identity}.json")))
    }

    /// Ensures the status directory exists.
    async fn ensure_status_dir(&self) -> Result<()> {
        if !self.status_dir.exists() {
            debug!("Creating status directory: {}", self.status_dir.display());
            fs::create_dir_all(&self.status_dir).await.map_err(|e| {
                ChartMgrError::Store(StoreError::write(format!(
                    "Failed to create status directory: {e}"
                )))
            })?;
        }
        Ok(())
    }

    /// Reads every manifest in the directory.
    ///
    /// Files that cannot be read or parsed are reported by path in the
    /// second vector and otherwise skipped.
    async fn scan(&self) -> Result<(Vec<(PathBuf, DesiredRelease)>, Vec<PathBuf>)> {
        let mut entries = fs::read_dir(&self.manifest_dir).await.map_err(|e| {
            ChartMgrError::Store(StoreError::Corrupted {
                message: format!(
                    "Failed to read manifest directory {}: {e}",
                    self.manifest_dir.display()
                ),
            })
        })?;

        let mut manifests = Vec::new();
        let mut broken = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !is_manifest(&path) {
                continue;
            }

            match load_manifest(&path).await {
                Ok(desired) => manifests.push((path, desired)),
                Err(e) => {
                    warn!("Skipping manifest {}: {e}", path.display());
                    broken.push(path);
                }
            }
        }

        manifests.sort_by(|a, b| a.0.cmp(&b.0));
        Ok((manifests, broken))
    }
}

fn is_manifest(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
}

/// Loads one manifest, deriving its uid if absent.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a valid manifest.
pub async fn load_manifest(path: &Path) -> Result<DesiredRelease> {
    let content = fs::read_to_string(path).await.map_err(|e| {
        ChartMgrError::Store(StoreError::Corrupted {
            message: format!("Failed to read {}: {e}", path.display()),
        })
    })?;

    let desired: DesiredRelease = serde_yaml::from_str(&content).map_err(|e| {
        ChartMgrError::Store(StoreError::serialization(format!(
            "Failed to parse {}: {e}",
            path.display()
        )))
    })?;

    let desired = desired.with_derived_uid();
    if !is_valid_identity(desired.identity()) {
        return Err(ChartMgrError::Store(StoreError::InvalidIdentity {
            identity: desired.identity().to_string(),
        }));
    }
    Ok(desired)
}

/// Compares a fresh scan with what was seen before and returns the events
/// needed to bring a watcher up to date.
///
/// Broken files keep their previous entry so that a half-written edit does
/// not look like a deletion.
fn diff_scan(
    known: &mut HashMap<PathBuf, Tracked>,
    manifests: Vec<(PathBuf, DesiredRelease)>,
    broken: &[PathBuf],
    hasher: &SpecHasher,
) -> Vec<ChangeEvent> {
    let mut events = Vec::new();
    let mut seen: HashMap<PathBuf, Tracked> = HashMap::new();

    for (path, desired) in manifests {
        let hash = hasher.hash_release(&desired);
        match known.remove(&path) {
            None => events.push(ChangeEvent::new(ChangeKind::Added, desired.clone())),
            Some(previous) if previous.desired.identity() != desired.identity() => {
                events.push(ChangeEvent::new(ChangeKind::Deleted, previous.desired));
                events.push(ChangeEvent::new(ChangeKind::Added, desired.clone()));
            }
            Some(previous) if !SpecHasher::hashes_match(&previous.hash, &hash) => {
                debug!(
                    "Spec of {} changed ({} -> {})",
                    desired.key(),
                    hasher.short_hash(&previous.hash),
                    hasher.short_hash(&hash)
                );
                events.push(ChangeEvent::new(ChangeKind::Updated, desired.clone()));
            }
            Some(_) => {}
        }
        seen.insert(path, Tracked { hash, desired });
    }

    for path in broken {
        if let Some(previous) = known.remove(path) {
            seen.insert(path.clone(), previous);
        }
    }

    for (_, gone) in known.drain() {
        events.push(ChangeEvent::new(ChangeKind::Deleted, gone.desired));
    }

    *known = seen;
    events
}

#[async_trait]
impl ResourceStore for LocalResourceStore {
    async fn list(&self) -> Result<Vec<DesiredRelease>> {
        let (manifests, _) = self.scan().await?;
        Ok(manifests.into_iter().map(|(_, desired)| desired).collect())
    }

    async fn get_status(&self, identity: &str) -> Result<Option<ReconciliationStatus>> {
        let path = self.status_path(identity)?;
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await.map_err(|e| {
            ChartMgrError::Store(StoreError::Corrupted {
                message: format!("Failed to read status file: {e}"),
            })
        })?;

        let status = serde_json::from_str(&content).map_err(|e| {
            ChartMgrError::Store(StoreError::Corrupted {
                message: format!("Failed to parse status file: {e}"),
            })
        })?;

        Ok(Some(status))
    }

    async fn put_status(&self, identity: &str, status: &ReconciliationStatus) -> Result<()> {
        let path = self.status_path(identity)?;
        self.ensure_status_dir().await?;

        let content = serde_json::to_string_pretty(status).map_err(|e| {
            ChartMgrError::Store(StoreError::serialization(format!(
                "Failed to serialize status: {e}"
            )))
        })?;

        // Temp file then rename, so readers never see a partial status
        let temp_path = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            ChartMgrError::Store(StoreError::write(format!("Failed to create temp status file: {e}")))
        })?;

        file.write_all(content.as_bytes()).await.map_err(|e| {
            ChartMgrError::Store(StoreError::write(format!("Failed to write status file: {e}")))
        })?;

        file.sync_all().await.map_err(|e| {
            ChartMgrError::Store(StoreError::write(format!("Failed to sync status file: {e}")))
        })?;

        fs::rename(&temp_path, &path).await.map_err(|e| {
            ChartMgrError::Store(StoreError::write(format!("Failed to rename status file: {e}")))
        })?;

        debug!("Status for {identity} saved ({})", status.state);
        Ok(())
    }

    async fn watch(&self, shutdown: Shutdown) -> Result<mpsc::Receiver<ChangeEvent>> {
        let store = self.clone();
        let hasher = SpecHasher::new();
        let mut known = HashMap::new();

        // The first scan runs here so a missing directory fails the call.
        let (manifests, broken) = store.scan().await?;
        let initial = diff_scan(&mut known, manifests, &broken, &hasher);
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);

        info!(
            "Watching {} ({} manifests, rescan every {}s)",
            store.manifest_dir.display(),
            known.len(),
            store.resync_interval.as_secs()
        );

        tokio::spawn(async move {
            for event in initial {
                if tx.send(event).await.is_err() {
                    return;
                }
            }

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(store.resync_interval) => {}
                }

                let (manifests, broken) = match store.scan().await {
                    Ok(scan) => scan,
                    Err(e) => {
                        warn!("Rescan failed: {e}");
                        continue;
                    }
                };

                for event in diff_scan(&mut known, manifests, &broken, &hasher) {
                    debug!("Manifest {} {}", event.desired.key(), event.kind);
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
            debug!("Manifest watch stopped");
        });

        Ok(rx)
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ReleaseState;
    use tempfile::TempDir;

    fn manifest(name: &str, version: &str) -> String {
        format!(
            "metadata:\n  name: {name}\nspec:\n  chart:\n    name: nginx\n    version: {version}\n"
        )
    }

    async fn create_test_store() -> (LocalResourceStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalResourceStore::new(temp_dir.path());
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_list_reads_manifests() {
        let (store, temp) = create_test_store().await;
        std::fs::write(temp.path().join("web.yaml"), manifest("web", "1.0.0")).expect("write");
        std::fs::write(temp.path().join("notes.txt"), "not a manifest").expect("write");

        let objects = store.list().await.expect("list");
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].metadata.name, "web");
        assert!(!objects[0].identity().is_empty());
    }

    #[tokio::test]
    async fn test_status_round_trip() {
        let (store, _temp) = create_test_store().await;
        assert!(store.get_status("abc").await.expect("get").is_none());

        let status = ReconciliationStatus::new(ReleaseState::Deployed, "chartmgr-rls-abc", "Deployed");
        store.put_status("abc", &status).await.expect("put");

        let loaded = store.get_status("abc").await.expect("get").expect("status");
        assert_eq!(loaded, status);
        assert!(!store.status_path("abc").expect("path").with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_path_like_uid_never_reaches_disk() {
        let (store, temp) = create_test_store().await;
        let path = temp.path().join("evil.yaml");
        std::fs::write(
            &path,
            "metadata:\n  name: evil\n  uid: ../../../escaped\nspec:\n  chart:\n    name: nginx\n",
        )
        .expect("write");

        let err = load_manifest(&path).await.expect_err("uid must be rejected");
        assert!(matches!(
            err,
            ChartMgrError::Store(StoreError::InvalidIdentity { .. })
        ));
        assert!(store.list().await.expect("list").is_empty());

        let status = ReconciliationStatus::failed("rls", "boom");
        let err = store
            .put_status("../../../escaped", &status)
            .await
            .expect_err("status write must be rejected");
        assert!(matches!(
            err,
            ChartMgrError::Store(StoreError::InvalidIdentity { .. })
        ));
        assert!(!temp.path().join("../escaped.json").exists());
        assert!(store.get_status("../x").await.is_err());
    }

    #[test]
    fn test_diff_detects_changes() {
        let hasher = SpecHasher::new();
        let mut known = HashMap::new();
        let path = PathBuf::from("web.yaml");
        let parse = |yaml: &str| {
            serde_yaml::from_str::<DesiredRelease>(yaml)
                .expect("manifest")
                .with_derived_uid()
        };

        let v1 = parse(&manifest("web", "1.0.0"));
        let events = diff_scan(&mut known, vec![(path.clone(), v1.clone())], &[], &hasher);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::Added);

        let events = diff_scan(&mut known, vec![(path.clone(), v1)], &[], &hasher);
        assert!(events.is_empty());

        let v2 = parse(&manifest("web", "2.0.0"));
        let events = diff_scan(&mut known, vec![(path.clone(), v2)], &[], &hasher);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::Updated);

        let events = diff_scan(&mut known, vec![], &[path.clone()], &hasher);
        assert!(events.is_empty(), "broken file must not look deleted");

        let events = diff_scan(&mut known, vec![], &[], &hasher);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::Deleted);
    }

    #[tokio::test]
    async fn test_watch_replays_and_rescans() {
        let (store, temp) = create_test_store().await;
        let store = store.with_resync_interval(Duration::from_millis(20));
        std::fs::write(temp.path().join("web.yaml"), manifest("web", "1.0.0")).expect("write");

        let (trigger, shutdown) = Shutdown::channel();
        let mut feed = store.watch(shutdown).await.expect("watch");

        let added = feed.recv().await.expect("replay");
        assert_eq!(added.kind, ChangeKind::Added);

        std::fs::remove_file(temp.path().join("web.yaml")).expect("remove");
        let deleted = tokio::time::timeout(Duration::from_secs(5), feed.recv())
            .await
            .expect("rescan should notice")
            .expect("event");
        assert_eq!(deleted.kind, ChangeKind::Deleted);

        trigger.trigger();
    }

    #[tokio::test]
    async fn test_watch_missing_directory_fails() {
        let store = LocalResourceStore::new("/nonexistent/chartmgr-manifests");
        assert!(store.watch(Shutdown::never()).await.is_err());
    }
}
