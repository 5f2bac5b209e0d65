//! Content snapshot store — the durable memory of what was last synchronized.
//!
//! Two implementations:
//! - [`MemorySnapshotStore`] — process-local, used by tests and embedders
//!   that persist elsewhere.
//! - [`FileSnapshotStore`] — one JSON file per record under
//!   `<home>/.lingosync/{links,snapshots}/<link_id>.json`, written with the
//!   `.tmp` + rename pattern.
//!
//! `put` is an upsert with last-writer-wins on `updated_at`: a snapshot older
//! than the stored one is discarded.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use lingosync_core::{paths, LinkId, SyncLink, SyncSnapshot, SyncState};
use serde::de::DeserializeOwned;

use crate::error::{io_err, SyncError};

/// Storage for [`SyncLink`] and [`SyncSnapshot`] records keyed by [`LinkId`].
///
/// Implementations must give read-your-writes consistency within a process.
pub trait SnapshotStore: Send + Sync {
    fn get(&self, link_id: &LinkId) -> Result<Option<SyncSnapshot>, SyncError>;

    /// Upsert; returns `false` when a newer snapshot was already stored.
    fn put(&self, snapshot: SyncSnapshot) -> Result<bool, SyncError>;

    /// Every snapshot, ordered by link id.
    fn list(&self) -> Result<Vec<SyncSnapshot>, SyncError>;

    fn get_link(&self, link_id: &LinkId) -> Result<Option<SyncLink>, SyncError>;

    fn put_link(&self, link: SyncLink) -> Result<(), SyncError>;

    /// Snapshots in state `out-of-sync`.
    fn list_out_of_sync(&self) -> Result<Vec<SyncSnapshot>, SyncError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|s| s.state == SyncState::OutOfSync)
            .collect())
    }
}

fn supersedes(incoming: &SyncSnapshot, stored: Option<&SyncSnapshot>) -> bool {
    match stored {
        Some(stored) => incoming.updated_at >= stored.updated_at,
        None => true,
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<HashMap<LinkId, SyncSnapshot>>,
    links: Mutex<HashMap<LinkId, SyncLink>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn get(&self, link_id: &LinkId) -> Result<Option<SyncSnapshot>, SyncError> {
        let snapshots = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());
        Ok(snapshots.get(link_id).cloned())
    }

    fn put(&self, snapshot: SyncSnapshot) -> Result<bool, SyncError> {
        let mut snapshots = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());
        if !supersedes(&snapshot, snapshots.get(&snapshot.link_id)) {
            tracing::debug!(link_id = %snapshot.link_id, "discarding stale snapshot write");
            return Ok(false);
        }
        snapshots.insert(snapshot.link_id.clone(), snapshot);
        Ok(true)
    }

    fn list(&self) -> Result<Vec<SyncSnapshot>, SyncError> {
        let snapshots = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<_> = snapshots.values().cloned().collect();
        all.sort_by(|a, b| a.link_id.cmp(&b.link_id));
        Ok(all)
    }

    fn get_link(&self, link_id: &LinkId) -> Result<Option<SyncLink>, SyncError> {
        let links = self.links.lock().unwrap_or_else(|e| e.into_inner());
        Ok(links.get(link_id).cloned())
    }

    fn put_link(&self, link: SyncLink) -> Result<(), SyncError> {
        let mut links = self.links.lock().unwrap_or_else(|e| e.into_inner());
        links.insert(link.link_id.clone(), link);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File-backed store
// ---------------------------------------------------------------------------

/// Path of the snapshot JSON for `link_id`, rooted at `home`.
pub fn snapshot_path_at(home: &Path, link_id: &LinkId) -> PathBuf {
    paths::snapshots_dir(home).join(format!("{}.json", link_id.0))
}

/// Path of the link JSON for `link_id`, rooted at `home`.
pub fn link_path_at(home: &Path, link_id: &LinkId) -> PathBuf {
    paths::links_dir(home).join(format!("{}.json", link_id.0))
}

/// Store rooted at `<home>/.lingosync/`.
#[derive(Debug)]
pub struct FileSnapshotStore {
    home: PathBuf,
    // Serializes the read-compare-write in `put`.
    write_guard: Mutex<()>,
}

impl FileSnapshotStore {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            write_guard: Mutex::new(()),
        }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn get(&self, link_id: &LinkId) -> Result<Option<SyncSnapshot>, SyncError> {
        read_json(&snapshot_path_at(&self.home, link_id))
    }

    fn put(&self, snapshot: SyncSnapshot) -> Result<bool, SyncError> {
        let _guard = self.write_guard.lock().unwrap_or_else(|e| e.into_inner());
        let stored = self.get(&snapshot.link_id)?;
        if !supersedes(&snapshot, stored.as_ref()) {
            tracing::debug!(link_id = %snapshot.link_id, "discarding stale snapshot write");
            return Ok(false);
        }
        let json = serde_json::to_vec_pretty(&snapshot)?;
        paths::write_atomic(&snapshot_path_at(&self.home, &snapshot.link_id), &json)?;
        Ok(true)
    }

    fn list(&self) -> Result<Vec<SyncSnapshot>, SyncError> {
        let dir = paths::snapshots_dir(&self.home);
        if !dir.exists() {
            return Ok(vec![]);
        }
        let mut entries: Vec<_> = std::fs::read_dir(&dir)
            .map_err(|e| io_err(&dir, e))?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
            .collect();
        entries.sort_by_key(|e| e.file_name());

        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            if let Some(snapshot) = read_json::<SyncSnapshot>(&entry.path())? {
                out.push(snapshot);
            }
        }
        Ok(out)
    }

    fn get_link(&self, link_id: &LinkId) -> Result<Option<SyncLink>, SyncError> {
        read_json(&link_path_at(&self.home, link_id))
    }

    fn put_link(&self, link: SyncLink) -> Result<(), SyncError> {
        let json = serde_json::to_vec_pretty(&link)?;
        paths::write_atomic(&link_path_at(&self.home, &link.link_id), &json)?;
        Ok(())
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, SyncError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_err(path, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use lingosync_core::{DocumentId, Language};
    use tempfile::TempDir;

    fn snapshot(id: &str, state: SyncState) -> SyncSnapshot {
        let mut s = SyncSnapshot::new(LinkId::from(id), Utc::now());
        s.state = state;
        s
    }

    fn exercise_store(store: &dyn SnapshotStore) {
        assert!(store.get(&LinkId::from("a")).unwrap().is_none());

        store.put(snapshot("b", SyncState::OutOfSync)).unwrap();
        store.put(snapshot("a", SyncState::Synced)).unwrap();
        store.put(snapshot("c", SyncState::OutOfSync)).unwrap();

        assert_eq!(
            store.get(&LinkId::from("a")).unwrap().map(|s| s.state),
            Some(SyncState::Synced)
        );
        let ids: Vec<_> = store.list().unwrap().into_iter().map(|s| s.link_id.0).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        let out: Vec<_> = store
            .list_out_of_sync()
            .unwrap()
            .into_iter()
            .map(|s| s.link_id.0)
            .collect();
        assert_eq!(out, ["b", "c"]);
    }

    fn exercise_last_writer_wins(store: &dyn SnapshotStore) {
        let newer = snapshot("lww", SyncState::Synced);
        let mut older = newer.clone();
        older.state = SyncState::Failed;
        older.updated_at = newer.updated_at - Duration::seconds(5);

        assert!(store.put(newer).unwrap());
        assert!(!store.put(older).unwrap());
        assert_eq!(
            store.get(&LinkId::from("lww")).unwrap().map(|s| s.state),
            Some(SyncState::Synced)
        );
    }

    #[test]
    fn memory_store_upsert_and_list() {
        exercise_store(&MemorySnapshotStore::new());
    }

    #[test]
    fn memory_store_last_writer_wins() {
        exercise_last_writer_wins(&MemorySnapshotStore::new());
    }

    #[test]
    fn file_store_upsert_and_list() {
        let home = TempDir::new().unwrap();
        exercise_store(&FileSnapshotStore::new(home.path()));
    }

    #[test]
    fn file_store_last_writer_wins() {
        let home = TempDir::new().unwrap();
        exercise_last_writer_wins(&FileSnapshotStore::new(home.path()));
    }

    #[test]
    fn file_store_survives_reopen() {
        let home = TempDir::new().unwrap();
        let link = SyncLink::new(DocumentId::from(318), Language::from("fa"), Language::from("en"));
        {
            let store = FileSnapshotStore::new(home.path());
            store.put_link(link.clone()).unwrap();
            store.put(SyncSnapshot::new(link.link_id.clone(), Utc::now())).unwrap();
        }
        let reopened = FileSnapshotStore::new(home.path());
        assert_eq!(reopened.get_link(&link.link_id).unwrap(), Some(link.clone()));
        assert!(reopened.get(&link.link_id).unwrap().is_some());
        assert!(!snapshot_path_at(home.path(), &link.link_id)
            .with_extension("json.tmp")
            .exists());
    }

    #[test]
    fn corrupt_snapshot_is_a_json_error() {
        let home = TempDir::new().unwrap();
        let path = snapshot_path_at(home.path(), &LinkId::from("bad"));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        let store = FileSnapshotStore::new(home.path());
        let err = store.get(&LinkId::from("bad")).unwrap_err();
        assert!(matches!(err, SyncError::Json(_)), "got: {err}");
    }
}
