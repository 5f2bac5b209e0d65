//! Batch entrypoint used by the CLI and by external schedulers.
//!
//! Reconciliations for different links run concurrently; the per-link lock
//! inside [`Reconciler`] keeps duplicate requests for one link apart.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;

use lingosync_core::{DocumentId, Language, LinkId};

use crate::reconcile::{Reconciler, SyncOutcome};
use crate::snapshot_store::SnapshotStore;
use crate::state::{self, SyncEvent};
use crate::SyncError;

/// Scope for a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileScope {
    /// Every link currently marked out-of-sync.
    OutOfSync,
    /// One known link.
    Link(LinkId),
    /// Every (source, target language) pair; unlinked sources are discovered.
    Documents {
        sources: Vec<DocumentId>,
        targets: Vec<Language>,
    },
}

/// Outcome for one pair in a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileResult {
    pub link_id: LinkId,
    pub source_id: DocumentId,
    pub target_language: Language,
    pub outcome: SyncOutcome,
}

/// Run the reconciliation pipeline for a scope. Results are ordered by link id.
pub async fn run(
    reconciler: Arc<Reconciler>,
    scope: ReconcileScope,
) -> Result<Vec<ReconcileResult>, SyncError> {
    let pairs = resolve(reconciler.store().as_ref(), scope)?;

    let mut tasks = JoinSet::new();
    for (source_id, target_language) in pairs {
        let reconciler = reconciler.clone();
        tasks.spawn(async move {
            let outcome = reconciler.reconcile(&source_id, &target_language).await;
            ReconcileResult {
                link_id: LinkId::derive(&source_id, &target_language),
                source_id,
                target_language,
                outcome,
            }
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(err) => tracing::error!(error = %err, "reconcile task panicked"),
        }
    }
    results.sort_by(|a, b| a.link_id.cmp(&b.link_id));
    Ok(results)
}

fn resolve(
    store: &dyn SnapshotStore,
    scope: ReconcileScope,
) -> Result<Vec<(DocumentId, Language)>, SyncError> {
    let mut pairs = Vec::new();
    match scope {
        ReconcileScope::OutOfSync => {
            for snapshot in store.list_out_of_sync()? {
                match store.get_link(&snapshot.link_id)? {
                    Some(link) => pairs.push((link.source_document_id, link.target_language)),
                    None => tracing::warn!(link_id = %snapshot.link_id, "snapshot without link"),
                }
            }
        }
        ReconcileScope::Link(link_id) => {
            if let Some(link) = store.get_link(&link_id)? {
                pairs.push((link.source_document_id, link.target_language));
            } else {
                tracing::warn!(%link_id, "unknown link");
            }
        }
        ReconcileScope::Documents { sources, targets } => {
            for source in &sources {
                for target in &targets {
                    pairs.push((source.clone(), target.clone()));
                }
            }
        }
    }
    pairs.dedup();
    Ok(pairs)
}

/// Mark every `pending` snapshot older than `window` as `failed`.
///
/// Run at startup so an attempt cut short by a crash becomes retryable
/// instead of blocking its link forever.
pub fn recover_abandoned(
    store: &dyn SnapshotStore,
    window: chrono::Duration,
    now: DateTime<Utc>,
) -> Result<Vec<LinkId>, SyncError> {
    let mut recovered = Vec::new();
    for mut snapshot in store.list()? {
        if !state::is_abandoned(&snapshot, window, now) {
            continue;
        }
        state::transition(&mut snapshot, SyncEvent::Abandoned, now)?;
        let link_id = snapshot.link_id.clone();
        if store.put(snapshot)? {
            tracing::warn!(%link_id, "abandoned attempt marked failed");
            recovered.push(link_id);
        }
    }
    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use lingosync_core::{SyncLink, SyncSnapshot, SyncState};

    use crate::snapshot_store::MemorySnapshotStore;

    fn seed(store: &MemorySnapshotStore, source: u64, state: SyncState, age: Duration) -> LinkId {
        let link = SyncLink::new(DocumentId::from(source), Language::from("fa"), Language::from("en"));
        let mut snap = SyncSnapshot::new(link.link_id.clone(), Utc::now() - age);
        snap.state = state;
        store.put_link(link.clone()).unwrap();
        store.put(snap).unwrap();
        link.link_id
    }

    #[test]
    fn recover_only_touches_stale_pending() {
        let store = MemorySnapshotStore::new();
        let stale = seed(&store, 1, SyncState::Pending, Duration::hours(2));
        let fresh = seed(&store, 2, SyncState::Pending, Duration::seconds(10));
        let synced = seed(&store, 3, SyncState::Synced, Duration::hours(2));

        let recovered = recover_abandoned(&store, Duration::minutes(15), Utc::now()).unwrap();
        assert_eq!(recovered, vec![stale.clone()]);
        assert_eq!(store.get(&stale).unwrap().unwrap().state, SyncState::Failed);
        assert_eq!(store.get(&fresh).unwrap().unwrap().state, SyncState::Pending);
        assert_eq!(store.get(&synced).unwrap().unwrap().state, SyncState::Synced);
    }

    #[test]
    fn out_of_sync_scope_resolves_links() {
        let store = MemorySnapshotStore::new();
        seed(&store, 1, SyncState::OutOfSync, Duration::zero());
        seed(&store, 2, SyncState::Synced, Duration::zero());

        let pairs = resolve(&store, ReconcileScope::OutOfSync).unwrap();
        assert_eq!(pairs, vec![(DocumentId::from(1), Language::from("en"))]);
    }

    #[test]
    fn documents_scope_is_a_cross_product() {
        let store = MemorySnapshotStore::new();
        let pairs = resolve(
            &store,
            ReconcileScope::Documents {
                sources: vec![DocumentId::from(1), DocumentId::from(2)],
                targets: vec![Language::from("en"), Language::from("de")],
            },
        )
        .unwrap();
        assert_eq!(pairs.len(), 4);
    }
}
