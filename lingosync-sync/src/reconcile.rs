//! Reconciliation orchestrator.
//!
//! ## `reconcile` — one attempt for a (source document, target language) pair
//!
//! 1. Take the per-link lock (a second caller gets `Busy`).
//! 2. Fetch the source; resolve or create the link and its snapshot.
//! 3. Refuse a `pending` snapshot still inside the liveness window; reclaim
//!    an abandoned one.
//! 4. Run the change detector → `Unchanged` when synced and current.
//! 5. `→ pending`, translate, validate, merge.
//! 6. Re-fetch the source; discard the result and restart if it moved.
//! 7. Create or update the target (conflict check first on update).
//! 8. Verify the written document, advance hashes, `→ synced`.
//!
//! Any failure after step 5 leaves the snapshot hashes where they were and
//! moves the link to `failed`.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::OwnedMutexGuard;

use lingosync_core::{
    Document, DocumentId, EngineConfig, Language, LinkId, PolicyRegistry, SyncLink, SyncSnapshot,
    SyncState,
};

use crate::change::{self, content_hash};
use crate::collaborators::{CollaboratorError, ContentRepository, TranslationService};
use crate::error::{SyncError, ValidationError};
use crate::merge::{self, TargetFieldSet, TranslationRequest, TranslationResponse};
use crate::snapshot_store::SnapshotStore;
use crate::state::{self, SyncEvent};

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result of one `reconcile` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncOutcome {
    /// Source unchanged since the last sync; nothing was written.
    Unchanged,
    /// A new target-language document was created.
    Created,
    /// The existing target-language document was updated.
    Updated,
    /// The translation payload stayed invalid after every re-request.
    ValidationFailed,
    /// A collaborator kept failing or timing out.
    TransportFailed,
    /// The target was changed outside the engine; left for an operator.
    Conflict,
    /// Another reconciliation for the link is in flight.
    Busy,
    /// The source kept changing while translations were in flight.
    Superseded,
}

impl SyncOutcome {
    /// `true` when the target now reflects the source.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            SyncOutcome::Unchanged | SyncOutcome::Created | SyncOutcome::Updated
        )
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncOutcome::Unchanged => "unchanged",
            SyncOutcome::Created => "created",
            SyncOutcome::Updated => "updated",
            SyncOutcome::ValidationFailed => "validation-failed",
            SyncOutcome::TransportFailed => "transport-failed",
            SyncOutcome::Conflict => "conflict",
            SyncOutcome::Busy => "busy",
            SyncOutcome::Superseded => "superseded",
        };
        f.write_str(s)
    }
}

fn outcome_for(err: &SyncError) -> SyncOutcome {
    match err {
        SyncError::Validation(_) => SyncOutcome::ValidationFailed,
        SyncError::Conflict { .. } => SyncOutcome::Conflict,
        SyncError::LockContention(_) => SyncOutcome::Busy,
        SyncError::Transport(_)
        | SyncError::Timeout { .. }
        | SyncError::Io { .. }
        | SyncError::Json(_)
        | SyncError::Core(_)
        | SyncError::IllegalTransition { .. } => SyncOutcome::TransportFailed,
    }
}

// ---------------------------------------------------------------------------
// Per-link locks
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LinkLocks {
    inner: Mutex<HashMap<LinkId, Arc<tokio::sync::Mutex<()>>>>,
}

impl LinkLocks {
    /// Non-blocking acquire; `None` while another holder is active.
    fn try_acquire(&self, link_id: &LinkId) -> Option<OwnedMutexGuard<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        // Entries whose only reference is the map are idle.
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
        let lock = map.entry(link_id.clone()).or_default().clone();
        lock.try_lock_owned().ok()
    }
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

enum Attempt {
    Written {
        document: Document,
        created: bool,
        translation_hash: String,
    },
    /// The source moved while translating; carries the fresh copy.
    Superseded(Document),
}

/// Drives reconciliations against a repository, a translator and a store.
pub struct Reconciler {
    repository: Arc<dyn ContentRepository>,
    translator: Arc<dyn TranslationService>,
    store: Arc<dyn SnapshotStore>,
    registry: Arc<PolicyRegistry>,
    config: EngineConfig,
    locks: LinkLocks,
}

impl Reconciler {
    pub fn new(
        repository: Arc<dyn ContentRepository>,
        translator: Arc<dyn TranslationService>,
        store: Arc<dyn SnapshotStore>,
        registry: Arc<PolicyRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            repository,
            translator,
            store,
            registry,
            config,
            locks: LinkLocks::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Bring the `target_language` variant of `source_id` in line with the source.
    ///
    /// Never fails: every error is logged and mapped onto a [`SyncOutcome`].
    pub async fn reconcile(&self, source_id: &DocumentId, target_language: &Language) -> SyncOutcome {
        let link_id = LinkId::derive(source_id, target_language);
        let Some(_guard) = self.locks.try_acquire(&link_id) else {
            tracing::info!(%link_id, "reconciliation already in flight");
            return SyncOutcome::Busy;
        };

        let outcome = match self.run(&link_id, source_id, target_language).await {
            Ok(outcome) => outcome,
            Err(SyncError::LockContention(_)) => {
                tracing::info!(%link_id, "attempt pending in another process");
                SyncOutcome::Busy
            }
            Err(err) => {
                tracing::error!(%link_id, error = %err, "reconciliation failed");
                outcome_for(&err)
            }
        };
        tracing::info!(%link_id, source = %source_id, target = %target_language, %outcome, "reconciled");
        outcome
    }

    /// `reconcile` for an existing link.
    pub async fn reconcile_link(&self, link_id: &LinkId) -> SyncOutcome {
        match self.store.get_link(link_id) {
            Ok(Some(link)) => {
                self.reconcile(&link.source_document_id, &link.target_language)
                    .await
            }
            Ok(None) => {
                tracing::warn!(%link_id, "unknown link");
                SyncOutcome::TransportFailed
            }
            Err(err) => {
                tracing::error!(%link_id, error = %err, "failed to load link");
                outcome_for(&err)
            }
        }
    }

    /// Mark every `synced` link whose source changed as `out-of-sync`.
    ///
    /// Links currently being reconciled are skipped. Returns the marked links.
    pub async fn scan_for_changes(&self) -> Result<Vec<LinkId>, SyncError> {
        let mut marked = Vec::new();
        for mut snapshot in self.store.list()? {
            if snapshot.state != SyncState::Synced {
                continue;
            }
            let Some(_guard) = self.locks.try_acquire(&snapshot.link_id) else {
                continue;
            };
            let Some(link) = self.store.get_link(&snapshot.link_id)? else {
                continue;
            };
            let source = match self
                .fetch_document(&link.source_document_id, &link.source_language)
                .await
            {
                Ok(doc) => doc,
                Err(err) => {
                    tracing::warn!(link_id = %link.link_id, error = %err, "scan could not fetch source");
                    continue;
                }
            };
            if change::has_changed(&source, Some(&snapshot), &self.registry) {
                state::transition(&mut snapshot, SyncEvent::SourceChanged, Utc::now())?;
                self.store.put(snapshot)?;
                tracing::info!(link_id = %link.link_id, "source changed; marked out-of-sync");
                marked.push(link.link_id);
            }
        }
        Ok(marked)
    }

    async fn run(
        &self,
        link_id: &LinkId,
        source_id: &DocumentId,
        target_language: &Language,
    ) -> Result<SyncOutcome, SyncError> {
        let existing = self.store.get_link(link_id)?;
        let source_language = existing
            .as_ref()
            .map(|l| l.source_language.clone())
            .unwrap_or_else(|| self.config.source_language.clone());
        let mut source = self.fetch_document(source_id, &source_language).await?;

        let mut link = match existing {
            Some(link) => link,
            None => self.discover_link(source_id, &source_language, target_language).await?,
        };
        let mut snapshot = match self.store.get(link_id)? {
            Some(snapshot) => snapshot,
            None => {
                let snapshot = SyncSnapshot::new(link_id.clone(), Utc::now());
                self.store.put(snapshot.clone())?;
                snapshot
            }
        };

        if snapshot.state == SyncState::Pending {
            if !state::is_abandoned(&snapshot, self.config.liveness_window(), Utc::now()) {
                return Err(SyncError::LockContention(link_id.clone()));
            }
            tracing::warn!(%link_id, since = %snapshot.updated_at, "reclaiming abandoned attempt");
            state::transition(&mut snapshot, SyncEvent::Abandoned, Utc::now())?;
            self.store.put(snapshot.clone())?;
        }

        let mut restarts = 0;
        loop {
            let signal = change::check(&source, Some(&snapshot), &self.registry);
            if snapshot.state == SyncState::Synced {
                if !signal.requires_work() {
                    return Ok(SyncOutcome::Unchanged);
                }
                state::transition(&mut snapshot, SyncEvent::SourceChanged, Utc::now())?;
                self.store.put(snapshot.clone())?;
            }

            state::transition(&mut snapshot, SyncEvent::Begin, Utc::now())?;
            self.store.put(snapshot.clone())?;

            let source_hash = content_hash(&source, &self.registry);
            let attempt = self
                .attempt(&mut link, &mut snapshot, &source, &source_hash)
                .await;
            match attempt {
                Ok(Attempt::Written {
                    document,
                    created,
                    translation_hash,
                }) => {
                    if created {
                        link.target_document_id = Some(document.id.clone());
                        self.store.put_link(link.clone())?;
                    }
                    snapshot.last_source_hash = Some(source_hash);
                    snapshot.last_applied_translation_hash = Some(translation_hash);
                    snapshot.last_target_modified_at = Some(document.modified_at);
                    state::transition(&mut snapshot, SyncEvent::WriteSucceeded, Utc::now())?;
                    self.store.put(snapshot)?;
                    return Ok(if created {
                        SyncOutcome::Created
                    } else {
                        SyncOutcome::Updated
                    });
                }
                Ok(Attempt::Superseded(fresh)) => {
                    state::transition(&mut snapshot, SyncEvent::AttemptFailed, Utc::now())?;
                    self.store.put(snapshot.clone())?;
                    if restarts >= self.config.max_supersede_restarts {
                        tracing::warn!(%link_id, restarts, "source keeps changing; giving up for now");
                        return Ok(SyncOutcome::Superseded);
                    }
                    restarts += 1;
                    tracing::info!(%link_id, restarts, "source changed mid-attempt; restarting");
                    source = fresh;
                }
                Err(err) => {
                    state::transition(&mut snapshot, SyncEvent::AttemptFailed, Utc::now())?;
                    self.store.put(snapshot)?;
                    return Err(err);
                }
            }
        }
    }

    /// First sight of a pair: adopt an existing counterpart if the repository has one.
    async fn discover_link(
        &self,
        source_id: &DocumentId,
        source_language: &Language,
        target_language: &Language,
    ) -> Result<SyncLink, SyncError> {
        let mut link = SyncLink::new(
            source_id.clone(),
            source_language.clone(),
            target_language.clone(),
        );
        link.target_document_id = self.find_linked(source_id, target_language).await?;
        if let Some(target) = &link.target_document_id {
            tracing::info!(link_id = %link.link_id, %target, "adopting existing counterpart");
        }
        self.store.put_link(link.clone())?;
        Ok(link)
    }

    async fn attempt(
        &self,
        link: &mut SyncLink,
        snapshot: &mut SyncSnapshot,
        source: &Document,
        source_hash: &str,
    ) -> Result<Attempt, SyncError> {
        let request = TranslationRequest::build(source, &link.target_language, &self.registry);
        let (target, response) = self.translate_validated(source, request).await?;

        let fresh = self
            .fetch_document(&link.source_document_id, &link.source_language)
            .await?;
        if content_hash(&fresh, &self.registry) != source_hash {
            return Ok(Attempt::Superseded(fresh));
        }

        // A create from an earlier attempt may have landed without being recorded.
        if link.target_document_id.is_none() {
            if let Some(id) = self
                .find_linked(&link.source_document_id, &link.target_language)
                .await?
            {
                tracing::info!(link_id = %link.link_id, %id, "adopting unrecorded target");
                link.target_document_id = Some(id);
                self.store.put_link(link.clone())?;
            }
        }

        if let Some(target_id) = &link.target_document_id {
            self.check_conflict(link, snapshot, target_id).await?;
        }
        snapshot.last_attempted_target_hash = Some(target.digest());
        self.store.put(snapshot.clone())?;

        let (document, created) = match &link.target_document_id {
            None => (self.create_target(link, &target).await?, true),
            Some(target_id) => (self.update_target(link, target_id, &target).await?, false),
        };

        if !target.matches(&document) {
            return Err(SyncError::Conflict {
                link_id: link.link_id.clone(),
                reason: format!("document {} does not carry the applied fields", document.id),
            });
        }
        Ok(Attempt::Written {
            document,
            created,
            translation_hash: response.digest(),
        })
    }

    /// Translate and merge, re-requesting strictly after an invalid payload.
    async fn translate_validated(
        &self,
        source: &Document,
        mut request: TranslationRequest,
    ) -> Result<(TargetFieldSet, TranslationResponse), SyncError> {
        let translator = &*self.translator;
        let mut round = 0;
        loop {
            let req = &request;
            let payload = self
                .call("translate", self.config.translation_timeout(), move || async move {
                    match translator.translate(req).await {
                        Ok(response) => Ok(Ok(response)),
                        Err(CollaboratorError::Rejected(msg)) => {
                            Ok(Err(ValidationError::NotAnObject(msg)))
                        }
                        Err(err) => Err(err),
                    }
                })
                .await?;

            let problem = match payload
                .and_then(|response| merge::apply(source, &response, &self.registry).map(|t| (t, response)))
            {
                Ok(merged) => return Ok(merged),
                Err(problem) => problem,
            };
            if round >= self.config.max_validation_retries {
                return Err(problem.into());
            }
            round += 1;
            tracing::warn!(source = %source.id, round, error = %problem, "invalid translation; re-requesting");
            request = request.tightened(&problem);
        }
    }

    async fn check_conflict(
        &self,
        link: &SyncLink,
        snapshot: &SyncSnapshot,
        target_id: &DocumentId,
    ) -> Result<(), SyncError> {
        let repo = &*self.repository;
        let lang = &link.target_language;
        let current = self
            .call("get target document", self.config.repository_timeout(), move || async move {
                match repo.get_document(target_id, lang).await {
                    Ok(doc) => Ok(Some(doc)),
                    Err(CollaboratorError::NotFound) => Ok(None),
                    Err(err) => Err(err),
                }
            })
            .await?;

        let conflict = |reason: String| SyncError::Conflict {
            link_id: link.link_id.clone(),
            reason,
        };
        let Some(current) = current else {
            return Err(conflict(format!("target document {target_id} no longer exists")));
        };
        let Some(last) = snapshot.last_target_modified_at else {
            return Ok(());
        };
        if current.modified_at <= last {
            return Ok(());
        }
        // Our own write may have landed after its reply was lost.
        let ours = snapshot.last_attempted_target_hash.as_deref()
            == Some(TargetFieldSet::managed(&current, &self.registry).digest().as_str());
        if ours {
            tracing::info!(link_id = %link.link_id, %target_id, "target carries the last attempted write");
            return Ok(());
        }
        Err(conflict(format!(
            "target document {target_id} edited at {} after last sync at {last}",
            current.modified_at
        )))
    }

    /// Create the target; before each retry, look for a create that landed anyway.
    async fn create_target(
        &self,
        link: &SyncLink,
        target: &TargetFieldSet,
    ) -> Result<Document, SyncError> {
        let timeout = self.config.repository_timeout();
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                if let Some(id) = self
                    .find_linked(&link.source_document_id, &link.target_language)
                    .await?
                {
                    tracing::info!(link_id = %link.link_id, %id, "earlier create landed; adopting it");
                    return self.fetch_document(&id, &link.target_language).await;
                }
            }

            let result = tokio::time::timeout(
                timeout,
                self.repository
                    .create_document(&link.source_document_id, &link.target_language, target),
            )
            .await;
            let last = match result {
                Ok(Ok(doc)) => return Ok(doc),
                Ok(Err(err)) if err.is_retryable() => SyncError::Transport(err.to_string()),
                Ok(Err(err)) => return Err(SyncError::Transport(format!("create document: {err}"))),
                Err(_) => timeout_err("create document", timeout),
            };
            if attempt >= self.config.max_transport_retries {
                return Err(last);
            }
            attempt += 1;
            tracing::warn!(link_id = %link.link_id, attempt, error = %last, "create failed; retrying");
            tokio::time::sleep(self.config.backoff(attempt)).await;
        }
    }

    async fn update_target(
        &self,
        link: &SyncLink,
        target_id: &DocumentId,
        target: &TargetFieldSet,
    ) -> Result<Document, SyncError> {
        let repo = &*self.repository;
        let lang = &link.target_language;
        self.call("update document", self.config.repository_timeout(), move || async move {
            repo.update_document(target_id, lang, target).await
        })
        .await
    }

    async fn fetch_document(
        &self,
        id: &DocumentId,
        language: &Language,
    ) -> Result<Document, SyncError> {
        let repo = &*self.repository;
        self.call("get document", self.config.repository_timeout(), move || async move {
            repo.get_document(id, language).await
        })
        .await
    }

    async fn find_linked(
        &self,
        source_id: &DocumentId,
        target_language: &Language,
    ) -> Result<Option<DocumentId>, SyncError> {
        let repo = &*self.repository;
        self.call("find linked document", self.config.repository_timeout(), move || async move {
            repo.find_linked_document(source_id, target_language).await
        })
        .await
    }

    /// Bounded-wait call with exponential backoff on transient failures.
    async fn call<F, Fut, V>(
        &self,
        operation: &'static str,
        timeout: Duration,
        mut f: F,
    ) -> Result<V, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<V, CollaboratorError>>,
    {
        let mut attempt = 0;
        loop {
            let last = match tokio::time::timeout(timeout, f()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) if err.is_retryable() => {
                    SyncError::Transport(format!("{operation}: {err}"))
                }
                Ok(Err(err)) => return Err(SyncError::Transport(format!("{operation}: {err}"))),
                Err(_) => timeout_err(operation, timeout),
            };
            if attempt >= self.config.max_transport_retries {
                return Err(last);
            }
            attempt += 1;
            tracing::warn!(operation, attempt, error = %last, "retrying");
            tokio::time::sleep(self.config.backoff(attempt)).await;
        }
    }
}

fn timeout_err(operation: &'static str, timeout: Duration) -> SyncError {
    SyncError::Timeout {
        operation,
        millis: timeout.as_millis().min(u64::MAX as u128) as u64,
    }
}
