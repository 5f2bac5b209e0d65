//! Link lifecycle state machine.
//!
//! ```text
//! not-linked  --begin------------> pending
//! pending     --write succeeded--> synced
//! pending     --attempt failed---> failed
//! pending     --abandoned--------> failed
//! synced      --source changed---> out-of-sync
//! out-of-sync --begin------------> pending
//! failed      --begin------------> pending
//! ```
//!
//! Every decision the orchestrator makes about a link goes through
//! [`transition`]; callers never assign `SyncSnapshot::state` directly.

use chrono::{DateTime, Utc};

use lingosync_core::{SyncSnapshot, SyncState};

use crate::error::SyncError;

/// Something that happened to a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    /// Reconciliation starts (first attempt, re-trigger, or retry).
    Begin,
    /// The repository write succeeded and matched the applied field set.
    WriteSucceeded,
    /// Validation or transport retries were exhausted, or a conflict was found.
    AttemptFailed,
    /// The change detector found the source differs from `last_source_hash`.
    SourceChanged,
    /// A `pending` snapshot outlived the liveness window.
    Abandoned,
}

/// Target state for `event` in `from`, or `IllegalTransition`.
pub fn next_state(from: SyncState, event: SyncEvent) -> Result<SyncState, SyncError> {
    use SyncEvent::*;
    use SyncState::*;

    let to = match event {
        Begin => Pending,
        WriteSucceeded => Synced,
        AttemptFailed | Abandoned => Failed,
        SourceChanged => OutOfSync,
    };
    if is_legal(from, to) {
        Ok(to)
    } else {
        Err(SyncError::IllegalTransition { from, to })
    }
}

/// The edges of the lifecycle graph.
pub fn is_legal(from: SyncState, to: SyncState) -> bool {
    use SyncState::*;
    matches!(
        (from, to),
        (NotLinked, Pending)
            | (Pending, Synced)
            | (Pending, Failed)
            | (Synced, OutOfSync)
            | (OutOfSync, Pending)
            | (Failed, Pending)
    )
}

/// Apply `event` to `snapshot`, stamping `updated_at` with `now`.
pub fn transition(
    snapshot: &mut SyncSnapshot,
    event: SyncEvent,
    now: DateTime<Utc>,
) -> Result<SyncState, SyncError> {
    let to = next_state(snapshot.state, event)?;
    tracing::debug!(
        link_id = %snapshot.link_id,
        from = %snapshot.state,
        to = %to,
        ?event,
        "state transition"
    );
    snapshot.state = to;
    // Keep last-writer-wins ordering strict even when the clock stalls.
    snapshot.updated_at = if now > snapshot.updated_at {
        now
    } else {
        snapshot.updated_at + chrono::Duration::microseconds(1)
    };
    Ok(to)
}

/// `true` for a `pending` snapshot whose last update is older than `window`.
pub fn is_abandoned(
    snapshot: &SyncSnapshot,
    window: chrono::Duration,
    now: DateTime<Utc>,
) -> bool {
    snapshot.state == SyncState::Pending && now.signed_duration_since(snapshot.updated_at) > window
}

/// States a scheduler may leave untouched indefinitely.
pub fn is_rest_state(state: SyncState) -> bool {
    matches!(state, SyncState::Synced | SyncState::Failed)
}
