//! # lingosync-sync
//!
//! Keeps target-language documents in line with their source documents.
//!
//! Build a [`Reconciler`] from a [`ContentRepository`], a
//! [`TranslationService`] and a [`SnapshotStore`], then call
//! [`Reconciler::reconcile`] for one pair or [`pipeline::run`] for a batch.

pub mod change;
pub mod collaborators;
pub mod directory;
pub mod error;
pub mod merge;
pub mod pipeline;
pub mod reconcile;
pub mod snapshot_store;
pub mod state;

pub use change::ChangeSignal;
pub use collaborators::{CollaboratorError, ContentRepository, TranslationService};
pub use error::{SyncError, ValidationError};
pub use merge::{TargetFieldSet, TranslationRequest, TranslationResponse};
pub use reconcile::{Reconciler, SyncOutcome};
pub use snapshot_store::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore};
