//! Contracts of the external systems the engine drives.
//!
//! Transport, authentication and prompt construction live behind these
//! traits; the engine only sees documents and translation payloads.

use async_trait::async_trait;
use thiserror::Error;

use lingosync_core::{Document, DocumentId, Language};

use crate::merge::{TargetFieldSet, TranslationRequest, TranslationResponse};

/// Failure reported by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    /// Network, auth or rate-limit failure; worth retrying with backoff.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The collaborator refused the request; retrying it unchanged won't help.
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("not found")]
    NotFound,
}

impl CollaboratorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CollaboratorError::Transient(_))
    }
}

/// The content repository holding every language variant.
#[async_trait]
pub trait ContentRepository: Send + Sync {
    async fn get_document(
        &self,
        id: &DocumentId,
        language: &Language,
    ) -> Result<Document, CollaboratorError>;

    /// Create a document; the returned document carries the new id.
    async fn create_document(
        &self,
        source_id: &DocumentId,
        language: &Language,
        fields: &TargetFieldSet,
    ) -> Result<Document, CollaboratorError>;

    async fn update_document(
        &self,
        id: &DocumentId,
        language: &Language,
        fields: &TargetFieldSet,
    ) -> Result<Document, CollaboratorError>;

    /// Id of the `target_language` counterpart of `source_id`, if any.
    async fn find_linked_document(
        &self,
        source_id: &DocumentId,
        target_language: &Language,
    ) -> Result<Option<DocumentId>, CollaboratorError>;
}

/// The machine translation provider.
#[async_trait]
pub trait TranslationService: Send + Sync {
    /// Translate `request`. A syntactically invalid model answer is reported
    /// as `Err(Rejected)`; a parsed but schema-invalid one is returned as-is
    /// and caught by validation.
    async fn translate(
        &self,
        request: &TranslationRequest,
    ) -> Result<TranslationResponse, CollaboratorError>;
}
