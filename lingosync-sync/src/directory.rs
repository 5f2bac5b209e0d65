//! Directory-backed collaborators for local runs and the CLI.
//!
//! ```text
//! <documents>/
//!   links.json                  {source_id: {language: target_id}}
//!   <language>/<id>.json        one document
//! <translations>/
//!   <target_language>/<source_id>.json   raw provider answer
//! ```
//!
//! Files are small and local, so plain blocking I/O is used.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lingosync_core::{paths, Document, DocumentId, FieldSet, Language};

use crate::collaborators::{CollaboratorError, ContentRepository, TranslationService};
use crate::merge::{TargetFieldSet, TranslationRequest, TranslationResponse};

pub const LINKS_FILE: &str = "links.json";

type LinkIndex = BTreeMap<DocumentId, BTreeMap<Language, DocumentId>>;

/// On-disk document. Id and language come from the file path; a missing
/// `modified_at` falls back to the file's mtime.
#[derive(Debug, Serialize, Deserialize)]
struct StoredDocument {
    title: String,
    #[serde(default, alias = "content")]
    body: String,
    #[serde(default)]
    slug: String,
    #[serde(default)]
    fields: FieldSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    modified_at: Option<DateTime<Utc>>,
}

fn transient(path: &Path, err: impl std::fmt::Display) -> CollaboratorError {
    CollaboratorError::Transient(format!("{}: {err}", path.display()))
}

/// Read one document file in the on-disk layout.
pub fn read_document_file(
    path: &Path,
    id: &DocumentId,
    language: &Language,
) -> Result<Document, CollaboratorError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(CollaboratorError::NotFound),
        Err(e) => return Err(transient(path, e)),
    };
    let stored: StoredDocument = serde_json::from_str(&raw)
        .map_err(|e| CollaboratorError::Rejected(format!("{}: {e}", path.display())))?;
    let modified_at = match stored.modified_at {
        Some(at) => at,
        None => std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .map_err(|e| transient(path, e))?,
    };
    Ok(Document {
        id: id.clone(),
        language: language.clone(),
        title: stored.title,
        body: stored.body,
        slug: stored.slug,
        fields: stored.fields,
        content_hash: None,
        modified_at,
    })
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// [`ContentRepository`] over a directory of JSON documents.
#[derive(Debug)]
pub struct DirectoryRepository {
    root: PathBuf,
    write_guard: Mutex<()>,
}

impl DirectoryRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_guard: Mutex::new(()),
        }
    }

    pub fn document_path(&self, id: &DocumentId, language: &Language) -> PathBuf {
        self.root.join(&language.0).join(format!("{}.json", id.0))
    }

    fn links_path(&self) -> PathBuf {
        self.root.join(LINKS_FILE)
    }

    fn read(&self, id: &DocumentId, language: &Language) -> Result<Document, CollaboratorError> {
        read_document_file(&self.document_path(id, language), id, language)
    }

    fn write(
        &self,
        id: &DocumentId,
        language: &Language,
        target: &TargetFieldSet,
    ) -> Result<Document, CollaboratorError> {
        let path = self.document_path(id, language);
        let now = Utc::now();
        let stored = StoredDocument {
            title: target.title.clone(),
            body: target.body.clone(),
            slug: target.slug.clone(),
            fields: target.fields.clone(),
            modified_at: Some(now),
        };
        let bytes = serde_json::to_vec_pretty(&stored).map_err(|e| transient(&path, e))?;
        paths::write_atomic(&path, &bytes).map_err(|e| transient(&path, e))?;
        tracing::debug!(path = %path.display(), "document written");
        self.read(id, language)
    }

    fn load_links(&self) -> Result<LinkIndex, CollaboratorError> {
        let path = self.links_path();
        match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| transient(&path, e)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(LinkIndex::new()),
            Err(e) => Err(transient(&path, e)),
        }
    }

    fn record_link(
        &self,
        source_id: &DocumentId,
        language: &Language,
        target_id: &DocumentId,
    ) -> Result<(), CollaboratorError> {
        let path = self.links_path();
        let mut links = self.load_links()?;
        links
            .entry(source_id.clone())
            .or_default()
            .insert(language.clone(), target_id.clone());
        let bytes = serde_json::to_vec_pretty(&links).map_err(|e| transient(&path, e))?;
        paths::write_atomic(&path, &bytes).map_err(|e| transient(&path, e))
    }
}

#[async_trait]
impl ContentRepository for DirectoryRepository {
    async fn get_document(
        &self,
        id: &DocumentId,
        language: &Language,
    ) -> Result<Document, CollaboratorError> {
        self.read(id, language)
    }

    async fn create_document(
        &self,
        source_id: &DocumentId,
        language: &Language,
        fields: &TargetFieldSet,
    ) -> Result<Document, CollaboratorError> {
        let _guard = self.write_guard.lock().unwrap_or_else(|e| e.into_inner());
        let id = DocumentId(format!("{}-{}", source_id.0, language.0));
        if self.document_path(&id, language).exists() {
            return Err(CollaboratorError::Rejected(format!(
                "document {id} already exists in {language}"
            )));
        }
        let document = self.write(&id, language, fields)?;
        self.record_link(source_id, language, &id)?;
        Ok(document)
    }

    async fn update_document(
        &self,
        id: &DocumentId,
        language: &Language,
        fields: &TargetFieldSet,
    ) -> Result<Document, CollaboratorError> {
        let _guard = self.write_guard.lock().unwrap_or_else(|e| e.into_inner());
        if !self.document_path(id, language).exists() {
            return Err(CollaboratorError::NotFound);
        }
        self.write(id, language, fields)
    }

    async fn find_linked_document(
        &self,
        source_id: &DocumentId,
        target_language: &Language,
    ) -> Result<Option<DocumentId>, CollaboratorError> {
        let links = self.load_links()?;
        Ok(links
            .get(source_id)
            .and_then(|by_lang| by_lang.get(target_language))
            .cloned())
    }
}

// ---------------------------------------------------------------------------
// Translator
// ---------------------------------------------------------------------------

/// [`TranslationService`] serving answers prepared ahead of time.
#[derive(Debug, Clone)]
pub struct DirectoryTranslator {
    root: PathBuf,
}

impl DirectoryTranslator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn response_path(&self, source_id: &DocumentId, target_language: &Language) -> PathBuf {
        self.root
            .join(&target_language.0)
            .join(format!("{}.json", source_id.0))
    }
}

#[async_trait]
impl TranslationService for DirectoryTranslator {
    async fn translate(
        &self,
        request: &TranslationRequest,
    ) -> Result<TranslationResponse, CollaboratorError> {
        let path = self.response_path(&request.source_id, &request.target_language);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(CollaboratorError::NotFound),
            Err(e) => return Err(transient(&path, e)),
        };
        tracing::debug!(path = %path.display(), strict = request.strict, "serving prepared translation");
        TranslationResponse::from_llm_output(&raw)
            .map_err(|e| CollaboratorError::Rejected(format!("{}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn target(title: &str) -> TargetFieldSet {
        TargetFieldSet {
            title: title.to_string(),
            body: "<p>b</p>".to_string(),
            slug: "s".to_string(),
            fields: FieldSet::from([("price".to_string(), json!(10))]),
        }
    }

    #[tokio::test]
    async fn create_records_link_and_stamps_time() {
        let dir = TempDir::new().unwrap();
        let repo = DirectoryRepository::new(dir.path());
        let (src, en) = (DocumentId::from("318"), Language::from("en"));

        assert_eq!(repo.find_linked_document(&src, &en).await.unwrap(), None);
        let created = repo.create_document(&src, &en, &target("T")).await.unwrap();
        assert_eq!(created.id, DocumentId::from("318-en"));
        assert!(target("T").matches(&created));
        assert_eq!(
            repo.find_linked_document(&src, &en).await.unwrap(),
            Some(created.id.clone())
        );

        let again = repo.create_document(&src, &en, &target("T")).await;
        assert!(matches!(again, Err(CollaboratorError::Rejected(_))));
    }

    #[tokio::test]
    async fn update_requires_existing_document() {
        let dir = TempDir::new().unwrap();
        let repo = DirectoryRepository::new(dir.path());
        let missing = repo
            .update_document(&DocumentId::from("9"), &Language::from("en"), &target("T"))
            .await;
        assert_eq!(missing.unwrap_err(), CollaboratorError::NotFound);
    }

    #[tokio::test]
    async fn reads_hand_written_documents() {
        let dir = TempDir::new().unwrap();
        let repo = DirectoryRepository::new(dir.path());
        let path = repo.document_path(&DocumentId::from("1"), &Language::from("fa"));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"title": "t", "content": "c", "fields": {"a": 1}}"#).unwrap();

        let doc = repo
            .get_document(&DocumentId::from("1"), &Language::from("fa"))
            .await
            .unwrap();
        assert_eq!(doc.body, "c");
        assert_eq!(doc.fields["a"], json!(1));
    }

    #[tokio::test]
    async fn translator_parses_fenced_answers() {
        let dir = TempDir::new().unwrap();
        let translator = DirectoryTranslator::new(dir.path());
        let path = translator.response_path(&DocumentId::from("1"), &Language::from("en"));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "```json\n{\"title\": \"T\"}\n```").unwrap();

        let request = TranslationRequest {
            source_id: DocumentId::from("1"),
            source_language: Language::from("fa"),
            target_language: Language::from("en"),
            title: "t".into(),
            content: String::new(),
            slug: String::new(),
            fields: BTreeMap::new(),
            strict: false,
            problems: Vec::new(),
        };
        let response = translator.translate(&request).await.unwrap();
        assert_eq!(response.get("title"), Some(&json!("T")));

        let other = TranslationRequest {
            target_language: Language::from("de"),
            ..request
        };
        assert_eq!(
            translator.translate(&other).await.unwrap_err(),
            CollaboratorError::NotFound
        );
    }
}
