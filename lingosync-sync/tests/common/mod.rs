//! In-memory collaborators with call counters and failure switches.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use lingosync_core::{
    Document, DocumentId, EngineConfig, FieldSet, Language, PolicyKind, PolicyRegistry,
};
use lingosync_sync::{
    CollaboratorError, ContentRepository, MemorySnapshotStore, Reconciler, TargetFieldSet,
    TranslationRequest, TranslationResponse, TranslationService,
};

pub fn fa() -> Language {
    Language::from("fa")
}

pub fn en() -> Language {
    Language::from("en")
}

pub fn registry() -> PolicyRegistry {
    PolicyRegistry::from_entries([
        ("description", PolicyKind::Translate),
        ("price", PolicyKind::Copy),
        ("city_ref", PolicyKind::CopyRelationship),
        ("internal_note", PolicyKind::Ignore),
    ])
    .expect("registry")
}

pub fn config() -> EngineConfig {
    EngineConfig {
        translation_timeout_ms: 1_000,
        repository_timeout_ms: 500,
        backoff_base_ms: 10,
        ..EngineConfig::default()
    }
}

/// The listing used throughout: id 318 in Persian.
pub fn listing(id: u64) -> Document {
    Document {
        id: DocumentId::from(id),
        language: fa(),
        title: "عنوان".to_string(),
        body: "<p>متن</p>".to_string(),
        slug: "onvan".to_string(),
        fields: FieldSet::from([
            ("description".to_string(), json!("توضیح")),
            ("price".to_string(), json!(1050)),
            ("city_ref".to_string(), json!([{"id": 7}])),
            ("internal_note".to_string(), json!("x")),
        ]),
        content_hash: None,
        modified_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeRepository {
    docs: Mutex<HashMap<(DocumentId, Language), Document>>,
    links: Mutex<HashMap<(DocumentId, Language), DocumentId>>,
    next_id: AtomicU64,
    pub creates: AtomicUsize,
    pub updates: AtomicUsize,
    /// Fail this many upcoming `get_document` calls with a transient error.
    pub transient_gets: AtomicUsize,
    /// Perform this many upcoming creates but report them as failed.
    pub lost_create_acks: AtomicUsize,
    /// Apply this many upcoming updates but reject the reply.
    pub lost_update_acks: AtomicUsize,
    /// Updates never answer while set.
    pub hang_updates: AtomicBool,
}

impl FakeRepository {
    pub fn new() -> Arc<Self> {
        let repo = Self::default();
        repo.next_id.store(1000, Ordering::SeqCst);
        Arc::new(repo)
    }

    pub fn insert(&self, doc: Document) {
        self.docs
            .lock()
            .unwrap()
            .insert((doc.id.clone(), doc.language.clone()), doc);
    }

    pub fn link(&self, source: &DocumentId, language: &Language, target: &DocumentId) {
        self.links
            .lock()
            .unwrap()
            .insert((source.clone(), language.clone()), target.clone());
    }

    pub fn doc(&self, id: &DocumentId, language: &Language) -> Option<Document> {
        self.docs
            .lock()
            .unwrap()
            .get(&(id.clone(), language.clone()))
            .cloned()
    }

    pub fn target_of(&self, source: &DocumentId, language: &Language) -> Option<Document> {
        let id = self
            .links
            .lock()
            .unwrap()
            .get(&(source.clone(), language.clone()))
            .cloned()?;
        self.doc(&id, language)
    }

    pub fn remove(&self, id: &DocumentId, language: &Language) {
        self.docs.lock().unwrap().remove(&(id.clone(), language.clone()));
    }

    /// Edit a stored document as an outside user would.
    pub fn edit(&self, id: &DocumentId, language: &Language, f: impl FnOnce(&mut Document)) {
        let mut docs = self.docs.lock().unwrap();
        let doc = docs
            .get_mut(&(id.clone(), language.clone()))
            .expect("document to edit");
        f(doc);
        doc.modified_at = Utc::now() + chrono::Duration::seconds(1);
    }

    pub fn count_in(&self, language: &Language) -> usize {
        self.docs
            .lock()
            .unwrap()
            .keys()
            .filter(|(_, lang)| lang == language)
            .count()
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    fn write(&self, id: DocumentId, language: &Language, fields: &TargetFieldSet) -> Document {
        let doc = Document {
            id,
            language: language.clone(),
            title: fields.title.clone(),
            body: fields.body.clone(),
            slug: fields.slug.clone(),
            fields: fields.fields.clone(),
            content_hash: None,
            modified_at: Utc::now(),
        };
        self.insert(doc.clone());
        doc
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl ContentRepository for FakeRepository {
    async fn get_document(
        &self,
        id: &DocumentId,
        language: &Language,
    ) -> Result<Document, CollaboratorError> {
        if take_one(&self.transient_gets) {
            return Err(CollaboratorError::Transient("connection reset".into()));
        }
        self.doc(id, language).ok_or(CollaboratorError::NotFound)
    }

    async fn create_document(
        &self,
        source_id: &DocumentId,
        language: &Language,
        fields: &TargetFieldSet,
    ) -> Result<Document, CollaboratorError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let id = DocumentId::from(self.next_id.fetch_add(1, Ordering::SeqCst));
        let doc = self.write(id.clone(), language, fields);
        self.link(source_id, language, &id);
        if take_one(&self.lost_create_acks) {
            return Err(CollaboratorError::Transient("gateway timeout".into()));
        }
        Ok(doc)
    }

    async fn update_document(
        &self,
        id: &DocumentId,
        language: &Language,
        fields: &TargetFieldSet,
    ) -> Result<Document, CollaboratorError> {
        if self.hang_updates.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.updates.fetch_add(1, Ordering::SeqCst);
        if self.doc(id, language).is_none() {
            return Err(CollaboratorError::NotFound);
        }
        let doc = self.write(id.clone(), language, fields);
        if take_one(&self.lost_update_acks) {
            return Err(CollaboratorError::Rejected("malformed reply".into()));
        }
        Ok(doc)
    }

    async fn find_linked_document(
        &self,
        source_id: &DocumentId,
        target_language: &Language,
    ) -> Result<Option<DocumentId>, CollaboratorError> {
        Ok(self
            .links
            .lock()
            .unwrap()
            .get(&(source_id.clone(), target_language.clone()))
            .cloned())
    }
}

// ---------------------------------------------------------------------------
// Translator
// ---------------------------------------------------------------------------

type Hook = Box<dyn FnMut() + Send>;

#[derive(Default)]
pub struct FakeTranslator {
    pub requests: Mutex<Vec<TranslationRequest>>,
    scripted: Mutex<VecDeque<TranslationResponse>>,
    delay: Option<Duration>,
    on_call: Mutex<Option<Hook>>,
}

impl FakeTranslator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    /// Answer the next calls with these payloads, then fall back to [`echo`].
    pub fn script(&self, responses: impl IntoIterator<Item = TranslationResponse>) {
        self.scripted.lock().unwrap().extend(responses);
    }

    /// Run `hook` at the start of every call.
    pub fn on_call(&self, hook: impl FnMut() + Send + 'static) {
        *self.on_call.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

/// Well-formed answer: every text prefixed with the target language tag.
pub fn echo(request: &TranslationRequest) -> TranslationResponse {
    let tag = &request.target_language;
    let mut response = TranslationResponse::default();
    response.insert("title", json!(format!("[{tag}] {}", request.title)));
    response.insert("content", json!(request.content));
    response.insert("slug", json!(format!("{}-{tag}", request.slug)));
    for (name, text) in &request.fields {
        response.insert(name.clone(), Value::String(format!("[{tag}] {text}")));
    }
    response
}

#[async_trait]
impl TranslationService for FakeTranslator {
    async fn translate(
        &self,
        request: &TranslationRequest,
    ) -> Result<TranslationResponse, CollaboratorError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(hook) = self.on_call.lock().unwrap().as_mut() {
            hook();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.scripted.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| echo(request)))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub repo: Arc<FakeRepository>,
    pub translator: Arc<FakeTranslator>,
    pub store: Arc<MemorySnapshotStore>,
    pub reconciler: Arc<Reconciler>,
}

impl Harness {
    pub fn new(translator: Arc<FakeTranslator>) -> Self {
        Self::with_config(translator, config())
    }

    pub fn with_config(translator: Arc<FakeTranslator>, config: EngineConfig) -> Self {
        let repo = FakeRepository::new();
        let store = Arc::new(MemorySnapshotStore::new());
        let reconciler = Arc::new(Reconciler::new(
            repo.clone(),
            translator.clone(),
            store.clone(),
            Arc::new(registry()),
            config,
        ));
        Self {
            repo,
            translator,
            store,
            reconciler,
        }
    }
}
