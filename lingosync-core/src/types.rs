//! Domain types shared by the policy registry and the sync engine.
//!
//! Field values are kept as `serde_json::Value`: documents arrive from the
//! content repository as JSON and relationship/media blobs must survive the
//! trip without being reinterpreted.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identifier of a document in the content repository.
///
/// Repositories hand out numeric or string ids; both are carried as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<u64> for DocumentId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

/// A language code such as `fa` or `en`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Language(pub String);

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for Language {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Language {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Stable key of a (source document, target language) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkId(pub String);

impl LinkId {
    /// Derive the link key from the source document id and target language.
    ///
    /// The NUL separator keeps `("1", "2en")` and `("12", "en")` apart.
    pub fn derive(source: &DocumentId, target_language: &Language) -> Self {
        let mut h = Sha256::new();
        h.update(source.0.as_bytes());
        h.update([0u8]);
        h.update(target_language.0.as_bytes());
        let digest = hex::encode(h.finalize());
        Self(digest[..32].to_string())
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for LinkId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// How the merge step treats a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    Translate,
    /// Unknown fields fall back to `copy` so unrecognised data is never dropped.
    #[default]
    Copy,
    CopyRelationship,
    Ignore,
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyKind::Translate => write!(f, "translate"),
            PolicyKind::Copy => write!(f, "copy"),
            PolicyKind::CopyRelationship => write!(f, "copy-relationship"),
            PolicyKind::Ignore => write!(f, "ignore"),
        }
    }
}

impl std::str::FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "translate" => Ok(Self::Translate),
            "copy" => Ok(Self::Copy),
            "copy-relationship" | "copy_relationship" => Ok(Self::CopyRelationship),
            "ignore" => Ok(Self::Ignore),
            other => Err(format!(
                "unknown field policy '{other}'; expected: translate, copy, copy-relationship, ignore"
            )),
        }
    }
}

/// Lifecycle state of a sync link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SyncState {
    #[default]
    NotLinked,
    Pending,
    Synced,
    OutOfSync,
    Failed,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::NotLinked => write!(f, "not-linked"),
            SyncState::Pending => write!(f, "pending"),
            SyncState::Synced => write!(f, "synced"),
            SyncState::OutOfSync => write!(f, "out-of-sync"),
            SyncState::Failed => write!(f, "failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// Custom fields of a document keyed by field name.
pub type FieldSet = BTreeMap<String, Value>;

/// Keys under which title, body and slug travel in translation payloads.
pub const TITLE_KEY: &str = "title";
pub const BODY_KEY: &str = "content";
pub const SLUG_KEY: &str = "slug";

/// Reserved payload keys; custom fields may not shadow them.
pub const RESERVED_KEYS: [&str; 3] = [TITLE_KEY, BODY_KEY, SLUG_KEY];

/// A content record in exactly one language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub language: Language,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub fields: FieldSet,
    /// Hash as reported by the repository, if it keeps one. Informational:
    /// change detection always recomputes the hash under the current policies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub modified_at: DateTime<Utc>,
}

/// Groups one source document with at most one target per target language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLink {
    pub link_id: LinkId,
    pub source_document_id: DocumentId,
    pub source_language: Language,
    pub target_language: Language,
    /// `None` until the first successful create (or adoption).
    #[serde(default)]
    pub target_document_id: Option<DocumentId>,
}

impl SyncLink {
    pub fn new(source: DocumentId, source_language: Language, target_language: Language) -> Self {
        Self {
            link_id: LinkId::derive(&source, &target_language),
            source_document_id: source,
            source_language,
            target_language,
            target_document_id: None,
        }
    }
}

/// Durable memory of what was last synchronized for a link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    pub link_id: LinkId,
    #[serde(default)]
    pub last_source_hash: Option<String>,
    #[serde(default)]
    pub last_applied_translation_hash: Option<String>,
    /// Target `modified_at` as returned by the last successful write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_target_modified_at: Option<DateTime<Utc>>,
    /// Digest of the field set most recently sent to the repository, set
    /// before the write so an applied-but-unacknowledged write is recognisable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempted_target_hash: Option<String>,
    pub state: SyncState,
    pub updated_at: DateTime<Utc>,
}

impl SyncSnapshot {
    /// Fresh snapshot for a newly discovered link.
    pub fn new(link_id: LinkId, now: DateTime<Utc>) -> Self {
        Self {
            link_id,
            last_source_hash: None,
            last_applied_translation_hash: None,
            last_target_modified_at: None,
            last_attempted_target_hash: None,
            state: SyncState::NotLinked,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_display() {
        assert_eq!(DocumentId::from(318).to_string(), "318");
        assert_eq!(Language::from("fa").to_string(), "fa");
    }

    #[test]
    fn link_id_is_stable_and_language_sensitive() {
        let a = LinkId::derive(&DocumentId::from("318"), &Language::from("en"));
        let b = LinkId::derive(&DocumentId::from("318"), &Language::from("en"));
        let c = LinkId::derive(&DocumentId::from("318"), &Language::from("de"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.0.len(), 32);
    }

    #[test]
    fn link_id_separator_prevents_concatenation_collisions() {
        let a = LinkId::derive(&DocumentId::from("1"), &Language::from("2en"));
        let b = LinkId::derive(&DocumentId::from("12"), &Language::from("en"));
        assert_ne!(a, b);
    }

    #[test]
    fn policy_kind_parses_and_displays_kebab_case() {
        let kind: PolicyKind = "copy-relationship".parse().expect("parse");
        assert_eq!(kind, PolicyKind::CopyRelationship);
        assert_eq!(kind.to_string(), "copy-relationship");
        assert!("rewrite".parse::<PolicyKind>().is_err());
    }

    #[test]
    fn sync_state_serializes_kebab_case() {
        let json = serde_json::to_string(&SyncState::OutOfSync).expect("serialize");
        assert_eq!(json, "\"out-of-sync\"");
    }

    #[test]
    fn new_link_has_no_target() {
        let link = SyncLink::new(DocumentId::from(318), Language::from("fa"), Language::from("en"));
        assert!(link.target_document_id.is_none());
        assert_eq!(
            link.link_id,
            LinkId::derive(&DocumentId::from(318), &Language::from("en"))
        );
    }
}
