//! Change detection against the last synced snapshot.
//!
//! The content hash covers title, body, slug and every custom field whose
//! policy is not `ignore`. Object keys are sorted before hashing; array order
//! is kept because it carries meaning (gallery ordering, ranked lists).
//!
//! Signal precedence:
//! 1. `NeverSynced` (no snapshot, or a snapshot without a source hash)
//! 2. `Changed` (hash differs from `last_source_hash`)
//! 3. `Current`

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use lingosync_core::{
    types::{BODY_KEY, SLUG_KEY, TITLE_KEY},
    Document, PolicyRegistry, SyncSnapshot,
};

/// Result of comparing a fresh source document with its snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSignal {
    NeverSynced,
    Current,
    Changed { previous: String, current: String },
}

impl ChangeSignal {
    pub fn requires_work(&self) -> bool {
        !matches!(self, ChangeSignal::Current)
    }
}

/// Compare `source` with `snapshot`.
pub fn check(
    source: &Document,
    snapshot: Option<&SyncSnapshot>,
    registry: &PolicyRegistry,
) -> ChangeSignal {
    let current = content_hash(source, registry);
    match snapshot.and_then(|s| s.last_source_hash.as_ref()) {
        None => ChangeSignal::NeverSynced,
        Some(previous) if *previous == current => ChangeSignal::Current,
        Some(previous) => ChangeSignal::Changed {
            previous: previous.clone(),
            current,
        },
    }
}

/// `true` when the source needs (re)synchronization.
pub fn has_changed(
    source: &Document,
    snapshot: Option<&SyncSnapshot>,
    registry: &PolicyRegistry,
) -> bool {
    check(source, snapshot, registry).requires_work()
}

/// Canonical SHA-256 of the sync-relevant parts of `source`.
pub fn content_hash(source: &Document, registry: &PolicyRegistry) -> String {
    let classes = registry.classify(&source.fields);
    let mut fields = Map::new();
    for name in classes.synced() {
        if let Some(value) = source.fields.get(name) {
            fields.insert(name.clone(), value.clone());
        }
    }

    let mut domain = Map::new();
    domain.insert(TITLE_KEY.to_string(), Value::String(source.title.clone()));
    domain.insert(BODY_KEY.to_string(), Value::String(source.body.clone()));
    domain.insert(SLUG_KEY.to_string(), Value::String(source.slug.clone()));
    domain.insert("fields".to_string(), Value::Object(fields));
    hash_value(&Value::Object(domain))
}

/// SHA-256 hex digest of the canonical JSON encoding of `value`.
pub fn hash_value(value: &Value) -> String {
    let canonical = canonicalize(value);
    let mut h = Sha256::new();
    h.update(canonical.to_string().as_bytes());
    hex::encode(h.finalize())
}

/// Rebuild `value` with object keys inserted in sorted order.
///
/// Inserting in order yields sorted output whether `Map` is backed by a
/// `BTreeMap` or by an insertion-ordered map.
pub(crate) fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                out.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
