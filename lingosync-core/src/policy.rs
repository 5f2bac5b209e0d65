//! Field policy registry.
//!
//! Policies are loaded data, not code: a deployment adds a custom field by
//! editing `~/.lingosync/policies.yaml`.
//!
//! ```yaml
//! version: 1
//! policies:
//!   description: translate
//!   price: copy
//!   city_ref: copy-relationship
//!   internal_notes: ignore
//! ```
//!
//! # API pattern
//!
//! Every file-touching function has two forms:
//! - `fn_at(home: &Path, …)` — explicit home; used in tests with `TempDir`
//! - `fn(…)` — derives home from `dirs::home_dir()`, delegates to `_at`

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::paths::{self, policies_path};
use crate::types::{FieldSet, PolicyKind, RESERVED_KEYS};

/// The policy that applies to one field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPolicy {
    pub field_name: String,
    pub kind: PolicyKind,
}

/// Partition of a document's custom field names by policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub translate: BTreeSet<String>,
    pub copy: BTreeSet<String>,
    pub copy_relationship: BTreeSet<String>,
    pub ignore: BTreeSet<String>,
}

impl Classification {
    /// Names that participate in sync: everything except `ignore`.
    pub fn synced(&self) -> impl Iterator<Item = &String> {
        self.translate
            .iter()
            .chain(self.copy.iter())
            .chain(self.copy_relationship.iter())
    }

    /// Names whose values are copied verbatim.
    pub fn copied(&self) -> impl Iterator<Item = &String> {
        self.copy.iter().chain(self.copy_relationship.iter())
    }
}

/// Mapping from field name to policy. Read-only once the engine is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyRegistry {
    pub version: u32,
    #[serde(default)]
    policies: BTreeMap<String, PolicyKind>,
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self {
            version: 1,
            policies: BTreeMap::new(),
        }
    }
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from `(field, kind)` pairs.
    pub fn from_entries<I, S>(entries: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = (S, PolicyKind)>,
        S: Into<String>,
    {
        let mut registry = Self::new();
        for (name, kind) in entries {
            registry.set(name, kind)?;
        }
        Ok(registry)
    }

    /// Assign `kind` to `field_name`, replacing any previous entry.
    pub fn set(&mut self, field_name: impl Into<String>, kind: PolicyKind) -> Result<(), CoreError> {
        let field_name = field_name.into();
        if is_reserved(&field_name) {
            return Err(CoreError::ReservedField(field_name));
        }
        self.policies.insert(field_name, kind);
        Ok(())
    }

    /// Total lookup; unknown names resolve to `copy`.
    pub fn kind_for(&self, field_name: &str) -> PolicyKind {
        self.policies.get(field_name).copied().unwrap_or_default()
    }

    pub fn policy_for(&self, field_name: &str) -> FieldPolicy {
        FieldPolicy {
            field_name: field_name.to_string(),
            kind: self.kind_for(field_name),
        }
    }

    /// Configured entries in name order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, PolicyKind)> {
        self.policies.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Partition the custom field names of `fields`.
    ///
    /// Reserved names (`title`, `content`, `slug`) are handled outside the
    /// custom field set and never appear in the partition.
    pub fn classify(&self, fields: &FieldSet) -> Classification {
        let mut out = Classification::default();
        for name in fields.keys() {
            if is_reserved(name) {
                continue;
            }
            let bucket = match self.kind_for(name) {
                PolicyKind::Translate => &mut out.translate,
                PolicyKind::Copy => &mut out.copy,
                PolicyKind::CopyRelationship => &mut out.copy_relationship,
                PolicyKind::Ignore => &mut out.ignore,
            };
            bucket.insert(name.clone());
        }
        out
    }

    fn validate(&self) -> Result<(), CoreError> {
        match self.policies.keys().find(|k| is_reserved(k)) {
            Some(name) => Err(CoreError::ReservedField(name.clone())),
            None => Ok(()),
        }
    }
}

/// True for the payload keys that carry title, body and slug.
pub fn is_reserved(field_name: &str) -> bool {
    RESERVED_KEYS.contains(&field_name)
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load `<home>/.lingosync/policies.yaml`.
///
/// A missing file yields an empty registry (every field defaults to `copy`).
/// Malformed YAML returns `CoreError::Parse` with the file path.
pub fn load_at(home: &Path) -> Result<PolicyRegistry, CoreError> {
    let path = policies_path(home);
    if !path.exists() {
        return Ok(PolicyRegistry::new());
    }
    let contents = std::fs::read_to_string(&path)?;
    let registry: PolicyRegistry =
        serde_yaml::from_str(&contents).map_err(|e| CoreError::Parse { path, source: e })?;
    registry.validate()?;
    Ok(registry)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<PolicyRegistry, CoreError> {
    load_at(&paths::home()?)
}

/// Atomically save the registry to `<home>/.lingosync/policies.yaml`.
pub fn save_at(home: &Path, registry: &PolicyRegistry) -> Result<(), CoreError> {
    let yaml = serde_yaml::to_string(registry)?;
    paths::write_atomic(&policies_path(home), yaml.as_bytes())
}

/// `save_at` convenience wrapper.
pub fn save(registry: &PolicyRegistry) -> Result<(), CoreError> {
    save_at(&paths::home()?, registry)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
