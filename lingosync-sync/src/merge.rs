//! Translation delta applier.
//!
//! Builds the translation request for a source document, validates the
//! untrusted translation payload, and merges it into a target field set:
//!
//! | policy              | target value                         |
//! |---------------------|--------------------------------------|
//! | `translate`         | payload value (never the source)     |
//! | `copy`              | source value, verbatim               |
//! | `copy-relationship` | source value, verbatim (deep clone)  |
//! | `ignore`            | omitted                              |
//!
//! Title, body (`content`) and slug always come from the payload.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use lingosync_core::{
    types::{BODY_KEY, RESERVED_KEYS, SLUG_KEY, TITLE_KEY},
    Document, DocumentId, FieldSet, Language, PolicyKind, PolicyRegistry,
};

use crate::change::hash_value;
use crate::error::ValidationError;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// What the translation service is asked to translate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationRequest {
    /// Source document the request was built from.
    pub source_id: DocumentId,
    pub source_language: Language,
    pub target_language: Language,
    pub title: String,
    pub content: String,
    pub slug: String,
    /// `translate`-policy fields only.
    pub fields: BTreeMap<String, String>,
    /// Set after a rejected payload: the provider must return exactly the
    /// expected keys with string values.
    #[serde(default)]
    pub strict: bool,
    /// Problems found in the previous payload, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub problems: Vec<String>,
}

impl TranslationRequest {
    pub fn build(source: &Document, target_language: &Language, registry: &PolicyRegistry) -> Self {
        let classes = registry.classify(&source.fields);
        let fields = classes
            .translate
            .iter()
            .filter_map(|name| source.fields.get(name).map(|v| (name.clone(), text_of(v))))
            .collect();
        Self {
            source_id: source.id.clone(),
            source_language: source.language.clone(),
            target_language: target_language.clone(),
            title: source.title.clone(),
            content: source.body.clone(),
            slug: source.slug.clone(),
            fields,
            strict: false,
            problems: Vec::new(),
        }
    }

    /// Keys the response must carry: the translate fields plus title/content/slug.
    pub fn expected_keys(&self) -> BTreeSet<String> {
        RESERVED_KEYS
            .iter()
            .map(|k| k.to_string())
            .chain(self.fields.keys().cloned())
            .collect()
    }

    /// Copy of this request marked strict, carrying `problem` for the provider.
    pub fn tightened(&self, problem: &ValidationError) -> Self {
        let mut next = self.clone();
        next.strict = true;
        next.problems.push(problem.to_string());
        next
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// Untrusted payload returned by the translation service.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TranslationResponse(Map<String, Value>);

impl TranslationResponse {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(ValidationError::NotAnObject(kind_name(&other).to_string())),
        }
    }

    /// Parse raw model output: optional surrounding code fence, then a JSON object.
    pub fn from_llm_output(raw: &str) -> Result<Self, ValidationError> {
        let body = strip_code_fence(raw.trim());
        let value: Value = serde_json::from_str(body)
            .map_err(|e| ValidationError::NotAnObject(format!("invalid JSON: {e}")))?;
        Self::from_value(value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Canonical digest of the payload, recorded as the applied translation hash.
    pub fn digest(&self) -> String {
        hash_value(&Value::Object(self.0.clone()))
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string (`json`, `JSON`, ...) up to the first newline.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Field set written to the target-language document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetFieldSet {
    pub title: String,
    pub body: String,
    pub slug: String,
    pub fields: FieldSet,
}

impl TargetFieldSet {
    /// `true` when `doc` carries exactly what was applied (ignoring fields the
    /// repository adds on its own).
    pub fn matches(&self, doc: &Document) -> bool {
        doc.title == self.title
            && doc.body == self.body
            && doc.slug == self.slug
            && self
                .fields
                .iter()
                .all(|(name, value)| doc.fields.get(name) == Some(value))
    }

    /// The part of `doc` the engine writes: title/body/slug and every field
    /// whose policy is not `ignore`.
    pub fn managed(doc: &Document, registry: &PolicyRegistry) -> Self {
        let fields = doc
            .fields
            .iter()
            .filter(|(name, _)| registry.kind_for(name) != PolicyKind::Ignore)
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Self {
            title: doc.title.clone(),
            body: doc.body.clone(),
            slug: doc.slug.clone(),
            fields,
        }
    }

    /// Canonical digest over title, body, slug and fields.
    pub fn digest(&self) -> String {
        hash_value(&serde_json::json!({
            TITLE_KEY: self.title,
            BODY_KEY: self.body,
            SLUG_KEY: self.slug,
            "fields": self.fields,
        }))
    }
}

/// Merge `response` into the fields of `source`.
///
/// Deterministic and side-effect free. Fails when the payload is missing a
/// required key, carries an unexpected key, holds a non-string value, or
/// has unbalanced markup where markup is expected.
pub fn apply(
    source: &Document,
    response: &TranslationResponse,
    registry: &PolicyRegistry,
) -> Result<TargetFieldSet, ValidationError> {
    let classes = registry.classify(&source.fields);
    let translate: BTreeSet<&String> = classes
        .translate
        .iter()
        .filter(|name| source.fields.contains_key(*name))
        .collect();

    validate_keys(response, &translate)?;

    let title = string_at(response, TITLE_KEY)?;
    let body = string_at(response, BODY_KEY)?;
    let slug = string_at(response, SLUG_KEY)?;
    check_markup(BODY_KEY, &body)?;

    let mut fields = FieldSet::new();
    for name in classes.copied() {
        if let Some(value) = source.fields.get(name) {
            fields.insert(name.clone(), value.clone());
        }
    }
    for name in translate {
        let value = string_at(response, name)?;
        if source.fields.get(name).and_then(Value::as_str).is_some_and(contains_tag) {
            check_markup(name, &value)?;
        }
        fields.insert(name.clone(), Value::String(value));
    }

    Ok(TargetFieldSet {
        title,
        body,
        slug,
        fields,
    })
}

fn validate_keys(
    response: &TranslationResponse,
    translate: &BTreeSet<&String>,
) -> Result<(), ValidationError> {
    let expected: BTreeSet<&str> = RESERVED_KEYS
        .iter()
        .copied()
        .chain(translate.iter().map(|s| s.as_str()))
        .collect();

    if let Some(missing) = expected.iter().find(|k| response.get(k).is_none()) {
        return Err(ValidationError::MissingKey(missing.to_string()));
    }
    let mut extra: Vec<&String> = response
        .as_map()
        .keys()
        .filter(|k| !expected.contains(k.as_str()))
        .collect();
    extra.sort();
    if let Some(key) = extra.first() {
        return Err(ValidationError::UnexpectedKey(key.to_string()));
    }
    Ok(())
}

fn string_at(response: &TranslationResponse, key: &str) -> Result<String, ValidationError> {
    match response.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ValidationError::WrongType(key.to_string())),
        None => Err(ValidationError::MissingKey(key.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Markup balance
// ---------------------------------------------------------------------------

const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// `true` if `text` contains something shaped like an HTML tag.
pub(crate) fn contains_tag(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.windows(2).any(|w| {
        w[0] == b'<' && (w[1].is_ascii_alphabetic() || w[1] == b'/' || w[1] == b'!')
    })
}

/// Check that element tags in `text` are properly nested and closed.
pub(crate) fn check_markup(key: &str, text: &str) -> Result<(), ValidationError> {
    let malformed = |detail: String| ValidationError::MalformedMarkup {
        key: key.to_string(),
        detail,
    };

    let mut stack: Vec<String> = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find('<') {
        let after = &rest[start + 1..];
        if let Some(comment) = after.strip_prefix("!--") {
            let Some(end) = comment.find("-->") else {
                return Err(malformed("unterminated comment".to_string()));
            };
            rest = &comment[end + 3..];
            continue;
        }

        let closing = after.starts_with('/');
        let name_part = if closing { &after[1..] } else { after };
        let is_tag = name_part
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
            || after.starts_with('!');
        if !is_tag {
            // A bare '<' in prose, e.g. "a < b".
            rest = after;
            continue;
        }

        let Some(end) = tag_end(after) else {
            return Err(malformed("unterminated tag".to_string()));
        };
        let inner = &after[..end];
        rest = &after[end + 1..];

        if inner.starts_with('!') {
            continue;
        }
        let name: String = name_part
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
            .collect::<String>()
            .to_ascii_lowercase();

        if closing {
            match stack.pop() {
                Some(open) if open == name => {}
                Some(open) => return Err(malformed(format!("</{name}> closes <{open}>"))),
                None => return Err(malformed(format!("</{name}> without opening tag"))),
            }
        } else if !inner.ends_with('/') && !VOID_ELEMENTS.contains(&name.as_str()) {
            stack.push(name);
        }
    }

    match stack.pop() {
        Some(open) => Err(malformed(format!("<{open}> is never closed"))),
        None => Ok(()),
    }
}

/// Index of the `>` ending the tag that starts at `s`, skipping quoted attribute values.
fn tag_end(s: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, '>') => return Some(i),
            _ => {}
        }
    }
    None
}
