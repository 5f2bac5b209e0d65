//! Policy registry load errors, atomic-write safety, and classification cases.

use assert_fs::prelude::*;
use lingosync_core::{policy, CoreError, FieldSet, PolicyKind, PolicyRegistry};
use predicates::prelude::predicate;
use rstest::rstest;
use serde_json::json;
use std::fs;

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".lingosync/policies.yaml")
        .write_str(": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = policy::load_at(home.path()).unwrap_err();
    assert!(matches!(err, CoreError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("policies.yaml"), "must contain file path, got: {err}");
}

#[test]
fn load_unknown_policy_kind_is_parse_error() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".lingosync/policies.yaml")
        .write_str("version: 1\npolicies:\n  description: paraphrase\n")
        .expect("write");

    let err = policy::load_at(home.path()).unwrap_err();
    assert!(matches!(err, CoreError::Parse { .. }), "got: {err}");
}

#[test]
fn load_rejects_reserved_field_names() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".lingosync/policies.yaml")
        .write_str("version: 1\npolicies:\n  content: copy\n")
        .expect("write");

    let err = policy::load_at(home.path()).unwrap_err();
    assert!(matches!(err, CoreError::ReservedField(ref f) if f == "content"), "got: {err}");
}

// ---------------------------------------------------------------------------
// 2. Atomic write safety
// ---------------------------------------------------------------------------

#[test]
fn save_creates_file_with_private_mode_and_no_tmp() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let registry =
        PolicyRegistry::from_entries([("description", PolicyKind::Translate)]).expect("registry");
    policy::save_at(home.path(), &registry).expect("save");

    home.child(".lingosync/policies.yaml").assert(predicate::path::exists());
    home.child(".lingosync/policies.yaml.tmp").assert(predicate::path::missing());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let path = home.path().join(".lingosync/policies.yaml");
        let mode = fs::metadata(&path).expect("meta").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "expected 0600, got {mode:o}");
    }
}

#[test]
fn crashed_write_leaves_original_intact() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let registry =
        PolicyRegistry::from_entries([("price", PolicyKind::Copy)]).expect("registry");
    policy::save_at(home.path(), &registry).expect("save");

    // Simulate crash: .tmp written but process died before rename
    home.child(".lingosync/policies.yaml.tmp")
        .write_str("CRASH - INCOMPLETE WRITE")
        .expect("write tmp");

    let loaded = policy::load_at(home.path()).expect("load");
    assert_eq!(loaded, registry);
}

// ---------------------------------------------------------------------------
// 3. Classification
// ---------------------------------------------------------------------------

#[rstest]
#[case("description", PolicyKind::Translate)]
#[case("price", PolicyKind::Copy)]
#[case("gallery", PolicyKind::CopyRelationship)]
#[case("edit_lock", PolicyKind::Ignore)]
#[case("not_configured", PolicyKind::Copy)]
fn lookup_from_loaded_yaml(#[case] field: &str, #[case] expected: PolicyKind) {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".lingosync/policies.yaml")
        .write_str(
            "version: 1\npolicies:\n  description: translate\n  price: copy\n  gallery: copy-relationship\n  edit_lock: ignore\n",
        )
        .expect("write");

    let registry = policy::load_at(home.path()).expect("load");
    assert_eq!(registry.policy_for(field).kind, expected);
}

#[test]
fn classification_does_not_depend_on_insertion_order() {
    let registry = PolicyRegistry::from_entries([
        ("a", PolicyKind::Translate),
        ("b", PolicyKind::Ignore),
    ])
    .expect("registry");

    let mut forward = FieldSet::new();
    forward.insert("a".into(), json!("x"));
    forward.insert("b".into(), json!(true));
    forward.insert("c".into(), json!([1, 2]));

    let mut backward = FieldSet::new();
    backward.insert("c".into(), json!([1, 2]));
    backward.insert("b".into(), json!(true));
    backward.insert("a".into(), json!("x"));

    assert_eq!(registry.classify(&forward), registry.classify(&backward));
}
