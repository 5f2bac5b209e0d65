//! lingosync core library — domain types, field policy registry, engine
//! configuration, errors.
//!
//! - [`types`] — documents, links, snapshots, policy and state enums
//! - [`policy`] — [`PolicyRegistry`] load / save / classify
//! - [`config`] — [`EngineConfig`]
//! - [`paths`] — `~/.lingosync/` layout and atomic writes
//! - [`error`] — [`CoreError`]

pub mod config;
pub mod error;
pub mod paths;
pub mod policy;
pub mod types;

pub use config::EngineConfig;
pub use error::CoreError;
pub use policy::{Classification, FieldPolicy, PolicyRegistry};
pub use types::{
    Document, DocumentId, FieldSet, Language, LinkId, PolicyKind, SyncLink, SyncSnapshot,
    SyncState,
};
