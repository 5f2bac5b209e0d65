//! Error types for lingosync-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from loading or saving policy and engine config.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying I/O failure (permission denied, disk full, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load — includes file path and line context from serde_yaml.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None` — cannot locate `~/.lingosync/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// A policy entry names a field that collides with a reserved payload key.
    #[error("field name '{0}' is reserved for title/content/slug")]
    ReservedField(String),
}
