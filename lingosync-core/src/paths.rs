//! Storage layout under `~/.lingosync/` and the atomic write helper shared by
//! the policy and config files.
//!
//! ```text
//! ~/.lingosync/
//!   policies.yaml          (field policy registry — mode 0600)
//!   config.yaml            (engine settings — mode 0600)
//!   links/<link_id>.json
//!   snapshots/<link_id>.json
//! ```

use std::path::{Path, PathBuf};

use crate::error::CoreError;

pub const POLICIES_FILE: &str = "policies.yaml";
pub const CONFIG_FILE: &str = "config.yaml";

pub fn lingosync_root(home: &Path) -> PathBuf {
    home.join(".lingosync")
}

pub fn policies_path(home: &Path) -> PathBuf {
    lingosync_root(home).join(POLICIES_FILE)
}

pub fn config_path(home: &Path) -> PathBuf {
    lingosync_root(home).join(CONFIG_FILE)
}

pub fn links_dir(home: &Path) -> PathBuf {
    lingosync_root(home).join("links")
}

pub fn snapshots_dir(home: &Path) -> PathBuf {
    lingosync_root(home).join("snapshots")
}

/// Resolve the user's home directory.
pub fn home() -> Result<PathBuf, CoreError> {
    dirs::home_dir().ok_or(CoreError::HomeNotFound)
}

/// Write `contents` to `path` through a `.tmp` sibling.
///
/// Write flow: create parent (0700) → `.tmp` sibling → `chmod 0600` → `rename`.
/// The `.tmp` lives in the target directory so the rename never crosses filesystems.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), CoreError> {
    if let Some(dir) = path.parent() {
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
            set_dir_permissions(dir)?;
        }
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!("{file_name}.tmp"));
    std::fs::write(&tmp, contents)?;
    set_file_permissions(&tmp)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), CoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), CoreError> {
    Ok(())
}
