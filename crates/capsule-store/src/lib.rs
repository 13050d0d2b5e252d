//! Environment registry, directory layout, and advisory locking for Capsule.
//!
//! This crate provides the storage layer: `StoreLayout` for the on-disk
//! directory structure, `RegistryStore` for the single-file list of
//! `EnvironmentRecord`s (load-modify-store under an exclusive `StoreLock`,
//! atomic replace on write), and the record types themselves.

pub mod layout;
pub mod lock;
pub mod registry;

pub use layout::StoreLayout;
pub use lock::StoreLock;
pub use registry::{
    validate_env_name, EnvStatus, EnvironmentRecord, LaunchOptions, MountConfig, RegistryStore,
    ResolvedMounts,
};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("environment not found: {0}")]
    NotFound(String),
    #[error("registry file {} is corrupt: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },
    #[error("lock acquisition failed: {0}")]
    LockFailed(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid environment name: {0}")]
    InvalidName(String),
    #[error("name or id '{name}' is already used by environment {existing_id}")]
    NameConflict { name: String, existing_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display_not_found() {
        let e = StoreError::NotFound("envA".to_owned());
        assert!(e.to_string().contains("envA"));
    }

    #[test]
    fn store_error_display_corrupt() {
        let e = StoreError::Corrupt {
            path: PathBuf::from("/tmp/registry.json"),
            reason: "expected value".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("registry.json"));
        assert!(msg.contains("expected value"));
    }

    #[test]
    fn store_error_display_name_conflict() {
        let e = StoreError::NameConflict {
            name: "dup".to_owned(),
            existing_id: "capsule-0123abcd".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("dup"));
        assert!(msg.contains("capsule-0123abcd"));
    }

    #[test]
    fn store_error_display_invalid_name() {
        let e = StoreError::InvalidName("bad".to_owned());
        assert!(e.to_string().contains("invalid environment name"));
    }
}
