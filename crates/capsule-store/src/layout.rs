use crate::StoreError;
use std::fs;
use std::path::{Path, PathBuf};

const REGISTRY_FILE: &str = "registry.json";
const LOCK_FILE: &str = "registry.lock";
const PROJECTS_DIR: &str = "projects";
const REQUIREMENTS_FILE: &str = "requirements.txt";

/// Directory layout under the Capsule root (default `~/.capsule`).
///
/// ```text
/// <root>/config.toml
/// <root>/registry.json
/// <root>/registry.lock
/// <root>/projects/<env_id>/capsule.toml
/// ```
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn registry_file(&self) -> PathBuf {
        self.root.join(REGISTRY_FILE)
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    #[inline]
    pub fn config_file(&self) -> PathBuf {
        self.root.join(capsule_schema::CONFIG_FILE)
    }

    #[inline]
    pub fn projects_dir(&self) -> PathBuf {
        self.root.join(PROJECTS_DIR)
    }

    #[inline]
    pub fn project_dir(&self, env_id: &str) -> PathBuf {
        self.projects_dir().join(env_id)
    }

    /// Default location of an environment's packed descriptor.
    #[inline]
    pub fn descriptor_path(&self, env_id: &str) -> PathBuf {
        self.project_dir(env_id).join(capsule_schema::DESCRIPTOR_FILE)
    }

    /// Requirements manifest written during restore, kept for inspection.
    #[inline]
    pub fn requirements_path(&self, env_id: &str) -> PathBuf {
        self.project_dir(env_id).join(REQUIREMENTS_FILE)
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.projects_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_rooted() {
        let layout = StoreLayout::new("/srv/capsule");
        assert_eq!(
            layout.registry_file(),
            PathBuf::from("/srv/capsule/registry.json")
        );
        assert_eq!(
            layout.descriptor_path("capsule-00aa11bb"),
            PathBuf::from("/srv/capsule/projects/capsule-00aa11bb/capsule.toml")
        );
        assert_eq!(
            layout.requirements_path("capsule-00aa11bb"),
            PathBuf::from("/srv/capsule/projects/capsule-00aa11bb/requirements.txt")
        );
        assert_eq!(layout.config_file(), PathBuf::from("/srv/capsule/config.toml"));
    }

    #[test]
    fn initialize_creates_projects_dir() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path().join("root"));
        layout.initialize().unwrap();
        assert!(layout.projects_dir().is_dir());
        layout.initialize().unwrap();
    }
}
