use crate::layout::StoreLayout;
use crate::lock::StoreLock;
use crate::{fsync_dir, StoreError};
use capsule_schema::types::{ContainerName, EnvId};
use capsule_schema::{GlobalConfig, MountKey};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use tempfile::NamedTempFile;
use tracing::debug;

/// Cached view of whether an environment's container runs.
///
/// The container engine is the source of truth; this value is a hint that
/// callers re-verify before acting on it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnvStatus {
    Exited,
    Running,
}

impl std::fmt::Display for EnvStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvStatus::Exited => write!(f, "exited"),
            EnvStatus::Running => write!(f, "running"),
        }
    }
}

/// Per-environment host paths for the logical mounts. Unset keys fall back
/// to the global defaults at use time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MountConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub models: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
}

/// Host path for every logical mount key, in `MountKey::ALL` order.
pub type ResolvedMounts = Vec<(MountKey, String)>;

impl MountConfig {
    pub fn get(&self, key: MountKey) -> Option<&str> {
        match key {
            MountKey::Models => self.models.as_deref(),
            MountKey::Output => self.output.as_deref(),
            MountKey::Input => self.input.as_deref(),
        }
    }

    /// Resolve all three keys, never partially: each is either the record's
    /// own path or the global default.
    pub fn resolve(&self, config: &GlobalConfig) -> ResolvedMounts {
        config
            .default_mounts()
            .into_iter()
            .map(|(key, fallback)| (key, self.get(key).unwrap_or(fallback).to_owned()))
            .collect()
    }
}

/// Typed launch parameters for an environment's container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Host port published to the application port inside the container.
    pub port: u16,
    /// Engine runtime selector (e.g. `nvidia` for GPU access); `None` uses
    /// the engine default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentRecord {
    pub id: EnvId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub image: String,
    pub status: EnvStatus,
    #[serde(default)]
    pub mount_config: MountConfig,
    #[serde(default)]
    pub command: Vec<String>,
    pub options: LaunchOptions,
    pub container_name: ContainerName,
    pub created_at: String,
}

impl EnvironmentRecord {
    pub fn matches(&self, identifier: &str) -> bool {
        self.id == identifier || self.name == identifier
    }

    /// `created_at` rendered as `YYYY-MM-DD HH:MM:SS` local time, or the raw
    /// string when it is not valid RFC 3339.
    pub fn created_at_display(&self) -> String {
        chrono::DateTime::parse_from_rfc3339(&self.created_at).map_or_else(
            |_| self.created_at.clone(),
            |t| {
                t.with_timezone(&chrono::Local)
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string()
            },
        )
    }
}

pub fn validate_env_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || name.len() > 64 {
        return Err(StoreError::InvalidName(
            "environment name must be 1-64 characters".to_owned(),
        ));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(StoreError::InvalidName(
            "environment name must match [a-zA-Z0-9_-]".to_owned(),
        ));
    }
    Ok(())
}

/// The persisted list of environment records.
///
/// Every operation loads the whole file; mutations hold the registry lock
/// across load-modify-store and replace the file atomically.
pub struct RegistryStore {
    layout: StoreLayout,
}

impl RegistryStore {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    /// All records in storage order. A missing registry file is an empty registry.
    pub fn list(&self) -> Result<Vec<EnvironmentRecord>, StoreError> {
        self.load()
    }

    /// First record whose id or name equals `identifier`, in storage order.
    pub fn find(&self, identifier: &str) -> Result<EnvironmentRecord, StoreError> {
        self.load()?
            .into_iter()
            .find(|r| r.matches(identifier))
            .ok_or_else(|| StoreError::NotFound(identifier.to_owned()))
    }

    /// Append a new record, rejecting it when its id or name collides with
    /// any existing record's id or name.
    pub fn insert(&self, record: &EnvironmentRecord) -> Result<(), StoreError> {
        validate_env_name(&record.name)?;
        self.mutate(|records| {
            if let Some(existing) = records
                .iter()
                .find(|r| r.matches(&record.name) || r.matches(&record.id))
            {
                return Err(StoreError::NameConflict {
                    name: record.name.clone(),
                    existing_id: existing.id.to_string(),
                });
            }
            records.push(record.clone());
            Ok(())
        })
    }

    /// Replace the record with the same id, or append it.
    pub fn upsert(&self, record: &EnvironmentRecord) -> Result<(), StoreError> {
        self.mutate(|records| {
            match records.iter_mut().find(|r| r.id == record.id) {
                Some(slot) => *slot = record.clone(),
                None => records.push(record.clone()),
            }
            Ok(())
        })
    }

    pub fn update_status(
        &self,
        id: &EnvId,
        status: EnvStatus,
    ) -> Result<EnvironmentRecord, StoreError> {
        self.mutate(|records| {
            let record = records
                .iter_mut()
                .find(|r| r.id == *id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            record.status = status;
            Ok(record.clone())
        })
    }

    pub fn remove(&self, id: &EnvId) -> Result<EnvironmentRecord, StoreError> {
        self.mutate(|records| {
            let idx = records
                .iter()
                .position(|r| r.id == *id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            Ok(records.remove(idx))
        })
    }

    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Vec<EnvironmentRecord>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let lock_path = self.layout.lock_file();
        let _lock = match StoreLock::try_acquire(&lock_path)? {
            Some(lock) => lock,
            None => {
                debug!("registry locked by another process, waiting");
                StoreLock::acquire(&lock_path)?
            }
        };
        let mut records = self.load()?;
        let out = f(&mut records)?;
        self.store(&records)?;
        Ok(out)
    }

    fn load(&self) -> Result<Vec<EnvironmentRecord>, StoreError> {
        let path = self.layout.registry_file();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
            path,
            reason: e.to_string(),
        })
    }

    fn store(&self, records: &[EnvironmentRecord]) -> Result<(), StoreError> {
        let dest = self.layout.registry_file();
        let dir = self.layout.root();
        fs::create_dir_all(dir)?;

        let content = serde_json::to_string_pretty(records)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(dir)?;
        debug!("wrote {} registry records", records.len());
        Ok(())
    }
}
