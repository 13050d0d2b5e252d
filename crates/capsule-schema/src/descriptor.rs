use crate::types::ContentHash;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Schema version written by this release.
pub const DESCRIPTOR_VERSION: u32 = 1;
/// Oldest schema version this release can still read.
pub const MIN_DESCRIPTOR_VERSION: u32 = 1;
/// Default descriptor file name inside an environment's project directory.
pub const DESCRIPTOR_FILE: &str = "capsule.toml";

const COMMIT_PREFIX: &str = "commit:";

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("descriptor I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("descriptor parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("descriptor serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("descriptor is missing required field '{0}'")]
    MissingField(&'static str),
    #[error(
        "unsupported descriptor schema_version {found} (supported: {min}..={max})",
        min = MIN_DESCRIPTOR_VERSION,
        max = DESCRIPTOR_VERSION
    )]
    UnsupportedVersion { found: i64 },
}

/// A plugin directory and, when version-controlled, where it came from.
///
/// A plugin without version control keeps empty `repo_url` and
/// `version_ref` strings rather than omitting them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct PluginRef {
    pub name: String,
    #[serde(default)]
    pub repo_url: String,
    #[serde(default)]
    pub version_ref: String,
}

impl PluginRef {
    pub fn versioned(name: &str, repo_url: &str, commit: &str) -> Self {
        Self {
            name: name.to_owned(),
            repo_url: repo_url.to_owned(),
            version_ref: format!("{COMMIT_PREFIX}{commit}"),
        }
    }

    pub fn unversioned(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            repo_url: String::new(),
            version_ref: String::new(),
        }
    }

    pub fn is_versioned(&self) -> bool {
        !self.repo_url.is_empty()
    }

    /// The commit hash pinned by `version_ref`, if it is a `commit:<hash>` reference.
    pub fn pinned_commit(&self) -> Option<&str> {
        self.version_ref
            .strip_prefix(COMMIT_PREFIX)
            .filter(|hash| !hash.is_empty())
    }
}

/// A model file identified by content digest and storage category.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct ModelRef {
    pub name: String,
    pub content_hash: ContentHash,
    /// Name of the model subdirectory the file was found in.
    pub category: String,
}

/// Toolchain versions recorded alongside the inventory; empty when unknown.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeMetadata {
    #[serde(default)]
    pub cuda_version: String,
    #[serde(default)]
    pub python_version: String,
}

/// Portable snapshot of an environment's packages, plugins, and models.
///
/// Written once by capture and never mutated by restore. Unknown top-level
/// keys from newer writers are kept in `extra` and written back unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvironmentDescriptor {
    pub schema_version: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub base_image: String,
    #[serde(default)]
    pub workflow_file: String,
    /// Package specifiers in the order the package manager reported them.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub metadata: RuntimeMetadata,
    #[serde(default)]
    pub plugins: Vec<PluginRef>,
    #[serde(default)]
    pub models: Vec<ModelRef>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, toml::Value>,
}

impl EnvironmentDescriptor {
    /// An empty-inventory descriptor at the current schema version.
    pub fn new(name: &str, base_image: &str) -> Self {
        Self {
            schema_version: DESCRIPTOR_VERSION,
            name: name.to_owned(),
            description: String::new(),
            base_image: base_image.to_owned(),
            workflow_file: String::new(),
            dependencies: Vec::new(),
            metadata: RuntimeMetadata::default(),
            plugins: Vec::new(),
            models: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    /// blake3 digest of the encoded document.
    pub fn digest(&self) -> Result<String, DescriptorError> {
        let encoded = encode(self)?;
        Ok(blake3::hash(encoded.as_bytes()).to_hex().to_string())
    }

    /// Write the encoded descriptor atomically (temp file, fsync, rename).
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), DescriptorError> {
        let path = path.as_ref();
        let content = encode(self)?;
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut tmp, content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| DescriptorError::Io(e.error))?;
        // Fsync parent directory to ensure rename durability on power loss.
        if let Ok(f) = fs::File::open(dir) {
            let _ = f.sync_all();
        }
        Ok(())
    }

    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self, DescriptorError> {
        let content = fs::read_to_string(path)?;
        decode(&content)
    }
}

pub fn encode(descriptor: &EnvironmentDescriptor) -> Result<String, DescriptorError> {
    Ok(toml::to_string_pretty(descriptor)?)
}

/// Parse a descriptor document, rejecting schema versions outside the supported range.
///
/// The version is checked before the full decode so that a document from a
/// newer, incompatible writer reports `UnsupportedVersion` rather than a
/// field-level parse error.
pub fn decode(input: &str) -> Result<EnvironmentDescriptor, DescriptorError> {
    let table: toml::Table = toml::from_str(input)?;
    let found = table
        .get("schema_version")
        .ok_or(DescriptorError::MissingField("schema_version"))?
        .as_integer()
        .ok_or(DescriptorError::UnsupportedVersion { found: -1 })?;
    if found < i64::from(MIN_DESCRIPTOR_VERSION) || found > i64::from(DESCRIPTOR_VERSION) {
        return Err(DescriptorError::UnsupportedVersion { found });
    }
    Ok(toml::Value::Table(table).try_into()?)
}
