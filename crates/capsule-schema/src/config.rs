use crate::mounts::{MountKey, APP_PORT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Global defaults consumed read-only by the orchestrator.
///
/// Every field has a serde default so a partial or missing `config.toml`
/// still yields a complete configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GlobalConfig {
    #[serde(default = "default_base_image")]
    pub default_base_image: String,
    #[serde(default = "default_models_path")]
    pub default_models_path: String,
    #[serde(default = "default_output_path")]
    pub default_output_path: String,
    #[serde(default = "default_input_path")]
    pub default_input_path: String,
    #[serde(default = "default_command")]
    pub default_command: Vec<String>,
    #[serde(default = "default_port")]
    pub default_port: u16,
    #[serde(default = "default_runtime")]
    pub default_runtime: String,
    /// Container engine backend: `docker`, `podman`, or `mock`.
    #[serde(default = "default_engine")]
    pub engine: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            default_base_image: default_base_image(),
            default_models_path: default_models_path(),
            default_output_path: default_output_path(),
            default_input_path: default_input_path(),
            default_command: default_command(),
            default_port: default_port(),
            default_runtime: default_runtime(),
            engine: default_engine(),
        }
    }
}

impl GlobalConfig {
    /// Load from `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn default_mount(&self, key: MountKey) -> &str {
        match key {
            MountKey::Models => &self.default_models_path,
            MountKey::Output => &self.default_output_path,
            MountKey::Input => &self.default_input_path,
        }
    }

    /// Fallback host path for every logical mount key, in `MountKey::ALL` order.
    pub fn default_mounts(&self) -> [(MountKey, &str); 3] {
        MountKey::ALL.map(|key| (key, self.default_mount(key)))
    }
}

fn home_dir() -> PathBuf {
    std::env::var("HOME").map_or_else(|_| PathBuf::from("."), PathBuf::from)
}

fn home_subdir(name: &str) -> String {
    home_dir().join(name).to_string_lossy().into_owned()
}

fn default_base_image() -> String {
    "akatz/comfyui-env:v0.3.9-cuda-12.6.2-runtime".to_owned()
}

fn default_models_path() -> String {
    home_subdir("models")
}

fn default_output_path() -> String {
    home_subdir("output")
}

fn default_input_path() -> String {
    home_subdir("input")
}

fn default_command() -> Vec<String> {
    vec!["--fast".to_owned()]
}

fn default_port() -> u16 {
    APP_PORT
}

fn default_runtime() -> String {
    "nvidia".to_owned()
}

fn default_engine() -> String {
    "docker".to_owned()
}
