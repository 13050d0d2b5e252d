//! Descriptor format, global configuration, and identifiers for Capsule.
//!
//! This crate defines the schema layer: the versioned, forward-compatible
//! `EnvironmentDescriptor` TOML document (`encode`/`decode`), the read-only
//! `GlobalConfig` defaults, logical mount keys with the hosted application's
//! in-container layout, and string newtypes for identifiers and digests.

pub mod config;
pub mod descriptor;
pub mod mounts;
pub mod types;

pub use config::{ConfigError, GlobalConfig, CONFIG_FILE};
pub use descriptor::{
    decode, encode, DescriptorError, EnvironmentDescriptor, ModelRef, PluginRef, RuntimeMetadata,
    DESCRIPTOR_FILE, DESCRIPTOR_VERSION, MIN_DESCRIPTOR_VERSION,
};
pub use mounts::{MountKey, APP_PORT, APP_ROOT, MODELS_DIR, PLUGIN_DIR, WORKFLOWS_DIR};
pub use types::{ContainerName, ContentHash, EnvId};
