//! Logical mount keys and the hosted application's in-container layout.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Root of the hosted application inside every container.
pub const APP_ROOT: &str = "/comfyui";
/// Directory holding one subdirectory per plugin.
pub const PLUGIN_DIR: &str = "/comfyui/custom_nodes";
/// Directory holding one subdirectory per model category.
pub const MODELS_DIR: &str = "/comfyui/models";
/// Directory scanned for candidate workflow documents.
pub const WORKFLOWS_DIR: &str = "/comfyui/workflows";
/// Port the application listens on inside the container.
pub const APP_PORT: u16 = 8188;

/// A logical resource bound read-write from the host into the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKey {
    Models,
    Output,
    Input,
}

impl MountKey {
    pub const ALL: [MountKey; 3] = [MountKey::Models, MountKey::Output, MountKey::Input];

    pub fn as_str(self) -> &'static str {
        match self {
            MountKey::Models => "models",
            MountKey::Output => "output",
            MountKey::Input => "input",
        }
    }

    pub fn container_path(self) -> &'static str {
        match self {
            MountKey::Models => MODELS_DIR,
            MountKey::Output => "/comfyui/output",
            MountKey::Input => "/comfyui/input",
        }
    }
}

impl fmt::Display for MountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
