use crate::RuntimeError;
use capsule_schema::ContainerName;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// File the mock engine persists its state to, relative to the store root.
pub const MOCK_STATE_FILE: &str = "mock-engine.json";

/// Live state of a named container as reported by the engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Absent,
    Exited,
    Running,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerState::Absent => write!(f, "absent"),
            ContainerState::Exited => write!(f, "exited"),
            ContainerState::Running => write!(f, "running"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BindMount {
    pub host_path: String,
    pub container_path: String,
}

/// A host port published to a TCP port inside the container.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortBinding {
    pub host: u16,
    pub container: u16,
}

/// Everything the engine needs to create a container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: ContainerName,
    pub image: String,
    /// Arguments appended after the image (passed to the entrypoint).
    pub command: Vec<String>,
    /// Read-write bind mounts.
    pub mounts: Vec<BindMount>,
    pub ports: Vec<PortBinding>,
    /// OCI runtime selector, e.g. `nvidia`; `None` keeps the engine default.
    pub runtime: Option<String>,
}

/// Result of a command run inside a container.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecOutput {
    pub status_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(status_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status_code == 0
    }
}

/// Capability interface over a container engine.
///
/// Implementations report engine-level facts and perform single transitions;
/// idempotence across states lives in `LifecycleManager`.
pub trait ContainerEngine: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    /// Whether `image` is present in the local image cache.
    fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;

    /// Fails with `RuntimeError::ImagePull` on registry or network failure.
    fn pull_image(&self, image: &str) -> Result<(), RuntimeError>;

    fn container_state(&self, name: &str) -> Result<ContainerState, RuntimeError>;

    /// Create without starting.
    fn create_container(&self, spec: &ContainerSpec) -> Result<(), RuntimeError>;

    fn start_container(&self, name: &str) -> Result<(), RuntimeError>;

    fn stop_container(&self, name: &str) -> Result<(), RuntimeError>;

    fn remove_container(&self, name: &str) -> Result<(), RuntimeError>;

    /// Run `argv` inside a running container and capture its output.
    ///
    /// A non-zero exit is returned as data, not as an error; `Err` means the
    /// command could not be run at all.
    fn exec(&self, name: &str, argv: &[String]) -> Result<ExecOutput, RuntimeError>;

    /// Copy a host file into the container at `container_path`.
    fn copy_into(
        &self,
        name: &str,
        host_path: &Path,
        container_path: &str,
    ) -> Result<(), RuntimeError>;
}

pub fn select_engine(
    name: &str,
    store_root: &Path,
) -> Result<Box<dyn ContainerEngine>, RuntimeError> {
    match name {
        "docker" => Ok(Box::new(crate::cli_engine::CliEngine::docker())),
        "podman" => Ok(Box::new(crate::cli_engine::CliEngine::podman())),
        "mock" => Ok(Box::new(crate::mock::MockEngine::persistent(
            store_root.join(MOCK_STATE_FILE),
        )?)),
        other => Err(RuntimeError::EngineUnavailable(other.to_owned())),
    }
}
