//! Container engine backends and lifecycle management for Capsule environments.
//!
//! This crate implements the execution layer: the pluggable `ContainerEngine`
//! capability (docker/podman CLI and an in-memory mock), the idempotent
//! `LifecycleManager` state machine over it, typed parsers for the output of
//! the in-container tools (package manager, git, hashing, listings), the
//! command builders for those tools, and prerequisite checking.

pub mod cli_engine;
pub mod engine;
pub mod lifecycle;
pub mod mock;
pub mod parse;
pub mod prereq;
pub mod tools;

pub use cli_engine::CliEngine;
pub use engine::{
    select_engine, BindMount, ContainerEngine, ContainerSpec, ContainerState, ExecOutput,
    PortBinding,
};
pub use lifecycle::{ContainerHandle, LifecycleManager, Transition};
pub use mock::MockEngine;
pub use parse::ParseError;
pub use prereq::{check_engine_prereqs, format_missing, MissingPrereq};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("container engine '{0}' is not available on this system")]
    EngineUnavailable(String),
    #[error("failed to pull image '{image}': {reason}")]
    ImagePull { image: String, reason: String },
    #[error("container '{0}' does not exist")]
    ContainerNotFound(String),
    #[error("container '{0}' is not running")]
    NotRunning(String),
    #[error("container '{name}' did not reach the running state (observed: {observed})")]
    StartFailed { name: String, observed: ContainerState },
    #[error("`{command}` exited with status {status_code}: {stderr}")]
    CommandFailed {
        command: String,
        status_code: i32,
        stderr: String,
    },
    #[error("runtime execution failed: {0}")]
    ExecFailed(String),
    #[error("unexpected tool output: {0}")]
    Parse(#[from] ParseError),
}
