//! Core orchestration for Capsule environments.
//!
//! This crate ties together the descriptor schema, the registry store, and
//! the container engine into the `Orchestrator`: create, activate,
//! deactivate, pack (snapshot capture), restore (best-effort reconciliation),
//! delete, and status. It also provides registry/engine drift detection and
//! the Ctrl-C shutdown flag consulted between restore steps.

pub mod capture;
pub mod concurrency;
pub mod drift;
pub mod launch;
pub mod orchestrator;
pub mod restore;

pub use capture::{capture, select_workflow, write_descriptor, PackResult};
pub use concurrency::{install_signal_handler, shutdown_requested};
pub use drift::{status_drift, StatusReport};
pub use launch::container_spec;
pub use orchestrator::{
    Activation, CreateOptions, Orchestrator, RestoreOutcome, DEFAULT_WORKFLOW_FILE,
};
pub use restore::{Reconciler, RestoreFailure, RestoreReport, RestoreStep};

use capsule_runtime::ContainerState;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("descriptor error: {0}")]
    Descriptor(#[from] capsule_schema::DescriptorError),
    #[error("config error: {0}")]
    Config(#[from] capsule_schema::ConfigError),
    #[error("store error: {0}")]
    Store(#[from] capsule_store::StoreError),
    #[error("runtime error: {0}")]
    Runtime(#[from] capsule_runtime::RuntimeError),
    #[error("environment '{name}' is not running (container is {state}); activate it first")]
    NotRunning { name: String, state: ContainerState },
    #[error("failed to inspect installed packages: {0}")]
    DependencyInspection(#[source] capsule_runtime::RuntimeError),
    #[error("no workflow files found in {dir}")]
    NoWorkflowFound { dir: String },
    #[error(
        "multiple workflow files found ({}); choose one with --workflow-file",
        .candidates.join(", ")
    )]
    AmbiguousWorkflow { candidates: Vec<String> },
    #[error("failed to write descriptor {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: capsule_schema::DescriptorError,
    },
    #[error("no descriptor at {}; run `capsule pack` first or pass --descriptor", .0.display())]
    DescriptorMissing(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambiguous_workflow_lists_candidates() {
        let e = CoreError::AmbiguousWorkflow {
            candidates: vec!["a.json".to_owned(), "b.json".to_owned()],
        };
        assert!(e.to_string().contains("a.json, b.json"));
    }

    #[test]
    fn not_running_names_state() {
        let e = CoreError::NotRunning {
            name: "envA".to_owned(),
            state: ContainerState::Exited,
        };
        let msg = e.to_string();
        assert!(msg.contains("envA"));
        assert!(msg.contains("exited"));
    }

    #[test]
    fn write_error_names_path() {
        let e = CoreError::Write {
            path: PathBuf::from("/ro/capsule.toml"),
            source: capsule_schema::DescriptorError::Io(std::io::Error::other("read-only")),
        };
        assert!(e.to_string().contains("/ro/capsule.toml"));
    }
}
