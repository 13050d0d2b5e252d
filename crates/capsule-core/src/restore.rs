use crate::launch::container_spec;
use capsule_runtime::tools::ContainerTools;
use capsule_runtime::{ContainerEngine, ContainerState, LifecycleManager, RuntimeError};
use capsule_schema::{EnvironmentDescriptor, GlobalConfig, PluginRef, PLUGIN_DIR};
use capsule_store::{EnvStatus, EnvironmentRecord, RegistryStore, StoreLayout};
use serde::Serialize;
use std::fmt;
use std::fs;
use tracing::{debug, info, warn};

/// Where the requirements manifest is copied inside the container.
const CONTAINER_REQUIREMENTS: &str = "/tmp/capsule-requirements.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStep {
    EnsureImage,
    EnsureRunning,
    RestorePlugins,
    InstallDependencies,
    UpdateStatus,
}

impl RestoreStep {
    pub const ALL: [RestoreStep; 5] = [
        RestoreStep::EnsureImage,
        RestoreStep::EnsureRunning,
        RestoreStep::RestorePlugins,
        RestoreStep::InstallDependencies,
        RestoreStep::UpdateStatus,
    ];
}

impl fmt::Display for RestoreStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RestoreStep::EnsureImage => "ensure image",
            RestoreStep::EnsureRunning => "ensure running",
            RestoreStep::RestorePlugins => "restore plugins",
            RestoreStep::InstallDependencies => "install dependencies",
            RestoreStep::UpdateStatus => "update status",
        };
        f.write_str(s)
    }
}

/// One failed piece of a restore. Collected, never returned early.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RestoreFailure {
    ImagePull { image: String, cause: String },
    ContainerStart { container: String, cause: String },
    PluginRestore { name: String, cause: String },
    DependencyInstall { cause: String },
    StatusUpdate { cause: String },
}

impl fmt::Display for RestoreFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestoreFailure::ImagePull { image, cause } => {
                write!(f, "image pull failed for {image}: {cause}")
            }
            RestoreFailure::ContainerStart { container, cause } => {
                write!(f, "container {container} could not be started: {cause}")
            }
            RestoreFailure::PluginRestore { name, cause } => {
                write!(f, "plugin {name} was not restored: {cause}")
            }
            RestoreFailure::DependencyInstall { cause } => {
                write!(f, "dependency install failed: {cause}")
            }
            RestoreFailure::StatusUpdate { cause } => {
                write!(f, "registry status update failed: {cause}")
            }
        }
    }
}

/// Everything a restore did, failed to do, or did not get to.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RestoreReport {
    pub completed: Vec<RestoreStep>,
    pub failures: Vec<RestoreFailure>,
    /// Steps not attempted because shutdown was requested.
    pub skipped: Vec<RestoreStep>,
    pub plugins_restored: Vec<String>,
    pub dependencies_installed: usize,
    /// Live container state observed at the end of the restore.
    pub final_state: Option<ContainerState>,
}

impl RestoreReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_empty()
    }
}

/// Best-effort reconciliation of an environment toward a descriptor.
///
/// Steps run in order; a failing step is recorded and the next step still
/// runs. Nothing is rolled back.
pub struct Reconciler<'a> {
    engine: &'a dyn ContainerEngine,
    registry: &'a RegistryStore,
    layout: &'a StoreLayout,
    config: &'a GlobalConfig,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        engine: &'a dyn ContainerEngine,
        registry: &'a RegistryStore,
        layout: &'a StoreLayout,
        config: &'a GlobalConfig,
    ) -> Self {
        Self {
            engine,
            registry,
            layout,
            config,
        }
    }

    /// Run every step, consulting `should_stop` before each one.
    pub fn run(
        &self,
        record: &EnvironmentRecord,
        descriptor: &EnvironmentDescriptor,
        should_stop: &dyn Fn() -> bool,
    ) -> RestoreReport {
        info!(
            "restoring {} ({}) onto {}",
            record.name, record.id, descriptor.base_image
        );
        let mut report = RestoreReport::default();
        for (i, step) in RestoreStep::ALL.iter().copied().enumerate() {
            if should_stop() {
                warn!("restore interrupted before step '{step}'");
                report.skipped.extend_from_slice(&RestoreStep::ALL[i..]);
                break;
            }
            let failures_before = report.failures.len();
            match step {
                RestoreStep::EnsureImage => self.ensure_image(descriptor, &mut report),
                RestoreStep::EnsureRunning => self.ensure_running(record, descriptor, &mut report),
                RestoreStep::RestorePlugins => self.restore_plugins(record, descriptor, &mut report),
                RestoreStep::InstallDependencies => {
                    self.install_dependencies(record, descriptor, &mut report);
                }
                RestoreStep::UpdateStatus => self.update_status(record, &mut report),
            }
            if report.failures.len() == failures_before {
                report.completed.push(step);
            }
        }
        report
    }

    fn ensure_image(&self, descriptor: &EnvironmentDescriptor, report: &mut RestoreReport) {
        let lm = LifecycleManager::new(self.engine);
        if let Err(e) = lm.ensure_image_present(&descriptor.base_image) {
            report.failures.push(RestoreFailure::ImagePull {
                image: descriptor.base_image.clone(),
                cause: cause(&e),
            });
        }
    }

    fn ensure_running(
        &self,
        record: &EnvironmentRecord,
        descriptor: &EnvironmentDescriptor,
        report: &mut RestoreReport,
    ) {
        let lm = LifecycleManager::new(self.engine);
        let spec = container_spec(record, &descriptor.base_image, self.config);
        match lm.ensure_running(&spec) {
            Ok(handle) => debug!("container {} ready ({:?})", handle.name, handle.transition),
            Err(e) => report.failures.push(RestoreFailure::ContainerStart {
                container: record.container_name.to_string(),
                cause: cause(&e),
            }),
        }
    }

    fn restore_plugins(
        &self,
        record: &EnvironmentRecord,
        descriptor: &EnvironmentDescriptor,
        report: &mut RestoreReport,
    ) {
        let tools = ContainerTools::new(self.engine, &record.container_name);
        for plugin in &descriptor.plugins {
            if !plugin.is_versioned() {
                debug!("plugin {} has no repository, leaving as is", plugin.name);
                continue;
            }
            match restore_plugin(&tools, plugin) {
                Ok(()) => report.plugins_restored.push(plugin.name.clone()),
                Err(cause) => {
                    warn!("plugin {} not restored: {cause}", plugin.name);
                    report.failures.push(RestoreFailure::PluginRestore {
                        name: plugin.name.clone(),
                        cause,
                    });
                }
            }
        }
    }

    fn install_dependencies(
        &self,
        record: &EnvironmentRecord,
        descriptor: &EnvironmentDescriptor,
        report: &mut RestoreReport,
    ) {
        if descriptor.dependencies.is_empty() {
            debug!("no dependencies to install");
            return;
        }
        match self.try_install(record, descriptor) {
            Ok(()) => report.dependencies_installed = descriptor.dependencies.len(),
            Err(e) => report
                .failures
                .push(RestoreFailure::DependencyInstall { cause: cause(&e) }),
        }
    }

    fn try_install(
        &self,
        record: &EnvironmentRecord,
        descriptor: &EnvironmentDescriptor,
    ) -> Result<(), RuntimeError> {
        let manifest = self.layout.requirements_path(&record.id);
        if let Some(parent) = manifest.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut content = descriptor.dependencies.join("\n");
        content.push('\n');
        fs::write(&manifest, content)?;
        debug!("requirements manifest at {}", manifest.display());

        self.engine
            .copy_into(&record.container_name, &manifest, CONTAINER_REQUIREMENTS)?;
        ContainerTools::new(self.engine, &record.container_name)
            .install_requirements(CONTAINER_REQUIREMENTS)
    }

    /// Persist the live engine state, not an assumed one.
    fn update_status(&self, record: &EnvironmentRecord, report: &mut RestoreReport) {
        let live = match self.engine.container_state(&record.container_name) {
            Ok(state) => state,
            Err(e) => {
                report
                    .failures
                    .push(RestoreFailure::StatusUpdate { cause: cause(&e) });
                return;
            }
        };
        report.final_state = Some(live);
        let status = if live == ContainerState::Running {
            EnvStatus::Running
        } else {
            EnvStatus::Exited
        };
        if let Err(e) = self.registry.update_status(&record.id, status) {
            report.failures.push(RestoreFailure::StatusUpdate {
                cause: e.to_string(),
            });
        }
    }
}

fn cause(e: &RuntimeError) -> String {
    e.to_string()
}

/// Clone the plugin, or fetch into an existing checkout of the same
/// remote, then pin its commit.
fn restore_plugin(tools: &ContainerTools<'_>, plugin: &PluginRef) -> Result<(), String> {
    if plugin.name.is_empty()
        || plugin.name.contains('/')
        || plugin.name == "."
        || plugin.name == ".."
    {
        return Err(format!("invalid plugin directory name '{}'", plugin.name));
    }
    let dir = format!("{PLUGIN_DIR}/{}", plugin.name);

    let existing = tools
        .is_dir(&format!("{dir}/.git"))
        .map_err(|e| e.to_string())?;
    if existing {
        let url = tools.git_remote_url(&dir).map_err(|e| e.to_string())?;
        if url != plugin.repo_url {
            return Err(format!(
                "existing checkout at {dir} tracks {url}, not {}",
                plugin.repo_url
            ));
        }
        debug!("reusing existing checkout of {}, fetching origin", plugin.name);
        tools.git_fetch(&dir).map_err(|e| e.to_string())?;
    } else {
        tools
            .git_clone(&plugin.repo_url, &dir)
            .map_err(|e| e.to_string())?;
    }

    match plugin.pinned_commit() {
        Some(commit) => tools
            .git_checkout(&dir, commit)
            .map_err(|e| e.to_string()),
        None => {
            warn!(
                "plugin {} has no pinned commit ('{}'), keeping the default branch",
                plugin.name, plugin.version_ref
            );
            Ok(())
        }
    }
}
