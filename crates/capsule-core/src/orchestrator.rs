use crate::capture::{capture, write_descriptor, PackResult};
use crate::concurrency::shutdown_requested;
use crate::drift::StatusReport;
use crate::launch::container_spec;
use crate::restore::{Reconciler, RestoreReport};
use crate::CoreError;
use capsule_runtime::{select_engine, ContainerEngine, ContainerState, LifecycleManager, Transition};
use capsule_schema::{ContainerName, EnvId, EnvironmentDescriptor, GlobalConfig};
use capsule_store::{
    EnvStatus, EnvironmentRecord, LaunchOptions, MountConfig, RegistryStore, StoreLayout,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Workflow file name recorded by `create` when none is given.
pub const DEFAULT_WORKFLOW_FILE: &str = "default_workflow.json";

/// Parameters for `create`. Unset fields fall back to the global config.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub name: String,
    pub description: String,
    pub base_image: Option<String>,
    pub workflow_file: Option<String>,
    pub mounts: MountConfig,
    pub port: Option<u16>,
    pub runtime: Option<String>,
    pub command: Option<Vec<String>>,
}

impl CreateOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Result of `activate`.
#[derive(Debug, Clone)]
pub struct Activation {
    pub record: EnvironmentRecord,
    pub transition: Transition,
}

/// Result of `restore`.
#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    pub record: EnvironmentRecord,
    pub report: RestoreReport,
    pub descriptor_path: PathBuf,
}

/// Entry point for every environment operation.
///
/// Owns the store layout, the registry, the read-only global config, and the
/// container engine selected by that config.
pub struct Orchestrator {
    layout: StoreLayout,
    registry: RegistryStore,
    config: GlobalConfig,
    engine: Arc<dyn ContainerEngine>,
}

impl Orchestrator {
    /// Open the store at `root`, loading `config.toml` and the engine it names.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let layout = StoreLayout::new(root);
        layout.initialize()?;
        let config = GlobalConfig::load(&layout.config_file())?;
        let engine: Arc<dyn ContainerEngine> =
            Arc::from(select_engine(&config.engine, layout.root())?);
        debug!("using {} engine at {}", engine.name(), layout.root().display());
        Ok(Self::from_parts(layout, config, engine))
    }

    /// Open the store at `root` with an explicit config and engine.
    pub fn with_engine(
        root: impl Into<PathBuf>,
        config: GlobalConfig,
        engine: Arc<dyn ContainerEngine>,
    ) -> Result<Self, CoreError> {
        let layout = StoreLayout::new(root);
        layout.initialize()?;
        Ok(Self::from_parts(layout, config, engine))
    }

    fn from_parts(layout: StoreLayout, config: GlobalConfig, engine: Arc<dyn ContainerEngine>) -> Self {
        let registry = RegistryStore::new(layout.clone());
        Self {
            layout,
            registry,
            config,
            engine,
        }
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    pub fn engine(&self) -> &dyn ContainerEngine {
        self.engine.as_ref()
    }

    pub fn list(&self) -> Result<Vec<EnvironmentRecord>, CoreError> {
        Ok(self.registry.list()?)
    }

    pub fn find(&self, identifier: &str) -> Result<EnvironmentRecord, CoreError> {
        Ok(self.registry.find(identifier)?)
    }

    /// Register a new environment and its project directory.
    ///
    /// No container is created; the record starts `exited`. If the project
    /// directory cannot be prepared the registry entry is removed again.
    pub fn create(&self, opts: &CreateOptions) -> Result<EnvironmentRecord, CoreError> {
        info!("creating environment {}", opts.name);
        let now = chrono::Utc::now();
        let seed = format!(
            "{}:{}:{}",
            opts.name,
            now.timestamp_nanos_opt().unwrap_or_default(),
            std::process::id()
        );
        let id = EnvId::generate(&seed);

        let image = opts
            .base_image
            .clone()
            .unwrap_or_else(|| self.config.default_base_image.clone());
        let runtime = opts.runtime.clone().or_else(|| {
            Some(self.config.default_runtime.clone()).filter(|r| !r.is_empty())
        });
        let record = EnvironmentRecord {
            container_name: ContainerName::new(id.as_str()),
            id,
            name: opts.name.clone(),
            description: opts.description.clone(),
            image,
            status: EnvStatus::Exited,
            mount_config: opts.mounts.clone(),
            command: opts
                .command
                .clone()
                .unwrap_or_else(|| self.config.default_command.clone()),
            options: LaunchOptions {
                port: opts.port.unwrap_or(self.config.default_port),
                runtime,
            },
            created_at: now.to_rfc3339(),
        };
        self.registry.insert(&record)?;

        if let Err(e) = self.init_project(&record, opts.workflow_file.as_deref()) {
            warn!("project setup for {} failed, rolling back: {e}", record.id);
            if let Err(e) = self.registry.remove(&record.id) {
                warn!("failed to remove registry entry {}: {e}", record.id);
            }
            let dir = self.layout.project_dir(&record.id);
            if dir.exists() {
                if let Err(e) = std::fs::remove_dir_all(&dir) {
                    warn!("failed to remove {}: {e}", dir.display());
                }
            }
            return Err(e);
        }
        info!("environment {} created as {}", record.name, record.id);
        Ok(record)
    }

    fn init_project(
        &self,
        record: &EnvironmentRecord,
        workflow_file: Option<&str>,
    ) -> Result<(), CoreError> {
        std::fs::create_dir_all(self.layout.project_dir(&record.id))?;
        let mut descriptor = EnvironmentDescriptor::new(&record.name, &record.image);
        descriptor.description.clone_from(&record.description);
        workflow_file
            .unwrap_or(DEFAULT_WORKFLOW_FILE)
            .clone_into(&mut descriptor.workflow_file);
        write_descriptor(descriptor, &self.layout.descriptor_path(&record.id))?;
        Ok(())
    }

    /// Bring the environment's container up, pulling the image if needed.
    ///
    /// Safe to repeat: a container that is already running is left alone,
    /// whatever the cached status says.
    pub fn activate(&self, identifier: &str) -> Result<Activation, CoreError> {
        let record = self.registry.find(identifier)?;
        info!("activating {} ({})", record.name, record.id);
        let lm = LifecycleManager::new(self.engine());
        lm.ensure_image_present(&record.image)?;
        let spec = container_spec(&record, &record.image, &self.config);
        let handle = lm.ensure_running(&spec)?;
        let record = self.registry.update_status(&record.id, EnvStatus::Running)?;
        Ok(Activation {
            record,
            transition: handle.transition,
        })
    }

    /// Stop the environment's container. Returns the updated record and the
    /// live state observed before stopping.
    pub fn deactivate(
        &self,
        identifier: &str,
    ) -> Result<(EnvironmentRecord, ContainerState), CoreError> {
        let record = self.registry.find(identifier)?;
        info!("deactivating {} ({})", record.name, record.id);
        let lm = LifecycleManager::new(self.engine());
        let before = lm.state(&record.container_name)?;
        lm.stop(&record.container_name)?;
        let record = self.registry.update_status(&record.id, EnvStatus::Exited)?;
        Ok((record, before))
    }

    /// Capture the running environment into a descriptor file.
    ///
    /// Writes to `out`, or to the environment's project directory.
    pub fn pack(
        &self,
        identifier: &str,
        workflow_file: Option<&str>,
        out: Option<&Path>,
    ) -> Result<PackResult, CoreError> {
        let record = self.registry.find(identifier)?;
        let descriptor = capture(self.engine(), &record, workflow_file)?;
        let path = out.map_or_else(|| self.layout.descriptor_path(&record.id), Path::to_path_buf);
        write_descriptor(descriptor, &path)
    }

    /// Reconcile the environment toward a descriptor, stopping between steps
    /// when Ctrl-C was pressed.
    pub fn restore(
        &self,
        identifier: &str,
        descriptor: Option<&Path>,
    ) -> Result<RestoreOutcome, CoreError> {
        self.restore_with_cancel(identifier, descriptor, &shutdown_requested)
    }

    /// Like `restore`, with an explicit cancellation check.
    ///
    /// Only a missing record or an unreadable descriptor is an error; every
    /// reconciliation failure ends up in the report.
    pub fn restore_with_cancel(
        &self,
        identifier: &str,
        descriptor: Option<&Path>,
        should_stop: &dyn Fn() -> bool,
    ) -> Result<RestoreOutcome, CoreError> {
        let record = self.registry.find(identifier)?;
        let path = descriptor.map_or_else(|| self.layout.descriptor_path(&record.id), Path::to_path_buf);
        if !path.exists() {
            return Err(CoreError::DescriptorMissing(path));
        }
        let target = EnvironmentDescriptor::read_from_file(&path)?;

        let reconciler = Reconciler::new(self.engine(), &self.registry, &self.layout, &self.config);
        let report = reconciler.run(&record, &target, should_stop);
        if report.is_complete() {
            info!("environment {} restored", record.name);
        } else {
            warn!(
                "restore of {} incomplete: {} failure(s), {} step(s) skipped",
                record.name,
                report.failures.len(),
                report.skipped.len()
            );
        }
        let record = self.registry.find(&record.id).unwrap_or(record);
        Ok(RestoreOutcome {
            record,
            report,
            descriptor_path: path,
        })
    }

    /// Remove the container, the registry entry, and the project directory.
    pub fn delete(&self, identifier: &str) -> Result<EnvironmentRecord, CoreError> {
        let record = self.registry.find(identifier)?;
        info!("deleting {} ({})", record.name, record.id);
        LifecycleManager::new(self.engine()).remove(&record.container_name)?;
        let record = self.registry.remove(&record.id)?;
        let dir = self.layout.project_dir(&record.id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
            debug!("removed project directory {}", dir.display());
        }
        Ok(record)
    }

    /// Every record with its live container state. An engine query failure
    /// leaves the live state unknown rather than failing the listing.
    pub fn status(&self) -> Result<Vec<StatusReport>, CoreError> {
        let records = self.registry.list()?;
        Ok(records
            .iter()
            .map(|record| {
                let live = match self.engine.container_state(&record.container_name) {
                    Ok(state) => Some(state),
                    Err(e) => {
                        warn!("cannot query container {}: {e}", record.container_name);
                        None
                    }
                };
                StatusReport::new(record, live)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsule_runtime::MockEngine;

    fn orchestrator() -> (tempfile::TempDir, Arc<MockEngine>, Orchestrator) {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(MockEngine::new());
        let orch =
            Orchestrator::with_engine(dir.path(), GlobalConfig::default(), engine.clone()).unwrap();
        (dir, engine, orch)
    }

    #[test]
    fn create_applies_config_defaults() {
        let (_dir, _engine, orch) = orchestrator();
        let record = orch.create(&CreateOptions::new("envA")).unwrap();
        let config = GlobalConfig::default();
        assert!(record.id.starts_with("capsule-"));
        assert_eq!(record.container_name.as_str(), record.id.as_str());
        assert_eq!(record.image, config.default_base_image);
        assert_eq!(record.command, config.default_command);
        assert_eq!(record.options.port, config.default_port);
        assert_eq!(record.options.runtime.as_deref(), Some("nvidia"));
        assert_eq!(record.status, EnvStatus::Exited);

        let descriptor =
            EnvironmentDescriptor::read_from_file(orch.layout().descriptor_path(&record.id))
                .unwrap();
        assert_eq!(descriptor.workflow_file, DEFAULT_WORKFLOW_FILE);
        assert_eq!(descriptor.base_image, record.image);
        assert!(descriptor.dependencies.is_empty());
    }

    #[test]
    fn create_rejects_duplicate_name() {
        let (_dir, _engine, orch) = orchestrator();
        orch.create(&CreateOptions::new("envA")).unwrap();
        let err = orch.create(&CreateOptions::new("envA")).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Store(capsule_store::StoreError::NameConflict { .. })
        ));
        assert_eq!(orch.list().unwrap().len(), 1);
    }

    #[test]
    fn create_rolls_back_when_project_dir_is_blocked() {
        let (_dir, _engine, orch) = orchestrator();
        // A regular file where the projects directory should be.
        std::fs::remove_dir_all(orch.layout().projects_dir()).unwrap();
        std::fs::write(orch.layout().projects_dir(), b"").unwrap();
        assert!(orch.create(&CreateOptions::new("envA")).is_err());
        assert!(orch.list().unwrap().is_empty());
    }

    #[test]
    fn activate_trusts_engine_over_cached_status() {
        let (_dir, engine, orch) = orchestrator();
        let record = orch.create(&CreateOptions::new("envA")).unwrap();
        let first = orch.activate("envA").unwrap();
        assert_eq!(first.transition, Transition::Created);

        // Stopped behind the registry's back; cached status still says running.
        engine.stop_container(&record.container_name).unwrap();
        let again = orch.activate(&record.id).unwrap();
        assert_eq!(again.transition, Transition::Started);
        assert_eq!(engine.create_count(&record.container_name), 1);
    }

    #[test]
    fn deactivate_is_a_noop_when_stopped() {
        let (_dir, _engine, orch) = orchestrator();
        orch.create(&CreateOptions::new("envA")).unwrap();
        let (record, before) = orch.deactivate("envA").unwrap();
        assert_eq!(before, ContainerState::Absent);
        assert_eq!(record.status, EnvStatus::Exited);
    }

    #[test]
    fn restore_without_descriptor_fails() {
        let (_dir, _engine, orch) = orchestrator();
        let record = orch.create(&CreateOptions::new("envA")).unwrap();
        std::fs::remove_file(orch.layout().descriptor_path(&record.id)).unwrap();
        assert!(matches!(
            orch.restore("envA", None),
            Err(CoreError::DescriptorMissing(_))
        ));
    }

    #[test]
    fn status_reports_drift() {
        let (_dir, engine, orch) = orchestrator();
        let record = orch.create(&CreateOptions::new("envA")).unwrap();
        orch.activate("envA").unwrap();
        engine.stop_container(&record.container_name).unwrap();

        let reports = orch.status().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, EnvStatus::Running);
        assert_eq!(reports[0].live, Some(ContainerState::Exited));
        assert!(reports[0].drift);
    }
}
