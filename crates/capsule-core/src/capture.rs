use crate::CoreError;
use capsule_runtime::tools::ContainerTools;
use capsule_runtime::{ContainerEngine, ContainerState, RuntimeError};
use capsule_schema::{
    EnvironmentDescriptor, ModelRef, PluginRef, RuntimeMetadata, MODELS_DIR, PLUGIN_DIR,
    WORKFLOWS_DIR,
};
use capsule_store::EnvironmentRecord;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Entries inside the plugin directory that are never plugins.
const IGNORED_PLUGIN_ENTRIES: &[&str] = &["__pycache__"];

/// Outcome of a successful `pack`.
#[derive(Debug, Clone)]
pub struct PackResult {
    pub path: PathBuf,
    /// blake3 digest of the encoded descriptor.
    pub digest: String,
    pub descriptor: EnvironmentDescriptor,
}

/// Inspect the running container bound to `record` and build its descriptor.
///
/// Never starts a container. Dependency inspection is all-or-nothing;
/// plugin and model inventory is best-effort per item. The workflow is
/// resolved before any model is hashed.
pub fn capture(
    engine: &dyn ContainerEngine,
    record: &EnvironmentRecord,
    workflow_file: Option<&str>,
) -> Result<EnvironmentDescriptor, CoreError> {
    info!("capturing environment {} ({})", record.name, record.id);

    let state = engine.container_state(&record.container_name)?;
    if state != ContainerState::Running {
        return Err(CoreError::NotRunning {
            name: record.name.clone(),
            state,
        });
    }
    let tools = ContainerTools::new(engine, &record.container_name);

    let dependencies = tools.freeze().map_err(CoreError::DependencyInspection)?;
    debug!("captured {} dependencies", dependencies.len());

    let workflow_file = select_workflow(&tools, workflow_file)?;
    let plugins = collect_plugins(&tools);
    let models = collect_models(&tools);
    let metadata = collect_metadata(&tools);

    let mut descriptor = EnvironmentDescriptor::new(&record.name, &record.image);
    descriptor.description.clone_from(&record.description);
    descriptor.workflow_file = workflow_file;
    descriptor.dependencies = dependencies;
    descriptor.metadata = metadata;
    descriptor.plugins = plugins;
    descriptor.models = models;
    Ok(descriptor)
}

/// Write `descriptor` atomically to `path`, creating parent directories.
pub fn write_descriptor(
    descriptor: EnvironmentDescriptor,
    path: &Path,
) -> Result<PackResult, CoreError> {
    let write_err = |source: capsule_schema::DescriptorError| CoreError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| write_err(capsule_schema::DescriptorError::Io(e)))?;
    }
    descriptor.write_to_file(path).map_err(write_err)?;
    let digest = descriptor.digest()?;
    info!("descriptor written to {} ({})", path.display(), &digest[..12]);
    Ok(PackResult {
        path: path.to_path_buf(),
        digest,
        descriptor,
    })
}

/// Every entry of the plugin directory: checkouts, plain directories,
/// single-file plugins and symlinks alike.
fn collect_plugins(tools: &ContainerTools<'_>) -> Vec<PluginRef> {
    let names = match tools.list_entries(PLUGIN_DIR) {
        Ok(names) => names,
        Err(e) => {
            warn!("cannot list plugins in {PLUGIN_DIR}: {e}");
            return Vec::new();
        }
    };
    names
        .into_iter()
        .filter(|n| !IGNORED_PLUGIN_ENTRIES.contains(&n.as_str()))
        .filter_map(|name| match inspect_plugin(tools, &name) {
            Ok(plugin) => Some(plugin),
            Err(e) => {
                warn!("skipping plugin {name}: {e}");
                None
            }
        })
        .collect()
}

fn inspect_plugin(tools: &ContainerTools<'_>, name: &str) -> Result<PluginRef, RuntimeError> {
    let dir = format!("{PLUGIN_DIR}/{name}");
    if !tools.is_dir(&format!("{dir}/.git"))? {
        debug!("plugin {name} is not version-controlled");
        return Ok(PluginRef::unversioned(name));
    }
    let url = tools.git_remote_url(&dir)?;
    let commit = tools.git_head(&dir)?;
    Ok(PluginRef::versioned(name, &url, &commit))
}

fn collect_models(tools: &ContainerTools<'_>) -> Vec<ModelRef> {
    let categories = match tools.list_dirs(MODELS_DIR) {
        Ok(c) => c,
        Err(e) => {
            warn!("cannot list model categories in {MODELS_DIR}: {e}");
            return Vec::new();
        }
    };
    let mut models = Vec::new();
    for category in categories {
        let dir = format!("{MODELS_DIR}/{category}");
        let files = match tools.list_files(&dir) {
            Ok(f) => f,
            Err(e) => {
                warn!("skipping model category {category}: {e}");
                continue;
            }
        };
        for file in files {
            match tools.sha256(&format!("{dir}/{file}")) {
                Ok(content_hash) => models.push(ModelRef {
                    name: file,
                    content_hash,
                    category: category.clone(),
                }),
                Err(e) => warn!("skipping model {category}/{file}: {e}"),
            }
        }
    }
    models
}

/// The workflow document to record: the explicit choice, else the only
/// candidate in the workflows directory.
pub fn select_workflow(
    tools: &ContainerTools<'_>,
    explicit: Option<&str>,
) -> Result<String, CoreError> {
    if let Some(name) = explicit {
        return Ok(name.to_owned());
    }
    let candidates = tools.list_files(WORKFLOWS_DIR).unwrap_or_else(|e| {
        debug!("cannot list {WORKFLOWS_DIR}: {e}");
        Vec::new()
    });
    if candidates.len() > 1 {
        return Err(CoreError::AmbiguousWorkflow { candidates });
    }
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| CoreError::NoWorkflowFound {
            dir: WORKFLOWS_DIR.to_owned(),
        })
}

fn collect_metadata(tools: &ContainerTools<'_>) -> RuntimeMetadata {
    let python_version = tools.python_version().unwrap_or_else(|e| {
        debug!("python version unavailable: {e}");
        String::new()
    });
    let cuda_version = tools.cuda_version().unwrap_or_else(|e| {
        debug!("CUDA version unavailable: {e}");
        String::new()
    });
    RuntimeMetadata {
        cuda_version,
        python_version,
    }
}
