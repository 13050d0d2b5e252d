//! In-memory container engine for tests and dry runs.
//!
//! Containers carry a tiny simulated filesystem, package set, and git
//! checkouts plus symlinks, and `exec` interprets exactly the argv shapes built in
//! `crate::tools`. Anything else exits 127. Exact-argv scripts override the
//! simulation for failure injection.

use crate::engine::{ContainerEngine, ContainerSpec, ContainerState, ExecOutput};
use crate::RuntimeError;
use capsule_schema::{ContainerName, APP_ROOT, MODELS_DIR, PLUGIN_DIR, WORKFLOWS_DIR};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::warn;

const NULL_COMMIT: &str = "0000000000000000000000000000000000000000";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MockRepo {
    pub url: String,
    pub head: String,
    /// Commits present in the local object store; checkout can only reach these.
    #[serde(default)]
    pub fetched: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MockContainer {
    spec: ContainerSpec,
    running: bool,
    dirs: BTreeSet<String>,
    files: BTreeMap<String, String>,
    /// Symlink path to target path.
    #[serde(default)]
    links: BTreeMap<String, String>,
    packages: Vec<String>,
    repos: BTreeMap<String, MockRepo>,
}

impl MockContainer {
    fn fresh(spec: ContainerSpec) -> Self {
        let mut c = Self {
            spec,
            running: false,
            dirs: BTreeSet::new(),
            files: BTreeMap::new(),
            links: BTreeMap::new(),
            packages: Vec::new(),
            repos: BTreeMap::new(),
        };
        for dir in [PLUGIN_DIR, MODELS_DIR, WORKFLOWS_DIR] {
            c.add_dir(dir);
        }
        c.add_dir(&format!("{APP_ROOT}/input"));
        c.add_dir(&format!("{APP_ROOT}/output"));
        c
    }

    fn add_dir(&mut self, path: &str) {
        let mut current = path.trim_end_matches('/');
        while !current.is_empty() {
            self.dirs.insert(current.to_owned());
            current = parent(current);
        }
    }

    fn add_file(&mut self, path: &str, content: String) {
        self.add_dir(parent(path));
        self.files.insert(path.to_owned(), content);
    }

    /// Rewrite a path whose prefix is a symlink onto the link target.
    fn resolve(&self, path: &str) -> String {
        for (link, target) in &self.links {
            if path == link {
                return target.clone();
            }
            if let Some(rest) = path.strip_prefix(link.as_str()) {
                if rest.starts_with('/') {
                    return format!("{target}{rest}");
                }
            }
        }
        path.to_owned()
    }

    fn is_dir(&self, path: &str) -> bool {
        self.dirs.contains(&self.resolve(path))
    }

    fn file(&self, path: &str) -> Option<&String> {
        self.files.get(&self.resolve(path))
    }

    fn repo_mut(&mut self, dir: &str) -> Option<&mut MockRepo> {
        let dir = self.resolve(dir);
        self.repos.get_mut(&dir)
    }

    /// Children of `dir`, filtered by find type after following symlinks;
    /// `None` lists every entry.
    fn children(&self, dir: &str, kind: Option<&str>) -> Vec<String> {
        let dir = self.resolve(dir);
        let links = self.links.iter().filter(|(_, target)| match kind {
            Some("d") => self.dirs.contains(*target),
            Some(_) => self.files.contains_key(*target),
            None => true,
        });
        let names: Box<dyn Iterator<Item = &String>> = match kind {
            Some("d") => Box::new(self.dirs.iter()),
            Some(_) => Box::new(self.files.keys()),
            None => Box::new(self.dirs.iter().chain(self.files.keys())),
        };
        names
            .chain(links.map(|(link, _)| link))
            .filter(|p| parent(p) == dir)
            .map(|p| basename(p).to_owned())
            .collect()
    }

    /// Merge requirement lines into the package set, replacing by package name.
    fn install(&mut self, manifest: &str) {
        for line in manifest.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let key = package_key(line);
            match self.packages.iter_mut().find(|p| package_key(p) == key) {
                Some(existing) => line.clone_into(existing),
                None => self.packages.push(line.to_owned()),
            }
        }
    }
}

fn parent(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(p, _)| p)
}

fn basename(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, b)| b)
}

fn package_key(spec: &str) -> &str {
    spec.split(['=', '<', '>', '~', '@', ' '])
        .next()
        .unwrap_or(spec)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScriptedExec {
    argv: Vec<String>,
    output: ExecOutput,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MockState {
    images: BTreeSet<String>,
    pull_failures: BTreeSet<String>,
    containers: BTreeMap<String, MockContainer>,
    /// Known remote repositories and their commits; the first is the default HEAD.
    remotes: BTreeMap<String, Vec<String>>,
    scripts: Vec<ScriptedExec>,
    /// In-process only; never written to the state file.
    #[serde(skip)]
    exec_log: Vec<(String, Vec<String>)>,
    creates: BTreeMap<String, u32>,
}

pub struct MockEngine {
    state: Mutex<MockState>,
    state_file: Option<PathBuf>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            state_file: None,
        }
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock whose state survives across processes in a JSON file.
    pub fn persistent(path: impl Into<PathBuf>) -> Result<Self, RuntimeError> {
        let path = path.into();
        let state = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content).map_err(|e| {
                RuntimeError::ExecFailed(format!("invalid mock state {}: {e}", path.display()))
            })?
        } else {
            MockState::default()
        };
        Ok(Self {
            state: Mutex::new(state),
            state_file: Some(path),
        })
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self, state: &MockState) -> Result<(), RuntimeError> {
        let Some(path) = &self.state_file else {
            return Ok(());
        };
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| RuntimeError::ExecFailed(format!("mock state: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply a setup mutation and persist it. Setup helpers have no error
    /// channel, so a failed save is only logged.
    fn setup(&self, f: impl FnOnce(&mut MockState)) {
        let mut state = self.lock();
        f(&mut state);
        if let Err(e) = self.save(&state) {
            warn!("failed to persist mock engine state: {e}");
        }
    }

    pub fn add_image(&self, image: &str) {
        self.setup(|s| {
            s.images.insert(image.to_owned());
        });
    }

    pub fn fail_pull(&self, image: &str) {
        self.setup(|s| {
            s.pull_failures.insert(image.to_owned());
        });
    }

    /// Create a container directly, bypassing the lifecycle.
    pub fn seed_container(&self, name: &str, image: &str, running: bool) {
        self.setup(|s| {
            s.images.insert(image.to_owned());
            let mut c = MockContainer::fresh(ContainerSpec {
                name: ContainerName::new(name),
                image: image.to_owned(),
                command: Vec::new(),
                mounts: Vec::new(),
                ports: Vec::new(),
                runtime: None,
            });
            c.running = running;
            s.containers.insert(name.to_owned(), c);
        });
    }

    pub fn add_dir(&self, container: &str, path: &str) {
        self.setup(|s| {
            if let Some(c) = s.containers.get_mut(container) {
                c.add_dir(path);
            }
        });
    }

    pub fn add_file(&self, container: &str, path: &str, content: &[u8]) {
        self.setup(|s| {
            if let Some(c) = s.containers.get_mut(container) {
                c.add_file(path, String::from_utf8_lossy(content).into_owned());
            }
        });
    }

    pub fn set_packages(&self, container: &str, packages: &[&str]) {
        self.setup(|s| {
            if let Some(c) = s.containers.get_mut(container) {
                c.packages = packages.iter().map(|p| (*p).to_owned()).collect();
            }
        });
    }

    /// Create a symlink at `path` pointing to the absolute `target`.
    pub fn add_symlink(&self, container: &str, path: &str, target: &str) {
        self.setup(|s| {
            if let Some(c) = s.containers.get_mut(container) {
                c.add_dir(parent(path));
                c.links.insert(path.to_owned(), target.to_owned());
            }
        });
    }

    /// Place a git checkout of `url` at `dir` inside the container. Only
    /// `head` is present locally until the checkout is fetched.
    pub fn add_repo(&self, container: &str, dir: &str, url: &str, head: &str) {
        self.setup(|s| {
            if let Some(c) = s.containers.get_mut(container) {
                c.add_dir(&format!("{dir}/.git"));
                c.repos.insert(
                    dir.to_owned(),
                    MockRepo {
                        url: url.to_owned(),
                        head: head.to_owned(),
                        fetched: BTreeSet::from([head.to_owned()]),
                    },
                );
            }
        });
    }

    /// Make `url` cloneable and fetchable, publishing `commits`.
    pub fn register_remote(&self, url: &str, commits: &[&str]) {
        self.setup(|s| {
            s.remotes.insert(
                url.to_owned(),
                commits.iter().map(|c| (*c).to_owned()).collect(),
            );
        });
    }

    /// Return `output` for any exec whose argv equals `argv` exactly.
    pub fn script(&self, argv: &[String], output: ExecOutput) {
        self.setup(|s| {
            s.scripts.push(ScriptedExec {
                argv: argv.to_vec(),
                output,
            });
        });
    }

    pub fn exec_log(&self) -> Vec<(String, Vec<String>)> {
        self.lock().exec_log.clone()
    }

    /// How many times `create_container` succeeded for `name`.
    pub fn create_count(&self, name: &str) -> u32 {
        self.lock().creates.get(name).copied().unwrap_or(0)
    }

    pub fn container_spec(&self, name: &str) -> Option<ContainerSpec> {
        self.lock().containers.get(name).map(|c| c.spec.clone())
    }

    pub fn installed_packages(&self, container: &str) -> Vec<String> {
        self.lock()
            .containers
            .get(container)
            .map(|c| c.packages.clone())
            .unwrap_or_default()
    }

    pub fn repo(&self, container: &str, dir: &str) -> Option<MockRepo> {
        self.lock()
            .containers
            .get(container)
            .and_then(|c| c.repos.get(dir).cloned())
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.lock().images.contains(image)
    }
}

fn not_found(tool: &str, path: &str) -> ExecOutput {
    ExecOutput::failed(1, format!("{tool}: '{path}': No such file or directory"))
}

fn find(c: &MockContainer, dir: &str, kind: Option<&str>) -> ExecOutput {
    if !c.is_dir(dir) {
        return not_found("find", dir);
    }
    let mut out = String::new();
    for child in c.children(dir, kind) {
        out.push_str(&child);
        out.push('\n');
    }
    ExecOutput::ok(out)
}

fn simulate(state: &mut MockState, name: &str, argv: &[String]) -> ExecOutput {
    let remotes = state.remotes.clone();
    let Some(c) = state.containers.get_mut(name) else {
        return ExecOutput::failed(125, format!("No such container: {name}"));
    };
    let args: Vec<&str> = argv.iter().map(String::as_str).collect();
    match args.as_slice() {
        ["pip", "freeze"] => {
            let mut out = c.packages.join("\n");
            if !out.is_empty() {
                out.push('\n');
            }
            ExecOutput::ok(out)
        }
        ["pip", "install", "-r", manifest] => match c.file(manifest).cloned() {
            Some(content) => {
                c.install(&content);
                ExecOutput::ok("")
            }
            None => ExecOutput::failed(
                1,
                format!("ERROR: Could not open requirements file: {manifest}"),
            ),
        },
        ["find", dir, "-mindepth", "1", "-maxdepth", "1", "-xtype", kind, "-printf", _] => {
            find(c, dir, Some(*kind))
        }
        ["find", dir, "-mindepth", "1", "-maxdepth", "1", "-printf", _] => find(c, dir, None),
        ["test", "-d", path] => {
            if c.is_dir(path) {
                ExecOutput::ok("")
            } else {
                ExecOutput::failed(1, "")
            }
        }
        ["sha256sum", path] => match c.file(path) {
            Some(content) => {
                let hex = blake3::hash(content.as_bytes()).to_hex();
                ExecOutput::ok(format!("{hex}  {path}\n"))
            }
            None => not_found("sha256sum", path),
        },
        ["git", "-C", dir, "config", "--get", "remote.origin.url"] => match c.repo_mut(dir) {
            Some(repo) => ExecOutput::ok(format!("{}\n", repo.url)),
            None => ExecOutput::failed(1, ""),
        },
        ["git", "-C", dir, "rev-parse", "HEAD"] => match c.repo_mut(dir) {
            Some(repo) => ExecOutput::ok(format!("{}\n", repo.head)),
            None => ExecOutput::failed(128, "fatal: not a git repository"),
        },
        ["git", "clone", url, dir] => {
            if c.is_dir(dir) {
                return ExecOutput::failed(
                    128,
                    format!("fatal: destination path '{dir}' already exists and is not an empty directory."),
                );
            }
            let Some(commits) = remotes.get(*url) else {
                return ExecOutput::failed(128, format!("fatal: repository '{url}' not found"));
            };
            let head = commits.first().map_or(NULL_COMMIT, String::as_str);
            c.add_dir(&format!("{dir}/.git"));
            c.repos.insert(
                (*dir).to_owned(),
                MockRepo {
                    url: (*url).to_owned(),
                    head: head.to_owned(),
                    fetched: commits.iter().cloned().collect(),
                },
            );
            ExecOutput::ok("")
        }
        ["git", "-C", dir, "fetch", "--quiet", "origin"] => {
            let Some(repo) = c.repo_mut(dir) else {
                return ExecOutput::failed(128, "fatal: not a git repository");
            };
            match remotes.get(&repo.url) {
                Some(commits) => {
                    repo.fetched.extend(commits.iter().cloned());
                    ExecOutput::ok("")
                }
                None => ExecOutput::failed(
                    128,
                    format!("fatal: repository '{}' not found", repo.url),
                ),
            }
        }
        ["git", "-C", dir, "checkout", "--quiet", commit] => {
            let Some(repo) = c.repo_mut(dir) else {
                return ExecOutput::failed(128, "fatal: not a git repository");
            };
            if repo.fetched.contains(*commit) {
                (*commit).clone_into(&mut repo.head);
                ExecOutput::ok("")
            } else {
                ExecOutput::failed(
                    1,
                    format!("error: pathspec '{commit}' did not match any file(s) known to git"),
                )
            }
        }
        [program, ..] => ExecOutput::failed(127, format!("{program}: command not found")),
        [] => ExecOutput::failed(127, "empty command"),
    }
}

impl ContainerEngine for MockEngine {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn available(&self) -> bool {
        true
    }

    fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        Ok(self.lock().images.contains(image))
    }

    fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        if state.pull_failures.contains(image) {
            return Err(RuntimeError::ImagePull {
                image: image.to_owned(),
                reason: "mock registry refused the pull".to_owned(),
            });
        }
        state.images.insert(image.to_owned());
        self.save(&state)
    }

    fn container_state(&self, name: &str) -> Result<ContainerState, RuntimeError> {
        Ok(match self.lock().containers.get(name) {
            None => ContainerState::Absent,
            Some(c) if c.running => ContainerState::Running,
            Some(_) => ContainerState::Exited,
        })
    }

    fn create_container(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        let name = spec.name.as_str();
        if state.containers.contains_key(name) {
            return Err(RuntimeError::CommandFailed {
                command: format!("create --name {name}"),
                status_code: 125,
                stderr: format!("Conflict. The container name \"{name}\" is already in use"),
            });
        }
        if !state.images.contains(&spec.image) {
            return Err(RuntimeError::CommandFailed {
                command: format!("create --name {name}"),
                status_code: 125,
                stderr: format!("No such image: {}", spec.image),
            });
        }
        state
            .containers
            .insert(name.to_owned(), MockContainer::fresh(spec.clone()));
        *state.creates.entry(name.to_owned()).or_insert(0) += 1;
        self.save(&state)
    }

    fn start_container(&self, name: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        let c = state
            .containers
            .get_mut(name)
            .ok_or_else(|| RuntimeError::ContainerNotFound(name.to_owned()))?;
        c.running = true;
        self.save(&state)
    }

    fn stop_container(&self, name: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        let c = state
            .containers
            .get_mut(name)
            .ok_or_else(|| RuntimeError::ContainerNotFound(name.to_owned()))?;
        c.running = false;
        self.save(&state)
    }

    fn remove_container(&self, name: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        match state.containers.get(name) {
            None => return Err(RuntimeError::ContainerNotFound(name.to_owned())),
            Some(c) if c.running => {
                return Err(RuntimeError::CommandFailed {
                    command: format!("rm {name}"),
                    status_code: 1,
                    stderr: "cannot remove a running container".to_owned(),
                })
            }
            Some(_) => {}
        }
        state.containers.remove(name);
        self.save(&state)
    }

    fn exec(&self, name: &str, argv: &[String]) -> Result<ExecOutput, RuntimeError> {
        let mut state = self.lock();
        match state.containers.get(name) {
            None => return Err(RuntimeError::ContainerNotFound(name.to_owned())),
            Some(c) if !c.running => return Err(RuntimeError::NotRunning(name.to_owned())),
            Some(_) => {}
        }
        state.exec_log.push((name.to_owned(), argv.to_vec()));
        let scripted = state
            .scripts
            .iter()
            .rev()
            .find(|s| s.argv == argv)
            .map(|s| s.output.clone());
        let out = match scripted {
            Some(out) => out,
            None => simulate(&mut state, name, argv),
        };
        self.save(&state)?;
        Ok(out)
    }

    fn copy_into(
        &self,
        name: &str,
        host_path: &Path,
        container_path: &str,
    ) -> Result<(), RuntimeError> {
        let content = std::fs::read(host_path)?;
        let mut state = self.lock();
        let c = state
            .containers
            .get_mut(name)
            .ok_or_else(|| RuntimeError::ContainerNotFound(name.to_owned()))?;
        c.add_file(container_path, String::from_utf8_lossy(&content).into_owned());
        self.save(&state)
    }
}
