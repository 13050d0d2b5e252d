use crate::engine::{ContainerEngine, ContainerSpec, ContainerState, ExecOutput};
use crate::RuntimeError;
use std::io;
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Engine driven through a docker-compatible command line (`docker` or `podman`).
pub struct CliEngine {
    binary: String,
}

impl CliEngine {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn docker() -> Self {
        Self::new("docker")
    }

    pub fn podman() -> Self {
        Self::new("podman")
    }

    fn render(&self, args: &[String]) -> String {
        let mut parts = Vec::with_capacity(args.len() + 1);
        parts.push(self.binary.clone());
        parts.extend(args.iter().cloned());
        parts.join(" ")
    }

    fn run(&self, args: &[String]) -> Result<ExecOutput, RuntimeError> {
        debug!("{}", self.render(args));
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    RuntimeError::EngineUnavailable(self.binary.clone())
                } else {
                    RuntimeError::Io(e)
                }
            })?;
        let status_code = output
            .status
            .code()
            .unwrap_or(if output.status.success() { 0 } else { 1 });
        Ok(ExecOutput {
            status_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }

    /// The engine's status string for `name`, or `None` when it does not exist.
    fn raw_status(&self, name: &str) -> Result<Option<String>, RuntimeError> {
        let out = self.run(&args(&[
            "container",
            "inspect",
            "--format",
            "{{.State.Status}}",
            name,
        ]))?;
        if out.success() {
            Ok(Some(out.stdout))
        } else if is_missing_object(&out.stderr) {
            Ok(None)
        } else {
            Err(RuntimeError::CommandFailed {
                command: format!("{} container inspect {name}", self.binary),
                status_code: out.status_code,
                stderr: out.stderr,
            })
        }
    }

    fn run_checked(&self, args: &[String]) -> Result<ExecOutput, RuntimeError> {
        let out = self.run(args)?;
        if out.success() {
            Ok(out)
        } else {
            Err(RuntimeError::CommandFailed {
                command: self.render(args),
                status_code: out.status_code,
                stderr: out.stderr,
            })
        }
    }
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| (*s).to_owned()).collect()
}

/// Translate a container spec into `create` arguments.
pub fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut out = args(&["create", "--name", spec.name.as_str()]);
    for port in &spec.ports {
        out.push("-p".to_owned());
        out.push(format!("{}:{}/tcp", port.host, port.container));
    }
    for mount in &spec.mounts {
        out.push("-v".to_owned());
        out.push(format!("{}:{}:rw", mount.host_path, mount.container_path));
    }
    if let Some(runtime) = &spec.runtime {
        out.push("--runtime".to_owned());
        out.push(runtime.clone());
    }
    out.push(spec.image.clone());
    out.extend(spec.command.iter().cloned());
    out
}

/// Map `inspect --format {{.State.Status}}` output onto the three-state model.
/// A paused container is not serving, so it counts as exited.
fn parse_state(status: &str) -> ContainerState {
    match status.trim() {
        "running" | "restarting" => ContainerState::Running,
        _ => ContainerState::Exited,
    }
}

/// `start` refuses a paused container; it has to be unpaused instead.
fn start_args(name: &str, status: &str) -> Vec<String> {
    if status.trim() == "paused" {
        args(&["unpause", name])
    } else {
        args(&["start", name])
    }
}

/// `rm` refuses a paused container without `--force`.
fn remove_args(name: &str, status: &str) -> Vec<String> {
    if status.trim() == "paused" {
        args(&["rm", "--force", name])
    } else {
        args(&["rm", name])
    }
}

fn is_missing_object(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("no such") || lower.contains("not found") || lower.contains("does not exist")
}

impl ContainerEngine for CliEngine {
    fn name(&self) -> &str {
        &self.binary
    }

    fn available(&self) -> bool {
        self.run(&args(&["version"]))
            .map(|o| o.success())
            .unwrap_or(false)
    }

    fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        Ok(self.run(&args(&["image", "inspect", image]))?.success())
    }

    fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        let out = self.run(&args(&["pull", image]))?;
        if out.success() {
            Ok(())
        } else {
            Err(RuntimeError::ImagePull {
                image: image.to_owned(),
                reason: out.stderr,
            })
        }
    }

    fn container_state(&self, name: &str) -> Result<ContainerState, RuntimeError> {
        Ok(self
            .raw_status(name)?
            .map_or(ContainerState::Absent, |s| parse_state(&s)))
    }

    fn create_container(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        self.run_checked(&create_args(spec))?;
        Ok(())
    }

    fn start_container(&self, name: &str) -> Result<(), RuntimeError> {
        let status = self
            .raw_status(name)?
            .ok_or_else(|| RuntimeError::ContainerNotFound(name.to_owned()))?;
        if status.trim() == "paused" {
            debug!("{name} is paused, unpausing");
        }
        self.run_checked(&start_args(name, &status))?;
        Ok(())
    }

    fn stop_container(&self, name: &str) -> Result<(), RuntimeError> {
        self.run_checked(&args(&["stop", name]))?;
        Ok(())
    }

    fn remove_container(&self, name: &str) -> Result<(), RuntimeError> {
        let status = self
            .raw_status(name)?
            .ok_or_else(|| RuntimeError::ContainerNotFound(name.to_owned()))?;
        self.run_checked(&remove_args(name, &status))?;
        Ok(())
    }

    fn exec(&self, name: &str, argv: &[String]) -> Result<ExecOutput, RuntimeError> {
        let mut full = args(&["exec", name]);
        full.extend(argv.iter().cloned());
        self.run(&full)
    }

    fn copy_into(
        &self,
        name: &str,
        host_path: &Path,
        container_path: &str,
    ) -> Result<(), RuntimeError> {
        self.run_checked(&[
            "cp".to_owned(),
            host_path.to_string_lossy().into_owned(),
            format!("{name}:{container_path}"),
        ])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{BindMount, PortBinding};
    use capsule_schema::ContainerName;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            name: ContainerName::new("capsule-0a1b2c3d"),
            image: "example/app:1.0".to_owned(),
            command: vec!["--fast".to_owned()],
            mounts: vec![BindMount {
                host_path: "/data/models".to_owned(),
                container_path: "/comfyui/models".to_owned(),
            }],
            ports: vec![PortBinding {
                host: 9000,
                container: 8188,
            }],
            runtime: Some("nvidia".to_owned()),
        }
    }

    #[test]
    fn create_args_layout() {
        let a = create_args(&spec());
        assert_eq!(
            a,
            vec![
                "create",
                "--name",
                "capsule-0a1b2c3d",
                "-p",
                "9000:8188/tcp",
                "-v",
                "/data/models:/comfyui/models:rw",
                "--runtime",
                "nvidia",
                "example/app:1.0",
                "--fast",
            ]
        );
    }

    #[test]
    fn create_args_without_runtime() {
        let mut s = spec();
        s.runtime = None;
        assert!(!create_args(&s).contains(&"--runtime".to_owned()));
    }

    #[test]
    fn state_mapping() {
        assert_eq!(parse_state("running\n"), ContainerState::Running);
        assert_eq!(parse_state("exited"), ContainerState::Exited);
        assert_eq!(parse_state("created"), ContainerState::Exited);
        assert_eq!(parse_state("paused"), ContainerState::Exited);
    }

    #[test]
    fn paused_container_is_unpaused_not_started() {
        assert_eq!(start_args("c1", "paused\n"), vec!["unpause", "c1"]);
        assert_eq!(start_args("c1", "exited"), vec!["start", "c1"]);
        assert_eq!(start_args("c1", "created"), vec!["start", "c1"]);
        assert_eq!(remove_args("c1", "paused"), vec!["rm", "--force", "c1"]);
        assert_eq!(remove_args("c1", "exited"), vec!["rm", "c1"]);
    }

    #[test]
    fn missing_object_detection() {
        assert!(is_missing_object("Error: No such container: foo"));
        assert!(is_missing_object("Error: no container with name or ID \"x\" found: no such container"));
        assert!(!is_missing_object("Cannot connect to the Docker daemon"));
    }

    #[test]
    fn missing_binary_is_unavailable() {
        let engine = CliEngine::new("capsule-test-no-such-binary");
        assert!(!engine.available());
        assert!(matches!(
            engine.image_exists("x"),
            Err(RuntimeError::EngineUnavailable(_))
        ));
    }
}
