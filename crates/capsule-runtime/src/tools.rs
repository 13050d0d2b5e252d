//! Typed wrappers over the tools invoked inside a container: the package
//! manager, git, coreutils hashing and directory listing.
//!
//! Every wrapper builds an argv, runs it through `ContainerEngine::exec`, and
//! feeds stdout to the matching parser in `crate::parse`.

use crate::engine::{ContainerEngine, ExecOutput};
use crate::parse;
use crate::RuntimeError;
use capsule_schema::ContentHash;

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| (*s).to_owned()).collect()
}

pub fn freeze_cmd() -> Vec<String> {
    argv(&["pip", "freeze"])
}

pub fn install_requirements_cmd(manifest: &str) -> Vec<String> {
    argv(&["pip", "install", "-r", manifest])
}

/// Immediate children of `dir` whose type is `kind` (`d` or `f`) after
/// following symlinks, one bare name per line.
pub fn list_cmd(dir: &str, kind: &str) -> Vec<String> {
    argv(&[
        "find", dir, "-mindepth", "1", "-maxdepth", "1", "-xtype", kind, "-printf", "%f\\n",
    ])
}

/// Every immediate child of `dir` regardless of type.
pub fn list_entries_cmd(dir: &str) -> Vec<String> {
    argv(&[
        "find", dir, "-mindepth", "1", "-maxdepth", "1", "-printf", "%f\\n",
    ])
}

pub fn test_dir_cmd(path: &str) -> Vec<String> {
    argv(&["test", "-d", path])
}

pub fn sha256_cmd(path: &str) -> Vec<String> {
    argv(&["sha256sum", path])
}

pub fn git_remote_url_cmd(dir: &str) -> Vec<String> {
    argv(&["git", "-C", dir, "config", "--get", "remote.origin.url"])
}

pub fn git_head_cmd(dir: &str) -> Vec<String> {
    argv(&["git", "-C", dir, "rev-parse", "HEAD"])
}

pub fn git_clone_cmd(url: &str, dir: &str) -> Vec<String> {
    argv(&["git", "clone", url, dir])
}

pub fn git_fetch_cmd(dir: &str) -> Vec<String> {
    argv(&["git", "-C", dir, "fetch", "--quiet", "origin"])
}

pub fn git_checkout_cmd(dir: &str, commit: &str) -> Vec<String> {
    argv(&["git", "-C", dir, "checkout", "--quiet", commit])
}

pub fn python_version_cmd() -> Vec<String> {
    argv(&["python", "--version"])
}

pub fn cuda_version_cmd() -> Vec<String> {
    argv(&["printenv", "CUDA_VERSION"])
}

/// Tool access scoped to one running container.
pub struct ContainerTools<'a> {
    engine: &'a dyn ContainerEngine,
    container: &'a str,
}

impl<'a> ContainerTools<'a> {
    pub fn new(engine: &'a dyn ContainerEngine, container: &'a str) -> Self {
        Self { engine, container }
    }

    pub fn container(&self) -> &str {
        self.container
    }

    fn exec(&self, cmd: &[String]) -> Result<ExecOutput, RuntimeError> {
        self.engine.exec(self.container, cmd)
    }

    /// Run `cmd` and return stdout, or `CommandFailed` on a non-zero exit.
    fn checked(&self, cmd: &[String]) -> Result<String, RuntimeError> {
        let out = self.exec(cmd)?;
        if out.success() {
            Ok(out.stdout)
        } else {
            Err(RuntimeError::CommandFailed {
                command: cmd.join(" "),
                status_code: out.status_code,
                stderr: out.stderr.trim().to_owned(),
            })
        }
    }

    pub fn freeze(&self) -> Result<Vec<String>, RuntimeError> {
        Ok(parse::parse_freeze(&self.checked(&freeze_cmd())?))
    }

    pub fn install_requirements(&self, manifest: &str) -> Result<(), RuntimeError> {
        self.checked(&install_requirements_cmd(manifest))?;
        Ok(())
    }

    pub fn list_dirs(&self, dir: &str) -> Result<Vec<String>, RuntimeError> {
        Ok(parse::parse_listing(&self.checked(&list_cmd(dir, "d"))?)?)
    }

    pub fn list_files(&self, dir: &str) -> Result<Vec<String>, RuntimeError> {
        Ok(parse::parse_listing(&self.checked(&list_cmd(dir, "f"))?)?)
    }

    pub fn list_entries(&self, dir: &str) -> Result<Vec<String>, RuntimeError> {
        Ok(parse::parse_listing(&self.checked(&list_entries_cmd(dir))?)?)
    }

    /// `test -d`: exit 0 is present, exit 1 is absent, anything else is a failure.
    pub fn is_dir(&self, path: &str) -> Result<bool, RuntimeError> {
        let cmd = test_dir_cmd(path);
        let out = self.exec(&cmd)?;
        match out.status_code {
            0 => Ok(true),
            1 => Ok(false),
            code => Err(RuntimeError::CommandFailed {
                command: cmd.join(" "),
                status_code: code,
                stderr: out.stderr,
            }),
        }
    }

    pub fn sha256(&self, path: &str) -> Result<ContentHash, RuntimeError> {
        Ok(parse::parse_sha256sum(&self.checked(&sha256_cmd(path))?)?)
    }

    pub fn git_remote_url(&self, dir: &str) -> Result<String, RuntimeError> {
        Ok(parse::parse_remote_url(
            &self.checked(&git_remote_url_cmd(dir))?,
        )?)
    }

    pub fn git_head(&self, dir: &str) -> Result<String, RuntimeError> {
        Ok(parse::parse_commit(&self.checked(&git_head_cmd(dir))?)?)
    }

    pub fn git_clone(&self, url: &str, dir: &str) -> Result<(), RuntimeError> {
        self.checked(&git_clone_cmd(url, dir))?;
        Ok(())
    }

    /// Bring the checkout's object store up to date with `origin`.
    pub fn git_fetch(&self, dir: &str) -> Result<(), RuntimeError> {
        self.checked(&git_fetch_cmd(dir))?;
        Ok(())
    }

    pub fn git_checkout(&self, dir: &str, commit: &str) -> Result<(), RuntimeError> {
        self.checked(&git_checkout_cmd(dir, commit))?;
        Ok(())
    }

    pub fn python_version(&self) -> Result<String, RuntimeError> {
        let out = self.exec(&python_version_cmd())?;
        if !out.success() {
            return Err(RuntimeError::CommandFailed {
                command: python_version_cmd().join(" "),
                status_code: out.status_code,
                stderr: out.stderr,
            });
        }
        // Python 2 printed its version to stderr.
        let text = if out.stdout.trim().is_empty() {
            &out.stderr
        } else {
            &out.stdout
        };
        Ok(parse::parse_python_version(text)?)
    }

    pub fn cuda_version(&self) -> Result<String, RuntimeError> {
        Ok(parse::parse_dotted_version(
            &self.checked(&cuda_version_cmd())?,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEngine;

    fn running(engine: &MockEngine) -> &'static str {
        engine.seed_container("c1", "img", true);
        "c1"
    }

    #[test]
    fn freeze_nonzero_exit_is_command_failed() {
        let engine = MockEngine::new();
        let name = running(&engine);
        engine.script(&freeze_cmd(), ExecOutput::failed(2, "pip: not found"));
        let tools = ContainerTools::new(&engine, name);
        match tools.freeze() {
            Err(RuntimeError::CommandFailed {
                status_code,
                stderr,
                ..
            }) => {
                assert_eq!(status_code, 2);
                assert_eq!(stderr, "pip: not found");
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[test]
    fn is_dir_maps_exit_codes() {
        let engine = MockEngine::new();
        let name = running(&engine);
        engine.add_dir(name, "/comfyui/custom_nodes/a/.git");
        let tools = ContainerTools::new(&engine, name);
        assert!(tools.is_dir("/comfyui/custom_nodes/a/.git").unwrap());
        assert!(!tools.is_dir("/comfyui/custom_nodes/b/.git").unwrap());

        engine.script(&test_dir_cmd("/weird"), ExecOutput::failed(2, "test: bad"));
        assert!(tools.is_dir("/weird").is_err());
    }

    #[test]
    fn listings_split_dirs_and_files() {
        let engine = MockEngine::new();
        let name = running(&engine);
        engine.add_file(name, "/comfyui/models/checkpoints/a.safetensors", b"a");
        engine.add_file(name, "/comfyui/models/readme.txt", b"r");
        engine.add_dir(name, "/comfyui/models/loras");
        let tools = ContainerTools::new(&engine, name);
        assert_eq!(
            tools.list_dirs("/comfyui/models").unwrap(),
            vec!["checkpoints", "loras"]
        );
        assert_eq!(tools.list_files("/comfyui/models").unwrap(), vec!["readme.txt"]);
        assert!(tools.list_files("/missing").is_err());
    }

    #[test]
    fn entry_listing_includes_files_dirs_and_links() {
        let engine = MockEngine::new();
        let name = running(&engine);
        engine.add_dir(name, "/comfyui/custom_nodes/node-pack");
        engine.add_file(name, "/comfyui/custom_nodes/websocket_image_save.py", b"#");
        engine.add_dir(name, "/srv/shared-node");
        engine.add_symlink(name, "/comfyui/custom_nodes/shared-node", "/srv/shared-node");
        let tools = ContainerTools::new(&engine, name);
        assert_eq!(
            tools.list_entries("/comfyui/custom_nodes").unwrap(),
            vec!["node-pack", "shared-node", "websocket_image_save.py"]
        );
        assert_eq!(
            tools.list_dirs("/comfyui/custom_nodes").unwrap(),
            vec!["node-pack", "shared-node"]
        );
    }

    #[test]
    fn python_version_reads_stderr_fallback() {
        let engine = MockEngine::new();
        let name = running(&engine);
        engine.script(
            &python_version_cmd(),
            ExecOutput {
                status_code: 0,
                stdout: String::new(),
                stderr: "Python 2.7.18\n".to_owned(),
            },
        );
        let tools = ContainerTools::new(&engine, name);
        assert_eq!(tools.python_version().unwrap(), "2.7.18");
    }
}
