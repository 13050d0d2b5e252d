use std::fmt;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: String,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check the host tools needed to drive `engine`.
/// Returns the missing items; an empty list means all prerequisites are met.
pub fn check_engine_prereqs(engine: &str) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();
    match engine {
        "mock" => {}
        "podman" => {
            if !command_exists("podman") {
                missing.push(MissingPrereq {
                    name: "podman".to_owned(),
                    purpose: "running environment containers",
                    install_hint: "zypper install podman | apt install podman | dnf install podman | pacman -S podman",
                });
            }
        }
        other => {
            if !command_exists(other) {
                missing.push(MissingPrereq {
                    name: other.to_owned(),
                    purpose: "running environment containers",
                    install_hint: "https://docs.docker.com/engine/install/",
                });
            }
        }
    }
    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str(
        "\nCapsule drives an existing container engine; set `engine` in config.toml to choose one.",
    );
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_prereq_display() {
        let m = MissingPrereq {
            name: "docker".to_owned(),
            purpose: "running containers",
            install_hint: "apt install docker.io",
        };
        let s = format!("{m}");
        assert!(s.contains("docker"));
        assert!(s.contains("running containers"));
        assert!(s.contains("apt install docker.io"));
    }

    #[test]
    fn mock_engine_has_no_prereqs() {
        assert!(check_engine_prereqs("mock").is_empty());
    }

    #[test]
    fn unknown_binary_is_reported() {
        let missing = check_engine_prereqs("capsule-test-no-such-engine");
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].name, "capsule-test-no-such-engine");
    }

    #[test]
    fn format_missing_produces_readable_output() {
        let items = vec![MissingPrereq {
            name: "podman".to_owned(),
            purpose: "containers",
            install_hint: "apt install podman",
        }];
        let output = format_missing(&items);
        assert!(output.contains("missing prerequisites:"));
        assert!(output.contains("podman"));
    }
}
