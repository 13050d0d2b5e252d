use crate::engine::{ContainerEngine, ContainerSpec, ContainerState};
use crate::RuntimeError;
use capsule_schema::ContainerName;
use tracing::{debug, info};

/// Which transition `ensure_running` performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// `absent -> exited -> running`.
    Created,
    /// `exited -> running`, reusing the container by name.
    Started,
    AlreadyRunning,
}

/// A container verified to be running after `ensure_running`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub name: ContainerName,
    pub transition: Transition,
}

/// Idempotent state machine over a container engine.
///
/// Every operation reads the live state from the engine first, so a stale
/// cached status can never turn a no-op into an error.
pub struct LifecycleManager<'a> {
    engine: &'a dyn ContainerEngine,
}

impl<'a> LifecycleManager<'a> {
    pub fn new(engine: &'a dyn ContainerEngine) -> Self {
        Self { engine }
    }

    pub fn state(&self, name: &str) -> Result<ContainerState, RuntimeError> {
        self.engine.container_state(name)
    }

    /// Pull `image` unless it is already in the local cache. Not retried.
    pub fn ensure_image_present(&self, image: &str) -> Result<(), RuntimeError> {
        if self.engine.image_exists(image)? {
            debug!("image {image} present locally");
            return Ok(());
        }
        info!("pulling image {image}");
        self.engine.pull_image(image)
    }

    /// `absent --create--> exited`, optionally followed by a start.
    ///
    /// An existing container of the same name is reused: started if `start`
    /// is requested, otherwise left as is.
    pub fn create(&self, spec: &ContainerSpec, start: bool) -> Result<Transition, RuntimeError> {
        match self.state(&spec.name)? {
            ContainerState::Absent => {
                info!("creating container {}", spec.name);
                self.engine.create_container(spec)?;
                if start {
                    self.engine.start_container(&spec.name)?;
                }
                Ok(Transition::Created)
            }
            ContainerState::Exited => {
                if start {
                    info!("starting existing container {}", spec.name);
                    self.engine.start_container(&spec.name)?;
                }
                Ok(Transition::Started)
            }
            ContainerState::Running => Ok(Transition::AlreadyRunning),
        }
    }

    /// Drive the container to `running` from whatever state it is in, then
    /// confirm the engine agrees.
    pub fn ensure_running(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError> {
        let transition = self.create(spec, true)?;
        let observed = self.state(&spec.name)?;
        if observed != ContainerState::Running {
            return Err(RuntimeError::StartFailed {
                name: spec.name.to_string(),
                observed,
            });
        }
        debug!("container {} running ({transition:?})", spec.name);
        Ok(ContainerHandle {
            name: spec.name.clone(),
            transition,
        })
    }

    /// `exited --start--> running`; a running container is a no-op.
    pub fn start(&self, name: &str) -> Result<(), RuntimeError> {
        match self.state(name)? {
            ContainerState::Absent => Err(RuntimeError::ContainerNotFound(name.to_owned())),
            ContainerState::Exited => self.engine.start_container(name),
            ContainerState::Running => Ok(()),
        }
    }

    /// `running --stop--> exited`; exited or absent is a no-op.
    pub fn stop(&self, name: &str) -> Result<(), RuntimeError> {
        match self.state(name)? {
            ContainerState::Running => {
                info!("stopping container {name}");
                self.engine.stop_container(name)
            }
            ContainerState::Exited | ContainerState::Absent => {
                debug!("container {name} not running, nothing to stop");
                Ok(())
            }
        }
    }

    /// `running|exited --remove--> absent`; absent is a no-op.
    pub fn remove(&self, name: &str) -> Result<(), RuntimeError> {
        match self.state(name)? {
            ContainerState::Absent => {
                debug!("container {name} already absent");
                Ok(())
            }
            ContainerState::Running => {
                self.engine.stop_container(name)?;
                info!("removing container {name}");
                self.engine.remove_container(name)
            }
            ContainerState::Exited => {
                info!("removing container {name}");
                self.engine.remove_container(name)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEngine;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            name: ContainerName::new("capsule-00000001"),
            image: "img".to_owned(),
            command: Vec::new(),
            mounts: Vec::new(),
            ports: Vec::new(),
            runtime: None,
        }
    }

    #[test]
    fn ensure_image_pulls_only_when_missing() {
        let engine = MockEngine::new();
        let lm = LifecycleManager::new(&engine);
        lm.ensure_image_present("img").unwrap();
        assert!(engine.has_image("img"));

        engine.fail_pull("img");
        // Already cached, so the failing registry is never contacted.
        lm.ensure_image_present("img").unwrap();
    }

    #[test]
    fn ensure_image_surfaces_pull_error() {
        let engine = MockEngine::new();
        engine.fail_pull("img");
        let lm = LifecycleManager::new(&engine);
        assert!(matches!(
            lm.ensure_image_present("img"),
            Err(RuntimeError::ImagePull { .. })
        ));
    }

    #[test]
    fn ensure_running_is_idempotent() {
        let engine = MockEngine::new();
        engine.add_image("img");
        let lm = LifecycleManager::new(&engine);

        let first = lm.ensure_running(&spec()).unwrap();
        assert_eq!(first.transition, Transition::Created);
        let second = lm.ensure_running(&spec()).unwrap();
        assert_eq!(second.transition, Transition::AlreadyRunning);

        assert_eq!(lm.state("capsule-00000001").unwrap(), ContainerState::Running);
        assert_eq!(engine.create_count("capsule-00000001"), 1);
    }

    #[test]
    fn ensure_running_reuses_exited_container() {
        let engine = MockEngine::new();
        engine.seed_container("capsule-00000001", "img", false);
        let lm = LifecycleManager::new(&engine);
        let handle = lm.ensure_running(&spec()).unwrap();
        assert_eq!(handle.transition, Transition::Started);
        assert_eq!(engine.create_count("capsule-00000001"), 0);
    }

    #[test]
    fn create_without_start_leaves_exited() {
        let engine = MockEngine::new();
        engine.add_image("img");
        let lm = LifecycleManager::new(&engine);
        assert_eq!(lm.create(&spec(), false).unwrap(), Transition::Created);
        assert_eq!(lm.state("capsule-00000001").unwrap(), ContainerState::Exited);
    }

    #[test]
    fn stop_and_remove_tolerate_absent() {
        let engine = MockEngine::new();
        let lm = LifecycleManager::new(&engine);
        lm.stop("ghost").unwrap();
        lm.remove("ghost").unwrap();
    }

    #[test]
    fn remove_stops_running_container_first() {
        let engine = MockEngine::new();
        engine.seed_container("c", "img", true);
        let lm = LifecycleManager::new(&engine);
        lm.remove("c").unwrap();
        assert_eq!(lm.state("c").unwrap(), ContainerState::Absent);
    }

    #[test]
    fn start_absent_is_not_found() {
        let engine = MockEngine::new();
        let lm = LifecycleManager::new(&engine);
        assert!(matches!(
            lm.start("ghost"),
            Err(RuntimeError::ContainerNotFound(_))
        ));
        engine.seed_container("c", "img", true);
        lm.start("c").unwrap();
    }
}
