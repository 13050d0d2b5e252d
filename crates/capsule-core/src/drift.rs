use capsule_runtime::ContainerState;
use capsule_store::{EnvStatus, EnvironmentRecord};
use serde::Serialize;

/// One environment as reported by `status`, with the engine's view next to
/// the cached one.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub id: String,
    pub name: String,
    pub status: EnvStatus,
    pub container: String,
    pub image: String,
    pub created_at: String,
    /// `None` when the engine could not be queried.
    pub live: Option<ContainerState>,
    pub drift: bool,
}

impl StatusReport {
    pub fn new(record: &EnvironmentRecord, live: Option<ContainerState>) -> Self {
        Self {
            id: record.id.to_string(),
            name: record.name.clone(),
            status: record.status,
            container: record.container_name.to_string(),
            image: record.image.clone(),
            created_at: record.created_at_display(),
            drift: live.is_some_and(|state| status_drift(record.status, state)),
            live,
        }
    }
}

/// Whether the cached registry status disagrees with the live container state.
///
/// A missing container counts as `exited`, so only a cached `running` over an
/// absent container is flagged for it.
pub fn status_drift(cached: EnvStatus, live: ContainerState) -> bool {
    match (cached, live) {
        (EnvStatus::Running, ContainerState::Running) => false,
        (EnvStatus::Running, _) => true,
        (EnvStatus::Exited, ContainerState::Running) => true,
        (EnvStatus::Exited, _) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsule_schema::{ContainerName, EnvId};
    use capsule_store::{LaunchOptions, MountConfig};

    #[test]
    fn drift_table() {
        assert!(!status_drift(EnvStatus::Running, ContainerState::Running));
        assert!(status_drift(EnvStatus::Running, ContainerState::Exited));
        assert!(status_drift(EnvStatus::Running, ContainerState::Absent));
        assert!(status_drift(EnvStatus::Exited, ContainerState::Running));
        assert!(!status_drift(EnvStatus::Exited, ContainerState::Exited));
        assert!(!status_drift(EnvStatus::Exited, ContainerState::Absent));
    }

    #[test]
    fn report_without_live_state_has_no_drift() {
        let record = EnvironmentRecord {
            id: EnvId::new("capsule-0000000c"),
            name: "envC".to_owned(),
            description: String::new(),
            image: "img:1".to_owned(),
            status: EnvStatus::Running,
            mount_config: MountConfig::default(),
            command: Vec::new(),
            options: LaunchOptions {
                port: 8188,
                runtime: None,
            },
            container_name: ContainerName::new("capsule-0000000c"),
            created_at: "not a timestamp".to_owned(),
        };
        let report = StatusReport::new(&record, None);
        assert!(!report.drift);
        assert_eq!(report.created_at, "not a timestamp");

        let report = StatusReport::new(&record, Some(ContainerState::Absent));
        assert!(report.drift);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["live"], "absent");
        assert_eq!(json["status"], "running");
    }
}
