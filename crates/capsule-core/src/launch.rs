use capsule_runtime::{BindMount, ContainerSpec, PortBinding};
use capsule_schema::{GlobalConfig, APP_PORT};
use capsule_store::EnvironmentRecord;

/// Container spec for `record` running `image`, with every logical mount
/// resolved against the global defaults.
pub fn container_spec(
    record: &EnvironmentRecord,
    image: &str,
    config: &GlobalConfig,
) -> ContainerSpec {
    let mounts = record
        .mount_config
        .resolve(config)
        .into_iter()
        .map(|(key, host_path)| BindMount {
            host_path,
            container_path: key.container_path().to_owned(),
        })
        .collect();
    ContainerSpec {
        name: record.container_name.clone(),
        image: image.to_owned(),
        command: record.command.clone(),
        mounts,
        ports: vec![PortBinding {
            host: record.options.port,
            container: APP_PORT,
        }],
        runtime: record.options.runtime.clone(),
    }
}
