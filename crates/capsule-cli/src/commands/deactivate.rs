use super::{json_pretty, EXIT_SUCCESS};
use capsule_core::Orchestrator;
use capsule_runtime::ContainerState;

pub fn run(orch: &Orchestrator, identifier: &str, json: bool) -> Result<u8, String> {
    let (record, before) = orch.deactivate(identifier).map_err(|e| e.to_string())?;
    if json {
        let payload = serde_json::json!({
            "env_id": record.id,
            "name": record.name,
            "status": record.status,
            "was": before,
        });
        println!("{}", json_pretty(&payload)?);
    } else if before == ContainerState::Running {
        println!("stopped container {}", record.container_name);
    } else {
        println!("environment '{}' is not running", record.name);
    }
    Ok(EXIT_SUCCESS)
}
