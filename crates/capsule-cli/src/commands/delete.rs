use super::{json_pretty, EXIT_SUCCESS};
use capsule_core::Orchestrator;

pub fn run(orch: &Orchestrator, identifier: &str, json: bool) -> Result<u8, String> {
    let record = orch.delete(identifier).map_err(|e| e.to_string())?;
    if json {
        let payload = serde_json::json!({
            "env_id": record.id,
            "name": record.name,
            "status": "deleted",
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("deleted environment '{}' ({})", record.name, record.id);
    }
    Ok(EXIT_SUCCESS)
}
