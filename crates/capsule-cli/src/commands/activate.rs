use super::{json_pretty, maybe_spinner, spin_fail, spin_ok, EXIT_SUCCESS};
use capsule_core::Orchestrator;
use capsule_runtime::Transition;

pub fn run(orch: &Orchestrator, identifier: &str, json: bool) -> Result<u8, String> {
    let pb = maybe_spinner(json, &format!("activating {identifier}..."));
    let activation = match orch.activate(identifier) {
        Ok(a) => a,
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "activation failed");
            }
            return Err(e.to_string());
        }
    };
    let record = &activation.record;
    let what = match activation.transition {
        Transition::Created => format!("created and started container {}", record.container_name),
        Transition::Started => format!("started existing container {}", record.container_name),
        Transition::AlreadyRunning => format!("environment '{}' is already running", record.name),
    };
    if let Some(ref pb) = pb {
        spin_ok(pb, &what);
    }

    if json {
        let payload = serde_json::json!({
            "env_id": record.id,
            "name": record.name,
            "container": record.container_name,
            "status": record.status,
            "port": record.options.port,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "environment '{}' is running on port {}",
            record.name, record.options.port
        );
    }
    Ok(EXIT_SUCCESS)
}
