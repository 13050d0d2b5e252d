use super::{colorize_status, json_pretty, EXIT_SUCCESS};
use capsule_core::Orchestrator;

pub fn run(orch: &Orchestrator, json: bool) -> Result<u8, String> {
    let records = orch.list().map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&records)?);
    } else if records.is_empty() {
        println!("no environments found");
    } else {
        for record in &records {
            let status = record.status.to_string();
            let tag = colorize_status(&status, &format!("[{}]", status.to_uppercase()));
            println!("{tag} {} (ID: {})", record.name, record.id);
        }
    }
    Ok(EXIT_SUCCESS)
}
