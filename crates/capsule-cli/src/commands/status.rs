use super::{colorize_status, json_pretty, EXIT_SUCCESS};
use capsule_core::Orchestrator;

pub fn run(orch: &Orchestrator, json: bool) -> Result<u8, String> {
    let reports = orch.status().map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&reports)?);
        return Ok(EXIT_SUCCESS);
    }
    if reports.is_empty() {
        println!("no environments found");
        return Ok(EXIT_SUCCESS);
    }
    for r in &reports {
        let cached = r.status.to_string();
        let live = r
            .live
            .map_or_else(|| "unknown".to_owned(), |state| state.to_string());
        println!("name:       {}", r.name);
        println!("id:         {}", r.id);
        println!("status:     {}", colorize_status(&cached, &cached));
        println!("container:  {} ({})", r.container, colorize_status(&live, &live));
        println!("image:      {}", r.image);
        println!("created_at: {}", r.created_at);
        if r.drift {
            println!("drift:      registry says {cached}, engine says {live}");
        }
        println!();
    }
    Ok(EXIT_SUCCESS)
}
