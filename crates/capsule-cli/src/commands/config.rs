use super::{json_pretty, EXIT_SUCCESS};
use capsule_core::Orchestrator;

pub fn run(orch: &Orchestrator, json: bool) -> Result<u8, String> {
    let config = orch.config();
    if json {
        println!("{}", json_pretty(config)?);
    } else {
        println!("# {}", orch.layout().config_file().display());
        print!("{}", config.to_toml().map_err(|e| e.to_string())?);
    }
    Ok(EXIT_SUCCESS)
}
