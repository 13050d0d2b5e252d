use super::{is_interactive, json_pretty, EXIT_SUCCESS};
use capsule_core::{CreateOptions, Orchestrator, DEFAULT_WORKFLOW_FILE};
use dialoguer::Input;

pub fn run(orch: &Orchestrator, mut opts: CreateOptions, json: bool) -> Result<u8, String> {
    if opts.workflow_file.is_none() && !json && is_interactive() {
        let chosen: String = Input::new()
            .with_prompt("main workflow file")
            .default(DEFAULT_WORKFLOW_FILE.to_owned())
            .interact_text()
            .map_err(|e| format!("prompt failed: {e}"))?;
        opts.workflow_file = Some(chosen);
    }

    let record = orch.create(&opts).map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&record)?);
    } else {
        println!(
            "created environment '{}' with ID '{}'",
            record.name, record.id
        );
        println!(
            "descriptor: {}",
            orch.layout().descriptor_path(&record.id).display()
        );
    }
    Ok(EXIT_SUCCESS)
}
