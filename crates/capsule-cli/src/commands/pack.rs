use super::{is_interactive, json_pretty, EXIT_SUCCESS};
use capsule_core::{CoreError, Orchestrator, PackResult};
use dialoguer::Select;
use std::path::Path;

pub fn run(
    orch: &Orchestrator,
    identifier: &str,
    workflow_file: Option<&str>,
    out: Option<&Path>,
    json: bool,
) -> Result<u8, String> {
    let result = match orch.pack(identifier, workflow_file, out) {
        Ok(r) => r,
        Err(CoreError::AmbiguousWorkflow { candidates }) if !json && is_interactive() => {
            let chosen = choose_workflow(&candidates)?;
            orch.pack(identifier, Some(chosen.as_str()), out)
                .map_err(|e| e.to_string())?
        }
        Err(e) => return Err(e.to_string()),
    };
    print_result(&result, json)?;
    Ok(EXIT_SUCCESS)
}

fn choose_workflow(candidates: &[String]) -> Result<String, String> {
    let idx = Select::new()
        .with_prompt("multiple workflow files found, choose the main one")
        .items(candidates)
        .default(0)
        .interact()
        .map_err(|e| format!("prompt failed: {e}"))?;
    candidates
        .get(idx)
        .cloned()
        .ok_or_else(|| "no workflow selected".to_owned())
}

fn print_result(result: &PackResult, json: bool) -> Result<(), String> {
    let d = &result.descriptor;
    if json {
        let payload = serde_json::json!({
            "path": result.path,
            "digest": result.digest,
            "base_image": d.base_image,
            "workflow_file": d.workflow_file,
            "dependencies": d.dependencies.len(),
            "plugins": d.plugins.len(),
            "models": d.models.len(),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("descriptor written to {}", result.path.display());
        println!("digest:       {}", result.digest);
        println!("workflow:     {}", d.workflow_file);
        println!("dependencies: {}", d.dependencies.len());
        println!(
            "plugins:      {} ({} versioned)",
            d.plugins.len(),
            d.plugins.iter().filter(|p| p.is_versioned()).count()
        );
        println!("models:       {}", d.models.len());
    }
    Ok(())
}
