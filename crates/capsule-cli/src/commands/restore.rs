use super::{json_pretty, maybe_spinner, spin_fail, spin_ok, EXIT_FAILURE, EXIT_SUCCESS};
use capsule_core::{Orchestrator, RestoreOutcome};
use std::path::Path;

pub fn run(
    orch: &Orchestrator,
    identifier: &str,
    descriptor: Option<&Path>,
    json: bool,
) -> Result<u8, String> {
    let pb = maybe_spinner(json, &format!("restoring {identifier}..."));
    let outcome = match orch.restore(identifier, descriptor) {
        Ok(o) => o,
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "restore failed");
            }
            return Err(e.to_string());
        }
    };
    let complete = outcome.report.is_complete();
    if let Some(ref pb) = pb {
        if complete {
            spin_ok(pb, "environment restored");
        } else {
            spin_fail(pb, "restore incomplete");
        }
    }

    if json {
        let payload = serde_json::json!({
            "env_id": outcome.record.id,
            "name": outcome.record.name,
            "status": outcome.record.status,
            "descriptor": outcome.descriptor_path,
            "complete": complete,
            "report": outcome.report,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        print_report(&outcome);
    }
    Ok(if complete { EXIT_SUCCESS } else { EXIT_FAILURE })
}

fn print_report(outcome: &RestoreOutcome) {
    let report = &outcome.report;
    println!(
        "restored '{}' from {}",
        outcome.record.name,
        outcome.descriptor_path.display()
    );
    for step in &report.completed {
        println!("  done     {step}");
    }
    for step in &report.skipped {
        println!("  skipped  {step}");
    }
    if !report.plugins_restored.is_empty() {
        println!("plugins restored: {}", report.plugins_restored.join(", "));
    }
    if report.dependencies_installed > 0 {
        println!("dependencies installed: {}", report.dependencies_installed);
    }
    if !report.failures.is_empty() {
        eprintln!("{} failure(s):", report.failures.len());
        for failure in &report.failures {
            eprintln!("  - {failure}");
        }
    }
    println!("status: {}", outcome.record.status);
}
