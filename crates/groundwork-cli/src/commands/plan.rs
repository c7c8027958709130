use super::{describe_core_error, json_pretty, EXIT_SUCCESS};
use groundwork_core::ProvisionPlanner;
use groundwork_schema::parse_manifest_file;
use std::path::Path;

pub fn run(manifest_path: &Path, json: bool) -> Result<u8, String> {
    let manifest =
        parse_manifest_file(manifest_path).map_err(|e| format!("invalid manifest: {e}"))?;
    let plan = ProvisionPlanner::new()
        .plan(&manifest)
        .map_err(|e| describe_core_error(&e))?;

    if json {
        let payload = serde_json::json!({
            "parallelism": manifest.settings.parallelism,
            "steps": plan.steps,
        });
        println!("{}", json_pretty(&payload)?);
        return Ok(EXIT_SUCCESS);
    }

    println!(
        "{} steps, parallelism {}",
        plan.len(),
        manifest.settings.parallelism
    );
    for planned in plan.iter() {
        let after = if planned.depends_on.is_empty() {
            String::new()
        } else {
            let deps: Vec<String> = planned
                .depends_on
                .iter()
                .map(|d| (d + 1).to_string())
                .collect();
            format!("  (after {})", deps.join(", "))
        };
        let exclusive = if planned.is_exclusive() { " [exclusive]" } else { "" };
        println!("{:>3}. {}{exclusive}{after}", planned.index + 1, planned.step);
    }
    Ok(EXIT_SUCCESS)
}
