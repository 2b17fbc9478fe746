use serde_json::json;
use skillbridge_core::CatalogMaterializer;

use crate::commands::{load_config, CommandResult};

/// Syncs the skills target with the source directory, or with `dry_run`
/// only reports what the source contains.
pub fn run(dry_run: bool) -> CommandResult {
    let config = match load_config("skills") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let materializer = CatalogMaterializer::from_config(&config);

    if dry_run {
        let scan = materializer.scan();
        let bundles = scan
            .bundles
            .iter()
            .map(|bundle| {
                json!({
                    "name": bundle.name,
                    "description": bundle.descriptor.description,
                    "path": bundle.path.display().to_string(),
                })
            })
            .collect::<Vec<_>>();
        let message = format!(
            "{} valid bundle(s), {} skipped in `{}`",
            scan.bundles.len(),
            scan.skipped.len(),
            materializer.source().display()
        );
        return CommandResult::success_with_details(
            "skills",
            message,
            Some(json!({
                "dry_run": true,
                "source": materializer.source().display().to_string(),
                "target": materializer.target().display().to_string(),
                "source_present": scan.source_present,
                "bundles": bundles,
                "skipped": scan.skipped,
            })),
        );
    }

    match materializer.materialize() {
        Ok(materialized) => {
            let report = &materialized.report;
            let message = if report.is_noop() {
                format!("catalog already up to date ({} skill(s))", materialized.catalog.len())
            } else {
                format!(
                    "catalog synced: {} linked, {} removed, {} unchanged",
                    report.linked.len(),
                    report.removed.len(),
                    report.unchanged.len()
                )
            };
            let details = serde_json::to_value(report).ok();
            CommandResult::success_with_details("skills", message, details)
        }
        Err(error) => CommandResult::failure("skills", "catalog", error.to_string(), 4),
    }
}
