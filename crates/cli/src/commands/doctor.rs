use serde::Serialize;
use skillbridge_core::config::{AppConfig, LoadOptions};
use skillbridge_core::CatalogMaterializer;

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

/// Runs every readiness check. Warnings keep exit code zero, any failure
/// exits with 1.
pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Fail { 1 } else { 0 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_credentials(&config));
            checks.push(check_agent_cli(&config));
            checks.push(check_skills_source(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["gateway_credentials", "agent_cli", "skills_source"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let any_fail = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let any_warn = checks.iter().any(|check| check.status == CheckStatus::Warn);
    let overall_status = if any_fail {
        CheckStatus::Fail
    } else if any_warn {
        CheckStatus::Warn
    } else {
        CheckStatus::Pass
    };
    let summary = match overall_status {
        CheckStatus::Pass => "doctor: all readiness checks passed",
        CheckStatus::Warn => "doctor: ready, with warnings",
        _ => "doctor: one or more readiness checks failed",
    }
    .to_string();

    DoctorReport { overall_status, summary, checks }
}

fn check_credentials(config: &AppConfig) -> DoctorCheck {
    if config.has_api_credentials() {
        let mut sources = Vec::new();
        if config.gateway.api_key.is_some() {
            sources.push("api key");
        }
        if config.gateway.base_url.is_some() {
            sources.push("gateway url");
        }
        return DoctorCheck {
            name: "gateway_credentials",
            status: CheckStatus::Pass,
            details: format!("configured via {}", sources.join(" and ")),
        };
    }

    DoctorCheck {
        name: "gateway_credentials",
        status: CheckStatus::Warn,
        details: "set ANTHROPIC_API_KEY or LLM_GATEWAY_URL unless the agent cli has its own login"
            .to_string(),
    }
}

fn check_agent_cli(config: &AppConfig) -> DoctorCheck {
    match which::which(&config.agent.cli_path) {
        Ok(path) => DoctorCheck {
            name: "agent_cli",
            status: CheckStatus::Pass,
            details: format!("found `{}`", path.display()),
        },
        Err(error) => DoctorCheck {
            name: "agent_cli",
            status: CheckStatus::Fail,
            details: format!("`{}` is not runnable: {error}", config.agent.cli_path),
        },
    }
}

fn check_skills_source(config: &AppConfig) -> DoctorCheck {
    let materializer = CatalogMaterializer::from_config(config);
    let scan = materializer.scan();

    if !scan.source_present {
        return DoctorCheck {
            name: "skills_source",
            status: CheckStatus::Warn,
            details: format!(
                "`{}` is missing or unreadable; the catalog will be empty",
                materializer.source().display()
            ),
        };
    }

    let status = if scan.skipped.is_empty() { CheckStatus::Pass } else { CheckStatus::Warn };
    let mut details = format!(
        "{} valid bundle(s) in `{}`",
        scan.bundles.len(),
        materializer.source().display()
    );
    for skipped in &scan.skipped {
        details.push_str(&format!("; skipped `{}`: {}", skipped.name, skipped.reason));
    }

    DoctorCheck { name: "skills_source", status, details }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::{render_human, CheckStatus, DoctorCheck, DoctorReport};

    #[test]
    fn human_output_marks_each_check() {
        let report = DoctorReport {
            overall_status: CheckStatus::Warn,
            summary: "doctor: ready, with warnings".to_string(),
            checks: vec![
                DoctorCheck {
                    name: "config_validation",
                    status: CheckStatus::Pass,
                    details: "ok".to_string(),
                },
                DoctorCheck {
                    name: "gateway_credentials",
                    status: CheckStatus::Warn,
                    details: "unset".to_string(),
                },
            ],
        };

        let rendered = render_human(&report);

        assert!(rendered.starts_with("doctor: ready, with warnings"));
        assert!(rendered.contains("- [ok] config_validation: ok"));
        assert!(rendered.contains("- [warn] gateway_credentials: unset"));
    }
}
