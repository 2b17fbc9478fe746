use std::sync::Arc;

use skillbridge_agent::{AgentRuntime, ClaudeCliRuntime, QueryConfig, SessionSettings};
use skillbridge_core::config::AppConfig;
use skillbridge_core::{CatalogError, CatalogMaterializer, MaterializeReport, SkillCatalog};
use thiserror::Error;
use tracing::{info, warn};

use crate::api::AppState;

pub struct Application {
    pub config: AppConfig,
    pub catalog: Arc<SkillCatalog>,
    pub report: MaterializeReport,
    pub runtime: Arc<dyn AgentRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl Application {
    pub fn state(&self) -> AppState {
        AppState {
            catalog: Arc::clone(&self.catalog),
            runtime: Arc::clone(&self.runtime),
            query: Arc::new(QueryConfig::from_config(&self.config)),
            session: SessionSettings::from_config(&self.config),
        }
    }
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    bootstrap_with_runtime(config.clone(), Arc::new(ClaudeCliRuntime::from_config(&config)))
}

/// Materializes the catalog and assembles the application around `runtime`.
/// An unwritable skills target aborts startup.
pub fn bootstrap_with_runtime(
    config: AppConfig,
    runtime: Arc<dyn AgentRuntime>,
) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        working_directory = %config.agent.working_directory.display(),
        skills_source = %config.skills.source_directory.display(),
        "starting application bootstrap"
    );

    let materialized = CatalogMaterializer::from_config(&config).materialize()?;
    info!(
        event_name = "system.bootstrap.catalog_ready",
        correlation_id = "bootstrap",
        skills_count = materialized.catalog.len(),
        skipped = materialized.report.skipped.len(),
        "skill catalog materialized"
    );

    if !config.has_api_credentials() {
        warn!(
            event_name = "system.bootstrap.credentials_missing",
            correlation_id = "bootstrap",
            "neither gateway.api_key nor gateway.base_url is set; the agent runtime must \
             supply its own credentials"
        );
    }

    Ok(Application {
        catalog: Arc::new(materialized.catalog),
        report: materialized.report,
        runtime,
        config,
    })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use skillbridge_agent::fixtures::ScriptedRuntime;
    use skillbridge_core::config::AppConfig;
    use skillbridge_core::LinkStrategy;
    use tempfile::TempDir;

    use crate::bootstrap::{bootstrap_with_runtime, BootstrapError};

    fn config_for(dir: &TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.agent.working_directory = dir.path().join("app");
        config.skills.source_directory = dir.path().join("app").join("skills");
        config.skills.strategy = LinkStrategy::Copy;
        config
    }

    #[test]
    fn bootstrap_materializes_catalog_into_claude_dir() {
        let dir = TempDir::new().expect("tempdir");
        let config = config_for(&dir);
        let bundle = config.skills.source_directory.join("pdf");
        fs::create_dir_all(&bundle).expect("bundle dir");
        fs::write(bundle.join("SKILL.md"), "---\nname: pdf\ndescription: PDF tools\n---\n")
            .expect("descriptor");
        fs::create_dir_all(config.skills.source_directory.join("notes")).expect("plain dir");

        let app = bootstrap_with_runtime(config, Arc::new(ScriptedRuntime::default()))
            .expect("bootstrap should succeed");

        assert_eq!(app.catalog.names().collect::<Vec<_>>(), vec!["pdf"]);
        assert_eq!(app.report.skipped.len(), 1);
        assert!(dir.path().join("app/.claude/skills/pdf/SKILL.md").exists());
        assert_eq!(app.state().query.skill_source, dir.path().join("app").join("skills"));
    }

    #[test]
    fn bootstrap_tolerates_missing_source() {
        let dir = TempDir::new().expect("tempdir");

        let app = bootstrap_with_runtime(config_for(&dir), Arc::new(ScriptedRuntime::default()))
            .expect("missing source is not fatal");

        assert!(app.catalog.is_empty());
        assert!(!app.report.source_present);
    }

    #[cfg(unix)]
    #[test]
    fn bootstrap_fails_when_target_is_not_writable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().expect("tempdir");
        let config = config_for(&dir);
        let claude_dir = config.claude_dir();
        fs::create_dir_all(&claude_dir).expect("claude dir");
        fs::set_permissions(&claude_dir, fs::Permissions::from_mode(0o555)).expect("chmod");
        let marker = claude_dir.join("marker");
        let read_only = fs::write(&marker, b"x").is_err();

        let result = bootstrap_with_runtime(config, Arc::new(ScriptedRuntime::default()));
        fs::set_permissions(&claude_dir, fs::Permissions::from_mode(0o755)).expect("chmod back");

        if read_only {
            assert!(matches!(result, Err(BootstrapError::Catalog(_))));
        }
    }
}
