use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use skillbridge_core::config::AppConfig;
use toml::Value;

use crate::commands::load_config;

pub fn run() -> String {
    let config = match load_config("config") {
        Ok(config) => config,
        Err(failure) => return failure.output,
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_keys: &[&str]| {
        field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_keys) in entries(&config) {
        lines.push(render_line(key, &value, source(key, env_keys)));
    }
    lines.push(format!(
        "- skills target (derived) = {}",
        config.skills_target_directory().display()
    ));

    lines.join("\n")
}

type Entry = (&'static str, String, &'static [&'static str]);

fn entry(key: &'static str, value: String, env_keys: &'static [&'static str]) -> Entry {
    (key, value, env_keys)
}

fn entries(config: &AppConfig) -> Vec<Entry> {
    let agent = &config.agent;
    let gateway = &config.gateway;

    vec![
        entry(
            "agent.working_directory",
            agent.working_directory.display().to_string(),
            &["SKILLBRIDGE_AGENT_WORKING_DIRECTORY", "CLAUDE_AGENT_CWD"],
        ),
        entry("agent.cli_path", agent.cli_path.clone(), &["SKILLBRIDGE_AGENT_CLI_PATH"]),
        entry("agent.cli_args", format!("{:?}", agent.cli_args), &[]),
        entry(
            "agent.allowed_tools",
            agent.allowed_tools.join(","),
            &["SKILLBRIDGE_AGENT_ALLOWED_TOOLS"],
        ),
        entry(
            "agent.permission_mode",
            agent.permission_mode.clone(),
            &["SKILLBRIDGE_AGENT_PERMISSION_MODE"],
        ),
        entry(
            "agent.setting_sources",
            agent.setting_sources.join(","),
            &["SKILLBRIDGE_AGENT_SETTING_SOURCES"],
        ),
        entry(
            "agent.model",
            agent.model.clone().unwrap_or_else(|| "<runtime default>".to_string()),
            &["SKILLBRIDGE_AGENT_MODEL", "CLAUDE_MODEL"],
        ),
        entry(
            "agent.query_timeout_secs",
            agent.query_timeout_secs.to_string(),
            &["SKILLBRIDGE_AGENT_QUERY_TIMEOUT_SECS"],
        ),
        entry(
            "agent.max_tool_result_chars",
            agent
                .max_tool_result_chars
                .map(|limit| limit.to_string())
                .unwrap_or_else(|| "<unlimited>".to_string()),
            &["SKILLBRIDGE_AGENT_MAX_TOOL_RESULT_CHARS"],
        ),
        entry(
            "skills.source_directory",
            config.skills.source_directory.display().to_string(),
            &["SKILLBRIDGE_SKILLS_SOURCE_DIRECTORY", "CLAUDE_AGENT_SKILLS_DIR"],
        ),
        entry(
            "skills.strategy",
            config.skills.strategy.as_str().to_string(),
            &["SKILLBRIDGE_SKILLS_STRATEGY"],
        ),
        entry(
            "gateway.api_key",
            gateway
                .api_key
                .as_ref()
                .map(|key| redact_token(key.expose_secret()))
                .unwrap_or_else(|| "<unset>".to_string()),
            &["SKILLBRIDGE_GATEWAY_API_KEY", "ANTHROPIC_API_KEY"],
        ),
        entry(
            "gateway.base_url",
            gateway.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            &["SKILLBRIDGE_GATEWAY_BASE_URL", "ANTHROPIC_BASE_URL", "LLM_GATEWAY_URL"],
        ),
        entry(
            "gateway.headers",
            render_header_names(gateway.headers.keys()),
            &["SKILLBRIDGE_GATEWAY_HEADERS", "LLM_GATEWAY_HEADERS"],
        ),
        entry(
            "server.bind_address",
            config.server.bind_address.clone(),
            &["SKILLBRIDGE_SERVER_BIND_ADDRESS", "HOST"],
        ),
        entry(
            "server.port",
            config.server.port.to_string(),
            &["SKILLBRIDGE_SERVER_PORT", "PORT"],
        ),
        entry(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["SKILLBRIDGE_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        entry(
            "logging.level",
            config.logging.level.clone(),
            &["SKILLBRIDGE_LOGGING_LEVEL", "SKILLBRIDGE_LOG_LEVEL"],
        ),
        entry(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["SKILLBRIDGE_LOGGING_FORMAT", "SKILLBRIDGE_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("skillbridge.toml"), PathBuf::from("config/skillbridge.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Header values usually carry credentials, so only names are shown.
fn render_header_names<'a>(names: impl Iterator<Item = &'a String>) -> String {
    let names = names.map(String::as_str).collect::<Vec<_>>();
    if names.is_empty() {
        return "<none>".to_string();
    }
    format!("{} (values redacted)", names.join(", "))
}

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}

#[cfg(test)]
mod tests {
    use super::{redact_token, render_header_names};

    #[test]
    fn tokens_keep_only_their_prefix() {
        assert_eq!(redact_token("sk-ant-abcdef"), "sk-***");
        assert_eq!(redact_token("opaque"), "<redacted>");
        assert_eq!(redact_token("  "), "<empty>");
    }

    #[test]
    fn header_values_are_never_rendered() {
        let names = vec!["X-Api-Key".to_string(), "X-Tenant".to_string()];

        assert_eq!(render_header_names(names.iter()), "X-Api-Key, X-Tenant (values redacted)");
        assert_eq!(render_header_names(Vec::<String>::new().iter()), "<none>");
    }
}
