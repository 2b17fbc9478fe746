use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::LinkStrategy;

pub const DEFAULT_ALLOWED_TOOLS: [&str; 7] =
    ["Skill", "Read", "Write", "Bash", "Edit", "Glob", "Grep"];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub skills: SkillsConfig,
    pub gateway: GatewayConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub working_directory: PathBuf,
    pub cli_path: String,
    /// Arguments placed before the generated flags, for wrappers such as
    /// `npx @anthropic-ai/claude-code`.
    pub cli_args: Vec<String>,
    pub allowed_tools: Vec<String>,
    pub permission_mode: String,
    pub setting_sources: Vec<String>,
    pub model: Option<String>,
    pub query_timeout_secs: u64,
    pub max_tool_result_chars: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct SkillsConfig {
    pub source_directory: PathBuf,
    pub strategy: LinkStrategy,
}

/// Credentials and endpoint for the remote inference service. Forwarded to the
/// agent runtime untouched.
#[derive(Clone, Debug, Default)]
pub struct GatewayConfig {
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub headers: BTreeMap<String, String>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub working_directory: Option<PathBuf>,
    pub skills_source_directory: Option<PathBuf>,
    pub skills_strategy: Option<LinkStrategy>,
    pub cli_path: Option<String>,
    pub model: Option<String>,
    pub log_level: Option<String>,
    pub port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            agent: AgentConfig {
                working_directory: PathBuf::from("/app"),
                cli_path: "claude".to_string(),
                cli_args: Vec::new(),
                allowed_tools: DEFAULT_ALLOWED_TOOLS.iter().map(ToString::to_string).collect(),
                permission_mode: "acceptEdits".to_string(),
                setting_sources: vec!["user".to_string(), "project".to_string()],
                model: None,
                query_timeout_secs: 300,
                max_tool_result_chars: None,
            },
            skills: SkillsConfig {
                source_directory: PathBuf::from("/app/skills"),
                strategy: LinkStrategy::platform_default(),
            },
            gateway: GatewayConfig::default(),
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("skillbridge.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// `<working_directory>/.claude`, the directory the agent runtime reads
    /// project settings from.
    pub fn claude_dir(&self) -> PathBuf {
        self.agent.working_directory.join(".claude")
    }

    /// Fixed location where the runtime expects skill bundles.
    pub fn skills_target_directory(&self) -> PathBuf {
        self.claude_dir().join("skills")
    }

    pub fn has_api_credentials(&self) -> bool {
        let has_key = self
            .gateway
            .api_key
            .as_ref()
            .map(|key| !key.expose_secret().trim().is_empty())
            .unwrap_or(false);
        has_key || self.gateway.base_url.is_some()
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(agent) = patch.agent {
            if let Some(working_directory) = agent.working_directory {
                self.agent.working_directory = working_directory;
            }
            if let Some(cli_path) = agent.cli_path {
                self.agent.cli_path = cli_path;
            }
            if let Some(cli_args) = agent.cli_args {
                self.agent.cli_args = cli_args;
            }
            if let Some(allowed_tools) = agent.allowed_tools {
                self.agent.allowed_tools = allowed_tools;
            }
            if let Some(permission_mode) = agent.permission_mode {
                self.agent.permission_mode = permission_mode;
            }
            if let Some(setting_sources) = agent.setting_sources {
                self.agent.setting_sources = setting_sources;
            }
            if let Some(model) = agent.model {
                self.agent.model = Some(model);
            }
            if let Some(query_timeout_secs) = agent.query_timeout_secs {
                self.agent.query_timeout_secs = query_timeout_secs;
            }
            if let Some(max_tool_result_chars) = agent.max_tool_result_chars {
                self.agent.max_tool_result_chars = Some(max_tool_result_chars);
            }
        }

        if let Some(skills) = patch.skills {
            if let Some(source_directory) = skills.source_directory {
                self.skills.source_directory = source_directory;
            }
            if let Some(strategy) = skills.strategy {
                self.skills.strategy = strategy;
            }
        }

        if let Some(gateway) = patch.gateway {
            if let Some(api_key_value) = gateway.api_key {
                self.gateway.api_key = Some(api_key_value.into());
            }
            if let Some(base_url) = gateway.base_url {
                self.gateway.base_url = Some(base_url);
            }
            if let Some(headers) = gateway.headers {
                self.gateway.headers = headers;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) =
            read_env_any(&["SKILLBRIDGE_AGENT_WORKING_DIRECTORY", "CLAUDE_AGENT_CWD"])
        {
            self.agent.working_directory = PathBuf::from(value);
        }
        if let Some(value) = read_env("SKILLBRIDGE_AGENT_CLI_PATH") {
            self.agent.cli_path = value;
        }
        if let Some(value) = read_env("SKILLBRIDGE_AGENT_ALLOWED_TOOLS") {
            self.agent.allowed_tools = parse_list(&value);
        }
        if let Some(value) = read_env("SKILLBRIDGE_AGENT_PERMISSION_MODE") {
            self.agent.permission_mode = value;
        }
        if let Some(value) = read_env("SKILLBRIDGE_AGENT_SETTING_SOURCES") {
            self.agent.setting_sources = parse_list(&value);
        }
        if let Some(value) = read_env_any(&["SKILLBRIDGE_AGENT_MODEL", "CLAUDE_MODEL"]) {
            self.agent.model = Some(value);
        }
        if let Some(value) = read_env("SKILLBRIDGE_AGENT_QUERY_TIMEOUT_SECS") {
            self.agent.query_timeout_secs =
                parse_u64("SKILLBRIDGE_AGENT_QUERY_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("SKILLBRIDGE_AGENT_MAX_TOOL_RESULT_CHARS") {
            self.agent.max_tool_result_chars =
                Some(parse_usize("SKILLBRIDGE_AGENT_MAX_TOOL_RESULT_CHARS", &value)?);
        }

        if let Some(value) =
            read_env_any(&["SKILLBRIDGE_SKILLS_SOURCE_DIRECTORY", "CLAUDE_AGENT_SKILLS_DIR"])
        {
            self.skills.source_directory = PathBuf::from(value);
        }
        if let Some(value) = read_env("SKILLBRIDGE_SKILLS_STRATEGY") {
            self.skills.strategy = value.parse().map_err(|_| ConfigError::InvalidEnvOverride {
                key: "SKILLBRIDGE_SKILLS_STRATEGY".to_string(),
                value: value.clone(),
            })?;
        }

        if let Some(value) = read_env_any(&["SKILLBRIDGE_GATEWAY_API_KEY", "ANTHROPIC_API_KEY"]) {
            self.gateway.api_key = Some(value.into());
        }
        if let Some(value) = read_env_any(&[
            "SKILLBRIDGE_GATEWAY_BASE_URL",
            "ANTHROPIC_BASE_URL",
            "LLM_GATEWAY_URL",
        ]) {
            self.gateway.base_url = Some(value);
        }
        if let Some(value) = read_env_any(&["SKILLBRIDGE_GATEWAY_HEADERS", "LLM_GATEWAY_HEADERS"])
        {
            self.gateway.headers = parse_headers(&value)?;
        }

        if let Some(value) = read_env_any(&["SKILLBRIDGE_SERVER_BIND_ADDRESS", "HOST"]) {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("SKILLBRIDGE_SERVER_PORT") {
            self.server.port = parse_u16("SKILLBRIDGE_SERVER_PORT", &value)?;
        } else if let Some(value) = read_env("PORT") {
            self.server.port = parse_u16("PORT", &value)?;
        }
        if let Some(value) = read_env("SKILLBRIDGE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("SKILLBRIDGE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env_any(&["SKILLBRIDGE_LOGGING_LEVEL", "SKILLBRIDGE_LOG_LEVEL"]) {
            self.logging.level = value;
        }
        if let Some(value) = read_env_any(&["SKILLBRIDGE_LOGGING_FORMAT", "SKILLBRIDGE_LOG_FORMAT"])
        {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(working_directory) = overrides.working_directory {
            self.agent.working_directory = working_directory;
        }
        if let Some(source_directory) = overrides.skills_source_directory {
            self.skills.source_directory = source_directory;
        }
        if let Some(strategy) = overrides.skills_strategy {
            self.skills.strategy = strategy;
        }
        if let Some(cli_path) = overrides.cli_path {
            self.agent.cli_path = cli_path;
        }
        if let Some(model) = overrides.model {
            self.agent.model = Some(model);
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_agent(&self.agent)?;
        validate_gateway(&self.gateway)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("skillbridge.toml"), PathBuf::from("config/skillbridge.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_agent(agent: &AgentConfig) -> Result<(), ConfigError> {
    if !agent.working_directory.is_absolute() {
        return Err(ConfigError::Validation(format!(
            "agent.working_directory must be an absolute path (got `{}`)",
            agent.working_directory.display()
        )));
    }

    if agent.cli_path.trim().is_empty() {
        return Err(ConfigError::Validation("agent.cli_path must not be empty".to_string()));
    }

    if agent.allowed_tools.iter().all(|tool| tool.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "agent.allowed_tools must name at least one tool (for example `Skill,Read`)"
                .to_string(),
        ));
    }

    if agent.query_timeout_secs == 0 || agent.query_timeout_secs > 3600 {
        return Err(ConfigError::Validation(
            "agent.query_timeout_secs must be in range 1..=3600".to_string(),
        ));
    }

    if agent.max_tool_result_chars == Some(0) {
        return Err(ConfigError::Validation(
            "agent.max_tool_result_chars must be greater than zero when set".to_string(),
        ));
    }

    Ok(())
}

fn validate_gateway(gateway: &GatewayConfig) -> Result<(), ConfigError> {
    if let Some(base_url) = &gateway.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "gateway.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    if let Some(name) = gateway.headers.keys().find(|name| name.trim().is_empty()) {
        return Err(ConfigError::Validation(format!(
            "gateway.headers contains an empty header name (`{name}`)"
        )));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_env_any(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| read_env(key))
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_headers(value: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    serde_json::from_str::<BTreeMap<String, String>>(value).map_err(|_| {
        ConfigError::Validation(
            "gateway.headers must be a JSON object of string values, for example \
             {\"X-Api-Key\": \"...\"}"
                .to_string(),
        )
    })
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    agent: Option<AgentPatch>,
    skills: Option<SkillsPatch>,
    gateway: Option<GatewayPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentPatch {
    working_directory: Option<PathBuf>,
    cli_path: Option<String>,
    cli_args: Option<Vec<String>>,
    allowed_tools: Option<Vec<String>>,
    permission_mode: Option<String>,
    setting_sources: Option<Vec<String>>,
    model: Option<String>,
    query_timeout_secs: Option<u64>,
    max_tool_result_chars: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct SkillsPatch {
    source_directory: Option<PathBuf>,
    strategy: Option<LinkStrategy>,
}

#[derive(Debug, Default, Deserialize)]
struct GatewayPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    headers: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
