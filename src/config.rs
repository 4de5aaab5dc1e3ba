use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{AppError, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub claude: ClaudeConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub framework: FrameworkConfig,
}

#[derive(Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared secret for signed run submissions. Unsigned submissions are
    /// accepted when unset.
    #[serde(default)]
    pub api_secret: Option<String>,
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_secret: None,
            max_concurrent_runs: default_max_concurrent_runs(),
        }
    }
}

// Manual Debug impl to avoid leaking the API secret
impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("api_secret", &self.api_secret.as_ref().map(|_| "[REDACTED]"))
            .field("max_concurrent_runs", &self.max_concurrent_runs)
            .finish()
    }
}

#[derive(Deserialize, Clone)]
pub struct ClaudeConfig {
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_commit_max_tokens")]
    pub commit_max_tokens: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_rate_limit_max_retries")]
    pub rate_limit_max_retries: u32,
    #[serde(default = "default_rate_limit_backoff_secs")]
    pub rate_limit_backoff_secs: u64,
}

// Manual Debug impl to avoid leaking the API key
impl std::fmt::Debug for ClaudeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("commit_max_tokens", &self.commit_max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("rate_limit_max_retries", &self.rate_limit_max_retries)
            .field("rate_limit_backoff_secs", &self.rate_limit_backoff_secs)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SandboxBackend {
    /// Temporary directory on this host.
    Local,
    /// REST sandbox service.
    Remote,
}

#[derive(Deserialize, Clone)]
pub struct SandboxConfig {
    #[serde(default = "default_sandbox_backend")]
    pub backend: SandboxBackend,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_sandbox_template")]
    pub template: String,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_sandbox_lifetime_secs")]
    pub lifetime_secs: u64,
    /// Parent directory for local sandboxes. Defaults to the system temp dir.
    #[serde(default)]
    pub local_root: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: default_sandbox_backend(),
            base_url: None,
            api_key: None,
            template: default_sandbox_template(),
            command_timeout_secs: default_command_timeout_secs(),
            lifetime_secs: default_sandbox_lifetime_secs(),
            local_root: None,
        }
    }
}

// Manual Debug impl to avoid leaking the sandbox API key
impl std::fmt::Debug for SandboxConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxConfig")
            .field("backend", &self.backend)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("template", &self.template)
            .field("command_timeout_secs", &self.command_timeout_secs)
            .field("lifetime_secs", &self.lifetime_secs)
            .field("local_root", &self.local_root)
            .finish()
    }
}

#[derive(Deserialize, Clone)]
pub struct GitConfig {
    /// Access token for clone/pull/push. Falls back to `GITHUB_TOKEN`.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_git_host")]
    pub host: String,
    #[serde(default = "default_git_user_name")]
    pub user_name: String,
    #[serde(default = "default_git_user_email")]
    pub user_email: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            token: None,
            host: default_git_host(),
            user_name: default_git_user_name(),
            user_email: default_git_user_email(),
        }
    }
}

impl GitConfig {
    pub fn resolved_token(&self) -> Option<String> {
        self.token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty()))
    }
}

// Manual Debug impl to avoid leaking the token
impl std::fmt::Debug for GitConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitConfig")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("host", &self.host)
            .field("user_name", &self.user_name)
            .field("user_email", &self.user_email)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_max_revision_attempts")]
    pub max_revision_attempts: u32,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_artifact_prefix")]
    pub artifact_prefix: String,
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
    /// Generation prompt template with `{{INPUT_JSON}}`, `{{TEMPLATE_CODE}}`
    /// and `{{OS_URL}}` placeholders.
    #[serde(default)]
    pub prompt_path: Option<PathBuf>,
    /// Reference code substituted for `{{TEMPLATE_CODE}}`.
    #[serde(default)]
    pub template_path: Option<PathBuf>,
    /// Remote-control endpoint used when a request does not name one.
    #[serde(default)]
    pub os_url: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_revision_attempts: default_max_revision_attempts(),
            output_dir: default_output_dir(),
            artifact_prefix: default_artifact_prefix(),
            branch_prefix: default_branch_prefix(),
            prompt_path: None,
            template_path: None,
            os_url: None,
        }
    }
}

/// Layout and commands of the agent framework whose dev server is used for
/// the second validation phase.
#[derive(Debug, Deserialize, Clone)]
pub struct FrameworkConfig {
    #[serde(default = "default_artifact_path")]
    pub artifact_path: String,
    #[serde(default = "default_init_path")]
    pub init_path: String,
    #[serde(default = "default_init_content")]
    pub init_content: String,
    #[serde(default = "default_framework_config_path")]
    pub config_path: String,
    /// Name of the module-level export the dev server loads.
    #[serde(default = "default_graph_name")]
    pub graph_name: String,
    #[serde(default = "default_env_path")]
    pub env_path: String,
    /// Variables copied from the local environment into the env file.
    #[serde(default = "default_env_keys")]
    pub env_keys: Vec<String>,
    #[serde(default = "default_manifest_path")]
    pub manifest_path: String,
    #[serde(default = "default_base_requirements")]
    pub base_requirements: Vec<String>,
    #[serde(default = "default_cli_install_command")]
    pub cli_install_command: String,
    /// Dev server command; `{port}` is substituted.
    #[serde(default = "default_dev_command")]
    pub dev_command: String,
    #[serde(default = "default_dev_port")]
    pub default_port: u16,
    #[serde(default = "default_port_probe_span")]
    pub port_probe_span: u16,
    #[serde(default = "default_dev_server_timeout_secs")]
    pub dev_server_timeout_secs: u64,
    /// Where the first phase writes the candidate, relative to the sandbox
    /// working directory and outside the working copy.
    #[serde(default = "default_scratch_path")]
    pub scratch_path: String,
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            artifact_path: default_artifact_path(),
            init_path: default_init_path(),
            init_content: default_init_content(),
            config_path: default_framework_config_path(),
            graph_name: default_graph_name(),
            env_path: default_env_path(),
            env_keys: default_env_keys(),
            manifest_path: default_manifest_path(),
            base_requirements: default_base_requirements(),
            cli_install_command: default_cli_install_command(),
            dev_command: default_dev_command(),
            default_port: default_dev_port(),
            port_probe_span: default_port_probe_span(),
            dev_server_timeout_secs: default_dev_server_timeout_secs(),
            scratch_path: default_scratch_path(),
            interpreter: default_interpreter(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_max_concurrent_runs() -> usize {
    4
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    8000
}

fn default_commit_max_tokens() -> u32 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_rate_limit_max_retries() -> u32 {
    3
}

fn default_rate_limit_backoff_secs() -> u64 {
    10
}

fn default_sandbox_backend() -> SandboxBackend {
    SandboxBackend::Local
}

fn default_sandbox_template() -> String {
    "base".to_string()
}

fn default_command_timeout_secs() -> u64 {
    600
}

fn default_sandbox_lifetime_secs() -> u64 {
    3600
}

fn default_git_host() -> String {
    "github.com".to_string()
}

fn default_git_user_name() -> String {
    "Forgeflow Bot".to_string()
}

fn default_git_user_email() -> String {
    "automation@forgeflow.dev".to_string()
}

fn default_max_revision_attempts() -> u32 {
    3
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_artifact_prefix() -> String {
    "generated_graph".to_string()
}

fn default_branch_prefix() -> String {
    "generated-graph".to_string()
}

fn default_artifact_path() -> String {
    "src/agent/graph.py".to_string()
}

fn default_init_path() -> String {
    "src/agent/__init__.py".to_string()
}

fn default_init_content() -> String {
    "# agent package".to_string()
}

fn default_framework_config_path() -> String {
    "langgraph.json".to_string()
}

fn default_graph_name() -> String {
    "graph".to_string()
}

fn default_env_path() -> String {
    ".env".to_string()
}

fn default_env_keys() -> Vec<String> {
    ["LANGSMITH_KEY", "ANTHROPIC_API_KEY", "OPENAI_API_KEY"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_manifest_path() -> String {
    "requirements.txt".to_string()
}

fn default_base_requirements() -> Vec<String> {
    ["langgraph", "langgraph-cli[inmem]"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_cli_install_command() -> String {
    "pip install -U \"langgraph-cli[inmem]\"".to_string()
}

fn default_dev_command() -> String {
    "langgraph dev --host 0.0.0.0 --port {port}".to_string()
}

fn default_dev_port() -> u16 {
    8123
}

fn default_port_probe_span() -> u16 {
    10
}

fn default_dev_server_timeout_secs() -> u64 {
    5
}

fn default_scratch_path() -> String {
    ".forgeflow/candidate.py".to_string()
}

fn default_interpreter() -> String {
    "python3".to_string()
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Load from file if specified
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            // Try default paths
            builder = builder.add_source(config::File::with_name("forgeflow").required(false));
        }

        // Environment variable overrides with FORGEFLOW_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("FORGEFLOW")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        let config: Self = config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.sandbox.backend == SandboxBackend::Remote && self.sandbox.base_url.is_none() {
            return Err(AppError::Config(
                "sandbox.base_url is required for the remote backend".to_string(),
            ));
        }
        if self.framework.port_probe_span == 0 {
            return Err(AppError::Config(
                "framework.port_probe_span must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn claude_api_key(&self) -> &str {
        &self.claude.api_key
    }

    pub fn api_secret(&self) -> Option<&str> {
        self.server.api_secret.as_deref()
    }

    /// A configuration for tests and embedding, with defaults everywhere.
    pub fn with_api_key(api_key: &str) -> Self {
        Self {
            server: ServerConfig::default(),
            claude: ClaudeConfig {
                api_key: api_key.to_string(),
                model: default_model(),
                max_tokens: default_max_tokens(),
                commit_max_tokens: default_commit_max_tokens(),
                request_timeout_secs: default_request_timeout_secs(),
                rate_limit_max_retries: default_rate_limit_max_retries(),
                rate_limit_backoff_secs: default_rate_limit_backoff_secs(),
            },
            sandbox: SandboxConfig::default(),
            git: GitConfig::default(),
            pipeline: PipelineConfig::default(),
            framework: FrameworkConfig::default(),
        }
    }
}
