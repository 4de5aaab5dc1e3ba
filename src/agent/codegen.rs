use async_trait::async_trait;

use crate::agent::claude::ClaudeClient;
use crate::agent::prompt;
use crate::config::{AppConfig, PipelineConfig};
use crate::error::{AppError, Result};
use crate::state::{ErrorKind, FailureRecord};

/// What the commit-message generator gets to see.
#[derive(Debug, Clone)]
pub struct CommitContext<'a> {
    pub spec: &'a serde_json::Value,
    pub files: &'a [String],
    pub artifact: &'a str,
    pub execution_output: &'a str,
}

/// The external code-generation service.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Produce a first candidate from the workflow specification.
    async fn generate(&self, spec: &serde_json::Value, os_url: Option<&str>) -> Result<String>;

    /// Produce a replacement for `artifact` given only the latest failure.
    async fn revise(&self, artifact: &str, failure: &FailureRecord) -> Result<String>;

    async fn commit_message(&self, context: &CommitContext<'_>) -> Result<String>;
}

/// Remove a markdown code fence around the payload. A `python`-tagged fence
/// wins over any other; without a fence the response is returned unchanged.
pub fn strip_code_fence(response: &str) -> &str {
    let start = match response.find("```python") {
        Some(idx) => idx,
        None => match response.find("```") {
            Some(idx) => idx,
            None => return response,
        },
    };

    // Skip the opening fence line, including any info string.
    let after_open = &response[start + 3..];
    let body_start = match after_open.find('\n') {
        Some(nl) => nl + 1,
        None => return "",
    };
    let body = &after_open[body_start..];

    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

/// Turn a raw model response into source text, or fail if nothing usable
/// remains.
pub fn extract_source(response: &str) -> Result<String> {
    if response.trim().is_empty() {
        return Err(AppError::GenerationFailed(
            "model returned an empty response".to_string(),
        ));
    }
    let source = strip_code_fence(response);
    if source.trim().is_empty() {
        return Err(AppError::GenerationFailed(
            "no code left after removing markdown fences".to_string(),
        ));
    }
    Ok(source.to_string())
}

pub struct ClaudeCodeGenerator {
    client: ClaudeClient,
    max_tokens: u32,
    commit_max_tokens: u32,
    prompt_template: Option<String>,
    template_code: String,
}

impl ClaudeCodeGenerator {
    pub fn new(client: ClaudeClient, max_tokens: u32, commit_max_tokens: u32) -> Self {
        Self {
            client,
            max_tokens,
            commit_max_tokens,
            prompt_template: None,
            template_code: String::new(),
        }
    }

    pub fn with_prompt_template(mut self, template: String) -> Self {
        self.prompt_template = Some(template);
        self
    }

    pub fn with_template_code(mut self, code: String) -> Self {
        self.template_code = code;
        self
    }

    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        if config.claude_api_key().trim().is_empty() {
            return Err(AppError::Config("claude.api_key is required".to_string()));
        }
        let client = ClaudeClient::new(&config.claude)?;
        let mut generator = Self::new(
            client,
            config.claude.max_tokens,
            config.claude.commit_max_tokens,
        );
        let PipelineConfig {
            prompt_path,
            template_path,
            ..
        } = &config.pipeline;
        if let Some(path) = prompt_path {
            let template = tokio::fs::read_to_string(path).await.map_err(|e| {
                AppError::Config(format!("Failed to read prompt {}: {e}", path.display()))
            })?;
            generator = generator.with_prompt_template(template);
        }
        if let Some(path) = template_path {
            let code = tokio::fs::read_to_string(path).await.map_err(|e| {
                AppError::Config(format!("Failed to read template {}: {e}", path.display()))
            })?;
            generator = generator.with_template_code(code);
        }
        Ok(generator)
    }

    async fn call(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        self.client
            .complete(prompt, max_tokens)
            .await
            .map_err(|e| AppError::GenerationFailed(e.to_string()))
    }
}

#[async_trait]
impl CodeGenerator for ClaudeCodeGenerator {
    async fn generate(&self, spec: &serde_json::Value, os_url: Option<&str>) -> Result<String> {
        let prompt = prompt::generation_prompt(
            self.prompt_template.as_deref(),
            spec,
            &self.template_code,
            os_url,
        );
        tracing::debug!(prompt_len = prompt.len(), model = %self.client.model(), "Generating code");
        let response = self.call(&prompt, self.max_tokens).await?;
        extract_source(&response)
    }

    async fn revise(&self, artifact: &str, failure: &FailureRecord) -> Result<String> {
        let prompt = match failure.kind {
            ErrorKind::Execution => prompt::execution_revision_prompt(artifact, failure),
            ErrorKind::DevServer(_) => prompt::dev_server_revision_prompt(artifact, failure),
        };
        tracing::debug!(kind = %failure.kind, "Revising code");
        let response = self.call(&prompt, self.max_tokens).await?;
        extract_source(&response)
    }

    async fn commit_message(&self, context: &CommitContext<'_>) -> Result<String> {
        let prompt = prompt::commit_message_prompt(
            context.spec,
            context.files,
            context.artifact,
            context.execution_output,
        );
        let response = self.call(&prompt, self.commit_max_tokens).await?;
        let message = strip_code_fence(&response).trim().replace('"', "'");
        if message.is_empty() {
            return Err(AppError::GenerationFailed(
                "empty commit message".to_string(),
            ));
        }
        Ok(message)
    }
}
