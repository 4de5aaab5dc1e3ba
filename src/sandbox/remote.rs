use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::SandboxConfig;
use crate::error::{AppError, Result};
use crate::sandbox::{CommandOutput, Sandbox, SandboxHandle, SandboxProvider};

const API_KEY_HEADER: &str = "x-api-key";

/// Client for a REST sandbox service.
pub struct RemoteSandboxProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    template: String,
    lifetime_secs: u64,
    command_timeout_secs: u64,
}

impl RemoteSandboxProvider {
    pub fn new(config: &SandboxConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or_else(|| AppError::Config("sandbox.base_url is not set".to_string()))?
            .trim_end_matches('/')
            .to_string();

        // Leave headroom over the per-command deadline so the service can
        // report the timeout itself.
        let client = Client::builder()
            .timeout(Duration::from_secs(config.command_timeout_secs + 30))
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
            template: config.template.clone(),
            lifetime_secs: config.lifetime_secs,
            command_timeout_secs: config.command_timeout_secs,
        })
    }
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct CreateSandboxRequest<'a> {
    template: &'a str,
    timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
struct CreateSandboxResponse {
    sandbox_id: String,
}

#[derive(Debug, Serialize)]
struct RunCommandRequest<'a> {
    cmd: &'a str,
    timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct FileBody {
    content_base64: String,
}

#[async_trait]
impl SandboxProvider for RemoteSandboxProvider {
    async fn create(&self) -> Result<SandboxHandle> {
        let mut request = self
            .client
            .post(format!("{}/sandboxes", self.base_url))
            .json(&CreateSandboxRequest {
                template: &self.template,
                timeout_secs: self.lifetime_secs,
            });
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ProvisionFailed(format!(
                "sandbox service returned {status}: {body}"
            )));
        }
        let created = response.json::<CreateSandboxResponse>().await?;

        Ok(Arc::new(RemoteSandbox {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            id: created.sandbox_id,
            command_timeout_secs: self.command_timeout_secs,
        }))
    }
}

pub struct RemoteSandbox {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    id: String,
    command_timeout_secs: u64,
}

impl RemoteSandbox {
    fn url(&self, suffix: &str) -> String {
        format!("{}/sandboxes/{}{}", self.base_url, self.id, suffix)
    }

    fn file_url(&self, path: &str) -> String {
        self.url(&format!("/files?path={}", urlencoding::encode(path)))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }

    async fn check(response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(AppError::Sandbox(format!("{action} returned {status}: {body}")))
    }
}

#[async_trait]
impl Sandbox for RemoteSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, command: &str) -> Result<CommandOutput> {
        let request = self.authorize(self.client.post(self.url("/commands")).json(
            &RunCommandRequest {
                cmd: command,
                timeout_secs: self.command_timeout_secs,
            },
        ));
        let response = Self::check(request.send().await?, "run command").await?;
        Ok(response.json::<CommandOutput>().await?)
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<()> {
        let body = FileBody {
            content_base64: base64::engine::general_purpose::STANDARD.encode(content),
        };
        let request = self.authorize(self.client.put(self.file_url(path)).json(&body));
        Self::check(request.send().await?, "write file").await?;
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let request = self.authorize(self.client.get(self.file_url(path)));
        let response = Self::check(request.send().await?, "read file").await?;
        let body = response.json::<FileBody>().await?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(body.content_base64)
            .map_err(|e| AppError::Sandbox(format!("Invalid file encoding for {path}: {e}")))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn kill(&self) -> Result<()> {
        let request = self.authorize(self.client.delete(self.url("")));
        let response = request.send().await?;
        // Already gone counts as destroyed.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(response, "kill sandbox").await?;
        Ok(())
    }
}
