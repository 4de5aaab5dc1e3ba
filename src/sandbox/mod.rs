pub mod local;
pub mod remote;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::{SandboxBackend, SandboxConfig};
use crate::error::{AppError, Result};

/// Result of a shell command inside a sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// An ephemeral execution environment. Paths are relative to the sandbox
/// working directory.
#[async_trait]
pub trait Sandbox: Send + Sync {
    fn id(&self) -> &str;

    /// Run a shell command. A non-zero exit is a normal result, not an error.
    async fn run(&self, command: &str) -> Result<CommandOutput>;

    /// Write a file, creating parent directories.
    async fn write_file(&self, path: &str, content: &[u8]) -> Result<()>;

    async fn read_file(&self, path: &str) -> Result<String>;

    /// Destroy the environment.
    async fn kill(&self) -> Result<()>;
}

#[async_trait]
pub trait SandboxProvider: Send + Sync {
    async fn create(&self) -> Result<SandboxHandle>;
}

pub type SandboxHandle = Arc<dyn Sandbox>;

/// Run a command, turning an expired deadline into [`AppError::Timeout`].
pub async fn run_with_timeout(
    sandbox: &dyn Sandbox,
    command: &str,
    timeout: Duration,
) -> Result<CommandOutput> {
    match tokio::time::timeout(timeout, sandbox.run(command)).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout(format!(
            "command did not finish within {}s",
            timeout.as_secs()
        ))),
    }
}

/// Provisions and tears down the per-run sandbox.
pub struct SandboxManager {
    provider: Arc<dyn SandboxProvider>,
}

impl SandboxManager {
    pub fn new(provider: Arc<dyn SandboxProvider>) -> Self {
        Self { provider }
    }

    pub fn from_config(config: &SandboxConfig) -> Result<Self> {
        let provider: Arc<dyn SandboxProvider> = match config.backend {
            SandboxBackend::Local => match &config.local_root {
                Some(root) => Arc::new(local::LocalSandboxProvider::in_dir(root)),
                None => Arc::new(local::LocalSandboxProvider::new()),
            },
            SandboxBackend::Remote => Arc::new(remote::RemoteSandboxProvider::new(config)?),
        };
        Ok(Self::new(provider))
    }

    pub async fn provision(&self) -> Result<SandboxHandle> {
        tracing::info!("Creating sandbox");
        match self.provider.create().await {
            Ok(sandbox) => {
                tracing::info!(sandbox = %sandbox.id(), "Sandbox created");
                Ok(sandbox)
            }
            Err(AppError::ProvisionFailed(msg)) => Err(AppError::ProvisionFailed(msg)),
            Err(e) => Err(AppError::ProvisionFailed(e.to_string())),
        }
    }

    /// Destroy a sandbox. Never fails: errors are logged and swallowed so the
    /// caller can run this on every exit path.
    pub async fn teardown(&self, sandbox: SandboxHandle) {
        let id = sandbox.id().to_string();
        match sandbox.kill().await {
            Ok(()) => tracing::info!(sandbox = %id, "Sandbox destroyed"),
            Err(e) => tracing::warn!(sandbox = %id, error = %e, "Sandbox teardown failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedSandbox;

    struct FailingProvider;

    #[async_trait]
    impl SandboxProvider for FailingProvider {
        async fn create(&self) -> Result<SandboxHandle> {
            Err(AppError::Sandbox("quota exceeded".to_string()))
        }
    }

    #[tokio::test]
    async fn test_provision_failure_is_normalized() {
        let manager = SandboxManager::new(Arc::new(FailingProvider));
        let err = manager.provision().await.err().unwrap();
        assert!(matches!(err, AppError::ProvisionFailed(ref m) if m.contains("quota exceeded")));
    }

    #[tokio::test]
    async fn test_teardown_swallows_kill_errors() {
        let sandbox = ScriptedSandbox::new();
        sandbox.fail_kill();
        let manager = SandboxManager::new(Arc::new(sandbox.provider()));
        manager.teardown(Arc::new(sandbox.clone())).await;
        assert_eq!(sandbox.kill_count(), 1);
    }

    #[tokio::test]
    async fn test_run_with_timeout_expires() {
        let sandbox = ScriptedSandbox::new();
        sandbox.delay_matching("sleep", Duration::from_millis(200));
        let err = run_with_timeout(&sandbox, "sleep 10", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_local_backend_honours_configured_root() {
        let root = tempfile::tempdir().unwrap();
        let config = SandboxConfig {
            local_root: Some(root.path().join("sandboxes")),
            ..SandboxConfig::default()
        };
        let manager = SandboxManager::from_config(&config).unwrap();
        let sandbox = manager.provision().await.unwrap();

        sandbox.write_file("marker.txt", b"x").await.unwrap();
        let entries: Vec<_> = std::fs::read_dir(root.path().join("sandboxes"))
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
        assert!(sandbox.id().starts_with("forgeflow-"));

        manager.teardown(sandbox).await;
        let left = std::fs::read_dir(root.path().join("sandboxes")).unwrap().count();
        assert_eq!(left, 0);
    }

    #[test]
    fn test_combined_output_order() {
        let output = CommandOutput {
            exit_code: 1,
            stdout: "out ".to_string(),
            stderr: "err".to_string(),
        };
        assert_eq!(output.combined(), "out err");
        assert!(!output.success());
    }
}
