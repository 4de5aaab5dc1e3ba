use std::time::Duration;

use crate::config::{AppConfig, GitConfig};
use crate::error::{AppError, Result};
use crate::sandbox::{run_with_timeout, Sandbox};
use crate::workspace::repo::{redact, RepoRef};

/// A cloned working copy inside a sandbox.
#[derive(Clone)]
pub struct Workspace {
    /// Relative to the sandbox working directory.
    pub path: String,
    pub repo: RepoRef,
    pub token: Option<String>,
}

// Manual Debug impl to avoid leaking the token
impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("path", &self.path)
            .field("repo", &self.repo)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Clones target repositories into sandboxes.
pub struct WorkspaceManager {
    git: GitConfig,
    timeout: Duration,
}

impl WorkspaceManager {
    pub fn new(git: GitConfig, timeout: Duration) -> Self {
        Self { git, timeout }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.git.clone(),
            Duration::from_secs(config.sandbox.command_timeout_secs),
        )
    }

    /// Clone `target_repo` into the sandbox, replacing any stale copy.
    ///
    /// The remote URL left in `.git/config` is the **plain** URL; the token
    /// only travels in the clone, pull and push command lines.
    pub async fn setup(&self, sandbox: &dyn Sandbox, target_repo: &str) -> Result<Workspace> {
        let repo = RepoRef::parse(target_repo, &self.git.host)
            .map_err(|e| AppError::CloneFailed(e.to_string()))?;
        let token = self.git.resolved_token();
        if token.is_none() {
            tracing::warn!(repo = %repo.url, "No git token configured, pushing will likely fail");
        }

        let dir = shell_words::quote(&repo.name).into_owned();
        let command = format!(
            "rm -rf {dir} && git clone {} {dir}",
            shell_words::quote(&repo.auth_url(token.as_deref()))
        );
        tracing::info!(repo = %repo.url, dir = %repo.name, "Cloning repository");
        let output = run_with_timeout(sandbox, &command, self.timeout)
            .await
            .map_err(|e| AppError::CloneFailed(redact(&e.to_string(), token.as_deref())))?;
        if !output.success() {
            return Err(AppError::CloneFailed(redact(
                output.combined().trim(),
                token.as_deref(),
            )));
        }

        let reset = format!(
            "cd {dir} && git remote set-url origin {}",
            shell_words::quote(&repo.url)
        );
        match run_with_timeout(sandbox, &reset, self.timeout).await {
            Ok(output) if output.success() => {}
            Ok(output) => tracing::warn!(stderr = %output.stderr.trim(), "Could not reset origin URL"),
            Err(e) => tracing::warn!(error = %e, "Could not reset origin URL"),
        }

        Ok(Workspace {
            path: repo.name.clone(),
            repo,
            token,
        })
    }
}
