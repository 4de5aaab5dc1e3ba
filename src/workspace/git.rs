//! Shell-level git inside the sandbox working copy.
//!
//! Credentials only ever appear in the URL passed to clone, pull and push;
//! every logged command line and surfaced error has the token redacted.

use std::time::Duration;

use crate::error::{AppError, Result};
use crate::sandbox::{run_with_timeout, CommandOutput, Sandbox};
use crate::workspace::repo::redact;
use crate::workspace::Workspace;

/// Validate a branch name to prevent argument injection.
/// Rejects names starting with `-` as defence in depth.
pub fn validate_branch_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(AppError::Git("Branch name is empty".to_string()));
    }
    if name.starts_with('-') {
        return Err(AppError::Git(format!(
            "Invalid branch name (starts with '-'): {name}"
        )));
    }
    Ok(())
}

pub struct GitCommands<'a> {
    sandbox: &'a dyn Sandbox,
    workspace: &'a Workspace,
    timeout: Duration,
}

impl<'a> GitCommands<'a> {
    pub fn new(sandbox: &'a dyn Sandbox, workspace: &'a Workspace, timeout: Duration) -> Self {
        Self {
            sandbox,
            workspace,
            timeout,
        }
    }

    fn token(&self) -> Option<&str> {
        self.workspace.token.as_deref()
    }

    fn auth_url(&self) -> String {
        self.workspace.repo.auth_url(self.token())
    }

    /// Run `script` from the working-copy root. A non-zero exit is returned,
    /// not raised.
    async fn shell(&self, script: &str) -> Result<CommandOutput> {
        let command = format!("cd {} && {script}", shell_words::quote(&self.workspace.path));
        tracing::debug!(command = %redact(&command, self.token()), "git");
        run_with_timeout(self.sandbox, &command, self.timeout)
            .await
            .map_err(|e| AppError::Git(redact(&e.to_string(), self.token())))
    }

    async fn git(&self, args: &str) -> Result<CommandOutput> {
        self.shell(&format!("git {args}")).await
    }

    /// Like [`Self::git`], but a non-zero exit becomes an error.
    async fn git_checked(&self, args: &str, what: &str) -> Result<CommandOutput> {
        let output = self.git(args).await?;
        if !output.success() {
            return Err(AppError::Git(format!(
                "{what} failed: {}",
                redact(output.combined().trim(), self.token())
            )));
        }
        Ok(output)
    }

    /// Idempotent.
    pub async fn configure_identity(&self, name: &str, email: &str) -> Result<()> {
        self.git_checked(
            &format!("config user.email {}", shell_words::quote(email)),
            "Setting user.email",
        )
        .await?;
        self.git_checked(
            &format!("config user.name {}", shell_words::quote(name)),
            "Setting user.name",
        )
        .await?;
        self.git_checked("config pull.rebase false", "Setting pull.rebase")
            .await?;
        Ok(())
    }

    /// Check out `branch`, creating it from HEAD when it does not exist.
    pub async fn checkout_or_create(&self, branch: &str) -> Result<()> {
        validate_branch_name(branch)?;
        let branch = shell_words::quote(branch);
        self.git_checked(
            &format!("checkout {branch} 2>/dev/null || git checkout -b {branch}"),
            "Checkout",
        )
        .await?;
        Ok(())
    }

    pub async fn status_porcelain(&self) -> Result<String> {
        let output = self.git_checked("status --porcelain", "Status").await?;
        Ok(output.stdout)
    }

    pub async fn add(&self, paths: &[&str]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        self.git_checked(&format!("add -- {}", shell_words::join(paths)), "Add")
            .await?;
        Ok(())
    }

    pub async fn commit(&self, message: &str) -> Result<()> {
        self.git_checked(&format!("commit -m {}", shell_words::quote(message)), "Commit")
            .await?;
        Ok(())
    }

    pub async fn amend(&self, message: &str) -> Result<()> {
        self.git_checked(
            &format!("commit --amend -m {}", shell_words::quote(message)),
            "Amend",
        )
        .await?;
        Ok(())
    }

    /// Merge the remote branch into the current one. The raw output is
    /// returned so the caller can tell a missing remote branch from a
    /// conflict.
    pub async fn pull(&self, branch: &str, prefer_ours: bool) -> Result<CommandOutput> {
        validate_branch_name(branch)?;
        let strategy = if prefer_ours { " --strategy=ours" } else { "" };
        let output = self
            .git(&format!(
                "pull --no-rebase --no-edit{strategy} {} {}",
                shell_words::quote(&self.auth_url()),
                shell_words::quote(branch)
            ))
            .await?;
        Ok(CommandOutput {
            exit_code: output.exit_code,
            stdout: redact(&output.stdout, self.token()),
            stderr: redact(&output.stderr, self.token()),
        })
    }

    pub async fn merge_in_progress(&self) -> Result<bool> {
        Ok(self.shell("test -f .git/MERGE_HEAD").await?.success())
    }

    pub async fn has_staged_changes(&self) -> Result<bool> {
        Ok(!self.git("diff --cached --quiet").await?.success())
    }

    pub async fn push(&self, branch: &str, force: bool) -> Result<()> {
        validate_branch_name(branch)?;
        let force = if force { " --force" } else { "" };
        self.git_checked(
            &format!(
                "push{force} {} {}",
                shell_words::quote(&self.auth_url()),
                shell_words::quote(branch)
            ),
            "Push",
        )
        .await?;
        Ok(())
    }
}
