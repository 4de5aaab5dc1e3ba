//! The record threaded through every pipeline step.
//!
//! Steps take a [`WorkflowState`] by value and hand back an updated one, so a
//! transition can be inspected (or replayed in a test) without any shared
//! mutable state.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::sandbox::SandboxHandle;
use crate::validate::InstallReport;
use crate::workflow::types::RunRequest;

/// Sub-category of a dev-server failure, taken from the first negative
/// marker found in the server output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DevServerFailure {
    Compilation,
    MissingExport,
    Schema,
    MissingDependency,
    Startup,
}

impl fmt::Display for DevServerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DevServerFailure::Compilation => "Graph compilation failed",
            DevServerFailure::MissingExport => "Graph export missing",
            DevServerFailure::Schema => "State schema error",
            DevServerFailure::MissingDependency => "Missing dependencies",
            DevServerFailure::Startup => "Dev server startup failed",
        };
        f.write_str(label)
    }
}

/// Which validation phase produced a failure. Selects the repair prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "category")]
pub enum ErrorKind {
    Execution,
    DevServer(DevServerFailure),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Execution => f.write_str("execution"),
            ErrorKind::DevServer(_) => f.write_str("devserver"),
        }
    }
}

/// The latest single failure; the only error context a revision sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub kind: ErrorKind,
    pub name: String,
    pub detail: String,
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.name, self.detail)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub successful: bool,
    pub output: String,
    pub failure: Option<FailureRecord>,
}

impl ExecutionResult {
    pub fn passed(output: impl Into<String>) -> Self {
        Self {
            successful: true,
            output: output.into(),
            failure: None,
        }
    }

    pub fn failed(output: impl Into<String>, failure: FailureRecord) -> Self {
        Self {
            successful: false,
            output: output.into(),
            failure: Some(failure),
        }
    }
}

/// Last phase that ran and how it ended. Tracked apart from
/// [`ExecutionResult`] because a first-phase pass says nothing about the
/// second phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPhase {
    #[default]
    NotStarted,
    ExecutionFailed,
    ExecutionPassed,
    /// The second phase could not be set up. The artifact itself passed.
    SetupFailed,
    DevServerFailed,
    DevServerPassed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GitMeta {
    pub branch: Option<String>,
    pub commit_message: Option<String>,
    pub pushed: bool,
    /// The push only went through with `--force`.
    pub forced: bool,
}

#[derive(Clone)]
pub struct WorkflowState {
    pub run_id: String,
    pub request: RunRequest,
    pub max_revision_attempts: u32,
    pub sandbox: Option<SandboxHandle>,
    pub repo_path: Option<String>,
    pub artifact: Option<String>,
    pub execution: ExecutionResult,
    pub validation_phase: ValidationPhase,
    /// Dependency install of the latest first-phase run.
    pub install: InstallReport,
    pub git: GitMeta,
    pub local_artifact_path: Option<PathBuf>,
    pub status: String,
    revision_attempts: u32,
    error_log: Vec<String>,
}

impl fmt::Debug for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowState")
            .field("run_id", &self.run_id)
            .field("sandbox", &self.sandbox.as_ref().map(|s| s.id().to_string()))
            .field("repo_path", &self.repo_path)
            .field("artifact_len", &self.artifact.as_ref().map(String::len))
            .field("execution", &self.execution)
            .field("validation_phase", &self.validation_phase)
            .field("install", &self.install)
            .field("revision_attempts", &self.revision_attempts)
            .field("max_revision_attempts", &self.max_revision_attempts)
            .field("git", &self.git)
            .field("error_log", &self.error_log)
            .field("status", &self.status)
            .finish()
    }
}

impl WorkflowState {
    pub fn new(run_id: impl Into<String>, request: RunRequest, default_max_attempts: u32) -> Self {
        let max_revision_attempts = request.max_revision_attempts.unwrap_or(default_max_attempts);
        Self {
            run_id: run_id.into(),
            request,
            max_revision_attempts,
            sandbox: None,
            repo_path: None,
            artifact: None,
            execution: ExecutionResult::default(),
            validation_phase: ValidationPhase::NotStarted,
            install: InstallReport::default(),
            git: GitMeta::default(),
            local_artifact_path: None,
            status: "Created".to_string(),
            revision_attempts: 0,
            error_log: Vec::new(),
        }
    }

    pub fn revision_attempts(&self) -> u32 {
        self.revision_attempts
    }

    pub fn error_log(&self) -> &[String] {
        &self.error_log
    }

    pub fn can_revise(&self) -> bool {
        self.revision_attempts < self.max_revision_attempts
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    /// Append a failure to the log. The log is never cleared.
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.status = message.clone();
        self.error_log.push(message);
        self
    }

    pub fn with_sandbox(mut self, sandbox: SandboxHandle) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn without_sandbox(mut self) -> Self {
        self.sandbox = None;
        self
    }

    pub fn with_repo_path(mut self, repo_path: impl Into<String>) -> Self {
        self.repo_path = Some(repo_path.into());
        self
    }

    /// Replace the candidate wholesale.
    pub fn with_artifact(mut self, artifact: String) -> Self {
        self.artifact = Some(artifact);
        self
    }

    pub fn with_validation(mut self, execution: ExecutionResult, phase: ValidationPhase) -> Self {
        self.execution = execution;
        self.validation_phase = phase;
        self
    }

    pub fn with_install(mut self, install: InstallReport) -> Self {
        self.install = install;
        self
    }

    /// Count one revision. Saturates at the configured maximum.
    pub fn with_revision_attempt(mut self) -> Self {
        debug_assert!(self.can_revise(), "revision attempted past the limit");
        if self.can_revise() {
            self.revision_attempts += 1;
        }
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.git.branch = Some(branch.into());
        self
    }

    pub fn with_commit(mut self, message: impl Into<String>) -> Self {
        self.git.commit_message = Some(message.into());
        self
    }

    /// Mark the branch as pushed. Ignored unless a commit was recorded.
    pub fn with_published(mut self, forced: bool) -> Self {
        if self.git.commit_message.is_some() {
            self.git.pushed = true;
            self.git.forced = forced;
        }
        self
    }

    pub fn with_local_artifact(mut self, path: PathBuf) -> Self {
        self.local_artifact_path = Some(path);
        self
    }
}
