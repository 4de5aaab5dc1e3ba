use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::state::{ExecutionResult, GitMeta, ValidationPhase, WorkflowState};
use crate::validate::InstallReport;
use crate::workflow::fsm::Stage;

/// Inputs of one run. Immutable for the lifetime of the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    /// Domain-specific workflow specification, passed through to generation.
    pub spec: serde_json::Value,
    /// `owner/repo` or an `https://` clone URL.
    pub target_repo: String,
    #[serde(default)]
    pub branch_name: Option<String>,
    #[serde(default)]
    pub max_revision_attempts: Option<u32>,
    /// Also keep a local copy of the artifact on the success path.
    #[serde(default)]
    pub download: bool,
    /// Remote-control endpoint embedded into the generated artifact.
    #[serde(default)]
    pub os_url: Option<String>,
}

impl RunRequest {
    pub fn new(spec: serde_json::Value, target_repo: impl Into<String>) -> Self {
        Self {
            spec,
            target_repo: target_repo.into(),
            branch_name: None,
            max_revision_attempts: None,
            download: false,
            os_url: None,
        }
    }
}

/// User-visible result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Validated and published.
    Published,
    /// Validated, not published.
    ValidatedOnly,
    /// Never validated. Whatever artifact exists was saved locally.
    Failed,
}

impl RunOutcome {
    /// Only a finished second phase counts as validated. A first-phase pass
    /// alone, as left behind by a cancelled run, is a failure.
    pub fn classify(state: &WorkflowState) -> Self {
        let validated = state.execution.successful
            && matches!(
                state.validation_phase,
                ValidationPhase::DevServerPassed | ValidationPhase::SetupFailed
            );
        match (validated, state.git.pushed) {
            (true, true) => RunOutcome::Published,
            (true, false) => RunOutcome::ValidatedOnly,
            (false, _) => RunOutcome::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, RunOutcome::Failed)
    }

    pub fn describe(&self) -> &'static str {
        match self {
            RunOutcome::Published => "Workflow completed successfully with git operations",
            RunOutcome::ValidatedOnly => "Workflow completed successfully (not published)",
            RunOutcome::Failed => "Workflow failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub outcome: RunOutcome,
    pub status: String,
    pub revision_attempts: u32,
    pub max_revision_attempts: u32,
    pub validation_phase: ValidationPhase,
    pub execution: ExecutionResult,
    pub install: InstallReport,
    pub git: GitMeta,
    pub local_artifact_path: Option<PathBuf>,
    pub error_log: Vec<String>,
    pub stages: Vec<Stage>,
    pub teardowns: u32,
}

impl RunReport {
    pub fn from_state(state: &WorkflowState, stages: Vec<Stage>, teardowns: u32) -> Self {
        let outcome = RunOutcome::classify(state);
        Self {
            run_id: state.run_id.clone(),
            outcome,
            status: state.status.clone(),
            revision_attempts: state.revision_attempts(),
            max_revision_attempts: state.max_revision_attempts,
            validation_phase: state.validation_phase,
            execution: state.execution.clone(),
            install: state.install.clone(),
            git: state.git.clone(),
            local_artifact_path: state.local_artifact_path.clone(),
            error_log: state.error_log().to_vec(),
            stages,
            teardowns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: RunRequest = serde_json::from_value(serde_json::json!({
            "spec": {"workflow": "invoice"},
            "target_repo": "acme/agents"
        }))
        .unwrap();
        assert_eq!(request.target_repo, "acme/agents");
        assert!(request.branch_name.is_none());
        assert!(!request.download);
    }

    #[test]
    fn test_outcome_classification() {
        let request = RunRequest::new(serde_json::json!({}), "acme/agents");
        let state = WorkflowState::new("r", request, 3);
        assert_eq!(RunOutcome::classify(&state), RunOutcome::Failed);

        let state = state.with_validation(
            ExecutionResult::passed("ok"),
            ValidationPhase::DevServerPassed,
        );
        assert_eq!(RunOutcome::classify(&state), RunOutcome::ValidatedOnly);

        let state = state.with_commit("feat: x").with_published(false);
        assert_eq!(RunOutcome::classify(&state), RunOutcome::Published);
        assert!(RunOutcome::Published.is_success());
    }

    #[test]
    fn test_first_phase_pass_alone_is_not_validated() {
        let request = RunRequest::new(serde_json::json!({}), "acme/agents");
        let state = WorkflowState::new("r", request, 3).with_validation(
            ExecutionResult::passed("built"),
            ValidationPhase::ExecutionPassed,
        );
        assert_eq!(RunOutcome::classify(&state), RunOutcome::Failed);
        assert!(!RunOutcome::classify(&state).is_success());

        let degraded = state.with_validation(
            ExecutionResult::passed("dev server setup failed: disk full"),
            ValidationPhase::SetupFailed,
        );
        assert_eq!(RunOutcome::classify(&degraded), RunOutcome::ValidatedOnly);
    }
}
