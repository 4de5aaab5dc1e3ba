//! Drives one run through the stage machine: provision, clone, generate,
//! validate and revise, publish or save locally, and tear down.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::Instrument;

use crate::agent::{ClaudeCodeGenerator, CodeGenerator};
use crate::config::AppConfig;
use crate::error::Result;
use crate::sandbox::{SandboxHandle, SandboxManager};
use crate::state::{ValidationPhase, WorkflowState};
use crate::validate::Validator;
use crate::workflow::fsm::{transition, Event, Stage};
use crate::workflow::local::LocalArtifactStore;
use crate::workflow::revision::{self, decide};
use crate::workflow::types::{RunOutcome, RunReport, RunRequest};
use crate::workspace::{PublishOutcome, PublishRequest, Publisher, Workspace, WorkspaceManager};

/// Per-run values that live outside [`WorkflowState`].
#[derive(Default)]
struct RunContext {
    workspace: Option<Workspace>,
    /// Packages extracted from the artifact at its latest validation.
    packages: BTreeSet<String>,
}

pub struct Pipeline {
    sandboxes: SandboxManager,
    workspaces: WorkspaceManager,
    generator: Arc<dyn CodeGenerator>,
    validator: Validator,
    publisher: Publisher,
    store: LocalArtifactStore,
    default_max_attempts: u32,
    default_os_url: Option<String>,
}

impl Pipeline {
    pub fn new(
        config: &AppConfig,
        sandboxes: SandboxManager,
        generator: Arc<dyn CodeGenerator>,
    ) -> Self {
        Self {
            sandboxes,
            workspaces: WorkspaceManager::from_config(config),
            generator,
            validator: Validator::from_config(config),
            publisher: Publisher::from_config(config),
            store: LocalArtifactStore::from_config(&config.pipeline),
            default_max_attempts: config.pipeline.max_revision_attempts,
            default_os_url: config.pipeline.os_url.clone(),
        }
    }

    /// Wire the configured sandbox backend and the Claude generator.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let sandboxes = SandboxManager::from_config(&config.sandbox)?;
        let generator = ClaudeCodeGenerator::from_config(config).await?;
        Ok(Self::new(config, sandboxes, Arc::new(generator)))
    }

    /// Execute one run to completion. Setting `cancel` to `true` abandons
    /// the current step; the sandbox is still torn down.
    pub async fn run(
        &self,
        run_id: &str,
        request: RunRequest,
        mut cancel: watch::Receiver<bool>,
    ) -> RunReport {
        let span = tracing::info_span!("run", run_id = %run_id, repo = %request.target_repo);
        async move {
            let mut state = WorkflowState::new(run_id, request, self.default_max_attempts);
            let mut ctx = RunContext::default();
            let mut stage = Stage::Provisioning;
            let mut stages = vec![stage];
            let mut teardowns = 0u32;

            tracing::info!(max_revisions = state.max_revision_attempts, "Run started");

            while !stage.is_terminal() {
                let (next_state, event) = if stage == Stage::TearingDown {
                    teardowns += 1;
                    self.teardown(state).await
                } else {
                    let snapshot = state.clone();
                    tokio::select! {
                        biased;
                        _ = cancelled(&mut cancel) => {
                            tracing::warn!(stage = %stage, "Run cancelled");
                            (snapshot.with_error(format!("Run cancelled during {stage}")), Event::Cancelled)
                        }
                        out = self.step(stage, state, &mut ctx) => out,
                    }
                };
                state = next_state;

                if event == Event::Cancelled && state.local_artifact_path.is_none() {
                    state = self.save_locally(state).await.0;
                }

                stage = match transition(stage, &event) {
                    Ok(next) => next,
                    Err(e) => {
                        tracing::error!(error = %e, "Unroutable event");
                        state = state.with_error(e.to_string());
                        if teardowns == 0 {
                            Stage::TearingDown
                        } else {
                            Stage::Done
                        }
                    }
                };
                tracing::debug!(event = ?event, stage = %stage, "Transition");
                stages.push(stage);
            }

            let outcome = RunOutcome::classify(&state);
            let state = state.with_status(outcome.describe());
            tracing::info!(
                outcome = ?outcome,
                revisions = state.revision_attempts(),
                errors = state.error_log().len(),
                "Run finished"
            );
            RunReport::from_state(&state, stages, teardowns)
        }
        .instrument(span)
        .await
    }

    async fn step(
        &self,
        stage: Stage,
        state: WorkflowState,
        ctx: &mut RunContext,
    ) -> (WorkflowState, Event) {
        match stage {
            Stage::Provisioning => self.provision(state).await,
            Stage::Cloning => self.clone_repo(state, ctx).await,
            Stage::Generating => self.generate(state).await,
            Stage::ValidatingPhase1 => self.validate_phase1(state, ctx).await,
            Stage::ValidatingPhase2 => self.validate_phase2(state, ctx).await,
            Stage::Revising => revision::revise(state, self.generator.as_ref()).await,
            Stage::Publishing => self.publish(state, ctx).await,
            Stage::LocalOnly => self.save_locally(state).await,
            Stage::TearingDown => self.teardown(state).await,
            Stage::Done => (state, Event::TornDown),
        }
    }

    async fn provision(&self, state: WorkflowState) -> (WorkflowState, Event) {
        match self.sandboxes.provision().await {
            Ok(sandbox) => (
                state.with_sandbox(sandbox).with_status("Sandbox ready"),
                Event::Provisioned,
            ),
            Err(e) => {
                tracing::error!(error = %e, "Provisioning failed");
                (state.with_error(e.to_string()), Event::ProvisionFailed)
            }
        }
    }

    async fn clone_repo(&self, state: WorkflowState, ctx: &mut RunContext) -> (WorkflowState, Event) {
        let Some(sandbox) = state.sandbox.clone() else {
            return (state.with_error("No sandbox to clone into"), Event::CloneFailed);
        };
        match self
            .workspaces
            .setup(sandbox.as_ref(), &state.request.target_repo)
            .await
        {
            Ok(workspace) => {
                let state = state
                    .with_repo_path(workspace.path.clone())
                    .with_status(format!("Cloned {}", workspace.repo.url));
                ctx.workspace = Some(workspace);
                (state, Event::Cloned)
            }
            Err(e) => {
                tracing::error!(error = %e, "Clone failed");
                (state.with_error(e.to_string()), Event::CloneFailed)
            }
        }
    }

    async fn generate(&self, state: WorkflowState) -> (WorkflowState, Event) {
        let os_url = state
            .request
            .os_url
            .clone()
            .or_else(|| self.default_os_url.clone());
        tracing::info!("Generating artifact");
        match self
            .generator
            .generate(&state.request.spec, os_url.as_deref())
            .await
        {
            Ok(artifact) => {
                tracing::info!(bytes = artifact.len(), "Artifact generated");
                (
                    state.with_artifact(artifact).with_status("Artifact generated"),
                    Event::Generated,
                )
            }
            Err(e) => {
                tracing::error!(error = %e, "Generation failed");
                (state.with_error(e.to_string()), Event::GenerationFailed)
            }
        }
    }

    /// Record a failed validation attempt: one error-log entry per attempt.
    fn record_failure(state: WorkflowState) -> WorkflowState {
        let entry = state
            .execution
            .failure
            .as_ref()
            .map(|f| format!("attempt {}: {f}", state.revision_attempts()));
        match entry {
            Some(entry) => state.with_error(entry),
            None => state,
        }
    }

    fn live(state: &WorkflowState) -> Option<(SandboxHandle, String)> {
        Some((state.sandbox.clone()?, state.artifact.clone()?))
    }

    async fn validate_phase1(&self, state: WorkflowState, ctx: &mut RunContext) -> (WorkflowState, Event) {
        let Some((sandbox, artifact)) = Self::live(&state) else {
            let state = state.with_error("Nothing to validate");
            return (state, Event::Decided(revision::Decision::GiveUp));
        };

        let (execution, packages, install) =
            self.validator.phase1(sandbox.as_ref(), &artifact).await;
        ctx.packages = packages;
        let summary = install.summary();
        let state = state.with_install(install);

        if execution.successful {
            tracing::info!(install = %summary, "Phase 1 passed");
            let state = state
                .with_validation(execution, ValidationPhase::ExecutionPassed)
                .with_status(format!("Execution check passed, {summary}"));
            return (state, Event::Phase1Passed);
        }

        let state = Self::record_failure(
            state.with_validation(execution, ValidationPhase::ExecutionFailed),
        );
        let decision = decide(&state);
        tracing::info!(decision = ?decision, "Phase 1 failed");
        (state, Event::Decided(decision))
    }

    async fn validate_phase2(&self, state: WorkflowState, ctx: &mut RunContext) -> (WorkflowState, Event) {
        let (Some((sandbox, artifact)), Some(workspace)) = (Self::live(&state), ctx.workspace.as_ref())
        else {
            let state = state.with_error("Nothing to validate");
            return (state, Event::Decided(revision::Decision::GiveUp));
        };

        let (execution, phase) = self
            .validator
            .phase2(sandbox.as_ref(), &workspace.path, &artifact)
            .await;
        let state = state.with_validation(execution, phase);

        match phase {
            ValidationPhase::SetupFailed => {
                tracing::warn!("Dev server setup failed, artifact will not be published");
                let message = state.execution.output.clone();
                (state.with_error(message), Event::Phase2Degraded)
            }
            ValidationPhase::DevServerFailed => {
                let state = Self::record_failure(state);
                let decision = decide(&state);
                tracing::info!(decision = ?decision, "Phase 2 failed");
                (state, Event::Decided(decision))
            }
            _ => {
                tracing::info!("Phase 2 passed");
                let decision = decide(&state);
                (state.with_status("Dev server check passed"), Event::Decided(decision))
            }
        }
    }

    async fn publish(&self, state: WorkflowState, ctx: &mut RunContext) -> (WorkflowState, Event) {
        let (Some((sandbox, artifact)), Some(workspace)) = (Self::live(&state), ctx.workspace.as_ref())
        else {
            return (state.with_error("Nothing to publish"), Event::PublishFailed);
        };

        let request = PublishRequest {
            branch: state.request.branch_name.as_deref(),
            artifact: &artifact,
            packages: &ctx.packages,
            spec: &state.request.spec,
            execution_output: &state.execution.output,
        };
        let result = self
            .publisher
            .publish(sandbox.as_ref(), workspace, self.generator.as_ref(), &request)
            .await;

        let state = match result {
            Ok(PublishOutcome::Pushed {
                branch,
                commit_message,
                forced,
            }) => state
                .with_branch(branch.clone())
                .with_commit(commit_message)
                .with_published(forced)
                .with_status(format!("Published to {branch}")),
            Ok(PublishOutcome::NoChanges { branch }) => state
                .with_branch(branch.clone())
                .with_status(format!("No changes detected in branch: {branch}")),
            Err(e) => {
                tracing::error!(error = %e, "Publishing failed");
                return (state.with_error(format!("publish: {e}")), Event::PublishFailed);
            }
        };

        let state = if state.request.download {
            self.store_artifact(state, &artifact).await
        } else {
            state
        };
        (state, Event::Published)
    }

    async fn store_artifact(&self, state: WorkflowState, artifact: &str) -> WorkflowState {
        match self.store.save(&state.run_id, artifact).await {
            Ok(path) => state.with_local_artifact(path),
            Err(e) => {
                tracing::error!(error = %e, "Could not save artifact locally");
                state.with_error(format!("local save: {e}"))
            }
        }
    }

    async fn save_locally(&self, state: WorkflowState) -> (WorkflowState, Event) {
        let state = match state.artifact.clone() {
            Some(artifact) => self.store_artifact(state, &artifact).await,
            None => state,
        };
        (state, Event::Saved)
    }

    async fn teardown(&self, state: WorkflowState) -> (WorkflowState, Event) {
        if let Some(sandbox) = state.sandbox.clone() {
            self.sandboxes.teardown(sandbox).await;
        }
        (state.without_sandbox(), Event::TornDown)
    }
}

/// Resolves once cancellation is requested. Never resolves if the sender
/// is dropped without cancelling.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
