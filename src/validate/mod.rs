//! Two-phase validation of a generated artifact.
//!
//! Phase 1 installs the artifact's imports and runs it as a script. Only
//! when that passes does phase 2 boot the framework dev server against it.

pub mod deps;
pub mod devserver;
pub mod execution;
pub mod install;

use std::collections::BTreeSet;
use std::time::Duration;

use crate::config::{AppConfig, FrameworkConfig};
use crate::sandbox::Sandbox;
use crate::state::{ExecutionResult, ValidationPhase};

pub use deps::extract_packages;
pub use install::InstallReport;

/// Longest failure detail kept in a [`crate::state::FailureRecord`].
pub(crate) const MAX_DETAIL_CHARS: usize = 500;

pub struct Validator {
    framework: FrameworkConfig,
    command_timeout: Duration,
}

impl Validator {
    pub fn new(framework: FrameworkConfig, command_timeout: Duration) -> Self {
        Self {
            framework,
            command_timeout,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.framework.clone(),
            Duration::from_secs(config.sandbox.command_timeout_secs),
        )
    }

    /// Install the artifact's imports and execute it.
    pub async fn phase1(
        &self,
        sandbox: &dyn Sandbox,
        artifact: &str,
    ) -> (ExecutionResult, BTreeSet<String>, InstallReport) {
        let packages = extract_packages(artifact);
        tracing::info!(count = packages.len(), "Extracted dependencies");
        let install = install::install_packages(sandbox, &packages, self.command_timeout).await;
        if !install.succeeded() {
            tracing::warn!(failed = ?install.failed, "No dependency could be installed, executing anyway");
        }
        let result =
            execution::run_candidate(sandbox, artifact, &self.framework, self.command_timeout)
                .await;
        (result, packages, install)
    }

    pub async fn phase2(
        &self,
        sandbox: &dyn Sandbox,
        repo_path: &str,
        artifact: &str,
    ) -> (ExecutionResult, ValidationPhase) {
        devserver::smoke_test(
            sandbox,
            repo_path,
            artifact,
            &self.framework,
            self.command_timeout,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::CommandOutput;
    use crate::state::{DevServerFailure, ErrorKind};
    use crate::testing::ScriptedSandbox;

    const ARTIFACT: &str = "import httpx\nfrom langgraph.graph import StateGraph\ngraph = StateGraph(dict).compile()\n";

    fn validator() -> Validator {
        let framework = FrameworkConfig {
            dev_server_timeout_secs: 1,
            ..FrameworkConfig::default()
        };
        Validator::new(framework, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_phase1_failure_reports_error_line() {
        let sandbox = ScriptedSandbox::new();
        sandbox.on(
            "python3",
            CommandOutput::failed(1, "Traceback\nNameError: name 'x' is not defined"),
        );

        let (execution, packages, install) = validator().phase1(&sandbox, ARTIFACT).await;
        assert!(!execution.successful);
        assert_eq!(execution.failure.unwrap().name, "NameError");
        assert!(sandbox.ran("pip install httpx langgraph"));
        assert_eq!(packages.into_iter().collect::<Vec<_>>(), ["httpx", "langgraph"]);
        assert!(install.batch_succeeded);
        assert!(!sandbox.ran("langgraph dev"));
    }

    #[tokio::test]
    async fn test_phase2_passes_on_startup_marker() {
        let sandbox = ScriptedSandbox::new();
        sandbox.on("netstat", CommandOutput::failed(1, ""));
        sandbox.on("langgraph dev", CommandOutput::ok("Server started in 0.8s"));

        let (execution, phase) = validator().phase2(&sandbox, "agents", ARTIFACT).await;
        assert!(execution.successful);
        assert_eq!(phase, ValidationPhase::DevServerPassed);
        assert_eq!(sandbox.file("agents/src/agent/graph.py").as_deref(), Some(ARTIFACT));
    }

    #[tokio::test]
    async fn test_phase2_failure_is_devserver_kind() {
        let sandbox = ScriptedSandbox::new();
        sandbox.on("netstat", CommandOutput::failed(1, ""));
        sandbox.on("langgraph dev", CommandOutput::ok("missing graph export"));

        let (execution, phase) = validator().phase2(&sandbox, "agents", ARTIFACT).await;
        assert!(!execution.successful);
        assert_eq!(phase, ValidationPhase::DevServerFailed);
        assert_eq!(
            execution.failure.unwrap().kind,
            ErrorKind::DevServer(DevServerFailure::MissingExport)
        );
    }

    #[tokio::test]
    async fn test_install_failure_does_not_block_execution() {
        let sandbox = ScriptedSandbox::new();
        sandbox.on("pip install", CommandOutput::failed(1, "offline"));

        let (execution, _, install) = validator().phase1(&sandbox, ARTIFACT).await;
        assert!(!install.succeeded());
        assert!(sandbox.ran("python3"));
        assert!(execution.successful);
    }
}
