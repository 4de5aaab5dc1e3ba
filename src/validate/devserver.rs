//! Phase 2: boot the framework's development server against the candidate
//! and read its output for startup and failure markers.

use std::time::Duration;

use crate::agent::prompt::tail_chars;
use crate::config::FrameworkConfig;
use crate::error::{AppError, Result};
use crate::sandbox::{run_with_timeout, Sandbox};
use crate::state::{DevServerFailure, ErrorKind, ExecutionResult, FailureRecord, ValidationPhase};
use crate::validate::MAX_DETAIL_CHARS;

const POSITIVE_MARKERS: &[&str] = &[
    "server started in",
    "🚀 api:",
    "registering graph with id",
    "welcome to",
    "server running",
    "listening on",
    "application startup complete",
];

/// Checked in order; specific categories precede the generic ones.
const NEGATIVE_MARKERS: &[(&str, DevServerFailure)] = &[
    ("graph compilation failed", DevServerFailure::Compilation),
    ("compilation failed", DevServerFailure::Compilation),
    ("missing graph", DevServerFailure::MissingExport),
    ("graph 'graph' not found", DevServerFailure::MissingExport),
    ("state schema error", DevServerFailure::Schema),
    ("invalid state", DevServerFailure::Schema),
    ("modulenotfounderror", DevServerFailure::MissingDependency),
    ("module not found", DevServerFailure::MissingDependency),
    ("failed to start", DevServerFailure::Startup),
    ("traceback", DevServerFailure::Startup),
    ("error:", DevServerFailure::Startup),
];

/// Grace period on top of the in-sandbox `timeout` before the call itself
/// is abandoned.
const OUTER_TIMEOUT_SLACK: Duration = Duration::from_secs(30);

/// The framework config file pointing the dev server at the artifact.
pub fn render_framework_config(framework: &FrameworkConfig) -> Result<String> {
    let entry = format!("./{}:{}", framework.artifact_path, framework.graph_name);
    let config = serde_json::json!({
        "dependencies": ["./"],
        "graphs": { "agent": entry },
        "env": framework.env_path,
        "image_distro": "wolfi",
    });
    Ok(serde_json::to_string_pretty(&config)?)
}

/// `KEY=value` lines for every configured key set in the local environment.
pub fn render_env_file(framework: &FrameworkConfig) -> String {
    render_env_with(framework, |key| std::env::var(key).ok())
}

fn render_env_with<F>(framework: &FrameworkConfig, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    framework
        .env_keys
        .iter()
        .filter_map(|key| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .map(|value| format!("{key}={value}\n"))
        })
        .collect()
}

fn failure(category: DevServerFailure, output: &str) -> ExecutionResult {
    ExecutionResult::failed(
        output.to_string(),
        FailureRecord {
            kind: ErrorKind::DevServer(category),
            name: category.to_string(),
            detail: tail_chars(output.trim(), MAX_DETAIL_CHARS).to_string(),
        },
    )
}

/// Judge dev-server output: a positive marker and no negative marker.
pub fn classify(output: &str) -> ExecutionResult {
    let lower = output.to_lowercase();

    if let Some((_, category)) = NEGATIVE_MARKERS
        .iter()
        .find(|(marker, _)| lower.contains(marker))
    {
        return failure(*category, output);
    }

    if POSITIVE_MARKERS.iter().any(|marker| lower.contains(marker)) {
        ExecutionResult::passed(output.to_string())
    } else {
        failure(DevServerFailure::Startup, output)
    }
}

fn repo_file(repo_path: &str, relative: &str) -> String {
    format!("{}/{}", repo_path.trim_end_matches('/'), relative)
}

/// Files the dev server needs beside the artifact. Any failure here is an
/// environment problem, not a fault of the candidate.
async fn write_runtime_config(
    sandbox: &dyn Sandbox,
    repo_path: &str,
    framework: &FrameworkConfig,
) -> Result<()> {
    let config = render_framework_config(framework)?;
    sandbox
        .write_file(&repo_file(repo_path, &framework.config_path), config.as_bytes())
        .await?;
    let env = render_env_file(framework);
    sandbox
        .write_file(&repo_file(repo_path, &framework.env_path), env.as_bytes())
        .await?;
    Ok(())
}

async fn write_package(
    sandbox: &dyn Sandbox,
    repo_path: &str,
    artifact: &str,
    framework: &FrameworkConfig,
) -> Result<()> {
    sandbox
        .write_file(
            &repo_file(repo_path, &framework.init_path),
            framework.init_content.as_bytes(),
        )
        .await?;
    sandbox
        .write_file(&repo_file(repo_path, &framework.artifact_path), artifact.as_bytes())
        .await
}

/// First port in the probe range that nothing is listening on.
async fn find_free_port(sandbox: &dyn Sandbox, framework: &FrameworkConfig) -> u16 {
    let start = framework.default_port;
    let end = start.saturating_add(framework.port_probe_span);
    for port in start..end {
        match sandbox.run(&format!("netstat -an | grep :{port}")).await {
            Ok(output) if !output.success() => return port,
            Ok(_) => tracing::debug!(port, "Port in use"),
            Err(e) => tracing::debug!(port, error = %e, "Port probe failed"),
        }
    }
    tracing::warn!(port = start, "No free port found, using default");
    start
}

/// Run the second phase. Returns the result together with the phase it
/// ended in, which is [`ValidationPhase::SetupFailed`] when the runtime
/// configuration could not be written.
pub async fn smoke_test(
    sandbox: &dyn Sandbox,
    repo_path: &str,
    artifact: &str,
    framework: &FrameworkConfig,
    command_timeout: Duration,
) -> (ExecutionResult, ValidationPhase) {
    if let Err(e) = write_runtime_config(sandbox, repo_path, framework).await {
        tracing::warn!(error = %e, "Dev server configuration could not be written");
        return (
            ExecutionResult::passed(format!("dev server setup failed: {e}")),
            ValidationPhase::SetupFailed,
        );
    }

    match run_with_timeout(sandbox, &framework.cli_install_command, command_timeout).await {
        Ok(output) if output.success() => tracing::debug!("Framework CLI installed"),
        Ok(output) => tracing::warn!(stderr = %output.stderr.trim(), "Framework CLI install failed"),
        Err(e) => tracing::warn!(error = %e, "Framework CLI install failed"),
    }

    if let Err(e) = write_package(sandbox, repo_path, artifact, framework).await {
        tracing::warn!(error = %e, "Artifact could not be placed in the working copy");
        return (
            ExecutionResult::passed(format!("dev server setup failed: {e}")),
            ValidationPhase::SetupFailed,
        );
    }

    let port = find_free_port(sandbox, framework).await;
    let dev_command = framework.dev_command.replace("{port}", &port.to_string());
    let command = format!(
        "cd {} && timeout {}s {} 2>&1 || true",
        shell_words::quote(repo_path),
        framework.dev_server_timeout_secs,
        dev_command
    );
    let deadline = Duration::from_secs(framework.dev_server_timeout_secs) + OUTER_TIMEOUT_SLACK;

    tracing::info!(port, timeout_secs = framework.dev_server_timeout_secs, "Starting dev server");
    let result = match run_with_timeout(sandbox, &command, deadline).await {
        Ok(output) => classify(&output.combined()),
        Err(AppError::Timeout(msg)) => failure(DevServerFailure::Startup, &msg),
        Err(e) => failure(DevServerFailure::Startup, &e.to_string()),
    };

    let phase = if result.successful {
        tracing::info!(port, "Dev server started cleanly");
        ValidationPhase::DevServerPassed
    } else {
        if let Some(f) = &result.failure {
            tracing::info!(category = %f.name, "Dev server check failed");
        }
        ValidationPhase::DevServerFailed
    };
    (result, phase)
}
