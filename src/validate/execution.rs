//! Phase 1: run the candidate as a plain script.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::agent::prompt::tail_chars;
use crate::config::FrameworkConfig;
use crate::error::AppError;
use crate::sandbox::{run_with_timeout, CommandOutput, Sandbox};
use crate::state::{ErrorKind, ExecutionResult, FailureRecord};
use crate::validate::MAX_DETAIL_CHARS;

/// `SomeError: message` or `pkg.mod.SomeError: message` at the start of a
/// line, the shape of a traceback's final line.
static ERROR_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[A-Za-z_][A-Za-z0-9_]*\.)*([A-Za-z_][A-Za-z0-9_]*(?:Error|Exception)):\s*(.*)$")
        .expect("Valid regex pattern")
});

/// True when the diagnostic stream carries anything error-shaped.
fn stderr_reports_error(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("error") || lower.contains("traceback")
}

/// Name and message of the last exception line in `stderr`.
fn parse_error(stderr: &str) -> (String, String) {
    let parsed = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find_map(|line| {
            ERROR_LINE.captures(line).map(|caps| {
                let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                let message = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
                (name.to_string(), message.to_string())
            })
        });

    match parsed {
        Some((name, message)) if !message.is_empty() => (name, message),
        Some((name, _)) => (name, tail_chars(stderr.trim(), MAX_DETAIL_CHARS).to_string()),
        None => (
            "ExecutionError".to_string(),
            tail_chars(stderr.trim(), MAX_DETAIL_CHARS).to_string(),
        ),
    }
}

/// Judge a finished run of the candidate.
pub fn classify(output: &CommandOutput) -> ExecutionResult {
    if output.success() && !stderr_reports_error(&output.stderr) {
        return ExecutionResult::passed(output.stdout.clone());
    }

    let (name, detail) = if output.stderr.trim().is_empty() {
        (
            "ExecutionError".to_string(),
            format!("process exited with status {}", output.exit_code),
        )
    } else {
        parse_error(&output.stderr)
    };
    ExecutionResult::failed(
        output.combined(),
        FailureRecord {
            kind: ErrorKind::Execution,
            name,
            detail: tail_chars(&detail, MAX_DETAIL_CHARS).to_string(),
        },
    )
}

fn sandbox_failure(name: &str, detail: String) -> ExecutionResult {
    ExecutionResult::failed(
        String::new(),
        FailureRecord {
            kind: ErrorKind::Execution,
            name: name.to_string(),
            detail,
        },
    )
}

/// Write `artifact` to the scratch path and execute it.
pub async fn run_candidate(
    sandbox: &dyn Sandbox,
    artifact: &str,
    framework: &FrameworkConfig,
    timeout: Duration,
) -> ExecutionResult {
    let path = &framework.scratch_path;
    if let Err(e) = sandbox.write_file(path, artifact.as_bytes()).await {
        tracing::warn!(path = %path, error = %e, "Could not stage candidate");
        return sandbox_failure("SandboxError", e.to_string());
    }

    let command = format!(
        "{} {}",
        framework.interpreter,
        shell_words::quote(path)
    );
    tracing::info!(path = %path, "Executing candidate");
    match run_with_timeout(sandbox, &command, timeout).await {
        Ok(output) => {
            let result = classify(&output);
            if let Some(failure) = &result.failure {
                tracing::info!(error = %failure.name, "Candidate execution failed");
            }
            result
        }
        Err(AppError::Timeout(msg)) => sandbox_failure("TimeoutError", msg),
        Err(e) => sandbox_failure("SandboxError", e.to_string()),
    }
}
