//! Package installation inside the sandbox.

use std::time::Duration;

use serde::Serialize;

use crate::sandbox::{run_with_timeout, Sandbox};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub installed: Vec<String>,
    pub failed: Vec<String>,
    /// Names rejected before any install was attempted.
    pub skipped: Vec<String>,
    pub batch_succeeded: bool,
}

impl InstallReport {
    /// An install round never blocks execution; this only says whether any
    /// package made it in.
    pub fn succeeded(&self) -> bool {
        self.batch_succeeded
            || !self.installed.is_empty()
            || (self.failed.is_empty() && self.installed.is_empty())
    }

    /// e.g. `2/3 packages installed (failed: foo)`.
    pub fn summary(&self) -> String {
        let total = self.installed.len() + self.failed.len();
        if self.failed.is_empty() {
            format!("{total}/{total} packages installed")
        } else {
            format!(
                "{}/{total} packages installed (failed: {})",
                self.installed.len(),
                self.failed.join(", ")
            )
        }
    }
}

/// Package names handed to the shell must look like distribution names.
pub fn is_valid_package_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('_')
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Install `packages` in one batch, falling back to one at a time.
pub async fn install_packages<I, S>(
    sandbox: &dyn Sandbox,
    packages: I,
    timeout: Duration,
) -> InstallReport
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut report = InstallReport::default();
    let mut valid = Vec::new();
    for package in packages {
        let package = package.as_ref();
        if is_valid_package_name(package) {
            valid.push(package.to_string());
        } else {
            tracing::warn!(package, "Skipping invalid package name");
            report.skipped.push(package.to_string());
        }
    }

    if valid.is_empty() {
        return report;
    }

    tracing::info!(packages = %valid.join(" "), "Installing packages");
    let batch = format!("pip install {}", shell_words::join(&valid));
    match run_with_timeout(sandbox, &batch, timeout).await {
        Ok(output) if output.success() => {
            report.batch_succeeded = true;
            report.installed = valid;
            return report;
        }
        Ok(output) => {
            tracing::warn!(exit_code = output.exit_code, "Batch install failed, installing one by one");
        }
        Err(e) => {
            tracing::warn!(error = %e, "Batch install failed, installing one by one");
        }
    }

    for package in valid {
        let command = format!("pip install {}", shell_words::quote(&package));
        match run_with_timeout(sandbox, &command, timeout).await {
            Ok(output) if output.success() => report.installed.push(package),
            Ok(output) => {
                tracing::warn!(package = %package, stderr = %output.stderr.trim(), "Package install failed");
                report.failed.push(package);
            }
            Err(e) => {
                tracing::warn!(package = %package, error = %e, "Package install failed");
                report.failed.push(package);
            }
        }
    }

    tracing::info!(
        installed = report.installed.len(),
        failed = report.failed.len(),
        "Individual installs finished"
    );
    report
}
