use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use crate::error::{AppError, Result};
use crate::sandbox::{CommandOutput, Sandbox, SandboxHandle, SandboxProvider};

/// Sandboxes backed by temporary directories on this host.
///
/// Offers no isolation beyond a private working directory; meant for
/// development and for hosts that are themselves disposable.
pub struct LocalSandboxProvider {
    parent: Option<PathBuf>,
}

impl LocalSandboxProvider {
    pub fn new() -> Self {
        Self { parent: None }
    }

    /// Create sandboxes under `parent` instead of the system temp dir.
    pub fn in_dir(parent: impl Into<PathBuf>) -> Self {
        Self {
            parent: Some(parent.into()),
        }
    }
}

impl Default for LocalSandboxProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SandboxProvider for LocalSandboxProvider {
    async fn create(&self) -> Result<SandboxHandle> {
        let dir = match &self.parent {
            Some(parent) => {
                tokio::fs::create_dir_all(parent).await?;
                tempfile::Builder::new().prefix("forgeflow-").tempdir_in(parent)?
            }
            None => tempfile::Builder::new().prefix("forgeflow-").tempdir()?,
        };
        let root = dir.path().to_path_buf();
        let id = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "local".to_string());

        Ok(Arc::new(LocalSandbox {
            id,
            root,
            dir: Mutex::new(Some(dir)),
        }))
    }
}

pub struct LocalSandbox {
    id: String,
    root: PathBuf,
    dir: Mutex<Option<TempDir>>,
}

impl LocalSandbox {
    fn ensure_alive(&self) -> Result<()> {
        let alive = self
            .dir
            .lock()
            .map_err(|_| AppError::Internal("sandbox lock poisoned".to_string()))?
            .is_some();
        if alive {
            Ok(())
        } else {
            Err(AppError::Sandbox(format!("sandbox {} was destroyed", self.id)))
        }
    }

    /// Resolve a sandbox-relative path, rejecting anything that escapes the
    /// sandbox root.
    fn resolve(&self, requested: &str) -> Result<PathBuf> {
        let requested = Path::new(requested);
        for component in requested.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(AppError::Sandbox(format!(
                        "Path traversal detected: {} is outside the sandbox",
                        requested.display()
                    )))
                }
            }
        }
        Ok(self.root.join(requested))
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, command: &str) -> Result<CommandOutput> {
        self.ensure_alive()?;

        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AppError::Sandbox(format!("Failed to spawn shell: {e}")))?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<()> {
        self.ensure_alive()?;
        let full_path = self.resolve(path)?;
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full_path, content).await?;
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        self.ensure_alive()?;
        let full_path = self.resolve(path)?;
        let bytes = tokio::fs::read(&full_path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn kill(&self) -> Result<()> {
        let dir = self
            .dir
            .lock()
            .map_err(|_| AppError::Internal("sandbox lock poisoned".to_string()))?
            .take();
        match dir {
            Some(dir) => {
                dir.close()?;
                Ok(())
            }
            None => Ok(()),
        }
    }
}
