use std::path::PathBuf;

use crate::config::PipelineConfig;
use crate::error::Result;

/// Writes artifacts to the local output directory.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    dir: PathBuf,
    prefix: String,
}

impl LocalArtifactStore {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.output_dir.clone(), config.artifact_prefix.clone())
    }

    fn file_name(&self, run_id: &str) -> String {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let short: String = run_id.chars().filter(|c| c.is_ascii_alphanumeric()).take(8).collect();
        format!("{}_{stamp}_{short}.py", self.prefix)
    }

    /// Save `artifact` and return its absolute path.
    pub async fn save(&self, run_id: &str, artifact: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(self.file_name(run_id));
        tokio::fs::write(&path, artifact).await?;
        let path = tokio::fs::canonicalize(&path).await?;
        tracing::info!(path = %path.display(), "Artifact saved locally");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_writes_named_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(tmp.path().join("out"), "generated_graph");

        let path = store
            .save("3f2a9c1e-77aa-4b0e-9d1c-000000000000", "graph = 1\n")
            .await
            .unwrap();

        assert!(path.is_absolute());
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("generated_graph_"));
        assert!(name.ends_with("_3f2a9c1e.py"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "graph = 1\n");
    }
}
