//! Merge-conflict detection and blind resolution for the files a run owns.
//!
//! Owned files are never merged semantically: a conflicted file is replaced
//! with the content this run generated.

use crate::error::Result;
use crate::sandbox::Sandbox;
use crate::workspace::publisher::OwnedFiles;

fn is_marker(line: &str) -> bool {
    let line = line.trim();
    line.starts_with("<<<<<<< ") || line == "=======" || line.starts_with(">>>>>>> ")
}

pub fn has_conflict_markers(content: &str) -> bool {
    content.lines().any(is_marker)
}

fn in_repo(repo_path: &str, relative: &str) -> String {
    format!("{}/{}", repo_path.trim_end_matches('/'), relative)
}

/// Owned paths whose working-copy content carries conflict markers. A file
/// that cannot be read counts as conflicted.
pub async fn scan_conflicts(
    sandbox: &dyn Sandbox,
    repo_path: &str,
    owned: &OwnedFiles,
) -> Vec<String> {
    let mut conflicted = Vec::new();
    for file in owned.iter() {
        match sandbox.read_file(&in_repo(repo_path, &file.path)).await {
            Ok(content) if !has_conflict_markers(&content) => {}
            Ok(_) => conflicted.push(file.path.clone()),
            Err(e) => {
                tracing::warn!(path = %file.path, error = %e, "Owned file unreadable");
                conflicted.push(file.path.clone());
            }
        }
    }
    conflicted
}

/// Overwrite each conflicted path with the owned content.
pub async fn resolve_conflicts(
    sandbox: &dyn Sandbox,
    repo_path: &str,
    owned: &OwnedFiles,
    conflicted: &[String],
) -> Result<()> {
    for path in conflicted {
        if let Some(file) = owned.get(path) {
            tracing::info!(path = %path, "Resolving conflict with generated content");
            sandbox
                .write_file(&in_repo(repo_path, path), file.content.as_bytes())
                .await?;
        }
    }
    Ok(())
}
