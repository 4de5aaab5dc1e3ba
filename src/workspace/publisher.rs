//! Commits a validated artifact to a branch and pushes it.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, TimeZone};

use crate::agent::{CodeGenerator, CommitContext};
use crate::config::{AppConfig, FrameworkConfig, GitConfig};
use crate::error::{AppError, Result};
use crate::sandbox::Sandbox;
use crate::validate::devserver::{render_env_file, render_framework_config};
use crate::workspace::conflict::{resolve_conflicts, scan_conflicts};
use crate::workspace::git::GitCommands;
use crate::workspace::Workspace;

pub const FALLBACK_COMMIT_MESSAGE: &str = "feat: auto-generated LangGraph workflow";
const TEMP_COMMIT_MESSAGE: &str = "temp: stage generated artifact for sync";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedFile {
    /// Relative to the working-copy root.
    pub path: String,
    pub content: String,
}

impl OwnedFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Everything a run publishes. These files are authoritative over whatever
/// the remote branch holds.
#[derive(Debug, Clone, Default)]
pub struct OwnedFiles {
    files: Vec<OwnedFile>,
}

impl OwnedFiles {
    pub fn new(files: Vec<OwnedFile>) -> Self {
        Self { files }
    }

    /// The artifact, package-init marker, env file, framework config and
    /// dependency manifest.
    pub fn for_artifact(
        framework: &FrameworkConfig,
        artifact: &str,
        packages: &BTreeSet<String>,
    ) -> Result<Self> {
        Ok(Self::new(vec![
            OwnedFile::new(&framework.artifact_path, artifact),
            OwnedFile::new(&framework.init_path, &framework.init_content),
            OwnedFile::new(&framework.env_path, render_env_file(framework)),
            OwnedFile::new(&framework.config_path, render_framework_config(framework)?),
            OwnedFile::new(&framework.manifest_path, render_manifest(framework, packages)),
        ]))
    }

    pub fn iter(&self) -> impl Iterator<Item = &OwnedFile> {
        self.files.iter()
    }

    pub fn get(&self, path: &str) -> Option<&OwnedFile> {
        self.files.iter().find(|f| f.path == path)
    }

    pub fn paths(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.path.as_str()).collect()
    }
}

/// Base requirements followed by the extracted packages, without repeats.
pub fn render_manifest(framework: &FrameworkConfig, packages: &BTreeSet<String>) -> String {
    let mut seen = BTreeSet::new();
    framework
        .base_requirements
        .iter()
        .chain(packages.iter())
        .filter(|p| seen.insert(p.as_str()))
        .map(|p| format!("{p}\n"))
        .collect()
}

pub fn default_branch_name<Tz: TimeZone>(prefix: &str, now: DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{prefix}-{}", now.format("%Y%m%d-%H%M%S"))
}

/// Whether `git status --porcelain` output lists an owned path, either
/// directly or through an untracked parent directory.
fn touches_owned(status: &str, owned: &[&str]) -> bool {
    status
        .lines()
        .filter_map(|line| line.get(3..))
        .map(|path| path.trim().trim_matches('"'))
        .any(|listed| {
            owned.iter().any(|path| {
                *path == listed || (listed.ends_with('/') && path.starts_with(listed))
            })
        })
}

fn sanitize_message(message: &str) -> String {
    message.trim().replace('"', "'")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Pushed {
        branch: String,
        commit_message: String,
        /// Only the forced retry got through.
        forced: bool,
    },
    /// The branch already held exactly this content.
    NoChanges { branch: String },
}

/// What one publish needs from the run.
pub struct PublishRequest<'a> {
    pub branch: Option<&'a str>,
    pub artifact: &'a str,
    pub packages: &'a BTreeSet<String>,
    pub spec: &'a serde_json::Value,
    pub execution_output: &'a str,
}

pub struct Publisher {
    git: GitConfig,
    framework: FrameworkConfig,
    branch_prefix: String,
    timeout: Duration,
}

impl Publisher {
    pub fn new(
        git: GitConfig,
        framework: FrameworkConfig,
        branch_prefix: String,
        timeout: Duration,
    ) -> Self {
        Self {
            git,
            framework,
            branch_prefix,
            timeout,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.git.clone(),
            config.framework.clone(),
            config.pipeline.branch_prefix.clone(),
            Duration::from_secs(config.sandbox.command_timeout_secs),
        )
    }

    fn repo_file(workspace: &Workspace, relative: &str) -> String {
        format!("{}/{}", workspace.path.trim_end_matches('/'), relative)
    }

    async fn write_owned(
        &self,
        sandbox: &dyn Sandbox,
        workspace: &Workspace,
        owned: &OwnedFiles,
    ) -> Result<()> {
        for file in owned.iter() {
            sandbox
                .write_file(&Self::repo_file(workspace, &file.path), file.content.as_bytes())
                .await?;
        }
        Ok(())
    }

    /// Bring the remote branch in before the real commit. Returns whether a
    /// temporary commit was made.
    async fn sync_with_remote(
        &self,
        git: &GitCommands<'_>,
        owned: &OwnedFiles,
        branch: &str,
    ) -> Result<bool> {
        let status = git.status_porcelain().await?;
        let paths = owned.paths();
        let mut temp_commit = false;
        if touches_owned(&status, &paths) {
            tracing::info!("Committing generated files before sync");
            git.add(&paths).await?;
            git.commit(TEMP_COMMIT_MESSAGE).await?;
            temp_commit = true;
        }

        let pull = git.pull(branch, false).await?;
        if pull.success() {
            tracing::info!(branch = %branch, "Synced with remote branch");
            return Ok(temp_commit);
        }

        let message = pull.combined();
        if message.contains("couldn't find remote ref") || message.contains("does not exist") {
            tracing::info!(branch = %branch, "Remote branch does not exist yet");
        } else if message.contains("divergent branches") {
            tracing::warn!(branch = %branch, "Divergent branches, merging with ours strategy");
            let retry = git.pull(branch, true).await?;
            if !retry.success() && !git.merge_in_progress().await? {
                return Err(AppError::Git(format!(
                    "Sync failed: {}",
                    retry.combined().trim()
                )));
            }
        } else if git.merge_in_progress().await? {
            tracing::warn!(branch = %branch, "Sync left a merge in progress");
        } else {
            return Err(AppError::Git(format!("Sync failed: {}", message.trim())));
        }
        Ok(temp_commit)
    }

    /// Overwrite conflicted owned files, then stage them all.
    async fn resolve_and_stage(
        &self,
        sandbox: &dyn Sandbox,
        workspace: &Workspace,
        git: &GitCommands<'_>,
        owned: &OwnedFiles,
    ) -> Result<()> {
        let conflicted = scan_conflicts(sandbox, &workspace.path, owned).await;
        if !conflicted.is_empty() {
            tracing::warn!(files = ?conflicted, "Conflict markers after sync");
            resolve_conflicts(sandbox, &workspace.path, owned, &conflicted).await?;
        }
        git.add(&owned.paths()).await?;

        // Last guard before anything is committed.
        let conflicted = scan_conflicts(sandbox, &workspace.path, owned).await;
        if conflicted.is_empty() {
            return Ok(());
        }
        resolve_conflicts(sandbox, &workspace.path, owned, &conflicted).await?;
        git.add(&owned.paths()).await?;
        let remaining = scan_conflicts(sandbox, &workspace.path, owned).await;
        if remaining.is_empty() {
            Ok(())
        } else {
            Err(AppError::PublishConflictUnresolved(remaining))
        }
    }

    async fn commit_message(
        &self,
        generator: &dyn CodeGenerator,
        request: &PublishRequest<'_>,
        owned: &OwnedFiles,
    ) -> String {
        let files: Vec<String> = owned.paths().into_iter().map(String::from).collect();
        let context = CommitContext {
            spec: request.spec,
            files: &files,
            artifact: request.artifact,
            execution_output: request.execution_output,
        };
        match generator.commit_message(&context).await {
            Ok(message) if !message.trim().is_empty() => sanitize_message(&message),
            Ok(_) => FALLBACK_COMMIT_MESSAGE.to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "Commit message generation failed, using fallback");
                FALLBACK_COMMIT_MESSAGE.to_string()
            }
        }
    }

    /// Commit and push the run's files to the target branch.
    pub async fn publish(
        &self,
        sandbox: &dyn Sandbox,
        workspace: &Workspace,
        generator: &dyn CodeGenerator,
        request: &PublishRequest<'_>,
    ) -> Result<PublishOutcome> {
        let git = GitCommands::new(sandbox, workspace, self.timeout);
        let branch = match request.branch {
            Some(branch) => branch.to_string(),
            None => default_branch_name(&self.branch_prefix, chrono::Local::now()),
        };
        let owned = OwnedFiles::for_artifact(&self.framework, request.artifact, request.packages)?;

        git.configure_identity(&self.git.user_name, &self.git.user_email)
            .await?;
        git.checkout_or_create(&branch).await?;
        tracing::info!(branch = %branch, "Branch ready");

        self.write_owned(sandbox, workspace, &owned).await?;
        let temp_commit = self.sync_with_remote(&git, &owned, &branch).await?;

        self.resolve_and_stage(sandbox, workspace, &git, &owned)
            .await?;

        let merging = git.merge_in_progress().await?;
        if !temp_commit && !merging && !git.has_staged_changes().await? {
            tracing::info!(branch = %branch, "No changes to commit");
            return Ok(PublishOutcome::NoChanges { branch });
        }

        let message = self.commit_message(generator, request, &owned).await;
        if temp_commit && !merging {
            git.amend(&message).await?;
        } else {
            git.commit(&message).await?;
        }
        tracing::info!(branch = %branch, message = %message, "Committed");

        let forced = match git.push(&branch, false).await {
            Ok(()) => false,
            Err(e) => {
                tracing::warn!(branch = %branch, error = %e, "Push rejected, retrying with --force");
                git.push(&branch, true)
                    .await
                    .map_err(|e| AppError::PushFailed(e.to_string()))?;
                true
            }
        };
        tracing::info!(branch = %branch, forced, "Pushed");

        Ok(PublishOutcome::Pushed {
            branch,
            commit_message: message,
            forced,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::sandbox::CommandOutput;
    use crate::testing::{ScriptedGenerator, ScriptedSandbox};
    use crate::workspace::repo::RepoRef;

    const ARTIFACT: &str = "from langgraph.graph import StateGraph\ngraph = StateGraph(dict).compile()\n";

    fn workspace() -> Workspace {
        Workspace {
            path: "agents".to_string(),
            repo: RepoRef::parse("acme/agents", "github.com").unwrap(),
            token: Some("tok123".to_string()),
        }
    }

    fn publisher() -> Publisher {
        Publisher::new(
            GitConfig::default(),
            FrameworkConfig::default(),
            "generated-graph".to_string(),
            Duration::from_secs(5),
        )
    }

    fn packages() -> BTreeSet<String> {
        ["langgraph".to_string(), "httpx".to_string()].into()
    }

    fn request<'a>(packages: &'a BTreeSet<String>, spec: &'a serde_json::Value) -> PublishRequest<'a> {
        PublishRequest {
            branch: Some("feature/invoice"),
            artifact: ARTIFACT,
            packages,
            spec,
            execution_output: "ok",
        }
    }

    /// A working copy where the owned files are new and the remote branch
    /// does not exist yet.
    fn fresh_repo() -> ScriptedSandbox {
        let sandbox = ScriptedSandbox::new();
        sandbox.on("status --porcelain", CommandOutput::ok("?? src/\n?? langgraph.json\n?? requirements.txt\n"));
        sandbox.on("git pull", CommandOutput::failed(1, "fatal: couldn't find remote ref feature/invoice"));
        sandbox.on("MERGE_HEAD", CommandOutput::failed(1, ""));
        sandbox
    }

    #[test]
    fn test_manifest_has_base_then_packages() {
        let manifest = render_manifest(&FrameworkConfig::default(), &packages());
        assert_eq!(manifest, "langgraph\nlanggraph-cli[inmem]\nhttpx\n");
    }

    #[test]
    fn test_default_branch_name_format() {
        let now = chrono::Utc.with_ymd_and_hms(2025, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            default_branch_name("generated-graph", now),
            "generated-graph-20250309-140507"
        );
    }

    #[test]
    fn test_owned_files_cover_deployment_layout() {
        let owned = OwnedFiles::for_artifact(&FrameworkConfig::default(), ARTIFACT, &packages()).unwrap();
        assert_eq!(
            owned.paths(),
            vec![
                "src/agent/graph.py",
                "src/agent/__init__.py",
                ".env",
                "langgraph.json",
                "requirements.txt"
            ]
        );
    }

    #[tokio::test]
    async fn test_publish_new_branch() {
        let sandbox = fresh_repo();
        let generator = ScriptedGenerator::new();
        let (pkgs, spec) = (packages(), serde_json::json!({"workflow": "invoice"}));

        let outcome = publisher()
            .publish(&sandbox, &workspace(), &generator, &request(&pkgs, &spec))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            PublishOutcome::Pushed {
                branch: "feature/invoice".to_string(),
                commit_message: "feat: add generated invoice workflow".to_string(),
                forced: false,
            }
        );
        assert!(sandbox.ran("git commit -m 'temp: stage generated artifact for sync'"));
        assert!(sandbox.ran("git commit --amend -m 'feat: add generated invoice workflow'"));
        assert_eq!(sandbox.count("git push"), 1);
        assert_eq!(sandbox.file("agents/src/agent/graph.py").as_deref(), Some(ARTIFACT));
    }

    #[tokio::test]
    async fn test_generator_failure_uses_fallback_message() {
        let sandbox = fresh_repo();
        let generator = ScriptedGenerator::new().commit_message_is(Err("quota"));
        let (pkgs, spec) = (packages(), serde_json::json!({}));

        let outcome = publisher()
            .publish(&sandbox, &workspace(), &generator, &request(&pkgs, &spec))
            .await
            .unwrap();
        match outcome {
            PublishOutcome::Pushed { commit_message, .. } => {
                assert_eq!(commit_message, FALLBACK_COMMIT_MESSAGE)
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_commit_message_quotes_are_sanitized() {
        let sandbox = fresh_repo();
        let generator = ScriptedGenerator::new().commit_message_is(Ok("feat: add \"invoice\" flow"));
        let (pkgs, spec) = (packages(), serde_json::json!({}));

        publisher()
            .publish(&sandbox, &workspace(), &generator, &request(&pkgs, &spec))
            .await
            .unwrap();
        assert!(sandbox.ran("feat: add '\\''invoice'\\'' flow"));
    }

    #[tokio::test]
    async fn test_push_falls_back_to_force() {
        let sandbox = fresh_repo();
        sandbox.on("git push", CommandOutput::failed(1, "rejected (non-fast-forward)"));
        sandbox.on("git push --force", CommandOutput::ok(""));
        let generator = ScriptedGenerator::new();
        let (pkgs, spec) = (packages(), serde_json::json!({}));

        let outcome = publisher()
            .publish(&sandbox, &workspace(), &generator, &request(&pkgs, &spec))
            .await
            .unwrap();
        assert!(matches!(outcome, PublishOutcome::Pushed { forced: true, .. }));
    }

    #[tokio::test]
    async fn test_push_fails_twice() {
        let sandbox = fresh_repo();
        sandbox.on("git push", CommandOutput::failed(1, "permission denied"));
        let generator = ScriptedGenerator::new();
        let (pkgs, spec) = (packages(), serde_json::json!({}));

        let err = publisher()
            .publish(&sandbox, &workspace(), &generator, &request(&pkgs, &spec))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PushFailed(_)));
        assert_eq!(sandbox.count("git push"), 2);
    }

    #[tokio::test]
    async fn test_no_changes_skips_commit_and_push() {
        let sandbox = ScriptedSandbox::new();
        sandbox.on("git pull", CommandOutput::ok("Already up to date."));
        sandbox.on("MERGE_HEAD", CommandOutput::failed(1, ""));
        let generator = ScriptedGenerator::new();
        let (pkgs, spec) = (packages(), serde_json::json!({}));

        let outcome = publisher()
            .publish(&sandbox, &workspace(), &generator, &request(&pkgs, &spec))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            PublishOutcome::NoChanges {
                branch: "feature/invoice".to_string()
            }
        );
        assert!(!sandbox.ran("git commit"));
        assert!(!sandbox.ran("git push"));
        assert_eq!(generator.commit_calls(), 0);
    }

    #[tokio::test]
    async fn test_unexpected_sync_failure_aborts() {
        let sandbox = fresh_repo();
        sandbox.on("git pull", CommandOutput::failed(128, "fatal: Authentication failed"));
        let generator = ScriptedGenerator::new();
        let (pkgs, spec) = (packages(), serde_json::json!({}));

        let err = publisher()
            .publish(&sandbox, &workspace(), &generator, &request(&pkgs, &spec))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Git(_)));
        assert!(!sandbox.ran("git push"));
    }

    #[tokio::test]
    async fn test_divergent_branches_retry_with_ours() {
        let sandbox = fresh_repo();
        sandbox.on("git pull", CommandOutput::failed(128, "fatal: Need to specify how to reconcile divergent branches."));
        sandbox.on("--strategy=ours", CommandOutput::ok("Merge made by the 'ours' strategy."));
        let generator = ScriptedGenerator::new();
        let (pkgs, spec) = (packages(), serde_json::json!({}));

        publisher()
            .publish(&sandbox, &workspace(), &generator, &request(&pkgs, &spec))
            .await
            .unwrap();
        assert!(sandbox.ran("--strategy=ours"));
    }

    #[tokio::test]
    async fn test_sync_conflict_resolves_to_generated_artifact() {
        let sandbox = fresh_repo();
        let merging = Arc::new(Mutex::new(false));
        let committed = Arc::new(Mutex::new(None::<String>));

        // The pull conflicts in the artifact and leaves a merge in progress.
        let m = merging.clone();
        sandbox.on_fn(move |cmd, files| {
            if !cmd.contains("git pull") {
                return None;
            }
            files.insert(
                "agents/src/agent/graph.py".to_string(),
                "<<<<<<< HEAD\ngraph = mine\n=======\ngraph = theirs\n>>>>>>> origin/feature/invoice\n".to_string(),
            );
            *m.lock().unwrap() = true;
            Some(CommandOutput::failed(1, "CONFLICT (add/add): Merge conflict in src/agent/graph.py"))
        });
        let m = merging.clone();
        sandbox.on_fn(move |cmd, _| {
            cmd.contains("MERGE_HEAD").then(|| {
                if *m.lock().unwrap() {
                    CommandOutput::ok("")
                } else {
                    CommandOutput::failed(1, "")
                }
            })
        });
        let c = committed.clone();
        let m = merging.clone();
        sandbox.on_fn(move |cmd, files| {
            if !cmd.contains("git commit -m 'feat") {
                return None;
            }
            *c.lock().unwrap() = files.get("agents/src/agent/graph.py").cloned();
            *m.lock().unwrap() = false;
            Some(CommandOutput::ok(""))
        });

        let generator = ScriptedGenerator::new();
        let (pkgs, spec) = (packages(), serde_json::json!({}));
        let outcome = publisher()
            .publish(&sandbox, &workspace(), &generator, &request(&pkgs, &spec))
            .await
            .unwrap();

        assert!(matches!(outcome, PublishOutcome::Pushed { forced: false, .. }));
        assert_eq!(committed.lock().unwrap().as_deref(), Some(ARTIFACT));
        // A merge in progress is concluded, not amended.
        assert!(!sandbox.ran("--amend"));
    }

    #[tokio::test]
    async fn test_unresolvable_conflict_is_fatal_to_publishing() {
        let sandbox = fresh_repo();
        // Staging keeps reintroducing markers, so resolution never sticks.
        sandbox.on_fn(|cmd, files| {
            if !cmd.contains("git add") {
                return None;
            }
            files.insert(
                "agents/src/agent/graph.py".to_string(),
                "<<<<<<< HEAD\ngraph = a\n=======\ngraph = b\n>>>>>>> theirs\n".to_string(),
            );
            Some(CommandOutput::ok(""))
        });
        let generator = ScriptedGenerator::new();
        let (pkgs, spec) = (packages(), serde_json::json!({}));

        let err = publisher()
            .publish(&sandbox, &workspace(), &generator, &request(&pkgs, &spec))
            .await
            .unwrap_err();
        match err {
            AppError::PublishConflictUnresolved(files) => {
                assert_eq!(files, vec!["src/agent/graph.py"])
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!sandbox.ran("git commit -m 'feat"));
        assert!(!sandbox.ran("git push"));
    }

    #[test]
    fn test_porcelain_matching() {
        let owned = ["src/agent/graph.py", ".env"];
        assert!(touches_owned("?? src/\n", &owned));
        assert!(touches_owned(" M src/agent/graph.py\n", &owned));
        assert!(touches_owned("?? .env\n", &owned));
        assert!(!touches_owned(" M README.md\n?? docs/\n", &owned));
        assert!(!touches_owned("", &owned));
    }
}
