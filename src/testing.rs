//! In-memory fakes for the sandbox and generation services.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::agent::{CodeGenerator, CommitContext};
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::sandbox::{CommandOutput, Sandbox, SandboxHandle, SandboxProvider};
use crate::state::FailureRecord;
use crate::workflow::types::RunRequest;

pub type Files = HashMap<String, String>;
type Rule = Box<dyn Fn(&str, &mut Files) -> Option<CommandOutput> + Send + Sync>;

struct Inner {
    id: String,
    commands: Mutex<Vec<String>>,
    files: Mutex<Files>,
    rules: Mutex<Vec<Rule>>,
    delays: Mutex<Vec<(String, Duration)>>,
    failing_writes: Mutex<Vec<String>>,
    kills: AtomicU32,
    fail_kill: AtomicBool,
}

/// A sandbox that answers commands from rules. Later rules take precedence;
/// unmatched commands succeed with empty output.
#[derive(Clone)]
pub struct ScriptedSandbox {
    inner: Arc<Inner>,
}

impl ScriptedSandbox {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                id: "scripted-sbx".to_string(),
                commands: Mutex::new(Vec::new()),
                files: Mutex::new(HashMap::new()),
                rules: Mutex::new(Vec::new()),
                delays: Mutex::new(Vec::new()),
                failing_writes: Mutex::new(Vec::new()),
                kills: AtomicU32::new(0),
                fail_kill: AtomicBool::new(false),
            }),
        }
    }

    pub fn on(&self, pattern: &str, output: CommandOutput) -> &Self {
        let pattern = pattern.to_string();
        self.on_fn(move |cmd, _| cmd.contains(&pattern).then(|| output.clone()))
    }

    /// Answer matching commands with `outputs` in order; the last one repeats.
    pub fn on_sequence(&self, pattern: &str, outputs: Vec<CommandOutput>) -> &Self {
        let pattern = pattern.to_string();
        let queue = Mutex::new(VecDeque::from(outputs));
        self.on_fn(move |cmd, _| {
            if !cmd.contains(&pattern) {
                return None;
            }
            let mut queue = queue.lock().unwrap();
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        })
    }

    pub fn on_fn<F>(&self, rule: F) -> &Self
    where
        F: Fn(&str, &mut Files) -> Option<CommandOutput> + Send + Sync + 'static,
    {
        self.inner.rules.lock().unwrap().push(Box::new(rule));
        self
    }

    pub fn delay_matching(&self, pattern: &str, delay: Duration) {
        self.inner
            .delays
            .lock()
            .unwrap()
            .push((pattern.to_string(), delay));
    }

    pub fn fail_writes_to(&self, path: &str) {
        self.inner
            .failing_writes
            .lock()
            .unwrap()
            .push(path.to_string());
    }

    pub fn fail_kill(&self) {
        self.inner.fail_kill.store(true, Ordering::SeqCst);
    }

    pub fn set_file(&self, path: &str, content: &str) {
        self.inner
            .files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_string());
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.inner.files.lock().unwrap().get(path).cloned()
    }

    pub fn commands(&self) -> Vec<String> {
        self.inner.commands.lock().unwrap().clone()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.count(pattern) > 0
    }

    pub fn kill_count(&self) -> u32 {
        self.inner.kills.load(Ordering::SeqCst)
    }

    pub fn provider(&self) -> ScriptedProvider {
        ScriptedProvider {
            sandbox: self.clone(),
            fail: false,
        }
    }

    pub fn handle(&self) -> SandboxHandle {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    fn id(&self) -> &str {
        &self.inner.id
    }

    async fn run(&self, command: &str) -> Result<CommandOutput> {
        self.inner.commands.lock().unwrap().push(command.to_string());

        let delay = self
            .inner
            .delays
            .lock()
            .unwrap()
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, delay)| *delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let rules = self.inner.rules.lock().unwrap();
        let mut files = self.inner.files.lock().unwrap();
        for rule in rules.iter().rev() {
            if let Some(output) = rule(command, &mut files) {
                return Ok(output);
            }
        }
        Ok(CommandOutput::ok(""))
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<()> {
        let failing = self
            .inner
            .failing_writes
            .lock()
            .unwrap()
            .iter()
            .any(|p| path.ends_with(p.as_str()));
        if failing {
            return Err(AppError::Sandbox(format!("write to {path} rejected")));
        }
        self.set_file(path, &String::from_utf8_lossy(content));
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        self.file(path)
            .ok_or_else(|| AppError::Sandbox(format!("no such file: {path}")))
    }

    async fn kill(&self) -> Result<()> {
        self.inner.kills.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_kill.load(Ordering::SeqCst) {
            return Err(AppError::Sandbox("kill rejected".to_string()));
        }
        Ok(())
    }
}

pub struct ScriptedProvider {
    sandbox: ScriptedSandbox,
    fail: bool,
}

impl ScriptedProvider {
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl SandboxProvider for ScriptedProvider {
    async fn create(&self) -> Result<SandboxHandle> {
        if self.fail {
            return Err(AppError::Sandbox("no capacity".to_string()));
        }
        Ok(self.sandbox.handle())
    }
}

/// A generator that replays queued responses and records what it was asked.
#[derive(Default)]
pub struct ScriptedGenerator {
    generated: Mutex<VecDeque<std::result::Result<String, String>>>,
    revisions: Mutex<VecDeque<std::result::Result<String, String>>>,
    commit: Mutex<Option<std::result::Result<String, String>>>,
    revise_inputs: Mutex<Vec<(String, FailureRecord)>>,
    generate_calls: AtomicU32,
    commit_calls: AtomicU32,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generates(self, artifact: &str) -> Self {
        self.generated
            .lock()
            .unwrap()
            .push_back(Ok(artifact.to_string()));
        self
    }

    pub fn generate_fails(self, message: &str) -> Self {
        self.generated
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
        self
    }

    pub fn revises_to(self, artifact: &str) -> Self {
        self.revisions
            .lock()
            .unwrap()
            .push_back(Ok(artifact.to_string()));
        self
    }

    pub fn revise_fails(self, message: &str) -> Self {
        self.revisions
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
        self
    }

    pub fn commit_message_is(self, message: std::result::Result<&str, &str>) -> Self {
        *self.commit.lock().unwrap() = Some(message.map(str::to_string).map_err(str::to_string));
        self
    }

    pub fn revise_inputs(&self) -> Vec<(String, FailureRecord)> {
        self.revise_inputs.lock().unwrap().clone()
    }

    pub fn generate_calls(&self) -> u32 {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn revise_calls(&self) -> usize {
        self.revise_inputs.lock().unwrap().len()
    }

    pub fn commit_calls(&self) -> u32 {
        self.commit_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CodeGenerator for ScriptedGenerator {
    async fn generate(&self, _spec: &serde_json::Value, _os_url: Option<&str>) -> Result<String> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.generated
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err("no scripted generation".to_string()))
            .map_err(AppError::GenerationFailed)
    }

    async fn revise(&self, artifact: &str, failure: &FailureRecord) -> Result<String> {
        self.revise_inputs
            .lock()
            .unwrap()
            .push((artifact.to_string(), failure.clone()));
        self.revisions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err("no scripted revision".to_string()))
            .map_err(AppError::GenerationFailed)
    }

    async fn commit_message(&self, _context: &CommitContext<'_>) -> Result<String> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        self.commit
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Ok("feat: add generated invoice workflow".to_string()))
            .map_err(AppError::GenerationFailed)
    }
}

/// Defaults with short timeouts and a scratch output directory.
pub fn test_config(output_dir: &std::path::Path) -> AppConfig {
    let mut config = AppConfig::with_api_key("test-key");
    config.pipeline.output_dir = output_dir.to_path_buf();
    config.sandbox.command_timeout_secs = 5;
    config.framework.dev_server_timeout_secs = 1;
    config.git.token = Some("tok123".to_string());
    config
}

pub fn test_request() -> RunRequest {
    let mut request = RunRequest::new(
        serde_json::json!({"workflow": "invoice-entry", "steps": ["open", "type", "save"]}),
        "acme/agents",
    );
    request.branch_name = Some("feature/invoice".to_string());
    request
}
