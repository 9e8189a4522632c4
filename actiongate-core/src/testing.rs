//! In-memory test doubles for every port.
//!
//! These are public so downstream crates and integration tests can drive the
//! engine and orchestrators without a model, a shell, or a real disk.

use crate::config::GateConfig;
use crate::context::AppContext;
use crate::error::{ApprovalError, GateError, ModelError, ShellError, WorkspaceError};
use crate::model::{ModelPort, ModelRequest};
use crate::ports::{
    ConfirmationPort, ShellPort, ToolExecutor, ToolchainPort, WorkspaceFs, WorkspaceObserver,
};
use crate::types::{Artifact, CommandOutput, DirEntry, TranscriptLine, WriteOutcome};
use crate::workspace::WorkspaceGuard;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Model that replays queued replies and records every request.
pub struct MockModel {
    queue: Mutex<VecDeque<String>>,
    fallback: Option<String>,
    requests: Mutex<Vec<ModelRequest>>,
    delay: Option<Duration>,
}

impl MockModel {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// A model that answers every request with `text`.
    pub fn with_response(text: &str) -> Self {
        Self {
            fallback: Some(text.to_string()),
            ..Self::new()
        }
    }

    /// A model that answers with `replies` in order, then errors.
    pub fn with_responses<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let model = Self::new();
        for reply in replies {
            model.queue_response(reply);
        }
        model
    }

    /// Sleep this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn queue_response(&self, text: impl Into<String>) {
        lock(&self.queue).push_back(text.into());
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        lock(&self.requests).clone()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

impl Default for MockModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelPort for MockModel {
    async fn ask(&self, request: ModelRequest) -> Result<String, ModelError> {
        lock(&self.requests).push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = lock(&self.queue).pop_front();
        next.or_else(|| self.fallback.clone())
            .ok_or_else(|| ModelError::ApiRequest {
                message: "mock model has no queued responses".into(),
            })
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}

// ---------------------------------------------------------------------------
// Confirmation
// ---------------------------------------------------------------------------

/// Confirmation port that answers from a script and records the questions.
pub struct ScriptedConfirm {
    answers: Mutex<VecDeque<bool>>,
    default: bool,
    questions: Mutex<Vec<String>>,
}

impl ScriptedConfirm {
    /// Answer every question with `answer`.
    pub fn always(answer: bool) -> Self {
        Self {
            answers: Mutex::new(VecDeque::new()),
            default: answer,
            questions: Mutex::new(Vec::new()),
        }
    }

    /// Answer with `answers` in order, then with `then`.
    pub fn sequence(answers: impl IntoIterator<Item = bool>, then: bool) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            default: then,
            questions: Mutex::new(Vec::new()),
        }
    }

    /// Every question asked so far, in order.
    pub fn questions(&self) -> Vec<String> {
        lock(&self.questions).clone()
    }
}

#[async_trait]
impl ConfirmationPort for ScriptedConfirm {
    async fn confirm(&self, question: &str) -> bool {
        lock(&self.questions).push(question.to_string());
        lock(&self.answers).pop_front().unwrap_or(self.default)
    }
}

// ---------------------------------------------------------------------------
// Shell
// ---------------------------------------------------------------------------

enum ShellScript {
    Output(CommandOutput),
    SpawnFailure,
}

/// Shell that returns scripted output per command text.
///
/// Unscripted commands succeed with empty output. When several outputs are
/// scripted for one command they are used in order and the last one repeats.
#[derive(Default)]
pub struct FakeShell {
    scripts: Mutex<HashMap<String, VecDeque<ShellScript>>>,
    calls: Mutex<Vec<(String, PathBuf)>>,
}

impl FakeShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(self, command: &str, output: CommandOutput) -> Self {
        self.push(command, ShellScript::Output(output));
        self
    }

    pub fn with_outputs(
        self,
        command: &str,
        outputs: impl IntoIterator<Item = CommandOutput>,
    ) -> Self {
        for output in outputs {
            self.push(command, ShellScript::Output(output));
        }
        self
    }

    /// Make `command` fail to spawn.
    pub fn with_spawn_failure(self, command: &str) -> Self {
        self.push(command, ShellScript::SpawnFailure);
        self
    }

    fn push(&self, command: &str, script: ShellScript) {
        lock(&self.scripts)
            .entry(command.to_string())
            .or_default()
            .push_back(script);
    }

    /// Every `(command, working_dir)` run so far, in order.
    pub fn calls(&self) -> Vec<(String, PathBuf)> {
        lock(&self.calls).clone()
    }

    pub fn commands(&self) -> Vec<String> {
        lock(&self.calls).iter().map(|(c, _)| c.clone()).collect()
    }
}

#[async_trait]
impl ShellPort for FakeShell {
    async fn run_command(
        &self,
        command: &str,
        working_dir: &Path,
    ) -> Result<CommandOutput, ShellError> {
        lock(&self.calls).push((command.to_string(), working_dir.to_path_buf()));
        let mut scripts = lock(&self.scripts);
        let Some(queue) = scripts.get_mut(command) else {
            return Ok(CommandOutput::ok(""));
        };
        let script = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().map(|s| match s {
                ShellScript::Output(o) => ShellScript::Output(o.clone()),
                ShellScript::SpawnFailure => ShellScript::SpawnFailure,
            })
        };
        match script {
            Some(ShellScript::Output(o)) => Ok(o),
            Some(ShellScript::SpawnFailure) => Err(ShellError::Spawn {
                command: command.to_string(),
                message: "scripted spawn failure".into(),
            }),
            None => Ok(CommandOutput::ok("")),
        }
    }
}

// ---------------------------------------------------------------------------
// Toolchain
// ---------------------------------------------------------------------------

/// Toolchain port with scripted presence and install results.
pub struct FakeToolchain {
    present: Mutex<HashSet<String>>,
    install_result: CommandOutput,
    installs: Mutex<Vec<String>>,
}

impl FakeToolchain {
    /// Nothing is present; installs succeed and make the toolchain present.
    pub fn new() -> Self {
        Self {
            present: Mutex::new(HashSet::new()),
            install_result: CommandOutput::ok(""),
            installs: Mutex::new(Vec::new()),
        }
    }

    pub fn with_present(self, name: &str) -> Self {
        lock(&self.present).insert(name.to_string());
        self
    }

    pub fn with_install_result(mut self, output: CommandOutput) -> Self {
        self.install_result = output;
        self
    }

    /// Install commands run so far.
    pub fn installs(&self) -> Vec<String> {
        lock(&self.installs).clone()
    }
}

impl Default for FakeToolchain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolchainPort for FakeToolchain {
    async fn is_present(&self, name: &str, _probe: &str) -> bool {
        lock(&self.present).contains(name)
    }

    async fn install(&self, name: &str, command: &str) -> Result<CommandOutput, ShellError> {
        lock(&self.installs).push(command.to_string());
        if self.install_result.success {
            lock(&self.present).insert(name.to_string());
        }
        Ok(self.install_result.clone())
    }
}

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryTree {
    files: BTreeMap<String, String>,
    dirs: BTreeSet<String>,
}

impl MemoryTree {
    fn add_parents(&mut self, path: &str) {
        let mut current = path;
        while let Some((parent, _)) = current.rsplit_once('/') {
            self.dirs.insert(parent.to_string());
            current = parent;
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path) || self.dirs.contains(path)
    }
}

/// Workspace held entirely in memory, guarded like the real one.
pub struct MemoryWorkspace {
    guard: WorkspaceGuard,
    tree: Mutex<MemoryTree>,
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        Self {
            guard: WorkspaceGuard::new("/actiongate-memory-workspace"),
            tree: Mutex::new(MemoryTree::default()),
        }
    }

    pub fn with_file(self, path: &str, content: &str) -> Self {
        {
            let mut tree = lock(&self.tree);
            tree.add_parents(path);
            tree.files.insert(path.to_string(), content.to_string());
        }
        self
    }

    pub fn file(&self, path: &str) -> Option<String> {
        lock(&self.tree).files.get(path).cloned()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        lock(&self.tree).dirs.contains(path)
    }

    /// All file paths, sorted.
    pub fn file_paths(&self) -> Vec<String> {
        lock(&self.tree).files.keys().cloned().collect()
    }

    fn key(&self, path: &str) -> Result<String, WorkspaceError> {
        let abs = self.guard.resolve(path)?;
        Ok(self.guard.relative(&abs))
    }

    fn not_found(&self, key: &str) -> WorkspaceError {
        WorkspaceError::NotFound {
            path: self.guard.root().join(key),
        }
    }
}

impl Default for MemoryWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkspaceFs for MemoryWorkspace {
    fn root(&self) -> &Path {
        self.guard.root()
    }

    async fn read_file(&self, path: &str) -> Result<String, WorkspaceError> {
        let key = self.key(path)?;
        lock(&self.tree)
            .files
            .get(&key)
            .cloned()
            .ok_or_else(|| self.not_found(&key))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<WriteOutcome, WorkspaceError> {
        let key = self.key(path)?;
        let mut tree = lock(&self.tree);
        if tree.dirs.contains(&key) {
            return Err(WorkspaceError::InvalidPath {
                path: path.to_string(),
                reason: "is a directory".into(),
            });
        }
        tree.add_parents(&key);
        let previous = tree.files.insert(key, content.to_string());
        Ok(if previous.is_some() {
            WriteOutcome::Updated
        } else {
            WriteOutcome::Created
        })
    }

    async fn create_entry(&self, path: &str, is_directory: bool) -> Result<(), WorkspaceError> {
        let key = self.key(path)?;
        let mut tree = lock(&self.tree);
        tree.add_parents(&key);
        if is_directory {
            tree.dirs.insert(key);
        } else {
            tree.files.entry(key).or_default();
        }
        Ok(())
    }

    async fn delete_entry(&self, path: &str) -> Result<(), WorkspaceError> {
        let key = self.key(path)?;
        let mut tree = lock(&self.tree);
        if tree.files.remove(&key).is_some() {
            return Ok(());
        }
        if !tree.dirs.remove(&key) {
            return Err(self.not_found(&key));
        }
        let prefix = format!("{}/", key);
        tree.files.retain(|p, _| !p.starts_with(&prefix));
        tree.dirs.retain(|p| !p.starts_with(&prefix));
        Ok(())
    }

    async fn rename_entry(&self, from: &str, to: &str) -> Result<(), WorkspaceError> {
        let from_key = self.key(from)?;
        let to_key = self.key(to)?;
        let mut tree = lock(&self.tree);
        if !tree.exists(&from_key) {
            return Err(self.not_found(&from_key));
        }
        tree.add_parents(&to_key);
        if let Some(content) = tree.files.remove(&from_key) {
            tree.files.insert(to_key, content);
            return Ok(());
        }
        let prefix = format!("{}/", from_key);
        let moved_files: Vec<(String, String)> = tree
            .files
            .iter()
            .filter(|(p, _)| p.starts_with(&prefix))
            .map(|(p, c)| (p.clone(), c.clone()))
            .collect();
        let moved_dirs: Vec<String> = tree
            .dirs
            .iter()
            .filter(|p| p.starts_with(&prefix))
            .cloned()
            .collect();
        for (p, c) in moved_files {
            tree.files.remove(&p);
            tree.files.insert(format!("{}/{}", to_key, &p[prefix.len()..]), c);
        }
        for p in moved_dirs {
            tree.dirs.remove(&p);
            tree.dirs.insert(format!("{}/{}", to_key, &p[prefix.len()..]));
        }
        tree.dirs.remove(&from_key);
        tree.dirs.insert(to_key);
        Ok(())
    }

    async fn list_directory(
        &self,
        path: &str,
        recursive: bool,
    ) -> Result<Vec<DirEntry>, WorkspaceError> {
        let key = self.key(path)?;
        let tree = lock(&self.tree);
        let prefix = if key == "." {
            String::new()
        } else {
            if !tree.dirs.contains(&key) {
                return Err(self.not_found(&key));
            }
            format!("{}/", key)
        };
        let wanted = |p: &str| {
            p.strip_prefix(prefix.as_str())
                .map(|rest| !rest.is_empty() && (recursive || !rest.contains('/')))
                .unwrap_or(false)
        };
        let mut entries: Vec<DirEntry> = tree
            .dirs
            .iter()
            .filter(|p| wanted(p.as_str()))
            .map(|p| DirEntry {
                path: p.clone(),
                is_directory: true,
            })
            .chain(tree.files.keys().filter(|p| wanted(p.as_str())).map(|p| DirEntry {
                path: p.clone(),
                is_directory: false,
            }))
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }
}

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

/// Observer that records every notification.
#[derive(Default)]
pub struct RecordingObserver {
    lines: Mutex<Vec<TranscriptLine>>,
    artifacts: Mutex<Vec<Artifact>>,
    refreshes: Mutex<Vec<Vec<DirEntry>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<TranscriptLine> {
        lock(&self.lines).clone()
    }

    pub fn artifacts(&self) -> Vec<Artifact> {
        lock(&self.artifacts).clone()
    }

    /// Directory listings delivered so far, oldest first.
    pub fn refreshes(&self) -> Vec<Vec<DirEntry>> {
        lock(&self.refreshes).clone()
    }
}

#[async_trait]
impl WorkspaceObserver for RecordingObserver {
    async fn on_transcript_line(&self, line: &TranscriptLine) {
        lock(&self.lines).push(line.clone());
    }

    async fn on_artifact(&self, artifact: &Artifact) {
        lock(&self.artifacts).push(artifact.clone());
    }

    async fn on_directory_refreshed(&self, entries: &[DirEntry]) {
        lock(&self.refreshes).push(entries.to_vec());
    }
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

/// Tool executor that records calls and answers `"<tool_type> ok"`.
pub struct RecordingTools {
    known: Vec<String>,
    writes: HashSet<String>,
    failing: HashSet<String>,
    calls: Mutex<Vec<(String, serde_json::Value)>>,
}

impl RecordingTools {
    /// Knows the standard catalog with its write-type tools.
    pub fn new() -> Self {
        let known = [
            "read_file",
            "write_to_file",
            "create_directory",
            "delete_file",
            "rename_file",
            "list_files",
            "execute_command",
        ];
        let writes = ["write_to_file", "create_directory", "delete_file", "rename_file"];
        Self {
            known: known.iter().map(|s| s.to_string()).collect(),
            writes: writes.iter().map(|s| s.to_string()).collect(),
            failing: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Make `tool_type` fail when executed.
    pub fn with_failure(mut self, tool_type: &str) -> Self {
        self.failing.insert(tool_type.to_string());
        self
    }

    pub fn calls(&self) -> Vec<(String, serde_json::Value)> {
        lock(&self.calls).clone()
    }
}

impl Default for RecordingTools {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for RecordingTools {
    async fn execute(
        &self,
        tool_type: &str,
        params: serde_json::Value,
    ) -> Result<String, GateError> {
        if !self.known.iter().any(|k| k == tool_type) {
            return Err(ApprovalError::UnknownTool {
                tool_type: tool_type.to_string(),
            }
            .into());
        }
        lock(&self.calls).push((tool_type.to_string(), params));
        if self.failing.contains(tool_type) {
            return Err(WorkspaceError::NotFound {
                path: PathBuf::from("scripted-failure"),
            }
            .into());
        }
        Ok(format!("{} ok", tool_type))
    }

    fn is_workspace_write(&self, tool_type: &str) -> bool {
        self.writes.contains(tool_type)
    }

    fn tool_types(&self) -> Vec<String> {
        self.known.clone()
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// One of each double, kept as concrete types so tests can inspect them.
pub struct TestHarness {
    pub model: Arc<MockModel>,
    pub fs: Arc<MemoryWorkspace>,
    pub shell: Arc<FakeShell>,
    pub toolchain: Arc<FakeToolchain>,
    pub confirm: Arc<ScriptedConfirm>,
    pub observer: Arc<RecordingObserver>,
}

impl TestHarness {
    /// Empty workspace, silent model, permissive confirmation.
    pub fn new() -> Self {
        Self {
            model: Arc::new(MockModel::new()),
            fs: Arc::new(MemoryWorkspace::new()),
            shell: Arc::new(FakeShell::new()),
            toolchain: Arc::new(FakeToolchain::new()),
            confirm: Arc::new(ScriptedConfirm::always(true)),
            observer: Arc::new(RecordingObserver::new()),
        }
    }

    pub fn with_model(mut self, model: MockModel) -> Self {
        self.model = Arc::new(model);
        self
    }

    pub fn with_fs(mut self, fs: MemoryWorkspace) -> Self {
        self.fs = Arc::new(fs);
        self
    }

    pub fn with_shell(mut self, shell: FakeShell) -> Self {
        self.shell = Arc::new(shell);
        self
    }

    pub fn with_toolchain(mut self, toolchain: FakeToolchain) -> Self {
        self.toolchain = Arc::new(toolchain);
        self
    }

    pub fn with_confirm(mut self, confirm: ScriptedConfirm) -> Self {
        self.confirm = Arc::new(confirm);
        self
    }

    /// An [`AppContext`] wired to these doubles.
    pub fn context(&self, config: GateConfig) -> AppContext {
        AppContext {
            config,
            model: self.model.clone(),
            fs: self.fs.clone(),
            shell: self.shell.clone(),
            toolchain: self.toolchain.clone(),
            confirm: self.confirm.clone(),
            observer: self.observer.clone(),
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
