//! Core type definitions for ActionGate.
//!
//! Defines the data structures shared by the parser, the execution engine and
//! both orchestrators: action requests, transcript lines, chat turns, command
//! output and the retry budget.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The kind of operation an action marker asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    CreateFile,
    ModifyFile,
    DeleteFile,
    RunCommand,
}

impl ActionKind {
    /// Whether this action writes to (or removes from) the workspace tree.
    pub fn changes_files(&self) -> bool {
        !matches!(self, ActionKind::RunCommand)
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::CreateFile => write!(f, "create file"),
            ActionKind::ModifyFile => write!(f, "modify file"),
            ActionKind::DeleteFile => write!(f, "delete file"),
            ActionKind::RunCommand => write!(f, "run"),
        }
    }
}

/// One instruction parsed out of a model response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl ActionRequest {
    pub fn create_file(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::CreateFile,
            path: Some(path.into()),
            content: Some(content.into()),
            command: None,
        }
    }

    pub fn modify_file(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::ModifyFile,
            path: Some(path.into()),
            content: Some(content.into()),
            command: None,
        }
    }

    pub fn delete_file(path: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::DeleteFile,
            path: Some(path.into()),
            content: None,
            command: None,
        }
    }

    pub fn run(command: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::RunCommand,
            path: None,
            content: None,
            command: Some(command.into()),
        }
    }

    /// Short human-readable label used in transcripts and logs.
    pub fn label(&self) -> String {
        match self.kind {
            ActionKind::RunCommand => {
                format!("{}: {}", self.kind, self.command.as_deref().unwrap_or(""))
            }
            _ => format!("{}: {}", self.kind, self.path.as_deref().unwrap_or("")),
        }
    }
}

/// Classification of a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptKind {
    Input,
    Output,
    Error,
}

/// One line of the execution transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptLine {
    pub kind: TranscriptKind,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only record of what a run did, in order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    lines: Vec<TranscriptLine>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line and return a reference to it.
    pub fn push(&mut self, kind: TranscriptKind, text: impl Into<String>) -> &TranscriptLine {
        self.lines.push(TranscriptLine {
            kind,
            text: text.into(),
            timestamp: Utc::now(),
        });
        // Just pushed, so the vector is non-empty.
        &self.lines[self.lines.len() - 1]
    }

    pub fn input(&mut self, text: impl Into<String>) -> &TranscriptLine {
        self.push(TranscriptKind::Input, text)
    }

    pub fn output(&mut self, text: impl Into<String>) -> &TranscriptLine {
        self.push(TranscriptKind::Output, text)
    }

    pub fn error(&mut self, text: impl Into<String>) -> &TranscriptLine {
        self.push(TranscriptKind::Error, text)
    }

    pub fn lines(&self) -> &[TranscriptLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Lines appended at or after `start`.
    pub fn since(&self, start: usize) -> &[TranscriptLine] {
        &self.lines[start.min(self.lines.len())..]
    }

    /// Whether any line of `kind` contains `needle`.
    pub fn contains(&self, kind: TranscriptKind, needle: &str) -> bool {
        self.lines
            .iter()
            .any(|l| l.kind == kind && l.text.contains(needle))
    }

    /// Render the transcript as plain text, one prefixed line per entry.
    pub fn render(&self) -> String {
        self.lines
            .iter()
            .map(|l| {
                let prefix = match l.kind {
                    TranscriptKind::Input => "$ ",
                    TranscriptKind::Output => "",
                    TranscriptKind::Error => "! ",
                };
                format!("{}{}", prefix, l.text)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Participant role in a model conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single `{role, content}` turn replayed to the model as context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Result of one shell invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub success: bool,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
            success: true,
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
            success: false,
        }
    }

    /// stdout followed by stderr, as scanned for missing-toolchain signatures.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (true, _) => self.stderr.clone(),
            (false, true) => self.stdout.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// An entry returned by a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Path relative to the workspace root, `/`-separated.
    pub path: String,
    pub is_directory: bool,
}

/// What a write did to the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    Created,
    Updated,
}

/// Counter that bounds recursive remediation and follow-up rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryBudget {
    pub iteration: usize,
    pub cap: usize,
}

impl RetryBudget {
    pub const DEFAULT_CAP: usize = 5;

    pub fn new(cap: usize) -> Self {
        Self { iteration: 0, cap }
    }

    /// The budget for one level deeper.
    pub fn next(self) -> Self {
        Self {
            iteration: self.iteration + 1,
            cap: self.cap,
        }
    }

    pub fn exhausted(&self) -> bool {
        self.iteration >= self.cap
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAP)
    }
}

/// An artifact produced by an action, reported to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Artifact {
    FileCreated { path: PathBuf },
    FileModified { path: PathBuf },
    FileDeleted { path: PathBuf },
    DirectoryCreated { path: PathBuf },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_constructors() {
        let a = ActionRequest::create_file("src/a.txt", "hello");
        assert_eq!(a.kind, ActionKind::CreateFile);
        assert_eq!(a.path.as_deref(), Some("src/a.txt"));
        assert_eq!(a.content.as_deref(), Some("hello"));
        assert!(a.command.is_none());

        let r = ActionRequest::run("echo hi");
        assert_eq!(r.kind, ActionKind::RunCommand);
        assert_eq!(r.label(), "run: echo hi");
    }

    #[test]
    fn test_action_kind_changes_files() {
        assert!(ActionKind::CreateFile.changes_files());
        assert!(ActionKind::ModifyFile.changes_files());
        assert!(ActionKind::DeleteFile.changes_files());
        assert!(!ActionKind::RunCommand.changes_files());
    }

    #[test]
    fn test_action_serde_skips_empty_fields() {
        let json = serde_json::to_value(ActionRequest::run("ls")).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "run_command", "command": "ls"}));
    }

    #[test]
    fn test_transcript_append_only_order() {
        let mut t = Transcript::new();
        t.input("echo hi");
        t.output("hi");
        t.error("boom");
        let kinds: Vec<_> = t.lines().iter().map(|l| l.kind).collect();
        assert_eq!(
            kinds,
            vec![TranscriptKind::Input, TranscriptKind::Output, TranscriptKind::Error]
        );
        assert!(t.contains(TranscriptKind::Output, "hi"));
        assert!(!t.contains(TranscriptKind::Error, "hi"));
        assert_eq!(t.since(2).len(), 1);
        assert_eq!(t.since(10).len(), 0);
    }

    #[test]
    fn test_transcript_render() {
        let mut t = Transcript::new();
        t.input("ls");
        t.output("a.txt");
        t.error("nope");
        assert_eq!(t.render(), "$ ls\na.txt\n! nope");
    }

    #[test]
    fn test_command_output_combined() {
        let out = CommandOutput {
            stdout: "out".into(),
            stderr: "err".into(),
            exit_code: 1,
            success: false,
        };
        assert_eq!(out.combined(), "out\nerr");
        assert_eq!(CommandOutput::ok("x").combined(), "x");
        assert_eq!(CommandOutput::failed(127, "y").combined(), "y");
    }

    #[test]
    fn test_retry_budget() {
        let b = RetryBudget::default();
        assert_eq!(b.cap, 5);
        assert!(!b.exhausted());
        let mut deep = b;
        for _ in 0..5 {
            deep = deep.next();
        }
        assert!(deep.exhausted());
        assert!(!RetryBudget::new(1).exhausted());
        assert!(RetryBudget::new(0).exhausted());
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::User.to_string(), "user");
        assert_eq!(
            serde_json::to_string(&ChatTurn::assistant("ok")).unwrap(),
            r#"{"role":"assistant","content":"ok"}"#
        );
    }
}
