//! Port traits for the collaborators the core drives.
//!
//! The engine and both orchestrators only ever talk to the outside world
//! through these traits. Concrete adapters live in `actiongate-tools` (local
//! filesystem, real shell) and in the CLI (interactive confirmation); test
//! doubles live in [`crate::testing`].

use crate::error::{GateError, ShellError, WorkspaceError};
use crate::types::{Artifact, CommandOutput, DirEntry, TranscriptLine, WriteOutcome};
use async_trait::async_trait;
use std::path::Path;

/// Filesystem access rooted at a single workspace directory.
///
/// All `path` arguments are workspace-relative strings as written by the
/// model. Implementations must resolve them through
/// [`crate::workspace::WorkspaceGuard`] before touching disk.
#[async_trait]
pub trait WorkspaceFs: Send + Sync {
    /// The workspace root, resolved once at startup.
    fn root(&self) -> &Path;

    async fn read_file(&self, path: &str) -> Result<String, WorkspaceError>;

    /// Write `content`, creating parent directories as needed.
    async fn write_file(&self, path: &str, content: &str) -> Result<WriteOutcome, WorkspaceError>;

    /// Create an empty file or a directory (with parents).
    async fn create_entry(&self, path: &str, is_directory: bool) -> Result<(), WorkspaceError>;

    /// Delete a file or a directory tree.
    async fn delete_entry(&self, path: &str) -> Result<(), WorkspaceError>;

    async fn rename_entry(&self, from: &str, to: &str) -> Result<(), WorkspaceError>;

    /// List `path`, optionally descending into subdirectories.
    async fn list_directory(
        &self,
        path: &str,
        recursive: bool,
    ) -> Result<Vec<DirEntry>, WorkspaceError>;
}

/// Runs shell commands.
#[async_trait]
pub trait ShellPort: Send + Sync {
    /// Run `command` through the platform shell in `working_dir`.
    ///
    /// A non-zero exit is reported through [`CommandOutput::success`], not as an error.
    async fn run_command(
        &self,
        command: &str,
        working_dir: &Path,
    ) -> Result<CommandOutput, ShellError>;
}

/// Probes for and installs toolchains.
#[async_trait]
pub trait ToolchainPort: Send + Sync {
    /// Side-effect-free presence check using the catalog's probe command.
    async fn is_present(&self, name: &str, probe: &str) -> bool;

    /// Run the catalog's install command for `name`.
    async fn install(&self, name: &str, command: &str) -> Result<CommandOutput, ShellError>;
}

/// Human confirmation for commands, installs, bulk apply, and deletion.
#[async_trait]
pub trait ConfirmationPort: Send + Sync {
    /// Ask `question` and wait for the answer.
    async fn confirm(&self, question: &str) -> bool;
}

/// Receives progress notifications from the engine and orchestrators.
///
/// Default implementations do nothing.
#[async_trait]
pub trait WorkspaceObserver: Send + Sync {
    /// A line was appended to the transcript.
    async fn on_transcript_line(&self, _line: &TranscriptLine) {}

    /// A file or directory was written; editors should refresh or open it.
    async fn on_artifact(&self, _artifact: &Artifact) {}

    /// The directory listing was re-read.
    async fn on_directory_refreshed(&self, _entries: &[DirEntry]) {}
}

/// Observer that ignores everything.
pub struct NoOpObserver;

#[async_trait]
impl WorkspaceObserver for NoOpObserver {}

/// Executes approve-mode tools by type name.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run `tool_type` with `params` and return its textual result.
    async fn execute(
        &self,
        tool_type: &str,
        params: serde_json::Value,
    ) -> Result<String, GateError>;

    /// Whether `tool_type` writes to the workspace tree.
    fn is_workspace_write(&self, tool_type: &str) -> bool;

    /// Tool types this executor knows, in catalog order.
    fn tool_types(&self) -> Vec<String>;
}
