//! The approve-mode tool catalog.
//!
//! Every tool goes through the [`WorkspaceFs`] port, so paths are guarded the
//! same way as marker actions.

use crate::registry::Tool;
use actiongate_core::error::{ApprovalError, GateError};
use actiongate_core::ports::{ShellPort, WorkspaceFs};
use actiongate_core::types::WriteOutcome;
use actiongate_core::workspace::WorkspaceGuard;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

fn required_str<'a>(
    args: &'a serde_json::Value,
    tool: &str,
    key: &str,
) -> Result<&'a str, GateError> {
    args[key].as_str().ok_or_else(|| {
        ApprovalError::InvalidParams {
            tool_type: tool.to_string(),
            reason: format!("'{}' parameter is required", key),
        }
        .into()
    })
}

/// Read a file's contents.
pub struct ReadFileTool {
    fs: Arc<dyn WorkspaceFs>,
}

impl ReadFileTool {
    pub fn new(fs: Arc<dyn WorkspaceFs>) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file in the workspace."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the workspace root" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, GateError> {
        let path = required_str(&args, self.name(), "path")?;
        Ok(self.fs.read_file(path).await?)
    }
}

/// Write a whole file, creating parents.
pub struct WriteToFileTool {
    fs: Arc<dyn WorkspaceFs>,
}

impl WriteToFileTool {
    pub fn new(fs: Arc<dyn WorkspaceFs>) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for WriteToFileTool {
    fn name(&self) -> &str {
        "write_to_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file with the given content."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the workspace root" },
                "content": { "type": "string", "description": "Complete file content" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, GateError> {
        let path = required_str(&args, self.name(), "path")?;
        let content = required_str(&args, self.name(), "content")?;
        let action = match self.fs.write_file(path, content).await? {
            WriteOutcome::Created => "Created",
            WriteOutcome::Updated => "Updated",
        };
        Ok(format!("{} '{}' ({} bytes)", action, path, content.len()))
    }

    fn writes_workspace(&self) -> bool {
        true
    }
}

/// Create a directory and its parents.
pub struct CreateDirectoryTool {
    fs: Arc<dyn WorkspaceFs>,
}

impl CreateDirectoryTool {
    pub fn new(fs: Arc<dyn WorkspaceFs>) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for CreateDirectoryTool {
    fn name(&self) -> &str {
        "create_directory"
    }

    fn description(&self) -> &str {
        "Create a directory, including missing parents."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory relative to the workspace root" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, GateError> {
        let path = required_str(&args, self.name(), "path")?;
        self.fs.create_entry(path, true).await?;
        Ok(format!("Created directory '{}'", path))
    }

    fn writes_workspace(&self) -> bool {
        true
    }
}

/// Delete a file or directory tree.
pub struct DeleteFileTool {
    fs: Arc<dyn WorkspaceFs>,
}

impl DeleteFileTool {
    pub fn new(fs: Arc<dyn WorkspaceFs>) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file, or a directory with everything in it."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the workspace root" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, GateError> {
        let path = required_str(&args, self.name(), "path")?;
        self.fs.delete_entry(path).await?;
        Ok(format!("Deleted '{}'", path))
    }

    fn writes_workspace(&self) -> bool {
        true
    }
}

/// Move or rename an entry.
pub struct RenameFileTool {
    fs: Arc<dyn WorkspaceFs>,
}

impl RenameFileTool {
    pub fn new(fs: Arc<dyn WorkspaceFs>) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for RenameFileTool {
    fn name(&self) -> &str {
        "rename_file"
    }

    fn description(&self) -> &str {
        "Rename or move a file or directory inside the workspace."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "old_path": { "type": "string", "description": "Current path" },
                "new_path": { "type": "string", "description": "New path" }
            },
            "required": ["old_path", "new_path"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, GateError> {
        let old_path = required_str(&args, self.name(), "old_path")?;
        let new_path = required_str(&args, self.name(), "new_path")?;
        self.fs.rename_entry(old_path, new_path).await?;
        Ok(format!("Renamed '{}' to '{}'", old_path, new_path))
    }

    fn writes_workspace(&self) -> bool {
        true
    }
}

/// List a directory.
pub struct ListFilesTool {
    fs: Arc<dyn WorkspaceFs>,
}

impl ListFilesTool {
    pub fn new(fs: Arc<dyn WorkspaceFs>) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files and directories. Recursive listings skip .gitignore'd entries."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory, defaults to '.'" },
                "recursive": { "type": "boolean", "description": "Descend into subdirectories" }
            }
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, GateError> {
        let path = args["path"].as_str().unwrap_or(".");
        let recursive = args["recursive"].as_bool().unwrap_or(false);
        let entries = self.fs.list_directory(path, recursive).await?;
        if entries.is_empty() {
            return Ok(format!("Directory '{}' is empty", path));
        }
        let lines: Vec<String> = entries
            .iter()
            .map(|e| {
                let suffix = if e.is_directory { "/" } else { "" };
                format!("{}{}", e.path, suffix)
            })
            .collect();
        Ok(format!("Contents of '{}':\n{}", path, lines.join("\n")))
    }
}

/// Run a shell command inside the workspace.
pub struct ExecuteCommandTool {
    fs: Arc<dyn WorkspaceFs>,
    shell: Arc<dyn ShellPort>,
    command_timeout: Duration,
}

impl ExecuteCommandTool {
    pub fn new(
        fs: Arc<dyn WorkspaceFs>,
        shell: Arc<dyn ShellPort>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            fs,
            shell,
            command_timeout,
        }
    }
}

#[async_trait]
impl Tool for ExecuteCommandTool {
    fn name(&self) -> &str {
        "execute_command"
    }

    fn description(&self) -> &str {
        "Execute a shell command. Returns stdout, stderr, and exit code."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "The shell command to execute" },
                "working_dir": {
                    "type": "string",
                    "description": "Working directory (relative to workspace). Defaults to workspace root."
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, GateError> {
        let command = required_str(&args, self.name(), "command")?;
        let working_dir = args["working_dir"].as_str().unwrap_or(".");
        let cwd = WorkspaceGuard::new(self.fs.root()).resolve(working_dir)?;
        debug!(command = %command, cwd = %cwd.display(), "Executing approved command");

        let out = self.shell.run_command(command, &cwd).await?;
        Ok(format!(
            "Exit code: {}\n\n--- stdout ---\n{}\n--- stderr ---\n{}",
            out.exit_code,
            if out.stdout.is_empty() { "(empty)" } else { &out.stdout },
            if out.stderr.is_empty() { "(empty)" } else { &out.stderr }
        ))
    }

    // The shell enforces its own limit; leave it room to report the timeout.
    fn timeout(&self) -> Duration {
        self.command_timeout + Duration::from_secs(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ToolRegistry;
    use crate::register_builtin_tools;
    use actiongate_core::ports::ToolExecutor;
    use actiongate_core::testing::{FakeShell, MemoryWorkspace};
    use actiongate_core::types::CommandOutput;
    use serde_json::json;

    fn registry(fs: Arc<MemoryWorkspace>, shell: Arc<FakeShell>) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry, fs, shell, Duration::from_secs(5));
        registry
    }

    #[test]
    fn test_catalog_order_and_write_types() {
        let r = registry(Arc::new(MemoryWorkspace::new()), Arc::new(FakeShell::new()));
        assert_eq!(
            r.tool_types(),
            vec![
                "read_file",
                "write_to_file",
                "create_directory",
                "delete_file",
                "rename_file",
                "list_files",
                "execute_command"
            ]
        );
        let writes: Vec<String> = r
            .tool_types()
            .into_iter()
            .filter(|t| r.is_workspace_write(t))
            .collect();
        assert_eq!(
            writes,
            vec!["write_to_file", "create_directory", "delete_file", "rename_file"]
        );
    }

    #[tokio::test]
    async fn test_file_tools_round_trip() {
        let fs = Arc::new(MemoryWorkspace::new());
        let r = registry(fs.clone(), Arc::new(FakeShell::new()));

        let out = r
            .execute("write_to_file", json!({"path": "src/a.txt", "content": "hi"}))
            .await
            .unwrap();
        assert_eq!(out, "Created 'src/a.txt' (2 bytes)");
        assert_eq!(
            r.execute("read_file", json!({"path": "src/a.txt"})).await.unwrap(),
            "hi"
        );
        r.execute("create_directory", json!({"path": "docs"})).await.unwrap();
        r.execute("rename_file", json!({"old_path": "src/a.txt", "new_path": "docs/a.txt"}))
            .await
            .unwrap();
        assert_eq!(fs.file("docs/a.txt").as_deref(), Some("hi"));

        let listing = r
            .execute("list_files", json!({"recursive": true}))
            .await
            .unwrap();
        assert!(listing.contains("docs/\n"));
        assert!(listing.contains("docs/a.txt"));

        r.execute("delete_file", json!({"path": "docs"})).await.unwrap();
        assert!(fs.file_paths().is_empty());
    }

    #[tokio::test]
    async fn test_missing_params_and_guard() {
        let r = registry(Arc::new(MemoryWorkspace::new()), Arc::new(FakeShell::new()));
        let err = r.execute("write_to_file", json!({"path": "a"})).await.unwrap_err();
        assert!(err.to_string().contains("'content' parameter is required"));
        let err = r
            .execute("write_to_file", json!({"path": "C:\\evil", "content": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Workspace(ref w) if w.is_guard_rejection()));
    }

    #[tokio::test]
    async fn test_execute_command_formats_output() {
        let fs = Arc::new(MemoryWorkspace::new());
        let shell = Arc::new(
            FakeShell::new().with_output("make", CommandOutput::failed(2, "no rule")),
        );
        let r = registry(fs.clone(), shell.clone());
        let out = r
            .execute("execute_command", json!({"command": "make", "working_dir": "sub"}))
            .await
            .unwrap();
        assert!(out.starts_with("Exit code: 2"));
        assert!(out.contains("--- stdout ---\n(empty)"));
        assert!(out.contains("no rule"));
        assert_eq!(shell.calls()[0].1, fs.root().join("sub"));

        let err = r
            .execute("execute_command", json!({"command": "ls", "working_dir": "../.."}))
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Workspace(_)));
    }
}
