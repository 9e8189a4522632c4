//! Error types for the ActionGate core.
//!
//! Uses `thiserror` for public API error types with structured variants covering
//! the model boundary, workspace access, shell execution, the propose and
//! approval orchestrators, and configuration.

use std::path::PathBuf;

/// Top-level error type for the ActionGate core library.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("Shell error: {0}")]
    Shell(#[from] ShellError),

    #[error("Approval error: {0}")]
    Approval(#[from] ApprovalError),

    #[error("Propose error: {0}")]
    Propose(#[from] ProposeError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the model provider boundary.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Streaming error: {message}")]
    Streaming { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Request was cancelled")]
    Cancelled,
}

/// Errors from workspace filesystem access.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("Path '{path}' is outside the workspace: {reason}")]
    OutsideWorkspace { path: String, reason: String },

    #[error("Path not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Filesystem operation on '{path}' failed: {message}")]
    Io { path: PathBuf, message: String },
}

impl WorkspaceError {
    /// Whether this error came from the containment check rather than the filesystem.
    pub fn is_guard_rejection(&self) -> bool {
        matches!(self, WorkspaceError::OutsideWorkspace { .. })
    }
}

/// Errors from shell command execution.
#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("Failed to spawn '{command}': {message}")]
    Spawn { command: String, message: String },

    #[error("Command '{command}' timed out after {timeout_secs}s")]
    Timeout { command: String, timeout_secs: u64 },

    #[error("Failed to collect output of '{command}': {message}")]
    Output { command: String, message: String },
}

/// Errors from the tool-approval queue.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("No active approval run")]
    NoActiveRun,

    #[error("Unknown tool execution: {id}")]
    UnknownExecution { id: String },

    #[error("Unknown tool type: {tool_type}")]
    UnknownTool { tool_type: String },

    #[error("Invalid parameters for '{tool_type}': {reason}")]
    InvalidParams { tool_type: String, reason: String },

    #[error("Model returned an unusable tool plan: {message}")]
    MalformedPlan { message: String },

    #[error("Tool '{tool_type}' is already registered")]
    DuplicateTool { tool_type: String },

    #[error("Tool '{tool_type}' timed out after {timeout_secs}s")]
    ToolTimeout { tool_type: String, timeout_secs: u64 },
}

/// Errors from the propose-mode change set.
#[derive(Debug, thiserror::Error)]
pub enum ProposeError {
    #[error("No pending change set")]
    NoPendingChanges,

    #[error("No change at index {index} (run has {available})")]
    UnknownChange { index: usize, available: usize },

    #[error("Model returned an unusable change set: {message}")]
    MalformedChangeSet { message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `GateError`.
pub type Result<T> = std::result::Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_model() {
        let err = GateError::Model(ModelError::ApiRequest {
            message: "connection refused".into(),
        });
        assert_eq!(
            err.to_string(),
            "Model error: API request failed: connection refused"
        );
    }

    #[test]
    fn test_error_display_workspace() {
        let err = GateError::Workspace(WorkspaceError::OutsideWorkspace {
            path: "C:\\Windows".into(),
            reason: "absolute drive path".into(),
        });
        assert_eq!(
            err.to_string(),
            "Workspace error: Path 'C:\\Windows' is outside the workspace: absolute drive path"
        );
    }

    #[test]
    fn test_guard_rejection_classification() {
        let guard = WorkspaceError::OutsideWorkspace {
            path: "../x".into(),
            reason: "escapes root".into(),
        };
        let io = WorkspaceError::NotFound {
            path: PathBuf::from("missing.txt"),
        };
        assert!(guard.is_guard_rejection());
        assert!(!io.is_guard_rejection());
    }

    #[test]
    fn test_error_display_shell() {
        let err = ShellError::Timeout {
            command: "sleep 500".into(),
            timeout_secs: 120,
        };
        assert_eq!(
            err.to_string(),
            "Command 'sleep 500' timed out after 120s"
        );
    }

    #[test]
    fn test_error_display_approval() {
        let err = GateError::Approval(ApprovalError::UnknownExecution { id: "abc".into() });
        assert_eq!(
            err.to_string(),
            "Approval error: Unknown tool execution: abc"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: GateError = io_err.into();
        assert!(matches!(err, GateError::Io(_)));
    }

    #[test]
    fn test_error_from_serde() {
        let serde_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: GateError = serde_err.into();
        assert!(matches!(err, GateError::Serialization(_)));
    }
}
