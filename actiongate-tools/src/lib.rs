//! # ActionGate Tools
//!
//! Concrete adapters for the ActionGate core ports: the local workspace
//! filesystem, the platform shell, the toolchain probe/installer, and the
//! tool registry that backs approve mode.

pub mod builtin;
pub mod file;
pub mod registry;
pub mod shell;
pub mod toolchain;

pub use file::LocalWorkspace;
pub use registry::{Tool, ToolRegistry};
pub use shell::{ShellLine, ShellRunner};
pub use toolchain::ShellToolchain;

use actiongate_core::ports::{ShellPort, WorkspaceFs};
use std::sync::Arc;
use std::time::Duration;

/// Register the approve-mode tool catalog, in catalog order.
pub fn register_builtin_tools(
    registry: &mut ToolRegistry,
    fs: Arc<dyn WorkspaceFs>,
    shell: Arc<dyn ShellPort>,
    command_timeout: Duration,
) {
    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(builtin::ReadFileTool::new(fs.clone())),
        Arc::new(builtin::WriteToFileTool::new(fs.clone())),
        Arc::new(builtin::CreateDirectoryTool::new(fs.clone())),
        Arc::new(builtin::DeleteFileTool::new(fs.clone())),
        Arc::new(builtin::RenameFileTool::new(fs.clone())),
        Arc::new(builtin::ListFilesTool::new(fs.clone())),
        Arc::new(builtin::ExecuteCommandTool::new(fs, shell, command_timeout)),
    ];

    for tool in tools {
        if let Err(e) = registry.register(tool) {
            tracing::warn!("Failed to register tool: {}", e);
        }
    }
}
