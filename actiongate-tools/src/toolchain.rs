//! Toolchain probe and installer on top of a [`ShellPort`].

use actiongate_core::error::ShellError;
use actiongate_core::ports::{ShellPort, ToolchainPort};
use actiongate_core::types::CommandOutput;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Runs catalog probe and install commands through the shell, from the workspace root.
pub struct ShellToolchain {
    shell: Arc<dyn ShellPort>,
    root: PathBuf,
}

impl ShellToolchain {
    pub fn new(shell: Arc<dyn ShellPort>, root: impl Into<PathBuf>) -> Self {
        Self {
            shell,
            root: root.into(),
        }
    }
}

#[async_trait]
impl ToolchainPort for ShellToolchain {
    async fn is_present(&self, name: &str, probe: &str) -> bool {
        match self.shell.run_command(probe, &self.root).await {
            Ok(out) => {
                debug!(toolchain = %name, present = out.success, "Probed toolchain");
                out.success
            }
            Err(e) => {
                debug!(toolchain = %name, error = %e, "Toolchain probe failed");
                false
            }
        }
    }

    async fn install(&self, name: &str, command: &str) -> Result<CommandOutput, ShellError> {
        info!(toolchain = %name, command = %command, "Installing toolchain");
        let out = self.shell.run_command(command, &self.root).await?;
        if !out.success {
            warn!(toolchain = %name, exit_code = out.exit_code, "Toolchain install failed");
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actiongate_core::testing::FakeShell;

    #[tokio::test]
    async fn test_probe_uses_exit_status() {
        let shell = Arc::new(
            FakeShell::new()
                .with_output("python3 --version", CommandOutput::ok("Python 3.12.1"))
                .with_output("node --version", CommandOutput::failed(127, "node: not found")),
        );
        let toolchain = ShellToolchain::new(shell.clone(), "/work");
        assert!(toolchain.is_present("python", "python3 --version").await);
        assert!(!toolchain.is_present("node", "node --version").await);
        assert!(shell.calls().iter().all(|(_, cwd)| cwd == &PathBuf::from("/work")));
    }

    #[tokio::test]
    async fn test_spawn_failure_means_absent() {
        let shell = Arc::new(FakeShell::new().with_spawn_failure("npm --version"));
        let toolchain = ShellToolchain::new(shell, "/work");
        assert!(!toolchain.is_present("npm", "npm --version").await);
    }

    #[tokio::test]
    async fn test_install_returns_output() {
        let shell = Arc::new(
            FakeShell::new().with_output("brew install node", CommandOutput::failed(1, "no brew")),
        );
        let toolchain = ShellToolchain::new(shell, "/work");
        let out = toolchain.install("node", "brew install node").await.unwrap();
        assert!(!out.success);
        assert_eq!(out.stderr, "no brew");
    }
}
