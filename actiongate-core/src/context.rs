//! Application context: configuration plus every injected port.

use crate::config::GateConfig;
use crate::error::ConfigError;
use crate::model::ModelPort;
use crate::ports::{
    ConfirmationPort, NoOpObserver, ShellPort, ToolchainPort, WorkspaceFs, WorkspaceObserver,
};
use std::sync::Arc;

/// Everything the engine and orchestrators need, built once at startup.
#[derive(Clone)]
pub struct AppContext {
    pub config: GateConfig,
    pub model: Arc<dyn ModelPort>,
    pub fs: Arc<dyn WorkspaceFs>,
    pub shell: Arc<dyn ShellPort>,
    pub toolchain: Arc<dyn ToolchainPort>,
    pub confirm: Arc<dyn ConfirmationPort>,
    pub observer: Arc<dyn WorkspaceObserver>,
}

impl AppContext {
    pub fn builder(config: GateConfig) -> AppContextBuilder {
        AppContextBuilder {
            config,
            model: None,
            fs: None,
            shell: None,
            toolchain: None,
            confirm: None,
            observer: None,
        }
    }
}

/// Builder for [`AppContext`]. The observer is optional; every other port is required.
pub struct AppContextBuilder {
    config: GateConfig,
    model: Option<Arc<dyn ModelPort>>,
    fs: Option<Arc<dyn WorkspaceFs>>,
    shell: Option<Arc<dyn ShellPort>>,
    toolchain: Option<Arc<dyn ToolchainPort>>,
    confirm: Option<Arc<dyn ConfirmationPort>>,
    observer: Option<Arc<dyn WorkspaceObserver>>,
}

impl AppContextBuilder {
    pub fn model(mut self, model: Arc<dyn ModelPort>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn fs(mut self, fs: Arc<dyn WorkspaceFs>) -> Self {
        self.fs = Some(fs);
        self
    }

    pub fn shell(mut self, shell: Arc<dyn ShellPort>) -> Self {
        self.shell = Some(shell);
        self
    }

    pub fn toolchain(mut self, toolchain: Arc<dyn ToolchainPort>) -> Self {
        self.toolchain = Some(toolchain);
        self
    }

    pub fn confirm(mut self, confirm: Arc<dyn ConfirmationPort>) -> Self {
        self.confirm = Some(confirm);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn WorkspaceObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> Result<AppContext, ConfigError> {
        fn missing(port: &str) -> ConfigError {
            ConfigError::Invalid {
                message: format!("application context is missing the {} port", port),
            }
        }
        Ok(AppContext {
            config: self.config,
            model: self.model.ok_or_else(|| missing("model"))?,
            fs: self.fs.ok_or_else(|| missing("workspace filesystem"))?,
            shell: self.shell.ok_or_else(|| missing("shell"))?,
            toolchain: self.toolchain.ok_or_else(|| missing("toolchain"))?,
            confirm: self.confirm.ok_or_else(|| missing("confirmation"))?,
            observer: self.observer.unwrap_or_else(|| Arc::new(NoOpObserver)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeShell, FakeToolchain, MemoryWorkspace, MockModel, ScriptedConfirm};

    #[test]
    fn test_builder_requires_ports() {
        let err = AppContext::builder(GateConfig::default())
            .model(Arc::new(MockModel::new()))
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("workspace filesystem"));
    }

    #[test]
    fn test_builder_defaults_observer() {
        let ctx = AppContext::builder(GateConfig::default())
            .model(Arc::new(MockModel::new()))
            .fs(Arc::new(MemoryWorkspace::new()))
            .shell(Arc::new(FakeShell::new()))
            .toolchain(Arc::new(FakeToolchain::new()))
            .confirm(Arc::new(ScriptedConfirm::always(true)))
            .build();
        assert!(ctx.is_ok());
    }
}
