//! Configuration system for ActionGate.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from `~/.config/actiongate/config.toml` and/or
//! `.actiongate/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
}

impl GateConfig {
    /// Collect warnings from every section.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.model.validate();
        warnings.extend(self.execution.validate());
        warnings.extend(self.verification.validate());
        warnings
    }
}

/// Model provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider name: "openai" or any OpenAI-compatible endpoint.
    pub provider: String,
    /// Model identifier (e.g., "gpt-4o").
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Sampling temperature.
    pub temperature: f32,
    /// Whether to stream responses token by token.
    pub use_streaming: bool,
    /// HTTP request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            max_tokens: 4096,
            temperature: 0.2,
            use_streaming: false,
            request_timeout_secs: 120,
        }
    }
}

impl ModelConfig {
    /// Validate this model config and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.temperature < 0.0 || self.temperature > 2.0 {
            warnings.push(format!(
                "temperature ({}) is outside the typical range 0.0-2.0",
                self.temperature
            ));
        }
        if self.model.trim().is_empty() {
            warnings.push("model is empty".to_string());
        }
        if self.request_timeout_secs == 0 {
            warnings.push("request_timeout_secs is 0; every model call will time out".to_string());
        }
        warnings
    }
}

/// Execution engine limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Cap on recursive remediation / follow-up depth.
    pub max_iterations: usize,
    /// Wall-clock limit for a single shell command.
    pub command_timeout_secs: u64,
    /// Maximum bytes of stdout (and separately stderr) kept per command.
    pub max_output_bytes: usize,
    /// Offer to install missing toolchains when a command reports one.
    pub auto_remediate: bool,
    /// Send failed transcripts back to the model for another round of actions.
    pub follow_up_on_failure: bool,
    /// Directory commands run in, relative to the workspace root.
    pub working_dir: String,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            command_timeout_secs: 120,
            max_output_bytes: 1_048_576, // 1MB
            auto_remediate: true,
            follow_up_on_failure: false,
            working_dir: ".".to_string(),
        }
    }
}

impl ExecutionConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.max_iterations == 0 {
            warnings.push(
                "max_iterations is 0; every batch will stop at the iteration cap".to_string(),
            );
        }
        if self.command_timeout_secs == 0 {
            warnings.push("command_timeout_secs is 0; every command will time out".to_string());
        }
        if self.max_output_bytes < 1024 {
            warnings.push(format!(
                "max_output_bytes ({}) is very small; command output will be truncated",
                self.max_output_bytes
            ));
        }
        if !crate::workspace::is_contained(&self.working_dir) {
            warnings.push(format!(
                "working_dir '{}' is not inside the workspace",
                self.working_dir
            ));
        }
        warnings
    }
}

/// Post-action verification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Command re-run after file-changing responses (e.g., "cargo test").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl VerificationConfig {
    pub fn validate(&self) -> Vec<String> {
        match &self.command {
            Some(cmd) if cmd.trim().is_empty() => {
                vec!["verification.command is set but empty".to_string()]
            }
            _ => Vec::new(),
        }
    }

    /// The configured command, ignoring blank values.
    pub fn command(&self) -> Option<&str> {
        self.command
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

/// Approve-mode behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Refresh the directory listing after an approved write-type tool succeeds.
    pub refresh_after_write: bool,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            refresh_after_write: true,
        }
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "actiongate", "actiongate")
}

/// Path of the workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".actiongate").join("config.toml")
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `ACTIONGATE_`)
/// 3. An explicit config file, if given
/// 4. Workspace-local config (`.actiongate/config.toml`)
/// 5. User config (`~/.config/actiongate/config.toml`)
/// 6. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    config_file: Option<&Path>,
    overrides: Option<&GateConfig>,
) -> Result<GateConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(GateConfig::default()));

    if let Some(dirs) = project_dirs() {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(file) = config_file {
        figment = figment.merge(Toml::file(file));
    }

    // ACTIONGATE_EXECUTION__MAX_ITERATIONS, ACTIONGATE_MODEL__MODEL, ...
    figment = figment.merge(Env::prefixed("ACTIONGATE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Check whether any configuration file exists (user-level or workspace-level).
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if let Some(dirs) = project_dirs()
        && dirs.config_dir().join("config.toml").exists()
    {
        return true;
    }
    workspace
        .map(|ws| workspace_config_path(ws).exists())
        .unwrap_or(false)
}

/// Write a default `.actiongate/config.toml` into the workspace.
///
/// Refuses to overwrite an existing file. Returns the path written.
pub fn init_workspace_config(workspace: &Path) -> anyhow::Result<PathBuf> {
    let path = workspace_config_path(workspace);
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(&GateConfig::default())?;
    std::fs::write(&path, body)?;
    Ok(path)
}
