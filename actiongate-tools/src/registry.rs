//! Tool registry: holds the approve-mode tools and executes them by type name.
//!
//! Tools are registered at startup. The registry keeps registration order so
//! the catalog shown to the model is stable, and applies each tool's timeout.

use actiongate_core::error::{ApprovalError, GateError};
use actiongate_core::ports::ToolExecutor;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Trait that all approve-mode tools implement.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The tool type the model names in its requests.
    fn name(&self) -> &str;

    /// Human-readable description of what this tool does.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given parameters.
    async fn execute(&self, args: serde_json::Value) -> Result<String, GateError>;

    /// Whether a successful run changes the workspace tree.
    fn writes_workspace(&self) -> bool {
        false
    }

    /// Maximum execution time before timeout.
    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }
}

/// The tool registry holds all registered tools and handles execution.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a tool. Returns error if a tool with the same name is already registered.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), GateError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ApprovalError::DuplicateTool { tool_type: name }.into());
        }
        debug!(tool = %name, "Registering tool");
        self.order.push(name.clone());
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    /// Execute a tool by name with the given arguments, applying its timeout.
    async fn execute(
        &self,
        tool_type: &str,
        params: serde_json::Value,
    ) -> Result<String, GateError> {
        let tool = self
            .tools
            .get(tool_type)
            .ok_or_else(|| ApprovalError::UnknownTool {
                tool_type: tool_type.to_string(),
            })?;

        let timeout = tool.timeout();
        info!(tool = %tool_type, timeout_secs = timeout.as_secs(), "Executing tool");

        match tokio::time::timeout(timeout, tool.execute(params)).await {
            Ok(result) => result,
            Err(_) => Err(ApprovalError::ToolTimeout {
                tool_type: tool_type.to_string(),
                timeout_secs: timeout.as_secs(),
            }
            .into()),
        }
    }

    fn is_workspace_write(&self, tool_type: &str) -> bool {
        self.tools
            .get(tool_type)
            .is_some_and(|t| t.writes_workspace())
    }

    fn tool_types(&self) -> Vec<String> {
        self.order.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple echo tool for testing.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes the input text back"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "Text to echo" }
                },
                "required": ["text"]
            })
        }

        async fn execute(&self, args: serde_json::Value) -> Result<String, GateError> {
            let text = args["text"]
                .as_str()
                .ok_or_else(|| ApprovalError::InvalidParams {
                    tool_type: "echo".to_string(),
                    reason: "missing 'text' parameter".to_string(),
                })?;
            Ok(format!("Echo: {}", text))
        }
    }

    /// A slow tool for timeout testing.
    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "A tool that takes forever"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }

        async fn execute(&self, _args: serde_json::Value) -> Result<String, GateError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("done".into())
        }

        fn writes_workspace(&self) -> bool {
            true
        }

        fn timeout(&self) -> Duration {
            Duration::from_millis(100)
        }
    }

    #[test]
    fn test_register_keeps_order() {
        let mut registry = ToolRegistry::new();
        assert!(registry.is_empty());
        registry.register(Arc::new(SlowTool)).unwrap();
        registry.register(Arc::new(EchoTool)).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.tool_types(), vec!["slow", "echo"]);
        assert!(registry.get("echo").is_some());
    }

    #[test]
    fn test_register_duplicate() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();
        match registry.register(Arc::new(EchoTool)).unwrap_err() {
            GateError::Approval(ApprovalError::DuplicateTool { tool_type }) => {
                assert_eq!(tool_type, "echo")
            }
            other => panic!("Expected DuplicateTool, got {other:?}"),
        }
    }

    #[test]
    fn test_write_classification() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();
        registry.register(Arc::new(SlowTool)).unwrap();
        assert!(!registry.is_workspace_write("echo"));
        assert!(registry.is_workspace_write("slow"));
        assert!(!registry.is_workspace_write("missing"));
    }

    #[tokio::test]
    async fn test_execute_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();
        let out = registry
            .execute("echo", serde_json::json!({"text": "hello"}))
            .await
            .unwrap();
        assert_eq!(out, "Echo: hello");
    }

    #[tokio::test]
    async fn test_execute_invalid_params() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();
        let err = registry
            .execute("echo", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GateError::Approval(ApprovalError::InvalidParams { .. })
        ));
    }

    #[tokio::test]
    async fn test_execute_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry
            .execute("format_disk", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GateError::Approval(ApprovalError::UnknownTool { .. })
        ));
    }

    #[tokio::test]
    async fn test_execute_timeout() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SlowTool)).unwrap();
        let err = registry
            .execute("slow", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GateError::Approval(ApprovalError::ToolTimeout { .. })
        ));
    }
}
