//! Model provider implementations.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatModel;

use crate::config::ModelConfig;
use crate::error::ModelError;
use crate::model::ModelPort;
use std::sync::Arc;

/// Build the provider named in `config.provider`.
///
/// Every supported provider speaks the OpenAI chat-completions dialect.
pub fn create_model(config: &ModelConfig) -> Result<Arc<dyn ModelPort>, ModelError> {
    match config.provider.as_str() {
        "openai" | "openai-compatible" | "ollama" | "vllm" | "lmstudio" => {
            Ok(Arc::new(OpenAiCompatModel::new(config)?))
        }
        other => Err(ModelError::ApiRequest {
            message: format!("Unsupported provider '{}'", other),
        }),
    }
}
