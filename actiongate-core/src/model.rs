//! Model port: prompt in, text out.
//!
//! Defines the [`ModelPort`] trait every provider implements, the request
//! shape, cancellation helpers, and the JSON salvage used by the propose and
//! approve orchestrators to pull structured payloads out of chatty replies.

use crate::error::ModelError;
use crate::types::ChatTurn;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A single request to the model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRequest {
    /// The new user message.
    pub prompt: String,
    /// Prior turns replayed ahead of `prompt`.
    #[serde(default)]
    pub context: Vec<ChatTurn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl ModelRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: Vec<ChatTurn>) -> Self {
        self.context = context;
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// The full ordered message list: system prompt, context, then the prompt.
    pub fn turns(&self) -> Vec<ChatTurn> {
        let mut turns = Vec::with_capacity(self.context.len() + 2);
        if let Some(system) = &self.system_prompt {
            turns.push(ChatTurn::system(system.clone()));
        }
        turns.extend(self.context.iter().cloned());
        turns.push(ChatTurn::user(self.prompt.clone()));
        turns
    }
}

/// An opaque "ask the model" capability.
#[async_trait]
pub trait ModelPort: Send + Sync {
    /// Send a request and wait for the whole reply.
    async fn ask(&self, request: ModelRequest) -> Result<String, ModelError>;

    /// Send a request, forwarding text deltas to `tx` as they arrive.
    /// Returns the full reply once the stream ends.
    async fn ask_streaming(
        &self,
        request: ModelRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<String, ModelError> {
        let text = self.ask(request).await?;
        let _ = tx.send(text.clone()).await;
        Ok(text)
    }

    fn model_name(&self) -> &str;
}

/// Ask the model, aborting with [`ModelError::Cancelled`] once `cancel` fires.
///
/// When `stream` is set the reply is streamed into it.
pub async fn ask_cancellable(
    model: &dyn ModelPort,
    request: ModelRequest,
    stream: Option<mpsc::Sender<String>>,
    cancel: &CancellationToken,
) -> Result<String, ModelError> {
    if cancel.is_cancelled() {
        return Err(ModelError::Cancelled);
    }
    let call = async {
        match stream {
            Some(tx) => model.ask_streaming(request, tx).await,
            None => model.ask(request).await,
        }
    };
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(model = model.model_name(), "Model call cancelled");
            Err(ModelError::Cancelled)
        }
        result = call => result,
    }
}

/// Strip a surrounding markdown fence (```` ```json ```` or bare ```` ``` ````).
pub fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string on the opening line.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Extract the outermost `{ ... }` object from a reply that may carry prose or fences.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let clean = strip_markdown_fences(text);
    let start = clean.find('{')?;
    let end = clean.rfind('}')?;
    (start <= end).then(|| &clean[start..=end])
}

/// Deserialize a JSON object embedded in a model reply.
pub fn parse_embedded_json<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, ModelError> {
    let fragment = extract_json_object(text).ok_or_else(|| ModelError::ResponseParse {
        message: "no JSON object in model reply".into(),
    })?;
    serde_json::from_str(fragment).map_err(|e| ModelError::ResponseParse {
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockModel;
    use crate::types::Role;
    use std::time::Duration;

    #[test]
    fn test_request_turns_order() {
        let req = ModelRequest::new("do it")
            .with_system_prompt("sys")
            .with_context(vec![ChatTurn::user("hi"), ChatTurn::assistant("hello")]);
        let roles: Vec<_> = req.turns().iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(req.turns().last().unwrap().content, "do it");
    }

    #[test]
    fn test_strip_markdown_fences() {
        assert_eq!(strip_markdown_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_markdown_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_markdown_fences("  {}  "), "{}");
    }

    #[test]
    fn test_extract_json_object_with_prose() {
        let text = "Sure! Here is the plan:\n{\"summary\": \"x\", \"tools\": []}\nLet me know.";
        assert_eq!(
            extract_json_object(text),
            Some("{\"summary\": \"x\", \"tools\": []}")
        );
        assert_eq!(extract_json_object("no json"), None);
        assert_eq!(extract_json_object("} backwards {"), None);
    }

    #[test]
    fn test_parse_embedded_json_error() {
        let err = parse_embedded_json::<serde_json::Value>("{not json}").unwrap_err();
        assert!(matches!(err, ModelError::ResponseParse { .. }));
    }

    #[tokio::test]
    async fn test_ask_cancellable_already_cancelled() {
        let model = MockModel::with_response("hi");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = ask_cancellable(&model, ModelRequest::new("x"), None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Cancelled));
        assert_eq!(model.request_count(), 0);
    }

    #[tokio::test]
    async fn test_ask_cancellable_cancelled_mid_call() {
        let model = MockModel::with_response("late").with_delay(Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = ask_cancellable(&model, ModelRequest::new("x"), None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Cancelled));
    }

    #[tokio::test]
    async fn test_ask_cancellable_streams() {
        let model = MockModel::with_response("streamed");
        let (tx, mut rx) = mpsc::channel(8);
        let text = ask_cancellable(
            &model,
            ModelRequest::new("x"),
            Some(tx),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(text, "streamed");
        assert_eq!(rx.recv().await.as_deref(), Some("streamed"));
    }
}
