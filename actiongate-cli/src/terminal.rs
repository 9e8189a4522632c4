//! Terminal adapters: confirmation prompts, progress output, and the offline model.

use actiongate_core::error::ModelError;
use actiongate_core::model::{ModelPort, ModelRequest};
use actiongate_core::ports::{ConfirmationPort, WorkspaceObserver};
use actiongate_core::types::{Artifact, DirEntry, TranscriptKind, TranscriptLine};
use async_trait::async_trait;
use dialoguer::Confirm;
use tracing::warn;

/// Asks on the terminal. Any prompt failure (no TTY, Ctrl-C) counts as "no".
pub struct DialoguerConfirm;

#[async_trait]
impl ConfirmationPort for DialoguerConfirm {
    async fn confirm(&self, question: &str) -> bool {
        let question = question.to_string();
        let answer = tokio::task::spawn_blocking(move || {
            Confirm::new()
                .with_prompt(question)
                .default(false)
                .interact()
        })
        .await;
        match answer {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => {
                warn!(error = %e, "Confirmation prompt failed");
                false
            }
            Err(e) => {
                warn!(error = %e, "Confirmation task failed");
                false
            }
        }
    }
}

/// `--yes`: accepts everything without asking.
pub struct AutoConfirm;

#[async_trait]
impl ConfirmationPort for AutoConfirm {
    async fn confirm(&self, question: &str) -> bool {
        println!("  {} [auto-accepted]", question);
        true
    }
}

/// Prints transcript lines and written files as they happen.
pub struct TerminalObserver {
    quiet: bool,
}

impl TerminalObserver {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

#[async_trait]
impl WorkspaceObserver for TerminalObserver {
    async fn on_transcript_line(&self, line: &TranscriptLine) {
        match line.kind {
            TranscriptKind::Input => println!("$ {}", line.text),
            TranscriptKind::Output => println!("{}", line.text),
            TranscriptKind::Error => eprintln!("! {}", line.text),
        }
    }

    async fn on_artifact(&self, artifact: &Artifact) {
        if self.quiet {
            return;
        }
        let (verb, path) = match artifact {
            Artifact::FileCreated { path } => ("created", path),
            Artifact::FileModified { path } => ("modified", path),
            Artifact::FileDeleted { path } => ("deleted", path),
            Artifact::DirectoryCreated { path } => ("created directory", path),
        };
        println!("  [{}] {}", verb, path.display());
    }

    async fn on_directory_refreshed(&self, entries: &[DirEntry]) {
        if !self.quiet {
            println!("  [workspace] {} entries", entries.len());
        }
    }
}

/// Stands in for the model in commands that never ask it (e.g. `run`).
pub struct OfflineModel;

#[async_trait]
impl ModelPort for OfflineModel {
    async fn ask(&self, _request: ModelRequest) -> Result<String, ModelError> {
        Err(ModelError::ApiRequest {
            message: "this command does not talk to a model".into(),
        })
    }

    fn model_name(&self) -> &str {
        "offline"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_auto_confirm_accepts() {
        assert!(AutoConfirm.confirm("Run `ls`?").await);
    }

    #[tokio::test]
    async fn test_offline_model_refuses() {
        let err = OfflineModel.ask(ModelRequest::new("hi")).await.unwrap_err();
        assert!(matches!(err, ModelError::ApiRequest { .. }));
    }
}
