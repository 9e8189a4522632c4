//! Propose mode.
//!
//! One round trip: the model returns a whole-file change set for a task, the
//! human reviews it, then applies changes one at a time or all at once.
//!
//! ```text
//! Idle --propose()--> Pending{run_id, changes}
//! Pending --apply_all() | abandon() | propose()--> Idle / new Pending
//! ```

use crate::context::AppContext;
use crate::error::{GateError, ProposeError, WorkspaceError};
use crate::model::{ModelRequest, ask_cancellable, parse_embedded_json};
use crate::prompts;
use crate::types::Artifact;
use crate::workspace::is_contained;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use similar::TextDiff;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A proposed write that has not been applied yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedChange {
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub new_content: String,
}

impl ProposedChange {
    /// An empty change whose last path component has no `.` (or that ends in a
    /// separator) creates a directory. Dotfiles such as `.gitignore` stay files.
    pub fn is_directory(&self) -> bool {
        if !self.new_content.is_empty() {
            return false;
        }
        let path = self.file_path.trim();
        if path.ends_with('/') || path.ends_with('\\') {
            return true;
        }
        let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
        !name.contains('.')
    }
}

#[derive(Debug, Deserialize)]
struct ChangeSetWire {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    changes: Vec<ProposedChange>,
}

/// A change set awaiting the human's decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingRun {
    pub run_id: Uuid,
    pub summary: String,
    pub changes: Vec<ProposedChange>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposeState {
    Idle,
    Pending(PendingRun),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    File,
    Directory,
}

/// Audit record of one applied change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedStep {
    pub run_id: Uuid,
    pub file_path: String,
    pub kind: StepKind,
    pub success: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Propose-mode state machine.
pub struct ProposeOrchestrator<'a> {
    ctx: &'a AppContext,
    state: ProposeState,
    steps: Vec<AppliedStep>,
}

impl<'a> ProposeOrchestrator<'a> {
    pub fn new(ctx: &'a AppContext) -> Self {
        Self {
            ctx,
            state: ProposeState::Idle,
            steps: Vec::new(),
        }
    }

    pub fn state(&self) -> &ProposeState {
        &self.state
    }

    pub fn pending(&self) -> Option<&PendingRun> {
        match &self.state {
            ProposeState::Pending(run) => Some(run),
            ProposeState::Idle => None,
        }
    }

    /// Every applied step so far, across runs.
    pub fn steps(&self) -> &[AppliedStep] {
        &self.steps
    }

    /// Ask the model for a change set. Any pending run is discarded first.
    pub async fn propose(
        &mut self,
        task: &str,
        cancel: &CancellationToken,
    ) -> Result<&PendingRun, GateError> {
        self.state = ProposeState::Idle;

        let request = ModelRequest::new(task).with_system_prompt(prompts::PROPOSE_CHANGES);
        let reply = ask_cancellable(self.ctx.model.as_ref(), request, None, cancel).await?;
        let wire: ChangeSetWire =
            parse_embedded_json(&reply).map_err(|e| ProposeError::MalformedChangeSet {
                message: e.to_string(),
            })?;

        let changes: Vec<ProposedChange> = wire
            .changes
            .into_iter()
            .filter(|c| !c.file_path.trim().is_empty())
            .collect();
        let run = PendingRun {
            run_id: Uuid::new_v4(),
            summary: wire.summary,
            changes,
        };
        info!(run_id = %run.run_id, changes = run.changes.len(), "Change set proposed");
        self.state = ProposeState::Pending(run);
        self.pending_run()
    }

    /// Unified diff of the current file against the proposed content.
    pub async fn preview(&self, index: usize) -> Result<String, GateError> {
        let change = self.change(index)?;
        if change.is_directory() {
            return Ok(format!("Create directory {}\n", change.file_path));
        }
        let current = match self.ctx.fs.read_file(&change.file_path).await {
            Ok(content) => content,
            Err(WorkspaceError::NotFound { .. }) => String::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(unified_diff(&change.file_path, &current, &change.new_content))
    }

    /// Apply a single change and record the step. The run stays pending.
    pub async fn apply_one(&mut self, index: usize) -> Result<AppliedStep, GateError> {
        let run_id = self.pending_run()?.run_id;
        let change = self.change(index)?.clone();
        let step = self.apply_change(run_id, &change).await;
        self.steps.push(step.clone());
        self.refresh_tree().await;
        Ok(step)
    }

    /// Confirm, then apply every change in order, best effort.
    ///
    /// Returns `None` when the human declines; the run stays pending.
    pub async fn apply_all(&mut self) -> Result<Option<Vec<AppliedStep>>, GateError> {
        let run = self.pending_run()?.clone();
        let question = format!(
            "Apply all {} proposed change(s)?",
            run.changes.len()
        );
        if !self.ctx.confirm.confirm(&question).await {
            info!(run_id = %run.run_id, "Bulk apply declined");
            return Ok(None);
        }

        let mut applied = Vec::with_capacity(run.changes.len());
        for change in &run.changes {
            let step = self.apply_change(run.run_id, change).await;
            self.steps.push(step.clone());
            applied.push(step);
        }
        self.refresh_tree().await;
        info!(
            run_id = %run.run_id,
            succeeded = applied.iter().filter(|s| s.success).count(),
            total = applied.len(),
            "Change set applied"
        );
        self.state = ProposeState::Idle;
        Ok(Some(applied))
    }

    /// Drop the pending run without applying anything.
    pub fn abandon(&mut self) {
        if let ProposeState::Pending(run) = &self.state {
            debug!(run_id = %run.run_id, "Change set abandoned");
        }
        self.state = ProposeState::Idle;
    }

    fn pending_run(&self) -> Result<&PendingRun, GateError> {
        self.pending()
            .ok_or_else(|| ProposeError::NoPendingChanges.into())
    }

    fn change(&self, index: usize) -> Result<&ProposedChange, GateError> {
        let run = self.pending_run()?;
        run.changes.get(index).ok_or_else(|| {
            ProposeError::UnknownChange {
                index,
                available: run.changes.len(),
            }
            .into()
        })
    }

    async fn apply_change(&self, run_id: Uuid, change: &ProposedChange) -> AppliedStep {
        let path = change.file_path.trim().trim_end_matches(['/', '\\']);
        let kind = if change.is_directory() {
            StepKind::Directory
        } else {
            StepKind::File
        };
        let step = |success: bool, message: String| AppliedStep {
            run_id,
            file_path: change.file_path.clone(),
            kind,
            success,
            message,
            timestamp: Utc::now(),
        };

        if !is_contained(path) {
            warn!(path = %path, "Proposed path outside workspace rejected");
            return step(false, format!("Refused {}: outside the workspace", path));
        }

        let result = match kind {
            StepKind::Directory => self
                .ctx
                .fs
                .create_entry(path, true)
                .await
                .map(|()| Artifact::DirectoryCreated {
                    path: PathBuf::from(path),
                }),
            StepKind::File => self
                .ctx
                .fs
                .write_file(path, &change.new_content)
                .await
                .map(|_| Artifact::FileModified {
                    path: PathBuf::from(path),
                }),
        };

        match result {
            Ok(artifact) => {
                self.ctx.observer.on_artifact(&artifact).await;
                let message = match kind {
                    StepKind::Directory => format!("Created directory {}", path),
                    StepKind::File => format!("Wrote {}", path),
                };
                debug!(path = %path, "Proposed change applied");
                step(true, message)
            }
            Err(e) => {
                warn!(path = %path, error = %e, "Proposed change failed");
                step(false, e.to_string())
            }
        }
    }

    async fn refresh_tree(&self) {
        match self.ctx.fs.list_directory(".", true).await {
            Ok(entries) => self.ctx.observer.on_directory_refreshed(&entries).await,
            Err(e) => warn!(error = %e, "Directory refresh failed"),
        }
    }
}

/// Unified diff with three lines of context.
pub fn unified_diff(path: &str, old: &str, new: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    let mut output = String::new();
    output.push_str(&format!("--- a/{path}\n"));
    output.push_str(&format!("+++ b/{path}\n"));
    for hunk in diff.unified_diff().context_radius(3).iter_hunks() {
        output.push_str(&format!("{hunk}"));
    }
    output
}
