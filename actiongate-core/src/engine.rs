//! Execution engine.
//!
//! Runs parsed actions one at a time, in order, against the workspace and the
//! shell. Every path is checked with [`is_contained`] before dispatch; commands
//! and deletions wait for confirmation; commands that report a missing
//! toolchain go through the [`Remediator`] and are retried once. Failures are
//! recorded in the transcript and never abort the rest of the batch.

use crate::context::AppContext;
use crate::remediation::{Remediator, detect_missing_toolchain};
use crate::types::{
    ActionKind, ActionRequest, Artifact, CommandOutput, RetryBudget, Transcript, TranscriptKind,
    WriteOutcome,
};
use crate::workspace::{WorkspaceGuard, is_contained};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Why an action did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    GuardRejection,
    ActionFailure,
    RemediationFailure,
    IterationCapExceeded,
}

/// How one action ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ActionOutcome {
    Completed,
    Failed(FailureKind),
    /// The user said no. Not an error.
    Declined,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionReport {
    pub action: ActionRequest,
    pub outcome: ActionOutcome,
}

/// Summary of one `execute` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub actions: Vec<ActionReport>,
    /// Workspace-relative paths written or deleted, in order.
    pub files_changed: Vec<String>,
    /// Whether the closing directory refresh succeeded.
    pub tree_refreshed: bool,
    pub cap_exceeded: bool,
}

impl ExecutionReport {
    pub fn failures(&self) -> impl Iterator<Item = &ActionReport> {
        self.actions
            .iter()
            .filter(|r| matches!(r.outcome, ActionOutcome::Failed(_)))
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    pub fn completed(&self) -> usize {
        self.actions
            .iter()
            .filter(|r| r.outcome == ActionOutcome::Completed)
            .count()
    }
}

/// Sequential executor bound to an [`AppContext`].
pub struct ExecutionEngine<'a> {
    ctx: &'a AppContext,
    guard: WorkspaceGuard,
}

impl<'a> ExecutionEngine<'a> {
    pub fn new(ctx: &'a AppContext) -> Self {
        Self {
            ctx,
            guard: WorkspaceGuard::new(ctx.fs.root()),
        }
    }

    /// Execute `actions` in order, appending to `transcript`.
    pub async fn execute(
        &self,
        actions: &[ActionRequest],
        budget: RetryBudget,
        transcript: &mut Transcript,
    ) -> ExecutionReport {
        let mut report = ExecutionReport::default();

        if budget.exhausted() {
            warn!(iteration = budget.iteration, cap = budget.cap, "Iteration cap reached");
            self.emit(
                transcript,
                TranscriptKind::Error,
                format!(
                    "Iteration limit of {} reached; {} action(s) not run",
                    budget.cap,
                    actions.len()
                ),
            )
            .await;
            report.cap_exceeded = true;
            report.actions = actions
                .iter()
                .map(|a| ActionReport {
                    action: a.clone(),
                    outcome: ActionOutcome::Failed(FailureKind::IterationCapExceeded),
                })
                .collect();
            return report;
        }

        info!(actions = actions.len(), iteration = budget.iteration, "Executing action batch");

        for action in actions {
            debug!(action = %action.label(), "Dispatching action");
            let outcome = match action.kind {
                ActionKind::CreateFile | ActionKind::ModifyFile => {
                    self.write_file(action, transcript, &mut report).await
                }
                ActionKind::DeleteFile => self.delete_file(action, transcript, &mut report).await,
                ActionKind::RunCommand => {
                    let outcome = self.run_command(action, budget, transcript).await;
                    if outcome != ActionOutcome::Declined {
                        self.refresh_tree(transcript).await;
                    }
                    outcome
                }
            };
            report.actions.push(ActionReport {
                action: action.clone(),
                outcome,
            });
        }

        report.tree_refreshed = self.refresh_tree(transcript).await;
        info!(
            completed = report.completed(),
            total = report.actions.len(),
            cap_exceeded = report.cap_exceeded,
            "Action batch finished"
        );
        report
    }

    async fn write_file(
        &self,
        action: &ActionRequest,
        transcript: &mut Transcript,
        report: &mut ExecutionReport,
    ) -> ActionOutcome {
        let Some(path) = action.path.as_deref() else {
            self.emit(transcript, TranscriptKind::Error, "File action without a path")
                .await;
            return ActionOutcome::Failed(FailureKind::ActionFailure);
        };
        if let Some(outcome) = self.reject_outside(path, "write", transcript).await {
            return outcome;
        }

        let content = action.content.as_deref().unwrap_or_default();
        match self.ctx.fs.write_file(path, content).await {
            Ok(written) => {
                let (verb, artifact) = match written {
                    WriteOutcome::Created => ("Created", Artifact::FileCreated {
                        path: PathBuf::from(path),
                    }),
                    WriteOutcome::Updated => ("Updated", Artifact::FileModified {
                        path: PathBuf::from(path),
                    }),
                };
                debug!(path = %path, bytes = content.len(), "File written");
                self.emit(transcript, TranscriptKind::Output, format!("{} {}", verb, path))
                    .await;
                self.ctx.observer.on_artifact(&artifact).await;
                report.files_changed.push(path.to_string());
                ActionOutcome::Completed
            }
            Err(e) => {
                let kind = if e.is_guard_rejection() {
                    FailureKind::GuardRejection
                } else {
                    FailureKind::ActionFailure
                };
                warn!(path = %path, error = %e, "File write failed");
                self.emit(
                    transcript,
                    TranscriptKind::Error,
                    format!("Failed to write {}: {}", path, e),
                )
                .await;
                ActionOutcome::Failed(kind)
            }
        }
    }

    async fn delete_file(
        &self,
        action: &ActionRequest,
        transcript: &mut Transcript,
        report: &mut ExecutionReport,
    ) -> ActionOutcome {
        let Some(path) = action.path.as_deref() else {
            self.emit(transcript, TranscriptKind::Error, "Delete action without a path")
                .await;
            return ActionOutcome::Failed(FailureKind::ActionFailure);
        };
        if let Some(outcome) = self.reject_outside(path, "delete", transcript).await {
            return outcome;
        }

        let question = format!("Delete '{}' from the workspace?", path);
        if !self.ctx.confirm.confirm(&question).await {
            info!(path = %path, "Deletion declined");
            self.emit(
                transcript,
                TranscriptKind::Output,
                format!("Declined deleting {}", path),
            )
            .await;
            return ActionOutcome::Declined;
        }

        match self.ctx.fs.delete_entry(path).await {
            Ok(()) => {
                self.emit(transcript, TranscriptKind::Output, format!("Deleted {}", path))
                    .await;
                self.ctx
                    .observer
                    .on_artifact(&Artifact::FileDeleted {
                        path: PathBuf::from(path),
                    })
                    .await;
                report.files_changed.push(path.to_string());
                ActionOutcome::Completed
            }
            Err(e) => {
                warn!(path = %path, error = %e, "Delete failed");
                self.emit(
                    transcript,
                    TranscriptKind::Error,
                    format!("Failed to delete {}: {}", path, e),
                )
                .await;
                ActionOutcome::Failed(if e.is_guard_rejection() {
                    FailureKind::GuardRejection
                } else {
                    FailureKind::ActionFailure
                })
            }
        }
    }

    async fn run_command(
        &self,
        action: &ActionRequest,
        budget: RetryBudget,
        transcript: &mut Transcript,
    ) -> ActionOutcome {
        let Some(command) = action.command.as_deref().map(str::trim).filter(|c| !c.is_empty())
        else {
            self.emit(transcript, TranscriptKind::Error, "Run action without a command")
                .await;
            return ActionOutcome::Failed(FailureKind::ActionFailure);
        };

        let working_dir = self.ctx.config.execution.working_dir.as_str();
        if let Some(outcome) = self
            .reject_outside(working_dir, "run a command in", transcript)
            .await
        {
            return outcome;
        }
        let cwd = match self.guard.resolve(working_dir) {
            Ok(cwd) => cwd,
            Err(e) => {
                warn!(working_dir = %working_dir, error = %e, "Working directory rejected");
                self.emit(transcript, TranscriptKind::Error, e.to_string()).await;
                return ActionOutcome::Failed(FailureKind::GuardRejection);
            }
        };

        let question = format!("Run `{}` in {}?", command, cwd.display());
        if !self.ctx.confirm.confirm(&question).await {
            info!(command = %command, "Command declined");
            self.emit(transcript, TranscriptKind::Output, format!("Skipped: {}", command))
                .await;
            return ActionOutcome::Declined;
        }

        self.emit(transcript, TranscriptKind::Input, command).await;
        let Some(output) = self.dispatch(command, &cwd, transcript).await else {
            return ActionOutcome::Failed(FailureKind::ActionFailure);
        };
        if output.success {
            return ActionOutcome::Completed;
        }

        let missing = if self.ctx.config.execution.auto_remediate {
            detect_missing_toolchain(&output.combined())
        } else {
            None
        };
        let Some(toolchain) = missing else {
            return ActionOutcome::Failed(FailureKind::ActionFailure);
        };

        info!(command = %command, toolchain, "Missing toolchain detected");
        let ready = Remediator::new(self.ctx.toolchain.as_ref(), self.ctx.confirm.as_ref())
            .with_observer(self.ctx.observer.as_ref())
            .ensure(toolchain, transcript)
            .await;
        if !ready {
            return ActionOutcome::Failed(FailureKind::RemediationFailure);
        }

        // One retry of the same, already confirmed command. It never remediates again.
        let retry_budget = budget.next();
        if retry_budget.exhausted() {
            self.emit(
                transcript,
                TranscriptKind::Error,
                format!("Iteration limit of {} reached; not retrying {}", budget.cap, command),
            )
            .await;
            return ActionOutcome::Failed(FailureKind::IterationCapExceeded);
        }
        self.emit(transcript, TranscriptKind::Input, command).await;
        match self.dispatch(command, &cwd, transcript).await {
            Some(retried) if retried.success => ActionOutcome::Completed,
            _ => {
                self.emit(
                    transcript,
                    TranscriptKind::Error,
                    format!("`{}` still fails after installing {}", command, toolchain),
                )
                .await;
                ActionOutcome::Failed(FailureKind::RemediationFailure)
            }
        }
    }

    /// Run a confirmed command and append its output. `None` when it could not run at all.
    async fn dispatch(
        &self,
        command: &str,
        cwd: &std::path::Path,
        transcript: &mut Transcript,
    ) -> Option<CommandOutput> {
        match self.ctx.shell.run_command(command, cwd).await {
            Ok(output) => {
                for line in output.stdout.lines() {
                    self.emit(transcript, TranscriptKind::Output, line).await;
                }
                let stderr_kind = if output.success {
                    TranscriptKind::Output
                } else {
                    TranscriptKind::Error
                };
                for line in output.stderr.lines() {
                    self.emit(transcript, stderr_kind, line).await;
                }
                if output.success {
                    debug!(command = %command, "Command succeeded");
                } else {
                    warn!(command = %command, exit_code = output.exit_code, "Command failed");
                    self.emit(
                        transcript,
                        TranscriptKind::Error,
                        format!("Exit code: {}", output.exit_code),
                    )
                    .await;
                }
                Some(output)
            }
            Err(e) => {
                warn!(command = %command, error = %e, "Command could not run");
                self.emit(transcript, TranscriptKind::Error, e.to_string()).await;
                None
            }
        }
    }

    /// Guard check shared by every dispatch. Returns the outcome when `path` is rejected.
    async fn reject_outside(
        &self,
        path: &str,
        verb: &str,
        transcript: &mut Transcript,
    ) -> Option<ActionOutcome> {
        if is_contained(path) {
            return None;
        }
        warn!(path = %path, "Path outside workspace rejected");
        self.emit(
            transcript,
            TranscriptKind::Error,
            format!("Refused to {} {}: outside the workspace", verb, path),
        )
        .await;
        Some(ActionOutcome::Failed(FailureKind::GuardRejection))
    }

    /// Re-read the directory listing and hand it to the observer.
    async fn refresh_tree(&self, transcript: &mut Transcript) -> bool {
        match self.ctx.fs.list_directory(".", true).await {
            Ok(entries) => {
                debug!(entries = entries.len(), "Directory listing refreshed");
                self.ctx.observer.on_directory_refreshed(&entries).await;
                true
            }
            Err(e) => {
                warn!(error = %e, "Directory refresh failed");
                self.emit(
                    transcript,
                    TranscriptKind::Error,
                    format!("Could not refresh the directory listing: {}", e),
                )
                .await;
                false
            }
        }
    }

    async fn emit(
        &self,
        transcript: &mut Transcript,
        kind: TranscriptKind,
        text: impl Into<String>,
    ) {
        let line = transcript.push(kind, text).clone();
        self.ctx.observer.on_transcript_line(&line).await;
    }
}
