//! Post-action verification.
//!
//! After a response that created or modified files, re-run the project's check
//! command (for example `cargo test`) in the workspace root. The result is
//! advisory: it is written to the transcript and never fails the batch.

use crate::context::AppContext;
use crate::types::{Transcript, TranscriptKind};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Verification result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationOutcome {
    Passed,
    Failed,
}

/// Whether `response_text` carries a create or modify marker.
pub fn mentions_file_change(response_text: &str) -> bool {
    let lower = response_text.to_lowercase();
    lower.contains("[create file:") || lower.contains("[modify file:")
}

/// Runs the configured verification command.
pub struct VerificationRunner<'a> {
    ctx: &'a AppContext,
}

impl<'a> VerificationRunner<'a> {
    pub fn new(ctx: &'a AppContext) -> Self {
        Self { ctx }
    }

    /// Verify when a command is configured and the response changed files.
    ///
    /// Returns `None` when verification did not apply.
    pub async fn maybe_verify(
        &self,
        response_text: &str,
        verification_command: Option<&str>,
        transcript: &mut Transcript,
    ) -> Option<VerificationOutcome> {
        let command = verification_command
            .map(str::trim)
            .filter(|c| !c.is_empty())?;
        if !mentions_file_change(response_text) {
            return None;
        }

        let start = transcript.len();
        transcript.output(format!("Verifying with `{}`", command));
        transcript.input(command);
        let outcome = match self.ctx.shell.run_command(command, self.ctx.fs.root()).await {
            Ok(out) => {
                for line in out.stdout.lines() {
                    transcript.output(line);
                }
                for line in out.stderr.lines() {
                    transcript.push(
                        if out.success {
                            TranscriptKind::Output
                        } else {
                            TranscriptKind::Error
                        },
                        line,
                    );
                }
                if out.success {
                    info!(command = %command, "Verification passed");
                    transcript.output("Verification passed");
                    VerificationOutcome::Passed
                } else {
                    warn!(command = %command, exit_code = out.exit_code, "Verification failed");
                    transcript.error(format!("Verification failed (exit code {})", out.exit_code));
                    VerificationOutcome::Failed
                }
            }
            Err(e) => {
                warn!(command = %command, error = %e, "Verification could not run");
                transcript.error(format!("Verification could not run: {}", e));
                VerificationOutcome::Failed
            }
        };

        for line in transcript.since(start) {
            self.ctx.observer.on_transcript_line(line).await;
        }
        Some(outcome)
    }
}
