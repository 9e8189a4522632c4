//! Marker-driven chat session.
//!
//! One [`ActionSession::send`] is one user-visible turn: ask the model, parse
//! the markers out of its reply, execute them, verify, and (when enabled) feed
//! failures back to the model for another round. Every follow-up round spends
//! one step of the same [`RetryBudget`] the engine uses.

use crate::context::AppContext;
use crate::engine::{ExecutionEngine, ExecutionReport};
use crate::error::GateError;
use crate::model::{ModelRequest, ask_cancellable};
use crate::parser::{ParseOutcome, parse};
use crate::prompts;
use crate::types::{ChatTurn, RetryBudget, Transcript, TranscriptKind};
use crate::verification::{VerificationOutcome, VerificationRunner};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// What one round of a turn produced.
#[derive(Debug, Clone)]
pub struct RoundResult {
    pub reply: String,
    /// `None` when the reply carried no actions.
    pub report: Option<ExecutionReport>,
    pub verification: Option<VerificationOutcome>,
}

impl RoundResult {
    fn needs_follow_up(&self) -> bool {
        self.report.as_ref().is_some_and(|r| r.has_failures())
            || self.verification == Some(VerificationOutcome::Failed)
    }
}

/// Everything a turn did, first round first.
#[derive(Debug, Clone, Default)]
pub struct TurnResult {
    pub rounds: Vec<RoundResult>,
}

impl TurnResult {
    /// The model's last reply.
    pub fn final_reply(&self) -> Option<&str> {
        self.rounds.last().map(|r| r.reply.as_str())
    }
}

/// A conversation whose replies are executed.
pub struct ActionSession<'a> {
    ctx: &'a AppContext,
    history: Vec<ChatTurn>,
    transcript: Transcript,
    stream: Option<mpsc::Sender<String>>,
}

impl<'a> ActionSession<'a> {
    pub fn new(ctx: &'a AppContext) -> Self {
        Self {
            ctx,
            history: Vec::new(),
            transcript: Transcript::new(),
            stream: None,
        }
    }

    /// Stream model text into `tx` while replies arrive.
    pub fn with_stream(mut self, tx: mpsc::Sender<String>) -> Self {
        self.stream = Some(tx);
        self
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Send a user message and execute whatever the model asks for.
    pub async fn send(
        &mut self,
        message: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnResult, GateError> {
        let mut budget = RetryBudget::new(self.ctx.config.execution.max_iterations);
        let mut prompt = message.to_string();
        let mut turn = TurnResult::default();

        loop {
            let round_start = self.transcript.len();
            let request = ModelRequest::new(prompt.clone())
                .with_context(self.history.clone())
                .with_system_prompt(prompts::ACTION_MARKERS);
            let reply = ask_cancellable(
                self.ctx.model.as_ref(),
                request,
                self.stream.clone(),
                cancel,
            )
            .await?;
            self.history.push(ChatTurn::user(prompt));
            self.history.push(ChatTurn::assistant(reply.clone()));

            let round = self.execute_reply(reply, budget).await;
            let follow_up = self.ctx.config.execution.follow_up_on_failure
                && round.needs_follow_up();
            turn.rounds.push(round);

            if !follow_up {
                break;
            }
            let next = budget.next();
            if next.exhausted() {
                self.transcript.error(format!(
                    "Iteration limit of {} reached; not asking the model to fix the failures",
                    budget.cap
                ));
                break;
            }
            budget = next;
            info!(iteration = budget.iteration, "Sending failures back to the model");
            prompt = follow_up_prompt(&self.transcript, round_start);
        }

        Ok(turn)
    }

    /// Execute a reply that was produced elsewhere (e.g. a saved response).
    pub async fn run_response(&mut self, reply: &str) -> RoundResult {
        let budget = RetryBudget::new(self.ctx.config.execution.max_iterations);
        self.execute_reply(reply.to_string(), budget).await
    }

    async fn execute_reply(&mut self, reply: String, budget: RetryBudget) -> RoundResult {
        let report = match parse(&reply) {
            ParseOutcome::NoActions => None,
            ParseOutcome::Actions(actions) => Some(
                ExecutionEngine::new(self.ctx)
                    .execute(&actions, budget, &mut self.transcript)
                    .await,
            ),
        };
        let verification = VerificationRunner::new(self.ctx)
            .maybe_verify(
                &reply,
                self.ctx.config.verification.command(),
                &mut self.transcript,
            )
            .await;
        RoundResult {
            reply,
            report,
            verification,
        }
    }
}

/// Prompt sent back to the model after a round with failures.
fn follow_up_prompt(transcript: &Transcript, start: usize) -> String {
    let mut prompt = String::from(
        "Some actions failed. Here is what happened; reply with new actions that fix the problem.\n\n",
    );
    for line in transcript.since(start) {
        let prefix = match line.kind {
            TranscriptKind::Input => "$ ",
            TranscriptKind::Output => "",
            TranscriptKind::Error => "! ",
        };
        prompt.push_str(prefix);
        prompt.push_str(&line.text);
        prompt.push('\n');
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GateConfig;
    use crate::engine::{ActionOutcome, FailureKind};
    use crate::error::ModelError;
    use crate::testing::{FakeShell, MockModel, TestHarness};
    use crate::types::{CommandOutput, Role};

    #[tokio::test]
    async fn test_plain_reply_has_no_report() {
        let h = TestHarness::new().with_model(MockModel::with_response("Just chatting."));
        let ctx = h.context(GateConfig::default());
        let mut session = ActionSession::new(&ctx);
        let turn = session.send("hello", &CancellationToken::new()).await.unwrap();
        assert_eq!(turn.rounds.len(), 1);
        assert!(turn.rounds[0].report.is_none());
        assert_eq!(turn.final_reply(), Some("Just chatting."));
        assert_eq!(session.history().len(), 2);
    }

    #[tokio::test]
    async fn test_reply_is_executed_and_verified() {
        let reply = "[CREATE FILE: src/a.txt]\n```\nhello\n```\n[RUN: echo hi]";
        let h = TestHarness::new()
            .with_model(MockModel::with_response(reply))
            .with_shell(FakeShell::new().with_output("echo hi", CommandOutput::ok("hi")));
        let mut config = GateConfig::default();
        config.verification.command = Some("make check".into());
        let ctx = h.context(config);
        let mut session = ActionSession::new(&ctx);
        let turn = session.send("make a file", &CancellationToken::new()).await.unwrap();

        let round = &turn.rounds[0];
        assert_eq!(round.report.as_ref().unwrap().completed(), 2);
        assert_eq!(round.verification, Some(VerificationOutcome::Passed));
        assert_eq!(h.fs.file("src/a.txt").as_deref(), Some("hello"));
        assert_eq!(h.shell.commands(), vec!["echo hi", "make check"]);

        let request = &h.model.requests()[0];
        assert_eq!(request.system_prompt.as_deref(), Some(prompts::ACTION_MARKERS));
    }

    #[tokio::test]
    async fn test_history_replayed_on_next_turn() {
        let h = TestHarness::new().with_model(MockModel::with_responses(["first", "second"]));
        let ctx = h.context(GateConfig::default());
        let mut session = ActionSession::new(&ctx);
        let cancel = CancellationToken::new();
        session.send("one", &cancel).await.unwrap();
        session.send("two", &cancel).await.unwrap();

        let second = &h.model.requests()[1];
        let roles: Vec<_> = second.context.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
        assert_eq!(second.context[1].content, "first");
        assert_eq!(second.prompt, "two");
    }

    #[tokio::test]
    async fn test_follow_up_on_failure() {
        let h = TestHarness::new()
            .with_model(MockModel::with_responses(["[RUN: make]", "[RUN: make fix]"]))
            .with_shell(
                FakeShell::new().with_output("make", CommandOutput::failed(2, "missing target")),
            );
        let mut config = GateConfig::default();
        config.execution.follow_up_on_failure = true;
        let ctx = h.context(config);
        let mut session = ActionSession::new(&ctx);
        let turn = session.send("build it", &CancellationToken::new()).await.unwrap();

        assert_eq!(turn.rounds.len(), 2);
        assert_eq!(
            turn.rounds[0].report.as_ref().unwrap().actions[0].outcome,
            ActionOutcome::Failed(FailureKind::ActionFailure)
        );
        let follow_up = &h.model.requests()[1];
        assert!(follow_up.prompt.contains("missing target"));
        assert!(follow_up.prompt.contains("$ make"));
        assert_eq!(h.shell.commands(), vec!["make", "make fix"]);
    }

    #[tokio::test]
    async fn test_follow_up_rounds_are_bounded() {
        let h = TestHarness::new()
            .with_model(MockModel::with_response("[RUN: flaky]"))
            .with_shell(FakeShell::new().with_output("flaky", CommandOutput::failed(1, "nope")));
        let mut config = GateConfig::default();
        config.execution.follow_up_on_failure = true;
        config.execution.max_iterations = 3;
        let ctx = h.context(config);
        let mut session = ActionSession::new(&ctx);
        let turn = session.send("go", &CancellationToken::new()).await.unwrap();

        assert_eq!(turn.rounds.len(), 3);
        assert_eq!(h.model.request_count(), 3);
        assert!(session.transcript().contains(TranscriptKind::Error, "Iteration limit of 3"));
    }

    #[tokio::test]
    async fn test_cancelled_turn() {
        let h = TestHarness::new().with_model(MockModel::with_response("x"));
        let ctx = h.context(GateConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = ActionSession::new(&ctx).send("go", &cancel).await.unwrap_err();
        assert!(matches!(err, GateError::Model(ModelError::Cancelled)));
    }

    #[tokio::test]
    async fn test_run_response_without_model() {
        let h = TestHarness::new();
        let ctx = h.context(GateConfig::default());
        let round = ActionSession::new(&ctx)
            .run_response("[CREATE FILE: x.md]\n```\n# x\n```")
            .await;
        assert_eq!(h.model.request_count(), 0);
        assert_eq!(h.fs.file("x.md").as_deref(), Some("# x"));
        assert!(round.report.is_some());
    }
}
