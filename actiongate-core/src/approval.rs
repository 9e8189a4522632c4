//! Approve mode: a queue of model-requested tools, each gated by a human decision.
//!
//! Every [`ToolExecution`] moves `Pending -> Approved` (the tool runs and its
//! result is captured) or `Pending -> Rejected`, exactly once. Decisions on a
//! resolved execution are ignored. A continuation turn sends the resolved
//! results back to the model, which answers with a fresh queue.

use crate::context::AppContext;
use crate::error::{ApprovalError, GateError};
use crate::model::{ModelRequest, ask_cancellable, parse_embedded_json};
use crate::ports::ToolExecutor;
use crate::prompts;
use crate::types::{ChatTurn, Transcript};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// Output of an approved tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
}

/// One requested tool and its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    pub id: String,
    pub step_index: usize,
    pub tool_type: String,
    pub tool_params: serde_json::Value,
    pub approval_status: ApprovalStatus,
    /// Set only once the tool was approved and ran.
    pub result: Option<ToolResult>,
}

impl ToolExecution {
    pub fn is_resolved(&self) -> bool {
        self.approval_status != ApprovalStatus::Pending
    }
}

/// The visible queue plus the conversation it came from.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRun {
    pub run_id: Uuid,
    pub summary: String,
    pub executions: Vec<ToolExecution>,
    pub history: Vec<ChatTurn>,
}

#[derive(Debug, Deserialize)]
struct ToolPlanWire {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    tools: Vec<ToolRequestWire>,
}

#[derive(Debug, Deserialize)]
struct ToolRequestWire {
    #[serde(rename = "type")]
    tool_type: String,
    #[serde(default)]
    params: serde_json::Value,
}

/// Drives approve mode against a [`ToolExecutor`].
pub struct ApprovalOrchestrator<'a> {
    ctx: &'a AppContext,
    tools: &'a dyn ToolExecutor,
    run: Option<ApprovalRun>,
    transcript: Transcript,
}

impl<'a> ApprovalOrchestrator<'a> {
    pub fn new(ctx: &'a AppContext, tools: &'a dyn ToolExecutor) -> Self {
        Self {
            ctx,
            tools,
            run: None,
            transcript: Transcript::new(),
        }
    }

    pub fn run(&self) -> Option<&ApprovalRun> {
        self.run.as_ref()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Whether every execution in the queue has been decided.
    pub fn all_resolved(&self) -> bool {
        self.run
            .as_ref()
            .is_some_and(|r| r.executions.iter().all(ToolExecution::is_resolved))
    }

    /// Start a task, optionally continuing `prior` turns.
    ///
    /// The current queue is replaced only when the model returns a usable plan.
    pub async fn start(
        &mut self,
        task: &str,
        prior: Vec<ChatTurn>,
        cancel: &CancellationToken,
    ) -> Result<&ApprovalRun, GateError> {
        let (summary, executions) = self.request_plan(task, &prior, cancel).await?;
        let mut history = prior;
        history.push(ChatTurn::user(task));
        let run = ApprovalRun {
            run_id: Uuid::new_v4(),
            summary,
            executions,
            history,
        };
        info!(run_id = %run.run_id, tools = run.executions.len(), "Tool plan received");
        Ok(self.run.insert(run))
    }

    /// Report resolved results plus the human's `reply` and fetch the next queue.
    pub async fn continue_with(
        &mut self,
        reply: &str,
        cancel: &CancellationToken,
    ) -> Result<&ApprovalRun, GateError> {
        let run = self.run.as_ref().ok_or(ApprovalError::NoActiveRun)?;
        let mut history = run.history.clone();
        history.push(ChatTurn::assistant(run.summary.clone()));
        let prompt = continuation_prompt(reply, &run.executions);

        let (summary, executions) = self.request_plan(&prompt, &history, cancel).await?;
        history.push(ChatTurn::user(prompt));

        let run = self.run.as_mut().ok_or(ApprovalError::NoActiveRun)?;
        run.summary = summary;
        run.executions = executions;
        run.history = history;
        info!(run_id = %run.run_id, tools = run.executions.len(), "Continuation plan received");
        Ok(run)
    }

    /// Approve and execute `id`. Decisions on resolved executions are ignored.
    pub async fn approve(&mut self, id: &str) -> Result<ToolExecution, GateError> {
        let execution = self.find(id)?.clone();
        if execution.is_resolved() {
            debug!(id = %id, status = ?execution.approval_status, "Execution already resolved");
            return Ok(execution);
        }

        let start = self.transcript.len();
        self.transcript.input(format!(
            "{} {}",
            execution.tool_type, execution.tool_params
        ));
        let result = match self
            .tools
            .execute(&execution.tool_type, execution.tool_params.clone())
            .await
        {
            Ok(output) => {
                self.transcript.output(output.clone());
                ToolResult {
                    success: true,
                    output,
                }
            }
            Err(e) => {
                warn!(tool = %execution.tool_type, error = %e, "Approved tool failed");
                self.transcript.error(e.to_string());
                ToolResult {
                    success: false,
                    output: e.to_string(),
                }
            }
        };
        for line in self.transcript.since(start) {
            self.ctx.observer.on_transcript_line(line).await;
        }

        if result.success
            && self.tools.is_workspace_write(&execution.tool_type)
            && self.ctx.config.approval.refresh_after_write
        {
            match self.ctx.fs.list_directory(".", true).await {
                Ok(entries) => self.ctx.observer.on_directory_refreshed(&entries).await,
                Err(e) => warn!(error = %e, "Directory refresh failed"),
            }
        }

        let slot = self.find_mut(id)?;
        slot.approval_status = ApprovalStatus::Approved;
        slot.result = Some(result);
        Ok(slot.clone())
    }

    /// Reject `id` without running it.
    pub fn reject(&mut self, id: &str) -> Result<ToolExecution, GateError> {
        let slot = self.find_mut(id)?;
        if !slot.is_resolved() {
            slot.approval_status = ApprovalStatus::Rejected;
            debug!(id = %id, tool = %slot.tool_type, "Tool rejected");
        }
        Ok(slot.clone())
    }

    async fn request_plan(
        &self,
        prompt: &str,
        context: &[ChatTurn],
        cancel: &CancellationToken,
    ) -> Result<(String, Vec<ToolExecution>), GateError> {
        let request = ModelRequest::new(prompt)
            .with_context(context.to_vec())
            .with_system_prompt(prompts::approve_system_prompt(&self.tools.tool_types()));
        let reply = ask_cancellable(self.ctx.model.as_ref(), request, None, cancel).await?;
        let plan: ToolPlanWire =
            parse_embedded_json(&reply).map_err(|e| ApprovalError::MalformedPlan {
                message: e.to_string(),
            })?;

        let executions = plan
            .tools
            .into_iter()
            .enumerate()
            .map(|(step_index, tool)| ToolExecution {
                id: Uuid::new_v4().to_string(),
                step_index,
                tool_type: tool.tool_type,
                tool_params: tool.params,
                approval_status: ApprovalStatus::Pending,
                result: None,
            })
            .collect();
        Ok((plan.summary, executions))
    }

    fn find(&self, id: &str) -> Result<&ToolExecution, GateError> {
        let run = self.run.as_ref().ok_or(ApprovalError::NoActiveRun)?;
        run.executions
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| ApprovalError::UnknownExecution { id: id.to_string() }.into())
    }

    fn find_mut(&mut self, id: &str) -> Result<&mut ToolExecution, GateError> {
        let run = self.run.as_mut().ok_or(ApprovalError::NoActiveRun)?;
        run.executions
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| ApprovalError::UnknownExecution { id: id.to_string() }.into())
    }
}

/// The human's reply followed by every resolved tool's outcome.
fn continuation_prompt(reply: &str, executions: &[ToolExecution]) -> String {
    let mut prompt = reply.trim().to_string();
    let resolved: Vec<&ToolExecution> = executions.iter().filter(|e| e.is_resolved()).collect();
    if resolved.is_empty() {
        return prompt;
    }
    if !prompt.is_empty() {
        prompt.push_str("\n\n");
    }
    prompt.push_str("Tool results:\n");
    for execution in resolved {
        match (&execution.approval_status, &execution.result) {
            (ApprovalStatus::Approved, Some(result)) => {
                let status = if result.success { "succeeded" } else { "failed" };
                prompt.push_str(&format!(
                    "- #{} {} {}:\n{}\n",
                    execution.step_index + 1,
                    execution.tool_type,
                    status,
                    result.output
                ));
            }
            _ => {
                prompt.push_str(&format!(
                    "- #{} {} was rejected by the user\n",
                    execution.step_index + 1,
                    execution.tool_type
                ));
            }
        }
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GateConfig;
    use crate::testing::{MockModel, RecordingTools, TestHarness};
    use crate::types::Role;
    use serde_json::json;

    fn plan(summary: &str, tools: serde_json::Value) -> String {
        json!({"summary": summary, "tools": tools}).to_string()
    }

    fn two_tools() -> String {
        plan(
            "read then write",
            json!([
                {"type": "read_file", "params": {"path": "a.txt"}},
                {"type": "write_to_file", "params": {"path": "b.txt", "content": "B"}}
            ]),
        )
    }

    #[tokio::test]
    async fn test_start_builds_pending_queue() {
        let h = TestHarness::new().with_model(MockModel::with_response(&two_tools()));
        let ctx = h.context(GateConfig::default());
        let tools = RecordingTools::new();
        let mut orch = ApprovalOrchestrator::new(&ctx, &tools);

        let run = orch.start("do it", Vec::new(), &CancellationToken::new()).await.unwrap();
        assert_eq!(run.summary, "read then write");
        assert_eq!(run.executions.len(), 2);
        assert!(run.executions.iter().all(|e| e.approval_status == ApprovalStatus::Pending));
        assert_eq!(run.executions[1].step_index, 1);
        assert_ne!(run.executions[0].id, run.executions[1].id);

        let request = &h.model.requests()[0];
        assert!(request.system_prompt.as_deref().unwrap().contains("- rename_file"));
        assert!(!orch.all_resolved());
    }

    #[tokio::test]
    async fn test_reject_then_approve_is_noop() {
        let h = TestHarness::new().with_model(MockModel::with_response(&two_tools()));
        let ctx = h.context(GateConfig::default());
        let tools = RecordingTools::new();
        let mut orch = ApprovalOrchestrator::new(&ctx, &tools);
        let id = orch
            .start("t", Vec::new(), &CancellationToken::new())
            .await
            .unwrap()
            .executions[0]
            .id
            .clone();

        let rejected = orch.reject(&id).unwrap();
        assert_eq!(rejected.approval_status, ApprovalStatus::Rejected);
        let again = orch.approve(&id).await.unwrap();
        assert_eq!(again.approval_status, ApprovalStatus::Rejected);
        assert!(again.result.is_none());
        assert!(tools.calls().is_empty());
    }

    #[tokio::test]
    async fn test_approve_runs_tool_and_refreshes_after_write() {
        let h = TestHarness::new().with_model(MockModel::with_response(&two_tools()));
        let ctx = h.context(GateConfig::default());
        let tools = RecordingTools::new();
        let mut orch = ApprovalOrchestrator::new(&ctx, &tools);
        let ids: Vec<String> = orch
            .start("t", Vec::new(), &CancellationToken::new())
            .await
            .unwrap()
            .executions
            .iter()
            .map(|e| e.id.clone())
            .collect();

        let read = orch.approve(&ids[0]).await.unwrap();
        assert_eq!(read.result.unwrap().output, "read_file ok");
        assert!(h.observer.refreshes().is_empty());

        let write = orch.approve(&ids[1]).await.unwrap();
        assert_eq!(write.approval_status, ApprovalStatus::Approved);
        assert_eq!(h.observer.refreshes().len(), 1);
        assert_eq!(tools.calls()[1].1, json!({"path": "b.txt", "content": "B"}));
        assert!(orch.all_resolved());

        // approving twice does not run the tool again
        orch.approve(&ids[1]).await.unwrap();
        assert_eq!(tools.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_can_be_disabled() {
        let h = TestHarness::new().with_model(MockModel::with_response(&two_tools()));
        let mut config = GateConfig::default();
        config.approval.refresh_after_write = false;
        let ctx = h.context(config);
        let tools = RecordingTools::new();
        let mut orch = ApprovalOrchestrator::new(&ctx, &tools);
        let id = orch
            .start("t", Vec::new(), &CancellationToken::new())
            .await
            .unwrap()
            .executions[1]
            .id
            .clone();
        orch.approve(&id).await.unwrap();
        assert!(h.observer.refreshes().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_and_failing_tools_become_failed_results() {
        let reply = plan(
            "odd",
            json!([
                {"type": "format_disk", "params": {}},
                {"type": "delete_file", "params": {"path": "x"}}
            ]),
        );
        let h = TestHarness::new().with_model(MockModel::with_response(&reply));
        let ctx = h.context(GateConfig::default());
        let tools = RecordingTools::new().with_failure("delete_file");
        let mut orch = ApprovalOrchestrator::new(&ctx, &tools);
        let ids: Vec<String> = orch
            .start("t", Vec::new(), &CancellationToken::new())
            .await
            .unwrap()
            .executions
            .iter()
            .map(|e| e.id.clone())
            .collect();

        let unknown = orch.approve(&ids[0]).await.unwrap();
        let result = unknown.result.unwrap();
        assert!(!result.success);
        assert!(result.output.contains("format_disk"));

        let failed = orch.approve(&ids[1]).await.unwrap();
        assert!(!failed.result.unwrap().success);
        // failed writes do not refresh
        assert!(h.observer.refreshes().is_empty());
    }

    #[tokio::test]
    async fn test_continuation_carries_results_and_history() {
        let h = TestHarness::new().with_model(MockModel::with_responses([
            two_tools(),
            plan("done", json!([])),
        ]));
        let ctx = h.context(GateConfig::default());
        let tools = RecordingTools::new();
        let mut orch = ApprovalOrchestrator::new(&ctx, &tools);
        let cancel = CancellationToken::new();
        let ids: Vec<String> = orch
            .start("task", Vec::new(), &cancel)
            .await
            .unwrap()
            .executions
            .iter()
            .map(|e| e.id.clone())
            .collect();
        orch.approve(&ids[0]).await.unwrap();
        orch.reject(&ids[1]).unwrap();

        let run = orch.continue_with("keep going", &cancel).await.unwrap();
        assert_eq!(run.summary, "done");
        assert!(run.executions.is_empty());
        let roles: Vec<Role> = run.history.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);

        let request = &h.model.requests()[1];
        assert_eq!(request.context.len(), 2);
        assert_eq!(request.context[1].content, "read then write");
        assert!(request.prompt.starts_with("keep going"));
        assert!(request.prompt.contains("#1 read_file succeeded:\nread_file ok"));
        assert!(request.prompt.contains("#2 write_to_file was rejected by the user"));
    }

    #[tokio::test]
    async fn test_malformed_plan_keeps_previous_queue() {
        let h = TestHarness::new().with_model(MockModel::with_responses([
            two_tools(),
            "sorry, no JSON today".to_string(),
        ]));
        let ctx = h.context(GateConfig::default());
        let tools = RecordingTools::new();
        let mut orch = ApprovalOrchestrator::new(&ctx, &tools);
        let cancel = CancellationToken::new();
        orch.start("t", Vec::new(), &cancel).await.unwrap();

        let err = orch.start("again", Vec::new(), &cancel).await.unwrap_err();
        assert!(matches!(
            err,
            GateError::Approval(ApprovalError::MalformedPlan { .. })
        ));
        assert_eq!(orch.run().unwrap().executions.len(), 2);
    }

    #[tokio::test]
    async fn test_errors_without_run_or_unknown_id() {
        let h = TestHarness::new().with_model(MockModel::with_response(&two_tools()));
        let ctx = h.context(GateConfig::default());
        let tools = RecordingTools::new();
        let mut orch = ApprovalOrchestrator::new(&ctx, &tools);
        assert!(matches!(
            orch.reject("x").unwrap_err(),
            GateError::Approval(ApprovalError::NoActiveRun)
        ));
        orch.start("t", Vec::new(), &CancellationToken::new()).await.unwrap();
        assert!(matches!(
            orch.approve("missing").await.unwrap_err(),
            GateError::Approval(ApprovalError::UnknownExecution { .. })
        ));
    }

    #[test]
    fn test_continuation_prompt_without_results() {
        assert_eq!(continuation_prompt(" next ", &[]), "next");
    }
}
