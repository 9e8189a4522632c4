//! # ActionGate Core
//!
//! Core library for ActionGate, which turns model replies into guarded
//! workspace actions. Provides the action-marker parser, the workspace guard,
//! the execution engine with toolchain remediation, post-action verification,
//! the propose and approve orchestrators, the model port with an
//! OpenAI-compatible provider, configuration, and test doubles.

pub mod approval;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod model;
pub mod parser;
pub mod ports;
pub mod prompts;
pub mod propose;
pub mod providers;
pub mod remediation;
pub mod session;
pub mod testing;
pub mod types;
pub mod verification;
pub mod workspace;

// Re-export commonly used types at the crate root.
pub use approval::{ApprovalOrchestrator, ApprovalRun, ApprovalStatus, ToolExecution, ToolResult};
pub use config::{GateConfig, load_config};
pub use context::{AppContext, AppContextBuilder};
pub use engine::{ActionOutcome, ExecutionEngine, ExecutionReport, FailureKind};
pub use error::{GateError, Result};
pub use model::{ModelPort, ModelRequest};
pub use parser::{ParseOutcome, parse};
pub use ports::{
    ConfirmationPort, NoOpObserver, ShellPort, ToolExecutor, ToolchainPort, WorkspaceFs,
    WorkspaceObserver,
};
pub use propose::{AppliedStep, ProposeOrchestrator, ProposeState, ProposedChange};
pub use providers::{OpenAiCompatModel, create_model};
pub use remediation::{RemediationOutcome, Remediator};
pub use session::{ActionSession, RoundResult, TurnResult};
pub use types::{
    ActionKind, ActionRequest, Artifact, ChatTurn, CommandOutput, DirEntry, RetryBudget, Role,
    Transcript, TranscriptKind, TranscriptLine, WriteOutcome,
};
pub use verification::{VerificationOutcome, VerificationRunner};
pub use workspace::WorkspaceGuard;
