//! Subcommand handlers.

use crate::Commands;
use crate::terminal::{AutoConfirm, DialoguerConfirm, OfflineModel, TerminalObserver};
use actiongate_core::approval::{ApprovalOrchestrator, ApprovalStatus};
use actiongate_core::config::{GateConfig, init_workspace_config, load_config};
use actiongate_core::context::AppContext;
use actiongate_core::engine::{ActionOutcome, ExecutionReport};
use actiongate_core::model::ModelPort;
use actiongate_core::parser::parse;
use actiongate_core::ports::{ConfirmationPort, ShellPort, WorkspaceFs};
use actiongate_core::propose::ProposeOrchestrator;
use actiongate_core::providers::create_model;
use actiongate_core::session::{ActionSession, TurnResult};
use actiongate_core::types::RetryBudget;
use actiongate_tools::{
    LocalWorkspace, ShellRunner, ShellToolchain, ToolRegistry, register_builtin_tools,
};
use anyhow::Context;
use dialoguer::{Input, Select};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Global flags shared by every subcommand.
pub struct Options {
    pub workspace: PathBuf,
    pub config_file: Option<PathBuf>,
    pub yes: bool,
    pub quiet: bool,
}

pub async fn handle_command(command: Commands, options: Options) -> anyhow::Result<()> {
    match command {
        Commands::Parse { input } => handle_parse(&input),
        Commands::Run { input } => handle_run(&input, &options).await,
        Commands::Chat { task } => handle_chat(&task, &options).await,
        Commands::Propose { task } => handle_propose(&task, &options).await,
        Commands::Approve { task } => handle_approve(&task, &options).await,
        Commands::Init => {
            let path = init_workspace_config(&options.workspace)?;
            println!("Wrote {}", path.display());
            Ok(())
        }
    }
}

fn read_input(input: &Path) -> anyhow::Result<String> {
    if input == Path::new("-") {
        std::io::read_to_string(std::io::stdin()).context("Failed to read stdin")
    } else {
        std::fs::read_to_string(input)
            .with_context(|| format!("Failed to read {}", input.display()))
    }
}

fn load(options: &Options) -> anyhow::Result<GateConfig> {
    let config = load_config(
        Some(&options.workspace),
        options.config_file.as_deref(),
        None,
    )
    .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    for warning in config.validate() {
        warn!("{}", warning);
    }
    Ok(config)
}

/// Ports wired for the local machine.
struct Runtime {
    ctx: AppContext,
    fs: Arc<LocalWorkspace>,
    shell: Arc<ShellRunner>,
}

fn build_runtime(
    options: &Options,
    config: GateConfig,
    model: Arc<dyn ModelPort>,
) -> anyhow::Result<Runtime> {
    let fs = Arc::new(LocalWorkspace::new(&options.workspace));
    let shell = Arc::new(ShellRunner::from_config(&config.execution));
    let toolchain = Arc::new(ShellToolchain::new(shell.clone(), fs.root()));
    let confirm: Arc<dyn ConfirmationPort> = if options.yes {
        Arc::new(AutoConfirm)
    } else {
        Arc::new(DialoguerConfirm)
    };
    let ctx = AppContext::builder(config)
        .model(model)
        .fs(fs.clone())
        .shell(shell.clone())
        .toolchain(toolchain)
        .confirm(confirm)
        .observer(Arc::new(TerminalObserver::new(options.quiet)))
        .build()?;
    Ok(Runtime { ctx, fs, shell })
}

fn online_runtime(options: &Options) -> anyhow::Result<Runtime> {
    let config = load(options)?;
    let model = create_model(&config.model)?;
    info!(model = model.model_name(), workspace = %options.workspace.display(), "Model ready");
    build_runtime(options, config, model)
}

/// Cancelled on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    token
}

async fn prompt_line(prompt: &str) -> anyhow::Result<String> {
    let prompt = prompt.to_string();
    let line = tokio::task::spawn_blocking(move || {
        Input::<String>::new()
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()
    })
    .await??;
    Ok(line.trim().to_string())
}

async fn select(prompt: &str, items: Vec<String>) -> anyhow::Result<usize> {
    let prompt = prompt.to_string();
    let choice = tokio::task::spawn_blocking(move || {
        Select::new()
            .with_prompt(prompt)
            .items(&items)
            .default(0)
            .interact()
    })
    .await??;
    Ok(choice)
}

fn print_report(report: &ExecutionReport) {
    let declined = report
        .actions
        .iter()
        .filter(|a| a.outcome == ActionOutcome::Declined)
        .count();
    println!(
        "\n{} completed, {} failed, {} declined",
        report.completed(),
        report.failures().count(),
        declined
    );
}

fn handle_parse(input: &Path) -> anyhow::Result<()> {
    let text = read_input(input)?;
    let outcome = parse(&text);
    println!("{}", serde_json::to_string_pretty(outcome.actions())?);
    Ok(())
}

async fn handle_run(input: &Path, options: &Options) -> anyhow::Result<()> {
    let text = read_input(input)?;
    let config = load(options)?;
    let runtime = build_runtime(options, config, Arc::new(OfflineModel))?;
    let mut session = ActionSession::new(&runtime.ctx);
    let round = session.run_response(&text).await;

    match &round.report {
        None => println!("No actions found."),
        Some(report) => {
            print_report(report);
            if report.has_failures() {
                anyhow::bail!("{} action(s) failed", report.failures().count());
            }
        }
    }
    Ok(())
}

async fn handle_chat(task: &str, options: &Options) -> anyhow::Result<()> {
    let runtime = online_runtime(options)?;
    let cancel = cancel_on_ctrl_c();
    let streaming = runtime.ctx.config.model.use_streaming;

    let mut session = ActionSession::new(&runtime.ctx);
    let printer = if streaming {
        let (tx, mut rx) = mpsc::channel::<String>(64);
        session = session.with_stream(tx);
        Some(tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                print!("{}", chunk);
                let _ = std::io::stdout().flush();
            }
        }))
    } else {
        None
    };

    let mut message = task.to_string();
    loop {
        let turn = session.send(&message, &cancel).await?;
        show_turn(&turn, streaming);
        if options.yes {
            break;
        }
        message = prompt_line("You (empty to quit)").await?;
        if message.is_empty() {
            break;
        }
    }

    drop(session);
    if let Some(printer) = printer {
        let _ = printer.await;
    }
    Ok(())
}

fn show_turn(turn: &TurnResult, streamed: bool) {
    for round in &turn.rounds {
        if !streamed {
            println!("\n{}\n", round.reply);
        }
        if let Some(report) = &round.report {
            print_report(report);
        }
    }
}

async fn handle_propose(task: &str, options: &Options) -> anyhow::Result<()> {
    let runtime = online_runtime(options)?;
    let cancel = cancel_on_ctrl_c();
    let mut orch = ProposeOrchestrator::new(&runtime.ctx);

    let run = orch.propose(task, &cancel).await?;
    println!("\n{}\n", run.summary);
    let labels: Vec<String> = run
        .changes
        .iter()
        .enumerate()
        .map(|(i, c)| match &c.description {
            Some(d) => format!("#{} {} - {}", i + 1, c.file_path, d),
            None => format!("#{} {}", i + 1, c.file_path),
        })
        .collect();
    for label in &labels {
        println!("  {}", label);
    }
    if labels.is_empty() {
        println!("The model proposed no changes.");
        return Ok(());
    }

    if options.yes {
        if let Some(steps) = orch.apply_all().await? {
            report_steps(&steps);
        }
        return Ok(());
    }

    let actions = vec![
        "Preview a change".to_string(),
        "Apply one change".to_string(),
        "Apply all".to_string(),
        "Abandon".to_string(),
    ];
    while orch.pending().is_some() {
        match select("What next?", actions.clone()).await? {
            0 => {
                let index = select("Preview which change?", labels.clone()).await?;
                println!("{}", orch.preview(index).await?);
            }
            1 => {
                let index = select("Apply which change?", labels.clone()).await?;
                let step = orch.apply_one(index).await?;
                report_steps(std::slice::from_ref(&step));
            }
            2 => {
                if let Some(steps) = orch.apply_all().await? {
                    report_steps(&steps);
                }
            }
            _ => orch.abandon(),
        }
    }
    Ok(())
}

fn report_steps(steps: &[actiongate_core::propose::AppliedStep]) {
    for step in steps {
        let mark = if step.success { "ok" } else { "FAILED" };
        println!("  [{}] {}", mark, step.message);
    }
}

async fn handle_approve(task: &str, options: &Options) -> anyhow::Result<()> {
    let runtime = online_runtime(options)?;
    let cancel = cancel_on_ctrl_c();

    let mut registry = ToolRegistry::new();
    let shell: Arc<dyn ShellPort> = runtime.shell.clone();
    register_builtin_tools(
        &mut registry,
        runtime.fs.clone(),
        shell,
        Duration::from_secs(runtime.ctx.config.execution.command_timeout_secs),
    );

    let mut orch = ApprovalOrchestrator::new(&runtime.ctx, &registry);
    let mut budget = RetryBudget::new(runtime.ctx.config.execution.max_iterations);
    let mut run = orch.start(task, Vec::new(), &cancel).await?.clone();

    loop {
        println!("\n{}\n", run.summary);
        if run.executions.is_empty() {
            println!("The model requested no further tools.");
            break;
        }

        for execution in &run.executions {
            println!(
                "#{} {} {}",
                execution.step_index + 1,
                execution.tool_type,
                execution.tool_params
            );
            let approve = options.yes
                || select(
                    "Decision",
                    vec!["Approve".to_string(), "Reject".to_string()],
                )
                .await?
                    == 0;
            let resolved = if approve {
                orch.approve(&execution.id).await?
            } else {
                orch.reject(&execution.id)?
            };
            match (resolved.approval_status, &resolved.result) {
                (ApprovalStatus::Approved, Some(result)) if !result.success => {
                    println!("  failed: {}", result.output)
                }
                (ApprovalStatus::Rejected, _) => println!("  rejected"),
                _ => {}
            }
        }

        let reply = if options.yes {
            budget = budget.next();
            if budget.exhausted() {
                warn!(cap = budget.cap, "Stopping after the iteration limit");
                break;
            }
            String::new()
        } else {
            let reply =
                prompt_line("Reply to the model (empty to send results, 'q' to quit)").await?;
            if reply == "q" {
                break;
            }
            reply
        };
        run = orch.continue_with(&reply, &cancel).await?.clone();
    }
    Ok(())
}
