//! agentlab CLI client - drive tasks, votes and provider jobs as an agent

mod client;

use std::time::Duration;

use agentlab::models::{CritiqueRequest, PageQuery, ProposeTaskRequest, StartJobRequest};
use agentlab::providers::{JobView, RetryPolicy};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::client::LabClient;

#[derive(Parser)]
#[command(name = "agentlab")]
#[command(about = "CLI client for agentlab - drive tasks, votes and provider jobs as an agent")]
#[command(version)]
struct Cli {
    /// Server base URL
    #[arg(short, long, env = "AGENTLAB_URL", default_value = "http://localhost:3000")]
    server: String,

    /// Bearer token identifying this agent
    #[arg(short, long, env = "AGENTLAB_TOKEN", hide_env_values = true)]
    token: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Task lifecycle operations
    #[command(subcommand)]
    Task(TaskCommand),

    /// Provider job operations
    #[command(subcommand)]
    Job(JobCommand),

    /// List a task's merged artifacts
    Artifacts {
        task_id: Uuid,

        #[arg(long, default_value_t = 1)]
        page: usize,

        #[arg(long, default_value_t = 20)]
        per_page: usize,
    },

    /// Follow a lab's event feed
    Events {
        lab_id: Uuid,

        /// Exit after this many events
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Subcommand)]
enum TaskCommand {
    /// List a lab's tasks
    List {
        lab_id: Uuid,

        #[arg(long)]
        status: Option<String>,
    },

    /// Propose a new task
    Propose {
        lab_id: Uuid,

        #[arg(long)]
        title: String,

        /// literature_review, analysis, deep_research, critique or synthesis
        #[arg(long = "type")]
        task_type: String,

        #[arg(long, default_value = "")]
        description: String,
    },

    Show { task_id: Uuid },

    PickUp { task_id: Uuid },

    /// Complete a task with a JSON result (inline, or `@path` to read a file)
    Complete {
        task_id: Uuid,

        #[arg(long)]
        result: String,
    },

    Critique {
        task_id: Uuid,

        #[arg(long)]
        content: String,

        #[arg(long)]
        severity: Option<String>,
    },

    StartVoting { task_id: Uuid },

    /// Vote approve, reject or abstain
    Vote {
        task_id: Uuid,

        vote: String,

        #[arg(long)]
        reasoning: Option<String>,
    },

    /// Show current votes and the tally
    Votes { task_id: Uuid },
}

#[derive(Subcommand)]
enum JobCommand {
    /// Start a literature or analysis job for an in-progress task
    Start {
        task_id: Uuid,

        #[arg(long)]
        kind: String,

        #[arg(long)]
        question: Option<String>,

        #[arg(long = "dataset")]
        datasets: Vec<String>,

        /// Extra JSON parameters (inline, or `@path`)
        #[arg(long)]
        parameters: Option<String>,
    },

    /// Poll a job once
    Poll { job_id: Uuid },

    /// Poll until the job finishes or its budget runs out
    Wait {
        job_id: Uuid,

        /// Seconds between polls
        #[arg(long, default_value_t = 15)]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agentlab_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let client = LabClient::new(&cli.server, &cli.token, RetryPolicy::default());

    match cli.command {
        Commands::Task(command) => run_task(&client, command).await,
        Commands::Job(command) => run_job(&client, command).await,
        Commands::Artifacts {
            task_id,
            page,
            per_page,
        } => print_json(&client.artifacts(task_id, PageQuery { page, per_page }).await?),
        Commands::Events { lab_id, limit } => run_events(&client, lab_id, limit).await,
    }
}

async fn run_task(client: &LabClient, command: TaskCommand) -> Result<()> {
    match command {
        TaskCommand::List { lab_id, status } => {
            print_json(&client.list_tasks(lab_id, status.as_deref()).await?)
        }
        TaskCommand::Propose {
            lab_id,
            title,
            task_type,
            description,
        } => {
            let request = ProposeTaskRequest {
                title,
                description,
                task_type,
            };
            print_json(&client.propose(lab_id, &request).await?)
        }
        TaskCommand::Show { task_id } => print_json(&client.get_task(task_id).await?),
        TaskCommand::PickUp { task_id } => print_json(&client.pick_up(task_id).await?),
        TaskCommand::Complete { task_id, result } => {
            let result = parse_json_arg(&result)?;
            print_json(&client.complete(task_id, result).await?)
        }
        TaskCommand::Critique {
            task_id,
            content,
            severity,
        } => {
            let request = CritiqueRequest {
                content,
                severity,
                issues: None,
            };
            print_json(&client.critique(task_id, &request).await?)
        }
        TaskCommand::StartVoting { task_id } => print_json(&client.start_voting(task_id).await?),
        TaskCommand::Vote {
            task_id,
            vote,
            reasoning,
        } => {
            let receipt = client.vote(task_id, &vote, reasoning.as_deref()).await?;
            if receipt.resolved {
                println!("Voting closed: task is {}", receipt.summary.status.as_str());
            }
            print_json(&receipt)
        }
        TaskCommand::Votes { task_id } => print_json(&client.votes(task_id).await?),
    }
}

async fn run_job(client: &LabClient, command: JobCommand) -> Result<()> {
    match command {
        JobCommand::Start {
            task_id,
            kind,
            question,
            datasets,
            parameters,
        } => {
            let request = StartJobRequest {
                kind,
                question,
                datasets,
                parameters: parameters.as_deref().map(parse_json_arg).transpose()?,
            };
            print_json(&client.start_job(task_id, &request).await?)
        }
        JobCommand::Poll { job_id } => print_json(&client.poll_job(job_id).await?),
        JobCommand::Wait { job_id, interval } => {
            run_wait(client, job_id, Duration::from_secs(interval)).await
        }
    }
}

/// What `job wait` should do after a poll
#[derive(Debug, PartialEq, Eq)]
enum WaitOutcome {
    Finished,
    /// Budget spent; the caller should fall back to a partial completion
    Degraded,
    KeepWaiting,
}

fn wait_outcome(view: &JobView) -> WaitOutcome {
    if view.job.status.is_terminal() {
        WaitOutcome::Finished
    } else if view.budget_exceeded {
        WaitOutcome::Degraded
    } else {
        WaitOutcome::KeepWaiting
    }
}

async fn run_wait(client: &LabClient, job_id: Uuid, interval: Duration) -> Result<()> {
    loop {
        let view = client.poll_job(job_id).await?;
        match wait_outcome(&view) {
            WaitOutcome::Finished => {
                tracing::info!("Job {} finished as {}", job_id, view.job.status.as_str());
                return print_json(&view);
            }
            WaitOutcome::Degraded => {
                tracing::warn!(
                    "Job {} is still {} after its {}-minute budget",
                    job_id,
                    view.job.status.as_str(),
                    view.job.kind.polling_budget().num_minutes()
                );
                println!("degraded: complete the task with partial results");
                return print_json(&view);
            }
            WaitOutcome::KeepWaiting => {
                tracing::info!(
                    "Job {} is {}, polling again in {:?}",
                    job_id,
                    view.job.status.as_str(),
                    interval
                );
                tokio::time::sleep(interval).await;
            }
        }
    }
}

async fn run_events(client: &LabClient, lab_id: Uuid, limit: Option<usize>) -> Result<()> {
    let mut seen = 0;
    client
        .follow_events(lab_id, |event| {
            println!("{}", event);
            seen += 1;
            limit.map_or(true, |limit| seen < limit)
        })
        .await?;
    Ok(())
}

/// Inline JSON, or `@path` to read it from a file
fn parse_json_arg(arg: &str) -> Result<Value> {
    let text = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path))?,
        None => arg.to_string(),
    };
    serde_json::from_str(&text).context("Argument is not valid JSON")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
