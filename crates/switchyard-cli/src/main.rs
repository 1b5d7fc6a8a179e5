//! The `switchyard` command line.
//!
//! Loads `switchyard.toml`, opens the file store, registers the demo agents and
//! runs one command against the orchestrator: submitting tasks, answering
//! review items or inspecting tasks and traces.

mod config;
mod demo;

use clap::{Parser, Subcommand};
use config::SwitchyardConfig;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use switchyard_core::{ReviewAction, TaskRequest};
use switchyard_llm::build_generator;
use switchyard_orchestrator::{Orchestrator, RuntimeBuilder};
use switchyard_store::{DurableStore, FileStore};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "switchyard", about = "Switchyard: governed multi-agent orchestration")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "switchyard.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a task and drive it as far as it can go
    Run {
        #[arg(long)]
        intent: String,
        /// Request payload as JSON
        #[arg(long, default_value = "{}")]
        payload: String,
        /// Route label that takes precedence over the intent
        #[arg(long)]
        pipeline: Option<String>,
        #[arg(long, requires = "entity_id")]
        entity_type: Option<String>,
        #[arg(long, requires = "entity_type")]
        entity_id: Option<String>,
        /// Who is asking
        #[arg(long = "as")]
        requested_by: Option<String>,
    },
    /// Submit a raw JSON request in any accepted shape
    Submit {
        request: String,
    },
    /// List registered agents
    Agents,
    /// List review items
    Reviews {
        /// Include answered items
        #[arg(long)]
        all: bool,
    },
    /// Answer a review item and resume its task
    Respond {
        id: Uuid,
        /// approve, reject, request_modification, cancel or acknowledge
        action: String,
        #[arg(long = "as", default_value = "supervisor")]
        responder: String,
        #[arg(long)]
        note: Option<String>,
    },
    /// Show a task and its cached plan
    Task {
        id: Uuid,
    },
    /// Print a trace's events and the state they replay to
    Replay {
        trace_id: Uuid,
    },
}

/// Tell the deadlock watch to stop. Returns false when it had already exited.
fn signal_shutdown(tx: &watch::Sender<bool>) -> bool {
    match tx.send(true) {
        Ok(()) => true,
        Err(_) => {
            warn!("Deadlock watch exited before shutdown was signalled");
            false
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = SwitchyardConfig::load(&cli.config).await?;

    let store: Arc<dyn DurableStore> = Arc::new(FileStore::open(config.data_dir.clone()).await?);
    let runtime = Arc::new(
        demo::register(RuntimeBuilder::new(store.clone()), config.bus.query_timeout()).build(),
    );
    let _inboxes = runtime.serve_inboxes().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watch = Arc::clone(runtime.deadlock_detector())
        .spawn_watch(config.bus.deadlock_scan_interval(), shutdown_rx);

    let generator = config.model.as_ref().map(build_generator).transpose()?;
    if generator.is_none() {
        info!("No [model] configured, planning from routes only");
    }
    let orchestrator = Orchestrator::new(runtime.clone(), &config.governance, generator);
    info!(data_dir = %config.data_dir.display(), agents = runtime.registry().len(), "Switchyard ready");

    match cli.command {
        Commands::Run {
            intent,
            payload,
            pipeline,
            entity_type,
            entity_id,
            requested_by,
        } => {
            let payload: serde_json::Value = serde_json::from_str(&payload)
                .map_err(|e| anyhow::anyhow!("--payload is not valid JSON: {e}"))?;
            let mut request = TaskRequest::new(intent, payload);
            if let Some(pipeline) = pipeline {
                request = request.with_pipeline(pipeline);
            }
            if let (Some(kind), Some(id)) = (entity_type, entity_id) {
                request = request.with_entity(kind, id);
            }
            if let Some(who) = requested_by {
                request = request.requested_by(who);
            }
            print_json(&orchestrator.submit(request).await?)?;
        }
        Commands::Submit { request } => {
            let raw: serde_json::Value = serde_json::from_str(&request)
                .map_err(|e| anyhow::anyhow!("request is not valid JSON: {e}"))?;
            print_json(&orchestrator.submit_value(raw).await?)?;
        }
        Commands::Agents => {
            for (id, name) in runtime.registry().list_agents() {
                println!("{id:<12} {name}");
            }
        }
        Commands::Reviews { all } => {
            let items = if all {
                store.list_reviews(false).await?
            } else {
                orchestrator.pending_reviews().await?
            };
            print_json(&items)?;
        }
        Commands::Respond {
            id,
            action,
            responder,
            note,
        } => {
            let action = ReviewAction::parse_action(&action)
                .ok_or_else(|| anyhow::anyhow!("unknown review action '{action}'"))?;
            match orchestrator.resolve_review(id, action, &responder, note).await? {
                Some(outcome) => print_json(&outcome)?,
                None => println!("Review {id} answered; no task attached"),
            }
        }
        Commands::Task { id } => {
            let task = orchestrator
                .task(id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("no task {id}"))?;
            print_json(&serde_json::json!({
                "task": task,
                "plan": orchestrator.plan(id).await,
            }))?;
        }
        Commands::Replay { trace_id } => {
            let events = orchestrator.events(trace_id).await?;
            if events.is_empty() {
                anyhow::bail!("no events for trace {trace_id}");
            }
            print_json(&events)?;
            println!("replayed state: {}", orchestrator.replay_state(trace_id).await?);
        }
    }

    signal_shutdown(&shutdown_tx);
    watch.await?;
    Ok(())
}
