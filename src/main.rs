use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use docstream::{
    api::DocumentsApi,
    config::Config,
    models::{StatusUpdate, TerminalOutcome},
    utils::init_logger,
    JobStatusStreamClient,
};

#[derive(Parser)]
#[command(name = "docstream", version, about = "Follow document processing status live")]
struct Cli {
    /// Backend URL (overrides DOCSTREAM_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Bearer token (overrides DOCSTREAM_API_TOKEN)
    #[arg(long, global = true)]
    token: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List documents with their processing status
    List,
    /// Stream status updates until every watched job finishes
    Watch {
        /// Document ids to follow
        job_ids: Vec<String>,

        /// Also follow every document that is still pending or processing
        #[arg(long)]
        pending: bool,
    },
}

enum WatchEvent {
    Update(String, StatusUpdate),
    Terminal(String, TerminalOutcome),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    let mut config = Config::from_env()?;
    if let Some(url) = cli.api_url {
        config.api.base_url = url;
    }
    if let Some(token) = cli.token {
        config.api.token = Some(token);
    }
    info!("Using backend at {}", config.api.base_url);

    let api = Arc::new(DocumentsApi::new(&config.api));

    match cli.command {
        Command::List => list(&api, config.api.list_limit).await,
        Command::Watch { job_ids, pending } => {
            let failed = watch(api, job_ids, pending, config.api.list_limit).await?;
            if failed {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

async fn list(api: &DocumentsApi, limit: u32) -> anyhow::Result<()> {
    let list = api.list_documents(limit).await?;
    for doc in &list.documents {
        println!(
            "{:<38} {:<11} {:>4} {:<20} {}",
            doc.document_id,
            doc.processing_status.to_string(),
            doc.processing_progress
                .map(|p| format!("{}%", p.min(100)))
                .unwrap_or_default(),
            doc.processing_step.as_deref().unwrap_or("-"),
            doc.filename
        );
    }
    println!("{} of {} documents", list.documents.len(), list.total);
    Ok(())
}

/// Returns true if any job ended in failure.
async fn watch(
    api: Arc<DocumentsApi>,
    mut job_ids: Vec<String>,
    pending: bool,
    limit: u32,
) -> anyhow::Result<bool> {
    if pending {
        let list = api.list_documents(limit).await?;
        job_ids.extend(
            list.documents
                .iter()
                .filter(|doc| !doc.processing_status.is_terminal())
                .map(|doc| doc.document_id.clone()),
        );
    }
    job_ids.sort();
    job_ids.dedup();

    if job_ids.is_empty() {
        warn!("Nothing to watch");
        return Ok(false);
    }

    let client = JobStatusStreamClient::from_shared(api.clone(), api);
    let (tx, mut rx) = mpsc::unbounded_channel();

    for job_id in &job_ids {
        let updates = tx.clone();
        let terminals = tx.clone();
        let update_id = job_id.clone();
        let terminal_id = job_id.clone();
        client.subscribe(
            job_id.clone(),
            move |update| {
                let _ = updates.send(WatchEvent::Update(update_id.clone(), update));
            },
            move |outcome| {
                let _ = terminals.send(WatchEvent::Terminal(terminal_id, outcome));
            },
        )?;
    }
    drop(tx);

    let mut failed = false;
    let mut idle_check = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                failed |= report(event);
            }
            _ = idle_check.tick() => {
                // `done` ends a subscription without a terminal callback
                if client.active_jobs().await?.is_empty() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing streams");
                break;
            }
        }
    }

    while let Ok(event) = rx.try_recv() {
        failed |= report(event);
    }
    client.shutdown().await?;
    Ok(failed)
}

/// Print one event. Returns true for a failed job.
fn report(event: WatchEvent) -> bool {
    match event {
        WatchEvent::Update(job_id, update) => {
            println!(
                "{}  {}  {}  {}",
                job_id,
                update.processing_status,
                update.progress().map(|p| format!("{}%", p)).unwrap_or_default(),
                update.processing_step.unwrap_or_default()
            );
            false
        }
        WatchEvent::Terminal(job_id, outcome) if outcome.is_success() => {
            println!("{}  {}", job_id, outcome);
            false
        }
        WatchEvent::Terminal(job_id, outcome) => {
            error!("{}: {}", job_id, outcome);
            true
        }
    }
}
