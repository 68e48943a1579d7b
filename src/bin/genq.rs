//! genq CLI: run the job queue, fetch models, check audio paths.

use genq::config::Config;
use genq::download::ModelDownloader;
use genq::engine::{CommandRunner, Dispatcher, JobSubscription, WorkerPool, run_job_store_cleanup_loop};
use genq::model::GenerateRequest;
use genq::queue::JobQueue;
use genq::store::{JobStore, MemoryJobStore};
use genq::telemetry::{TelemetryConfig, init_telemetry};
use genq::temp_files::TempFiles;
use genq::upload::validate_audio_path;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "genq", about = "Generation job queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the worker pool, reading one JSON request per line from stdin
    Serve {
        /// Number of jobs to run in parallel (overrides GENQ_WORKERS)
        #[arg(long)]
        workers: Option<usize>,
        /// Generator executable (overrides GENQ_GENERATE_COMMAND)
        #[arg(long)]
        command: Option<PathBuf>,
    },
    /// Make sure a model checkpoint is present locally
    Download {
        /// Model name (e.g. acestep-v15-turbo)
        model: String,
        /// Checkpoint directory (overrides GENQ_CHECKPOINT_DIR)
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,
    },
    /// Check whether an audio path would be accepted in a request
    CheckPath { path: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "genq".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let outcome = match cli.command {
        Command::Serve { workers, command } => cmd_serve(config, workers, command).await,
        Command::Download {
            model,
            checkpoint_dir,
        } => cmd_download(config, model, checkpoint_dir).await,
        Command::CheckPath { path } => cmd_check_path(&path),
    };
    guard.force_flush();
    outcome
}

async fn cmd_serve(
    config: Config,
    workers: Option<usize>,
    command: Option<PathBuf>,
) -> anyhow::Result<()> {
    let generate_command = command
        .or_else(|| config.generate_command.clone())
        .ok_or_else(|| {
            anyhow::anyhow!("no generator configured: pass --command or set GENQ_GENERATE_COMMAND")
        })?;

    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new(config.job_retention));
    let queue = Arc::new(JobQueue::new(config.queue_capacity));
    let temp_files = Arc::new(TempFiles::new());
    let downloader = Arc::new(ModelDownloader::from_config(&config)?);

    let runner = CommandRunner::new(
        generate_command,
        &config.job_dir,
        Arc::clone(&store),
        Arc::clone(&temp_files),
    )
    .with_models(downloader, config.checkpoint_dir.clone());

    let pool = WorkerPool::new(
        Arc::clone(&queue),
        Arc::clone(&store),
        Arc::new(runner),
        temp_files.clone(),
        workers.unwrap_or(config.workers),
    );
    let worker_handles = pool.spawn();

    let cleanup_cancel = CancellationToken::new();
    let cleanup = tokio::spawn(run_job_store_cleanup_loop(
        Arc::clone(&store),
        config.cleanup_interval,
        cleanup_cancel.clone(),
    ));

    let dispatcher = Dispatcher::new(Arc::clone(&queue), Arc::clone(&store), temp_files);

    // A single printer keeps concurrent jobs from interleaving partial lines.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<serde_json::Value>();
    let printer = tokio::spawn(async move {
        while let Some(line) = out_rx.recv().await {
            println!("{line}");
        }
    });

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut interrupted = false;

    loop {
        let line = tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("interrupted, stopping workers");
                interrupted = true;
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let request: GenerateRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                let _ = out_tx.send(serde_json::json!({ "error": format!("bad request: {e}") }));
                continue;
            }
        };

        match dispatcher.submit(request, true).await {
            Ok(subscription) => {
                let _ = out_tx.send(serde_json::json!({
                    "job_id": subscription.job_id,
                    "event": { "type": "queued" },
                }));
                tokio::spawn(forward_events(subscription, out_tx.clone()));
            }
            Err(e) => {
                let _ = out_tx.send(serde_json::json!({ "error": e.to_string() }));
            }
        }
    }

    queue.close().await;
    if !interrupted {
        // stdin is exhausted: let every queued job finish first
        queue.join().await;
    }
    pool.shutdown();
    futures::future::join_all(worker_handles).await;

    cleanup_cancel.cancel();
    cleanup.await?;

    if !interrupted {
        drop(out_tx);
        printer.await?;
    }
    Ok(())
}

async fn forward_events(mut subscription: JobSubscription, out: mpsc::UnboundedSender<serde_json::Value>) {
    let job_id = subscription.job_id.clone();
    if let Some(ref mut rx) = subscription.progress {
        while let Some(event) = rx.recv().await {
            let done = event == genq::model::ProgressEvent::Done;
            let _ = out.send(serde_json::json!({ "job_id": job_id, "event": event }));
            if done {
                break;
            }
        }
    }
}

async fn cmd_download(
    config: Config,
    model: String,
    checkpoint_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let checkpoint_dir = checkpoint_dir.unwrap_or_else(|| config.checkpoint_dir.clone());
    let downloader = ModelDownloader::from_config(&config)?;
    let path = downloader
        .ensure_model_downloaded(&model, &checkpoint_dir)
        .await?;
    println!("{}", path.display());
    Ok(())
}

fn cmd_check_path(path: &str) -> anyhow::Result<()> {
    match validate_audio_path(Some(path))? {
        Some(accepted) => println!("accepted: {}", accepted.display()),
        None => println!("accepted: (empty)"),
    }
    Ok(())
}
