use std::{io::Write, path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use share_transfer::{
    format_bytes, EngineConfig, LocalStore, Store, TransferCoordinator, TransferDirection,
    TransferOutcome, TransferProgress, TransferRequest, TransferState,
};

#[derive(Parser)]
#[command(
    name = "share-transfer",
    version,
    about = "Copy files and folders between a mounted share and local storage"
)]
struct Cli {
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    Pull(TransferArgs),
    Push(TransferArgs),
}

#[derive(Args)]
struct TransferArgs {
    share_path: String,

    local_path: PathBuf,

    #[arg(long)]
    resume_info: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::load_or_default(cli.config.as_deref())?;

    let (direction, args) = match cli.command {
        Command::Pull(args) => (TransferDirection::ToLocal, args),
        Command::Push(args) => (TransferDirection::ToRemote, args),
    };

    let store = Arc::new(LocalStore::new());
    let coordinator = TransferCoordinator::new(store.clone(), store.clone(), config);

    if args.resume_info {
        return print_resume_info(&coordinator, &args, direction).await;
    }

    let removed = coordinator.purge_expired_checkpoints().await?;
    if removed > 0 {
        tracing::info!(removed, "Removed stale checkpoints");
    }

    let source = match direction {
        TransferDirection::ToLocal => args.share_path.clone(),
        TransferDirection::ToRemote => args.local_path.to_string_lossy().to_string(),
    };
    let entry = store
        .meta(&source)
        .await
        .with_context(|| format!("Could not read '{}'", source))?;

    let request = if entry.is_dir() {
        TransferRequest::directory(direction, args.share_path, args.local_path)
    } else {
        TransferRequest::file(direction, args.share_path, args.local_path)
    };

    let mut transitions = coordinator.transitions();
    let handle = coordinator.start_transfer(request).await?;

    let printer = tokio::spawn(async move {
        loop {
            match transitions.recv().await {
                Ok(TransferState::Running(p)) => print_progress(&p),
                Ok(s) if s.is_terminal() => break,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
        eprintln!();
    });

    let canceller = coordinator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel_active_transfer().await;
        }
    });

    let outcome = handle.wait().await;
    let _ = printer.await;

    match outcome {
        TransferOutcome::Completed(s) => {
            println!(
                "{}: {} item(s), {} in {:.1}s ({}/s average, {}/s peak)",
                s.name,
                s.item_count,
                format_bytes(s.total_bytes as f64),
                s.duration.as_secs_f64(),
                format_bytes(s.preferred_speed()),
                format_bytes(s.max_speed),
            );
            Ok(())
        }
        TransferOutcome::Cancelled => {
            anyhow::bail!("Transfer cancelled; run the same command again to resume")
        }
        TransferOutcome::Failed(e) => Err(e.into()),
    }
}

async fn print_resume_info(
    coordinator: &TransferCoordinator,
    args: &TransferArgs,
    direction: TransferDirection,
) -> anyhow::Result<()> {
    match coordinator
        .get_resumable_checkpoint(&args.share_path, &args.local_path, direction)
        .await
    {
        Some(c) => println!(
            "{} of {} items done, {} transferred, last updated {}",
            c.completed_count(),
            c.total_items,
            format_bytes(c.bytes_transferred as f64),
            c.timestamp.to_rfc3339(),
        ),
        None => println!("No resumable transfer"),
    }

    Ok(())
}

fn print_progress(progress: &TransferProgress) {
    match progress {
        TransferProgress::File {
            fraction_done,
            total_bytes,
            instant_speed_bps,
        } => eprint!(
            "\r{:>5.1}% of {}  {}/s   ",
            fraction_done * 100.0,
            format_bytes(*total_bytes as f64),
            format_bytes(*instant_speed_bps),
        ),
        TransferProgress::Directory {
            completed_items,
            total_items,
            current_item,
            bytes_sent,
        } => eprint!(
            "\r{}/{} items, {}  {}   ",
            completed_items,
            total_items,
            format_bytes(*bytes_sent as f64),
            current_item.as_deref().unwrap_or(""),
        ),
    }

    let _ = std::io::stderr().flush();
}
