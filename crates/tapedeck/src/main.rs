use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info};

use tapedeck::artifact::ArtifactStatus;
use tapedeck::config::{load_config, validate_config, Config};
use tapedeck::db::artifact_repo;
use tapedeck::queue::TaskStatus;
use tapedeck::telemetry::init_logging;
use tapedeck::worker::{JobPool, TickOutcome};
use tapedeck::{Artifact, ArtifactId, ArtifactRepository, Services};

#[derive(Parser, Debug)]
#[command(name = "tapedeck", version, about = "Durable audio conversion queue")]
struct Cli {
    /// Path to the JSON configuration file. Built-in defaults apply when
    /// omitted.
    #[arg(long, short)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run conversion workers until interrupted.
    Run,
    /// Store audio files and queue them for conversion.
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Write the current blob of an artifact to a file.
    Download {
        id: ArtifactId,
        #[arg(long, short)]
        output: PathBuf,
        /// Transcode to this format if the stored blob is in another one.
        #[arg(long, short)]
        format: Option<String>,
    },
    /// Print an artifact record as JSON.
    Status { id: ArtifactId },
    /// Process pending tasks on this thread until the queue is empty.
    Drain {
        /// Keep waiting this long for new tasks once the queue is empty.
        #[arg(long, default_value_t = 0)]
        wait_ms: u64,
    },
    /// Print task and artifact counts per status.
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            let config = Config::default();
            validate_config(&config)?;
            config
        }
    };

    init_logging(config.logging.format)?;

    let services = Services::from_config(&config)?;

    match cli.command {
        Command::Run => run(&services),
        Command::Upload { files } => upload(&services, files),
        Command::Download { id, output, format } => {
            download(&services, id, &output, format.as_deref())
        }
        Command::Status { id } => status(&services, id),
        Command::Drain { wait_ms } => drain(&services, Duration::from_millis(wait_ms)),
        Command::Stats => stats(&services),
    }
}

fn run(services: &Services) -> Result<()> {
    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("Failed to install Ctrl-C handler")?;

    let workers = services.workers();
    for worker in &workers {
        worker.start()?;
    }
    info!(
        "{} worker(s) polling '{}'; press Ctrl-C to stop",
        workers.len(),
        services.queue.name()
    );

    stop_rx.recv().context("Signal channel closed")?;
    info!("Shutdown requested, finishing in-flight tasks...");

    for worker in &workers {
        worker.stop();
    }
    Ok(())
}

fn upload(services: &Services, files: Vec<PathBuf>) -> Result<()> {
    let pool = JobPool::new(
        services.config.job_pool.workers,
        services.config.job_pool.capacity,
    );
    let (result_tx, result_rx) = crossbeam_channel::unbounded::<(PathBuf, Result<Artifact>)>();
    let total = files.len();
    info!(
        "Uploading {} file(s) on {} thread(s)",
        total,
        pool.worker_count()
    );

    for path in files {
        let uploads = Arc::clone(&services.uploads);
        let result_tx = result_tx.clone();
        pool.enqueue_job(move || {
            let result = upload_file(&uploads, &path);
            let _ = result_tx.send((path, result));
        })?;
    }
    drop(result_tx);
    pool.shutdown();

    let mut failures = 0;
    for (path, result) in result_rx.iter() {
        match result {
            Ok(artifact) => println!("{}\t{}", artifact.id, path.display()),
            Err(e) => {
                failures += 1;
                error!("{}: {:#}", path.display(), e);
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} uploads failed", failures, total);
    }
    Ok(())
}

fn upload_file(uploads: &tapedeck::UploadService, path: &std::path::Path) -> Result<Artifact> {
    let content =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .with_context(|| format!("{} has no file name", path.display()))?;
    Ok(uploads.upload(&filename, &content)?)
}

fn download(
    services: &Services,
    id: ArtifactId,
    output: &std::path::Path,
    format: Option<&str>,
) -> Result<()> {
    let (artifact, content) = match format {
        Some(format) => services.uploads.download_as(id, format)?,
        None => services.uploads.download(id)?,
    };
    std::fs::write(output, &content)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    info!(
        "Wrote {} bytes of {} ({}) to {}",
        content.len(),
        artifact.original_name,
        format.unwrap_or(artifact.current_format.as_str()),
        output.display()
    );
    Ok(())
}

fn status(services: &Services, id: ArtifactId) -> Result<()> {
    let Some(artifact) = services.repository.get_by_id(id)? else {
        bail!("Artifact {} not found", id);
    };
    println!("{}", serde_json::to_string_pretty(&artifact)?);
    Ok(())
}

fn drain(services: &Services, wait: Duration) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("Failed to build runtime")?;
    let worker = services.worker(0);
    let (mut completed, mut failed, mut lost) = (0usize, 0usize, 0usize);
    loop {
        match runtime.block_on(worker.run_next(wait))? {
            TickOutcome::Idle => break,
            TickOutcome::Completed(_) => completed += 1,
            TickOutcome::Failed(_) => failed += 1,
            TickOutcome::ClaimLost(_) => lost += 1,
        }
    }
    println!("completed: {}\nfailed: {}", completed, failed);
    if lost > 0 {
        println!("superseded: {}", lost);
    }
    Ok(())
}

fn stats(services: &Services) -> Result<()> {
    println!("tasks ({}):", services.queue.name());
    for status in TaskStatus::ALL {
        println!(
            "  {:<11} {}",
            status.as_str(),
            services.queue.count_by_status(status)?
        );
    }

    println!("artifacts:");
    for status in [
        ArtifactStatus::Pending,
        ArtifactStatus::Converting,
        ArtifactStatus::Completed,
        ArtifactStatus::Failed,
    ] {
        let count = artifact_repo::count_by_status(&services.database, status)?;
        println!("  {:<11} {}", status.as_str(), count);
    }
    Ok(())
}
