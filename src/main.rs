//! untiler - Reassemble a zoomable tiled image into a single file.
//!
//! This binary parses the command line, wires the pipeline together and maps
//! the outcome of every job onto the process exit code.

use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use untiler::{
    batch::{read_job_list, Job},
    config::Config,
    error::StoreError,
    io::{HttpTransport, TileStore},
    sink::{ImageFileSink, OutputSink},
    tile::{Progress, RemoteTileFetcher, StoredTileFetcher, TileFetcher},
    untiler::Untiler,
    zoomify::ZoomifyResolver,
};

/// Exit code when some tiles could not be placed.
const EXIT_MISSING_TILES: u8 = 2;

type HttpUntiler = Untiler<ZoomifyResolver<HttpTransport>, dyn TileFetcher>;

/// Outcome of one job, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum JobStatus {
    Complete,
    MissingTiles,
    Failed,
}

impl From<JobStatus> for ExitCode {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Complete => ExitCode::SUCCESS,
            JobStatus::MissingTiles => ExitCode::from(EXIT_MISSING_TILES),
            JobStatus::Failed => ExitCode::FAILURE,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    init_logging(config.log_filter());

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let transport = match HttpTransport::new(config.request_timeout()) {
        Ok(transport) => Arc::new(transport),
        Err(e) => {
            error!("Failed to create HTTP client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let fetcher = match build_fetcher(&config, Arc::clone(&transport)).await {
        Ok(fetcher) => fetcher,
        Err(e) => {
            error!("Tile store error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let resolver = Arc::new(ZoomifyResolver::with_kind(
        transport,
        config.reference_kind(),
    ));
    let untiler: HttpUntiler = Untiler::new(resolver, fetcher, config.untiler_options());
    let sink = Arc::new(ImageFileSink::new(config.jpeg_quality));

    let jobs = if config.list {
        match read_job_list(Path::new(&config.url), &config.output).await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("Could not read job list: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        vec![Job {
            reference: config.url.clone(),
            output: config.output.clone(),
        }]
    };

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_interrupt(cancel.clone()));

    let mut worst = JobStatus::Complete;
    for (index, job) in jobs.iter().enumerate() {
        if cancel.is_cancelled() {
            warn!(remaining = jobs.len() - index, "Interrupted, skipping remaining jobs");
            worst = worst.max(JobStatus::Failed);
            break;
        }

        let status = run_job(&untiler, &sink, job, &config, &cancel).await;
        worst = worst.max(status);
    }

    worst.into()
}

/// Initialize the tracing/logging subsystem.
fn init_logging(default_filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Cancel the run on Ctrl-C; fetches already running still finish.
async fn cancel_on_interrupt(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Interrupted, waiting for in-flight tiles");
        cancel.cancel();
    }
}

/// Pick the tile source: stored tiles, or downloads optionally kept on disk.
async fn build_fetcher(
    config: &Config,
    transport: Arc<HttpTransport>,
) -> Result<Arc<dyn TileFetcher>, StoreError> {
    let policy = config.retry_policy();

    match &config.store_tiles {
        Some(dir) if config.no_download => {
            info!(dir = %dir.display(), "Reading stored tiles");
            Ok(Arc::new(StoredTileFetcher::new(TileStore::new(dir))))
        }
        Some(dir) => {
            let store = TileStore::new(dir);
            store.ensure_dir().await?;
            info!(dir = %dir.display(), "Keeping downloaded tiles");
            Ok(Arc::new(
                RemoteTileFetcher::new(transport, policy).with_store(store),
            ))
        }
        None => Ok(Arc::new(RemoteTileFetcher::new(transport, policy))),
    }
}

/// Untile one job and write its image.
async fn run_job(
    untiler: &HttpUntiler,
    sink: &Arc<ImageFileSink>,
    job: &Job,
    config: &Config,
    cancel: &CancellationToken,
) -> JobStatus {
    info!(reference = %job.reference, output = %job.output.display(), "Untiling");

    let outcome = match untiler
        .untile_observed(&job.reference, cancel.clone(), progress_logger())
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(reference = %job.reference, error = %e, "Untiling failed");
            return JobStatus::Failed;
        }
    };

    if config.json {
        match serde_json::to_string_pretty(&outcome.report) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Failed to serialize report: {}", e),
        }
    }

    let complete = outcome.report.is_complete();
    for missing in &outcome.report.missing {
        warn!("{}", missing);
    }

    if !complete && !config.allow_missing {
        warn!(
            missing = outcome.report.missing.len(),
            output = %job.output.display(),
            "Image not written because tiles are missing; use --allow-missing to keep it"
        );
        return JobStatus::MissingTiles;
    }

    let sink = Arc::clone(sink);
    let destination = job.output.clone();
    let image = outcome.image;
    let written = tokio::task::spawn_blocking(move || sink.write(&image, &destination)).await;

    match written {
        Ok(Ok(())) if complete => JobStatus::Complete,
        Ok(Ok(())) => JobStatus::MissingTiles,
        Ok(Err(e)) => {
            error!("{}", e);
            JobStatus::Failed
        }
        Err(e) => {
            error!("Image encoding task failed: {}", e);
            JobStatus::Failed
        }
    }
}

/// Log progress every ten percent.
fn progress_logger() -> impl FnMut(&Progress) + Send {
    let mut next_step = 10;
    move |progress: &Progress| {
        let total = progress.total().max(1);
        let percent = progress.completed() * 100 / total;
        if percent >= next_step {
            info!(
                completed = progress.completed(),
                total = progress.total(),
                "{}% of tiles fetched",
                percent
            );
            next_step = (percent / 10 + 1) * 10;
        }
    }
}
