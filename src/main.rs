//! xptrack-replay: drive the engine from recorded region captures.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tokio::time::{Duration, Instant};

use xptrack::{
    db::Database,
    engine::TrackerController,
    ground_truth::{GroundTruthReader, VisionReader},
    models::StopReason,
    sensing::{ChangeDetector, DirectoryFrameSource, FrameSource, RoiImage},
    settings::SettingsStore,
    TrackerConfig,
};

#[derive(Parser)]
#[command(name = "xptrack-replay")]
#[command(about = "Replay region captures through the kill/XP tracker", long_about = None)]
struct Cli {
    /// Chat-completions endpoint for the vision reader
    #[arg(long, global = true)]
    vision_endpoint: Option<String>,

    /// Model name sent to the vision endpoint
    #[arg(long, global = true)]
    vision_model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the change detector over a directory of PNG captures
    Detect {
        /// Directory of captures, replayed in file-name order
        frames: PathBuf,

        /// Normalized difference that counts as a change
        #[arg(long, default_value_t = 0.065)]
        trigger: f64,

        /// Minimum gap between accepted candidates
        #[arg(long, default_value_t = 800)]
        cooldown_ms: u64,

        /// Time between consecutive captures
        #[arg(long, default_value_t = 180)]
        interval_ms: u64,
    },

    /// Ask the vision backend for the percentage in one capture
    Read {
        /// PNG capture of the XP region
        frame: PathBuf,
    },

    /// Track a capture directory end to end and archive the session
    Track {
        frames: PathBuf,

        #[arg(long, default_value = "xptrack.sqlite3")]
        db: PathBuf,

        #[arg(long, default_value = "xptrack-settings.json")]
        settings: PathBuf,
    },

    /// List archived sessions, newest first
    Sessions {
        #[arg(long, default_value = "xptrack.sqlite3")]
        db: PathBuf,

        #[arg(long, default_value_t = 20)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Show the reconciliation log of one session
    Reconciliations {
        session: String,

        #[arg(long, default_value = "xptrack.sqlite3")]
        db: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG overrides the info default.
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let vision = VisionOptions {
        endpoint: cli.vision_endpoint,
        model: cli.vision_model,
    };
    match cli.command {
        Commands::Detect {
            frames,
            trigger,
            cooldown_ms,
            interval_ms,
        } => detect(frames, trigger, cooldown_ms, interval_ms).await,
        Commands::Read { frame } => read(&vision, frame).await,
        Commands::Track {
            frames,
            db,
            settings,
        } => track(&vision, frames, db, settings).await,
        Commands::Sessions { db, limit, offset } => {
            let database = Database::open(db)?;
            for session in database.list_sessions_paginated(limit, offset).await? {
                println!("{}", serde_json::to_string(&session)?);
            }
            Ok(())
        }
        Commands::Reconciliations { session, db } => {
            let database = Database::open(db)?;
            for record in database.list_reconciliations(&session).await? {
                println!("{}", serde_json::to_string(&record)?);
            }
            Ok(())
        }
    }
}

async fn detect(frames: PathBuf, trigger: f64, cooldown_ms: u64, interval_ms: u64) -> Result<()> {
    let source = DirectoryFrameSource::open(&frames)?;
    let mut detector = ChangeDetector::new(trigger, Duration::from_millis(cooldown_ms));
    let origin = Instant::now();
    let mut candidates = 0;

    for index in 0..source.len() {
        let image = source.capture().await?;
        let at = origin + Duration::from_millis(interval_ms * index as u64);
        let verdict = detector.observe(image.reduce(), at);
        if verdict.is_candidate() {
            candidates += 1;
            println!("{index:>6}  {:>8}ms  {verdict:?}", interval_ms * index as u64);
        }
    }

    println!("{candidates} candidates in {} frames", source.len());
    Ok(())
}

struct VisionOptions {
    endpoint: Option<String>,
    model: Option<String>,
}

fn vision_reader(options: &VisionOptions) -> Result<VisionReader> {
    let mut reader =
        VisionReader::from_env().ok_or_else(|| anyhow!("OPENAI_API_KEY is not set"))?;
    if let Some(endpoint) = &options.endpoint {
        reader = reader.with_endpoint(endpoint.clone());
    }
    if let Some(model) = &options.model {
        reader = reader.with_model(model.clone());
    }
    Ok(reader)
}

async fn read(vision: &VisionOptions, frame: PathBuf) -> Result<()> {
    let bytes = std::fs::read(&frame)
        .with_context(|| format!("failed to read {}", frame.display()))?;
    let image = RoiImage::from_png(&bytes)?;
    let reading = vision_reader(vision)?.read(&image).await?;
    println!("{:.4}% ({:?})", reading.percent, reading.method);
    Ok(())
}

async fn track(
    vision: &VisionOptions,
    frames: PathBuf,
    db: PathBuf,
    settings: PathBuf,
) -> Result<()> {
    let source = Arc::new(DirectoryFrameSource::open(&frames)?);
    let settings = Arc::new(SettingsStore::new(settings)?);
    let config: TrackerConfig = settings.tracker();
    let run_for = config.sample_interval() * source.len() as u32;

    let controller = TrackerController::with_settings(
        settings,
        source,
        Arc::new(vision_reader(vision)?),
        Arc::new(Database::open(db)?),
    );
    let mut status = controller.subscribe();
    tokio::spawn(async move {
        loop {
            match status.recv().await {
                Ok(event) => println!(
                    "[{}] {:?}: {}",
                    event.at.format("%H:%M:%S"),
                    event.kind,
                    event.message
                ),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    println!("... {skipped} status events skipped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    controller.start().await?;
    tokio::time::sleep(run_for).await;

    let snapshot = controller.snapshot().await;
    controller.stop(StopReason::Paused).await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
