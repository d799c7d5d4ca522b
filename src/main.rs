use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Parser, Subcommand};
use time::format_description::well_known::Rfc3339;
use tracing::warn;

use platewatch::core::db::{PlateDb, PlateRecord, PlateRepository};
use platewatch::session::{list_images, load_image};
use platewatch::{LprConfig, LprSession, OcrsBackend, PlatePipeline};

#[derive(Parser)]
#[command(name = "platewatch")]
#[command(about = "Detect, read and log license plates from images")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// SQLite database holding plate records
    #[arg(long, global = true, value_name = "FILE")]
    database: Option<PathBuf>,

    /// Camera location label stored with each record
    #[arg(long, global = true)]
    location: Option<String>,

    /// OpenCV Haar cascade used before falling back to contour detection
    #[arg(long, global = true, value_name = "XML")]
    cascade: Option<PathBuf>,

    /// Seconds before the same plate is reported again
    #[arg(long, global = true, value_name = "SECS")]
    cooldown: Option<u64>,

    /// Save plate crops to this directory and reference them in records
    #[arg(long, global = true, value_name = "DIR")]
    crops_dir: Option<PathBuf>,

    /// Save debug outputs to directory (must be empty)
    #[arg(long, global = true, value_name = "DIR")]
    debug_out: Option<PathBuf>,

    /// Print detections without writing them to the database
    #[arg(long, global = true)]
    no_store: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process a single image
    Image {
        #[arg(value_name = "IMAGE")]
        path: PathBuf,
    },
    /// Process every image in a folder
    Folder {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },
    /// Treat a folder of sequential frames as a live stream (Ctrl+C stops)
    Frames {
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        /// Process every Nth frame
        #[arg(long, value_name = "N")]
        sample_every: Option<u32>,

        /// Save every 100th frame with detected plates boxed to this directory
        #[arg(long, value_name = "DIR")]
        save_frames: Option<PathBuf>,
    },
    /// Show the most recent records
    Records {
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    /// Show all records of one plate
    Search {
        #[arg(value_name = "PLATE")]
        plate: String,
    },
    /// Show record statistics
    Stats,
    /// Delete a record
    Delete {
        #[arg(value_name = "ID")]
        id: i64,
    },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();
}

fn build_config(args: &Cli) -> anyhow::Result<LprConfig> {
    let mut config = match &args.config {
        Some(path) => LprConfig::load(path)?,
        None => LprConfig::default(),
    };
    if let Some(database) = &args.database {
        config.storage.database = database.clone();
    }
    if let Some(location) = &args.location {
        config.storage.camera_location = location.clone();
    }
    if let Some(cascade) = &args.cascade {
        config.detector.cascade_path = Some(cascade.clone());
    }
    if let Some(cooldown) = args.cooldown {
        config.dedup.cooldown_secs = cooldown;
    }
    if let Some(crops_dir) = &args.crops_dir {
        config.storage.crops_dir = Some(crops_dir.clone());
    }
    if let Command::Frames {
        sample_every,
        save_frames,
        ..
    } = &args.command
    {
        if let Some(n) = sample_every {
            config.stream.sample_every = *n;
        }
        if let Some(dir) = save_frames {
            config.stream.annotate_dir = Some(dir.clone());
        }
    }
    config.validate()?;
    Ok(config)
}

async fn build_session(args: &Cli, config: &LprConfig) -> anyhow::Result<LprSession<PlateDb>> {
    let backend = OcrsBackend::from_config(&config.ocr)?;
    let mut pipeline = PlatePipeline::from_config(config, Box::new(backend));
    if let Some(debug_dir) = &args.debug_out {
        pipeline = pipeline.with_debug(debug_dir.clone())?;
    }

    let store = if args.no_store {
        None
    } else {
        Some(PlateDb::open(&config.storage.database).await?)
    };
    Ok(LprSession::new(pipeline, store, config.storage.clone(), &config.stream))
}

fn print_record(record: &PlateRecord) {
    let timestamp = record
        .timestamp
        .format(&Rfc3339)
        .unwrap_or_else(|_| record.timestamp.to_string());
    println!(
        "ID: {} | Plate: {} | Time: {} | Location: {}",
        record.id,
        record.plate_number,
        timestamp,
        record.camera_location.as_deref().unwrap_or("-")
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    init_logging(args.verbose);
    let config = build_config(&args)?;

    match &args.command {
        Command::Image { path } => {
            if !path.exists() {
                anyhow::bail!("Image file {} not found", path.display());
            }
            let mut session = build_session(&args, &config).await?;
            let results = session.process_image_file(path).await;

            println!("\n=== License Plate Detection Results ===");
            if results.is_empty() {
                println!("No license plates detected");
            } else {
                println!("Detected {} license plate(s):", results.len());
                for r in &results {
                    let timestamp = r.timestamp.format(&Rfc3339)?;
                    println!(
                        "  - {} at {} (bbox {:?})",
                        r.plate_number,
                        timestamp,
                        r.bbox.as_tuple()
                    );
                }
            }
        }
        Command::Folder { dir } => {
            let mut session = build_session(&args, &config).await?;
            let total = session.process_folder(dir).await?;
            println!("Total plates detected: {total}");
        }
        Command::Frames { dir, .. } => {
            let mut session = build_session(&args, &config).await?;
            let files = list_images(dir)?;

            let stop = Arc::new(AtomicBool::new(false));
            let stop_flag = stop.clone();
            ctrlc::set_handler(move || {
                stop_flag.store(true, Ordering::SeqCst);
            })?;

            println!("Starting stream detection. Press Ctrl+C to stop.");
            let frames = files.into_iter().map(|path| match load_image(&path) {
                Ok(img) => Some(img),
                Err(e) => {
                    warn!("Could not read frame {}: {e:#}", path.display());
                    None
                }
            });
            let summary = session.process_frames(frames, &stop).await;
            if summary.cancelled {
                println!("\nOperation cancelled by user");
            }
            println!(
                "Frames: {} seen, {} processed, {} saved. Plates reported: {}",
                summary.frames_seen, summary.frames_processed, summary.frames_annotated, summary.plates_emitted
            );
        }
        Command::Records { limit } => {
            let db = PlateDb::open(&config.storage.database).await?;
            let records = db.recent_records(*limit).await?;
            if records.is_empty() {
                println!("No records found");
            } else {
                println!("\nRecent License Plate Records:");
                println!("{}", "-".repeat(80));
                records.iter().for_each(print_record);
            }
        }
        Command::Search { plate } => {
            let db = PlateDb::open(&config.storage.database).await?;
            let records = db.search_plate(plate).await?;
            if records.is_empty() {
                println!("No records found for {}", plate.to_uppercase());
            } else {
                records.iter().for_each(print_record);
            }
        }
        Command::Stats => {
            let db = PlateDb::open(&config.storage.database).await?;
            let unique = db.unique_plate_count().await?;
            println!("Unique plates: {unique}");
        }
        Command::Delete { id } => {
            let db = PlateDb::open(&config.storage.database).await?;
            if db.delete_record(*id).await? {
                println!("Deleted record {id}");
            } else {
                println!("No record found with ID: {id}");
            }
        }
    }

    Ok(())
}
