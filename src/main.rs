//! Chaos Image Pipeline - CLI
//!
//! Command-line interface for single-image and batch operations.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use chaos_image_pipeline::batch::{self, BatchSequencer};
use chaos_image_pipeline::layout::{self, StorageLayout};
use chaos_image_pipeline::{
    Channel, CryptoKey, CryptoJob, JobOutcome, OutputTarget, Pipeline, PipelineConfig,
    ThumbnailStage,
};

/// Config file name inside the storage root
const CONFIG_FILE: &str = "pipeline.json";

#[derive(Parser)]
#[command(name = "chaos-pipeline")]
#[command(author = "Karen Tonoyan")]
#[command(version = chaos_image_pipeline::VERSION)]
#[command(about = "Chaotic-map image encryption pipeline")]
struct Cli {
    /// Storage root
    #[arg(short, long, default_value = "./chaos-pipeline")]
    root: PathBuf,

    /// Config file (defaults to <root>/pipeline.json when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct KeyArgs {
    /// Initial condition, e.g. 0.7761e-1
    #[arg(long, requires = "mu")]
    x0: Option<String>,

    /// Map parameter in [3.57, 4.0)
    #[arg(long, requires = "x0")]
    mu: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the storage layout and a default config
    Init,

    /// Generate a fresh key
    Keygen {
        /// Decimal digits per parameter
        #[arg(short, long)]
        precision: Option<usize>,
    },

    /// Encrypt one image
    Encrypt {
        source: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        key: KeyArgs,
    },

    /// Decrypt one image
    Decrypt {
        source: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        key: KeyArgs,
    },

    /// Split one image into three encrypted channel images
    EncryptEtc {
        source: String,
        /// Directory for the channel images (defaults to encrypted-output)
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
        #[arg(short, long)]
        quality: Option<u8>,
        #[command(flatten)]
        key: KeyArgs,
    },

    /// Merge a channel triple given its red member
    DecryptEtc {
        red: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        key: KeyArgs,
    },

    /// Etc-encrypt every original
    BatchEncryptEtc {
        /// Source directory (defaults to originals)
        #[arg(short, long)]
        dir: Option<PathBuf>,
        /// Write a JSON report
        #[arg(long)]
        report: Option<PathBuf>,
        #[command(flatten)]
        key: KeyArgs,
    },

    /// Merge every complete channel triple in a directory
    BatchDecryptEtc {
        /// Directory holding the triples (defaults to encrypted-gp-compressed)
        #[arg(short, long)]
        dir: Option<PathBuf>,
        #[arg(long)]
        report: Option<PathBuf>,
        #[command(flatten)]
        key: KeyArgs,
    },

    /// Downscale large originals into resized-thumbnails
    Thumbnails {
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let path = cli.config.clone().unwrap_or_else(|| cli.root.join(CONFIG_FILE));
    let mut config = if path.exists() {
        PipelineConfig::load(&path).with_context(|| format!("loading {}", path.display()))?
    } else if cli.config.is_some() {
        bail!("config file {} not found", path.display());
    } else {
        PipelineConfig::default()
    };
    config.root = cli.root.clone();
    Ok(config)
}

fn resolve_key(args: &KeyArgs, config: &PipelineConfig) -> Result<CryptoKey> {
    let key = match (&args.x0, &args.mu) {
        (Some(x0), Some(mu)) => CryptoKey::build(x0, mu)?,
        _ => config.batch_key()?,
    };
    log::info!("Using key {}", key.fingerprint());
    Ok(key)
}

fn print_outcome(outcome: &JobOutcome) -> Result<()> {
    match outcome {
        JobOutcome::Completed { outputs, sizes } => {
            println!("✅ Done ({} -> {} bytes)", sizes.original_bytes, sizes.output_bytes);
            for path in outputs {
                println!("   {}", path.display());
            }
        }
        JobOutcome::AlreadyProduced { outputs } => {
            println!("⏭  Already produced: {}", outputs[0].display());
        }
        JobOutcome::Skipped { reason } => println!("⏭  Skipped: {}", reason),
        JobOutcome::Failed { kind, reason } => bail!("{}: {}", kind, reason),
    }
    Ok(())
}

fn print_report(report: &batch::BatchReport, save_to: Option<&Path>) -> Result<()> {
    println!("📊 Batch report");
    println!("{:-<40}", "");
    println!("Total:             {}", report.total);
    println!("Succeeded:         {}", report.succeeded);
    println!("Already produced:  {}", report.already_produced);
    println!("Skipped:           {}", report.skipped);
    println!("Failed:            {}", report.failed);

    if let Some(path) = save_to {
        report.save(path)?;
        println!("Report written to {}", path.display());
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let pipeline = Pipeline::from_config(&config);
    let storage = config.layout();

    match cli.command {
        Commands::Init => {
            let storage = StorageLayout::create(&config.root)?;
            let config_path = storage.root().join(CONFIG_FILE);
            if !config_path.exists() {
                config.save(&config_path)?;
            }
            println!("✅ Storage ready at {}", storage.root().display());
            for dir in storage.directories() {
                println!("   {}", dir.display());
            }
        }

        Commands::Keygen { precision } => {
            let digits = precision.unwrap_or(config.key_precision);
            let key = CryptoKey::generate(digits, digits)?;
            println!("x0 = {}", key.x0());
            println!("mu = {}", key.mu());
            println!("fingerprint = {}", key.fingerprint());
        }

        Commands::Encrypt { source, output, key } => {
            let key = resolve_key(&key, &config)?;
            let mut job = CryptoJob::encrypt(source, key);
            if let Some(output) = output {
                job = job.with_output(OutputTarget::Single(output));
            }
            print_outcome(&pipeline.run_job(job).await)?;
        }

        Commands::Decrypt { source, output, key } => {
            let key = resolve_key(&key, &config)?;
            let mut job = CryptoJob::decrypt(source, key);
            if let Some(output) = output {
                job = job.with_output(OutputTarget::Single(output));
            }
            print_outcome(&pipeline.run_job(job).await)?;
        }

        Commands::EncryptEtc {
            source,
            out_dir,
            quality,
            key,
        } => {
            let key = resolve_key(&key, &config)?;
            let out_dir = out_dir.unwrap_or_else(|| storage.encrypted());
            let name = chaos_image_pipeline::fetch::SourceUri::parse(&source)?.file_name();
            let outputs = layout::etc_channel_names(&name).map(|n| out_dir.join(n));
            let job = CryptoJob::encrypt_etc(source, key, quality.unwrap_or(config.etc_quality))
                .with_output(OutputTarget::Triple(outputs));
            print_outcome(&pipeline.run_job(job).await)?;
        }

        Commands::DecryptEtc { red, output, key } => {
            let key = resolve_key(&key, &config)?;
            let red_name = layout::file_name(&red);
            let sibling = |channel: Channel| -> Result<String> {
                let name = layout::etc_sibling_name(&red_name, channel)
                    .with_context(|| format!("{} is not a red channel image", red.display()))?;
                Ok(red.with_file_name(name).to_string_lossy().into_owned())
            };
            let job = CryptoJob::decrypt_etc(
                red.to_string_lossy().into_owned(),
                sibling(Channel::Green)?,
                sibling(Channel::Blue)?,
                key,
            )
            .with_output(OutputTarget::Single(
                output.unwrap_or_else(|| layout::etc_decrypted_path(&red)),
            ));
            print_outcome(&pipeline.run_job(job).await)?;
        }

        Commands::BatchEncryptEtc { dir, report, key } => {
            let key = resolve_key(&key, &config)?;
            let dir = dir.unwrap_or_else(|| storage.originals());
            let files = batch::list_images(&dir)?;
            let jobs = batch::plan_encrypt_etc(&files, &storage.encrypted(), &key, config.etc_quality);

            let mut sequencer = BatchSequencer::new(pipeline);
            if config.thumbnails_enabled {
                sequencer = sequencer.with_thumbnails(
                    ThumbnailStage::new(config.thumbnail_box, config.thumbnail_quality),
                    storage.thumbnails(),
                );
            }
            let result = sequencer.run(jobs).await?;
            print_report(&result, report.as_deref())?;
        }

        Commands::BatchDecryptEtc { dir, report, key } => {
            let key = resolve_key(&key, &config)?;
            let dir = dir.unwrap_or_else(|| storage.compressed());
            let files = batch::list_images(&dir)?;
            let jobs = batch::plan_decrypt_etc(&files, &key);

            let result = BatchSequencer::new(pipeline).run(jobs).await?;
            print_report(&result, report.as_deref())?;
        }

        Commands::Thumbnails { dir } => {
            let stage = ThumbnailStage::new(config.thumbnail_box, config.thumbnail_quality);
            let dir = dir.unwrap_or_else(|| storage.originals());
            let target = storage.thumbnails();
            let mut shrunk = 0usize;
            for file in batch::list_images(&dir)? {
                match stage.prepare(&file, &target).await {
                    Ok(path) if path != file => shrunk += 1,
                    Ok(_) => {}
                    Err(e) => log::warn!("Thumbnail failed for {}: {}", file.display(), e),
                }
            }
            println!("✅ {} thumbnail(s) in {}", shrunk, target.display());
        }
    }

    Ok(())
}
