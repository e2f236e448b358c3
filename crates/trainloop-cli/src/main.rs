//! trainloop CLI
//!
//! Command-line interface for running a demo training job with checkpoints
//! and dumps, and for inspecting the files they produce.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use trainloop::prelude::*;

mod regression;

use regression::{linear_model, synthetic_dataset, Sgd};

#[derive(Parser)]
#[command(name = "tloop")]
#[command(version, about = "trainloop - Resumable training main loop", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train the linear regression demo
    Train {
        /// JSON run configuration; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,

        /// Stop after this many epochs
        #[arg(long)]
        epochs: Option<u64>,

        /// Stop after this many batches
        #[arg(long)]
        batches: Option<u64>,

        /// Write a checkpoint to this file after training
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Also checkpoint after every N epochs
        #[arg(long)]
        checkpoint_every: Option<u64>,

        /// Save a main loop attribute (log, model, iteration_state,
        /// algorithm) to its own file next to the checkpoint
        #[arg(long = "save-separately")]
        save_separately: Vec<String>,

        /// Dump the state into this folder after training, loading it first
        /// if it exists
        #[arg(long)]
        dump: Option<PathBuf>,

        /// Resume from a checkpoint file
        #[arg(long)]
        resume: Option<PathBuf>,

        #[arg(long)]
        batch_size: Option<usize>,

        #[arg(long)]
        learning_rate: Option<f64>,

        #[arg(long)]
        seed: Option<u64>,

        /// Number of generated examples
        #[arg(long, default_value = "256")]
        examples: usize,

        /// Number of input features
        #[arg(long, default_value = "4")]
        features: usize,

        /// Do not report progress every epoch
        #[arg(long)]
        quiet: bool,
    },

    /// Show what a checkpoint file or dump folder contains
    Inspect {
        /// Checkpoint file or dump folder
        path: PathBuf,

        /// Print the training status as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            config,
            epochs,
            batches,
            checkpoint,
            checkpoint_every,
            save_separately,
            dump,
            resume,
            batch_size,
            learning_rate,
            seed,
            examples,
            features,
            quiet,
        } => {
            let mut run_config = match config {
                Some(path) => RunConfig::from_path(&path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?,
                None => RunConfig::default(),
            };

            if epochs.is_some() || batches.is_some() {
                run_config.finish_after.epochs = epochs;
                run_config.finish_after.batches = batches;
            }
            if let Some(path) = checkpoint {
                run_config = run_config.with_checkpoint(path);
            }
            if let Some(checkpoint) = run_config.checkpoint.as_mut() {
                if checkpoint_every.is_some() {
                    checkpoint.every_n_epochs = checkpoint_every;
                }
                checkpoint.save_separately.extend(save_separately);
            } else if !save_separately.is_empty() || checkpoint_every.is_some() {
                anyhow::bail!("--save-separately and --checkpoint-every need --checkpoint");
            }
            if let Some(folder) = dump {
                run_config = run_config.with_dump(folder);
            }
            if let Some(batch_size) = batch_size {
                run_config = run_config.with_batch_size(batch_size);
            }
            if let Some(lr) = learning_rate {
                run_config = run_config.with_lr(lr);
            }
            if let Some(seed) = seed {
                run_config = run_config.with_seed(seed);
            }
            if quiet {
                run_config = run_config.with_printing(false);
            }

            train(&run_config, examples, features, resume.as_deref())?;
        }
        Commands::Inspect { path, json } => {
            inspect(&path, json)?;
        }
    }

    Ok(())
}

fn train(
    config: &RunConfig,
    examples: usize,
    features: usize,
    resume: Option<&Path>,
) -> Result<()> {
    tracing::info!(
        examples,
        features,
        batch_size = config.batch_size,
        lr = config.learning_rate,
        seed = config.seed,
        "Starting training"
    );

    let extensions = config.build_extensions()?;
    let sources = synthetic_dataset(examples, features, config.seed);
    let stream = InMemoryStream::new(sources, config.batch_size)?.shuffled(config.seed);
    let mut main_loop =
        MainLoop::new(linear_model(features), Sgd::new(config.learning_rate), stream)
            .with_extensions(extensions);

    if let Some(path) = resume {
        main_loop
            .resume_from_checkpoint(path)
            .with_context(|| format!("Failed to resume from {}", path.display()))?;
    }

    main_loop.run()?;

    let log = main_loop.log();
    let loss = log.current_row().get("loss").and_then(LogValue::as_f64);
    tracing::info!(
        iterations = log.status.iterations_done,
        epochs = log.status.epochs_done,
        loss = ?loss,
        "Training complete"
    );
    Ok(())
}

fn inspect(path: &Path, json: bool) -> Result<()> {
    let (kind, version, parameters, log) = if path.is_dir() {
        let dump = MainLoopDumpManager::new(path)
            .load()
            .with_context(|| format!("Failed to load dump {}", path.display()))?;
        ("Dump", None, dump.parameters, dump.log)
    } else {
        let snapshot = MainLoopSnapshot::load(path)
            .with_context(|| format!("Failed to load checkpoint {}", path.display()))?;
        (
            "Checkpoint",
            Some(snapshot.version),
            snapshot.parameters,
            snapshot.log,
        )
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&log.status)?);
        return Ok(());
    }

    match version {
        Some(version) => println!("{}: {} (trainloop {})", kind, path.display(), version),
        None => println!("{}: {}", kind, path.display()),
    }
    print_status(&log);
    print_parameters(&parameters);
    if let Some(row) = log.row(log.status.iterations_done) {
        println!("Last row (iteration {}):", log.status.iterations_done);
        print_row(row);
    }
    Ok(())
}

fn print_status(log: &TrainingLog) {
    let status = &log.status;
    println!("Iterations done: {}", status.iterations_done);
    println!("Epochs done: {}", status.epochs_done);
    println!("Epoch in progress: {}", status.epoch_started);
    if let Some(source) = &status.resumed_from {
        println!("Resumed from: {}", source.display());
    }
}

fn print_parameters(parameters: &Parameters) {
    println!("Parameters:");
    for (name, value) in parameters {
        println!("  {:<12} {:?}", name, value.shape());
    }
}

fn print_row(row: &LogRow) {
    for (key, value) in row.iter() {
        println!("  {} = {}", key, value);
    }
}
