// External crates
use anyhow::{Context, Result};
use burn::backend::Autodiff;
use burn_ndarray::{NdArray, NdArrayDevice};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use ndarray::{arr2, Array3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

// Local modules
use dot_evasion::constants::{
    CONFIG_INPUT, DATA_PATH, HISTORY_INPUT, MODEL_PATH, NUM_FEATURES, PLACEHOLDER_PATH, VX_OUTPUT,
    VY_OUTPUT,
};
use dot_evasion::evasion::step_1_sequence_preparation::build_sequences;
use dot_evasion::evasion::step_4_train_model::{train_model, TrainingConfig, TrainingReport};
use dot_evasion::evasion::step_6_graph_export::{export_graph, ExportOptions};
use dot_evasion::graph::checker::check_runtime_contract;
use dot_evasion::graph::executor::GraphExecutor;
use dot_evasion::graph::placeholder::{placeholder_graph, PlaceholderKind};
use dot_evasion::graph::serialization::{load_graph, save_graph};
use dot_evasion::util::feature_scaler::ScalerPair;
use dot_evasion::util::file_utils::{load_session_events, write_atomic};

type TrainingBackend = Autodiff<NdArray<f32>>;

#[derive(Parser)]
#[command(name = "dot-evasion", version, about = "Train and export the dot evasion model")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train on recorded sessions and export the inference graph
    Train {
        /// Session events (.parquet or .csv)
        #[arg(long, default_value = DATA_PATH)]
        data: PathBuf,
        /// Destination of the exported graph
        #[arg(short, long, default_value = MODEL_PATH)]
        output: PathBuf,
        /// JSON training config; absent fields keep their defaults
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        epochs: Option<usize>,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        learning_rate: Option<f64>,
        #[arg(long)]
        seed: Option<u64>,
        /// Where to write scalers, config and loss history
        /// (default: next to the graph as `.meta.json`)
        #[arg(long)]
        metadata: Option<PathBuf>,
    },
    /// Write a stand-in graph with the same interface as a trained export
    Placeholder {
        #[arg(short, long, default_value = PLACEHOLDER_PATH)]
        output: PathBuf,
        #[arg(long, value_enum, default_value_t = PlaceholderChoice::WeightedSum)]
        kind: PlaceholderChoice,
        /// Fixed x velocity for `--kind constant`
        #[arg(long, default_value_t = 0.0)]
        vx: f32,
        /// Fixed y velocity for `--kind constant`
        #[arg(long, default_value_t = 0.0)]
        vy: f32,
    },
    /// Validate an .onnx file and run it on sample histories
    Inspect {
        #[arg(default_value = MODEL_PATH)]
        path: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PlaceholderChoice {
    Constant,
    WeightedSum,
}

/// Everything the runtime needs besides the graph itself
#[derive(Serialize)]
struct TrainingMetadata<'a> {
    version: &'a str,
    timestamp: String,
    graph: &'a Path,
    config: &'a TrainingConfig,
    scalers: &'a ScalerPair,
    report: &'a TrainingReport,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Train {
            data,
            output,
            config,
            epochs,
            batch_size,
            learning_rate,
            seed,
            metadata,
        } => {
            let mut training_config = match &config {
                Some(path) => TrainingConfig::from_file(path)?,
                None => TrainingConfig::default(),
            };
            if let Some(epochs) = epochs {
                training_config.epochs = epochs;
            }
            if let Some(batch_size) = batch_size {
                training_config.batch_size = batch_size;
            }
            if let Some(learning_rate) = learning_rate {
                training_config.learning_rate = learning_rate;
            }
            if let Some(seed) = seed {
                training_config.seed = seed;
            }
            let metadata = metadata.unwrap_or_else(|| output.with_extension("meta.json"));
            run_train(&data, &output, &metadata, &training_config)
        }
        Commands::Placeholder {
            output,
            kind,
            vx,
            vy,
        } => {
            let kind = match kind {
                PlaceholderChoice::Constant => PlaceholderKind::Constant { vx, vy },
                PlaceholderChoice::WeightedSum => PlaceholderKind::WeightedSum,
            };
            save_graph(&placeholder_graph(&kind), &output)
                .with_context(|| format!("Failed to write placeholder to {}", output.display()))?;
            info!("Placeholder {:?} written to {}", kind, output.display());
            Ok(())
        }
        Commands::Inspect { path } => run_inspect(&path),
    }
}

fn run_train(data: &Path, output: &Path, metadata: &Path, config: &TrainingConfig) -> Result<()> {
    let device = NdArrayDevice::default();
    let mut rng = StdRng::seed_from_u64(config.seed);
    info!("Using seed {}", config.seed);

    let events = load_session_events(data)?;
    let sequences = build_sequences(&events, &config.sequence, &mut rng)?;
    info!(
        "Built {} sequences of length {}",
        sequences.len(),
        sequences.sequence_length
    );

    let trained = train_model::<TrainingBackend, _>(&sequences, config, &mut rng, &device)?;

    export_graph(&trained.model, output, &ExportOptions::default())
        .with_context(|| format!("Failed to export graph to {}", output.display()))?;

    let meta = TrainingMetadata {
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().to_rfc3339(),
        graph: output,
        config,
        scalers: &trained.scalers,
        report: &trained.report,
    };
    let json = serde_json::to_vec_pretty(&meta).context("Failed to serialize metadata")?;
    write_atomic(metadata, &json)
        .with_context(|| format!("Failed to write metadata to {}", metadata.display()))?;

    info!("Model exported to {}", output.display());
    info!("Metadata written to {}", metadata.display());
    Ok(())
}

fn run_inspect(path: &Path) -> Result<()> {
    let model = load_graph(path).with_context(|| format!("Failed to load {}", path.display()))?;
    check_runtime_contract(&model)?;
    info!(
        "{} (IR {}, opset {}) by {} {}: {} nodes, {} initializers",
        model.graph.name,
        model.ir_version,
        model.opset_version().unwrap_or_default(),
        model.producer_name,
        model.producer_version,
        model.graph.nodes.len(),
        model.graph.initializers.len()
    );

    let executor = GraphExecutor::new(model)?;
    for seq_len in [1, 10, 50] {
        // Dot drifting right while the cursor sits still
        let history = Array3::from_shape_fn((1, seq_len, NUM_FEATURES), |(_, t, f)| match f {
            0 => 400.0 + t as f32,
            1 => 300.0,
            _ => 380.0,
        });
        let outputs = executor.run(&[
            (HISTORY_INPUT, history.into_dyn()),
            (CONFIG_INPUT, arr2(&[[1.0f32]]).into_dyn()),
        ])?;
        let vx = outputs.get(VX_OUTPUT).and_then(|a| a.iter().next().copied());
        let vy = outputs.get(VY_OUTPUT).and_then(|a| a.iter().next().copied());
        info!("seq_len {:>3}: targetVx={:?} targetVy={:?}", seq_len, vx, vy);
    }
    Ok(())
}
