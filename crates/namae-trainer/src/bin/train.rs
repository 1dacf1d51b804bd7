//! Train a feature CRF for NER from an IOB2 dataset.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use namae_core::{CrfConfig, FeatureCheckpoint, TagSet};
use namae_trainer::{FeatureTrainer, load_iob2};

#[derive(Parser, Debug)]
#[command(version, about = "Train a CRF model for NER from IOB2 datasets.")]
struct Args {
    /// IOB2 dataset file
    dataset: PathBuf,

    /// Model output file
    #[arg(short, long, default_value = "crf.model.json")]
    output: PathBuf,

    /// Use POS tags as features (dataset must carry a POS field)
    #[arg(short = 'p', long)]
    with_pos: bool,

    /// L1 regularization coefficient
    #[arg(long, default_value_t = 0.1)]
    c1: f64,

    /// L2 regularization coefficient
    #[arg(long, default_value_t = 0.1)]
    c2: f64,

    /// Optimizer iteration cap
    #[arg(long, default_value_t = 100)]
    max_iterations: usize,

    /// Skip malformed sentences instead of failing
    #[arg(long)]
    lenient: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    let tags = TagSet::conll();
    let config = CrfConfig {
        with_pos: args.with_pos,
        c1: args.c1,
        c2: args.c2,
        max_iterations: args.max_iterations,
        ..Default::default()
    };

    let sentences = load_iob2(&args.dataset, &tags, args.lenient)
        .with_context(|| format!("loading {}", args.dataset.display()))?;
    info!(
        sentences = sentences.len(),
        tokens = sentences.iter().map(|s| s.len()).sum::<usize>(),
        "loaded dataset"
    );

    let model = FeatureTrainer::new(tags, config)
        .train(&sentences)
        .context("training failed")?;

    FeatureCheckpoint::from_model(&model)
        .save(&args.output)
        .with_context(|| format!("writing {}", args.output.display()))?;

    Ok(())
}
