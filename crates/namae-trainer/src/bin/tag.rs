//! Tag an IOB2 file with a trained CRF model, printing `token label`
//! pairs in original order, one sentence per blank-line-separated block.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;
use rayon::prelude::*;

use namae_core::FeatureCheckpoint;
use namae_trainer::{load_iob2, write_predictions};

#[derive(Parser, Debug)]
#[command(version, about = "Predict NER tags with a trained CRF model.")]
struct Args {
    /// IOB2 input file
    dataset: PathBuf,

    /// Model file
    #[arg(short, long, default_value = "crf.model.json")]
    model: PathBuf,

    /// Skip malformed sentences instead of failing
    #[arg(long)]
    lenient: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();

    let model = FeatureCheckpoint::load(&args.model)
        .and_then(FeatureCheckpoint::into_model)
        .with_context(|| format!("loading model {}", args.model.display()))?;

    let sentences = load_iob2(&args.dataset, model.tags(), args.lenient)
        .with_context(|| format!("loading {}", args.dataset.display()))?;

    if model.config().with_pos
        && sentences
            .iter()
            .any(|s| s.tokens().iter().any(|t| t.pos.is_none()))
    {
        bail!("model was trained with POS features but the input has no POS field");
    }

    // Sequences decode independently; only the frozen model is shared.
    let predictions: Vec<Vec<String>> = sentences
        .par_iter()
        .map(|s| model.tag_names(s))
        .collect::<namae_core::Result<_>>()
        .context("decoding failed")?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    write_predictions(&mut out, &sentences, &predictions)?;
    out.flush()?;
    Ok(())
}
