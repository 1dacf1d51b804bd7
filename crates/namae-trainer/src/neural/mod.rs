//! Neural emission path: batched CRF training over encoder logits.
//!
//! The sequence encoder itself (BLSTM, transformer, ...) is an external
//! collaborator: it registers its variables in the shared [`VarMap`] and
//! produces `[B, T, L]` emission logits per batch through
//! [`SequenceEncoder`]. Everything downstream of the logits lives here:
//! the trainable CRF loss, the epoch loop, decoding, and checkpointing.

pub mod loss;

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use candle_core::{DType, Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use tracing::info;

use namae_core::checkpoint::NeuralManifest;
use namae_core::{CrfConfig, EmissionMatrix, NamaeError, Tag, TagSet, ViterbiDecoder};

use crate::batch::Batch;
use crate::error::Result;
use crate::vocab::Vocab;

pub use loss::CrfLoss;

/// Fixed shuffle seed, so training runs are reproducible.
const SHUFFLE_SEED: u64 = 1234;

/// A batch converted to device tensors.
pub struct BatchTensors {
    /// `[B, T]` word ids.
    pub words: Tensor,
    /// `[B, T, W]` character ids.
    pub chars: Tensor,
    /// `[B, T]` gold label ids, with padded positions clamped to 0 so
    /// gathers stay in range; the mask removes their contribution.
    pub labels: Tensor,
    /// `[B, T]` with `1.0` at valid and `0.0` at padded positions.
    pub valid: Tensor,
}

impl BatchTensors {
    pub fn new(batch: &Batch, num_labels: usize, device: &Device) -> Result<Self> {
        let (b, t) = (batch.size(), batch.max_len());
        let w = batch
            .chars
            .first()
            .and_then(|rows| rows.first())
            .map(Vec::len)
            .unwrap_or(0);

        let words: Vec<u32> = batch.words.iter().flatten().copied().collect();
        let chars: Vec<u32> = batch.chars.iter().flatten().flatten().copied().collect();
        let labels: Vec<u32> = batch
            .labels
            .iter()
            .flatten()
            .map(|&id| if (id as usize) < num_labels { id } else { 0 })
            .collect();
        let valid: Vec<f32> = batch
            .mask
            .iter()
            .flatten()
            .map(|&padded| if padded { 0.0 } else { 1.0 })
            .collect();

        Ok(Self {
            words: Tensor::from_vec(words, (b, t), device)?,
            chars: Tensor::from_vec(chars, (b, t, w), device)?,
            labels: Tensor::from_vec(labels, (b, t), device)?,
            valid: Tensor::from_vec(valid, (b, t), device)?,
        })
    }
}

/// The external sequence encoder: turns a batch into emission logits.
pub trait SequenceEncoder {
    /// Produce `[B, T, L]` emission scores for a batch.
    fn emissions(&self, batch: &BatchTensors) -> candle_core::Result<Tensor>;
}

/// Trainer for the neural CRF: encoder logits + trainable CRF layer.
pub struct NeuralTrainer<E> {
    encoder: E,
    crf: CrfLoss,
    varmap: VarMap,
    tags: TagSet,
    config: CrfConfig,
    device: Device,
}

impl<E: SequenceEncoder> NeuralTrainer<E> {
    /// Wrap an encoder whose variables live in `varmap`; the CRF layer
    /// registers its own variables under the `crf` prefix.
    pub fn new(
        encoder: E,
        varmap: VarMap,
        tags: TagSet,
        config: CrfConfig,
        device: Device,
    ) -> Result<Self> {
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let crf = CrfLoss::new(tags.len(), vb.pp("crf"))?;
        Ok(Self {
            encoder,
            crf,
            varmap,
            tags,
            config,
            device,
        })
    }

    pub fn crf(&self) -> &CrfLoss {
        &self.crf
    }

    /// Run a fixed number of epochs over shuffled batches, one AdamW step
    /// per batch. Returns the mean loss of each completed epoch.
    ///
    /// Setting `stop` aborts between batches; the last checkpoint on disk
    /// is never touched by an aborted run.
    pub fn train(
        &mut self,
        batches: &[Batch],
        epochs: usize,
        lr: f64,
        stop: Option<&AtomicBool>,
    ) -> Result<Vec<f64>> {
        let mut optimizer = AdamW::new(
            self.varmap.all_vars(),
            ParamsAdamW {
                lr,
                ..Default::default()
            },
        )?;
        let mut rng = oorandom::Rand32::new(SHUFFLE_SEED);
        let mut order: Vec<usize> = (0..batches.len()).collect();
        let mut losses = Vec::with_capacity(epochs);

        for epoch in 0..epochs {
            for i in (1..order.len()).rev() {
                let j = rng.rand_range(0..(i as u32 + 1)) as usize;
                order.swap(i, j);
            }

            let mut total = 0.0;
            for &i in &order {
                if stop.is_some_and(|s| s.load(Ordering::Relaxed)) {
                    info!(epoch, "training aborted between batches");
                    return Ok(losses);
                }
                let tensors = BatchTensors::new(&batches[i], self.tags.len(), &self.device)?;
                let emissions = self.encoder.emissions(&tensors)?;
                let loss = self.crf.nll(&emissions, &tensors.labels, &tensors.valid)?;
                optimizer.backward_step(&loss)?;
                total += f64::from(loss.to_scalar::<f32>()?);
            }
            let mean = total / batches.len().max(1) as f64;
            info!(epoch = epoch + 1, epochs, loss = mean, "epoch complete");
            losses.push(mean);
        }
        Ok(losses)
    }

    /// Decode a batch with the shared Viterbi decoder and restore the
    /// original sequence order.
    pub fn predict(&self, batch: &Batch) -> Result<Vec<Vec<Tag>>> {
        let tensors = BatchTensors::new(batch, self.tags.len(), &self.device)?;
        let emissions = self.encoder.emissions(&tensors)?;
        let scores = emissions.to_vec3::<f32>()?;

        let trans = self.crf.transition_matrix()?;
        let decoder = ViterbiDecoder::new(self.tags.len());

        let mut decoded = Vec::with_capacity(batch.size());
        for (rows, &len) in scores.iter().zip(&batch.lengths) {
            let rows_f64: Vec<Vec<f64>> = rows[..len]
                .iter()
                .map(|r| r.iter().map(|&v| f64::from(v)).collect())
                .collect();
            let matrix = EmissionMatrix::from_rows(self.tags.len(), &rows_f64)?;
            let path = decoder.decode(&matrix, &trans)?;
            let tags: Vec<Tag> = path
                .iter()
                .map(|&l| {
                    self.tags.tag(l).ok_or_else(|| {
                        NamaeError::Numeric(format!("decoded label index {l} out of range"))
                    })
                })
                .collect::<namae_core::Result<_>>()?;
            decoded.push(tags);
        }
        Ok(batch.unsort(&decoded))
    }

    /// Persist the full artifact set: safetensors weights, the versioned
    /// manifest, and both vocabularies. All writes are atomic.
    pub fn save(&self, dir: impl AsRef<Path>, vocab: &Vocab, char_vocab: &Vocab) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let weights = dir.join("model.safetensors");
        let tmp = dir.join("model.safetensors.tmp");
        self.varmap.save(&tmp)?;
        fs::rename(&tmp, &weights)?;

        NeuralManifest::new(
            self.tags.clone(),
            vocab.len(),
            char_vocab.len(),
            self.config.clone(),
        )
        .save(dir.join("manifest.json"))?;
        vocab.save(dir.join("vocab.json"))?;
        char_vocab.save(dir.join("vocab_char.json"))?;
        info!(dir = %dir.display(), "wrote neural checkpoint");
        Ok(())
    }

    /// Load previously saved weights into the encoder and CRF variables.
    pub fn load_weights(&mut self, dir: impl AsRef<Path>) -> Result<()> {
        self.varmap.load(dir.as_ref().join("model.safetensors"))?;
        Ok(())
    }
}

/// Read a neural checkpoint's manifest and vocabularies, failing fatally
/// when the recorded sizes do not match the vocabulary files.
pub fn load_artifacts(dir: impl AsRef<Path>) -> Result<(NeuralManifest, Vocab, Vocab)> {
    let dir = dir.as_ref();
    let manifest = NeuralManifest::load(dir.join("manifest.json"))?;
    let vocab = Vocab::load(dir.join("vocab.json"))?;
    let char_vocab = Vocab::load(dir.join("vocab_char.json"))?;
    manifest.validate(vocab.len(), char_vocab.len())?;
    Ok((manifest, vocab, char_vocab))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{Batcher, Example};
    use crate::data::load_iob2;
    use candle_nn::Embedding;
    use candle_nn::Module;
    use std::io::Write as _;

    /// Minimal stand-in encoder: one logit row per word id.
    struct LookupEncoder {
        table: Embedding,
    }

    impl LookupEncoder {
        fn new(vocab_size: usize, num_labels: usize, vb: VarBuilder) -> candle_core::Result<Self> {
            let weights = vb.get_with_hints(
                (vocab_size, num_labels),
                "weight",
                candle_nn::init::ZERO,
            )?;
            Ok(Self {
                table: Embedding::new(weights, num_labels),
            })
        }
    }

    impl SequenceEncoder for LookupEncoder {
        fn emissions(&self, batch: &BatchTensors) -> candle_core::Result<Tensor> {
            self.table.forward(&batch.words)
        }
    }

    fn dataset(tags: &TagSet) -> (Vec<Example>, Vocab, Vocab) {
        let content = "John B-PER\nSmith I-PER\nvisited O\nMadrid B-LOC\ntoday O\n\n\
                       Madrid B-LOC\nwins O\n\n\
                       the O\nEU B-ORG\nsaid O\n";
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        let sentences = load_iob2(file.path(), tags, false).unwrap();

        let vocab = Vocab::build(&sentences, false, 1);
        let char_vocab = Vocab::build_chars(&sentences, 1);
        let examples: Vec<Example> = sentences
            .iter()
            .map(|s| Example::encode(s, &vocab, &char_vocab, tags, false).unwrap())
            .collect();
        (examples, vocab, char_vocab)
    }

    fn build_trainer(
        tags: &TagSet,
        vocab: &Vocab,
    ) -> NeuralTrainer<LookupEncoder> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let encoder = LookupEncoder::new(vocab.len(), tags.len(), vb.pp("encoder")).unwrap();
        NeuralTrainer::new(encoder, varmap, tags.clone(), CrfConfig::default(), device).unwrap()
    }

    #[test]
    fn lookup_encoder_fits_the_training_set() {
        let tags = TagSet::conll();
        let (examples, vocab, _chars) = dataset(&tags);
        let batcher = Batcher::new(2, tags.len()).unwrap();
        let batches = batcher.batches(&examples);

        let mut trainer = build_trainer(&tags, &vocab);
        let losses = trainer.train(&batches, 60, 0.1, None).unwrap();
        assert!(losses.last().unwrap() < &losses[0]);

        for batch in &batches {
            let decoded = trainer.predict(batch).unwrap();
            let expected = batch.unsort(
                &batch
                    .labels
                    .iter()
                    .zip(&batch.lengths)
                    .map(|(row, &len)| {
                        row[..len]
                            .iter()
                            .map(|&id| tags.tag(id as usize).unwrap())
                            .collect::<Vec<_>>()
                    })
                    .collect::<Vec<_>>(),
            );
            assert_eq!(decoded, expected);
        }
    }

    #[test]
    fn padded_content_does_not_change_predictions() {
        let tags = TagSet::conll();
        let (examples, vocab, _chars) = dataset(&tags);
        let batcher = Batcher::new(3, tags.len()).unwrap();
        let mut batches = batcher.batches(&examples);

        let mut trainer = build_trainer(&tags, &vocab);
        trainer.train(&batches, 30, 0.1, None).unwrap();
        let before = trainer.predict(&batches[0]).unwrap();

        // Scribble over every padded word id; decoded output must not move.
        let batch = &mut batches[0];
        for (row, mask_row) in batch.words.iter_mut().zip(batch.mask.clone()) {
            for (id, padded) in row.iter_mut().zip(mask_row) {
                if padded {
                    *id = 3;
                }
            }
        }
        assert_eq!(trainer.predict(&batches[0]).unwrap(), before);
    }

    #[test]
    fn stop_flag_aborts_between_batches() {
        let tags = TagSet::conll();
        let (examples, vocab, _chars) = dataset(&tags);
        let batcher = Batcher::new(2, tags.len()).unwrap();
        let batches = batcher.batches(&examples);

        let mut trainer = build_trainer(&tags, &vocab);
        let stop = AtomicBool::new(true);
        let losses = trainer.train(&batches, 10, 0.1, Some(&stop)).unwrap();
        assert!(losses.is_empty());
    }

    #[test]
    fn checkpoint_roundtrip_restores_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let tags = TagSet::conll();
        let (examples, vocab, char_vocab) = dataset(&tags);
        let batcher = Batcher::new(2, tags.len()).unwrap();
        let batches = batcher.batches(&examples);

        let mut trainer = build_trainer(&tags, &vocab);
        trainer.train(&batches, 60, 0.1, None).unwrap();
        let before = trainer.predict(&batches[0]).unwrap();
        trainer.save(dir.path(), &vocab, &char_vocab).unwrap();

        let (manifest, loaded_vocab, loaded_chars) = load_artifacts(dir.path()).unwrap();
        assert_eq!(manifest.vocab_size, vocab.len());
        assert_eq!(loaded_chars.len(), char_vocab.len());

        let mut restored = build_trainer(&manifest.tags, &loaded_vocab);
        restored.load_weights(dir.path()).unwrap();
        assert_eq!(restored.predict(&batches[0]).unwrap(), before);
    }

    #[test]
    fn size_mismatch_between_manifest_and_vocab_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let tags = TagSet::conll();
        let (examples, vocab, char_vocab) = dataset(&tags);
        let batcher = Batcher::new(2, tags.len()).unwrap();
        let batches = batcher.batches(&examples);

        let mut trainer = build_trainer(&tags, &vocab);
        trainer.train(&batches, 2, 0.1, None).unwrap();
        trainer.save(dir.path(), &vocab, &char_vocab).unwrap();

        // Overwrite the vocabulary with a smaller one.
        let tiny = Vocab::build(&[], false, 1);
        tiny.save(dir.path().join("vocab.json")).unwrap();

        let err = load_artifacts(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            crate::error::TrainError::Core(NamaeError::Config(_))
        ));
    }
}
