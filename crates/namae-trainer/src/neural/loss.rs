//! Trainable CRF layer for the neural path.
//!
//! Holds the transition matrix and the boundary score vectors as candle
//! variables and computes the batched, masked negative log-likelihood.
//! Gradients flow through the forward recurrence by autodifferentiation;
//! the result matches the explicit forward-backward gradient of the
//! feature path on the same inputs.

use candle_core::{IndexOp, Tensor};
use candle_nn::VarBuilder;

use namae_core::TransitionMatrix;

use crate::error::Result;

/// Numerically stable `log(sum(exp(t)))` over one dimension.
fn logsumexp(t: &Tensor, dim: usize) -> candle_core::Result<Tensor> {
    let max = t.max_keepdim(dim)?;
    let sum = t.broadcast_sub(&max)?.exp()?.sum_keepdim(dim)?;
    sum.log()?.broadcast_add(&max)?.squeeze(dim)
}

/// CRF loss module with trainable transition parameters.
pub struct CrfLoss {
    transitions: Tensor,
    start: Tensor,
    end: Tensor,
    num_labels: usize,
}

impl CrfLoss {
    pub fn new(num_labels: usize, vb: VarBuilder) -> Result<Self> {
        let transitions = vb.get_with_hints(
            (num_labels, num_labels),
            "transitions",
            candle_nn::init::ZERO,
        )?;
        let start = vb.get_with_hints(num_labels, "start", candle_nn::init::ZERO)?;
        let end = vb.get_with_hints(num_labels, "end", candle_nn::init::ZERO)?;
        Ok(Self {
            transitions,
            start,
            end,
            num_labels,
        })
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    /// Export the learned transitions for the shared Viterbi decoder.
    pub fn transition_matrix(&self) -> Result<TransitionMatrix> {
        let trans: Vec<f64> = self
            .transitions
            .flatten_all()?
            .to_vec1::<f32>()?
            .into_iter()
            .map(f64::from)
            .collect();
        let start: Vec<f64> = self
            .start
            .to_vec1::<f32>()?
            .into_iter()
            .map(f64::from)
            .collect();
        let end: Vec<f64> = self
            .end
            .to_vec1::<f32>()?
            .into_iter()
            .map(f64::from)
            .collect();
        Ok(TransitionMatrix::from_parts(self.num_labels, trans, start, end)?)
    }

    /// Mean negative log-likelihood of a padded batch.
    ///
    /// * `emissions`: `[B, T, L]` logits.
    /// * `tags`: `[B, T]` gold label ids; padded positions must be
    ///   clamped into range (their contribution is masked away).
    /// * `valid`: `[B, T]` with `1.0` at valid and `0.0` at padded
    ///   positions. No score or gradient flows from padded positions: the
    ///   alpha recurrence carries the previous value through them.
    pub fn nll(&self, emissions: &Tensor, tags: &Tensor, valid: &Tensor) -> Result<Tensor> {
        let (batch, steps, num_labels) = emissions.dims3()?;
        debug_assert_eq!(num_labels, self.num_labels);

        // Gold path score: emissions at the gold labels...
        let gold_emit = emissions.gather(&tags.unsqueeze(2)?, 2)?.squeeze(2)?;
        let mut score = gold_emit.mul(valid)?.sum(1)?;

        // ...plus boundary scores...
        let first_tags = tags.i((.., 0))?.contiguous()?;
        score = score.add(&self.start.index_select(&first_tags, 0)?)?;
        let lengths = valid.sum(1)?.to_dtype(candle_core::DType::U32)?;
        let last_idx = lengths.broadcast_sub(&Tensor::new(1u32, tags.device())?)?;
        let last_tags = tags.gather(&last_idx.unsqueeze(1)?, 1)?.squeeze(1)?;
        score = score.add(&self.end.index_select(&last_tags, 0)?)?;

        // ...plus transitions between valid neighbors.
        if steps > 1 {
            let prev = tags.narrow(1, 0, steps - 1)?;
            let next = tags.narrow(1, 1, steps - 1)?;
            let stride = Tensor::new(self.num_labels as u32, tags.device())?;
            let flat_idx = prev.broadcast_mul(&stride)?.add(&next)?;
            let trans_sel = self
                .transitions
                .flatten_all()?
                .index_select(&flat_idx.flatten_all()?, 0)?
                .reshape((batch, steps - 1))?;
            let trans_valid = valid.narrow(1, 1, steps - 1)?;
            score = score.add(&trans_sel.mul(&trans_valid)?.sum(1)?)?;
        }

        // Partition function: masked forward recurrence in log space.
        let mut alpha = emissions
            .i((.., 0, ..))?
            .broadcast_add(&self.start.unsqueeze(0)?)?;
        for t in 1..steps {
            let emit_t = emissions.i((.., t, ..))?;
            let paths = alpha
                .unsqueeze(2)?
                .broadcast_add(&self.transitions.unsqueeze(0)?)?;
            let next = logsumexp(&paths, 1)?.add(&emit_t)?;
            let keep = valid.i((.., t))?.unsqueeze(1)?;
            let frozen = keep.affine(-1.0, 1.0)?;
            alpha = next
                .broadcast_mul(&keep)?
                .add(&alpha.broadcast_mul(&frozen)?)?;
        }
        let log_z = logsumexp(&alpha.broadcast_add(&self.end.unsqueeze(0)?)?, 1)?;

        Ok(log_z.sub(&score)?.mean_all()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;
    use namae_core::crf::{EmissionMatrix, Lattice};
    use namae_core::{Tag, TagSet};

    fn loss_layer(num_labels: usize) -> (CrfLoss, VarMap) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let crf = CrfLoss::new(num_labels, vb.pp("crf")).unwrap();
        (crf, varmap)
    }

    #[test]
    fn batched_nll_matches_the_core_lattice() {
        let device = Device::Cpu;
        let (crf, _varmap) = loss_layer(3);

        let rows = [
            vec![0.5f32, 1.5, -0.25],
            vec![-1.0, 0.75, 2.0],
            vec![0.0, 0.25, -0.5],
        ];
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        let emissions = Tensor::from_vec(flat, (1, 3, 3), &device).unwrap();
        let tags_t = Tensor::from_vec(vec![1u32, 2, 0], (1, 3), &device).unwrap();
        let valid = Tensor::from_vec(vec![1f32, 1.0, 1.0], (1, 3), &device).unwrap();

        let neural = crf
            .nll(&emissions, &tags_t, &valid)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap() as f64;

        let tagset = TagSet::new(["LOC"]).unwrap();
        let rows_f64: Vec<Vec<f64>> = rows
            .iter()
            .map(|r| r.iter().map(|&v| f64::from(v)).collect())
            .collect();
        let matrix = EmissionMatrix::from_rows(3, &rows_f64).unwrap();
        let trans = crf.transition_matrix().unwrap();
        let gold = [Tag::Begin(0), Tag::Inside(0), Tag::Outside];
        let reference = Lattice::new(3)
            .nll(&tagset, &matrix, &trans, &gold)
            .unwrap();

        assert!(
            (neural - reference).abs() < 1e-4,
            "neural {neural} vs lattice {reference}"
        );
    }

    #[test]
    fn padded_positions_do_not_change_the_loss() {
        let device = Device::Cpu;
        let (crf, _varmap) = loss_layer(2);

        // One real position, one padded; mutate the padded emission row
        // and the loss must not move.
        let a = Tensor::from_vec(vec![1.0f32, -0.5, 0.0, 0.0], (1, 2, 2), &device).unwrap();
        let b = Tensor::from_vec(vec![1.0f32, -0.5, 50.0, -3.0], (1, 2, 2), &device).unwrap();
        let tags = Tensor::from_vec(vec![0u32, 0], (1, 2), &device).unwrap();
        let valid = Tensor::from_vec(vec![1f32, 0.0], (1, 2), &device).unwrap();

        let la = crf.nll(&a, &tags, &valid).unwrap().to_scalar::<f32>().unwrap();
        let lb = crf.nll(&b, &tags, &valid).unwrap().to_scalar::<f32>().unwrap();
        assert!((la - lb).abs() < 1e-6, "{la} vs {lb}");
    }

    #[test]
    fn loss_is_non_negative() {
        let device = Device::Cpu;
        let (crf, _varmap) = loss_layer(2);
        let emissions =
            Tensor::from_vec(vec![2.0f32, -1.0, 0.5, 0.25], (1, 2, 2), &device).unwrap();
        let tags = Tensor::from_vec(vec![0u32, 1], (1, 2), &device).unwrap();
        let valid = Tensor::from_vec(vec![1f32, 1.0], (1, 2), &device).unwrap();
        let loss = crf.nll(&emissions, &tags, &valid).unwrap().to_scalar::<f32>().unwrap();
        assert!(loss >= 0.0, "loss {loss}");
    }
}
