//! Forward-backward algorithm for linear-chain CRFs, in log space.
//!
//! The lattice owns reusable `alpha`/`beta` tables (flat, resized on
//! demand) and computes the log partition function, the gold-path score,
//! state marginals and expected transition counts. All sums over label
//! paths go through log-sum-exp with the running maximum subtracted; a
//! non-finite partition function is an invariant violation and aborts the
//! computation.

use crate::crf::emission::EmissionMatrix;
use crate::crf::transitions::TransitionMatrix;
use crate::error::{NamaeError, Result};
use crate::tags::{Tag, TagSet};

/// Numerically stable `log(sum(exp(values)))`.
fn logsumexp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = values.iter().map(|&v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Reusable forward-backward workspace for one label alphabet size.
#[derive(Debug, Clone)]
pub struct Lattice {
    num_labels: usize,
    /// Positions currently allocated in `alpha`/`beta`.
    cap: usize,
    /// Length of the sequence of the last `run`.
    len: usize,
    alpha: Vec<f64>,
    beta: Vec<f64>,
    scratch: Vec<f64>,
    log_z: f64,
}

impl Lattice {
    pub fn new(num_labels: usize) -> Self {
        Self {
            num_labels,
            cap: 0,
            len: 0,
            alpha: Vec::new(),
            beta: Vec::new(),
            scratch: vec![0.0; num_labels],
            log_z: f64::NEG_INFINITY,
        }
    }

    fn reserve(&mut self, len: usize) {
        if self.cap < len {
            self.alpha.resize(len * self.num_labels, 0.0);
            self.beta.resize(len * self.num_labels, 0.0);
            self.cap = len;
        }
    }

    fn check_shapes(&self, emissions: &EmissionMatrix, trans: &TransitionMatrix) -> Result<()> {
        if emissions.num_labels() != self.num_labels || trans.num_labels() != self.num_labels {
            return Err(NamaeError::Config(format!(
                "label count mismatch: lattice {}, emissions {}, transitions {}",
                self.num_labels,
                emissions.num_labels(),
                trans.num_labels()
            )));
        }
        if emissions.is_empty() {
            return Err(NamaeError::data(
                "cannot run the forward algorithm on an empty sequence",
            ));
        }
        Ok(())
    }

    #[inline]
    fn alpha_at(&self, t: usize, l: usize) -> f64 {
        self.alpha[t * self.num_labels + l]
    }

    #[inline]
    fn beta_at(&self, t: usize, l: usize) -> f64 {
        self.beta[t * self.num_labels + l]
    }

    /// Run the forward and backward recurrences and return `log Z`.
    ///
    /// `alpha[t][l]` is the log-sum of all path scores from the virtual
    /// start state to `(t, l)` inclusive of the emission at `t`;
    /// `beta[t][l]` is the log-sum of all continuations from `(t, l)` to
    /// the virtual end state, exclusive of the emission at `t`.
    pub fn run(&mut self, emissions: &EmissionMatrix, trans: &TransitionMatrix) -> Result<f64> {
        self.check_shapes(emissions, trans)?;
        let (len, num_labels) = (emissions.len(), self.num_labels);
        self.reserve(len);
        self.len = len;

        for l in 0..num_labels {
            self.alpha[l] = emissions.get(0, l) + trans.start_score(l);
        }
        for t in 1..len {
            for l in 0..num_labels {
                for a in 0..num_labels {
                    self.scratch[a] = self.alpha_at(t - 1, a) + trans.score(a, l);
                }
                self.alpha[t * num_labels + l] = emissions.get(t, l) + logsumexp(&self.scratch);
            }
        }

        for l in 0..num_labels {
            self.beta[(len - 1) * num_labels + l] = trans.end_score(l);
        }
        for t in (0..len - 1).rev() {
            for l in 0..num_labels {
                for b in 0..num_labels {
                    self.scratch[b] =
                        self.beta_at(t + 1, b) + trans.score(l, b) + emissions.get(t + 1, b);
                }
                self.beta[t * num_labels + l] = logsumexp(&self.scratch);
            }
        }

        for l in 0..num_labels {
            self.scratch[l] = self.alpha_at(len - 1, l) + trans.end_score(l);
        }
        let log_z = logsumexp(&self.scratch);
        if !log_z.is_finite() {
            return Err(NamaeError::Numeric(format!(
                "log partition function is {log_z}"
            )));
        }
        self.log_z = log_z;
        Ok(log_z)
    }

    /// `log Z` of the last `run`.
    pub fn log_partition(&self) -> f64 {
        self.log_z
    }

    /// Marginal probability of label `l` at position `t` under the model.
    pub fn state_marginal(&self, t: usize, l: usize) -> f64 {
        (self.alpha_at(t, l) + self.beta_at(t, l) - self.log_z).exp()
    }

    /// Accumulate expected transition counts from the last `run` into the
    /// flat `L x L` buffer `trans_out` and the boundary buffers. Only an
    /// `L x L` accumulator is needed; nothing per-position is allocated.
    pub fn add_expected_transitions(
        &self,
        emissions: &EmissionMatrix,
        trans: &TransitionMatrix,
        trans_out: &mut [f64],
        start_out: &mut [f64],
        end_out: &mut [f64],
    ) {
        let (len, num_labels) = (self.len, self.num_labels);
        for t in 1..len {
            for a in 0..num_labels {
                let alpha = self.alpha_at(t - 1, a);
                for b in 0..num_labels {
                    let log_marginal = alpha
                        + trans.score(a, b)
                        + emissions.get(t, b)
                        + self.beta_at(t, b)
                        - self.log_z;
                    trans_out[a * num_labels + b] += log_marginal.exp();
                }
            }
        }
        for l in 0..num_labels {
            start_out[l] += self.state_marginal(0, l);
            end_out[l] += self.state_marginal(len - 1, l);
        }
    }

    /// Negative log-likelihood of a gold label sequence.
    ///
    /// The gold path is validated against the IOB2 scheme before scoring;
    /// an illegal sequence is a data error, never a silent score. The
    /// result is `log Z - gold_score`, which is non-negative for a
    /// correctly computed partition function.
    pub fn nll(
        &mut self,
        tags: &TagSet,
        emissions: &EmissionMatrix,
        trans: &TransitionMatrix,
        gold: &[Tag],
    ) -> Result<f64> {
        let log_z = self.run(emissions, trans)?;
        let score = gold_score(tags, emissions, trans, gold)?;
        Ok(log_z - score)
    }
}

/// Total score of one label-index path: emissions at the path labels plus
/// transitions between neighbors plus the boundary terms. The path is not
/// validated against the IOB2 scheme.
pub fn path_score(emissions: &EmissionMatrix, trans: &TransitionMatrix, path: &[usize]) -> f64 {
    let mut score = trans.start_score(path[0]) + trans.end_score(path[path.len() - 1]);
    for (t, &l) in path.iter().enumerate() {
        score += emissions.get(t, l);
        if t > 0 {
            score += trans.score(path[t - 1], l);
        }
    }
    score
}

/// Total score of one gold-labeled path, validated against the IOB2
/// scheme before scoring.
pub fn gold_score(
    tags: &TagSet,
    emissions: &EmissionMatrix,
    trans: &TransitionMatrix,
    gold: &[Tag],
) -> Result<f64> {
    if gold.len() != emissions.len() {
        return Err(NamaeError::data(format!(
            "gold path has {} labels but the sequence has {} positions",
            gold.len(),
            emissions.len()
        )));
    }
    tags.validate_gold(gold)?;

    let indices: Vec<usize> = gold.iter().map(|&t| tags.index_of(t)).collect();
    let score = path_score(emissions, trans, &indices);
    if !score.is_finite() {
        return Err(NamaeError::Numeric(format!("gold path score is {score}")));
    }
    Ok(score)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// O, B-LOC, I-LOC.
    fn small_tags() -> TagSet {
        TagSet::new(["LOC"]).unwrap()
    }

    fn emissions_3x3() -> EmissionMatrix {
        EmissionMatrix::from_rows(
            3,
            &[
                vec![0.5, 1.5, -0.25],
                vec![-1.0, 0.75, 2.0],
                vec![0.0, 0.25, -0.5],
            ],
        )
        .unwrap()
    }

    fn transitions_3() -> TransitionMatrix {
        let mut trans = TransitionMatrix::new(3);
        for (from, to, w) in [
            (0, 0, 0.2),
            (0, 1, 0.4),
            (0, 2, -1.2),
            (1, 1, -0.3),
            (1, 2, 0.9),
            (2, 0, 0.1),
            (2, 2, 0.6),
        ] {
            trans.set(from, to, w);
        }
        trans.set_start(1, 0.3);
        trans.set_end(0, 0.2);
        trans.set_end(2, -0.4);
        trans
    }

    /// Enumerate every label path and log-sum their scores.
    fn brute_force_log_z(emissions: &EmissionMatrix, trans: &TransitionMatrix) -> f64 {
        let (len, num_labels) = (emissions.len(), emissions.num_labels());
        let mut scores = Vec::new();
        let total = num_labels.pow(len as u32);
        for mut code in 0..total {
            let mut path = Vec::with_capacity(len);
            for _ in 0..len {
                path.push(code % num_labels);
                code /= num_labels;
            }
            let mut score =
                trans.start_score(path[0]) + trans.end_score(path[len - 1]);
            for (t, &l) in path.iter().enumerate() {
                score += emissions.get(t, l);
                if t > 0 {
                    score += trans.score(path[t - 1], l);
                }
            }
            scores.push(score);
        }
        logsumexp(&scores)
    }

    #[test]
    fn forward_matches_exhaustive_enumeration() {
        let emissions = emissions_3x3();
        let trans = transitions_3();
        let mut lattice = Lattice::new(3);
        let log_z = lattice.run(&emissions, &trans).unwrap();
        let expected = brute_force_log_z(&emissions, &trans);
        assert!((log_z - expected).abs() < 1e-9, "{log_z} vs {expected}");
    }

    #[test]
    fn nll_is_non_negative_for_every_gold_path() {
        let tags = small_tags();
        let emissions = emissions_3x3();
        let trans = transitions_3();
        let mut lattice = Lattice::new(3);

        let paths = [
            vec![Tag::Outside, Tag::Outside, Tag::Outside],
            vec![Tag::Begin(0), Tag::Inside(0), Tag::Inside(0)],
            vec![Tag::Outside, Tag::Begin(0), Tag::Outside],
            vec![Tag::Begin(0), Tag::Outside, Tag::Begin(0)],
        ];
        for gold in paths {
            let nll = lattice.nll(&tags, &emissions, &trans, &gold).unwrap();
            assert!(nll >= 0.0, "nll {nll} for {gold:?}");
        }
    }

    #[test]
    fn single_label_alphabet_has_zero_nll() {
        // With L = 1 there is exactly one path, so Z equals its score.
        let tags = TagSet::new(["X"]).unwrap();
        let emissions = EmissionMatrix::from_rows(1, &[vec![4.2], vec![-1.0]]).unwrap();
        let trans = TransitionMatrix::new(1);
        let mut lattice = Lattice::new(1);
        let nll = lattice
            .nll(&tags, &emissions, &trans, &[Tag::Outside, Tag::Outside])
            .unwrap();
        assert!(nll.abs() < 1e-9, "nll {nll}");
    }

    #[test]
    fn state_marginals_sum_to_one() {
        let emissions = emissions_3x3();
        let trans = transitions_3();
        let mut lattice = Lattice::new(3);
        lattice.run(&emissions, &trans).unwrap();
        for t in 0..3 {
            let total: f64 = (0..3).map(|l| lattice.state_marginal(t, l)).sum();
            assert!((total - 1.0).abs() < 1e-9, "position {t} sums to {total}");
        }
    }

    #[test]
    fn expected_transitions_sum_to_transition_count() {
        let emissions = emissions_3x3();
        let trans = transitions_3();
        let mut lattice = Lattice::new(3);
        lattice.run(&emissions, &trans).unwrap();

        let mut trans_out = vec![0.0; 9];
        let mut start_out = vec![0.0; 3];
        let mut end_out = vec![0.0; 3];
        lattice.add_expected_transitions(
            &emissions,
            &trans,
            &mut trans_out,
            &mut start_out,
            &mut end_out,
        );
        // A 3-position sequence has exactly 2 transitions in every path.
        let total: f64 = trans_out.iter().sum();
        assert!((total - 2.0).abs() < 1e-9, "expected counts sum to {total}");
        assert!((start_out.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!((end_out.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn illegal_gold_sequence_is_a_data_error() {
        let tags = small_tags();
        let emissions = emissions_3x3();
        let trans = transitions_3();
        let mut lattice = Lattice::new(3);
        // O I-LOC O: orphan inside tag.
        let gold = [Tag::Outside, Tag::Inside(0), Tag::Outside];
        let err = lattice.nll(&tags, &emissions, &trans, &gold).unwrap_err();
        assert!(matches!(err, NamaeError::Data { .. }), "{err}");
    }

    #[test]
    fn empty_sequence_is_rejected_for_training() {
        let trans = TransitionMatrix::new(3);
        let emissions = EmissionMatrix::zeros(0, 3);
        let mut lattice = Lattice::new(3);
        assert!(matches!(
            lattice.run(&emissions, &trans),
            Err(NamaeError::Data { .. })
        ));
    }

    #[test]
    fn gold_length_mismatch_is_rejected() {
        let tags = small_tags();
        let emissions = emissions_3x3();
        let trans = transitions_3();
        assert!(gold_score(&tags, &emissions, &trans, &[Tag::Outside]).is_err());
    }
}
