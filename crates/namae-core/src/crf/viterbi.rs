//! # Viterbi Decoding for CRF
//!
//! Finds the highest-scoring tag sequence for a set of emission scores and
//! a transition matrix: the same scoring function as the forward algorithm
//! with `max` replacing `logsumexp`.

use crate::crf::emission::EmissionMatrix;
use crate::crf::transitions::TransitionMatrix;
use crate::error::{NamaeError, Result};

/// Viterbi decoder for CRF tag sequences.
///
/// The `delta` and backpointer tables are flat pre-sized vectors; decoding
/// is `O(N * L^2)` with no per-position nested allocations. Ties are broken
/// deterministically toward the lowest label index.
#[derive(Debug, Clone)]
pub struct ViterbiDecoder {
    num_labels: usize,
}

impl ViterbiDecoder {
    pub fn new(num_labels: usize) -> Self {
        Self { num_labels }
    }

    /// Decode the optimal label sequence as label indices.
    ///
    /// An empty sequence decodes to an empty path without error.
    pub fn decode(
        &self,
        emissions: &EmissionMatrix,
        trans: &TransitionMatrix,
    ) -> Result<Vec<usize>> {
        let len = emissions.len();
        if len == 0 {
            return Ok(Vec::new());
        }
        let num_labels = self.num_labels;
        if emissions.num_labels() != num_labels || trans.num_labels() != num_labels {
            return Err(NamaeError::Config(format!(
                "label count mismatch: decoder {}, emissions {}, transitions {}",
                num_labels,
                emissions.num_labels(),
                trans.num_labels()
            )));
        }

        let mut delta = vec![f64::NEG_INFINITY; len * num_labels];
        let mut backptr = vec![0u32; len * num_labels];

        for l in 0..num_labels {
            delta[l] = emissions.get(0, l) + trans.start_score(l);
        }

        for t in 1..len {
            for l in 0..num_labels {
                let mut best = f64::NEG_INFINITY;
                let mut arg = 0usize;
                for a in 0..num_labels {
                    // Strictly-greater keeps the lowest index on ties.
                    let score = delta[(t - 1) * num_labels + a] + trans.score(a, l);
                    if score > best {
                        best = score;
                        arg = a;
                    }
                }
                delta[t * num_labels + l] = best + emissions.get(t, l);
                backptr[t * num_labels + l] = arg as u32;
            }
        }

        let mut best = f64::NEG_INFINITY;
        let mut last = 0usize;
        for l in 0..num_labels {
            let score = delta[(len - 1) * num_labels + l] + trans.end_score(l);
            if score > best {
                best = score;
                last = l;
            }
        }
        if !best.is_finite() {
            return Err(NamaeError::Numeric(format!(
                "best Viterbi path score is {best}"
            )));
        }

        let mut path = vec![0usize; len];
        path[len - 1] = last;
        for t in (1..len).rev() {
            path[t - 1] = backptr[t * num_labels + path[t]] as usize;
        }
        Ok(path)
    }
}
