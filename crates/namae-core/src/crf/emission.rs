//! Position-wise label scores and the interface that produces them.

use crate::error::{NamaeError, Result};
use crate::sequence::Sentence;

/// Dense `len x L` emission scores for one sequence, flat row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct EmissionMatrix {
    len: usize,
    num_labels: usize,
    scores: Vec<f64>,
}

impl EmissionMatrix {
    /// Zero-initialized matrix.
    pub fn zeros(len: usize, num_labels: usize) -> Self {
        Self {
            len,
            num_labels,
            scores: vec![0.0; len * num_labels],
        }
    }

    /// Build from per-position rows; every row must have `num_labels`
    /// scores and all scores must be finite.
    pub fn from_rows(num_labels: usize, rows: &[Vec<f64>]) -> Result<Self> {
        let mut matrix = Self::zeros(rows.len(), num_labels);
        for (t, row) in rows.iter().enumerate() {
            if row.len() != num_labels {
                return Err(NamaeError::data(format!(
                    "emission row {t} has {} scores, expected {num_labels}",
                    row.len()
                )));
            }
            for (l, &score) in row.iter().enumerate() {
                if !score.is_finite() {
                    return Err(NamaeError::Numeric(format!(
                        "non-finite emission score at position {t}, label {l}"
                    )));
                }
                matrix.set(t, l, score);
            }
        }
        Ok(matrix)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    #[inline]
    pub fn get(&self, t: usize, l: usize) -> f64 {
        self.scores[t * self.num_labels + l]
    }

    #[inline]
    pub fn set(&mut self, t: usize, l: usize, score: f64) {
        self.scores[t * self.num_labels + l] = score;
    }

    #[inline]
    pub fn add(&mut self, t: usize, l: usize, score: f64) {
        self.scores[t * self.num_labels + l] += score;
    }

    /// The score row of position `t`.
    pub fn row(&self, t: usize) -> &[f64] {
        &self.scores[t * self.num_labels..(t + 1) * self.num_labels]
    }
}

/// Anything that can score a sequence position-by-position over the label
/// alphabet. The feature-based linear model and the neural encoder output
/// are interchangeable variants behind this interface.
pub trait EmissionSource {
    fn scores(&self, sentence: &Sentence) -> Result<EmissionMatrix>;
}

/// Emission scores computed elsewhere (e.g. by an external sequence
/// encoder) and handed over as-is.
#[derive(Debug, Clone)]
pub struct PrecomputedEmission {
    matrix: EmissionMatrix,
}

impl PrecomputedEmission {
    pub fn new(matrix: EmissionMatrix) -> Self {
        Self { matrix }
    }
}

impl EmissionSource for PrecomputedEmission {
    fn scores(&self, sentence: &Sentence) -> Result<EmissionMatrix> {
        if self.matrix.len() != sentence.len() {
            return Err(NamaeError::data(format!(
                "emission matrix covers {} positions but the sequence has {}",
                self.matrix.len(),
                sentence.len()
            )));
        }
        Ok(self.matrix.clone())
    }
}
