//! Pairwise tag-transition scores shared across all positions.

use crate::error::{NamaeError, Result};

/// A dense `L x L` matrix of transition scores plus explicit boundary
/// vectors for the virtual sequence-start and sequence-end states.
///
/// `score(a, b)` is the score of label `a` followed by label `b`. The
/// matrix is process-wide: mutated only by the optimizer during training,
/// read-only during inference. Storage is flat row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionMatrix {
    num_labels: usize,
    trans: Vec<f64>,
    start: Vec<f64>,
    end: Vec<f64>,
}

impl TransitionMatrix {
    /// Zero-initialized matrix for `num_labels` labels.
    pub fn new(num_labels: usize) -> Self {
        Self {
            num_labels,
            trans: vec![0.0; num_labels * num_labels],
            start: vec![0.0; num_labels],
            end: vec![0.0; num_labels],
        }
    }

    /// Rebuild from flat parts (checkpoint load). Lengths must agree.
    pub fn from_parts(
        num_labels: usize,
        trans: Vec<f64>,
        start: Vec<f64>,
        end: Vec<f64>,
    ) -> Result<Self> {
        if trans.len() != num_labels * num_labels
            || start.len() != num_labels
            || end.len() != num_labels
        {
            return Err(NamaeError::Checkpoint(format!(
                "transition shape mismatch: {} labels but {} transition, {} start, {} end scores",
                num_labels,
                trans.len(),
                start.len(),
                end.len()
            )));
        }
        Ok(Self {
            num_labels,
            trans,
            start,
            end,
        })
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    #[inline]
    pub fn score(&self, from: usize, to: usize) -> f64 {
        self.trans[from * self.num_labels + to]
    }

    #[inline]
    pub fn start_score(&self, label: usize) -> f64 {
        self.start[label]
    }

    #[inline]
    pub fn end_score(&self, label: usize) -> f64 {
        self.end[label]
    }

    pub fn set(&mut self, from: usize, to: usize, score: f64) {
        self.trans[from * self.num_labels + to] = score;
    }

    pub fn set_start(&mut self, label: usize, score: f64) {
        self.start[label] = score;
    }

    pub fn set_end(&mut self, label: usize, score: f64) {
        self.end[label] = score;
    }

    pub fn transitions(&self) -> &[f64] {
        &self.trans
    }

    pub fn start(&self) -> &[f64] {
        &self.start
    }

    pub fn end(&self) -> &[f64] {
        &self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_indexing() {
        let mut trans = TransitionMatrix::new(3);
        trans.set(1, 2, 0.5);
        trans.set_start(0, -1.0);
        trans.set_end(2, 2.0);
        assert_eq!(trans.score(1, 2), 0.5);
        assert_eq!(trans.score(2, 1), 0.0);
        assert_eq!(trans.start_score(0), -1.0);
        assert_eq!(trans.end_score(2), 2.0);
    }

    #[test]
    fn from_parts_validates_shapes() {
        assert!(TransitionMatrix::from_parts(2, vec![0.0; 4], vec![0.0; 2], vec![0.0; 2]).is_ok());
        assert!(TransitionMatrix::from_parts(2, vec![0.0; 3], vec![0.0; 2], vec![0.0; 2]).is_err());
        assert!(TransitionMatrix::from_parts(2, vec![0.0; 4], vec![0.0; 1], vec![0.0; 2]).is_err());
    }
}
