//! Training loop for the feature-based CRF.
//!
//! The objective is the regularized negative log-likelihood over all
//! training sequences. Parameters live in one packed vector
//! `[state | transitions | start | end]`; the gradient is the difference
//! between expected counts (forward-backward) and observed counts from the
//! gold paths, accumulated in parallel and reduced per evaluation.

use rayon::prelude::*;
use tracing::{debug, info};

use namae_core::crf::{EmissionMatrix, Lattice, TransitionMatrix, path_score};
use namae_core::{
    CrfConfig, Dictionary, FeatureCrf, FeatureExtractor, NamaeError, Sentence, TagSet,
};

use crate::error::{Result, TrainError};

const EPSILON: f64 = 1e-5;
const DELTA: f64 = 1e-5;
const PERIOD: usize = 10;
const MAX_LINESEARCH: usize = 20;
const CHUNK: usize = 64;

/// A training sequence with interned attributes and label indices.
struct Instance {
    /// Per position: `(attribute id, value)` pairs.
    items: Vec<Vec<(u32, f64)>>,
    labels: Vec<usize>,
}

/// Offsets of the packed parameter vector.
#[derive(Clone, Copy)]
struct Layout {
    num_labels: usize,
    /// Length of the state block (`num_attrs * num_labels`).
    state: usize,
}

impl Layout {
    fn new(num_attrs: usize, num_labels: usize) -> Self {
        Self {
            num_labels,
            state: num_attrs * num_labels,
        }
    }

    fn total(&self) -> usize {
        self.state + self.num_labels * self.num_labels + 2 * self.num_labels
    }

    fn transitions(&self, x: &[f64]) -> namae_core::Result<TransitionMatrix> {
        let l = self.num_labels;
        let trans_end = self.state + l * l;
        TransitionMatrix::from_parts(
            l,
            x[self.state..trans_end].to_vec(),
            x[trans_end..trans_end + l].to_vec(),
            x[trans_end + l..trans_end + 2 * l].to_vec(),
        )
    }

    /// Split a gradient buffer into its state/transition/boundary blocks.
    fn split_mut<'a>(
        &self,
        grad: &'a mut [f64],
    ) -> (&'a mut [f64], &'a mut [f64], &'a mut [f64], &'a mut [f64]) {
        let l = self.num_labels;
        let (state, rest) = grad.split_at_mut(self.state);
        let (trans, rest) = rest.split_at_mut(l * l);
        let (start, end) = rest.split_at_mut(l);
        (state, trans, start, end)
    }
}

/// L-BFGS trainer for the feature CRF.
pub struct FeatureTrainer {
    tags: TagSet,
    config: CrfConfig,
}

impl FeatureTrainer {
    pub fn new(tags: TagSet, config: CrfConfig) -> Self {
        Self { tags, config }
    }

    /// Train on labeled sequences and return the fitted model.
    pub fn train(&self, sentences: &[Sentence]) -> Result<FeatureCrf> {
        if sentences.is_empty() {
            return Err(NamaeError::Config("no training data".into()).into());
        }

        let extractor = FeatureExtractor::new(self.config.with_pos);
        let mut attrs = Dictionary::new();
        let instances = self.build_instances(sentences, &extractor, &mut attrs)?;

        let layout = Layout::new(attrs.len(), self.tags.len());
        info!(
            sequences = instances.len(),
            attributes = attrs.len(),
            labels = self.tags.len(),
            parameters = layout.total(),
            "starting L-BFGS optimization"
        );

        let weights = self.optimize(&instances, layout)?;

        let trans = layout.transitions(&weights)?;
        let model = FeatureCrf::from_parts(
            self.tags.clone(),
            attrs,
            weights[..layout.state].to_vec(),
            trans,
            self.config.clone(),
        )?;
        Ok(model)
    }

    fn build_instances(
        &self,
        sentences: &[Sentence],
        extractor: &FeatureExtractor,
        attrs: &mut Dictionary,
    ) -> Result<Vec<Instance>> {
        let mut instances = Vec::with_capacity(sentences.len());
        for (idx, sentence) in sentences.iter().enumerate() {
            let context = || format!("sentence {idx}");
            if sentence.is_empty() {
                return Err(NamaeError::data_at("empty training sequence", context()).into());
            }
            let gold = sentence.gold().ok_or_else(|| {
                NamaeError::data_at("training sequence has no gold labels", context())
            })?;
            self.tags.validate_gold(gold).map_err(|e| {
                TrainError::from(NamaeError::data_at(e.to_string(), context()))
            })?;

            let items = extractor
                .extract_all(sentence)?
                .into_iter()
                .map(|row| {
                    row.iter()
                        .map(|f| (attrs.get_or_insert(&f.name), f.value))
                        .collect()
                })
                .collect();
            instances.push(Instance {
                items,
                labels: gold.iter().map(|&t| self.tags.index_of(t)).collect(),
            });
        }
        Ok(instances)
    }

    fn optimize(&self, instances: &[Instance], layout: Layout) -> Result<Vec<f64>> {
        let mut weights = vec![0.0; layout.total()];
        let c1 = self.config.c1;
        let c2 = self.config.c2;
        let num_params = layout.total();

        // Regularized negative log-likelihood and its gradient.
        let evaluate = |x: &[f64], gx: &mut [f64]| -> std::result::Result<f64, anyhow::Error> {
            let terms: Vec<(f64, Vec<f64>)> = instances
                .par_chunks(CHUNK)
                .map(|chunk| chunk_terms(chunk, x, layout))
                .collect::<namae_core::Result<_>>()?;

            gx.fill(0.0);
            let mut loss = 0.0;
            for (chunk_loss, chunk_grad) in terms {
                loss += chunk_loss;
                for (g, d) in gx.iter_mut().zip(chunk_grad) {
                    *g += d;
                }
            }

            if c2 > 0.0 {
                let two_c2 = 2.0 * c2;
                for (g, &w) in gx.iter_mut().zip(x.iter()) {
                    *g += two_c2 * w;
                    loss += c2 * w * w;
                }
            }

            debug!(loss, "objective evaluated");
            Ok(loss)
        };

        let progress = |prgr: &liblbfgs::Progress| -> bool {
            info!(
                iteration = prgr.niter,
                loss = prgr.fx,
                gnorm = prgr.gnorm,
                "L-BFGS iteration"
            );
            false
        };

        let mut lbfgs = liblbfgs::lbfgs()
            .with_max_iterations(self.config.max_iterations)
            .with_epsilon(EPSILON)
            .with_fx_delta(DELTA, PERIOD)
            .with_max_linesearch(MAX_LINESEARCH);

        // L1 regularization switches to OWL-QN, which only supports
        // backtracking line search.
        if c1 > 0.0 {
            lbfgs = lbfgs
                .with_linesearch_algorithm("BacktrackingStrongWolfe")
                .with_orthantwise(c1, 0, num_params);
        }

        let report = lbfgs
            .minimize(&mut weights, evaluate, progress)
            .map_err(|e| TrainError::Optimizer(e.to_string()))?;
        info!(loss = report.fx, "optimization finished");

        Ok(weights)
    }
}

/// Loss and gradient contribution of one chunk of instances.
fn chunk_terms(
    chunk: &[Instance],
    x: &[f64],
    layout: Layout,
) -> namae_core::Result<(f64, Vec<f64>)> {
    let num_labels = layout.num_labels;
    let trans = layout.transitions(x)?;
    let mut lattice = Lattice::new(num_labels);
    let mut grad = vec![0.0; layout.total()];
    let mut loss = 0.0;

    for inst in chunk {
        let emissions = instance_emissions(inst, x, num_labels);
        let log_z = lattice.run(&emissions, &trans)?;
        loss += log_z - path_score(&emissions, &trans, &inst.labels);

        let (state_g, trans_g, start_g, end_g) = layout.split_mut(&mut grad);

        // State counts: expected marginals minus gold observations.
        for (t, items) in inst.items.iter().enumerate() {
            let gold = inst.labels[t];
            for &(aid, value) in items {
                let base = aid as usize * num_labels;
                for l in 0..num_labels {
                    state_g[base + l] += lattice.state_marginal(t, l) * value;
                }
                state_g[base + gold] -= value;
            }
        }

        // Transition and boundary counts.
        lattice.add_expected_transitions(&emissions, &trans, trans_g, start_g, end_g);
        for t in 1..inst.labels.len() {
            trans_g[inst.labels[t - 1] * num_labels + inst.labels[t]] -= 1.0;
        }
        start_g[inst.labels[0]] -= 1.0;
        end_g[inst.labels[inst.labels.len() - 1]] -= 1.0;
    }

    Ok((loss, grad))
}

/// Emission scores of one instance under the packed state weights.
fn instance_emissions(inst: &Instance, x: &[f64], num_labels: usize) -> EmissionMatrix {
    let mut emissions = EmissionMatrix::zeros(inst.items.len(), num_labels);
    for (t, items) in inst.items.iter().enumerate() {
        for &(aid, value) in items {
            let base = aid as usize * num_labels;
            for l in 0..num_labels {
                emissions.add(t, l, x[base + l] * value);
            }
        }
    }
    emissions
}
