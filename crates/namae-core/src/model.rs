//! The feature-based CRF tagger: frozen attribute dictionary, per-label
//! state weights and the learned transition matrix.

use tracing::debug;

use crate::config::CrfConfig;
use crate::crf::{EmissionMatrix, EmissionSource, TransitionMatrix, ViterbiDecoder};
use crate::dictionary::Dictionary;
use crate::error::{NamaeError, Result};
use crate::features::FeatureExtractor;
use crate::sequence::Sentence;
use crate::tags::{Tag, TagSet};

/// A trained feature CRF.
///
/// State weights are a flat `num_attrs x L` table: the score of label `l`
/// at a position is the dot product of the position's sparse features with
/// column `l`. Attributes unseen at training time contribute nothing.
#[derive(Debug, Clone)]
pub struct FeatureCrf {
    tags: TagSet,
    attrs: Dictionary,
    weights: Vec<f64>,
    trans: TransitionMatrix,
    config: CrfConfig,
    extractor: FeatureExtractor,
}

impl FeatureCrf {
    /// Assemble a model from trained parts, validating shapes.
    pub fn from_parts(
        tags: TagSet,
        attrs: Dictionary,
        weights: Vec<f64>,
        trans: TransitionMatrix,
        config: CrfConfig,
    ) -> Result<Self> {
        let expected = attrs.len() * tags.len();
        if weights.len() != expected {
            return Err(NamaeError::Config(format!(
                "weight table has {} entries but {} attributes x {} labels requires {expected}",
                weights.len(),
                attrs.len(),
                tags.len()
            )));
        }
        if trans.num_labels() != tags.len() {
            return Err(NamaeError::Config(format!(
                "transition matrix covers {} labels but the tag set has {}",
                trans.num_labels(),
                tags.len()
            )));
        }
        let extractor = FeatureExtractor::new(config.with_pos);
        Ok(Self {
            tags,
            attrs,
            weights,
            trans,
            config,
            extractor,
        })
    }

    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    pub fn attrs(&self) -> &Dictionary {
        &self.attrs
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn transitions(&self) -> &TransitionMatrix {
        &self.trans
    }

    pub fn config(&self) -> &CrfConfig {
        &self.config
    }

    /// Emission scores for a sequence: sparse features dotted with the
    /// per-label weight columns.
    pub fn emissions(&self, sentence: &Sentence) -> Result<EmissionMatrix> {
        let num_labels = self.tags.len();
        let mut matrix = EmissionMatrix::zeros(sentence.len(), num_labels);
        for t in 0..sentence.len() {
            for feature in self.extractor.extract(sentence, t)? {
                let Some(aid) = self.attrs.get(&feature.name) else {
                    continue;
                };
                let base = aid as usize * num_labels;
                for l in 0..num_labels {
                    matrix.add(t, l, self.weights[base + l] * feature.value);
                }
            }
        }
        Ok(matrix)
    }

    /// Decode the best tag sequence for a sequence of tokens.
    pub fn tag(&self, sentence: &Sentence) -> Result<Vec<Tag>> {
        if sentence.is_empty() {
            return Ok(Vec::new());
        }
        let emissions = self.emissions(sentence)?;
        let decoder = ViterbiDecoder::new(self.tags.len());
        let path = decoder.decode(&emissions, &self.trans)?;
        debug!(len = sentence.len(), "decoded sequence");
        path.iter()
            .map(|&l| {
                self.tags
                    .tag(l)
                    .ok_or_else(|| NamaeError::Numeric(format!("decoded label index {l} out of range")))
            })
            .collect()
    }

    /// Decode and render surface forms (`O`, `B-LOC`, ...).
    pub fn tag_names(&self, sentence: &Sentence) -> Result<Vec<String>> {
        Ok(self
            .tag(sentence)?
            .into_iter()
            .map(|t| self.tags.name(t))
            .collect())
    }
}

impl EmissionSource for FeatureCrf {
    fn scores(&self, sentence: &Sentence) -> Result<EmissionMatrix> {
        self.emissions(sentence)
    }
}
