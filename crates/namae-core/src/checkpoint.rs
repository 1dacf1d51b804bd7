//! Versioned, data-only model artifacts.
//!
//! A checkpoint carries parameters and vocabularies, never behavior; the
//! tagger is reconstructed from the checkpoint plus configuration. Writes
//! go to a temporary file in the target directory followed by a rename,
//! so an aborted run never corrupts the previous artifact.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::CrfConfig;
use crate::crf::TransitionMatrix;
use crate::dictionary::Dictionary;
use crate::error::{NamaeError, Result};
use crate::model::FeatureCrf;
use crate::tags::TagSet;

/// Current artifact schema version.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Write `bytes` through a temporary file in the target directory followed
/// by a rename, so readers never observe a partially-written artifact.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| NamaeError::Checkpoint(format!("invalid checkpoint path {path:?}")))?;
    let tmp = path.with_file_name(format!("{}.tmp", file_name.to_string_lossy()));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Persisted form of a trained [`FeatureCrf`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureCheckpoint {
    pub version: u32,
    pub tags: TagSet,
    pub attributes: Vec<String>,
    pub weights: Vec<f64>,
    pub transitions: Vec<f64>,
    pub start: Vec<f64>,
    pub end: Vec<f64>,
    pub config: CrfConfig,
}

impl FeatureCheckpoint {
    pub fn from_model(model: &FeatureCrf) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            tags: model.tags().clone(),
            attributes: model.attrs().names().to_vec(),
            weights: model.weights().to_vec(),
            transitions: model.transitions().transitions().to_vec(),
            start: model.transitions().start().to_vec(),
            end: model.transitions().end().to_vec(),
            config: model.config().clone(),
        }
    }

    /// Rebuild the tagger, validating the schema version and every
    /// recorded size. A mismatch is fatal; no partial model is returned.
    pub fn into_model(self) -> Result<FeatureCrf> {
        if self.version != CHECKPOINT_VERSION {
            return Err(NamaeError::Checkpoint(format!(
                "unsupported checkpoint version {} (expected {CHECKPOINT_VERSION})",
                self.version
            )));
        }
        let trans =
            TransitionMatrix::from_parts(self.tags.len(), self.transitions, self.start, self.end)?;
        FeatureCrf::from_parts(
            self.tags,
            Dictionary::from_names(self.attributes),
            self.weights,
            trans,
            self.config,
        )
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = serde_json::to_vec(self)
            .map_err(|e| NamaeError::Checkpoint(format!("cannot serialize checkpoint: {e}")))?;
        write_atomic(path, &bytes)?;
        info!(path = %path.display(), "wrote feature checkpoint");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| {
            NamaeError::Checkpoint(format!("cannot parse checkpoint {}: {e}", path.display()))
        })
    }
}

/// Sidecar manifest for a neural checkpoint; the encoder parameters
/// themselves live in a safetensors file next to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeuralManifest {
    pub version: u32,
    pub tags: TagSet,
    pub vocab_size: usize,
    pub char_vocab_size: usize,
    pub config: CrfConfig,
}

impl NeuralManifest {
    pub fn new(
        tags: TagSet,
        vocab_size: usize,
        char_vocab_size: usize,
        config: CrfConfig,
    ) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            tags,
            vocab_size,
            char_vocab_size,
            config,
        }
    }

    /// Check the recorded sizes against loaded vocabularies. Mismatches
    /// are configuration errors: the artifact and the vocabulary files do
    /// not belong together.
    pub fn validate(&self, vocab_size: usize, char_vocab_size: usize) -> Result<()> {
        if self.version != CHECKPOINT_VERSION {
            return Err(NamaeError::Checkpoint(format!(
                "unsupported checkpoint version {} (expected {CHECKPOINT_VERSION})",
                self.version
            )));
        }
        if self.vocab_size != vocab_size {
            return Err(NamaeError::Config(format!(
                "vocabulary has {vocab_size} entries but the checkpoint recorded {}",
                self.vocab_size
            )));
        }
        if self.char_vocab_size != char_vocab_size {
            return Err(NamaeError::Config(format!(
                "character vocabulary has {char_vocab_size} entries but the checkpoint recorded {}",
                self.char_vocab_size
            )));
        }
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = serde_json::to_vec(self)
            .map_err(|e| NamaeError::Checkpoint(format!("cannot serialize manifest: {e}")))?;
        write_atomic(path, &bytes)?;
        info!(path = %path.display(), "wrote neural manifest");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| {
            NamaeError::Checkpoint(format!("cannot parse manifest {}: {e}", path.display()))
        })
    }
}
