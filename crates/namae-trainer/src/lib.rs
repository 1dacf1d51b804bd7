//! # Namae Trainer
//!
//! Dataset loading, batching and the two training paths for the namae CRF
//! tagger: L-BFGS optimization of the feature-based model and epoch-based
//! training of the neural CRF over external encoder logits.

pub mod batch;
pub mod data;
pub mod error;
pub mod neural;
pub mod trainer;
pub mod vocab;

pub use batch::{Batch, Batcher, Example};
pub use data::{load_iob2, write_predictions};
pub use error::{Result, TrainError};
pub use neural::{BatchTensors, CrfLoss, NeuralTrainer, SequenceEncoder, load_artifacts};
pub use trainer::FeatureTrainer;
pub use vocab::{PAD_ID, PAD_TOKEN, UNK_ID, UNK_TOKEN, Vocab};
