//! Linear-chain CRF core: emission scoring, the forward-backward lattice
//! and Viterbi decoding.

pub mod emission;
pub mod lattice;
pub mod transitions;
pub mod viterbi;

pub use emission::{EmissionMatrix, EmissionSource, PrecomputedEmission};
pub use lattice::{Lattice, gold_score, path_score};
pub use transitions::TransitionMatrix;
pub use viterbi::ViterbiDecoder;
