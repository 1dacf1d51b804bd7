//! Configuration surface consumed by the core, supplied externally.

use serde::{Deserialize, Serialize};

/// Knobs shared by both tagging paths.
///
/// Defaults mirror the reference training setup: L-BFGS with light L1/L2
/// regularization capped at 100 iterations, POS features off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrfConfig {
    /// Use POS tags as features. Every token must then carry a POS field.
    pub with_pos: bool,
    /// Lowercase token forms before vocabulary lookup (neural path).
    pub lowercase: bool,
    /// Batch size for the neural path.
    pub batch_size: usize,
    /// Iteration cap for the feature-path optimizer.
    pub max_iterations: usize,
    /// L1 regularization coefficient.
    pub c1: f64,
    /// L2 regularization coefficient.
    pub c2: f64,
}

impl Default for CrfConfig {
    fn default() -> Self {
        Self {
            with_pos: false,
            lowercase: false,
            batch_size: 32,
            max_iterations: 100,
            c1: 0.1,
            c2: 0.1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_json_roundtrip() {
        let config = CrfConfig {
            with_pos: true,
            c1: 0.5,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: CrfConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
