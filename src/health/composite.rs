//! Composite health score from the five sub-scores.

use crate::health::components::clamp_score;
use crate::types::{Dimension, DimensionWeights, SubScores};

/// Weighted mean of the sub-scores, rounded half away from zero.
///
/// Weights that sum to zero fall back to equal weighting.
pub fn composite_score(sub_scores: &SubScores, weights: &DimensionWeights) -> u8 {
    let total_weight: f64 = Dimension::ALL
        .iter()
        .map(|d| weights.weight(*d).max(0.0))
        .sum();

    if total_weight <= 0.0 || !total_weight.is_finite() {
        let sum: f64 = Dimension::ALL.iter().map(|d| sub_scores.get(*d) as f64).sum();
        return clamp_score(sum / Dimension::ALL.len() as f64);
    }

    let weighted: f64 = Dimension::ALL
        .iter()
        .map(|d| sub_scores.get(*d) as f64 * weights.weight(*d).max(0.0))
        .sum();
    clamp_score(weighted / total_weight)
}
