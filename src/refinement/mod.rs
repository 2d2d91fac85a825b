//! Optional refinement of peak detection from trained load clusters
//!
//! A clustering job run by the training service groups historical load into
//! clusters with lower/upper power boundaries. The controller never needs
//! them to work; when available they can replace the proportional
//! three-quarter threshold used to detect peak episodes.

pub mod trainer;

use serde::{Deserialize, Serialize};

/// Anything that can suggest a peak-episode threshold
pub trait ThresholdRefinement {
    /// Level at or above which load counts as peak, if known
    fn peak_threshold(&self) -> Option<f64>;
}

/// Per-cluster power boundaries of a trained load model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterBoundaries {
    pub min_boundaries: Vec<f64>,
    pub max_boundaries: Vec<f64>,
}

impl ClusterBoundaries {
    pub fn is_consistent(&self) -> bool {
        !self.min_boundaries.is_empty()
            && self.min_boundaries.len() == self.max_boundaries.len()
            && self
                .min_boundaries
                .iter()
                .chain(self.max_boundaries.iter())
                .all(|b| b.is_finite())
    }
}

impl ThresholdRefinement for ClusterBoundaries {
    /// Lower boundary of the cluster reaching the highest load
    fn peak_threshold(&self) -> Option<f64> {
        if !self.is_consistent() {
            return None;
        }

        let (top, _) = self
            .max_boundaries
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))?;

        Some(self.min_boundaries[top])
    }
}
