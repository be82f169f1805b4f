//! Within-caller drift model.
//!
//! Each call keeps a sliding window of its own feature vectors. A new
//! segment is scored by how far it sits from that window, so the model
//! tracks change in one voice rather than comparing against a population.

use std::collections::VecDeque;

use carebridge_types::RiskStatus;

use crate::features::{Features, FEATURE_COUNT};

/// Feature vectors kept per call.
pub const HISTORY_LIMIT: usize = 100;
/// Vectors needed before scores are reported as `ok`.
pub const MIN_SAMPLES: usize = 10;

const STD_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    pub risk: f64,
    pub status: RiskStatus,
    /// History length after the update.
    pub n: u64,
}

#[derive(Debug, Default)]
pub struct RiskModel {
    history: VecDeque<[f64; FEATURE_COUNT]>,
}

impl RiskModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Adds a segment to the history and scores it against the window.
    ///
    /// Vectors with non-finite values are scored as errors and never enter
    /// the history.
    pub fn update(&mut self, features: &Features) -> Score {
        let latest = features.to_array();
        if latest.iter().any(|v| !v.is_finite()) {
            return self.error_score();
        }
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(latest);
        let n = self.history.len() as u64;

        if self.history.len() < MIN_SAMPLES {
            return Score {
                risk: 0.0,
                status: RiskStatus::WarmingUp,
                n,
            };
        }

        let z = self.mean_abs_z(&latest);
        if !z.is_finite() {
            return self.error_score();
        }

        Score {
            risk: ((z - 0.5) / 2.0).clamp(0.0, 1.0),
            status: RiskStatus::Ok,
            n,
        }
    }

    fn error_score(&self) -> Score {
        let n = self.history.len() as u64;
        tracing::warn!(n, "risk model produced a non-finite score");
        Score {
            risk: 0.0,
            status: RiskStatus::Error,
            n,
        }
    }

    fn mean_abs_z(&self, latest: &[f64; FEATURE_COUNT]) -> f64 {
        let count = self.history.len() as f64;
        let mut total = 0.0;
        for (i, value) in latest.iter().enumerate() {
            let mean = self.history.iter().map(|v| v[i]).sum::<f64>() / count;
            let variance = self
                .history
                .iter()
                .map(|v| (v[i] - mean).powi(2))
                .sum::<f64>()
                / count;
            let std = variance.sqrt();
            if std > STD_EPSILON {
                total += ((value - mean) / std).abs();
            }
        }
        total / FEATURE_COUNT as f64
    }
}
