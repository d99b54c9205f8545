use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::PhaseId;
use crate::error::{Error, Result};

/// A batch of quality scores, one per phase, in the order they were given.
///
/// Order matters: the feedback aggregator records a batch in submission order
/// because the service provides no timestamp to break ties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatingSubmission {
    entries: Vec<(PhaseId, f64)>,
}

impl RatingSubmission {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form: add a score for `phase`.
    pub fn rate(mut self, phase: impl Into<PhaseId>, score: f64) -> Self {
        self.entries.push((phase.into(), score));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(id, score)| (id.as_str(), *score))
    }

    pub fn phase_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Shape checks that do not depend on session state.
    pub fn validate(&self) -> Result<()> {
        if self.entries.is_empty() {
            return Err(Error::Validation(
                "rating submission must contain at least one phase".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for (phase, score) in &self.entries {
            if !seen.insert(phase.as_str()) {
                return Err(Error::Validation(format!(
                    "phase {} is rated more than once in the same submission",
                    phase
                )));
            }
            if !score.is_finite() {
                return Err(Error::Validation(format!(
                    "rating for phase {} must be a finite number",
                    phase
                )));
            }
        }
        Ok(())
    }
}

impl<K: Into<PhaseId>> FromIterator<(K, f64)> for RatingSubmission {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}
