use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Configuration, ModelId, PhaseId, SessionId};

/// An accepted rating for one phase.
///
/// Rating events are **append-only**. Resetting a session discards its phases
/// but never the events already recorded for them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatingEvent {
    pub session_id: SessionId,
    pub phase_id: PhaseId,
    /// Configuration snapshot that produced the phase, if known.
    pub configuration: Option<Configuration>,
    pub rating: f64,
    /// Evaluate call this rating arrived in; increases across calls.
    pub batch: u64,
    pub recorded_at: DateTime<Utc>,
}

/// Export record for one session, suitable for downstream analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionExport {
    pub session_id: SessionId,
    pub root_model: ModelId,
    pub parent: Option<SessionId>,
    /// Proper ancestors, root first.
    pub ancestors: Vec<SessionId>,
    /// Every part name that appears in a rated configuration, sorted.
    pub layers: Vec<String>,
    /// Rated phases in submission order.
    pub variants: Vec<ExportedVariant>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportedVariant {
    pub phase_id: PhaseId,
    pub configuration: Option<Configuration>,
    pub rating: f64,
    pub batch: u64,
    pub recorded_at: DateTime<Utc>,
}

impl From<&RatingEvent> for ExportedVariant {
    fn from(event: &RatingEvent) -> Self {
        Self {
            phase_id: event.phase_id.clone(),
            configuration: event.configuration.clone(),
            rating: event.rating,
            batch: event.batch,
            recorded_at: event.recorded_at,
        }
    }
}
