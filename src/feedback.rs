//! Append-only accumulation of phase ratings for downstream export.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use chrono::Utc;

use crate::lineage::LineageTracker;
use crate::models::{
    Configuration, ExportedVariant, ModelId, PhaseId, RatingEvent, SessionExport, SessionId,
};

#[derive(Debug, Default)]
struct FeedbackState {
    events: Vec<RatingEvent>,
    next_batch: u64,
}

/// Read-mostly view over every rating accepted by the service.
#[derive(Debug, Clone, Default)]
pub struct FeedbackAggregator {
    state: Arc<RwLock<FeedbackState>>,
}

impl FeedbackAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one accepted evaluate call. Entries keep their input order and
    /// share a batch number.
    pub fn record_batch(
        &self,
        session_id: &str,
        entries: Vec<(PhaseId, Option<Configuration>, f64)>,
    ) -> Vec<RatingEvent> {
        let mut state = self.state.write().expect("feedback lock poisoned");
        let batch = state.next_batch;
        state.next_batch += 1;

        let recorded_at = Utc::now();
        let events: Vec<RatingEvent> = entries
            .into_iter()
            .map(|(phase_id, configuration, rating)| RatingEvent {
                session_id: session_id.to_string(),
                phase_id,
                configuration,
                rating,
                batch,
                recorded_at,
            })
            .collect();
        state.events.extend(events.iter().cloned());
        tracing::debug!(session_id, batch, count = events.len(), "recorded ratings");
        events
    }

    /// Replay events recorded by an earlier process, in their original order.
    pub fn restore(&self, events: Vec<RatingEvent>) {
        let mut state = self.state.write().expect("feedback lock poisoned");
        if let Some(max) = events.iter().map(|e| e.batch).max() {
            state.next_batch = state.next_batch.max(max + 1);
        }
        state.events.extend(events);
    }

    /// Ratings recorded for `session_id`, in submission order.
    pub fn ratings_for(&self, session_id: &str) -> Vec<RatingEvent> {
        let state = self.state.read().expect("feedback lock poisoned");
        state
            .events
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect()
    }

    /// Most recent rating recorded for a phase.
    pub fn rating(&self, session_id: &str, phase_id: &str) -> Option<f64> {
        let state = self.state.read().expect("feedback lock poisoned");
        state
            .events
            .iter()
            .rev()
            .find(|e| e.session_id == session_id && e.phase_id == phase_id)
            .map(|e| e.rating)
    }

    pub fn len(&self) -> usize {
        self.state.read().expect("feedback lock poisoned").events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build the export record for one session.
    pub fn export(
        &self,
        session_id: &SessionId,
        root_model: &ModelId,
        lineage: &LineageTracker,
    ) -> SessionExport {
        let ratings = self.ratings_for(session_id);
        let layers: BTreeSet<String> = ratings
            .iter()
            .filter_map(|e| e.configuration.as_ref())
            .flat_map(|c| c.parts().map(str::to_string).collect::<Vec<_>>())
            .collect();

        SessionExport {
            session_id: session_id.clone(),
            root_model: root_model.clone(),
            parent: lineage.parent(session_id),
            ancestors: lineage.ancestors(session_id),
            layers: layers.into_iter().collect(),
            variants: ratings.iter().map(ExportedVariant::from).collect(),
        }
    }
}
