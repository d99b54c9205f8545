use serde::{Deserialize, Serialize};

use super::{Configuration, PhaseId};

/// One simplification candidate produced by a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Phase {
    pub id: PhaseId,
    /// Configuration that was active when the phase was produced. `None` for
    /// phases adopted from the service without local history.
    pub configuration: Option<Configuration>,
    /// Always true for phases this client holds. Stored in the journal as is.
    pub computed: bool,
    /// Set exactly once by an accepted evaluation.
    pub rating: Option<f64>,
}

impl Phase {
    /// `run` blocks until the service has finished, so every phase the client
    /// learns about is already computed.
    pub fn computed(id: impl Into<PhaseId>, configuration: Option<Configuration>) -> Self {
        Self {
            id: id.into(),
            configuration,
            computed: true,
            rating: None,
        }
    }

    pub fn is_rated(&self) -> bool {
        self.rating.is_some()
    }
}
