use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Configuration, ModelId, Phase, PhaseId, SessionId};

/// A stateful exploration context anchored to one reference model.
///
/// The `phases` list and `unevaluated` set are the client's **cached mirror**
/// of server state. The service is the only authority on which phases exist
/// and which are still awaiting a rating; `unevaluated` only holds what the
/// most recent inspect reported, minus phases rated since.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: SessionId,
    /// Same as `id` for root sessions, inherited for branches.
    pub root_model: ModelId,
    /// Source session of a copy. `None` only for roots.
    pub parent: Option<SessionId>,
    pub status: SessionStatus,
    /// Pending configuration, replaced on every configure.
    pub configuration: Option<Configuration>,
    /// Phases produced so far, in production order.
    pub phases: Vec<Phase>,
    /// Phase ids awaiting a rating as of the last inspect.
    pub unevaluated: Vec<PhaseId>,
    /// Set when the session was discovered rather than created by this client,
    /// so phases reported by the service may predate any local history.
    pub adopted: bool,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// A freshly uploaded root session.
    pub fn root(id: impl Into<SessionId>) -> Self {
        let id = id.into();
        Self {
            root_model: id.clone(),
            id,
            parent: None,
            status: SessionStatus::Created,
            configuration: None,
            phases: Vec::new(),
            unevaluated: Vec::new(),
            adopted: false,
            created_at: Utc::now(),
        }
    }

    /// A root session this client did not create.
    pub fn adopted(id: impl Into<SessionId>) -> Self {
        Self {
            adopted: true,
            ..Self::root(id)
        }
    }

    /// A branch of `source` under a newly minted id.
    pub fn branch_of(source: &Session, id: impl Into<SessionId>) -> Self {
        Self {
            id: id.into(),
            root_model: source.root_model.clone(),
            parent: Some(source.id.clone()),
            status: SessionStatus::Created,
            configuration: None,
            phases: Vec::new(),
            unevaluated: Vec::new(),
            adopted: false,
            created_at: Utc::now(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn phase(&self, id: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.id == id)
    }

    pub fn phase_mut(&mut self, id: &str) -> Option<&mut Phase> {
        self.phases.iter_mut().find(|p| p.id == id)
    }

    /// Whether `id` was reported unevaluated by the last inspect and has not
    /// been rated since.
    pub fn awaits_rating(&self, id: &str) -> bool {
        self.unevaluated.iter().any(|p| p == id)
    }

    /// Drop the pending configuration and every phase, returning to `Created`.
    pub fn clear(&mut self) {
        self.configuration = None;
        self.phases.clear();
        self.unevaluated.clear();
        self.status = SessionStatus::Created;
    }
}

/// Lifecycle status of a session.
///
/// - `Created`: No configuration accepted yet (new roots, copies, resets)
/// - `Configured`: A configuration is pending and a run may be started
/// - `Running`: A run is in flight; only inspect and evaluate are allowed
/// - `Unreconciled`: A run was abandoned before its outcome was known; the
///   caller must inspect before doing anything else
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Configured,
    Running,
    Unreconciled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Configured => "configured",
            Self::Running => "running",
            Self::Unreconciled => "unreconciled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "configured" => Some(Self::Configured),
            "running" => Some(Self::Running),
            "unreconciled" => Some(Self::Unreconciled),
            _ => None,
        }
    }

    /// Whether configure, reset and copy are allowed.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Created | Self::Configured)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunOutcome {
    /// Phases produced by this run, in the order the service listed them.
    pub phase_ids: Vec<PhaseId>,
    /// Server-estimated optimum score in `[0, 1]`.
    pub assumed_optimal: f64,
}
