use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SessionId;

/// Why a lineage edge exists.
///
/// A copy mints a new session id; a reset keeps the id and only clears state.
/// Both are recorded so lineage consumers can tell "same session, cleared"
/// from "new independent branch".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BranchReason {
    Copy,
    Reset,
}

impl BranchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Reset => "reset",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "copy" => Some(Self::Copy),
            "reset" => Some(Self::Reset),
            _ => None,
        }
    }
}

impl fmt::Display for BranchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A branching event. For resets `parent == child`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineageEdge {
    pub parent: SessionId,
    pub child: SessionId,
    pub reason: BranchReason,
    pub recorded_at: DateTime<Utc>,
}

impl LineageEdge {
    pub fn copy(parent: impl Into<SessionId>, child: impl Into<SessionId>) -> Self {
        Self {
            parent: parent.into(),
            child: child.into(),
            reason: BranchReason::Copy,
            recorded_at: Utc::now(),
        }
    }

    pub fn reset(session: impl Into<SessionId>) -> Self {
        let session = session.into();
        Self {
            parent: session.clone(),
            child: session,
            reason: BranchReason::Reset,
            recorded_at: Utc::now(),
        }
    }
}
