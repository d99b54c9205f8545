use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::db::Database;
use crate::models::{Session, SessionId, SessionStatus};

/// Marks a session `Unreconciled` if the run future holding it is dropped
/// before the service answered.
pub(super) struct RunGuard {
    sessions: Arc<Mutex<HashMap<SessionId, Session>>>,
    journal: Option<Database>,
    session_id: SessionId,
    armed: bool,
}

impl RunGuard {
    pub(super) fn new(
        sessions: Arc<Mutex<HashMap<SessionId, Session>>>,
        journal: Option<Database>,
        session_id: &str,
    ) -> Self {
        Self {
            sessions,
            journal,
            session_id: session_id.to_string(),
            armed: true,
        }
    }

    /// The run settled one way or the other; the caller owns the outcome now.
    pub(super) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        // Drop may run while unwinding; never panic on a poisoned lock here.
        let Ok(mut sessions) = self.sessions.lock() else {
            return;
        };
        let Some(session) = sessions.get_mut(&self.session_id) else {
            return;
        };
        if session.status != SessionStatus::Running {
            return;
        }
        session.status = SessionStatus::Unreconciled;
        drop(sessions);

        tracing::warn!(session = %self.session_id, "run abandoned before completion, inspect to reconcile");
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.set_session_status(&self.session_id, SessionStatus::Unreconciled) {
                tracing::error!(session = %self.session_id, error = %e, "failed to journal abandoned run");
            }
        }
    }
}
