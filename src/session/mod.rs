//! Session controller: the configure → run → inspect → evaluate state machine.
//!
//! The controller owns every [`Session`] it created or adopted. Its view of
//! phases is a **cache** of server state: `inspect` is the only way to learn
//! which phases currently await a rating, and `evaluate` only accepts phases
//! that the latest inspect reported.
//!
//! # Concurrency
//!
//! The controller is cheap to clone and can drive many sessions from many
//! tasks. Mutual exclusion per session comes from the state machine itself:
//! `run` moves a session to `Running`, and every conflicting operation checks
//! the status before touching the network. The internal lock is never held
//! across an await.
//!
//! # Cancellation
//!
//! Dropping a `run` future before it resolves leaves the session
//! `Unreconciled`, as does a run whose outcome never arrived (timeout, lost
//! connection). Only `inspect` is accepted in that state; it adopts whatever
//! phases the service reports and settles the session again.

mod guard;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::client::PolyredClient;
use crate::db::Database;
use crate::error::{Error, Result, TransportError};
use crate::feedback::FeedbackAggregator;
use crate::lineage::LineageTracker;
use crate::models::*;
use guard::RunGuard;

type SessionMap = Arc<Mutex<HashMap<SessionId, Session>>>;

/// Drives sessions against the service and keeps lineage and feedback current.
#[derive(Clone)]
pub struct SessionController {
    client: PolyredClient,
    sessions: SessionMap,
    lineage: LineageTracker,
    feedback: FeedbackAggregator,
    journal: Option<Database>,
}

impl SessionController {
    pub fn new(client: PolyredClient) -> Self {
        Self {
            client,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            lineage: LineageTracker::new(),
            feedback: FeedbackAggregator::new(),
            journal: None,
        }
    }

    /// Create a controller backed by a journal, restoring everything it holds.
    ///
    /// Sessions journaled as `Running` belonged to a process that never saw
    /// the run finish, so they come back `Unreconciled`.
    pub fn with_journal(client: PolyredClient, journal: Database) -> Result<Self> {
        let mut controller = Self::new(client);

        for edge in journal.get_lineage_events()? {
            controller.lineage.restore(edge)?;
        }
        controller.feedback.restore(journal.get_rating_events(None)?);

        {
            let mut sessions = controller.sessions.lock().expect("session lock poisoned");
            for mut session in journal.get_all_sessions()? {
                if session.status == SessionStatus::Running {
                    tracing::warn!(session = %session.id, "run was interrupted, session needs inspect");
                    session.status = SessionStatus::Unreconciled;
                    journal.set_session_status(&session.id, SessionStatus::Unreconciled)?;
                }
                controller.lineage.register_root(session.id.clone());
                sessions.insert(session.id.clone(), session);
            }
            tracing::debug!(count = sessions.len(), "restored sessions from journal");
        }

        controller.journal = Some(journal);
        Ok(controller)
    }

    pub fn client(&self) -> &PolyredClient {
        &self.client
    }

    pub fn lineage(&self) -> &LineageTracker {
        &self.lineage
    }

    pub fn feedback(&self) -> &FeedbackAggregator {
        &self.feedback
    }

    /// Snapshot of one session.
    pub fn session(&self, id: &str) -> Option<Session> {
        let sessions = self.sessions.lock().expect("session lock poisoned");
        sessions.get(id).cloned()
    }

    /// Snapshot of every session, oldest first.
    pub fn sessions(&self) -> Vec<Session> {
        let sessions = self.sessions.lock().expect("session lock poisoned");
        let mut all: Vec<_> = sessions.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    // ============================================================
    // Session creation
    // ============================================================

    /// Upload a reference model and register its root session.
    pub async fn upload(&self, bytes: Vec<u8>, file_name: &str) -> Result<Session> {
        let id = self.client.upload(bytes, file_name).await?;
        self.register_root(Session::root(id))
    }

    /// Read a model from disk, upload it and register its root session.
    pub async fn upload_file(&self, path: impl AsRef<Path>) -> Result<Session> {
        let id = self.client.upload_file(path).await?;
        self.register_root(Session::root(id))
    }

    /// Start tracking a session this client did not create.
    ///
    /// Already known sessions are returned unchanged.
    pub fn adopt(&self, id: &str) -> Result<Session> {
        if let Some(existing) = self.session(id) {
            return Ok(existing);
        }
        tracing::info!(session = id, "adopting session without local history");
        self.register_root(Session::adopted(id))
    }

    fn register_root(&self, session: Session) -> Result<Session> {
        {
            let mut sessions = self.sessions.lock().expect("session lock poisoned");
            if sessions.contains_key(&session.id) {
                return Err(Error::ProtocolViolation(format!(
                    "service issued session id {} twice",
                    session.id
                )));
            }
            sessions.insert(session.id.clone(), session.clone());
        }
        self.lineage.register_root(session.id.clone());
        self.persist_applied(&session);
        Ok(session)
    }

    // ============================================================
    // State machine
    // ============================================================

    /// Submit (or replace) the pending configuration.
    pub async fn configure(&self, id: &str, config: Configuration) -> Result<()> {
        config.validate()?;
        self.check(id, "configure", |s| s.status.is_settled())?;

        self.client.configure(id, &config).await?;

        let session = self.update(id, |s| {
            if !s.status.is_settled() {
                return Err(invalid_state(s, "configure"));
            }
            s.configuration = Some(config);
            s.status = SessionStatus::Configured;
            Ok(s.clone())
        })?;
        tracing::info!(session = id, "configuration accepted");
        self.persist_applied(&session);
        Ok(())
    }

    /// Run the simplification and wait for its terminal outcome.
    ///
    /// When the service refuses the run the session stays `Configured` and the
    /// call may be retried. When the outcome is unknown (timeout, lost
    /// connection, undecodable answer) the session becomes `Unreconciled`.
    pub async fn run(&self, id: &str) -> Result<RunOutcome> {
        let (configuration, snapshot) = self.update(id, |s| {
            if s.status != SessionStatus::Configured {
                return Err(invalid_state(s, "run"));
            }
            let configuration = s
                .configuration
                .clone()
                .ok_or_else(|| invalid_state(s, "run"))?;
            s.status = SessionStatus::Running;
            Ok((configuration, s.clone()))
        })?;
        if let Err(e) = self.persist(&snapshot) {
            // Nothing was sent yet.
            self.update(id, |s| {
                s.status = SessionStatus::Configured;
                Ok(())
            })?;
            return Err(e);
        }

        let guard = RunGuard::new(self.sessions.clone(), self.journal.clone(), id);
        tracing::info!(session = id, "run started");
        let result = self.client.run(id).await;
        guard.disarm();

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                let status = if run_was_refused(&e) {
                    SessionStatus::Configured
                } else {
                    SessionStatus::Unreconciled
                };
                tracing::warn!(session = id, error = %e, %status, "run failed");
                let session = self.update(id, |s| {
                    s.status = status;
                    Ok(s.clone())
                })?;
                self.persist_applied(&session);
                return Err(e);
            }
        };

        let applied = self.update(id, |s| {
            if let Err(e) = check_run_outcome(s, &outcome) {
                // The service computed something this client cannot place.
                s.status = SessionStatus::Unreconciled;
                return Err(e);
            }
            for phase_id in &outcome.phase_ids {
                s.phases
                    .push(Phase::computed(phase_id.clone(), Some(configuration.clone())));
            }
            s.status = SessionStatus::Configured;
            Ok(s.clone())
        });
        let session = match applied {
            Ok(session) => session,
            Err(e) => {
                if let Some(session) = self.session(id) {
                    self.persist_applied(&session);
                }
                return Err(e);
            }
        };

        tracing::info!(
            session = id,
            phases = outcome.phase_ids.len(),
            assumed_optimal = outcome.assumed_optimal,
            "run complete"
        );
        self.persist_applied(&session);
        Ok(outcome)
    }

    /// Ask the service which phases still await a rating and cache the answer.
    pub async fn inspect(&self, id: &str) -> Result<Vec<PhaseId>> {
        self.check(id, "inspect", |_| true)?;

        let ids = self.client.inspect(id).await?;

        let session = self.update(id, |s| {
            let mut seen = HashSet::new();
            if let Some(dup) = ids.iter().find(|p| !seen.insert(p.as_str())) {
                return Err(Error::ProtocolViolation(format!(
                    "inspect of {} listed phase {} twice",
                    s.id, dup
                )));
            }

            let reconciling = s.status == SessionStatus::Unreconciled;
            let running = s.status == SessionStatus::Running;
            let mut adopted = Vec::new();
            let mut cached = Vec::new();
            for phase_id in &ids {
                match s.phase(phase_id) {
                    Some(phase) if phase.is_rated() => {
                        return Err(Error::ProtocolViolation(format!(
                            "inspect of {} lists phase {} which was already rated",
                            s.id, phase_id
                        )));
                    }
                    Some(_) => cached.push(phase_id.clone()),
                    // Phases of the in-flight run arrive with its outcome.
                    None if running => {}
                    None if reconciling || s.adopted => {
                        let configuration = if reconciling {
                            s.configuration.clone()
                        } else {
                            None
                        };
                        adopted.push(Phase::computed(phase_id.clone(), configuration));
                        cached.push(phase_id.clone());
                    }
                    None => {
                        return Err(Error::ProtocolViolation(format!(
                            "inspect of {} lists phase {} never produced for this client",
                            s.id, phase_id
                        )));
                    }
                }
            }

            if !adopted.is_empty() {
                tracing::info!(session = %s.id, count = adopted.len(), "adopted phases from service");
            }
            s.phases.extend(adopted);
            s.unevaluated = cached;
            if reconciling {
                s.status = if s.configuration.is_some() {
                    SessionStatus::Configured
                } else {
                    SessionStatus::Created
                };
                tracing::info!(session = %s.id, status = %s.status, "session reconciled");
            }
            Ok(s.clone())
        })?;
        self.persist_applied(&session);
        Ok(ids)
    }

    /// Record human ratings for phases reported by the latest inspect.
    ///
    /// Phases missing from the latest inspect result are rejected before any
    /// network traffic.
    pub async fn evaluate(&self, id: &str, ratings: RatingSubmission) -> Result<Vec<RatingEvent>> {
        ratings.validate()?;
        self.update(id, |s| {
            if s.status == SessionStatus::Unreconciled {
                return Err(invalid_state(s, "evaluate"));
            }
            check_awaiting(s, &ratings)
        })?;

        self.client.evaluate(id, &ratings).await?;

        let (session, entries) = self.update(id, |s| {
            check_awaiting(s, &ratings)?;
            let mut entries = Vec::with_capacity(ratings.len());
            for (phase_id, score) in ratings.iter() {
                let configuration = match s.phase_mut(phase_id) {
                    Some(phase) => {
                        phase.rating = Some(score);
                        phase.configuration.clone()
                    }
                    None => None,
                };
                entries.push((phase_id.to_string(), configuration, score));
            }
            s.unevaluated
                .retain(|p| !ratings.phase_ids().any(|rated| rated == p.as_str()));
            Ok((s.clone(), entries))
        })?;

        let events = self.feedback.record_batch(id, entries);
        tracing::info!(session = id, count = events.len(), "ratings recorded");
        self.persist_applied(&session);
        self.journal_applied(id, |journal| journal.append_rating_events(&events));
        Ok(events)
    }

    /// Clear the session in place. The id is kept; phases and configuration
    /// are discarded (ratings already recorded stay in the aggregator).
    pub async fn reset(&self, id: &str) -> Result<SessionId> {
        self.check(id, "reset", |s| s.status.is_settled())?;

        let returned = self.client.reset(id).await?;
        if returned != id {
            return Err(Error::ProtocolViolation(format!(
                "reset of {} returned a different id {}",
                id, returned
            )));
        }

        let session = self.update(id, |s| {
            if !s.status.is_settled() {
                return Err(invalid_state(s, "reset"));
            }
            s.clear();
            Ok(s.clone())
        })?;
        let edge = self.lineage.record_reset(id);
        tracing::info!(session = id, "session reset");

        self.persist_applied(&session);
        self.journal_applied(id, |journal| journal.append_lineage_event(&edge));
        Ok(returned)
    }

    /// Fork the session into a new, independent branch. The source session is
    /// left untouched.
    pub async fn copy(&self, id: &str) -> Result<SessionId> {
        self.check(id, "copy", |s| s.status.is_settled())?;

        let new_id = self.client.copy(id).await?;

        let branch = {
            let mut sessions = self.sessions.lock().expect("session lock poisoned");
            if new_id.is_empty() || sessions.contains_key(&new_id) {
                return Err(Error::ProtocolViolation(format!(
                    "copy of {} returned already issued id '{}'",
                    id, new_id
                )));
            }
            let source = sessions
                .get(id)
                .ok_or_else(|| Error::UnknownSession(id.to_string()))?;
            let branch = Session::branch_of(source, new_id.clone());
            sessions.insert(new_id.clone(), branch.clone());
            branch
        };

        let edge = match self.lineage.record_copy(id, &new_id) {
            Ok(edge) => edge,
            Err(e) => {
                self.sessions
                    .lock()
                    .expect("session lock poisoned")
                    .remove(&new_id);
                return Err(e);
            }
        };
        tracing::info!(source = id, branch = %new_id, "session copied");

        self.persist_applied(&branch);
        self.journal_applied(&new_id, |journal| journal.append_lineage_event(&edge));
        Ok(new_id)
    }

    /// Configure, run and download once per ratio, applying the same ratio to
    /// every part. Results land in `out_dir` as `<session>_<mean ratio>.fbx`.
    ///
    /// Stops at the first failure; files written before it are kept.
    pub async fn sweep(
        &self,
        id: &str,
        parts: &[String],
        ratios: &[f64],
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        if parts.is_empty() {
            return Err(Error::Validation("sweep needs at least one part".to_string()));
        }
        let mut written = Vec::with_capacity(ratios.len());
        for &ratio in ratios {
            let config: Configuration = parts.iter().map(|part| (part.as_str(), ratio)).collect();
            let mean = config.mean_ratio().unwrap_or(ratio);
            self.configure(id, config).await?;
            self.run(id).await?;

            let path = out_dir.join(format!("{}_{:.2}.fbx", id, mean));
            let mut file = tokio::fs::File::create(&path)
                .await
                .map_err(TransportError::Sink)?;
            let bytes = self.client.download_model(id, &mut file).await?;
            tracing::info!(session = id, ratio = mean, bytes, path = %path.display(), "sweep step done");
            written.push(path);
        }
        Ok(written)
    }

    /// Export the ratings and lineage of one session.
    pub fn export(&self, id: &str) -> Result<SessionExport> {
        let session = self
            .session(id)
            .ok_or_else(|| Error::UnknownSession(id.to_string()))?;
        Ok(self
            .feedback
            .export(&session.id, &session.root_model, &self.lineage))
    }

    // ============================================================
    // Helpers
    // ============================================================

    fn check(&self, id: &str, operation: &'static str, allowed: impl Fn(&Session) -> bool) -> Result<()> {
        self.update(id, |s| {
            if allowed(s) {
                Ok(())
            } else {
                Err(invalid_state(s, operation))
            }
        })
    }

    /// Apply `f` to a session under the lock. Errors leave the map untouched
    /// unless `f` itself mutated before failing.
    fn update<R>(&self, id: &str, f: impl FnOnce(&mut Session) -> Result<R>) -> Result<R> {
        let mut sessions = self.sessions.lock().expect("session lock poisoned");
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| Error::UnknownSession(id.to_string()))?;
        f(session)
    }

    fn persist(&self, session: &Session) -> Result<()> {
        if let Some(journal) = &self.journal {
            journal.save_session(session)?;
        }
        Ok(())
    }

    /// Journal a change the service has already accepted. The operation
    /// succeeded, so a journal failure is logged instead of returned.
    fn persist_applied(&self, session: &Session) {
        self.journal_applied(&session.id, |journal| journal.save_session(session));
    }

    fn journal_applied(&self, session: &str, write: impl FnOnce(&Database) -> anyhow::Result<()>) {
        if let Some(journal) = &self.journal {
            if let Err(e) = write(journal) {
                tracing::error!(session, error = %e, "journal is behind the service");
            }
        }
    }
}

/// Whether the service answered a run with a refusal, so nothing was computed.
fn run_was_refused(error: &Error) -> bool {
    matches!(
        error,
        Error::RemoteRejection { .. } | Error::Transport(TransportError::Unauthorized)
    )
}

fn invalid_state(session: &Session, operation: &'static str) -> Error {
    Error::InvalidState {
        session: session.id.clone(),
        operation,
        status: session.status,
    }
}

fn check_awaiting(session: &Session, ratings: &RatingSubmission) -> Result<()> {
    for phase_id in ratings.phase_ids() {
        if !session.awaits_rating(phase_id) {
            let reason = match session.phase(phase_id) {
                Some(phase) if phase.is_rated() => "was already rated",
                Some(_) => "was not reported by the latest inspect",
                None => "is unknown",
            };
            return Err(Error::Validation(format!(
                "phase {} of session {} {}",
                phase_id, session.id, reason
            )));
        }
    }
    Ok(())
}

fn check_run_outcome(session: &Session, outcome: &RunOutcome) -> Result<()> {
    let optimal = outcome.assumed_optimal;
    if !optimal.is_finite() || !(0.0..=1.0).contains(&optimal) {
        return Err(Error::ProtocolViolation(format!(
            "run of {} reported assumed optimum {} outside [0, 1]",
            session.id, optimal
        )));
    }
    let mut seen = HashSet::new();
    for phase_id in &outcome.phase_ids {
        if !seen.insert(phase_id.as_str()) || session.phase(phase_id).is_some() {
            return Err(Error::ProtocolViolation(format!(
                "run of {} reported phase {} more than once",
                session.id, phase_id
            )));
        }
    }
    Ok(())
}
