//! Local journal of sessions, lineage events and rating events.
//!
//! The journal lets one exploration span many CLI invocations. It mirrors the
//! controller's cached view; it is never consulted as an authority on which
//! phases exist remotely.

mod schema;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};

use crate::models::*;

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Journal path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_default() -> Result<Self> {
        Self::open(Self::default_path()?)
    }

    pub fn default_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "", "polyred")
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        Ok(dirs.data_dir().join("journal.db"))
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        schema::run_migrations(&conn)
    }

    // ============================================================
    // Session operations
    // ============================================================

    /// Insert or replace a session together with its phases.
    pub fn save_session(&self, session: &Session) -> Result<()> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        tx.execute(
            "INSERT INTO sessions (id, root_model, parent_id, status, configuration, unevaluated, adopted, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                configuration = excluded.configuration,
                unevaluated = excluded.unevaluated,
                adopted = excluded.adopted,
                updated_at = excluded.updated_at",
            (
                &session.id,
                &session.root_model,
                &session.parent,
                session.status.as_str(),
                encode_configuration(session.configuration.as_ref())?,
                serde_json::to_string(&session.unevaluated)?,
                session.adopted,
                session.created_at.to_rfc3339(),
                &now,
            ),
        )?;

        tx.execute("DELETE FROM phases WHERE session_id = ?", [&session.id])?;
        for (position, phase) in session.phases.iter().enumerate() {
            tx.execute(
                "INSERT INTO phases (session_id, id, position, configuration, computed, rating)
                 VALUES (?, ?, ?, ?, ?, ?)",
                (
                    &session.id,
                    &phase.id,
                    position as i64,
                    encode_configuration(phase.configuration.as_ref())?,
                    phase.computed,
                    phase.rating,
                ),
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn set_session_status(&self, id: &str, status: SessionStatus) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let updated = conn.execute(
            "UPDATE sessions SET status = ?, updated_at = ? WHERE id = ?",
            (status.as_str(), Utc::now().to_rfc3339(), id),
        )?;
        Ok(updated > 0)
    }

    pub fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let row = conn
            .query_row(
                "SELECT id, root_model, parent_id, status, configuration, unevaluated, adopted, created_at
                 FROM sessions WHERE id = ?",
                [id],
                session_row,
            )
            .optional()?;
        match row {
            Some(row) => Ok(Some(hydrate_session(&conn, row)?)),
            None => Ok(None),
        }
    }

    pub fn get_all_sessions(&self) -> Result<Vec<Session>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, root_model, parent_id, status, configuration, unevaluated, adopted, created_at
             FROM sessions ORDER BY created_at, id",
        )?;
        let rows = stmt
            .query_map([], session_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|row| hydrate_session(&conn, row))
            .collect()
    }

    // ============================================================
    // Lineage operations
    // ============================================================

    pub fn append_lineage_event(&self, edge: &LineageEdge) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "INSERT INTO lineage_events (parent_id, child_id, reason, recorded_at) VALUES (?, ?, ?, ?)",
            (
                &edge.parent,
                &edge.child,
                edge.reason.as_str(),
                edge.recorded_at.to_rfc3339(),
            ),
        )?;
        Ok(())
    }

    pub fn get_lineage_events(&self) -> Result<Vec<LineageEdge>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT parent_id, child_id, reason, recorded_at FROM lineage_events ORDER BY seq",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(parent, child, reason, recorded_at)| {
                let reason = BranchReason::from_str(&reason)
                    .ok_or_else(|| anyhow::anyhow!("Unknown branch reason '{}'", reason))?;
                Ok(LineageEdge {
                    parent,
                    child,
                    reason,
                    recorded_at: parse_datetime(recorded_at),
                })
            })
            .collect()
    }

    // ============================================================
    // Rating operations
    // ============================================================

    pub fn append_rating_events(&self, events: &[RatingEvent]) -> Result<()> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;
        for event in events {
            tx.execute(
                "INSERT INTO rating_events (session_id, phase_id, configuration, rating, batch, recorded_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                (
                    &event.session_id,
                    &event.phase_id,
                    encode_configuration(event.configuration.as_ref())?,
                    event.rating,
                    event.batch as i64,
                    event.recorded_at.to_rfc3339(),
                ),
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Rating events in insertion order, optionally for one session only.
    pub fn get_rating_events(&self, session_id: Option<&str>) -> Result<Vec<RatingEvent>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT session_id, phase_id, configuration, rating, batch, recorded_at
             FROM rating_events
             WHERE ?1 IS NULL OR session_id = ?1
             ORDER BY seq",
        )?;
        let rows = stmt
            .query_map([session_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(session_id, phase_id, configuration, rating, batch, recorded_at)| {
                    Ok(RatingEvent {
                        session_id,
                        phase_id,
                        configuration: decode_configuration(configuration)?,
                        rating,
                        batch: batch as u64,
                        recorded_at: parse_datetime(recorded_at),
                    })
                },
            )
            .collect()
    }
}

// ============================================================
// Row helpers
// ============================================================

struct SessionRow {
    id: String,
    root_model: String,
    parent: Option<String>,
    status: String,
    configuration: Option<String>,
    unevaluated: String,
    adopted: bool,
    created_at: String,
}

fn session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        root_model: row.get(1)?,
        parent: row.get(2)?,
        status: row.get(3)?,
        configuration: row.get(4)?,
        unevaluated: row.get(5)?,
        adopted: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn hydrate_session(conn: &Connection, row: SessionRow) -> Result<Session> {
    let status = SessionStatus::from_str(&row.status)
        .ok_or_else(|| anyhow::anyhow!("Unknown session status '{}'", row.status))?;

    let mut stmt = conn.prepare(
        "SELECT id, configuration, computed, rating FROM phases
         WHERE session_id = ? ORDER BY position",
    )?;
    let phases = stmt
        .query_map([&row.id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, Option<String>>(1)?,
                r.get::<_, bool>(2)?,
                r.get::<_, Option<f64>>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|(id, configuration, computed, rating)| {
            Ok(Phase {
                id,
                configuration: decode_configuration(configuration)?,
                computed,
                rating,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Session {
        id: row.id,
        root_model: row.root_model,
        parent: row.parent,
        status,
        configuration: decode_configuration(row.configuration)?,
        phases,
        unevaluated: serde_json::from_str(&row.unevaluated)?,
        adopted: row.adopted,
        created_at: parse_datetime(row.created_at),
    })
}

fn encode_configuration(configuration: Option<&Configuration>) -> Result<Option<String>> {
    Ok(configuration.map(serde_json::to_string).transpose()?)
}

fn decode_configuration(raw: Option<String>) -> Result<Option<Configuration>> {
    Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
}

fn parse_datetime(s: String) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
