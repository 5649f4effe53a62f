//! presence-store — SQLite persistence for the presence tracker.
//!
//! [`Db`] implements every storage trait the reconciliation engine needs:
//! the open-session store (`active_presence`), the append-only visit
//! ledger (`attendance_log`), the person/zone directory, and the
//! unknown-face sink. A closed session moves from `active_presence` into
//! `attendance_log` inside one transaction, so the close and the ledger
//! append land together or not at all.

pub mod schema;

use chrono::{DateTime, Utc};
use presence_core::matcher::EnrolledFace;
use presence_core::store::{Directory, SessionStore, StoreError, UnknownSink, VisitLedger};
use presence_core::types::{AnomalyKind, CompletedVisit, Descriptor, Identity, PresenceSession};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

/// SQLite-backed presence database.
///
/// The connection sits behind a mutex: every check-then-act sequence runs
/// single-writer, and the unique index on `active_presence` backs the
/// open-session invariant at the storage level as well.
pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    /// Open (or create) the database at the given path, with WAL mode,
    /// foreign keys, and the schema initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(StoreError::backend)?;
        }

        let conn = Connection::open(path).map_err(StoreError::backend)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(StoreError::backend)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(StoreError::backend)?;
        schema::init_schema(&conn).map_err(StoreError::backend)?;

        tracing::info!(path = %path.display(), "presence database initialized");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(StoreError::backend)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(StoreError::backend)?;
        schema::init_schema(&conn).map_err(StoreError::backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn add_student(&self, student_id: i64, name: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO students (student_id, name) VALUES (?1, ?2)",
            params![student_id, name],
        )
        .map_err(StoreError::backend)?;
        Ok(())
    }

    pub fn add_teacher(&self, teacher_id: i64, name: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO teachers (teacher_id, name) VALUES (?1, ?2)",
            params![teacher_id, name],
        )
        .map_err(StoreError::backend)?;
        Ok(())
    }

    pub fn add_zone(&self, zone_id: i64, name: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO zones (zone_id, zone_name) VALUES (?1, ?2)",
            params![zone_id, name],
        )
        .map_err(StoreError::backend)?;
        Ok(())
    }

    /// Store one enrolled descriptor for a person. A person may have
    /// several, one per enrollment photo.
    pub fn enroll_descriptor(
        &self,
        identity: &Identity,
        descriptor: &Descriptor,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO face_descriptors (person_type, person_id, descriptor)
             VALUES (?1, ?2, ?3)",
            params![
                identity.person_type(),
                identity.person_id(),
                descriptor_to_blob(descriptor)
            ],
        )
        .map_err(StoreError::backend)?;
        Ok(())
    }

    /// Load the full enrolled gallery for the matcher.
    pub fn load_gallery(&self) -> Result<Vec<EnrolledFace>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut gallery = Vec::new();

        let mut stmt = conn
            .prepare(
                "SELECT f.person_type, f.person_id, s.name, f.descriptor
                 FROM face_descriptors f
                 JOIN students s ON f.person_type = 'student' AND s.student_id = f.person_id",
            )
            .map_err(StoreError::backend)?;
        collect_gallery_rows(&mut stmt, &mut gallery)?;

        let mut stmt = conn
            .prepare(
                "SELECT f.person_type, f.person_id, t.name, f.descriptor
                 FROM face_descriptors f
                 JOIN teachers t ON f.person_type = 'teacher' AND t.teacher_id = f.person_id",
            )
            .map_err(StoreError::backend)?;
        collect_gallery_rows(&mut stmt, &mut gallery)?;

        tracing::debug!(descriptors = gallery.len(), "enrolled gallery loaded");
        Ok(gallery)
    }

    /// Number of currently open sessions across all zones.
    pub fn open_session_count(&self) -> Result<i64, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM active_presence", [], |row| row.get(0))
            .map_err(StoreError::backend)
    }

    /// Number of unknown-face sightings still awaiting review.
    pub fn pending_unknown_count(&self) -> Result<i64, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM unknown_faces WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )
        .map_err(StoreError::backend)
    }
}

impl SessionStore for Db {
    fn find_open(
        &self,
        identity: &Identity,
        zone_id: i64,
    ) -> Result<Option<PresenceSession>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT session_id, person_type, person_id, zone_id, entry_time
                 FROM active_presence
                 WHERE person_type = ?1 AND person_id = ?2 AND zone_id = ?3",
                params![identity.person_type(), identity.person_id(), zone_id],
                session_row,
            )
            .optional()
            .map_err(StoreError::backend)?;
        row.map(session_from_parts).transpose()
    }

    fn open(
        &self,
        identity: &Identity,
        zone_id: i64,
        entry_time: DateTime<Utc>,
    ) -> Result<PresenceSession, StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(StoreError::backend)?;

        let already_open: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM active_presence
                 WHERE person_type = ?1 AND person_id = ?2 AND zone_id = ?3",
                params![identity.person_type(), identity.person_id(), zone_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::backend)?;
        if already_open.is_some() {
            return Err(StoreError::Conflict {
                identity: identity.clone(),
                zone_id,
            });
        }

        let session = PresenceSession::open(identity.clone(), zone_id, entry_time);
        tx.execute(
            "INSERT INTO active_presence (session_id, person_type, person_id, zone_id, entry_time)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.session_id.to_string(),
                identity.person_type(),
                identity.person_id(),
                zone_id,
                entry_time.to_rfc3339()
            ],
        )
        .map_err(|err| map_constraint(err, identity, zone_id))?;
        tx.commit().map_err(StoreError::backend)?;
        Ok(session)
    }

    fn close(
        &self,
        session_id: Uuid,
        exit_time: DateTime<Utc>,
    ) -> Result<CompletedVisit, StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(StoreError::backend)?;

        let row = tx
            .query_row(
                "SELECT session_id, person_type, person_id, zone_id, entry_time
                 FROM active_presence WHERE session_id = ?1",
                params![session_id.to_string()],
                session_row,
            )
            .optional()
            .map_err(StoreError::backend)?
            .ok_or(StoreError::SessionNotFound(session_id))?;
        let session = session_from_parts(row)?;

        let visit = CompletedVisit::from_session(&session, exit_time);
        tx.execute(
            "INSERT INTO attendance_log
                 (person_type, person_id, zone_id, entry_time, exit_time, duration_minutes, anomaly)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                visit.identity.person_type(),
                visit.identity.person_id(),
                visit.zone_id,
                visit.entry_time.map(|t| t.to_rfc3339()),
                visit.exit_time.to_rfc3339(),
                visit.duration_minutes,
                visit.anomaly.map(|a| a.to_string()),
            ],
        )
        .map_err(StoreError::backend)?;
        tx.execute(
            "DELETE FROM active_presence WHERE session_id = ?1",
            params![session_id.to_string()],
        )
        .map_err(StoreError::backend)?;

        tx.commit().map_err(StoreError::backend)?;
        Ok(visit)
    }

    fn active_in_zone(&self, zone_id: i64) -> Result<Vec<PresenceSession>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT session_id, person_type, person_id, zone_id, entry_time
                 FROM active_presence WHERE zone_id = ?1 ORDER BY entry_time",
            )
            .map_err(StoreError::backend)?;
        let rows = stmt
            .query_map(params![zone_id], session_row)
            .map_err(StoreError::backend)?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(session_from_parts(row.map_err(StoreError::backend)?)?);
        }
        Ok(sessions)
    }
}

impl VisitLedger for Db {
    fn append(&self, visit: &CompletedVisit) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO attendance_log
                 (person_type, person_id, zone_id, entry_time, exit_time, duration_minutes, anomaly)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                visit.identity.person_type(),
                visit.identity.person_id(),
                visit.zone_id,
                visit.entry_time.map(|t| t.to_rfc3339()),
                visit.exit_time.to_rfc3339(),
                visit.duration_minutes,
                visit.anomaly.map(|a| a.to_string()),
            ],
        )
        .map_err(StoreError::backend)?;
        Ok(())
    }

    fn recent_visits(&self, zone_id: i64, limit: usize) -> Result<Vec<CompletedVisit>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT person_type, person_id, zone_id, entry_time, exit_time,
                        duration_minutes, anomaly
                 FROM attendance_log WHERE zone_id = ?1
                 ORDER BY exit_time DESC LIMIT ?2",
            )
            .map_err(StoreError::backend)?;
        let rows = stmt
            .query_map(params![zone_id, limit as i64], visit_row)
            .map_err(StoreError::backend)?;
        collect_visits(rows)
    }

    fn visits_for_identity(
        &self,
        identity: &Identity,
        limit: usize,
    ) -> Result<Vec<CompletedVisit>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT person_type, person_id, zone_id, entry_time, exit_time,
                        duration_minutes, anomaly
                 FROM attendance_log WHERE person_type = ?1 AND person_id = ?2
                 ORDER BY exit_time DESC LIMIT ?3",
            )
            .map_err(StoreError::backend)?;
        let rows = stmt
            .query_map(
                params![identity.person_type(), identity.person_id(), limit as i64],
                visit_row,
            )
            .map_err(StoreError::backend)?;
        collect_visits(rows)
    }
}

impl Directory for Db {
    fn identity_exists(&self, identity: &Identity) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let sql = match identity {
            Identity::Student(_) => "SELECT 1 FROM students WHERE student_id = ?1",
            Identity::Teacher(_) => "SELECT 1 FROM teachers WHERE teacher_id = ?1",
        };
        let found: Option<i64> = conn
            .query_row(sql, params![identity.person_id()], |row| row.get(0))
            .optional()
            .map_err(StoreError::backend)?;
        Ok(found.is_some())
    }

    fn zone_exists(&self, zone_id: i64) -> Result<bool, StoreError> {
        Ok(self.zone_name(zone_id)?.is_some())
    }

    fn zone_name(&self, zone_id: i64) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT zone_name FROM zones WHERE zone_id = ?1",
            params![zone_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(StoreError::backend)
    }
}

impl UnknownSink for Db {
    fn record_unknown_sighting(
        &self,
        descriptor: &Descriptor,
        image_ref: Option<&str>,
        zone_id: i64,
        observed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO unknown_faces (zone_id, descriptor, image_ref, detected_time, status)
             VALUES (?1, ?2, ?3, ?4, 'pending')",
            params![
                zone_id,
                descriptor_to_blob(descriptor),
                image_ref,
                observed_at.to_rfc3339()
            ],
        )
        .map_err(StoreError::backend)?;
        Ok(())
    }
}

// --- Row conversion helpers ---

type SessionParts = (String, String, i64, i64, String);
type VisitParts = (String, i64, i64, Option<String>, String, Option<i64>, Option<String>);

fn session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionParts> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn visit_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<VisitParts> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn session_from_parts(parts: SessionParts) -> Result<PresenceSession, StoreError> {
    let (session_id, person_type, person_id, zone_id, entry_time) = parts;
    Ok(PresenceSession {
        session_id: Uuid::parse_str(&session_id).map_err(StoreError::backend)?,
        identity: identity_from_parts(&person_type, person_id)?,
        zone_id,
        entry_time: parse_ts(&entry_time)?,
        exit_time: None,
    })
}

fn visit_from_parts(parts: VisitParts) -> Result<CompletedVisit, StoreError> {
    let (person_type, person_id, zone_id, entry_time, exit_time, duration_minutes, anomaly) = parts;
    Ok(CompletedVisit {
        identity: identity_from_parts(&person_type, person_id)?,
        zone_id,
        entry_time: entry_time.as_deref().map(parse_ts).transpose()?,
        exit_time: parse_ts(&exit_time)?,
        duration_minutes,
        anomaly: anomaly.as_deref().map(anomaly_from_tag).transpose()?,
    })
}

fn collect_visits(
    rows: impl Iterator<Item = rusqlite::Result<VisitParts>>,
) -> Result<Vec<CompletedVisit>, StoreError> {
    let mut visits = Vec::new();
    for row in rows {
        visits.push(visit_from_parts(row.map_err(StoreError::backend)?)?);
    }
    Ok(visits)
}

fn collect_gallery_rows(
    stmt: &mut rusqlite::Statement<'_>,
    gallery: &mut Vec<EnrolledFace>,
) -> Result<(), StoreError> {
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Vec<u8>>(3)?,
            ))
        })
        .map_err(StoreError::backend)?;
    for row in rows {
        let (person_type, person_id, name, blob) = row.map_err(StoreError::backend)?;
        gallery.push(EnrolledFace {
            identity: identity_from_parts(&person_type, person_id)?,
            name,
            descriptor: descriptor_from_blob(&blob)?,
        });
    }
    Ok(())
}

fn identity_from_parts(person_type: &str, person_id: i64) -> Result<Identity, StoreError> {
    match person_type {
        "student" => Ok(Identity::Student(person_id)),
        "teacher" => Ok(Identity::Teacher(person_id)),
        other => Err(StoreError::Backend(format!(
            "unrecognized person_type in row: {other}"
        ))),
    }
}

fn anomaly_from_tag(tag: &str) -> Result<AnomalyKind, StoreError> {
    match tag {
        "exit_without_entry" => Ok(AnomalyKind::ExitWithoutEntry),
        other => Err(StoreError::Backend(format!(
            "unrecognized anomaly tag in row: {other}"
        ))),
    }
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(StoreError::backend)
}

/// Little-endian f32 encoding for descriptor blobs.
fn descriptor_to_blob(descriptor: &Descriptor) -> Vec<u8> {
    let mut blob = Vec::with_capacity(descriptor.values.len() * 4);
    for v in &descriptor.values {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

fn descriptor_from_blob(blob: &[u8]) -> Result<Descriptor, StoreError> {
    if blob.len() % 4 != 0 {
        return Err(StoreError::Backend(format!(
            "descriptor blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    let values = blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    Ok(Descriptor { values })
}

fn map_constraint(err: rusqlite::Error, identity: &Identity, zone_id: i64) -> StoreError {
    if let rusqlite::Error::SqliteFailure(e, _) = &err {
        if e.code == rusqlite::ErrorCode::ConstraintViolation {
            return StoreError::Conflict {
                identity: identity.clone(),
                zone_id,
            };
        }
    }
    StoreError::backend(err)
}
