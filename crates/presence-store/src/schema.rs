//! SQL DDL for the presence database.
//!
//! Defines the directory tables (`students`, `teachers`, `zones`,
//! `face_descriptors`), the open-session table (`active_presence`), the
//! append-only ledger (`attendance_log`), and the unknown-face review
//! queue (`unknown_faces`). All DDL uses `IF NOT EXISTS` for idempotent
//! initialization.

use rusqlite::Connection;

/// The schema version that the current binary expects.
pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA_SQL: &str = r#"
-- Enrolled people (students and teachers keep separate ID spaces)
CREATE TABLE IF NOT EXISTS students (
    student_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS teachers (
    teacher_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS zones (
    zone_id INTEGER PRIMARY KEY,
    zone_name TEXT NOT NULL
);

-- Enrolled face descriptors, one row per enrollment photo
CREATE TABLE IF NOT EXISTS face_descriptors (
    descriptor_id INTEGER PRIMARY KEY AUTOINCREMENT,
    person_type TEXT NOT NULL CHECK(person_type IN ('student','teacher')),
    person_id INTEGER NOT NULL,
    descriptor BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_descriptors_person
    ON face_descriptors(person_type, person_id);

-- Currently-open presence sessions. A row exists only while the session
-- is open; closing moves it into attendance_log. The unique index is the
-- storage-level guarantee of "at most one open session per person+zone".
CREATE TABLE IF NOT EXISTS active_presence (
    session_id TEXT PRIMARY KEY,
    person_type TEXT NOT NULL CHECK(person_type IN ('student','teacher')),
    person_id INTEGER NOT NULL,
    zone_id INTEGER NOT NULL REFERENCES zones(zone_id),
    entry_time TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_active_presence_key
    ON active_presence(person_type, person_id, zone_id);

-- Append-only completed-visit ledger. entry_time and duration_minutes are
-- NULL only for anomalous exit-without-entry rows.
CREATE TABLE IF NOT EXISTS attendance_log (
    log_id INTEGER PRIMARY KEY AUTOINCREMENT,
    person_type TEXT NOT NULL CHECK(person_type IN ('student','teacher')),
    person_id INTEGER NOT NULL,
    zone_id INTEGER NOT NULL,
    entry_time TEXT,
    exit_time TEXT NOT NULL,
    duration_minutes INTEGER,
    anomaly TEXT
);

CREATE INDEX IF NOT EXISTS idx_attendance_zone_exit
    ON attendance_log(zone_id, exit_time);
CREATE INDEX IF NOT EXISTS idx_attendance_person
    ON attendance_log(person_type, person_id);

-- Unknown faces awaiting review
CREATE TABLE IF NOT EXISTS unknown_faces (
    unknown_id INTEGER PRIMARY KEY AUTOINCREMENT,
    zone_id INTEGER NOT NULL,
    descriptor BLOB NOT NULL,
    image_ref TEXT,
    detected_time TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all tables. Idempotent (uses IF NOT EXISTS) and records the
/// schema version on first creation.
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

/// Read the stored schema version.
pub fn schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'schema_version'",
        [],
        |row| {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().unwrap_or(0))
        },
    )
}
