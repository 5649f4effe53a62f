use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// An enrolled person, tagged by directory table.
///
/// Students and teachers live in separate directory tables and share an
/// integer ID space, so the variant is part of the key everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "person_type", content = "person_id", rename_all = "snake_case")]
pub enum Identity {
    Student(i64),
    Teacher(i64),
}

impl Identity {
    /// Stable lowercase tag used in storage and logs.
    pub fn person_type(&self) -> &'static str {
        match self {
            Identity::Student(_) => "student",
            Identity::Teacher(_) => "teacher",
        }
    }

    pub fn person_id(&self) -> i64 {
        match self {
            Identity::Student(id) | Identity::Teacher(id) => *id,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.person_type(), self.person_id())
    }
}

/// Which side of the zone boundary a camera watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraRole {
    Entry,
    Exit,
}

impl fmt::Display for CameraRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraRole::Entry => f.write_str("entry"),
            CameraRole::Exit => f.write_str("exit"),
        }
    }
}

/// Face descriptor vector (128-dimensional in the reference pipeline).
///
/// Produced by the external matcher; the core only needs distances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Euclidean distance to another descriptor. Lower = more similar;
    /// the default match tolerance is 0.6 in this space.
    pub fn distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One face-match event from a camera detection cycle. Transient — never
/// persisted as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sighting {
    /// Matched identity, or `None` for an unrecognized face.
    pub identity: Option<Identity>,
    pub zone_id: i64,
    pub role: CameraRole,
    pub observed_at: DateTime<Utc>,
    /// Match confidence in [0, 1] (1 - descriptor distance).
    pub confidence: f32,
    /// Raw descriptor, required for unknown-face deduplication.
    pub descriptor: Option<Descriptor>,
    /// Reference to a captured face crop, if the pipeline saved one.
    pub image_ref: Option<String>,
}

/// One continuous visit: open while `exit_time` is `None`.
///
/// At most one open session may exist per (identity, zone) — the session
/// store enforces this under any interleaving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceSession {
    pub session_id: Uuid,
    pub identity: Identity,
    pub zone_id: i64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
}

impl PresenceSession {
    /// Start a new open session at the given entry time.
    pub fn open(identity: Identity, zone_id: i64, entry_time: DateTime<Utc>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            identity,
            zone_id,
            entry_time,
            exit_time: None,
        }
    }
}

/// Why a completed-visit record is not a clean entry/exit pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// An Exit sighting arrived with no open session to close.
    ExitWithoutEntry,
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnomalyKind::ExitWithoutEntry => f.write_str("exit_without_entry"),
        }
    }
}

/// Immutable ledger row for one closed (or anomalous) visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedVisit {
    pub identity: Identity,
    pub zone_id: i64,
    /// `None` only for an exit-without-entry anomaly.
    pub entry_time: Option<DateTime<Utc>>,
    pub exit_time: DateTime<Utc>,
    /// Rounded to the nearest minute; `None` when `entry_time` is unknown.
    pub duration_minutes: Option<i64>,
    pub anomaly: Option<AnomalyKind>,
}

impl CompletedVisit {
    /// Build the ledger row for a cleanly closed session.
    pub fn from_session(session: &PresenceSession, exit_time: DateTime<Utc>) -> Self {
        Self {
            identity: session.identity.clone(),
            zone_id: session.zone_id,
            entry_time: Some(session.entry_time),
            exit_time,
            duration_minutes: Some(duration_minutes(session.entry_time, exit_time)),
            anomaly: None,
        }
    }

    /// Build the exit-only anomaly row for an Exit with no open session.
    pub fn anomalous_exit(identity: Identity, zone_id: i64, exit_time: DateTime<Utc>) -> Self {
        Self {
            identity,
            zone_id,
            entry_time: None,
            exit_time,
            duration_minutes: None,
            anomaly: Some(AnomalyKind::ExitWithoutEntry),
        }
    }
}

/// Visit duration rounded to the nearest minute, clamped at zero so a
/// skewed camera clock can never produce a negative duration.
pub fn duration_minutes(entry: DateTime<Utc>, exit: DateTime<Utc>) -> i64 {
    let secs = (exit - entry).num_seconds();
    ((secs as f64 / 60.0).round() as i64).max(0)
}

/// Why a sighting never reached the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressReason {
    /// Same (identity, camera role) logged within the known-face cooldown.
    RecentDuplicate,
}

/// Outcome of the unmatched-sighting path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownOutcome {
    /// New unknown face; handed to the capture collaborator.
    Logged,
    /// Matched a recently seen unknown descriptor; not re-logged.
    DuplicateSuppressed,
    /// Unmatched sighting carried no descriptor, so nothing to dedup or log.
    NoDescriptor,
}

/// What the engine decided for one sighting. "Already present" and
/// "anomalous exit" are outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconciliationResult {
    /// A new session was opened by an Entry sighting.
    Opened { session: PresenceSession },
    /// An Entry sighting found the person already present; the existing
    /// open session is returned unchanged.
    Reaffirmed { session: PresenceSession },
    /// An Exit sighting closed the open session and appended the visit.
    Closed { visit: CompletedVisit },
    /// Exit with no open session, recorded per the anomaly policy.
    AnomalousExit { visit: CompletedVisit },
    /// Suppressed before the state machine (recency filter).
    Suppressed { reason: SuppressReason },
    /// Unmatched-face path outcome.
    Unknown { disposition: UnknownOutcome },
}
