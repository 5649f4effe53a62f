//! Storage seams for the reconciliation engine.
//!
//! The engine only sees traits: the session store (open sessions), the
//! append-only visit ledger, the person/zone directory, and the sink for
//! unknown-face captures. [`MemoryBackend`] implements all four behind a
//! single mutex and is what the engine tests run against; the SQLite
//! implementation lives in `presence-store`.

use crate::types::{CompletedVisit, Descriptor, Identity, PresenceSession};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    /// An open session already exists for this (identity, zone) key.
    /// Unreachable through the engine, which reaffirms instead of
    /// re-opening; surfaced to callers using the store directly.
    #[error("open session already exists for {identity} in zone {zone_id}")]
    Conflict { identity: Identity, zone_id: i64 },

    #[error("no open session with id {0}")]
    SessionNotFound(Uuid),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Wrap a backend-specific failure (e.g. a SQLite error).
    pub fn backend(err: impl std::fmt::Display) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// The set of currently-open sessions, keyed by (identity, zone).
///
/// `open` and `close` must be atomic with respect to the one-open-session
/// invariant under any interleaving of camera feeds.
pub trait SessionStore {
    fn find_open(
        &self,
        identity: &Identity,
        zone_id: i64,
    ) -> Result<Option<PresenceSession>, StoreError>;

    /// Open a new session. Fails with [`StoreError::Conflict`] if one is
    /// already open for the key.
    fn open(
        &self,
        identity: &Identity,
        zone_id: i64,
        entry_time: DateTime<Utc>,
    ) -> Result<PresenceSession, StoreError>;

    /// Close the open session and append the resulting visit to the ledger
    /// as one atomic unit — a ledger failure must leave the session open.
    fn close(
        &self,
        session_id: Uuid,
        exit_time: DateTime<Utc>,
    ) -> Result<CompletedVisit, StoreError>;

    /// All open sessions in a zone, for presence reporting.
    fn active_in_zone(&self, zone_id: i64) -> Result<Vec<PresenceSession>, StoreError>;
}

/// Append-only log of completed visits. No update, no delete.
pub trait VisitLedger {
    /// Append a visit row directly — used for anomaly records that have no
    /// session to close (clean closes go through [`SessionStore::close`]).
    fn append(&self, visit: &CompletedVisit) -> Result<(), StoreError>;

    /// Most recent visits for a zone, newest first.
    fn recent_visits(&self, zone_id: i64, limit: usize) -> Result<Vec<CompletedVisit>, StoreError>;

    /// Most recent visits for one person across all zones, newest first.
    fn visits_for_identity(
        &self,
        identity: &Identity,
        limit: usize,
    ) -> Result<Vec<CompletedVisit>, StoreError>;
}

/// Existence checks against the enrolled-person and zone directory.
pub trait Directory {
    fn identity_exists(&self, identity: &Identity) -> Result<bool, StoreError>;
    fn zone_exists(&self, zone_id: i64) -> Result<bool, StoreError>;
    fn zone_name(&self, zone_id: i64) -> Result<Option<String>, StoreError>;
}

/// Collaborator that records unknown-face sightings for later review.
pub trait UnknownSink {
    fn record_unknown_sighting(
        &self,
        descriptor: &Descriptor,
        image_ref: Option<&str>,
        zone_id: i64,
        observed_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Everything the engine needs from storage, as one bound.
pub trait Backend: SessionStore + VisitLedger + Directory + UnknownSink {}

impl<T: SessionStore + VisitLedger + Directory + UnknownSink> Backend for T {}

/// A recorded unknown-face sighting (in-memory backend only; the SQLite
/// backend persists these to the `unknown_faces` table).
#[derive(Debug, Clone)]
pub struct UnknownRecord {
    pub descriptor: Descriptor,
    pub image_ref: Option<String>,
    pub zone_id: i64,
    pub observed_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryInner {
    people: HashMap<Identity, String>,
    zones: HashMap<i64, String>,
    open: HashMap<(Identity, i64), PresenceSession>,
    visits: Vec<CompletedVisit>,
    unknowns: Vec<UnknownRecord>,
}

/// In-memory backend. One mutex guards the whole state, so every
/// check-then-act sequence is single-writer by construction.
#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<MemoryInner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_person(&self, identity: Identity, name: &str) {
        self.inner.lock().unwrap().people.insert(identity, name.to_string());
    }

    pub fn add_zone(&self, zone_id: i64, name: &str) {
        self.inner.lock().unwrap().zones.insert(zone_id, name.to_string());
    }

    /// Snapshot of recorded unknown sightings, for assertions.
    pub fn unknown_records(&self) -> Vec<UnknownRecord> {
        self.inner.lock().unwrap().unknowns.clone()
    }
}

impl SessionStore for MemoryBackend {
    fn find_open(
        &self,
        identity: &Identity,
        zone_id: i64,
    ) -> Result<Option<PresenceSession>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.open.get(&(identity.clone(), zone_id)).cloned())
    }

    fn open(
        &self,
        identity: &Identity,
        zone_id: i64,
        entry_time: DateTime<Utc>,
    ) -> Result<PresenceSession, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let key = (identity.clone(), zone_id);
        if inner.open.contains_key(&key) {
            return Err(StoreError::Conflict {
                identity: identity.clone(),
                zone_id,
            });
        }
        let session = PresenceSession::open(identity.clone(), zone_id, entry_time);
        inner.open.insert(key, session.clone());
        Ok(session)
    }

    fn close(
        &self,
        session_id: Uuid,
        exit_time: DateTime<Utc>,
    ) -> Result<CompletedVisit, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let key = inner
            .open
            .iter()
            .find(|(_, s)| s.session_id == session_id)
            .map(|(k, _)| k.clone())
            .ok_or(StoreError::SessionNotFound(session_id))?;
        let session = inner.open.remove(&key).expect("key just found");
        let visit = CompletedVisit::from_session(&session, exit_time);
        inner.visits.push(visit.clone());
        Ok(visit)
    }

    fn active_in_zone(&self, zone_id: i64) -> Result<Vec<PresenceSession>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut sessions: Vec<_> = inner
            .open
            .values()
            .filter(|s| s.zone_id == zone_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.entry_time);
        Ok(sessions)
    }
}

impl VisitLedger for MemoryBackend {
    fn append(&self, visit: &CompletedVisit) -> Result<(), StoreError> {
        self.inner.lock().unwrap().visits.push(visit.clone());
        Ok(())
    }

    fn recent_visits(&self, zone_id: i64, limit: usize) -> Result<Vec<CompletedVisit>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut visits: Vec<_> = inner
            .visits
            .iter()
            .filter(|v| v.zone_id == zone_id)
            .cloned()
            .collect();
        visits.sort_by(|a, b| b.exit_time.cmp(&a.exit_time));
        visits.truncate(limit);
        Ok(visits)
    }

    fn visits_for_identity(
        &self,
        identity: &Identity,
        limit: usize,
    ) -> Result<Vec<CompletedVisit>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut visits: Vec<_> = inner
            .visits
            .iter()
            .filter(|v| &v.identity == identity)
            .cloned()
            .collect();
        visits.sort_by(|a, b| b.exit_time.cmp(&a.exit_time));
        visits.truncate(limit);
        Ok(visits)
    }
}

impl Directory for MemoryBackend {
    fn identity_exists(&self, identity: &Identity) -> Result<bool, StoreError> {
        Ok(self.inner.lock().unwrap().people.contains_key(identity))
    }

    fn zone_exists(&self, zone_id: i64) -> Result<bool, StoreError> {
        Ok(self.inner.lock().unwrap().zones.contains_key(&zone_id))
    }

    fn zone_name(&self, zone_id: i64) -> Result<Option<String>, StoreError> {
        Ok(self.inner.lock().unwrap().zones.get(&zone_id).cloned())
    }
}

impl UnknownSink for MemoryBackend {
    fn record_unknown_sighting(
        &self,
        descriptor: &Descriptor,
        image_ref: Option<&str>,
        zone_id: i64,
        observed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.inner.lock().unwrap().unknowns.push(UnknownRecord {
            descriptor: descriptor.clone(),
            image_ref: image_ref.map(str::to_string),
            zone_id,
            observed_at,
        });
        Ok(())
    }
}
