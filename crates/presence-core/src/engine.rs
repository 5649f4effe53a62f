//! The reconciliation engine.
//!
//! One call per sighting: decide whether it opens a session, reaffirms an
//! existing one, closes one into the visit ledger, records an anomaly, or
//! is suppressed/diverted before the state machine. The engine owns the
//! short-term duplicate filters and borrows everything durable through the
//! storage traits, so a test can drive it entirely in memory.

use crate::filter::{RecencyFilter, UnknownFilter};
use crate::store::{Backend, StoreError};
use crate::types::{
    CameraRole, CompletedVisit, Identity, ReconciliationResult, Sighting, SuppressReason,
    UnknownOutcome,
};
use chrono::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Referenced identity or zone is not in the directory. Raised before
    /// any state mutation; the caller decides whether to retry.
    #[error("{kind} not found: {reference}")]
    NotFound {
        kind: &'static str,
        reference: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Tunable policy knobs. The cooldown windows and thresholds are
/// deployment policy, not invariants, so they are configuration.
#[derive(Debug, Clone)]
pub struct EnginePolicy {
    /// Descriptor distance below which two faces count as the same person.
    /// Shared by the gallery matcher and the unknown-face filter.
    pub match_tolerance: f32,
    /// Minimum confidence for a match to reach the state machine; below
    /// this the sighting is treated as unmatched.
    pub min_confidence: f32,
    /// Cooldown between accepted re-logs of the same (identity, role).
    pub known_cooldown: Duration,
    /// Cooldown between accepted re-logs of the same unknown face.
    pub unknown_cooldown: Duration,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            match_tolerance: 0.6,
            min_confidence: 0.8,
            known_cooldown: Duration::minutes(5),
            unknown_cooldown: Duration::minutes(60),
        }
    }
}

/// Per-zone presence state machine plus duplicate filters.
pub struct Engine<B: Backend> {
    policy: EnginePolicy,
    backend: B,
    recency: RecencyFilter,
    unknowns: UnknownFilter,
}

impl<B: Backend> Engine<B> {
    pub fn new(policy: EnginePolicy, backend: B) -> Self {
        let recency = RecencyFilter::new(policy.known_cooldown);
        let unknowns = UnknownFilter::new(policy.match_tolerance, policy.unknown_cooldown);
        Self {
            policy,
            backend,
            recency,
            unknowns,
        }
    }

    /// Read access to the storage backend, for the reporting surface.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn policy(&self) -> &EnginePolicy {
        &self.policy
    }

    /// Apply one sighting to the presence state.
    ///
    /// Idempotent per distinct sighting: replaying the same Entry sighting
    /// reaffirms the one open session rather than opening a second — that
    /// guarantee comes from the ABSENT/PRESENT check against the store,
    /// not from the recency filter.
    pub fn reconcile(&mut self, sighting: &Sighting) -> Result<ReconciliationResult, EngineError> {
        let identity = match &sighting.identity {
            Some(identity) if sighting.confidence >= self.policy.min_confidence => {
                identity.clone()
            }
            Some(identity) => {
                tracing::debug!(
                    %identity,
                    confidence = sighting.confidence,
                    floor = self.policy.min_confidence,
                    "confidence below floor; treating as unmatched"
                );
                return self.handle_unknown(sighting);
            }
            None => return self.handle_unknown(sighting),
        };

        // Existence checks precede every mutation, including filter state.
        if !self.backend.identity_exists(&identity)? {
            return Err(EngineError::NotFound {
                kind: "identity",
                reference: identity.to_string(),
            });
        }
        if !self.backend.zone_exists(sighting.zone_id)? {
            return Err(EngineError::NotFound {
                kind: "zone",
                reference: sighting.zone_id.to_string(),
            });
        }

        if self
            .recency
            .is_duplicate(&identity, sighting.role, sighting.observed_at)
        {
            tracing::trace!(%identity, role = %sighting.role, "suppressed by recency filter");
            return Ok(ReconciliationResult::Suppressed {
                reason: SuppressReason::RecentDuplicate,
            });
        }

        let open = self.backend.find_open(&identity, sighting.zone_id)?;
        let result = match (open, sighting.role) {
            (None, CameraRole::Entry) => {
                let session =
                    self.backend
                        .open(&identity, sighting.zone_id, sighting.observed_at)?;
                tracing::info!(
                    %identity,
                    zone_id = sighting.zone_id,
                    entry_time = %session.entry_time,
                    confidence = sighting.confidence,
                    "session opened"
                );
                ReconciliationResult::Opened { session }
            }
            (Some(session), CameraRole::Entry) => {
                // Duplicate Entry detection: the person is already inside.
                tracing::debug!(
                    %identity,
                    zone_id = sighting.zone_id,
                    session_id = %session.session_id,
                    "entry reaffirmed existing session"
                );
                ReconciliationResult::Reaffirmed { session }
            }
            (Some(session), CameraRole::Exit) => {
                // Close and ledger-append are one atomic unit in the store.
                let visit = self
                    .backend
                    .close(session.session_id, sighting.observed_at)?;
                tracing::info!(
                    %identity,
                    zone_id = sighting.zone_id,
                    duration_minutes = visit.duration_minutes,
                    "session closed"
                );
                ReconciliationResult::Closed { visit }
            }
            (None, CameraRole::Exit) => self.record_anomalous_exit(&identity, sighting)?,
        };

        // The cooldown window starts only once the store mutation has
        // committed; a transient store failure above leaves the filter
        // untouched so the retry is not suppressed.
        self.recency
            .touch(&identity, sighting.role, sighting.observed_at);
        Ok(result)
    }

    /// Exit with no open session. Policy choice: record an exit-only visit
    /// with null entry time and duration, flagged so reporting can tell it
    /// apart from clean visits. Never silently dropped.
    fn record_anomalous_exit(
        &mut self,
        identity: &Identity,
        sighting: &Sighting,
    ) -> Result<ReconciliationResult, EngineError> {
        let visit =
            CompletedVisit::anomalous_exit(identity.clone(), sighting.zone_id, sighting.observed_at);
        self.backend.append(&visit)?;
        tracing::warn!(
            %identity,
            zone_id = sighting.zone_id,
            exit_time = %sighting.observed_at,
            "exit without entry; anomaly recorded"
        );
        Ok(ReconciliationResult::AnomalousExit { visit })
    }

    /// Unmatched (or low-confidence) sighting: dedup by descriptor
    /// distance, then hand new unknowns to the capture collaborator.
    fn handle_unknown(
        &mut self,
        sighting: &Sighting,
    ) -> Result<ReconciliationResult, EngineError> {
        let Some(descriptor) = &sighting.descriptor else {
            return Ok(ReconciliationResult::Unknown {
                disposition: UnknownOutcome::NoDescriptor,
            });
        };

        if self.unknowns.is_duplicate(descriptor, sighting.observed_at) {
            return Ok(ReconciliationResult::Unknown {
                disposition: UnknownOutcome::DuplicateSuppressed,
            });
        }

        self.backend.record_unknown_sighting(
            descriptor,
            sighting.image_ref.as_deref(),
            sighting.zone_id,
            sighting.observed_at,
        )?;
        self.unknowns.remember(descriptor, sighting.observed_at);
        tracing::info!(
            zone_id = sighting.zone_id,
            role = %sighting.role,
            "new unknown face recorded"
        );
        Ok(ReconciliationResult::Unknown {
            disposition: UnknownOutcome::Logged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Directory, MemoryBackend, SessionStore, UnknownSink, VisitLedger};
    use crate::types::{AnomalyKind, Descriptor, PresenceSession};
    use chrono::{DateTime, TimeZone, Utc};
    use std::cell::Cell;
    use uuid::Uuid;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, h, m, 0).unwrap()
    }

    fn backend() -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend.add_person(Identity::Student(1), "Amira");
        backend.add_person(Identity::Student(2), "Bilal");
        backend.add_person(Identity::Teacher(7), "Ms. Chen");
        backend.add_zone(1, "Library");
        backend.add_zone(2, "Lab");
        backend
    }

    /// Policy with cooldowns disabled, so state-machine behavior is
    /// observable without the recency filter in front of it.
    fn no_cooldown_policy() -> EnginePolicy {
        EnginePolicy {
            known_cooldown: Duration::zero(),
            ..EnginePolicy::default()
        }
    }

    fn engine() -> Engine<MemoryBackend> {
        Engine::new(no_cooldown_policy(), backend())
    }

    fn sighting(identity: Identity, zone_id: i64, role: CameraRole, t: DateTime<Utc>) -> Sighting {
        Sighting {
            identity: Some(identity),
            zone_id,
            role,
            observed_at: t,
            confidence: 0.95,
            descriptor: None,
            image_ref: None,
        }
    }

    fn unmatched(zone_id: i64, t: DateTime<Utc>, values: Vec<f32>) -> Sighting {
        Sighting {
            identity: None,
            zone_id,
            role: CameraRole::Entry,
            observed_at: t,
            confidence: 0.0,
            descriptor: Some(Descriptor::new(values)),
            image_ref: Some("unknown_entry_20250310.jpg".into()),
        }
    }

    #[test]
    fn test_entry_then_exit_records_duration() {
        // Scenario: entry at 10:00, exit at 10:45 → one 45-minute visit.
        let mut engine = engine();
        let id = Identity::Student(1);

        let result = engine
            .reconcile(&sighting(id.clone(), 1, CameraRole::Entry, at(10, 0)))
            .unwrap();
        let session = match result {
            ReconciliationResult::Opened { session } => session,
            other => panic!("expected Opened, got {other:?}"),
        };
        assert_eq!(session.entry_time, at(10, 0));

        let result = engine
            .reconcile(&sighting(id.clone(), 1, CameraRole::Exit, at(10, 45)))
            .unwrap();
        let visit = match result {
            ReconciliationResult::Closed { visit } => visit,
            other => panic!("expected Closed, got {other:?}"),
        };
        assert_eq!(visit.duration_minutes, Some(45));
        assert!(visit.anomaly.is_none());
        assert!(engine.backend().find_open(&id, 1).unwrap().is_none());
    }

    #[test]
    fn test_repeat_entry_reaffirms_single_session() {
        // Scenario: lingering in front of the entry camera must not open a
        // second session or move the entry time.
        let mut engine = engine();
        let id = Identity::Student(1);

        engine
            .reconcile(&sighting(id.clone(), 1, CameraRole::Entry, at(10, 0)))
            .unwrap();
        let result = engine
            .reconcile(&sighting(id.clone(), 1, CameraRole::Entry, at(10, 1)))
            .unwrap();

        match result {
            ReconciliationResult::Reaffirmed { session } => {
                assert_eq!(session.entry_time, at(10, 0));
            }
            other => panic!("expected Reaffirmed, got {other:?}"),
        }
        assert_eq!(engine.backend().active_in_zone(1).unwrap().len(), 1);
    }

    #[test]
    fn test_replaying_identical_entry_is_idempotent() {
        let mut engine = engine();
        let id = Identity::Student(1);
        let event = sighting(id.clone(), 1, CameraRole::Entry, at(10, 0));

        let first = engine.reconcile(&event).unwrap();
        let second = engine.reconcile(&event).unwrap();

        assert!(matches!(first, ReconciliationResult::Opened { .. }));
        assert!(matches!(second, ReconciliationResult::Reaffirmed { .. }));
        assert_eq!(engine.backend().active_in_zone(1).unwrap().len(), 1);
    }

    #[test]
    fn test_exit_without_entry_records_anomaly() {
        // Scenario: exit sighting with no prior entry.
        let mut engine = engine();
        let id = Identity::Student(2);

        let result = engine
            .reconcile(&sighting(id.clone(), 1, CameraRole::Exit, at(9, 0)))
            .unwrap();
        let visit = match result {
            ReconciliationResult::AnomalousExit { visit } => visit,
            other => panic!("expected AnomalousExit, got {other:?}"),
        };
        assert_eq!(visit.entry_time, None);
        assert_eq!(visit.duration_minutes, None);
        assert_eq!(visit.anomaly, Some(AnomalyKind::ExitWithoutEntry));

        // No session was opened, and the ledger row is flagged.
        assert!(engine.backend().find_open(&id, 1).unwrap().is_none());
        let logged = engine.backend().recent_visits(1, 10).unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].anomaly, Some(AnomalyKind::ExitWithoutEntry));
    }

    #[test]
    fn test_zones_are_independent() {
        // Scenario: entries in two zones give two simultaneous sessions.
        let mut engine = engine();
        let id = Identity::Student(1);

        engine
            .reconcile(&sighting(id.clone(), 1, CameraRole::Entry, at(10, 0)))
            .unwrap();
        let result = engine
            .reconcile(&sighting(id.clone(), 2, CameraRole::Entry, at(10, 5)))
            .unwrap();

        assert!(matches!(result, ReconciliationResult::Opened { .. }));
        assert!(engine.backend().find_open(&id, 1).unwrap().is_some());
        assert!(engine.backend().find_open(&id, 2).unwrap().is_some());
    }

    #[test]
    fn test_recency_filter_suppresses_repeat_known_sightings() {
        // Default 5-minute cooldown: the second sighting never reaches the
        // state machine.
        let mut engine = Engine::new(EnginePolicy::default(), backend());
        let id = Identity::Student(1);

        engine
            .reconcile(&sighting(id.clone(), 1, CameraRole::Entry, at(10, 0)))
            .unwrap();
        let result = engine
            .reconcile(&sighting(id.clone(), 1, CameraRole::Entry, at(10, 2)))
            .unwrap();

        assert_eq!(
            result,
            ReconciliationResult::Suppressed {
                reason: SuppressReason::RecentDuplicate
            }
        );
    }

    #[test]
    fn test_exit_passes_recency_filter_separately() {
        // Entry and Exit roles have independent cooldown windows, so a
        // quick visit still closes cleanly under the default policy.
        let mut engine = Engine::new(EnginePolicy::default(), backend());
        let id = Identity::Student(1);

        engine
            .reconcile(&sighting(id.clone(), 1, CameraRole::Entry, at(10, 0)))
            .unwrap();
        let result = engine
            .reconcile(&sighting(id.clone(), 1, CameraRole::Exit, at(10, 2)))
            .unwrap();
        assert!(matches!(result, ReconciliationResult::Closed { .. }));
    }

    #[test]
    fn test_unknown_identity_is_not_found() {
        let mut engine = engine();
        let result = engine.reconcile(&sighting(
            Identity::Student(999),
            1,
            CameraRole::Entry,
            at(10, 0),
        ));
        assert!(matches!(
            result,
            Err(EngineError::NotFound { kind: "identity", .. })
        ));
        // Aborted before any state mutation.
        assert!(engine.backend().active_in_zone(1).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_zone_is_not_found() {
        let mut engine = engine();
        let result = engine.reconcile(&sighting(
            Identity::Student(1),
            99,
            CameraRole::Entry,
            at(10, 0),
        ));
        assert!(matches!(
            result,
            Err(EngineError::NotFound { kind: "zone", .. })
        ));
    }

    #[test]
    fn test_low_confidence_match_goes_to_unknown_path() {
        let mut engine = engine();
        let mut event = sighting(Identity::Student(1), 1, CameraRole::Entry, at(10, 0));
        event.confidence = 0.5;
        event.descriptor = Some(Descriptor::new(vec![1.0, 2.0]));

        let result = engine.reconcile(&event).unwrap();
        assert_eq!(
            result,
            ReconciliationResult::Unknown {
                disposition: UnknownOutcome::Logged
            }
        );
        assert!(engine
            .backend()
            .find_open(&Identity::Student(1), 1)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_new_unknown_face_is_logged_once() {
        let mut engine = engine();

        let first = engine
            .reconcile(&unmatched(1, at(10, 0), vec![0.0, 0.0]))
            .unwrap();
        assert_eq!(
            first,
            ReconciliationResult::Unknown {
                disposition: UnknownOutcome::Logged
            }
        );

        // Same face (distance < tolerance) ten minutes later: suppressed.
        let second = engine
            .reconcile(&unmatched(1, at(10, 10), vec![0.2, 0.0]))
            .unwrap();
        assert_eq!(
            second,
            ReconciliationResult::Unknown {
                disposition: UnknownOutcome::DuplicateSuppressed
            }
        );

        let records = engine.backend().unknown_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].zone_id, 1);
        assert_eq!(
            records[0].image_ref.as_deref(),
            Some("unknown_entry_20250310.jpg")
        );
    }

    #[test]
    fn test_unmatched_without_descriptor_is_dropped() {
        let mut engine = engine();
        let mut event = unmatched(1, at(10, 0), vec![]);
        event.descriptor = None;

        let result = engine.reconcile(&event).unwrap();
        assert_eq!(
            result,
            ReconciliationResult::Unknown {
                disposition: UnknownOutcome::NoDescriptor
            }
        );
        assert!(engine.backend().unknown_records().is_empty());
    }

    #[test]
    fn test_open_session_invariant_over_history() {
        // Drive a messy event history and check the invariant after every
        // step: at most one open session per (identity, zone).
        let mut engine = engine();
        let id = Identity::Student(1);
        let events = [
            sighting(id.clone(), 1, CameraRole::Entry, at(10, 0)),
            sighting(id.clone(), 1, CameraRole::Entry, at(10, 1)),
            sighting(id.clone(), 1, CameraRole::Exit, at(10, 30)),
            sighting(id.clone(), 1, CameraRole::Exit, at(10, 31)),
            sighting(id.clone(), 1, CameraRole::Entry, at(11, 0)),
            sighting(id.clone(), 1, CameraRole::Entry, at(11, 0)),
        ];

        for event in &events {
            engine.reconcile(event).unwrap();
            let open = engine.backend().active_in_zone(1).unwrap();
            assert!(
                open.iter().filter(|s| s.identity == id).count() <= 1,
                "invariant violated after {event:?}"
            );
        }

        // Final state: one re-entry session open, one clean visit plus one
        // anomalous exit in the ledger.
        assert_eq!(engine.backend().active_in_zone(1).unwrap().len(), 1);
        let visits = engine.backend().recent_visits(1, 10).unwrap();
        assert_eq!(visits.len(), 2);
        assert_eq!(visits.iter().filter(|v| v.anomaly.is_none()).count(), 1);
    }

    /// Delegates to [`MemoryBackend`] but fails a set number of writes,
    /// for retry-after-transient-failure tests.
    struct FlakyBackend {
        inner: MemoryBackend,
        failing_closes: Cell<u32>,
        failing_appends: Cell<u32>,
        failing_unknown_logs: Cell<u32>,
    }

    impl FlakyBackend {
        fn new(inner: MemoryBackend) -> Self {
            Self {
                inner,
                failing_closes: Cell::new(0),
                failing_appends: Cell::new(0),
                failing_unknown_logs: Cell::new(0),
            }
        }

        fn take_failure(counter: &Cell<u32>) -> bool {
            if counter.get() > 0 {
                counter.set(counter.get() - 1);
                return true;
            }
            false
        }
    }

    impl SessionStore for FlakyBackend {
        fn find_open(
            &self,
            identity: &Identity,
            zone_id: i64,
        ) -> Result<Option<PresenceSession>, StoreError> {
            self.inner.find_open(identity, zone_id)
        }

        fn open(
            &self,
            identity: &Identity,
            zone_id: i64,
            entry_time: DateTime<Utc>,
        ) -> Result<PresenceSession, StoreError> {
            self.inner.open(identity, zone_id, entry_time)
        }

        fn close(
            &self,
            session_id: Uuid,
            exit_time: DateTime<Utc>,
        ) -> Result<CompletedVisit, StoreError> {
            if Self::take_failure(&self.failing_closes) {
                return Err(StoreError::Backend("transient close failure".into()));
            }
            self.inner.close(session_id, exit_time)
        }

        fn active_in_zone(&self, zone_id: i64) -> Result<Vec<PresenceSession>, StoreError> {
            self.inner.active_in_zone(zone_id)
        }
    }

    impl VisitLedger for FlakyBackend {
        fn append(&self, visit: &CompletedVisit) -> Result<(), StoreError> {
            if Self::take_failure(&self.failing_appends) {
                return Err(StoreError::Backend("transient append failure".into()));
            }
            self.inner.append(visit)
        }

        fn recent_visits(
            &self,
            zone_id: i64,
            limit: usize,
        ) -> Result<Vec<CompletedVisit>, StoreError> {
            self.inner.recent_visits(zone_id, limit)
        }

        fn visits_for_identity(
            &self,
            identity: &Identity,
            limit: usize,
        ) -> Result<Vec<CompletedVisit>, StoreError> {
            self.inner.visits_for_identity(identity, limit)
        }
    }

    impl Directory for FlakyBackend {
        fn identity_exists(&self, identity: &Identity) -> Result<bool, StoreError> {
            self.inner.identity_exists(identity)
        }

        fn zone_exists(&self, zone_id: i64) -> Result<bool, StoreError> {
            self.inner.zone_exists(zone_id)
        }

        fn zone_name(&self, zone_id: i64) -> Result<Option<String>, StoreError> {
            self.inner.zone_name(zone_id)
        }
    }

    impl UnknownSink for FlakyBackend {
        fn record_unknown_sighting(
            &self,
            descriptor: &Descriptor,
            image_ref: Option<&str>,
            zone_id: i64,
            observed_at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            if Self::take_failure(&self.failing_unknown_logs) {
                return Err(StoreError::Backend("transient unknown-log failure".into()));
            }
            self.inner
                .record_unknown_sighting(descriptor, image_ref, zone_id, observed_at)
        }
    }

    #[test]
    fn test_failed_close_does_not_start_cooldown() {
        // A close that fails in the store must not arm the recency filter,
        // or the retried exit would be swallowed as a duplicate.
        let mut engine = Engine::new(EnginePolicy::default(), FlakyBackend::new(backend()));
        let id = Identity::Student(1);

        let opened = engine
            .reconcile(&sighting(id.clone(), 1, CameraRole::Entry, at(10, 0)))
            .unwrap();
        assert!(matches!(opened, ReconciliationResult::Opened { .. }));

        engine.backend.failing_closes.set(1);
        let failed = engine.reconcile(&sighting(id.clone(), 1, CameraRole::Exit, at(10, 45)));
        assert!(matches!(failed, Err(EngineError::Store(_))));

        // The session survived the failed close and nothing hit the ledger.
        assert!(engine.backend().find_open(&id, 1).unwrap().is_some());
        assert!(engine.backend().recent_visits(1, 10).unwrap().is_empty());

        // Retry a minute later, well inside the 5-minute cooldown.
        let retried = engine
            .reconcile(&sighting(id.clone(), 1, CameraRole::Exit, at(10, 46)))
            .unwrap();
        let visit = match retried {
            ReconciliationResult::Closed { visit } => visit,
            other => panic!("expected Closed, got {other:?}"),
        };
        assert_eq!(visit.duration_minutes, Some(46));
        assert!(engine.backend().find_open(&id, 1).unwrap().is_none());
        assert_eq!(engine.backend().recent_visits(1, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_failed_anomaly_append_does_not_start_cooldown() {
        let mut engine = Engine::new(EnginePolicy::default(), FlakyBackend::new(backend()));
        let id = Identity::Student(2);

        engine.backend.failing_appends.set(1);
        let failed = engine.reconcile(&sighting(id.clone(), 1, CameraRole::Exit, at(9, 0)));
        assert!(matches!(failed, Err(EngineError::Store(_))));
        assert!(engine.backend().recent_visits(1, 10).unwrap().is_empty());

        let retried = engine
            .reconcile(&sighting(id.clone(), 1, CameraRole::Exit, at(9, 1)))
            .unwrap();
        assert!(matches!(retried, ReconciliationResult::AnomalousExit { .. }));
        assert_eq!(engine.backend().recent_visits(1, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_failed_unknown_log_can_be_retried() {
        // Same rule on the unknown path: the descriptor is only retained
        // for dedup once the sighting was actually recorded.
        let mut engine = Engine::new(EnginePolicy::default(), FlakyBackend::new(backend()));

        engine.backend.failing_unknown_logs.set(1);
        let failed = engine.reconcile(&unmatched(1, at(10, 0), vec![0.0, 0.0]));
        assert!(matches!(failed, Err(EngineError::Store(_))));
        assert!(engine.backend().inner.unknown_records().is_empty());

        let retried = engine
            .reconcile(&unmatched(1, at(10, 1), vec![0.0, 0.0]))
            .unwrap();
        assert_eq!(
            retried,
            ReconciliationResult::Unknown {
                disposition: UnknownOutcome::Logged
            }
        );
        assert_eq!(engine.backend().inner.unknown_records().len(), 1);
    }
}
