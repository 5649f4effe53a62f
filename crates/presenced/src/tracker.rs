//! The tracker thread.
//!
//! One dedicated OS thread owns the database, the enrolled gallery, and
//! the reconciliation engine; everything else talks to it through a
//! clone-safe [`TrackerHandle`]. Serializing all reconciliation through a
//! single owner keeps the check-then-act sequences race-free without any
//! per-request locking.

use chrono::{DateTime, Utc};
use presence_core::matcher::{DistanceMatcher, EnrolledFace, Matcher};
use presence_core::store::{SessionStore, StoreError, VisitLedger};
use presence_core::types::{
    CameraRole, CompletedVisit, Descriptor, PresenceSession, ReconciliationResult, Sighting,
};
use presence_core::{Engine, EngineError};
use presence_store::Db;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::config::Config;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("tracker thread exited")]
    ChannelClosed,
}

/// A raw camera observation: descriptor not yet matched to anyone.
/// The tracker runs the gallery match before reconciling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub zone_id: i64,
    pub role: CameraRole,
    pub descriptor: Descriptor,
    /// Defaults to the time of processing when the pipeline omits it.
    pub observed_at: Option<DateTime<Utc>>,
    pub image_ref: Option<String>,
}

/// Daemon status snapshot for the control surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerStatus {
    pub version: String,
    pub enrolled_descriptors: usize,
    pub open_sessions: i64,
    pub pending_unknowns: i64,
}

/// Messages sent from D-Bus handlers to the tracker thread.
enum TrackerRequest {
    Observe {
        observation: Observation,
        reply: oneshot::Sender<Result<ReconciliationResult, TrackerError>>,
    },
    Sighting {
        sighting: Sighting,
        reply: oneshot::Sender<Result<ReconciliationResult, TrackerError>>,
    },
    ListActive {
        zone_id: i64,
        reply: oneshot::Sender<Result<Vec<PresenceSession>, TrackerError>>,
    },
    RecentVisits {
        zone_id: i64,
        limit: usize,
        reply: oneshot::Sender<Result<Vec<CompletedVisit>, TrackerError>>,
    },
    Status {
        reply: oneshot::Sender<Result<TrackerStatus, TrackerError>>,
    },
}

/// Clone-safe handle to the tracker thread.
#[derive(Clone)]
pub struct TrackerHandle {
    tx: mpsc::Sender<TrackerRequest>,
}

impl TrackerHandle {
    /// Match a raw observation against the gallery, then reconcile it.
    pub async fn observe(
        &self,
        observation: Observation,
    ) -> Result<ReconciliationResult, TrackerError> {
        self.request(|reply| TrackerRequest::Observe { observation, reply })
            .await
    }

    /// Reconcile a pre-matched sighting (test injection, replays).
    pub async fn report_sighting(
        &self,
        sighting: Sighting,
    ) -> Result<ReconciliationResult, TrackerError> {
        self.request(|reply| TrackerRequest::Sighting { sighting, reply })
            .await
    }

    pub async fn list_active(&self, zone_id: i64) -> Result<Vec<PresenceSession>, TrackerError> {
        self.request(|reply| TrackerRequest::ListActive { zone_id, reply })
            .await
    }

    pub async fn recent_visits(
        &self,
        zone_id: i64,
        limit: usize,
    ) -> Result<Vec<CompletedVisit>, TrackerError> {
        self.request(|reply| TrackerRequest::RecentVisits {
            zone_id,
            limit,
            reply,
        })
        .await
    }

    pub async fn status(&self) -> Result<TrackerStatus, TrackerError> {
        self.request(|reply| TrackerRequest::Status { reply }).await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, TrackerError>>) -> TrackerRequest,
    ) -> Result<T, TrackerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| TrackerError::ChannelClosed)?;
        reply_rx.await.map_err(|_| TrackerError::ChannelClosed)?
    }
}

/// Spawn the tracker on a dedicated OS thread.
///
/// Opens the database and loads the enrolled gallery synchronously
/// (fail-fast), then enters the request loop.
pub fn spawn_tracker(config: &Config) -> Result<TrackerHandle, TrackerError> {
    let db = Db::open(&config.db_path)?;
    let gallery = db.load_gallery()?;
    tracing::info!(
        db = %config.db_path.display(),
        enrolled = gallery.len(),
        "presence store opened"
    );

    let policy = config.policy();
    tracing::info!(
        match_tolerance = policy.match_tolerance,
        min_confidence = policy.min_confidence,
        known_cooldown_secs = policy.known_cooldown.num_seconds(),
        unknown_cooldown_secs = policy.unknown_cooldown.num_seconds(),
        "engine policy"
    );

    let mut worker = Worker {
        engine: Engine::new(policy, db),
        gallery,
    };

    let (tx, mut rx) = mpsc::channel::<TrackerRequest>(16);

    std::thread::Builder::new()
        .name("presence-tracker".into())
        .spawn(move || {
            tracing::info!("tracker thread started");
            while let Some(req) = rx.blocking_recv() {
                worker.handle(req);
            }
            tracing::info!("tracker thread exiting");
        })
        .expect("failed to spawn tracker thread");

    Ok(TrackerHandle { tx })
}

struct Worker {
    engine: Engine<Db>,
    gallery: Vec<EnrolledFace>,
}

impl Worker {
    fn handle(&mut self, req: TrackerRequest) {
        match req {
            TrackerRequest::Observe { observation, reply } => {
                let _ = reply.send(self.observe(observation));
            }
            TrackerRequest::Sighting { sighting, reply } => {
                let result = self.engine.reconcile(&sighting).map_err(TrackerError::from);
                let _ = reply.send(result);
            }
            TrackerRequest::ListActive { zone_id, reply } => {
                let result = self
                    .engine
                    .backend()
                    .active_in_zone(zone_id)
                    .map_err(TrackerError::from);
                let _ = reply.send(result);
            }
            TrackerRequest::RecentVisits {
                zone_id,
                limit,
                reply,
            } => {
                let result = self
                    .engine
                    .backend()
                    .recent_visits(zone_id, limit)
                    .map_err(TrackerError::from);
                let _ = reply.send(result);
            }
            TrackerRequest::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn observe(&mut self, observation: Observation) -> Result<ReconciliationResult, TrackerError> {
        let outcome =
            DistanceMatcher.compare(&observation.descriptor, &self.gallery, self.tolerance());
        if let (Some(identity), Some(name)) = (&outcome.identity, &outcome.name) {
            tracing::debug!(
                %identity,
                name = name.as_str(),
                distance = outcome.distance,
                "gallery match"
            );
        }

        let sighting = Sighting {
            identity: outcome.identity.clone(),
            zone_id: observation.zone_id,
            role: observation.role,
            observed_at: observation.observed_at.unwrap_or_else(Utc::now),
            confidence: outcome.confidence(),
            descriptor: Some(observation.descriptor),
            image_ref: observation.image_ref,
        };
        Ok(self.engine.reconcile(&sighting)?)
    }

    fn status(&self) -> Result<TrackerStatus, TrackerError> {
        let db = self.engine.backend();
        Ok(TrackerStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            enrolled_descriptors: self.gallery.len(),
            open_sessions: db.open_session_count()?,
            pending_unknowns: db.pending_unknown_count()?,
        })
    }

    fn tolerance(&self) -> f32 {
        // Same threshold gates gallery matching and unknown dedup.
        self.engine.policy().match_tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use presence_core::types::Identity;

    fn config(dir: &tempfile::TempDir) -> Config {
        Config {
            db_path: dir.path().join("presence.db"),
            match_tolerance: 0.6,
            min_confidence: 0.8,
            known_cooldown_secs: 0,
            unknown_cooldown_secs: 3600,
        }
    }

    fn seed(config: &Config) {
        let db = Db::open(&config.db_path).unwrap();
        db.add_student(1, "Amira").unwrap();
        db.add_zone(1, "Library").unwrap();
        db.enroll_descriptor(&Identity::Student(1), &Descriptor::new(vec![0.0, 0.0]))
            .unwrap();
    }

    #[tokio::test]
    async fn test_observe_matches_and_opens_session() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        seed(&config);

        let handle = spawn_tracker(&config).unwrap();
        let result = handle
            .observe(Observation {
                zone_id: 1,
                role: CameraRole::Entry,
                descriptor: Descriptor::new(vec![0.05, 0.0]),
                observed_at: None,
                image_ref: None,
            })
            .await
            .unwrap();

        match result {
            ReconciliationResult::Opened { session } => {
                assert_eq!(session.identity, Identity::Student(1));
            }
            other => panic!("expected Opened, got {other:?}"),
        }
        assert_eq!(handle.list_active(1).await.unwrap().len(), 1);

        let status = handle.status().await.unwrap();
        assert_eq!(status.open_sessions, 1);
        assert_eq!(status.enrolled_descriptors, 1);
    }

    #[tokio::test]
    async fn test_observe_far_descriptor_logs_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        seed(&config);

        let handle = spawn_tracker(&config).unwrap();
        let result = handle
            .observe(Observation {
                zone_id: 1,
                role: CameraRole::Entry,
                descriptor: Descriptor::new(vec![5.0, 5.0]),
                observed_at: None,
                image_ref: Some("unknown_entry_001.jpg".into()),
            })
            .await
            .unwrap();

        assert_eq!(
            result,
            ReconciliationResult::Unknown {
                disposition: presence_core::UnknownOutcome::Logged
            }
        );
        assert_eq!(handle.status().await.unwrap().pending_unknowns, 1);
    }
}
