use zbus::interface;

use crate::tracker::{Observation, TrackerError, TrackerHandle};
use presence_core::types::Sighting;

/// D-Bus interface for the presence tracking daemon.
///
/// Bus name: org.presence.Tracker1
/// Object path: /org/presence/Tracker1
///
/// Payloads are JSON strings: the detection pipeline and the CLI both
/// speak the serde shapes from presence-core.
pub struct TrackerService {
    handle: TrackerHandle,
}

impl TrackerService {
    pub fn new(handle: TrackerHandle) -> Self {
        Self { handle }
    }
}

#[interface(name = "org.presence.Tracker1")]
impl TrackerService {
    /// Submit a raw camera observation (unmatched descriptor). The daemon
    /// runs the gallery match and reconciles the resulting sighting.
    async fn observe(&self, observation_json: &str) -> zbus::fdo::Result<String> {
        let observation: Observation = serde_json::from_str(observation_json)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("bad observation: {e}")))?;
        tracing::debug!(zone_id = observation.zone_id, role = %observation.role, "observe");
        let result = self.handle.observe(observation).await.map_err(to_fdo)?;
        to_json(&result)
    }

    /// Submit a pre-matched sighting (test injection, replays).
    async fn report_sighting(&self, sighting_json: &str) -> zbus::fdo::Result<String> {
        let sighting: Sighting = serde_json::from_str(sighting_json)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("bad sighting: {e}")))?;
        let result = self.handle.report_sighting(sighting).await.map_err(to_fdo)?;
        to_json(&result)
    }

    /// Open sessions in a zone (who is currently inside).
    async fn list_active(&self, zone_id: i64) -> zbus::fdo::Result<String> {
        let sessions = self.handle.list_active(zone_id).await.map_err(to_fdo)?;
        to_json(&sessions)
    }

    /// Most recent completed visits for a zone, newest first.
    async fn recent_visits(&self, zone_id: i64, limit: u32) -> zbus::fdo::Result<String> {
        let visits = self
            .handle
            .recent_visits(zone_id, limit as usize)
            .await
            .map_err(to_fdo)?;
        to_json(&visits)
    }

    /// Daemon status snapshot.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.handle.status().await.map_err(to_fdo)?;
        to_json(&status)
    }
}

fn to_fdo(err: TrackerError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(err.to_string())
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}
