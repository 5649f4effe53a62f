//! Short-term duplicate suppression.
//!
//! Detection cycles fire every few seconds while a face stays in frame, so
//! the same sighting would otherwise reach the engine dozens of times. Two
//! filters absorb the noise: a per-(identity, camera role) cooldown for
//! matched faces and a distance-keyed cooldown for unknown faces, which
//! have no stable identity to key on.
//!
//! These are performance optimizations, not correctness guarantees — the
//! engine's state machine stays idempotent without them. Eviction is lazy
//! (checked on each call); volumes are far too low to need a sweeper.

use crate::types::{CameraRole, Descriptor, Identity};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Suppresses repeat sightings of a known person at the same camera role
/// within a cooldown window (default 5 minutes).
#[derive(Debug)]
pub struct RecencyFilter {
    cooldown: Duration,
    last_logged: HashMap<(Identity, CameraRole), DateTime<Utc>>,
}

impl RecencyFilter {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_logged: HashMap::new(),
        }
    }

    /// Returns `true` when the same (identity, role) was already logged
    /// within the cooldown. Never fails; an absent entry is simply not a
    /// duplicate. Checking does not start a window — that happens in
    /// [`touch`](Self::touch).
    pub fn is_duplicate(
        &mut self,
        identity: &Identity,
        role: CameraRole,
        now: DateTime<Utc>,
    ) -> bool {
        self.evict_stale(now);
        self.last_logged
            .get(&(identity.clone(), role))
            .is_some_and(|last| now - *last < self.cooldown)
    }

    /// Start (or refresh) the cooldown window for a sighting. Callers
    /// touch only after the store mutation succeeds, so a failed close
    /// never blocks its own retry.
    pub fn touch(&mut self, identity: &Identity, role: CameraRole, now: DateTime<Utc>) {
        self.last_logged.insert((identity.clone(), role), now);
    }

    fn evict_stale(&mut self, now: DateTime<Utc>) {
        let cooldown = self.cooldown;
        self.last_logged.retain(|_, last| now - *last < cooldown);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.last_logged.len()
    }
}

/// Suppresses repeat sightings of the same *unknown* face within a longer
/// cooldown window (default 60 minutes), matched by descriptor distance
/// against every unknown seen inside the window.
#[derive(Debug)]
pub struct UnknownFilter {
    tolerance: f32,
    cooldown: Duration,
    seen: Vec<(Descriptor, DateTime<Utc>)>,
}

impl UnknownFilter {
    pub fn new(tolerance: f32, cooldown: Duration) -> Self {
        Self {
            tolerance,
            cooldown,
            seen: Vec::new(),
        }
    }

    /// Returns `true` if this descriptor matches an unknown face already
    /// seen within the cooldown window. Checking does not retain the
    /// descriptor — that happens in [`remember`](Self::remember).
    pub fn is_duplicate(&mut self, descriptor: &Descriptor, now: DateTime<Utc>) -> bool {
        let cooldown = self.cooldown;
        self.seen.retain(|(_, first_seen)| now - *first_seen < cooldown);

        self.seen
            .iter()
            .any(|(seen, _)| descriptor.distance(seen) < self.tolerance)
    }

    /// Retain a logged unknown descriptor for future comparisons. Called
    /// only after the sighting was recorded, so a failed write never
    /// blocks its own retry.
    pub fn remember(&mut self, descriptor: &Descriptor, now: DateTime<Utc>) {
        self.seen.push((descriptor.clone(), now));
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, h, m, s).unwrap()
    }

    #[test]
    fn test_recency_suppresses_within_cooldown() {
        let mut filter = RecencyFilter::new(Duration::minutes(5));
        let id = Identity::Student(1);

        assert!(!filter.is_duplicate(&id, CameraRole::Entry, at(10, 0, 0)));
        filter.touch(&id, CameraRole::Entry, at(10, 0, 0));
        assert!(filter.is_duplicate(&id, CameraRole::Entry, at(10, 2, 0)));
        assert!(filter.is_duplicate(&id, CameraRole::Entry, at(10, 4, 59)));
    }

    #[test]
    fn test_recency_allows_after_cooldown() {
        let mut filter = RecencyFilter::new(Duration::minutes(5));
        let id = Identity::Student(1);

        filter.touch(&id, CameraRole::Entry, at(10, 0, 0));
        assert!(!filter.is_duplicate(&id, CameraRole::Entry, at(10, 5, 0)));
    }

    #[test]
    fn test_recency_check_does_not_start_window() {
        let mut filter = RecencyFilter::new(Duration::minutes(5));
        let id = Identity::Student(1);

        // Checking alone leaves no trace; only touch starts the window.
        assert!(!filter.is_duplicate(&id, CameraRole::Exit, at(10, 0, 0)));
        assert!(!filter.is_duplicate(&id, CameraRole::Exit, at(10, 0, 30)));
        assert_eq!(filter.len(), 0);
    }

    #[test]
    fn test_recency_keys_are_independent() {
        let mut filter = RecencyFilter::new(Duration::minutes(5));
        let a = Identity::Student(1);
        let b = Identity::Student(2);

        filter.touch(&a, CameraRole::Entry, at(10, 0, 0));
        // Different role and different identity are separate windows.
        assert!(!filter.is_duplicate(&a, CameraRole::Exit, at(10, 0, 5)));
        assert!(!filter.is_duplicate(&b, CameraRole::Entry, at(10, 0, 10)));
    }

    #[test]
    fn test_recency_evicts_lazily() {
        let mut filter = RecencyFilter::new(Duration::minutes(5));
        filter.touch(&Identity::Student(1), CameraRole::Entry, at(10, 0, 0));
        filter.touch(&Identity::Student(2), CameraRole::Entry, at(10, 1, 0));
        assert_eq!(filter.len(), 2);

        // Both windows elapsed by 10:30; next check sweeps them out.
        assert!(!filter.is_duplicate(&Identity::Student(3), CameraRole::Entry, at(10, 30, 0)));
        assert_eq!(filter.len(), 0);
    }

    #[test]
    fn test_unknown_dedups_by_distance() {
        let mut filter = UnknownFilter::new(0.6, Duration::minutes(60));
        let first = Descriptor::new(vec![0.0, 0.0]);
        let near = Descriptor::new(vec![0.3, 0.0]);
        let far = Descriptor::new(vec![2.0, 0.0]);

        filter.remember(&first, at(10, 0, 0));
        assert!(filter.is_duplicate(&near, at(10, 10, 0)));
        assert!(!filter.is_duplicate(&far, at(10, 10, 0)));
    }

    #[test]
    fn test_unknown_allows_after_window() {
        let mut filter = UnknownFilter::new(0.6, Duration::minutes(60));
        let d = Descriptor::new(vec![0.0, 0.0]);

        filter.remember(&d, at(9, 0, 0));
        // Same face an hour later is a fresh unknown sighting.
        assert!(!filter.is_duplicate(&d, at(10, 0, 0)));
        assert_eq!(filter.len(), 0);
    }

    #[test]
    fn test_unknown_check_does_not_retain() {
        let mut filter = UnknownFilter::new(0.6, Duration::minutes(60));
        let d = Descriptor::new(vec![0.0, 0.0]);

        assert!(!filter.is_duplicate(&d, at(10, 0, 0)));
        assert!(!filter.is_duplicate(&d, at(10, 1, 0)));
        assert_eq!(filter.len(), 0);
    }
}
