//! Gallery matching for enrolled faces.
//!
//! The detection pipeline hands the tracker a raw descriptor; this module
//! decides which enrolled person (if any) it belongs to. Matching is by
//! Euclidean distance in descriptor space, where the reference pipeline
//! treats distances under 0.6 as the same person.

use crate::types::{Descriptor, Identity};
use serde::{Deserialize, Serialize};

/// One enrolled descriptor with its owner. A person enrolled from several
/// photos appears once per descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrolledFace {
    pub identity: Identity,
    pub name: String,
    pub descriptor: Descriptor,
}

/// Result of matching a probe descriptor against the gallery.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub matched: bool,
    /// Distance of the best candidate; 1.0 when the gallery is empty.
    pub distance: f32,
    pub identity: Option<Identity>,
    pub name: Option<String>,
}

impl MatchOutcome {
    /// Confidence score derived from distance, clamped to [0, 1].
    pub fn confidence(&self) -> f32 {
        (1.0 - self.distance).clamp(0.0, 1.0)
    }
}

/// Strategy for comparing a probe descriptor against the enrolled gallery.
pub trait Matcher {
    fn compare(&self, probe: &Descriptor, gallery: &[EnrolledFace], tolerance: f32) -> MatchOutcome;
}

/// Nearest-neighbor Euclidean matcher: the best candidate wins only if its
/// distance is under the tolerance.
pub struct DistanceMatcher;

impl Matcher for DistanceMatcher {
    fn compare(&self, probe: &Descriptor, gallery: &[EnrolledFace], tolerance: f32) -> MatchOutcome {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, face) in gallery.iter().enumerate() {
            let dist = probe.distance(&face.descriptor);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist < tolerance => MatchOutcome {
                matched: true,
                distance: best_dist,
                identity: Some(gallery[idx].identity.clone()),
                name: Some(gallery[idx].name.clone()),
            },
            _ => MatchOutcome {
                matched: false,
                distance: if best_dist.is_finite() { best_dist } else { 1.0 },
                identity: None,
                name: None,
            },
        }
    }
}
