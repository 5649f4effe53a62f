//! presence-core — Entry/exit presence reconciliation.
//!
//! Consumes face-match sightings from Entry/Exit cameras and decides how to
//! open, reaffirm, and close presence sessions, recording completed visits
//! in an append-only ledger. Face matching itself is an external
//! collaborator; this crate only consumes its output.

pub mod engine;
pub mod filter;
pub mod matcher;
pub mod store;
pub mod types;

pub use engine::{Engine, EngineError, EnginePolicy};
pub use matcher::{DistanceMatcher, EnrolledFace, MatchOutcome, Matcher};
pub use store::{
    Backend, Directory, MemoryBackend, SessionStore, StoreError, UnknownSink, VisitLedger,
};
pub use types::{
    AnomalyKind, CameraRole, CompletedVisit, Descriptor, Identity, PresenceSession,
    ReconciliationResult, Sighting, SuppressReason, UnknownOutcome,
};
