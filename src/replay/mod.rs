//! Replay: pre-flight refusal, hermetic sandbox, and event-by-event
//! verification against recorded checkpoints.

pub mod controller;
pub mod divergence;
pub mod sandbox;

pub use controller::{ReplayController, ReplayReport, ReplayState};
pub use divergence::{Divergence, DivergenceRecord};
pub use sandbox::{
    Access, BlockedOperation, DatabaseGuard, FileSystemGuard, GuardedOperation, IpcGuard,
    NetworkGuard, Sandbox, SystemServiceGuard,
};
