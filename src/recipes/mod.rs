//! Higher-level coordination built on the client operations.

pub mod election;

pub use election::{ElectionCandidate, ElectionState, LeaderElection, LeaderWatcher};
