//! Real-time transit vehicle matching.
//!
//! Consumes a stream of AVL reports (GPS fixes with optional block or trip
//! assignments), resolves each assignment against the schedule, and keeps a
//! continuously updated match of every vehicle to a position along its
//! block. Downstream consumers subscribe to [`MatchingEngine::subscribe`]
//! for per-report state snapshots.
//!
//! The entry point is [`MatchingEngine::process_report`]; everything else is
//! the machinery behind it.

pub mod assigner;
pub mod avl;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod geo;
pub mod matching;
pub mod schedule;
pub mod state;
pub mod timeout;

#[cfg(test)]
pub(crate) mod testutil;

pub use avl::{AssignmentType, AvlReport};
pub use config::CoreConfig;
pub use engine::MatchingEngine;
pub use error::CoreError;
pub use matching::{Indices, TemporalDifference, TemporalMatch};
pub use state::{BlockAssignmentMethod, VehicleState};
