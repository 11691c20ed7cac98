//! Aggregate root traits for event-sourced domain models.

use crate::error::{DomainError, DomainResult};

/// Aggregate root marker + minimal interface.
///
/// This is intentionally small so domain modules can decide how they model
/// state transitions without bringing in any infrastructure concerns.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the aggregate's committed state.
    ///
    /// For event-sourced aggregates this is the number of events durably
    /// accepted by the event store and replayed into this instance. Events
    /// sitting in the uncommitted buffer do not count until `mark_committed`.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for an aggregate stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// The stream must not exist yet (first append creates it).
    NoStream,
    /// Require the stream to be at an exact version.
    Exact(u64),
    /// Skip version checking (useful for idempotent maintenance commands).
    Any,
}

impl ExpectedVersion {
    /// Expectation for the next append of an aggregate at `version`.
    ///
    /// Version 0 means the aggregate has never been committed, so the stream
    /// must not exist yet.
    pub fn for_aggregate_version(version: u64) -> Self {
        if version == 0 {
            ExpectedVersion::NoStream
        } else {
            ExpectedVersion::Exact(version)
        }
    }

    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::NoStream => actual == 0,
            ExpectedVersion::Exact(v) => v == actual,
            ExpectedVersion::Any => true,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}

/// Event-sourced aggregate lifecycle.
///
/// State is reconstructed by replaying the committed stream in order; domain
/// operations evolve state through `apply` and park the produced events in a
/// transient uncommitted buffer. The buffer is cleared exactly when the event
/// store durably accepts it: the write repository calls `mark_committed`
/// with the stream's new version after a successful append, never before.
///
/// `apply` must stay a pure state transition over a closed event enum
/// (exhaustive `match`, no side effects): replaying the full stream must
/// reproduce the exact in-memory state that produced it.
pub trait EventSourced: AggregateRoot {
    type Event: Clone + core::fmt::Debug;

    /// Evolve in-memory state from a single event. Deterministic, no IO.
    fn apply(&mut self, event: &Self::Event);

    /// Events appended by domain operations since reconstruction.
    fn uncommitted_events(&self) -> &[Self::Event];

    /// Clear the uncommitted buffer after the store accepted it, adopting
    /// the stream's new version.
    fn mark_committed(&mut self, new_version: u64);
}
