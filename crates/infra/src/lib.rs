//! Infrastructure layer: event store, outbox, CDC, read models, workers.
//!
//! Everything here composes the abstractions from `wirepay-core` and
//! `wirepay-events` into the write→notify→project pipeline:
//!
//! ```text
//! command handler → write repository → event store (append, fan-out)
//!                                    → CDC publisher → outbox
//! outbox processor → message broker → CDC consumer → read model
//! ```

pub mod broker;
pub mod cdc;
pub mod event_store;
pub mod outbox;
pub mod projections;
pub mod read_model;
pub mod workers;
pub mod write_repository;
