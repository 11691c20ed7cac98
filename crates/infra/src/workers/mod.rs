//! Background worker loops (CDC consumption).

pub mod cdc_consumer;

pub use cdc_consumer::{CdcConsumerWorker, WorkerHandle};
