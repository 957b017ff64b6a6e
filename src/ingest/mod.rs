//! Ingestion side of the pipeline
//!
//! [`IngestPool`] drains the pending queue in batches; [`process_one`]
//! carries a single item from detail page to relayed artifact.

mod pipeline;
mod pool;

pub use pipeline::{process_one, ItemFailure, ItemOutcome};
pub use pool::IngestPool;
