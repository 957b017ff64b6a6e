//! Output module for run summaries and ledger statistics
//!
//! This module handles:
//! - Counting what a run did ([`RunStats`])
//! - Printing and rendering end-of-run summaries
//! - Reading and printing per-source ledger statistics

pub mod stats;

pub use stats::{
    load_statistics, print_statistics, print_summary, RunCounters, RunStats, RunSummary,
    SourceStatistics,
};
