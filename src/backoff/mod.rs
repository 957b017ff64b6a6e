//! Retry and backoff for the two rate-limited externals
//!
//! The fetch domain reacts to anti-bot denials from a source site; the relay
//! domain reacts to throttling from the upload sink. Each source gets its own
//! [`BackoffController`] so blocking on one site never slows another.

mod controller;
mod policy;

pub use controller::BackoffController;
pub use policy::{
    FetchBackoffSettings, FetchOutcome, FetchPolicy, RelayBackoffSettings, RelayOutcome,
    RelayPolicy,
};
