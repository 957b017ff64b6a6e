//! State module for tracking ingestion progress
//!
//! # Components
//!
//! - `ItemStatus`: work-queue status of a discovered item (pending, processing, completed, failed)
//! - `SeenCache`: injected cache of processed urls and relayed content identities

mod cache;
mod item_status;

// Re-export main types
pub use cache::{IdentityClaim, IdentityReservation, SeenCache};
pub use item_status::ItemStatus;
