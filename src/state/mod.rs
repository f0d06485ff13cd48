//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `PageStatus`: the per-page crawl state machine (pending, fetching, done, failed)

mod page_state;

pub use page_state::PageStatus;
