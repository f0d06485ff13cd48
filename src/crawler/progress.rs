//! Ingestion progress reporting
//!
//! The pipeline reports discrete events to a [`ProgressSink`]. Sinks are
//! one-way: they return nothing and cannot influence control flow.

use std::fmt;
use tracing::{debug, info, warn};

/// Pipeline phase an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPhase {
    Discovery,
    Crawl,
}

impl fmt::Display for ProgressPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressPhase::Discovery => write!(f, "discovery"),
            ProgressPhase::Crawl => write!(f, "crawl"),
        }
    }
}

/// How a single page settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    Success,
    Skip,
    Error,
}

/// A progress event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub phase: ProgressPhase,
    pub current: u64,
    pub total: u64,
    pub url: Option<String>,
    pub outcome: Option<PageOutcome>,
    pub message: Option<String>,
}

impl ProgressEvent {
    /// A discovery-phase status message
    pub fn discovery(current: u64, total: u64, message: impl Into<String>) -> Self {
        Self {
            phase: ProgressPhase::Discovery,
            current,
            total,
            url: None,
            outcome: None,
            message: Some(message.into()),
        }
    }

    /// Aggregate crawl state before a batch is fetched
    pub fn batch(done: u64, total: u64) -> Self {
        Self {
            phase: ProgressPhase::Crawl,
            current: done,
            total,
            url: None,
            outcome: None,
            message: Some(format!("Crawling... ({}/{})", done, total)),
        }
    }

    /// One page settled
    pub fn page(
        current: u64,
        total: u64,
        url: &str,
        outcome: PageOutcome,
        message: Option<String>,
    ) -> Self {
        Self {
            phase: ProgressPhase::Crawl,
            current,
            total,
            url: Some(url.to_string()),
            outcome: Some(outcome),
            message,
        }
    }
}

/// Receives progress events
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

/// Discards every event
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _event: &ProgressEvent) {}
}

/// Forwards events to `tracing`
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn report(&self, event: &ProgressEvent) {
        let url = event.url.as_deref().unwrap_or("");
        let message = event.message.as_deref().unwrap_or("");
        match event.outcome {
            None => info!(
                phase = %event.phase,
                current = event.current,
                total = event.total,
                "{}",
                message
            ),
            Some(PageOutcome::Success) => {
                debug!(current = event.current, total = event.total, url, "Stored page")
            }
            Some(PageOutcome::Skip) => info!(url, reason = message, "Skipped page"),
            Some(PageOutcome::Error) => warn!(url, error = message, "Page failed"),
        }
    }
}
