//! Delayed-dispatch back-end: enqueues a future `runScheduled` drive

mod memory;

use async_trait::async_trait;

pub use memory::InMemoryScheduler;

use crate::flow::envelope::Envelope;

/// Errors a [`Scheduler`] implementation may return
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler backend unavailable: {0}")]
    BackendUnavailable(String),
}

/// Enqueues a future invocation of `engine.dispatch(envelope)` on the flow
/// identified by `flow_name`, after `delay_seconds`.
///
/// An in-process reference implementation using a delay-then-invoke timer is
/// acceptable for non-production use (§6); [`InMemoryScheduler`] is exactly
/// that.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn schedule(
        &self,
        flow_name: &str,
        envelope: Envelope,
        delay_seconds: u64,
    ) -> Result<(), SchedulerError>;
}
