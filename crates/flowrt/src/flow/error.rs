//! Error taxonomy for the flow runtime
//!
//! `FlowError` is body-facing: it is the type step bodies and `StepContext`
//! operations return. `EngineError` is dispatch-facing: it is the type
//! `Engine::dispatch` returns for failures that never touch `FlowState`.

use uuid::Uuid;

/// Errors a flow body (or the `StepContext` operations it calls) may produce
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// Thrown by `interrupt`/`sleep`/`waitFor` when a drive must suspend.
    /// Always caught by the driver; never surfaced to a caller as an error.
    #[error("flow interrupted, awaiting external event")]
    Interrupted,

    /// `runFlow` completed a drive but the flow is not `done`
    #[error("flow is still running")]
    FlowStillRunning,

    /// The flow body itself failed
    #[error("flow execution failed: {message}")]
    Failed {
        message: String,
        stacktrace: Option<String>,
    },

    /// `waitFor` found a referenced flow id with no persisted state
    #[error("unresolvable dependency: {0}")]
    UnresolvableDependency(Uuid),

    /// Input or envelope failed to validate against a declared schema
    #[error("validation error: {0}")]
    Validation(String),

    /// `waitFor` called with an empty `flowIds` list
    #[error("waitFor requires a non-empty list of flow ids")]
    EmptyWaitForList,

    /// A collaborator (state store, scheduler) failed during a step
    #[error("collaborator error: {0}")]
    Collaborator(String),
}

impl FlowError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            stacktrace: None,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

/// Errors `Engine::dispatch` may return
///
/// These never mutate `FlowState`: either the envelope was rejected before a
/// drive started, or a collaborator failed outside of the body's control.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("envelope variant `{0}` is not supported by this flow (non-durable)")]
    NotDurable(&'static str),

    #[error("durable envelope dispatched but no state store is configured")]
    StateStoreMissing,

    #[error("unknown flow: {0}")]
    UnknownFlow(Uuid),

    #[error("resume dispatched for a flow that is not interrupted: {0}")]
    NotInterrupted(Uuid),

    #[error("envelope must set exactly one variant, found {0}")]
    MalformedEnvelope(usize),

    #[error("envelope variant `{0}` is reserved and not implemented")]
    NotImplemented(&'static str),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("state store error: {0}")]
    Store(#[from] crate::persistence::StoreError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] crate::scheduler::SchedulerError),

    #[error("unknown flow definition: {0}")]
    UnknownFlowType(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_error_interrupted_is_detected() {
        assert!(FlowError::Interrupted.is_interrupted());
        assert!(!FlowError::failed("boom").is_interrupted());
    }
}
