//! The tracing sink collaborator: receives span start/end/attribute events

mod tracing_sink;

use async_trait::async_trait;

use crate::flow::envelope::Labels;
use crate::flow::state::TraceContext;

pub use tracing_sink::TracingTraceSink;

/// Receives span lifecycle and attribute events emitted by the engine
///
/// Implementations may be no-ops (§6); the engine's own correctness never
/// depends on a sink being present.
#[async_trait]
pub trait TraceSink: Send + Sync {
    /// A new root span has opened for a drive, linked to a prior trace context
    /// if this is not the flow's first execution.
    async fn new_trace(&self, name: &str, labels: &Labels, links: Option<&TraceContext>);

    fn set_custom_metadata_attribute(&self, key: &str, value: serde_json::Value);

    fn set_custom_metadata_attributes(&self, attrs: &serde_json::Value);

    /// One of the `state=` attributes named throughout §4 (`cached`, `run`,
    /// `skipped`, `dispatch`, `interrupted`, `interrupt`, `error`, `done`).
    fn record_state(&self, step: &str, state: &str);

    fn record_exception(&self, message: &str);
}

/// A `TraceSink` that discards everything
pub struct NoopTraceSink;

#[async_trait]
impl TraceSink for NoopTraceSink {
    async fn new_trace(&self, _name: &str, _labels: &Labels, _links: Option<&TraceContext>) {}
    fn set_custom_metadata_attribute(&self, _key: &str, _value: serde_json::Value) {}
    fn set_custom_metadata_attributes(&self, _attrs: &serde_json::Value) {}
    fn record_state(&self, _step: &str, _state: &str) {}
    fn record_exception(&self, _message: &str) {}
}
