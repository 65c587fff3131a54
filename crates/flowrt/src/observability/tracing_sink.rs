//! Forwards trace events into the `tracing` crate's own span machinery,
//! grounded in the corpus's `ObservabilityBackend` event-forwarding pattern

use async_trait::async_trait;
use tracing::{debug, error, info};

use super::TraceSink;
use crate::flow::envelope::Labels;
use crate::flow::state::TraceContext;

/// Emits `tracing` events for every sink callback, so a local
/// `tracing-subscriber` shows drive activity without an external collector.
pub struct TracingTraceSink;

#[async_trait]
impl TraceSink for TracingTraceSink {
    async fn new_trace(&self, name: &str, labels: &Labels, links: Option<&TraceContext>) {
        info!(
            flow = name,
            labels = ?labels,
            linked_trace_id = links.map(|l| l.trace_id.as_str()),
            "new trace"
        );
    }

    fn set_custom_metadata_attribute(&self, key: &str, value: serde_json::Value) {
        debug!(key, %value, "custom metadata attribute");
    }

    fn set_custom_metadata_attributes(&self, attrs: &serde_json::Value) {
        debug!(%attrs, "custom metadata attributes");
    }

    fn record_state(&self, step: &str, state: &str) {
        debug!(step, state, "step state");
    }

    fn record_exception(&self, message: &str) {
        error!(message, "exception recorded");
    }
}
