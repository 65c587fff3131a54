//! The persisted record of a flow instance

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// One entry in a flow's step memoization cache
///
/// A step either produced a value (possibly `null`) or completed with no
/// value at all (`sleep` uses this branch).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(untagged)]
pub enum CacheEntry {
    Value { value: serde_json::Value },
    Empty { empty: bool },
}

impl CacheEntry {
    pub fn value(value: serde_json::Value) -> Self {
        Self::Value { value }
    }

    pub fn empty() -> Self {
        Self::Empty { empty: true }
    }

    pub fn as_value(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Value { value } => Some(value),
            Self::Empty { .. } => None,
        }
    }
}

/// The step a flow is currently suspended on, awaiting an external event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct BlockedStep {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,
}

/// One drive of a flow's body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, ToSchema)]
pub struct ExecutionRecord {
    pub start_time: DateTime<Utc>,
    pub trace_ids: Vec<String>,
}

/// Serialized root span context, used to link successive drives into one trace
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
}

/// Caller-visible status of a flow instance: the long-running-operation projection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Operation {
    /// The flow id, as a string, per the wire format
    pub name: String,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<OperationResult>,
}

impl Operation {
    pub fn pending(flow_id: Uuid) -> Self {
        Self {
            name: flow_id.to_string(),
            done: false,
            result: None,
        }
    }
}

/// The outcome carried by a finished [`Operation`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(untagged)]
pub enum OperationResult {
    Response {
        response: serde_json::Value,
    },
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stacktrace: Option<String>,
    },
}

/// The persisted record of a flow instance
///
/// Ownership: a `FlowState` is exclusively owned by at most one active drive
/// at any instant. The engine itself does not lock; callers are responsible
/// for serializing `runScheduled`/`resume` dispatch for the same `flow_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct FlowState {
    pub flow_id: Uuid,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub input: serde_json::Value,
    pub cache: HashMap<String, CacheEntry>,
    pub events_triggered: HashMap<String, serde_json::Value>,
    pub blocked_on_step: Option<BlockedStep>,
    pub executions: Vec<ExecutionRecord>,
    pub trace_context: Option<TraceContext>,
    pub operation: Operation,
}

impl FlowState {
    /// Construct the state for a freshly started instance
    pub fn fresh(flow_id: Uuid, name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            flow_id,
            name: name.into(),
            start_time: Utc::now(),
            input,
            cache: HashMap::new(),
            events_triggered: HashMap::new(),
            blocked_on_step: None,
            executions: Vec::new(),
            trace_context: None,
            operation: Operation::pending(flow_id),
        }
    }

    pub fn is_done(&self) -> bool {
        self.operation.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_is_pending() {
        let state = FlowState::fresh(Uuid::now_v7(), "echo", serde_json::json!({"msg": "hi"}));
        assert!(!state.is_done());
        assert!(state.blocked_on_step.is_none());
        assert!(state.cache.is_empty());
    }

    #[test]
    fn cache_entry_roundtrips() {
        let value = CacheEntry::value(serde_json::json!(42));
        let json = serde_json::to_string(&value).unwrap();
        let parsed: CacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(value, parsed);

        let empty = CacheEntry::empty();
        let json = serde_json::to_string(&empty).unwrap();
        let parsed: CacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(empty, parsed);
    }

    #[test]
    fn operation_result_serializes_untagged() {
        let ok = OperationResult::Response {
            response: serde_json::json!({"v": 1}),
        };
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json, serde_json::json!({"response": {"v": 1}}));

        let err = OperationResult::Error {
            error: "boom".into(),
            stacktrace: None,
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json, serde_json::json!({"error": "boom"}));
    }
}
