//! The tagged-union dispatch input to `Engine::dispatch`

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Labels attached to a `start` envelope, surfaced as trace attributes
pub type Labels = std::collections::HashMap<String, String>;

/// The engine's single dispatch input
///
/// Exactly one field must be set; this is enforced by [`Envelope::variant_count`]
/// rather than by the wire schema, since a `#[serde(tag = ...)]` enum would
/// reject payloads that don't look like the JSON wire format in use
/// (top-level keys, not an internally-tagged discriminant).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<StartEnvelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleEnvelope>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "runScheduled")]
    pub run_scheduled: Option<RunScheduledEnvelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume: Option<ResumeEnvelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StateEnvelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryEnvelope>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartEnvelope {
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Labels>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEnvelope {
    #[serde(default)]
    pub input: serde_json::Value,
    pub delay: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunScheduledEnvelope {
    pub flow_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeEnvelope {
    pub flow_id: Uuid,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateEnvelope {
    pub flow_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryEnvelope {
    pub flow_id: Uuid,
}

/// One resolved, exhaustively-matchable envelope variant
pub enum EnvelopeVariant {
    Start(StartEnvelope),
    Schedule(ScheduleEnvelope),
    RunScheduled(RunScheduledEnvelope),
    Resume(ResumeEnvelope),
    State(StateEnvelope),
    Retry(RetryEnvelope),
}

impl Envelope {
    pub fn start(input: serde_json::Value) -> Self {
        Self {
            start: Some(StartEnvelope { input, labels: None }),
            ..Default::default()
        }
    }

    pub fn resume(flow_id: Uuid, payload: serde_json::Value) -> Self {
        Self {
            resume: Some(ResumeEnvelope { flow_id, payload }),
            ..Default::default()
        }
    }

    pub fn state(flow_id: Uuid) -> Self {
        Self {
            state: Some(StateEnvelope { flow_id }),
            ..Default::default()
        }
    }

    pub fn run_scheduled_for(flow_id: Uuid) -> Self {
        Self {
            run_scheduled: Some(RunScheduledEnvelope { flow_id }),
            ..Default::default()
        }
    }

    pub fn variant_count(&self) -> usize {
        [
            self.start.is_some(),
            self.schedule.is_some(),
            self.run_scheduled.is_some(),
            self.resume.is_some(),
            self.state.is_some(),
            self.retry.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }

    /// Resolve to exactly one variant, or `None` if zero or multiple are set
    pub fn resolve(self) -> Option<EnvelopeVariant> {
        if self.variant_count() != 1 {
            return None;
        }
        if let Some(v) = self.start {
            return Some(EnvelopeVariant::Start(v));
        }
        if let Some(v) = self.schedule {
            return Some(EnvelopeVariant::Schedule(v));
        }
        if let Some(v) = self.run_scheduled {
            return Some(EnvelopeVariant::RunScheduled(v));
        }
        if let Some(v) = self.resume {
            return Some(EnvelopeVariant::Resume(v));
        }
        if let Some(v) = self.state {
            return Some(EnvelopeVariant::State(v));
        }
        if let Some(v) = self.retry {
            return Some(EnvelopeVariant::Retry(v));
        }
        unreachable!("variant_count()==1 but no field set")
    }
}
