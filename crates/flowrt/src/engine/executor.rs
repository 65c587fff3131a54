//! The engine: dispatches envelopes, drives flow bodies, writes results back

use std::sync::Arc;

use chrono::Utc;
use tracing::{instrument, Instrument};
use uuid::Uuid;

use super::registry::{AnyFlow, FlowRegistry};
use crate::context::StepContext;
use crate::flow::definition::AuthContext;
use crate::flow::envelope::{Envelope, EnvelopeVariant, Labels};
use crate::flow::error::{EngineError, FlowError};
use crate::flow::state::{ExecutionRecord, FlowState, OperationResult, TraceContext};
use crate::observability::{NoopTraceSink, TraceSink};
use crate::persistence::StateStore;
use crate::scheduler::{InMemoryScheduler, Scheduler};
use crate::streaming::StreamSender;

/// Safety valve mirrored from the grounding engine's `max_events_per_workflow`
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_cache_entries_per_flow: usize,
    /// When set, non-durable flows are persisted too, if a store is configured.
    pub development_mode: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_cache_entries_per_flow: 10_000,
            development_mode: false,
        }
    }
}

/// Dispatches envelopes against a [`FlowRegistry`], driving bodies through
/// [`StepContext`] and persisting through an optional [`StateStore`].
pub struct Engine {
    registry: FlowRegistry,
    store: Option<Arc<dyn StateStore>>,
    scheduler: Arc<dyn Scheduler>,
    trace_sink: Arc<dyn TraceSink>,
    config: ExecutorConfig,
}

impl Engine {
    /// Builds an engine with its own [`InMemoryScheduler`], wired so that
    /// timers it fires (from `schedule`, `sleep`, `waitFor`) re-enter this
    /// same engine's `dispatch`.
    pub async fn new(registry: FlowRegistry, store: Option<Arc<dyn StateStore>>) -> Arc<Self> {
        Self::with_config(registry, store, ExecutorConfig::default()).await
    }

    pub async fn with_config(
        registry: FlowRegistry,
        store: Option<Arc<dyn StateStore>>,
        config: ExecutorConfig,
    ) -> Arc<Self> {
        let scheduler = Arc::new(InMemoryScheduler::new());
        let engine = Arc::new(Self {
            registry,
            store,
            scheduler: scheduler.clone(),
            trace_sink: Arc::new(NoopTraceSink),
            config,
        });
        engine.wire_self_scheduling(&scheduler).await;
        engine
    }

    /// Builds an engine from caller-supplied collaborators. The caller is
    /// responsible for wiring `scheduler` back into `dispatch` if it needs
    /// to re-enter the engine (see [`InMemoryScheduler::set_dispatcher`]).
    pub fn with_collaborators(
        registry: FlowRegistry,
        store: Option<Arc<dyn StateStore>>,
        scheduler: Arc<dyn Scheduler>,
        trace_sink: Arc<dyn TraceSink>,
        config: ExecutorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            store,
            scheduler,
            trace_sink,
            config,
        })
    }

    pub fn registry(&self) -> &FlowRegistry {
        &self.registry
    }

    pub fn store(&self) -> Option<&Arc<dyn StateStore>> {
        self.store.as_ref()
    }

    async fn wire_self_scheduling(self: &Arc<Self>, scheduler: &Arc<InMemoryScheduler>) {
        let engine = Arc::clone(self);
        scheduler
            .set_dispatcher(Arc::new(move |envelope: Envelope| {
                let engine = Arc::clone(&engine);
                Box::pin(async move {
                    let flow_name = match &envelope.run_scheduled {
                        Some(rs) => engine.resolve_flow_name_for(rs.flow_id).await,
                        None => None,
                    };
                    if let Some(flow_name) = flow_name {
                        if let Err(err) = engine.dispatch(&flow_name, envelope, None, None).await {
                            tracing::warn!(error = %err, "scheduled dispatch failed");
                        }
                    }
                })
            }))
            .await;
    }

    async fn resolve_flow_name_for(&self, flow_id: Uuid) -> Option<String> {
        let store = self.store.as_ref()?;
        store.load(flow_id).await.ok().flatten().map(|s| s.name)
    }

    /// `dispatch(envelope, streamCallback?, authCtx?) → FlowState`
    #[instrument(skip(self, envelope, stream, auth_ctx), fields(flow = %flow_name))]
    pub async fn dispatch(
        self: &Arc<Self>,
        flow_name: &str,
        envelope: Envelope,
        stream: Option<StreamSender<serde_json::Value>>,
        auth_ctx: Option<&AuthContext>,
    ) -> Result<FlowState, EngineError> {
        let variant_count = envelope.variant_count();
        let variant = envelope
            .resolve()
            .ok_or(EngineError::MalformedEnvelope(variant_count))?;

        let flow = self
            .registry
            .get(flow_name)
            .map_err(|_| EngineError::UnknownFlowType(flow_name.to_string()))?;

        if let Some(policy) = flow.auth_policy() {
            let ctx = auth_ctx.cloned().unwrap_or_default();
            policy
                .check(&ctx)
                .await
                .map_err(|e| EngineError::PermissionDenied(e.to_string()))?;
        }

        match variant {
            EnvelopeVariant::Start(start) => {
                self.handle_start(flow, start.input, start.labels.unwrap_or_default(), stream)
                    .await
            }
            EnvelopeVariant::Schedule(sched) => self.handle_schedule(flow, sched.input, sched.delay).await,
            EnvelopeVariant::RunScheduled(rs) => self.handle_run_scheduled(flow, rs.flow_id).await,
            EnvelopeVariant::Resume(r) => self.handle_resume(flow, r.flow_id, r.payload).await,
            EnvelopeVariant::State(s) => self.handle_state(flow, s.flow_id).await,
            EnvelopeVariant::Retry(_) => Err(EngineError::NotImplemented("retry")),
        }
    }

    async fn handle_start(
        self: &Arc<Self>,
        flow: Arc<dyn AnyFlow>,
        input: serde_json::Value,
        labels: Labels,
        stream: Option<StreamSender<serde_json::Value>>,
    ) -> Result<FlowState, EngineError> {
        let flow_id = Uuid::now_v7();
        let state = FlowState::fresh(flow_id, flow.name(), input);
        let final_state = self.execute(flow.clone(), state, "start", &labels, stream).await;

        let should_persist = flow.durable() || self.config.development_mode;
        if should_persist {
            match &self.store {
                Some(store) => store.save(flow_id, final_state.clone()).await?,
                None if flow.durable() => return Err(EngineError::StateStoreMissing),
                None => {}
            }
        }

        Ok(final_state)
    }

    async fn handle_schedule(
        self: &Arc<Self>,
        flow: Arc<dyn AnyFlow>,
        input: serde_json::Value,
        delay: u64,
    ) -> Result<FlowState, EngineError> {
        if !flow.durable() {
            return Err(EngineError::NotDurable("schedule"));
        }
        let store = self.store.clone().ok_or(EngineError::StateStoreMissing)?;

        let flow_id = Uuid::now_v7();
        let mut state = FlowState::fresh(flow_id, flow.name(), input);
        store.save(flow_id, state.clone()).await?;

        let scheduler = flow.scheduler_override().unwrap_or_else(|| self.scheduler.clone());
        let envelope = Envelope::run_scheduled_for(flow_id);
        if let Err(err) = scheduler.schedule(flow.name(), envelope, delay).await {
            state.operation.done = true;
            state.operation.result = Some(OperationResult::Error {
                error: err.to_string(),
                stacktrace: None,
            });
            store.save(flow_id, state.clone()).await?;
        }

        Ok(state)
    }

    async fn handle_run_scheduled(
        self: &Arc<Self>,
        flow: Arc<dyn AnyFlow>,
        flow_id: Uuid,
    ) -> Result<FlowState, EngineError> {
        if !flow.durable() {
            return Err(EngineError::NotDurable("runScheduled"));
        }
        let store = self.store.clone().ok_or(EngineError::StateStoreMissing)?;
        let state = store
            .load(flow_id)
            .await?
            .ok_or(EngineError::UnknownFlow(flow_id))?;

        if state.is_done() {
            tracing::debug!(%flow_id, "flow already in terminal state, skipping replay");
            return Ok(state);
        }

        let final_state = self
            .execute(flow, state, "runScheduled", &Labels::default(), None)
            .await;
        store.save(flow_id, final_state.clone()).await?;
        Ok(final_state)
    }

    async fn handle_resume(
        self: &Arc<Self>,
        flow: Arc<dyn AnyFlow>,
        flow_id: Uuid,
        payload: serde_json::Value,
    ) -> Result<FlowState, EngineError> {
        if !flow.durable() {
            return Err(EngineError::NotDurable("resume"));
        }
        let store = self.store.clone().ok_or(EngineError::StateStoreMissing)?;
        let mut state = store
            .load(flow_id)
            .await?
            .ok_or(EngineError::UnknownFlow(flow_id))?;

        let blocked = state
            .blocked_on_step
            .clone()
            .ok_or(EngineError::NotInterrupted(flow_id))?;
        state.events_triggered.insert(blocked.name, payload);

        let final_state = self.execute(flow, state, "resume", &Labels::default(), None).await;
        store.save(flow_id, final_state.clone()).await?;
        Ok(final_state)
    }

    async fn handle_state(
        self: &Arc<Self>,
        flow: Arc<dyn AnyFlow>,
        flow_id: Uuid,
    ) -> Result<FlowState, EngineError> {
        if !flow.durable() {
            return Err(EngineError::NotDurable("state"));
        }
        let store = self.store.clone().ok_or(EngineError::StateStoreMissing)?;
        store
            .load(flow_id)
            .await?
            .ok_or(EngineError::UnknownFlow(flow_id))
    }

    /// The inner driver: opens a root span, links trace context, invokes the
    /// body, and writes back `operation`/`blockedOnStep` on exit.
    async fn execute(
        self: &Arc<Self>,
        flow: Arc<dyn AnyFlow>,
        mut state: FlowState,
        dispatch_type: &'static str,
        labels: &Labels,
        stream: Option<StreamSender<serde_json::Value>>,
    ) -> FlowState {
        let trace_id = Uuid::now_v7().to_string();
        if state.trace_context.is_none() {
            state.trace_context = Some(TraceContext {
                trace_id: trace_id.clone(),
                span_id: trace_id.clone(),
            });
        }
        state.executions.push(ExecutionRecord {
            start_time: Utc::now(),
            trace_ids: vec![trace_id.clone()],
        });

        self.trace_sink
            .new_trace(flow.name(), labels, state.trace_context.as_ref())
            .await;
        for (key, value) in labels {
            self.trace_sink
                .set_custom_metadata_attribute(key, serde_json::Value::String(value.clone()));
        }
        self.trace_sink.set_custom_metadata_attribute("input", state.input.clone());

        let span = tracing::info_span!(
            "flow_drive",
            name = %state.name,
            id = %state.flow_id,
            dispatch_type,
            execution = state.executions.len(),
            trace_id = %trace_id,
        );

        let input = state.input.clone();
        let scheduler = flow.scheduler_override().unwrap_or_else(|| self.scheduler.clone());
        let ctx = StepContext::new(state, scheduler, self.store.clone(), self.trace_sink.clone());
        let stream_sender = stream.unwrap_or_else(|| crate::streaming::channel(None).0);
        let invoke_ctx = ctx.clone();
        let invoke_flow = flow.clone();

        let result = ctx
            .clone()
            .scoped(move || async move { invoke_flow.invoke(input, invoke_ctx, stream_sender).await })
            .instrument(span)
            .await;

        let mut final_state = ctx.snapshot().await;
        match result {
            Ok(output) => {
                final_state.operation.done = true;
                final_state.operation.result = Some(OperationResult::Response { response: output });
                self.trace_sink.record_state("flow", "done");
            }
            Err(FlowError::Interrupted) => {
                self.trace_sink.record_state("flow", "interrupted");
            }
            Err(err) => {
                final_state.operation.done = true;
                final_state.operation.result = Some(OperationResult::Error {
                    error: err.to_string(),
                    stacktrace: None,
                });
                self.trace_sink.record_state("flow", "error");
                self.trace_sink.record_exception(&err.to_string());
            }
        }

        final_state
    }
}
