//! Per-drive runtime bound to one `FlowState`
//!
//! `StepContext` is the object a flow body calls into: `run`, `interrupt`,
//! `sleep`, `waitFor`. It owns the live, in-memory view of a `FlowState` for
//! the duration of one drive and is cheap to clone (an `Arc` handle) so it
//! can be threaded into nested step bodies.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::flow::definition::Schema;
use crate::flow::envelope::Envelope;
use crate::flow::error::FlowError;
use crate::flow::state::{BlockedStep, CacheEntry, FlowState, Operation};
use crate::observability::TraceSink;
use crate::persistence::StateStore;
use crate::scheduler::Scheduler;

tokio::task_local! {
    /// The `StepContext` of the drive running on the current task, if any.
    /// Installed for the duration of a drive and cleared on exit (§5).
    static CURRENT: StepContext;
}

/// Request payload for `StepContext::wait_for`
#[derive(Debug, Clone)]
pub struct WaitForRequest {
    pub step_name: String,
    pub flow_ids: Vec<Uuid>,
    pub polling_interval_secs: Option<u64>,
}

struct Inner {
    flow_id: Uuid,
    flow_name: String,
    state: Mutex<FlowState>,
    seen_steps: Mutex<HashMap<String, u32>>,
    depth: AtomicUsize,
    scheduler: Arc<dyn Scheduler>,
    state_store: Option<Arc<dyn StateStore>>,
    trace_sink: Arc<dyn TraceSink>,
}

/// A cheaply-cloneable handle onto the state of one drive
#[derive(Clone)]
pub struct StepContext {
    inner: Arc<Inner>,
}

/// Increments the call-tree depth on construction, decrements on drop.
/// Guarantees the depth counter is restored even if a step future errors.
struct DepthGuard<'a>(&'a AtomicUsize);

impl<'a> DepthGuard<'a> {
    fn enter(depth: &'a AtomicUsize) -> Self {
        depth.fetch_add(1, Ordering::SeqCst);
        Self(depth)
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl StepContext {
    pub fn new(
        state: FlowState,
        scheduler: Arc<dyn Scheduler>,
        state_store: Option<Arc<dyn StateStore>>,
        trace_sink: Arc<dyn TraceSink>,
    ) -> Self {
        let flow_id = state.flow_id;
        let flow_name = state.name.clone();
        Self {
            inner: Arc::new(Inner {
                flow_id,
                flow_name,
                state: Mutex::new(state),
                seen_steps: Mutex::new(HashMap::new()),
                depth: AtomicUsize::new(0),
                scheduler,
                state_store,
                trace_sink,
            }),
        }
    }

    pub fn flow_id(&self) -> Uuid {
        self.inner.flow_id
    }

    /// Run `f` with this context installed as the ambient "current drive".
    pub async fn scoped<F, Fut, T>(self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        CURRENT.scope(self, f()).await
    }

    /// Retrieve the ambient context of the drive running on this task, if any.
    pub fn current() -> Option<StepContext> {
        CURRENT.try_with(|ctx| ctx.clone()).ok()
    }

    /// Snapshot the current `FlowState`. Intended for the driver's exit paths.
    pub async fn snapshot(&self) -> FlowState {
        self.inner.state.lock().await.clone()
    }

    async fn resolve_step_name(&self, logical_name: &str) -> String {
        let mut seen = self.inner.seen_steps.lock().await;
        match seen.get_mut(logical_name) {
            None => {
                seen.insert(logical_name.to_string(), 0);
                logical_name.to_string()
            }
            Some(count) => {
                *count += 1;
                format!("{logical_name}-{count}")
            }
        }
    }

    /// `run(config, input?, fn) → T` — memoized only at the root of the call tree.
    #[instrument(skip(self, f), fields(flow_id = %self.inner.flow_id))]
    pub async fn run<T, F, Fut>(&self, logical_name: &str, f: F) -> Result<T, FlowError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FlowError>>,
    {
        let resolved = self.resolve_step_name(logical_name).await;
        let is_root = self.inner.depth.load(Ordering::SeqCst) == 0;

        if is_root {
            let state = self.inner.state.lock().await;
            if let Some(entry) = state.cache.get(&resolved) {
                if let Some(value) = entry.as_value() {
                    let typed: T = serde_json::from_value(value.clone())
                        .map_err(|e| FlowError::Validation(e.to_string()))?;
                    self.inner.trace_sink.record_state(&resolved, "cached");
                    debug!(step = %resolved, state = "cached", "step memoized");
                    return Ok(typed);
                }
            }
        }

        let _guard = DepthGuard::enter(&self.inner.depth);
        let result = f().await?;

        if is_root {
            let json = serde_json::to_value(&result).map_err(|e| FlowError::Validation(e.to_string()))?;
            let mut state = self.inner.state.lock().await;
            state.cache.insert(resolved.clone(), CacheEntry::value(json));
            self.inner.trace_sink.record_state(&resolved, "run");
            debug!(step = %resolved, state = "run", "step executed");
        }

        Ok(result)
    }

    /// `interrupt(stepName, fn, responseSchema?, skipCache?) → T`
    #[instrument(skip(self, f, response_schema), fields(flow_id = %self.inner.flow_id))]
    pub async fn interrupt<T, F, Fut>(
        &self,
        step_name: &str,
        f: F,
        response_schema: Option<&Schema<T>>,
        skip_cache: bool,
    ) -> Result<T, FlowError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(serde_json::Value) -> Fut,
        Fut: Future<Output = Result<T, FlowError>>,
    {
        let resolved = self.resolve_step_name(step_name).await;
        self.interrupt_resolved(resolved, f, response_schema, skip_cache)
            .await
    }

    async fn interrupt_resolved<T, F, Fut>(
        &self,
        resolved: String,
        f: F,
        response_schema: Option<&Schema<T>>,
        skip_cache: bool,
    ) -> Result<T, FlowError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(serde_json::Value) -> Fut,
        Fut: Future<Output = Result<T, FlowError>>,
    {
        if !skip_cache {
            let state = self.inner.state.lock().await;
            if let Some(entry) = state.cache.get(&resolved) {
                if let Some(value) = entry.as_value() {
                    let typed: T = serde_json::from_value(value.clone())
                        .map_err(|e| FlowError::Validation(e.to_string()))?;
                    self.inner.trace_sink.record_state(&resolved, "skipped");
                    debug!(step = %resolved, state = "skipped", "interrupt short-circuited by cache");
                    return Ok(typed);
                }
            }
        }

        let payload = {
            let mut state = self.inner.state.lock().await;
            state.events_triggered.remove(&resolved)
        };

        if let Some(payload) = payload {
            return match f(payload).await {
                Ok(value) => {
                    let mut state = self.inner.state.lock().await;
                    state.blocked_on_step = None;
                    if !skip_cache {
                        let json = serde_json::to_value(&value)
                            .map_err(|e| FlowError::Validation(e.to_string()))?;
                        state.cache.insert(resolved.clone(), CacheEntry::value(json));
                    }
                    self.inner.trace_sink.record_state(&resolved, "dispatch");
                    debug!(step = %resolved, state = "dispatch", "interrupt resumed");
                    Ok(value)
                }
                Err(err) if err.is_interrupted() => {
                    self.inner.trace_sink.record_state(&resolved, "interrupt");
                    debug!(step = %resolved, state = "interrupt", "re-interrupted from handler");
                    Err(err)
                }
                Err(err) => {
                    self.inner.trace_sink.record_state(&resolved, "error");
                    debug!(step = %resolved, state = "error", error = %err, "interrupt handler failed");
                    Err(err)
                }
            };
        }

        let schema = response_schema.map(Schema::describe);
        let mut state = self.inner.state.lock().await;
        state.blocked_on_step = Some(BlockedStep {
            name: resolved.clone(),
            schema,
        });
        drop(state);
        self.inner.trace_sink.record_state(&resolved, "interrupted");
        debug!(step = %resolved, state = "interrupted", "drive suspended");
        Err(FlowError::Interrupted)
    }

    /// `sleep(stepName, seconds) → void`
    ///
    /// Schedules a future `runScheduled` dispatch, then writes the step's
    /// cache entry *before* calling into `interrupt`. Because the cache is
    /// already populated at that point, the very first drive through this
    /// call returns immediately via the memoization branch rather than ever
    /// throwing `Interrupted` — preserved exactly as documented, not fixed.
    #[instrument(skip(self), fields(flow_id = %self.inner.flow_id))]
    pub async fn sleep(&self, step_name: &str, seconds: u64) -> Result<(), FlowError> {
        let resolved = self.resolve_step_name(step_name).await;

        self.inner
            .scheduler
            .schedule(
                &self.inner.flow_name,
                Envelope::run_scheduled_for(self.inner.flow_id),
                seconds,
            )
            .await
            .map_err(|e| FlowError::Collaborator(e.to_string()))?;

        {
            let mut state = self.inner.state.lock().await;
            state.cache.insert(resolved.clone(), CacheEntry::empty());
        }

        self.interrupt_resolved(resolved, |_: serde_json::Value| async { Ok(()) }, None, false)
            .await
    }

    /// `waitFor({flow, stepName, flowIds, pollingConfig?}) → [Operation]`
    #[instrument(skip(self), fields(flow_id = %self.inner.flow_id))]
    pub async fn wait_for(&self, req: WaitForRequest) -> Result<Vec<Operation>, FlowError> {
        let resolved = self.resolve_step_name(&req.step_name).await;

        {
            let state = self.inner.state.lock().await;
            if let Some(entry) = state.cache.get(&resolved) {
                if let Some(value) = entry.as_value() {
                    let ops: Vec<Operation> = serde_json::from_value(value.clone())
                        .map_err(|e| FlowError::Validation(e.to_string()))?;
                    return Ok(ops);
                }
            }
        }

        if req.flow_ids.is_empty() {
            return Err(FlowError::EmptyWaitForList);
        }

        let store = self
            .inner
            .state_store
            .as_ref()
            .ok_or_else(|| FlowError::Collaborator("waitFor requires a configured state store".into()))?;

        let mut loaded = Vec::with_capacity(req.flow_ids.len());
        for id in &req.flow_ids {
            let found = store
                .load(*id)
                .await
                .map_err(|e| FlowError::Collaborator(e.to_string()))?;
            match found {
                Some(state) => loaded.push(state),
                None => return Err(FlowError::UnresolvableDependency(*id)),
            }
        }

        if loaded.iter().all(|s| s.operation.done) {
            let ops: Vec<Operation> = loaded.iter().map(|s| s.operation.clone()).collect();
            let json = serde_json::to_value(&ops).map_err(|e| FlowError::Validation(e.to_string()))?;
            let mut state = self.inner.state.lock().await;
            state.cache.insert(resolved, CacheEntry::value(json));
            return Ok(ops);
        }

        self.inner
            .scheduler
            .schedule(
                &self.inner.flow_name,
                Envelope::run_scheduled_for(self.inner.flow_id),
                req.polling_interval_secs.unwrap_or(5),
            )
            .await
            .map_err(|e| FlowError::Collaborator(e.to_string()))?;

        Err(FlowError::Interrupted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::NoopTraceSink;
    use crate::persistence::InMemoryStateStore;
    use crate::scheduler::InMemoryScheduler;

    fn fresh_ctx() -> StepContext {
        let flow_id = Uuid::now_v7();
        let state = FlowState::fresh(flow_id, "test", serde_json::json!(null));
        let scheduler = Arc::new(InMemoryScheduler::new());
        let store = Arc::new(InMemoryStateStore::new());
        StepContext::new(state, scheduler, Some(store), Arc::new(NoopTraceSink))
    }

    #[tokio::test]
    async fn run_is_memoized_at_root() {
        let ctx = fresh_ctx();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            let result = ctx
                .run("compute", || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, FlowError>(42)
                })
                .await
                .unwrap();
            assert_eq!(result, 42);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn repeated_step_names_disambiguate() {
        let ctx = fresh_ctx();
        ctx.run("x", || async { Ok::<_, FlowError>(1) }).await.unwrap();
        ctx.run("x", || async { Ok::<_, FlowError>(2) }).await.unwrap();
        ctx.run("x", || async { Ok::<_, FlowError>(3) }).await.unwrap();

        let snap = ctx.snapshot().await;
        assert!(snap.cache.contains_key("x"));
        assert!(snap.cache.contains_key("x-1"));
        assert!(snap.cache.contains_key("x-2"));
    }

    #[tokio::test]
    async fn interrupt_suspends_then_resumes() {
        let ctx = fresh_ctx();

        let first = ctx
            .interrupt("approve", |p: serde_json::Value| async move { Ok::<_, FlowError>(p) }, None, false)
            .await;
        assert!(matches!(first, Err(FlowError::Interrupted)));

        {
            let mut state = ctx.inner.state.lock().await;
            assert_eq!(state.blocked_on_step.as_ref().unwrap().name, "approve");
            state
                .events_triggered
                .insert("approve".to_string(), serde_json::json!({"approved": true}));
        }

        let second = ctx
            .interrupt("approve", |p: serde_json::Value| async move { Ok::<_, FlowError>(p) }, None, false)
            .await
            .unwrap();
        assert_eq!(second, serde_json::json!({"approved": true}));

        let snap = ctx.snapshot().await;
        assert!(snap.blocked_on_step.is_none());
    }

    #[tokio::test]
    async fn skip_cache_reruns_a_previously_cached_interrupt() {
        let ctx = fresh_ctx();

        // Suspend, then resume: the step's value is cached.
        let first = ctx
            .interrupt("approve", |p: serde_json::Value| async move { Ok::<_, FlowError>(p) }, None, false)
            .await;
        assert!(matches!(first, Err(FlowError::Interrupted)));
        {
            let mut state = ctx.inner.state.lock().await;
            state
                .events_triggered
                .insert("approve".to_string(), serde_json::json!({"approved": true}));
        }
        let resolved = ctx
            .interrupt("approve", |p: serde_json::Value| async move { Ok::<_, FlowError>(p) }, None, false)
            .await
            .unwrap();
        assert_eq!(resolved, serde_json::json!({"approved": true}));
        assert_eq!(
            ctx.snapshot().await.cache.get("approve").and_then(|e| e.as_value()),
            Some(&serde_json::json!({"approved": true}))
        );

        // Without skipCache, a later call for the same step is idempotent:
        // the cached value wins and the handler never runs again.
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_idempotent = calls.clone();
        let idempotent = ctx
            .interrupt(
                "approve",
                move |p: serde_json::Value| {
                    calls_for_idempotent.fetch_add(1, Ordering::SeqCst);
                    async move { Ok::<_, FlowError>(p) }
                },
                None,
                false,
            )
            .await
            .unwrap();
        assert_eq!(idempotent, serde_json::json!({"approved": true}));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // With skipCache=true, a redelivery for the same step bypasses the
        // cached value and runs the handler again against its new payload —
        // the one permitted exception to interrupt idempotence.
        {
            let mut state = ctx.inner.state.lock().await;
            state
                .events_triggered
                .insert("approve".to_string(), serde_json::json!({"approved": false}));
        }
        let calls_for_rerun = calls.clone();
        let rerun = ctx
            .interrupt(
                "approve",
                move |p: serde_json::Value| {
                    calls_for_rerun.fetch_add(1, Ordering::SeqCst);
                    async move { Ok::<_, FlowError>(p) }
                },
                None,
                true,
            )
            .await
            .unwrap();
        assert_eq!(rerun, serde_json::json!({"approved": false}));
        assert_eq!(calls.load(Ordering::SeqCst), 1, "skipCache must rerun the handler");

        // skipCache also means the cache entry is left as it was.
        assert_eq!(
            ctx.snapshot().await.cache.get("approve").and_then(|e| e.as_value()),
            Some(&serde_json::json!({"approved": true}))
        );
    }

    #[tokio::test]
    async fn waitfor_empty_list_is_error() {
        let ctx = fresh_ctx();
        let result = ctx
            .wait_for(WaitForRequest {
                step_name: "wait".into(),
                flow_ids: vec![],
                polling_interval_secs: None,
            })
            .await;
        assert!(matches!(result, Err(FlowError::EmptyWaitForList)));
    }
}
