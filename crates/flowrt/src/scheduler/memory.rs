//! An in-process timer-based `Scheduler`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::RwLock;
use tracing::{instrument, warn};

use super::{Scheduler, SchedulerError};
use crate::flow::envelope::Envelope;

/// The closure an [`Engine`](crate::engine::Engine) installs so the scheduler
/// can re-enter dispatch once a delay elapses, without the scheduler needing
/// to know the engine's `StateStore` type parameter.
pub type DispatchFn = Arc<dyn Fn(Envelope) -> BoxFuture<'static, ()> + Send + Sync>;

/// Spawns a `tokio::time::sleep` task per `schedule` call that re-dispatches
/// a `runScheduled` envelope once the delay elapses.
///
/// Acceptable for non-production use only: scheduled work does not survive a
/// process restart.
#[derive(Default)]
pub struct InMemoryScheduler {
    dispatcher: RwLock<Option<DispatchFn>>,
}

impl InMemoryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_dispatcher(&self, dispatcher: DispatchFn) {
        *self.dispatcher.write().await = Some(dispatcher);
    }
}

#[async_trait]
impl Scheduler for InMemoryScheduler {
    #[instrument(skip(self, envelope))]
    async fn schedule(
        &self,
        _flow_name: &str,
        envelope: Envelope,
        delay_seconds: u64,
    ) -> Result<(), SchedulerError> {
        let dispatcher = self.dispatcher.read().await.clone();
        let Some(dispatcher) = dispatcher else {
            warn!("scheduler fired with no dispatcher installed; dropping envelope");
            return Ok(());
        };

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(delay_seconds)).await;
            dispatcher(envelope).await;
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn fires_dispatcher_after_delay() {
        let scheduler = InMemoryScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();

        scheduler
            .set_dispatcher(Arc::new(move |_env| {
                let fired = fired_clone.clone();
                Box::pin(async move {
                    fired.fetch_add(1, Ordering::SeqCst);
                })
            }))
            .await;

        scheduler
            .schedule("echo", Envelope::state(uuid::Uuid::now_v7()), 0)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_dispatcher_is_a_noop() {
        let scheduler = InMemoryScheduler::new();
        let result = scheduler
            .schedule("echo", Envelope::state(uuid::Uuid::now_v7()), 0)
            .await;
        assert!(result.is_ok());
    }
}
