//! Persisted `FlowState` storage: the durability boundary between drives

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::flow::state::FlowState;

pub use memory::InMemoryStateStore;
pub use postgres::PostgresStateStore;

/// Errors a [`StateStore`] implementation may return
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached; the caller may retry.
    #[error("state store backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A persisted record could not be deserialized; not retryable.
    #[error("state store record corrupted: {0}")]
    Corruption(String),
}

/// Pagination parameters for [`StateStore::list`]
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub limit: Option<usize>,
    pub continuation_token: Option<String>,
}

impl ListQuery {
    pub fn limit_or_default(&self) -> usize {
        self.limit.unwrap_or(10)
    }

    fn offset(&self) -> usize {
        self.continuation_token
            .as_deref()
            .and_then(|t| t.parse().ok())
            .unwrap_or(0)
    }
}

/// One page of results from [`StateStore::list`]
#[derive(Debug, Clone)]
pub struct ListPage {
    pub flow_states: Vec<FlowState>,
    pub continuation_token: Option<String>,
}

/// Pluggable persisted storage for `FlowState`, by id
///
/// `load`/`save` form the single concurrency boundary between drives (§5):
/// the engine itself does not lock, so callers must serialize `runScheduled`
/// and `resume` dispatch for the same flow id.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, id: Uuid) -> Result<Option<FlowState>, StoreError>;

    /// Idempotent overwrite.
    async fn save(&self, id: Uuid, state: FlowState) -> Result<(), StoreError>;

    /// Ordered by `start_time` descending; `query.limit` defaults to 10.
    async fn list(&self, query: ListQuery) -> Result<ListPage, StoreError>;
}
