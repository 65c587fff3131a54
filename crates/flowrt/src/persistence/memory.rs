//! An in-process `StateStore`, usable in tests and as a working default

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::instrument;
use uuid::Uuid;

use super::{ListPage, ListQuery, StateStore, StoreError};
use crate::flow::state::FlowState;

#[derive(Default)]
pub struct InMemoryStateStore {
    states: Arc<RwLock<HashMap<Uuid, FlowState>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    #[instrument(skip(self))]
    async fn load(&self, id: Uuid) -> Result<Option<FlowState>, StoreError> {
        Ok(self.states.read().await.get(&id).cloned())
    }

    #[instrument(skip(self, state))]
    async fn save(&self, id: Uuid, state: FlowState) -> Result<(), StoreError> {
        self.states.write().await.insert(id, state);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(&self, query: ListQuery) -> Result<ListPage, StoreError> {
        let states = self.states.read().await;
        let mut all: Vec<FlowState> = states.values().cloned().collect();
        all.sort_by(|a, b| b.start_time.cmp(&a.start_time));

        let offset = query.offset();
        let limit = query.limit_or_default();
        let page: Vec<FlowState> = all.into_iter().skip(offset).take(limit).collect();

        let continuation_token = if offset + page.len() < states.len() {
            Some((offset + page.len()).to_string())
        } else {
            None
        };

        Ok(ListPage {
            flow_states: page,
            continuation_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_missing_returns_none() {
        let store = InMemoryStateStore::new();
        assert!(store.load(Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let store = InMemoryStateStore::new();
        let id = Uuid::now_v7();
        let state = FlowState::fresh(id, "echo", serde_json::json!({"msg": "hi"}));
        store.save(id, state.clone()).await.unwrap();
        let loaded = store.load(id).await.unwrap().unwrap();
        assert_eq!(loaded.flow_id, state.flow_id);
    }

    #[tokio::test]
    async fn list_orders_by_start_time_descending_and_paginates() {
        let store = InMemoryStateStore::new();
        for i in 0..3 {
            let id = Uuid::now_v7();
            let mut state = FlowState::fresh(id, "echo", serde_json::json!(i));
            state.start_time = chrono::Utc::now() + chrono::Duration::seconds(i);
            store.save(id, state).await.unwrap();
        }

        let page = store
            .list(ListQuery {
                limit: Some(2),
                continuation_token: None,
            })
            .await
            .unwrap();
        assert_eq!(page.flow_states.len(), 2);
        assert!(page.continuation_token.is_some());
        assert!(page.flow_states[0].start_time >= page.flow_states[1].start_time);
    }
}
