//! A `StateStore` backed by a single `flow_states` table
//!
//! ```sql
//! create table flow_states (
//!     flow_id     uuid primary key,
//!     name        text not null,
//!     state       jsonb not null,
//!     start_time  timestamptz not null,
//!     updated_at  timestamptz not null default now()
//! );
//! create index flow_states_start_time_idx on flow_states (start_time desc);
//! ```

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::Row;
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::{ListPage, ListQuery, StateStore, StoreError};
use crate::flow::state::FlowState;

pub struct PostgresStateStore {
    pool: PgPool,
}

impl PostgresStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create `flow_states` if it does not already exist.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            create table if not exists flow_states (
                flow_id     uuid primary key,
                name        text not null,
                state       jsonb not null,
                start_time  timestamptz not null,
                updated_at  timestamptz not null default now()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::BackendUnavailable(e.to_string()))?;

        sqlx::query(
            "create index if not exists flow_states_start_time_idx on flow_states (start_time desc)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::BackendUnavailable(e.to_string()))?;

        Ok(())
    }

    fn row_to_state(row: &sqlx::postgres::PgRow) -> Result<FlowState, StoreError> {
        let raw: serde_json::Value = row.try_get("state").map_err(|e| StoreError::Corruption(e.to_string()))?;
        serde_json::from_value(raw).map_err(|e| StoreError::Corruption(e.to_string()))
    }
}

#[async_trait]
impl StateStore for PostgresStateStore {
    #[instrument(skip(self))]
    async fn load(&self, id: Uuid) -> Result<Option<FlowState>, StoreError> {
        let row = sqlx::query("select state from flow_states where flow_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!(flow_id = %id, error = %e, "failed to load flow state");
                StoreError::BackendUnavailable(e.to_string())
            })?;

        match row {
            Some(row) => Ok(Some(Self::row_to_state(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, state))]
    async fn save(&self, id: Uuid, state: FlowState) -> Result<(), StoreError> {
        let json = serde_json::to_value(&state).map_err(|e| StoreError::Corruption(e.to_string()))?;

        sqlx::query(
            r#"
            insert into flow_states (flow_id, name, state, start_time, updated_at)
            values ($1, $2, $3, $4, now())
            on conflict (flow_id) do update
            set state = excluded.state, updated_at = now()
            "#,
        )
        .bind(id)
        .bind(&state.name)
        .bind(json)
        .bind(state.start_time)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(flow_id = %id, error = %e, "failed to save flow state");
            StoreError::BackendUnavailable(e.to_string())
        })?;

        debug!(flow_id = %id, "flow state saved");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(&self, query: ListQuery) -> Result<ListPage, StoreError> {
        let limit = query.limit_or_default() as i64;
        let offset = query.offset() as i64;

        let rows = sqlx::query("select state from flow_states order by start_time desc limit $1 offset $2")
            .bind(limit + 1)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!(error = %e, "failed to list flow states");
                StoreError::BackendUnavailable(e.to_string())
            })?;

        let has_more = rows.len() as i64 > limit;
        let flow_states = rows
            .iter()
            .take(limit as usize)
            .map(Self::row_to_state)
            .collect::<Result<Vec<_>, _>>()?;

        let continuation_token = has_more.then(|| (offset + limit).to_string());

        Ok(ListPage {
            flow_states,
            continuation_token,
        })
    }
}
