//! # flowrt
//!
//! A storage-agnostic durable flow runtime: user-supplied async function
//! bodies that call `step()`, `interrupt()`, `sleep()`, and `waitFor()`
//! against a [`StepContext`](context::StepContext), memoizing step results by
//! name so a flow can be driven again from scratch after a process restart
//! and skip everything it already did.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         http::routes                         │
//! │      (axum: POST /{flow}, GET /{flow}/state/{id})           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        engine::Engine                        │
//! │  (resolves an envelope, looks up a FlowRegistry entry,       │
//! │   drives the body through a StepContext, persists the        │
//! │   resulting FlowState)                                       │
//! └─────────────────────────────────────────────────────────────┘
//!                    │                          │
//!                    ▼                          ▼
//! ┌────────────────────────────┐   ┌─────────────────────────────┐
//! │     persistence::StateStore │   │      scheduler::Scheduler   │
//! │  (in-memory or Postgres)    │   │ (delayed re-dispatch: sleep,│
//! │                              │   │  schedule, waitFor)         │
//! └────────────────────────────┘   └─────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use flowrt::prelude::*;
//! use std::sync::Arc;
//!
//! async fn greet(input: serde_json::Value, ctx: StepContext, _stream: StreamSender<()>) -> Result<serde_json::Value, FlowError> {
//!     let greeting = ctx
//!         .run("build-greeting", || async move { Ok(serde_json::json!(format!("hi {input}"))) })
//!         .await?;
//!     Ok(greeting)
//! }
//!
//! let def = FlowDefinition::builder("greet", Arc::new(|input, ctx, stream| Box::pin(greet(input, ctx, stream))))
//!     .build()
//!     .unwrap();
//!
//! let mut registry = FlowRegistry::new();
//! registry.register(def);
//! ```

pub mod context;
pub mod engine;
pub mod flow;
pub mod http;
pub mod observability;
pub mod persistence;
pub mod scheduler;
pub mod streaming;

/// Prelude for common imports
pub mod prelude {
    pub use crate::context::StepContext;
    pub use crate::engine::{AnyFlow, Engine, ExecutorConfig, FlowRegistry, FlowWrapper, RegistryError};
    pub use crate::flow::{
        AuthContext, AuthPolicy, Envelope, FlowDefinition, FlowDefinitionBuilder, FlowDefinitionError,
        FlowError, FlowMiddleware, FlowState, Operation, Schema,
    };
    pub use crate::http::{routes, AppState, HttpSurfaceConfig};
    pub use crate::observability::{NoopTraceSink, TraceSink};
    pub use crate::persistence::{InMemoryStateStore, ListPage, ListQuery, StateStore, StoreError};
    pub use crate::scheduler::{InMemoryScheduler, Scheduler, SchedulerError};
    pub use crate::streaming::{stream_flow, ChunkStream, StreamFlowHandle, StreamSender};
}

pub use context::StepContext;
pub use engine::{Engine, ExecutorConfig, FlowRegistry};
pub use flow::{Envelope, FlowDefinition, FlowError, FlowState};
pub use persistence::{InMemoryStateStore, StateStore};
pub use scheduler::{InMemoryScheduler, Scheduler};
