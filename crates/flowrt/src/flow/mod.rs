//! Data model for flow instances: state, envelopes, definitions, errors

pub mod definition;
pub mod envelope;
pub mod error;
pub mod state;

pub use definition::{
    AllowAll, AuthContext, AuthPolicy, BodyFn, FlowDefinition, FlowDefinitionBuilder,
    FlowDefinitionError, FlowMiddleware, Schema,
};
pub use envelope::{Envelope, EnvelopeVariant};
pub use error::{EngineError, FlowError};
pub use state::{BlockedStep, CacheEntry, ExecutionRecord, FlowState, Operation, OperationResult, TraceContext};
