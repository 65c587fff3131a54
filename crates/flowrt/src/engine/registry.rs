//! Type-erased flow registry
//!
//! The engine dispatches on a flow's name at runtime but `FlowDefinition` is
//! generic over its input/output/chunk types. `AnyFlow` erases those types
//! behind `serde_json::Value`; `FlowWrapper` is the generic adapter that
//! makes any `FlowDefinition<I, O, C>` implement it. Modeled directly on the
//! durable execution engine's `AnyWorkflow`/`WorkflowWrapper` pair.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::context::StepContext;
use crate::flow::definition::{AuthPolicy, FlowDefinition, FlowMiddleware};
use crate::flow::error::FlowError;
use crate::scheduler::Scheduler;
use crate::streaming::StreamSender;

/// A `FlowDefinition<I, O, C>` with its type parameters erased to `Value`
#[async_trait]
pub trait AnyFlow: Send + Sync {
    fn name(&self) -> &str;
    fn durable(&self) -> bool;
    fn auth_policy(&self) -> Option<Arc<dyn AuthPolicy>>;
    fn middleware(&self) -> &[Arc<dyn FlowMiddleware>];
    fn scheduler_override(&self) -> Option<Arc<dyn Scheduler>>;
    fn describe_input_schema(&self) -> Option<serde_json::Value>;

    async fn invoke(
        &self,
        input: serde_json::Value,
        ctx: StepContext,
        stream: StreamSender<serde_json::Value>,
    ) -> Result<serde_json::Value, FlowError>;
}

/// The generic adapter: implements [`AnyFlow`] for any concretely-typed
/// [`FlowDefinition`].
pub struct FlowWrapper<I, O, C> {
    def: FlowDefinition<I, O, C>,
}

impl<I, O, C> FlowWrapper<I, O, C> {
    pub fn new(def: FlowDefinition<I, O, C>) -> Self {
        Self { def }
    }
}

#[async_trait]
impl<I, O, C> AnyFlow for FlowWrapper<I, O, C>
where
    I: DeserializeOwned + Send + Sync + 'static,
    O: Serialize + Send + Sync + 'static,
    C: Serialize + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.def.name
    }

    fn durable(&self) -> bool {
        self.def.durable
    }

    fn auth_policy(&self) -> Option<Arc<dyn AuthPolicy>> {
        self.def.auth_policy.clone()
    }

    fn middleware(&self) -> &[Arc<dyn FlowMiddleware>] {
        &self.def.middleware
    }

    fn scheduler_override(&self) -> Option<Arc<dyn Scheduler>> {
        self.def.scheduler_override.clone()
    }

    fn describe_input_schema(&self) -> Option<serde_json::Value> {
        self.def.input_schema.as_ref().map(|s| s.describe())
    }

    async fn invoke(
        &self,
        input: serde_json::Value,
        ctx: StepContext,
        stream: StreamSender<serde_json::Value>,
    ) -> Result<serde_json::Value, FlowError> {
        let typed_input: I = match &self.def.input_schema {
            Some(schema) => schema.validate(input)?,
            None => serde_json::from_value(input).map_err(|e| FlowError::Validation(e.to_string()))?,
        };

        let typed_stream: StreamSender<C> = stream.typed();
        let output: O = (self.def.body)(typed_input, ctx, typed_stream).await?;

        serde_json::to_value(&output).map_err(|e| FlowError::Validation(e.to_string()))
    }
}

/// Errors raised by [`FlowRegistry`] lookups
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown flow type: {0}")]
    UnknownFlowType(String),
}

/// A registry of type-erased flow definitions, keyed by name
#[derive(Default)]
pub struct FlowRegistry {
    flows: HashMap<String, Arc<dyn AnyFlow>>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<I, O, C>(&mut self, def: FlowDefinition<I, O, C>)
    where
        I: DeserializeOwned + Send + Sync + 'static,
        O: Serialize + Send + Sync + 'static,
        C: Serialize + Send + Sync + 'static,
    {
        let name = def.name.clone();
        self.flows.insert(name, Arc::new(FlowWrapper::new(def)));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.flows.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn AnyFlow>, RegistryError> {
        self.flows
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownFlowType(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn flow_names(&self) -> Vec<&str> {
        self.flows.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::definition::Schema;
    use std::sync::Arc as StdArc;

    fn echo_definition() -> FlowDefinition<serde_json::Value, serde_json::Value, serde_json::Value> {
        FlowDefinition::builder(
            "echo",
            StdArc::new(|input, _ctx, _stream| Box::pin(async move { Ok(input) })),
        )
        .input_schema(Schema::from_serde())
        .build()
        .unwrap()
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = FlowRegistry::new();
        assert!(registry.is_empty());
        registry.register(echo_definition());
        assert!(registry.contains("echo"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_flow_is_an_error() {
        let registry = FlowRegistry::new();
        assert!(matches!(registry.get("missing"), Err(RegistryError::UnknownFlowType(_))));
    }
}
