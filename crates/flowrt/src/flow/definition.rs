//! Static flow configuration: name, schemas, auth, middleware, and the body

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::context::StepContext;
use crate::flow::error::FlowError;
use crate::scheduler::Scheduler;
use crate::streaming::StreamSender;

/// An opaque `(validate, describe)` pair, per the source's "schema as data" contract
///
/// The engine never inspects schema internals; it only calls `validate` to
/// parse a raw JSON payload and `describe` to produce a JSON-schema document
/// for callers (e.g. the schema attached to a `blockedOnStep`).
#[derive(Clone)]
pub struct Schema<T> {
    validate: Arc<dyn Fn(serde_json::Value) -> Result<T, FlowError> + Send + Sync>,
    describe: Arc<dyn Fn() -> serde_json::Value + Send + Sync>,
}

impl<T> Schema<T> {
    pub fn new(
        validate: impl Fn(serde_json::Value) -> Result<T, FlowError> + Send + Sync + 'static,
        describe: impl Fn() -> serde_json::Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            validate: Arc::new(validate),
            describe: Arc::new(describe),
        }
    }

    pub fn validate(&self, raw: serde_json::Value) -> Result<T, FlowError> {
        (self.validate)(raw)
    }

    pub fn describe(&self) -> serde_json::Value {
        (self.describe)()
    }
}

impl<T> Schema<T>
where
    T: serde::de::DeserializeOwned,
{
    /// A schema that defers entirely to `T`'s own `Deserialize` impl and
    /// describes itself as an opaque object (no JSON-schema generation).
    pub fn from_serde() -> Self {
        Self::new(
            |raw| serde_json::from_value(raw).map_err(|e| FlowError::Validation(e.to_string())),
            || serde_json::json!({"type": "object"}),
        )
    }
}

/// Contextual information available to an [`AuthPolicy`] check
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub headers: std::collections::HashMap<String, String>,
    pub claims: Option<serde_json::Value>,
}

/// Authorization gate run before a non-durable flow's body drives
#[async_trait]
pub trait AuthPolicy: Send + Sync {
    async fn check(&self, ctx: &AuthContext) -> Result<(), FlowError>;
}

/// A no-op policy, useful as a default for flows that don't require one
pub struct AllowAll;

#[async_trait]
impl AuthPolicy for AllowAll {
    async fn check(&self, _ctx: &AuthContext) -> Result<(), FlowError> {
        Ok(())
    }
}

/// A single middleware step run, in registration order, ahead of the
/// terminal handler for both HTTP handler kinds
#[async_trait]
pub trait FlowMiddleware: Send + Sync {
    async fn handle(&self, ctx: &AuthContext) -> Result<(), FlowError>;
}

/// The user-supplied body of a flow
///
/// Takes the parsed input, a [`StepContext`] bound to the current drive, and
/// a sender for stream chunks; returns the typed output.
pub type BodyFn<I, O, C> = Arc<
    dyn Fn(I, StepContext, StreamSender<C>) -> BoxFuture<'static, Result<O, FlowError>>
        + Send
        + Sync,
>;

/// Errors raised when constructing a [`FlowDefinition`]
#[derive(Debug, thiserror::Error)]
pub enum FlowDefinitionError {
    #[error("durable flows cannot carry an auth policy; authorization is external")]
    DurableWithAuthPolicy,
}

/// Static configuration for one flow
pub struct FlowDefinition<I, O, C> {
    pub name: String,
    pub durable: bool,
    pub input_schema: Option<Schema<I>>,
    pub output_schema: Option<Schema<O>>,
    pub auth_policy: Option<Arc<dyn AuthPolicy>>,
    pub middleware: Vec<Arc<dyn FlowMiddleware>>,
    pub scheduler_override: Option<Arc<dyn Scheduler>>,
    pub body: BodyFn<I, O, C>,
}

impl<I, O, C> FlowDefinition<I, O, C> {
    pub fn builder(name: impl Into<String>, body: BodyFn<I, O, C>) -> FlowDefinitionBuilder<I, O, C> {
        FlowDefinitionBuilder {
            name: name.into(),
            durable: false,
            input_schema: None,
            output_schema: None,
            auth_policy: None,
            middleware: Vec::new(),
            scheduler_override: None,
            body,
        }
    }
}

pub struct FlowDefinitionBuilder<I, O, C> {
    name: String,
    durable: bool,
    input_schema: Option<Schema<I>>,
    output_schema: Option<Schema<O>>,
    auth_policy: Option<Arc<dyn AuthPolicy>>,
    middleware: Vec<Arc<dyn FlowMiddleware>>,
    scheduler_override: Option<Arc<dyn Scheduler>>,
    body: BodyFn<I, O, C>,
}

impl<I, O, C> FlowDefinitionBuilder<I, O, C> {
    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn input_schema(mut self, schema: Schema<I>) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn output_schema(mut self, schema: Schema<O>) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn auth_policy(mut self, policy: Arc<dyn AuthPolicy>) -> Self {
        self.auth_policy = Some(policy);
        self
    }

    pub fn middleware(mut self, middleware: Arc<dyn FlowMiddleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler_override = Some(scheduler);
        self
    }

    pub fn build(self) -> Result<FlowDefinition<I, O, C>, FlowDefinitionError> {
        if self.durable && self.auth_policy.is_some() {
            return Err(FlowDefinitionError::DurableWithAuthPolicy);
        }
        Ok(FlowDefinition {
            name: self.name,
            durable: self.durable,
            input_schema: self.input_schema,
            output_schema: self.output_schema,
            auth_policy: self.auth_policy,
            middleware: self.middleware,
            scheduler_override: self.scheduler_override,
            body: self.body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_body() -> BodyFn<serde_json::Value, serde_json::Value, serde_json::Value> {
        Arc::new(|input, _ctx, _stream| Box::pin(async move { Ok(input) }))
    }

    #[test]
    fn durable_with_auth_policy_is_rejected() {
        let result = FlowDefinition::builder("echo", noop_body())
            .durable(true)
            .auth_policy(Arc::new(AllowAll))
            .build();
        assert!(matches!(result, Err(FlowDefinitionError::DurableWithAuthPolicy)));
    }

    #[test]
    fn non_durable_with_auth_policy_is_allowed() {
        let result = FlowDefinition::builder("echo", noop_body())
            .auth_policy(Arc::new(AllowAll))
            .build();
        assert!(result.is_ok());
    }
}
