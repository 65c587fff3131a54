//! Envelope dispatch and the type-erased flow registry

pub mod executor;
pub mod registry;

pub use executor::{Engine, ExecutorConfig};
pub use registry::{AnyFlow, FlowRegistry, FlowWrapper, RegistryError};
