//! The streaming HTTP surface fronting durable and non-durable flows

pub mod config;
pub mod surface;

pub use config::HttpSurfaceConfig;
pub use surface::{routes, AppState, ApiDoc};
