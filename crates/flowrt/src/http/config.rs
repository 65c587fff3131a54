//! HTTP surface configuration, read from the process environment
//!
//! Matches the grounding crate's plain `std::env::var` + typed-default
//! idiom rather than a config-file loader: the only environment coupling
//! this crate has (§6).

use std::env;

#[derive(Debug, Clone)]
pub struct HttpSurfaceConfig {
    pub port: u16,
    pub path_prefix: String,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub body_size_limit_bytes: Option<usize>,
}

impl Default for HttpSurfaceConfig {
    fn default() -> Self {
        Self {
            port: 3400,
            path_prefix: String::new(),
            cors_allowed_origins: None,
            body_size_limit_bytes: None,
        }
    }
}

impl HttpSurfaceConfig {
    /// Reads `PORT`, `FLOWRT_PATH_PREFIX`, `FLOWRT_CORS_ORIGINS` (comma
    /// separated), and `FLOWRT_BODY_LIMIT_BYTES`; falls back to defaults for
    /// anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port);

        let path_prefix = env::var("FLOWRT_PATH_PREFIX").unwrap_or(defaults.path_prefix);

        let cors_allowed_origins = env::var("FLOWRT_CORS_ORIGINS")
            .ok()
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect());

        let body_size_limit_bytes = env::var("FLOWRT_BODY_LIMIT_BYTES").ok().and_then(|v| v.parse().ok());

        Self {
            port,
            path_prefix,
            cors_allowed_origins,
            body_size_limit_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = HttpSurfaceConfig::default();
        assert_eq!(config.port, 3400);
        assert_eq!(config.path_prefix, "");
        assert!(config.cors_allowed_origins.is_none());
    }
}
