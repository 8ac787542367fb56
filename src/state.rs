use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::ShimError;
use crate::upstream::{ChatUpstream, OpenRouterUpstream};

/// Process-wide state shared by all handlers. Immutable after startup.
pub struct AppState {
    pub config: AppConfig,
    pub upstream: Arc<dyn ChatUpstream>,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, upstream: Arc<dyn ChatUpstream>) -> Self {
        Self { config, upstream }
    }

    /// Build state backed by the real provider client.
    ///
    /// # Errors
    ///
    /// Returns [`ShimError::Config`] when the HTTP client cannot be built.
    pub fn with_openrouter(config: AppConfig, api_key: String) -> Result<Self, ShimError> {
        let upstream = OpenRouterUpstream::new(&config.upstream, api_key)?;
        Ok(Self::new(config, Arc::new(upstream)))
    }
}
