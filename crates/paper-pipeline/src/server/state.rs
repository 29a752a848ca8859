//! Application state for the pipeline server

use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::processing::Pipeline;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    pipeline: Pipeline,
}

impl AppState {
    /// Build the pipeline from configuration and wrap it
    pub fn new(config: PipelineConfig) -> Result<Self> {
        tracing::info!("Initializing pipeline state...");
        let pipeline = Pipeline::from_config(config)?;
        Ok(Self::from_pipeline(pipeline))
    }

    pub fn from_pipeline(pipeline: Pipeline) -> Self {
        Self {
            inner: Arc::new(AppStateInner { pipeline }),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    /// Get configuration
    pub fn config(&self) -> &PipelineConfig {
        self.inner.pipeline.config()
    }

    /// Ready while the record store answers queries
    pub fn is_ready(&self) -> bool {
        match self.inner.pipeline.stats() {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Readiness check failed: {}", e);
                false
            }
        }
    }
}
