//! Application state shared across request handlers.

use std::sync::Arc;

use crate::pipeline::IngestionPipeline;
use crate::settings::SettingsCell;

/// Shared application state.
///
/// Passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    pipeline: IngestionPipeline,
    settings: Arc<SettingsCell>,
}

impl AppState {
    pub fn new(pipeline: IngestionPipeline, settings: Arc<SettingsCell>) -> Self {
        Self {
            inner: Arc::new(AppStateInner { pipeline, settings }),
        }
    }

    pub fn pipeline(&self) -> &IngestionPipeline {
        &self.inner.pipeline
    }

    pub fn settings(&self) -> &Arc<SettingsCell> {
        &self.inner.settings
    }

    /// Both engines have finished their initial definition sync.
    pub fn is_ready(&self) -> bool {
        let pipeline = self.pipeline();
        pipeline.registry().is_synced() && pipeline.engine().is_synced()
    }
}
