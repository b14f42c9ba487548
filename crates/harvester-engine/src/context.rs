use crate::http::HttpClient;
use crate::storage::{DatasetSink, KeyValueStore};
use std::sync::Arc;

/// Collaborators shared by every stage of a run, passed explicitly.
#[derive(Clone)]
pub struct RunContext {
    pub store: Arc<dyn KeyValueStore>,
    pub dataset: Arc<dyn DatasetSink>,
    pub http: Arc<dyn HttpClient>,
    /// Parent span for run and attempt spans.
    pub span: tracing::Span,
}

impl RunContext {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        dataset: Arc<dyn DatasetSink>,
        http: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            store,
            dataset,
            http,
            span: tracing::info_span!("harvester"),
        }
    }
}
