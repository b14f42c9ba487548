use crate::acquisition::{AcquiredArtifact, StrategyKind};
use crate::config::RunConfig;
use crate::delivery::DeliveryReport;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Success,
    Failed,
}

/// The single structured outcome of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub status: RunStatus,
    pub resource_type: String,
    pub output_filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_strategy: Option<StrategyKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acquired_at: Option<DateTime<Utc>>,
    pub elapsed_secs: f64,
    pub attempts: u32,
    pub session_saved: bool,
    pub stored: bool,
    pub notified: bool,
    pub job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunRecord {
    pub fn success(
        config: &RunConfig,
        artifact: &AcquiredArtifact,
        delivery: DeliveryReport,
        session_saved: bool,
        attempts: u32,
        elapsed: Duration,
    ) -> Self {
        Self {
            status: RunStatus::Success,
            resource_type: config.resource_type.clone(),
            output_filename: config.output_filename.clone(),
            file_size: Some(artifact.len()),
            source_strategy: Some(artifact.source),
            acquired_at: Some(artifact.acquired_at),
            elapsed_secs: elapsed.as_secs_f64(),
            attempts,
            session_saved,
            stored: delivery.stored,
            notified: delivery.notified,
            job_id: config.job_id.clone(),
            error: None,
        }
    }

    pub fn failure(
        config: &RunConfig,
        error: impl Into<String>,
        attempts: u32,
        elapsed: Duration,
    ) -> Self {
        Self {
            status: RunStatus::Failed,
            resource_type: config.resource_type.clone(),
            output_filename: config.output_filename.clone(),
            file_size: None,
            source_strategy: None,
            acquired_at: None,
            elapsed_secs: elapsed.as_secs_f64(),
            attempts,
            session_saved: false,
            stored: false,
            notified: false,
            job_id: config.job_id.clone(),
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}
