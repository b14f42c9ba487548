//! Hands the acquired artifact to its sinks.
//!
//! Both sinks are best-effort and independent: a storage failure does not stop
//! the notification, and neither failure escalates past this stage.

use crate::acquisition::AcquiredArtifact;
use crate::config::RunConfig;
use crate::http::{self, HttpClient};
use crate::storage::{KeyValueStore, StoreError};
use tracing::{error, info, warn};

/// Store key pointing at the most recently written output.
pub const LAST_OUTPUT_KEY: &str = "last_output_filename";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub stored: bool,
    pub notified: bool,
}

pub struct DeliveryStage<'a> {
    store: &'a dyn KeyValueStore,
    http: &'a dyn HttpClient,
}

impl<'a> DeliveryStage<'a> {
    pub fn new(store: &'a dyn KeyValueStore, http: &'a dyn HttpClient) -> Self {
        Self { store, http }
    }

    pub async fn deliver(&self, artifact: &AcquiredArtifact, config: &RunConfig) -> DeliveryReport {
        let stored = match self.store_artifact(artifact, config).await {
            Ok(()) => {
                info!(
                    "Export stored in the key-value store under {}",
                    config.output_filename
                );
                true
            }
            Err(e) => {
                warn!("Failed to store the export: {}", e);
                false
            }
        };

        let notified = match config.notification_url() {
            Some(url) => self.notify(url, artifact, config).await,
            None => {
                info!("No notification URL configured; skipping POST");
                false
            }
        };

        DeliveryReport { stored, notified }
    }

    async fn store_artifact(
        &self,
        artifact: &AcquiredArtifact,
        config: &RunConfig,
    ) -> Result<(), StoreError> {
        self.store
            .set(
                &config.output_filename,
                artifact.bytes(),
                config.content_type(),
            )
            .await?;
        self.store
            .set(
                LAST_OUTPUT_KEY,
                config.output_filename.as_bytes(),
                "text/plain",
            )
            .await
    }

    async fn notify(&self, url: &str, artifact: &AcquiredArtifact, config: &RunConfig) -> bool {
        let result = self
            .http
            .post_file(
                url,
                &config.output_filename,
                config.content_type(),
                artifact.bytes().to_vec(),
            )
            .await;
        match result {
            Ok(status) if http::is_success(status) => {
                info!("Posted the export to {}", url);
                true
            }
            Ok(status) => {
                warn!("Notification POST returned status {}", status);
                false
            }
            Err(e) => {
                error!("Failed to POST the export: {}", e);
                false
            }
        }
    }
}
