//! Whole-flow retry loop.
//!
//! Every attempt gets a freshly created backend which is closed before the next
//! attempt starts, whatever the outcome. Exactly one [`RunRecord`] is pushed to
//! the dataset per run.

use crate::acquisition::{AcquisitionError, AcquisitionPipeline};
use crate::auth::{AuthError, AuthFlow};
use crate::backend::{Backend, BackendError};
use crate::config::RunConfig;
use crate::context::RunContext;
use crate::delivery::DeliveryStage;
use crate::record::RunRecord;
use crate::session::SessionManager;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Message recorded when the run is refused for lack of credentials.
pub const MISSING_CREDENTIALS: &str = "Missing credentials";

#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("Failed to launch browser: {0}")]
    Launch(BackendError),
    #[error("Login failed: {0}")]
    Login(#[from] AuthError),
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
}

#[derive(Debug, Error)]
pub enum RunError {
    /// `record` is the failure record already handed to the dataset.
    #[error("All {attempts} attempt(s) failed; last error: {last}")]
    Exhausted {
        attempts: u32,
        last: AttemptError,
        record: Box<RunRecord>,
    },
}

/// Creates a fresh, unlaunched backend for each attempt.
pub trait BackendFactory: Send + Sync {
    fn create(&self) -> Box<dyn Backend>;
}

impl<F> BackendFactory for F
where
    F: Fn() -> Box<dyn Backend> + Send + Sync,
{
    fn create(&self) -> Box<dyn Backend> {
        self()
    }
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }
}

/// Delay before retrying after attempt `attempt` (1-based) failed.
pub fn backoff_delay(attempt: u32, unit: Duration) -> Duration {
    unit * 5 * attempt
}

/// State owned by a single attempt.
struct Attempt {
    number: u32,
    backend: Box<dyn Backend>,
    started: Instant,
}

impl Attempt {
    fn new(number: u32, backend: Box<dyn Backend>) -> Self {
        Self {
            number,
            backend,
            started: Instant::now(),
        }
    }

    async fn teardown(mut self) {
        if let Err(e) = self.backend.close().await {
            debug!("Closing browser after attempt {} failed: {}", self.number, e);
        }
        debug!(
            "Attempt {} finished after {:?}",
            self.number,
            self.started.elapsed()
        );
    }
}

struct AttemptOutcome {
    record: RunRecord,
}

pub struct RunController {
    ctx: RunContext,
    factory: Box<dyn BackendFactory>,
    sleeper: Arc<dyn Sleeper>,
}

impl RunController {
    pub fn new(ctx: RunContext, factory: impl BackendFactory + 'static) -> Self {
        Self {
            ctx,
            factory: Box::new(factory),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Run the flow with retries.
    ///
    /// Missing credentials produce a failed record without any attempt and are
    /// returned as `Ok`. Exhausting every attempt pushes a failed record carrying
    /// the last error and returns `Err`.
    pub async fn run(&self, config: &RunConfig) -> Result<RunRecord, RunError> {
        let span = info_span!(parent: &self.ctx.span, "run", job_id = %config.job_id);
        self.run_inner(config).instrument(span).await
    }

    async fn run_inner(&self, config: &RunConfig) -> Result<RunRecord, RunError> {
        let started = Instant::now();

        if !config.has_credentials() {
            error!("Missing required inputs; both username and password must be provided");
            let record = RunRecord::failure(config, MISSING_CREDENTIALS, 0, started.elapsed());
            self.emit(&record).await;
            return Ok(record);
        }

        info!("Starting export run");
        debug!(
            "Inputs: username={} resource_type={} notification={}",
            config.username,
            config.resource_type,
            if config.notification_url().is_some() {
                "yes"
            } else {
                "no"
            }
        );

        let max_attempts = config.max_attempts();
        let mut number = 1;
        loop {
            info!("Flow attempt {}/{}", number, max_attempts);
            let mut attempt = Attempt::new(number, self.factory.create());
            let span = info_span!("attempt", number);
            let result = self
                .run_attempt(&mut attempt, config, started)
                .instrument(span)
                .await;
            attempt.teardown().await;

            match result {
                Ok(outcome) => {
                    info!("Export flow completed successfully");
                    self.emit(&outcome.record).await;
                    return Ok(outcome.record);
                }
                Err(e) => {
                    error!("Flow attempt {} failed: {}", number, e);
                    if number < max_attempts {
                        let delay = backoff_delay(number, config.backoff_unit());
                        info!("Retrying in {:?}", delay);
                        self.sleeper.sleep(delay).await;
                        number += 1;
                    } else {
                        error!("All attempts failed");
                        let record =
                            RunRecord::failure(config, e.to_string(), number, started.elapsed());
                        self.emit(&record).await;
                        return Err(RunError::Exhausted {
                            attempts: number,
                            last: e,
                            record: Box::new(record),
                        });
                    }
                }
            }
        }
    }

    async fn run_attempt(
        &self,
        attempt: &mut Attempt,
        config: &RunConfig,
        run_started: Instant,
    ) -> Result<AttemptOutcome, AttemptError> {
        let backend = attempt.backend.as_mut();
        backend.launch().await.map_err(AttemptError::Launch)?;

        let session = SessionManager::new(self.ctx.store.clone());
        if !session.restore(backend).await {
            debug!("No cookies loaded; login will be required");
        }

        let logged_in = match config.start_urls.first() {
            Some(first) => {
                SessionManager::navigate_and_probe(
                    backend,
                    first,
                    config.timeout(),
                    &config.selectors.login_markers,
                )
                .await
            }
            None => false,
        };

        let mut session_saved = false;
        if !logged_in {
            AuthFlow::new(config).login(backend).await?;
            if config.save_session {
                session_saved = session.persist(backend).await;
            }
        }

        let artifact = AcquisitionPipeline::new(config, self.ctx.http.as_ref())
            .acquire(backend)
            .await?;

        let delivery = DeliveryStage::new(self.ctx.store.as_ref(), self.ctx.http.as_ref())
            .deliver(&artifact, config)
            .await;

        let record = RunRecord::success(
            config,
            &artifact,
            delivery,
            session_saved,
            attempt.number,
            run_started.elapsed(),
        );
        Ok(AttemptOutcome { record })
    }

    async fn emit(&self, record: &RunRecord) {
        let value = match serde_json::to_value(record) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to serialize run record: {}", e);
                return;
            }
        };
        if let Err(e) = self.ctx.dataset.push(value).await {
            warn!("Failed to push run record: {}", e);
        }
    }
}
