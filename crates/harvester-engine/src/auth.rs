//! Login sequence, run when no valid session could be restored.

use crate::backend::{Backend, BackendError, WaitUntil};
use crate::config::RunConfig;
use crate::locator::{Action, Cascade, LocatorStrategy};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Bound on waiting for the page to settle after submitting credentials.
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Failed to open login page {url}: {source}")]
    Navigation { url: String, source: BackendError },
    #[error("No submit control found on the login page")]
    SubmitNotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStep {
    NavLogin,
    FillUsername,
    FillPassword,
    Submit,
    WaitSettle,
    Done,
}

/// What the login sequence managed to do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginOutcome {
    pub username_filled: bool,
    pub password_filled: bool,
    /// Strategy that submitted the form.
    pub submitted_via: String,
    /// False when the post-submit quiescence wait timed out.
    pub settled: bool,
}

pub struct AuthFlow<'a> {
    config: &'a RunConfig,
    settle_timeout: Duration,
}

impl<'a> AuthFlow<'a> {
    pub fn new(config: &'a RunConfig) -> Self {
        Self {
            config,
            settle_timeout: SETTLE_TIMEOUT,
        }
    }

    pub fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout = timeout;
        self
    }

    /// Drive `NAV_LOGIN → FILL_USERNAME → FILL_PASSWORD → SUBMIT → WAIT_SETTLE`.
    ///
    /// Field fills that fail are logged and skipped; only navigation and
    /// submission failures end the flow with an error.
    pub async fn login<B: Backend + ?Sized>(
        &self,
        backend: &mut B,
    ) -> Result<LoginOutcome, AuthError> {
        let selectors = &self.config.selectors;
        let mut outcome = LoginOutcome::default();
        let mut step = AuthStep::NavLogin;

        loop {
            debug!("Login step {:?}", step);
            step = match step {
                AuthStep::NavLogin => {
                    info!("Performing login flow");
                    let url = &self.config.login_url;
                    backend
                        .navigate(url, WaitUntil::NetworkIdle, self.config.timeout())
                        .await
                        .map_err(|source| AuthError::Navigation {
                            url: url.clone(),
                            source,
                        })?;
                    AuthStep::FillUsername
                }
                AuthStep::FillUsername => {
                    outcome.username_filled = fill_field(
                        backend,
                        "username",
                        &selectors.username,
                        &selectors.username_fallback,
                        &self.config.username,
                    )
                    .await;
                    AuthStep::FillPassword
                }
                AuthStep::FillPassword => {
                    outcome.password_filled = fill_field(
                        backend,
                        "password",
                        &selectors.password,
                        &selectors.password_fallback,
                        self.config.password.expose(),
                    )
                    .await;
                    AuthStep::Submit
                }
                AuthStep::Submit => {
                    let via = match Cascade::execute(backend, &selectors.submit, Action::Click).await
                    {
                        Some(strategy) => strategy,
                        None => Cascade::execute(backend, &selectors.submit_fallback, Action::Click)
                            .await
                            .ok_or_else(|| {
                                warn!("Could not click a login button; selectors may need updating");
                                AuthError::SubmitNotFound
                            })?,
                    };
                    outcome.submitted_via = via.name();
                    AuthStep::WaitSettle
                }
                AuthStep::WaitSettle => {
                    match backend.wait_for_idle(self.settle_timeout).await {
                        Ok(()) => outcome.settled = true,
                        Err(e) if e.is_timeout() => {
                            debug!("Page never went idle after login; continuing")
                        }
                        Err(e) => warn!("Post-login settle wait failed ({}); continuing", e),
                    }
                    AuthStep::Done
                }
                AuthStep::Done => return Ok(outcome),
            };
        }
    }
}

async fn fill_field<B: Backend + ?Sized>(
    backend: &mut B,
    field: &str,
    strategies: &[LocatorStrategy],
    fallback: &[LocatorStrategy],
    value: &str,
) -> bool {
    if let Some(strategy) = Cascade::execute(backend, strategies, Action::Fill(value)).await {
        debug!("Filled {} via {}", field, strategy.name());
        return true;
    }
    warn!(
        "Could not find the {} field using common selectors; trying a generic input",
        field
    );
    if Cascade::execute(backend, fallback, Action::Fill(value))
        .await
        .is_some()
    {
        return true;
    }
    error!("Unable to autofill the {} field; login may fail", field);
    false
}
