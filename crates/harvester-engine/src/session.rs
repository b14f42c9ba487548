//! Persisted authentication state and login detection.

use crate::backend::{Backend, Cookie, WaitUntil};
use crate::locator::{Cascade, LocatorStrategy};
use crate::storage::KeyValueStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Store key holding the serialized cookie jar.
pub const SESSION_KEY: &str = "session_cookies_v1";

pub struct SessionManager {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl SessionManager {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            key: SESSION_KEY.to_string(),
        }
    }

    /// Inject the saved session into the browser context.
    ///
    /// Returns whether cookies were injected. Any failure is logged and treated
    /// as "no session".
    pub async fn restore<B: Backend + ?Sized>(&self, backend: &mut B) -> bool {
        let raw = match self.store.get(&self.key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("No saved session under {}", self.key);
                return false;
            }
            Err(e) => {
                warn!("Failed to load saved session: {}", e);
                return false;
            }
        };

        let cookies: Vec<Cookie> = match serde_json::from_slice(&raw) {
            Ok(cookies) => cookies,
            Err(e) => {
                warn!("Saved session is unreadable: {}", e);
                return false;
            }
        };
        if cookies.is_empty() {
            debug!("Saved session is empty");
            return false;
        }

        let count = cookies.len();
        match backend.set_cookies(cookies).await {
            Ok(()) => {
                info!("Restored {} cookies from the store", count);
                true
            }
            Err(e) => {
                warn!("Failed to inject saved session: {}", e);
                false
            }
        }
    }

    /// Save the browser's current cookies. Returns whether the write succeeded.
    pub async fn persist<B: Backend + ?Sized>(&self, backend: &mut B) -> bool {
        let cookies = match backend.get_cookies().await {
            Ok(cookies) => cookies,
            Err(e) => {
                warn!("Failed to read session cookies: {}", e);
                return false;
            }
        };
        let raw = match serde_json::to_vec(&cookies) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to serialize session cookies: {}", e);
                return false;
            }
        };
        match self.store.set(&self.key, &raw, "application/json").await {
            Ok(()) => {
                info!("Saved {} cookies to the store", cookies.len());
                true
            }
            Err(e) => {
                warn!("Failed to save session cookies: {}", e);
                false
            }
        }
    }

    /// Heuristic login check: true when any post-login marker is on the page.
    ///
    /// Marker text can also appear on unauthenticated pages, in which case this
    /// reports a login that never happened. The acquisition stage then fails and
    /// the attempt is retried.
    pub async fn probe<B: Backend + ?Sized>(backend: &mut B, markers: &[LocatorStrategy]) -> bool {
        match Cascade::any_present(backend, markers).await {
            Some(marker) => {
                info!(
                    "Detected {} without a fresh login; reusing the saved session",
                    marker
                );
                true
            }
            None => {
                debug!("No post-login markers on the page (may require login)");
                false
            }
        }
    }

    /// Open the first candidate page and probe it. Navigation failures count as
    /// "not logged in".
    pub async fn navigate_and_probe<B: Backend + ?Sized>(
        backend: &mut B,
        url: &str,
        timeout: Duration,
        markers: &[LocatorStrategy],
    ) -> bool {
        if let Err(e) = backend.navigate(url, WaitUntil::NetworkIdle, timeout).await {
            debug!("Opening {} to check the session failed: {}", url, e);
            return false;
        }
        Self::probe(backend, markers).await
    }
}
