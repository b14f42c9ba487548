use async_trait::async_trait;
pub use harvester_common::error::BackendError;
pub use harvester_common::protocol::{
    Cookie, DownloadHandle, DownloadWatch, ElementRef, Locator, NavigationResult, WaitUntil,
};
use std::path::Path;
use std::time::Duration;

/// The browser automation primitive the pipeline drives.
///
/// One backend owns one browser context and one page. Calls are strictly
/// sequential; the page is never driven concurrently.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Launch the backend (start browser, connect to remote, etc.)
    async fn launch(&mut self) -> Result<(), BackendError>;

    /// Close the backend and cleanup resources.
    async fn close(&mut self) -> Result<(), BackendError>;

    /// Check if the backend is ready to accept commands.
    async fn is_ready(&self) -> bool;

    /// Navigate to `url` and wait for `wait` to be satisfied within `timeout`.
    async fn navigate(
        &mut self,
        url: &str,
        wait: WaitUntil,
        timeout: Duration,
    ) -> Result<NavigationResult, BackendError>;

    /// Wait for network quiescence on the current page.
    async fn wait_for_idle(&mut self, timeout: Duration) -> Result<(), BackendError>;

    /// URL of the current page.
    async fn current_url(&mut self) -> Result<String, BackendError>;

    /// Resolve `locator` to the first matching element, if any.
    async fn query(&mut self, locator: &Locator) -> Result<Option<ElementRef>, BackendError>;

    /// Every element matching a CSS selector, in document order.
    async fn query_all(&mut self, selector: &str) -> Result<Vec<ElementRef>, BackendError>;

    /// Replace the value of an input element.
    async fn fill(&mut self, element: ElementRef, value: &str) -> Result<(), BackendError>;

    async fn click(&mut self, element: ElementRef) -> Result<(), BackendError>;

    async fn attribute(
        &mut self,
        element: ElementRef,
        name: &str,
    ) -> Result<Option<String>, BackendError>;

    /// Register a listener that captures the next download started on the page.
    async fn arm_download(&mut self) -> Result<DownloadWatch, BackendError> {
        Err(BackendError::NotSupported("arm_download".into()))
    }

    /// Write a captured download to `dest`, returning its size in bytes.
    async fn save_download(
        &mut self,
        _download: &DownloadHandle,
        _dest: &Path,
    ) -> Result<u64, BackendError> {
        Err(BackendError::NotSupported("save_download".into()))
    }

    /// Get all cookies from the current session.
    async fn get_cookies(&mut self) -> Result<Vec<Cookie>, BackendError> {
        Err(BackendError::NotSupported("get_cookies".into()))
    }

    /// Add cookies to the current session.
    async fn set_cookies(&mut self, _cookies: Vec<Cookie>) -> Result<(), BackendError> {
        Err(BackendError::NotSupported("set_cookies".into()))
    }
}
