//! Best-effort extraction of the export across candidate pages.
//!
//! Pages are tried in order; on each page the strategies run in order
//! (direct fetch, UI-driven download, link scan). The first artifact wins and
//! nothing after it is evaluated. Strategy-level failures are logged and never
//! propagated; only exhausting every (page, strategy) pair fails the stage.

use crate::backend::{Backend, BackendError, Cookie, WaitUntil};
use crate::config::RunConfig;
use crate::http::{HttpClient, HttpError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    DirectFetch,
    UiDownload,
    LinkScan,
}

impl StrategyKind {
    pub const ORDER: [StrategyKind; 3] = [
        StrategyKind::DirectFetch,
        StrategyKind::UiDownload,
        StrategyKind::LinkScan,
    ];
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::DirectFetch => "direct_fetch",
            StrategyKind::UiDownload => "ui_download",
            StrategyKind::LinkScan => "link_scan",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("Unable to find or download the export from any of {pages} candidate page(s)")]
    Exhausted { pages: usize },
    #[error("Payload of {len} bytes is not above the {min}-byte plausibility threshold")]
    Implausible { len: usize, min: usize },
    #[error("Unexpected HTTP status {0}")]
    Status(u16),
    #[error("Invalid link {href}: {reason}")]
    InvalidLink { href: String, reason: String },
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Http(#[from] HttpError),
}

/// The downloaded export and where it came from.
#[derive(Debug, Clone)]
pub struct AcquiredArtifact {
    bytes: Vec<u8>,
    pub source: StrategyKind,
    /// Trigger or URL that produced the payload.
    pub origin: String,
    pub page_url: String,
    pub acquired_at: DateTime<Utc>,
}

impl AcquiredArtifact {
    /// Rejects payloads of `min_bytes` or fewer.
    pub fn new(
        bytes: Vec<u8>,
        source: StrategyKind,
        origin: impl Into<String>,
        page_url: impl Into<String>,
        min_bytes: usize,
    ) -> Result<Self, AcquisitionError> {
        if bytes.len() <= min_bytes {
            return Err(AcquisitionError::Implausible {
                len: bytes.len(),
                min: min_bytes,
            });
        }
        Ok(Self {
            bytes,
            source,
            origin: origin.into(),
            page_url: page_url.into(),
            acquired_at: Utc::now(),
        })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

pub struct AcquisitionPipeline<'a> {
    config: &'a RunConfig,
    http: &'a dyn HttpClient,
}

impl<'a> AcquisitionPipeline<'a> {
    pub fn new(config: &'a RunConfig, http: &'a dyn HttpClient) -> Self {
        Self { config, http }
    }

    /// Return the artifact of the first successful (page, strategy) pair.
    pub async fn acquire<B: Backend + ?Sized>(
        &self,
        backend: &mut B,
    ) -> Result<AcquiredArtifact, AcquisitionError> {
        let pages = &self.config.start_urls;
        for (i, url) in pages.iter().enumerate() {
            info!("Processing URL {}/{}: {}", i + 1, pages.len(), url);
            if let Err(e) = backend
                .navigate(url, WaitUntil::NetworkIdle, self.config.timeout())
                .await
            {
                warn!("Failed to process URL {}: {}", url, e);
                continue;
            }

            for kind in StrategyKind::ORDER {
                match self.run_strategy(backend, kind, url).await {
                    Ok(Some(artifact)) => {
                        info!(
                            "Acquired {} bytes via {} ({}) on {}",
                            artifact.len(),
                            kind,
                            artifact.origin,
                            url
                        );
                        return Ok(artifact);
                    }
                    Ok(None) => debug!("{} found nothing on {}", kind, url),
                    Err(e) => warn!("{} failed on {}: {}", kind, url, e),
                }
            }
        }
        Err(AcquisitionError::Exhausted { pages: pages.len() })
    }

    async fn run_strategy<B: Backend + ?Sized>(
        &self,
        backend: &mut B,
        kind: StrategyKind,
        page_url: &str,
    ) -> Result<Option<AcquiredArtifact>, AcquisitionError> {
        match kind {
            StrategyKind::DirectFetch => self.direct_fetch(backend, page_url).await,
            StrategyKind::UiDownload => self.ui_download(backend, page_url).await,
            StrategyKind::LinkScan => self.link_scan(backend, page_url).await,
        }
    }

    /// GET the configured resource URL when its path carries the expected extension.
    async fn direct_fetch<B: Backend + ?Sized>(
        &self,
        backend: &mut B,
        page_url: &str,
    ) -> Result<Option<AcquiredArtifact>, AcquisitionError> {
        let Some(resource_url) = self.config.resource_url() else {
            return Ok(None);
        };
        if !path_has_extension(resource_url, &self.config.file_extension) {
            debug!("Resource URL {} is not a direct link", resource_url);
            return Ok(None);
        }

        info!("Resource URL looks direct; attempting GET");
        let cookies = session_cookies(backend).await;
        let response = self.http.get(resource_url, &cookies).await?;
        if response.status != 200 {
            return Err(AcquisitionError::Status(response.status));
        }
        AcquiredArtifact::new(
            response.body,
            StrategyKind::DirectFetch,
            resource_url,
            page_url,
            self.config.min_artifact_bytes,
        )
        .map(Some)
    }

    /// Click each download trigger in turn and keep the first download it starts.
    async fn ui_download<B: Backend + ?Sized>(
        &self,
        backend: &mut B,
        page_url: &str,
    ) -> Result<Option<AcquiredArtifact>, AcquisitionError> {
        let selectors = &self.config.selectors;
        let triggers = selectors
            .download_texts
            .iter()
            .chain(selectors.download_selectors.iter());

        for trigger in triggers {
            let element = match backend.query(&trigger.locator).await {
                Ok(Some(element)) => element,
                Ok(None) => continue,
                Err(e) => {
                    debug!("Download trigger {} lookup failed: {}", trigger.name(), e);
                    continue;
                }
            };

            info!("Clicking download trigger {}", trigger.name());
            // One watch per click; dropping it at the end of this iteration
            // detaches the listener before the next trigger is tried.
            let watch = match backend.arm_download().await {
                Ok(watch) => watch,
                Err(e) => {
                    warn!("Watching downloads for {} failed: {}", trigger.name(), e);
                    continue;
                }
            };
            if let Err(e) = backend.click(element).await {
                warn!("Clicking {} failed: {}", trigger.name(), e);
                continue;
            }
            tokio::time::sleep(self.config.download_wait()).await;

            let Some(download) = watch.take() else {
                warn!(
                    "No download started within {:?} of clicking {}",
                    self.config.download_wait(),
                    trigger.name()
                );
                continue;
            };

            let dest = self.config.artifact_path();
            if let Err(e) = backend.save_download(&download, &dest).await {
                warn!("Saving download from {} failed: {}", trigger.name(), e);
                continue;
            }
            let bytes = match tokio::fs::read(&dest).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Reading {} failed: {}", dest.display(), e);
                    continue;
                }
            };
            match AcquiredArtifact::new(
                bytes,
                StrategyKind::UiDownload,
                trigger.name(),
                page_url,
                self.config.min_artifact_bytes,
            ) {
                Ok(artifact) => return Ok(Some(artifact)),
                Err(e) => warn!("Download from {} rejected: {}", trigger.name(), e),
            }
        }
        Ok(None)
    }

    /// GET every anchor whose href mentions the expected extension.
    async fn link_scan<B: Backend + ?Sized>(
        &self,
        backend: &mut B,
        page_url: &str,
    ) -> Result<Option<AcquiredArtifact>, AcquisitionError> {
        let anchors = backend.query_all("a").await?;
        if anchors.is_empty() {
            return Ok(None);
        }
        let current = backend
            .current_url()
            .await
            .unwrap_or_else(|_| page_url.to_string());
        let extension = self.config.file_extension.to_ascii_lowercase();
        let mut cookies: Option<Vec<Cookie>> = None;

        for anchor in anchors {
            let href = match backend.attribute(anchor, "href").await {
                Ok(Some(href)) if href.to_ascii_lowercase().contains(&extension) => href,
                Ok(_) => continue,
                Err(e) => {
                    debug!("Reading href failed: {}", e);
                    continue;
                }
            };

            let link = match resolve_href(&current, &href) {
                Ok(link) => link,
                Err(e) => {
                    debug!("{}", e);
                    continue;
                }
            };
            info!("Found export link {}; attempting GET", link);

            if cookies.is_none() {
                cookies = Some(session_cookies(backend).await);
            }
            let jar = cookies.as_deref().unwrap_or_default();
            let response = match self.http.get(&link, jar).await {
                Ok(response) => response,
                Err(e) => {
                    warn!("GET {} failed: {}", link, e);
                    continue;
                }
            };
            if response.status != 200 {
                debug!("GET {} returned {}", link, response.status);
                continue;
            }
            match AcquiredArtifact::new(
                response.body,
                StrategyKind::LinkScan,
                link.as_str(),
                page_url,
                self.config.min_artifact_bytes,
            ) {
                Ok(artifact) => return Ok(Some(artifact)),
                Err(e) => debug!("Link {} rejected: {}", link, e),
            }
        }
        Ok(None)
    }
}

async fn session_cookies<B: Backend + ?Sized>(backend: &mut B) -> Vec<Cookie> {
    match backend.get_cookies().await {
        Ok(cookies) => cookies,
        Err(e) => {
            debug!("Fetching without session cookies: {}", e);
            Vec::new()
        }
    }
}

/// Whether the path component of `url` ends with `extension` (case-insensitive).
pub fn path_has_extension(url: &str, extension: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => parsed
            .path()
            .to_ascii_lowercase()
            .ends_with(&extension.to_ascii_lowercase()),
        Err(_) => false,
    }
}

/// Make `href` absolute.
///
/// Absolute hrefs are kept. Anything else is appended to the current page URL
/// (query and fragment dropped) as a path segment, so `exports/a.csv` found on
/// `https://host/candidates` becomes `https://host/candidates/exports/a.csv`.
pub fn resolve_href(page_url: &str, href: &str) -> Result<String, AcquisitionError> {
    let invalid = |reason: String| AcquisitionError::InvalidLink {
        href: href.to_string(),
        reason,
    };
    let href = href.trim();
    let lower = href.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Ok(href.to_string());
    }

    let mut base = Url::parse(page_url).map_err(|e| invalid(e.to_string()))?;
    if href.starts_with("//") {
        return Ok(format!("{}:{}", base.scheme(), href));
    }
    base.set_query(None);
    base.set_fragment(None);
    let base = format!("{}/", base.as_str().trim_end_matches('/'));
    let base = Url::parse(&base).map_err(|e| invalid(e.to_string()))?;
    base.join(href.trim_start_matches('/'))
        .map(String::from)
        .map_err(|e| invalid(e.to_string()))
}
