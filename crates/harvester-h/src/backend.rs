use crate::cdp::CdpClient;
use crate::inject::{self, REF_ATTRIBUTE};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, TimeSinceEpoch};
use chromiumoxide::cdp::browser_protocol::browser::{
    DownloadProgressState, EventDownloadWillBegin,
};
use chromiumoxide::element::Element;
use futures::StreamExt;
use harvester_engine::backend::{
    Backend, BackendError, Cookie, DownloadHandle, DownloadWatch, ElementRef, Locator,
    NavigationResult, WaitUntil,
};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Upper bound on waiting for a started download to finish writing.
const DOWNLOAD_SAVE_TIMEOUT: Duration = Duration::from_secs(60);

const DOWNLOAD_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct ChromiumBackend {
    client: Option<CdpClient>,
    visible: bool,
    elements: HashMap<u32, Element>,
    next_ref: u32,
}

impl ChromiumBackend {
    pub fn new() -> Self {
        Self::new_with_visibility(false)
    }

    pub fn new_with_visibility(visible: bool) -> Self {
        Self {
            client: None,
            visible,
            elements: HashMap::new(),
            next_ref: 1,
        }
    }

    fn client(&self) -> Result<&CdpClient, BackendError> {
        self.client.as_ref().ok_or(BackendError::NotReady)
    }

    fn allocate_ref(&mut self) -> u32 {
        let id = self.next_ref;
        self.next_ref += 1;
        id
    }

    fn register(&mut self, element: Element) -> ElementRef {
        let id = self.allocate_ref();
        self.elements.insert(id, element);
        ElementRef(id)
    }

    fn element(&self, element: ElementRef) -> Result<&Element, BackendError> {
        self.elements
            .get(&element.0)
            .ok_or(BackendError::ElementNotFound { id: element.0 })
    }

    async fn find_all(&self, selector: &str) -> Result<Vec<Element>, BackendError> {
        self.client()?
            .page
            .find_elements(selector)
            .await
            .map_err(|e| {
                debug!("querySelectorAll({}) failed: {}", selector, e);
                BackendError::SelectorInvalid {
                    selector: selector.to_string(),
                }
            })
    }

    async fn get_navigation_result(
        page: &chromiumoxide::Page,
    ) -> Result<NavigationResult, BackendError> {
        let title = page
            .get_title()
            .await
            .unwrap_or_default()
            .unwrap_or_default();
        let url = page
            .url()
            .await
            .map_err(|e| BackendError::Navigation(e.to_string()))?
            .unwrap_or_default();
        Ok(NavigationResult {
            url,
            title,
            status: 200,
        })
    }
}

impl Default for ChromiumBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for ChromiumBackend {
    async fn launch(&mut self) -> Result<(), BackendError> {
        info!("Launching headless backend (Chromium)...");
        let client = CdpClient::launch(self.visible)
            .await
            .map_err(|e| BackendError::Other(e.to_string()))?;
        self.client = Some(client);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        self.elements.clear();
        if let Some(client) = self.client.take() {
            client
                .close()
                .await
                .map_err(|e| BackendError::Other(e.to_string()))?;
        }
        Ok(())
    }

    async fn is_ready(&self) -> bool {
        self.client.is_some()
    }

    async fn navigate(
        &mut self,
        url: &str,
        wait: WaitUntil,
        timeout: Duration,
    ) -> Result<NavigationResult, BackendError> {
        self.elements.clear();
        let client = self.client.as_ref().ok_or(BackendError::NotReady)?;
        let deadline = Instant::now() + timeout;

        info!("Navigating to: {}", url);
        tokio::time::timeout(timeout, client.page.goto(url))
            .await
            .map_err(|_| BackendError::timeout(format!("navigate to {}", url)))?
            .map_err(|e| BackendError::Navigation(e.to_string()))?;

        if wait == WaitUntil::NetworkIdle {
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::timeout(remaining, inject::wait_for_quiescence(&client.page))
                .await
                .map_err(|_| BackendError::timeout(format!("network idle on {}", url)))?
                .map_err(|e| BackendError::ScriptError(e.to_string()))?;
        }

        Self::get_navigation_result(&client.page).await
    }

    async fn wait_for_idle(&mut self, timeout: Duration) -> Result<(), BackendError> {
        let client = self.client()?;
        tokio::time::timeout(timeout, inject::wait_for_quiescence(&client.page))
            .await
            .map_err(|_| BackendError::timeout("network idle"))?
            .map_err(|e| BackendError::ScriptError(e.to_string()))
    }

    async fn current_url(&mut self) -> Result<String, BackendError> {
        let client = self.client()?;
        client
            .page
            .url()
            .await
            .map_err(|e| BackendError::Other(e.to_string()))?
            .ok_or_else(|| BackendError::Other("page has no URL".into()))
    }

    async fn query(&mut self, locator: &Locator) -> Result<Option<ElementRef>, BackendError> {
        let found = match locator {
            Locator::Css { selector } => self.find_all(selector).await?.into_iter().next(),
            Locator::Text { text, scope, exact } => {
                let marker = self.allocate_ref();
                let client = self.client()?;
                let tagged =
                    inject::tag_text_match(&client.page, text, scope.as_deref(), *exact, marker)
                        .await
                        .map_err(|e| BackendError::ScriptError(e.to_string()))?;
                if !tagged {
                    return Ok(None);
                }
                let selector = format!("[{}=\"{}\"]", REF_ATTRIBUTE, marker);
                self.find_all(&selector).await?.into_iter().next()
            }
            Locator::Attribute {
                selector,
                name,
                contains,
            } => {
                let mut hit = None;
                for element in self.find_all(selector).await? {
                    let value = element
                        .attribute(name.as_str())
                        .await
                        .map_err(|e| BackendError::ScriptError(e.to_string()))?;
                    if value.is_some_and(|v| v.contains(contains.as_str())) {
                        hit = Some(element);
                        break;
                    }
                }
                hit
            }
        };
        Ok(found.map(|element| self.register(element)))
    }

    async fn query_all(&mut self, selector: &str) -> Result<Vec<ElementRef>, BackendError> {
        let elements = self.find_all(selector).await?;
        Ok(elements
            .into_iter()
            .map(|element| self.register(element))
            .collect())
    }

    async fn fill(&mut self, element: ElementRef, value: &str) -> Result<(), BackendError> {
        let handle = self.element(element)?;
        let not_interactable = |e: chromiumoxide::error::CdpError| {
            BackendError::ElementNotInteractable {
                id: element.0,
                reason: e.to_string(),
            }
        };
        handle.scroll_into_view().await.map_err(not_interactable)?;
        handle.focus().await.map_err(not_interactable)?;
        handle
            .call_js_fn("function() { this.value = ''; }", false)
            .await
            .map_err(not_interactable)?;
        handle.type_str(value).await.map_err(not_interactable)?;
        Ok(())
    }

    async fn click(&mut self, element: ElementRef) -> Result<(), BackendError> {
        let handle = self.element(element)?;
        handle
            .click()
            .await
            .map_err(|e| BackendError::ElementNotInteractable {
                id: element.0,
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn attribute(
        &mut self,
        element: ElementRef,
        name: &str,
    ) -> Result<Option<String>, BackendError> {
        self.element(element)?
            .attribute(name)
            .await
            .map_err(|e| BackendError::ScriptError(e.to_string()))
    }

    async fn arm_download(&mut self) -> Result<DownloadWatch, BackendError> {
        let client = self.client()?;
        let mut begin = client
            .browser
            .event_listener::<EventDownloadWillBegin>()
            .await
            .map_err(|e| BackendError::Download(e.to_string()))?;

        let (mut notifier, watch) = DownloadWatch::channel();
        tokio::spawn(async move {
            let event = tokio::select! {
                _ = notifier.closed() => None,
                event = begin.next() => event,
            };
            if let Some(event) = event {
                debug!("Download started: {}", event.suggested_filename);
                notifier.fire(DownloadHandle {
                    id: event.guid.clone(),
                    suggested_filename: event.suggested_filename.clone(),
                    url: Some(event.url.clone()),
                });
            }
        });
        Ok(watch)
    }

    async fn save_download(
        &mut self,
        download: &DownloadHandle,
        dest: &Path,
    ) -> Result<u64, BackendError> {
        let client = self.client()?;
        // Files land under their guid until moved out.
        let source = client.download_dir().join(&download.id);
        let state = tokio::time::timeout(
            DOWNLOAD_SAVE_TIMEOUT,
            client.downloads().wait_finished(&download.id, DOWNLOAD_POLL_INTERVAL),
        )
        .await
        .map_err(|_| BackendError::timeout(format!("download {}", download.id)))?;
        if state != DownloadProgressState::Completed {
            return Err(BackendError::Download(format!(
                "{} was canceled",
                download.suggested_filename
            )));
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Copy rather than rename: the download dir may sit on another filesystem.
        let size = tokio::fs::copy(&source, dest).await?;
        if let Err(e) = tokio::fs::remove_file(&source).await {
            debug!("Failed to remove {}: {}", source.display(), e);
        }
        info!("Saved download to {} ({} bytes)", dest.display(), size);
        Ok(size)
    }

    async fn get_cookies(&mut self) -> Result<Vec<Cookie>, BackendError> {
        let client = self.client()?;
        let cookies = client
            .page
            .get_cookies()
            .await
            .map_err(|e| BackendError::Other(format!("Get cookies failed: {}", e)))?;

        Ok(cookies
            .into_iter()
            .map(|c| Cookie {
                name: c.name,
                value: c.value,
                domain: Some(c.domain),
                path: Some(c.path),
                expires: if c.session { None } else { Some(c.expires) },
                http_only: Some(c.http_only),
                secure: Some(c.secure),
            })
            .collect())
    }

    async fn set_cookies(&mut self, cookies: Vec<Cookie>) -> Result<(), BackendError> {
        let client = self.client()?;
        let params: Vec<CookieParam> = cookies
            .into_iter()
            .map(|c| {
                let mut param = CookieParam::new(c.name, c.value);
                param.domain = c.domain;
                param.path = c.path;
                param.expires = c.expires.map(TimeSinceEpoch::new);
                param.http_only = c.http_only;
                param.secure = c.secure;
                param
            })
            .collect();
        client
            .page
            .set_cookies(params)
            .await
            .map_err(|e| BackendError::Other(format!("Set cookies failed: {}", e)))?;
        Ok(())
    }
}
