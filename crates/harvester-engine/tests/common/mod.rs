#![allow(dead_code)]

use async_trait::async_trait;
use harvester_engine::backend::{
    Backend, BackendError, Cookie, DownloadHandle, DownloadWatch, ElementRef, Locator,
    NavigationResult, WaitUntil,
};
use harvester_engine::config::{RunConfig, Secret};
use harvester_engine::controller::Sleeper;
use harvester_engine::http::{HttpClient, HttpError, HttpResponse};
use harvester_engine::protocol::DownloadNotifier;
use harvester_engine::storage::{KeyValueStore, StoreError};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const LOGIN_URL: &str = "https://app.example/login";
pub const PAGE_1: &str = "https://app.example/candidates";
pub const PAGE_2: &str = "https://app.example/reports";

/// A fake DOM node.
#[derive(Debug, Clone, Default)]
pub struct FakeElement {
    pub css: Vec<String>,
    pub tag: Option<String>,
    pub text: Option<String>,
    pub attrs: HashMap<String, String>,
    pub fail_action: bool,
    pub download: Option<Vec<u8>>,
}

impl FakeElement {
    pub fn css(selector: &str) -> Self {
        Self {
            css: vec![selector.to_string()],
            ..Self::default()
        }
    }

    pub fn text(tag: &str, text: &str) -> Self {
        Self {
            css: vec![tag.to_string()],
            tag: Some(tag.to_string()),
            text: Some(text.to_string()),
            ..Self::default()
        }
    }

    pub fn link(href: &str) -> Self {
        Self::css("a").with_attr("href", href)
    }

    pub fn also(mut self, selector: &str) -> Self {
        self.css.push(selector.to_string());
        self
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_action = true;
        self
    }

    pub fn downloads(mut self, bytes: Vec<u8>) -> Self {
        self.download = Some(bytes);
        self
    }

    fn label(&self) -> String {
        match (&self.text, self.css.first()) {
            (Some(text), _) => format!("'{}'", text),
            (None, Some(css)) => css.clone(),
            (None, None) => "?".into(),
        }
    }

    fn matches(&self, locator: &Locator) -> bool {
        match locator {
            Locator::Css { selector } => self.css.iter().any(|c| c == selector),
            Locator::Text { text, scope, exact } => {
                let Some(own) = &self.text else {
                    return false;
                };
                let in_scope = match scope.as_deref() {
                    None | Some("*") => true,
                    Some(scope) => self.tag.as_deref() == Some(scope),
                };
                let hit = if *exact {
                    own == text
                } else {
                    own.to_lowercase().contains(&text.to_lowercase())
                };
                in_scope && hit
            }
            Locator::Attribute {
                selector,
                name,
                contains,
            } => {
                self.css.iter().any(|c| c == selector)
                    && self
                        .attrs
                        .get(name)
                        .is_some_and(|v| v.contains(contains.as_str()))
            }
        }
    }
}

/// Log shared by every backend a test creates.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events().iter().filter(|e| e.starts_with(prefix)).count()
    }

    pub fn contains(&self, event: &str) -> bool {
        self.events().iter().any(|e| e == event)
    }

    pub fn navigations(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|e| e.strip_prefix("navigate ").map(String::from))
            .collect()
    }
}

/// Scripted in-memory browser.
#[derive(Debug, Default)]
pub struct MockBackend {
    pub pages: HashMap<String, Vec<FakeElement>>,
    pub failing_urls: HashSet<String>,
    pub cookies: Vec<Cookie>,
    pub fail_launch: bool,
    pub fail_cookies: bool,
    pub idle_times_out: bool,
    /// Number of `arm_download` calls that fail before one succeeds.
    pub fail_arms: u32,
    pub log: EventLog,
    current: Option<String>,
    armed: Option<DownloadNotifier>,
    downloads: HashMap<String, Vec<u8>>,
    launched: bool,
}

impl MockBackend {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn page(mut self, url: &str, elements: Vec<FakeElement>) -> Self {
        self.pages.insert(url.to_string(), elements);
        self
    }

    pub fn failing_url(mut self, url: &str) -> Self {
        self.failing_urls.insert(url.to_string());
        self
    }

    /// Open `url` directly, bypassing navigation rules.
    pub fn at(mut self, url: &str) -> Self {
        self.current = Some(url.to_string());
        self
    }

    fn elements(&self) -> &[FakeElement] {
        self.current
            .as_ref()
            .and_then(|url| self.pages.get(url))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn element(&self, element: ElementRef) -> Result<FakeElement, BackendError> {
        self.elements()
            .get(element.0 as usize)
            .cloned()
            .ok_or(BackendError::ElementNotFound { id: element.0 })
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn launch(&mut self) -> Result<(), BackendError> {
        self.log.push("launch");
        if self.fail_launch {
            return Err(BackendError::Other("no browser".into()));
        }
        self.launched = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        self.log.push("close");
        self.launched = false;
        Ok(())
    }

    async fn is_ready(&self) -> bool {
        self.launched
    }

    async fn navigate(
        &mut self,
        url: &str,
        _wait: WaitUntil,
        _timeout: Duration,
    ) -> Result<NavigationResult, BackendError> {
        self.log.push(format!("navigate {}", url));
        if self.failing_urls.contains(url) {
            return Err(BackendError::Navigation(format!("{} unreachable", url)));
        }
        self.current = Some(url.to_string());
        Ok(NavigationResult {
            url: url.to_string(),
            title: String::new(),
            status: 200,
        })
    }

    async fn wait_for_idle(&mut self, _timeout: Duration) -> Result<(), BackendError> {
        self.log.push("wait_idle");
        if self.idle_times_out {
            return Err(BackendError::timeout("network idle"));
        }
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, BackendError> {
        self.current.clone().ok_or(BackendError::NotReady)
    }

    async fn query(&mut self, locator: &Locator) -> Result<Option<ElementRef>, BackendError> {
        Ok(self
            .elements()
            .iter()
            .position(|e| e.matches(locator))
            .map(|i| ElementRef(i as u32)))
    }

    async fn query_all(&mut self, selector: &str) -> Result<Vec<ElementRef>, BackendError> {
        Ok(self
            .elements()
            .iter()
            .enumerate()
            .filter(|(_, e)| e.css.iter().any(|c| c == selector))
            .map(|(i, _)| ElementRef(i as u32))
            .collect())
    }

    async fn fill(&mut self, element: ElementRef, value: &str) -> Result<(), BackendError> {
        let target = self.element(element)?;
        if target.fail_action {
            return Err(BackendError::ElementNotInteractable {
                id: element.0,
                reason: "detached".into(),
            });
        }
        self.log.push(format!("fill {}={}", target.label(), value));
        Ok(())
    }

    async fn click(&mut self, element: ElementRef) -> Result<(), BackendError> {
        let target = self.element(element)?;
        if target.fail_action {
            return Err(BackendError::ElementNotInteractable {
                id: element.0,
                reason: "covered".into(),
            });
        }
        self.log.push(format!("click {}", target.label()));
        if let Some(bytes) = target.download {
            let id = format!("dl-{}", self.downloads.len() + 1);
            self.downloads.insert(id.clone(), bytes);
            if let Some(notifier) = self.armed.take() {
                let fired = notifier.fire(DownloadHandle {
                    id,
                    suggested_filename: "export.csv".into(),
                    url: None,
                });
                self.log.push(format!("download fired={}", fired));
            }
        }
        Ok(())
    }

    async fn attribute(
        &mut self,
        element: ElementRef,
        name: &str,
    ) -> Result<Option<String>, BackendError> {
        Ok(self.element(element)?.attrs.get(name).cloned())
    }

    async fn arm_download(&mut self) -> Result<DownloadWatch, BackendError> {
        if self.fail_arms > 0 {
            self.fail_arms -= 1;
            self.log.push("arm failed");
            return Err(BackendError::Download("listener unavailable".into()));
        }
        self.log.push("arm");
        let (notifier, watch) = DownloadWatch::channel();
        self.armed = Some(notifier);
        Ok(watch)
    }

    async fn save_download(
        &mut self,
        download: &DownloadHandle,
        dest: &Path,
    ) -> Result<u64, BackendError> {
        let bytes = self
            .downloads
            .get(&download.id)
            .ok_or_else(|| BackendError::Download(format!("unknown download {}", download.id)))?;
        std::fs::write(dest, bytes)?;
        Ok(bytes.len() as u64)
    }

    async fn get_cookies(&mut self) -> Result<Vec<Cookie>, BackendError> {
        if self.fail_cookies {
            return Err(BackendError::ConnectionLost);
        }
        Ok(self.cookies.clone())
    }

    async fn set_cookies(&mut self, cookies: Vec<Cookie>) -> Result<(), BackendError> {
        if self.fail_cookies {
            return Err(BackendError::ConnectionLost);
        }
        self.log.push(format!("set_cookies {}", cookies.len()));
        self.cookies.extend(cookies);
        Ok(())
    }
}

/// HTTP double answering from a URL table (unknown URLs get 404).
#[derive(Debug, Default)]
pub struct MockHttp {
    responses: Mutex<HashMap<String, (u16, Vec<u8>)>>,
    /// `None` simulates a transport failure.
    post_status: Mutex<Option<u16>>,
    pub gets: Mutex<Vec<(String, usize)>>,
    pub posts: Mutex<Vec<(String, String, String, usize)>>,
}

impl MockHttp {
    pub fn new() -> Self {
        Self {
            post_status: Mutex::new(Some(200)),
            ..Self::default()
        }
    }

    pub fn respond(self, url: &str, status: u16, body: Vec<u8>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), (status, body));
        self
    }

    pub fn post_status(self, status: Option<u16>) -> Self {
        *self.post_status.lock().unwrap() = status;
        self
    }

    pub fn get_urls(&self) -> Vec<String> {
        self.gets.lock().unwrap().iter().map(|(u, _)| u.clone()).collect()
    }

    pub fn post_count(&self) -> usize {
        self.posts.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpClient for MockHttp {
    async fn get(&self, url: &str, cookies: &[Cookie]) -> Result<HttpResponse, HttpError> {
        self.gets
            .lock()
            .unwrap()
            .push((url.to_string(), cookies.len()));
        let (status, body) = self
            .responses
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or((404, Vec::new()));
        Ok(HttpResponse { status, body })
    }

    async fn post_file(
        &self,
        url: &str,
        file_name: &str,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<u16, HttpError> {
        self.posts.lock().unwrap().push((
            url.to_string(),
            file_name.to_string(),
            content_type.to_string(),
            body.len(),
        ));
        match *self.post_status.lock().unwrap() {
            Some(status) => Ok(status),
            None => Err(HttpError::Transport("connection refused".into())),
        }
    }
}

/// Store whose every operation fails.
#[derive(Debug, Default)]
pub struct FailingStore;

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Err(StoreError::Unavailable("store offline".into()))
    }

    async fn set(&self, _key: &str, _value: &[u8], _content_type: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("store offline".into()))
    }
}

/// Records requested delays instead of sleeping.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    pub delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}

pub fn csv(rows: usize) -> Vec<u8> {
    let mut out = b"name,email,status\n".to_vec();
    for i in 0..rows {
        out.extend_from_slice(format!("Candidate {i},c{i}@example.com,new\n").as_bytes());
    }
    out
}

pub fn cookie(name: &str, value: &str) -> Cookie {
    Cookie {
        name: name.into(),
        value: value.into(),
        domain: Some("app.example".into()),
        path: Some("/".into()),
        expires: None,
        http_only: Some(true),
        secure: Some(true),
    }
}

/// Config with credentials, two candidate pages and no real waiting.
pub fn config(download_dir: &Path) -> RunConfig {
    RunConfig {
        start_urls: vec![PAGE_1.to_string(), PAGE_2.to_string()],
        login_url: LOGIN_URL.to_string(),
        username: "recruiter@example.com".into(),
        password: Secret::new("s3cret"),
        download_wait_ms: 0,
        backoff_unit_ms: 1,
        download_dir: Some(download_dir.to_path_buf()),
        job_id: "job-42".into(),
        ..RunConfig::default()
    }
}

/// Login page with the most common markup.
pub fn login_page() -> Vec<FakeElement> {
    vec![
        FakeElement::css("input").also("input[type=\"email\"]"),
        FakeElement::css("input").also("input[type=\"password\"]"),
        FakeElement::text("button", "Sign in").also("button[type=\"submit\"]"),
    ]
}
