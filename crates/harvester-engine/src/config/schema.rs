use crate::locator::LocatorStrategy;
use harvester_common::protocol::Locator;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_START_URL: &str = "https://employers.indeed.com/candidates";
pub const DEFAULT_LOGIN_URL: &str = "https://employers.indeed.com/";
pub const DEFAULT_OUTPUT_FILENAME: &str = "indeed-output.csv";

/// Input for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Candidate pages, tried in order.
    pub start_urls: Vec<String>,
    pub login_url: String,
    #[serde(alias = "indeed_username")]
    pub username: String,
    #[serde(alias = "indeed_password", skip_serializing)]
    pub password: Secret,
    /// Multipart POST target; empty disables notification.
    #[serde(alias = "n8n_webhook_url")]
    pub notification_url: String,
    /// Target of the direct-fetch strategy; empty disables it.
    #[serde(alias = "csv_download_url")]
    pub resource_url: String,
    #[serde(alias = "save_cookies")]
    pub save_session: bool,
    #[serde(alias = "download_filename")]
    pub output_filename: String,
    /// Whole-flow attempts.
    pub max_retries: u32,
    /// Per-operation timeout.
    #[serde(alias = "timeout")]
    pub timeout_ms: u64,
    /// Settle interval after clicking a download trigger.
    pub download_wait_ms: u64,
    /// Unit of the linear backoff between attempts.
    pub backoff_unit_ms: u64,
    #[serde(alias = "csv_type")]
    pub resource_type: String,
    pub job_id: String,
    /// Extension a fetched resource path or link must carry.
    pub file_extension: String,
    /// Payloads at or below this size are rejected.
    pub min_artifact_bytes: usize,
    /// Where downloads are written before delivery. Defaults to the system temp dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,
    pub selectors: SelectorProfile,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            start_urls: vec![DEFAULT_START_URL.to_string()],
            login_url: DEFAULT_LOGIN_URL.to_string(),
            username: String::new(),
            password: Secret::default(),
            notification_url: String::new(),
            resource_url: String::new(),
            save_session: true,
            output_filename: DEFAULT_OUTPUT_FILENAME.to_string(),
            max_retries: 2,
            timeout_ms: 30_000,
            download_wait_ms: 5_000,
            backoff_unit_ms: 1_000,
            resource_type: "candidates".to_string(),
            job_id: String::new(),
            file_extension: ".csv".to_string(),
            min_artifact_bytes: 50,
            download_dir: None,
            selectors: SelectorProfile::default(),
        }
    }
}

impl RunConfig {
    pub fn has_credentials(&self) -> bool {
        !self.username.trim().is_empty() && !self.password.expose().is_empty()
    }

    pub fn notification_url(&self) -> Option<&str> {
        non_empty(&self.notification_url)
    }

    pub fn resource_url(&self) -> Option<&str> {
        non_empty(&self.resource_url)
    }

    /// Number of whole-flow attempts, never below one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn download_wait(&self) -> Duration {
        Duration::from_millis(self.download_wait_ms)
    }

    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }

    /// Deterministic location for a downloaded artifact.
    pub fn artifact_path(&self) -> PathBuf {
        let dir = self
            .download_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let name = std::path::Path::new(&self.output_filename)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| DEFAULT_OUTPUT_FILENAME.into());
        dir.join(name)
    }

    /// Content type stored alongside the artifact.
    pub fn content_type(&self) -> &'static str {
        if self.file_extension.eq_ignore_ascii_case(".csv") {
            "text/csv"
        } else {
            "application/octet-stream"
        }
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// A string that never appears in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("Secret(<empty>)")
        } else {
            f.write_str("Secret(***)")
        }
    }
}

/// Ordered locator strategies for every logical UI target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorProfile {
    pub username: Vec<LocatorStrategy>,
    pub username_fallback: Vec<LocatorStrategy>,
    pub password: Vec<LocatorStrategy>,
    pub password_fallback: Vec<LocatorStrategy>,
    pub submit: Vec<LocatorStrategy>,
    pub submit_fallback: Vec<LocatorStrategy>,
    /// Post-login affordances; any one present means "already authenticated".
    pub login_markers: Vec<LocatorStrategy>,
    pub download_texts: Vec<LocatorStrategy>,
    pub download_selectors: Vec<LocatorStrategy>,
}

fn css(selectors: &[&str]) -> Vec<LocatorStrategy> {
    selectors
        .iter()
        .map(|s| LocatorStrategy::new(Locator::css(*s)))
        .collect()
}

fn texts(texts: &[&str]) -> Vec<LocatorStrategy> {
    texts
        .iter()
        .map(|t| LocatorStrategy::new(Locator::text(*t)))
        .collect()
}

impl Default for SelectorProfile {
    fn default() -> Self {
        Self {
            username: css(&[
                r#"input[type="email"]"#,
                r#"input[name="email"]"#,
                r#"input[name="username"]"#,
                r#"input[id*="email"]"#,
                r#"input[name="__email"]"#,
                r#"input[id*="login"]"#,
                "#signin-email",
            ]),
            username_fallback: css(&["input"]),
            password: css(&[
                r#"input[type="password"]"#,
                r#"input[name="password"]"#,
                r#"input[id*="password"]"#,
                r#"input[name="__password"]"#,
                "#signin-password",
            ]),
            password_fallback: css(&[r#"input[type="password"]"#]),
            submit: vec![
                LocatorStrategy::new(Locator::css(r#"button[type="submit"]"#)),
                LocatorStrategy::new(Locator::text_in("button", "Sign in")),
                LocatorStrategy::new(Locator::text_in("button", "Log in")),
                LocatorStrategy::new(Locator::text_in("button", "Login")),
                LocatorStrategy::new(Locator::css(r#"input[type="submit"]"#)),
                LocatorStrategy::new(Locator::css(".signin-button")),
                LocatorStrategy::new(Locator::css("#signin-submit")),
            ],
            submit_fallback: texts(&["Sign in"]),
            login_markers: texts(&["Download", "Export", "Export CSV"]),
            download_texts: texts(&[
                "Download CSV",
                "Export CSV",
                "Export",
                "Download",
                "Export candidates",
            ]),
            download_selectors: vec![
                LocatorStrategy::new(Locator::css("a[download]")),
                LocatorStrategy::new(Locator::css(r#"a[href$=".csv"]"#)),
                LocatorStrategy::new(Locator::css(r#"button[data-test*="export"]"#)),
                LocatorStrategy::new(Locator::text_in("button", "Export")),
                LocatorStrategy::new(Locator::text_in("button", "Download")),
                LocatorStrategy::new(Locator::text_in("a", "Download CSV")),
                LocatorStrategy::new(Locator::css(".export-button")),
                LocatorStrategy::new(Locator::css(".download-button")),
                LocatorStrategy::new(Locator::css(r#"[data-testid="export"]"#)),
                LocatorStrategy::new(Locator::css(r#"[data-testid="download"]"#)),
            ],
        }
    }
}
