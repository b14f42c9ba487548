//! Outbound HTTP used for direct fetches, link downloads and notifications.

use crate::backend::Cookie;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Timeout applied to every outbound request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Multipart field carrying the delivered file.
pub const FILE_FIELD: &str = "file";

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Whether a status counts as accepted by the receiving end.
pub fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Request failed: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for HttpError {
    fn from(err: reqwest::Error) -> Self {
        HttpError::Transport(err.to_string())
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    /// GET `url`, sending the cookies whose domain matches the URL host.
    async fn get(&self, url: &str, cookies: &[Cookie]) -> Result<HttpResponse, HttpError>;

    /// POST `body` as a multipart form with a single [`FILE_FIELD`] part.
    /// Returns the response status.
    async fn post_file(
        &self,
        url: &str,
        file_name: &str,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<u16, HttpError>;
}

pub struct ReqwestClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestClient {
    pub fn new() -> Result<Self, HttpError> {
        Self::with_timeout(REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str, cookies: &[Cookie]) -> Result<HttpResponse, HttpError> {
        let parsed = parse_url(url)?;
        let mut request = self.client.get(parsed.clone()).timeout(self.timeout);
        if let Some(header) = cookie_header(&parsed, cookies) {
            request = request.header(reqwest::header::COOKIE, header);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        Ok(HttpResponse { status, body })
    }

    async fn post_file(
        &self,
        url: &str,
        file_name: &str,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<u16, HttpError> {
        let parsed = parse_url(url)?;
        let part = reqwest::multipart::Part::bytes(body)
            .file_name(file_name.to_string())
            .mime_str(content_type)?;
        let form = reqwest::multipart::Form::new().part(FILE_FIELD, part);
        let response = self
            .client
            .post(parsed)
            .multipart(form)
            .timeout(self.timeout)
            .send()
            .await?;
        Ok(response.status().as_u16())
    }
}

fn parse_url(url: &str) -> Result<Url, HttpError> {
    Url::parse(url).map_err(|e| HttpError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

/// Build a `Cookie` header from the cookies that apply to `url`.
pub fn cookie_header(url: &Url, cookies: &[Cookie]) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    let pairs: Vec<String> = cookies
        .iter()
        .filter(|c| domain_matches(&host, c.domain.as_deref()))
        .filter(|c| c.secure != Some(true) || url.scheme() == "https")
        .map(|c| format!("{}={}", c.name, c.value))
        .collect();
    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

fn domain_matches(host: &str, domain: Option<&str>) -> bool {
    let Some(domain) = domain else {
        return true;
    };
    let domain = domain.trim_start_matches('.').to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{}", domain))
}
