use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::oneshot;

/// How a backend locates an element on the current page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum Locator {
    /// A CSS selector; the first match wins.
    Css { selector: String },
    /// An element whose rendered text matches `text`.
    ///
    /// `exact` compares whitespace-normalised text for equality (case sensitive);
    /// otherwise a case-insensitive substring match is used. `scope` restricts the
    /// candidates to elements matching that CSS selector.
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scope: Option<String>,
        #[serde(default = "default_exact")]
        exact: bool,
    },
    /// An element matching `selector` whose attribute `name` contains `contains`.
    Attribute {
        selector: String,
        name: String,
        contains: String,
    },
}

fn default_exact() -> bool {
    true
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css {
            selector: selector.into(),
        }
    }

    /// Exact text match anywhere on the page.
    pub fn text(text: impl Into<String>) -> Self {
        Locator::Text {
            text: text.into(),
            scope: None,
            exact: true,
        }
    }

    /// Case-insensitive substring match restricted to `scope`.
    pub fn text_in(scope: impl Into<String>, text: impl Into<String>) -> Self {
        Locator::Text {
            text: text.into(),
            scope: Some(scope.into()),
            exact: false,
        }
    }

    pub fn attribute(
        selector: impl Into<String>,
        name: impl Into<String>,
        contains: impl Into<String>,
    ) -> Self {
        Locator::Attribute {
            selector: selector.into(),
            name: name.into(),
            contains: contains.into(),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css { selector } => write!(f, "{}", selector),
            Locator::Text {
                text,
                scope: Some(scope),
                ..
            } => write!(f, "{}:has-text(\"{}\")", scope, text),
            Locator::Text { text, .. } => write!(f, "text=\"{}\"", text),
            Locator::Attribute {
                selector,
                name,
                contains,
            } => write!(f, "{}[{}*=\"{}\"]", selector, name, contains),
        }
    }
}

/// Backend-local handle to a resolved element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementRef(pub u32);

/// Navigation completion criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitUntil {
    Load,
    #[default]
    NetworkIdle,
}

#[derive(Debug, Clone)]
pub struct NavigationResult {
    pub url: String,
    pub title: String,
    pub status: u16, // generic status code (e.g. 200)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
}

/// A download observed by the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadHandle {
    pub id: String,
    pub suggested_filename: String,
    pub url: Option<String>,
}

/// Receiving half of a one-shot download listener.
///
/// Each watch observes at most one download. Dropping it closes the listener so a
/// later download can never be attributed to it.
#[derive(Debug)]
pub struct DownloadWatch {
    rx: oneshot::Receiver<DownloadHandle>,
}

/// Sending half of a one-shot download listener, held by the backend.
#[derive(Debug)]
pub struct DownloadNotifier {
    tx: oneshot::Sender<DownloadHandle>,
}

impl DownloadWatch {
    pub fn channel() -> (DownloadNotifier, DownloadWatch) {
        let (tx, rx) = oneshot::channel();
        (DownloadNotifier { tx }, DownloadWatch { rx })
    }

    /// Returns the download if one fired, without waiting.
    pub fn take(mut self) -> Option<DownloadHandle> {
        self.rx.try_recv().ok()
    }
}

impl DownloadNotifier {
    /// Resolve the watch. Returns false when the watch was already dropped.
    pub fn fire(self, download: DownloadHandle) -> bool {
        self.tx.send(download).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Completes once the watching side has been dropped.
    pub async fn closed(&mut self) {
        self.tx.closed().await
    }
}
