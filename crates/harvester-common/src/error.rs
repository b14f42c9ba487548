use thiserror::Error;

/// Failures raised by a browser backend.
///
/// The engine treats most of these as strategy-local: a cascade or acquisition
/// step logs them and moves on. Only navigation and launch failures end a stage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Navigation failed: {0}")]
    Navigation(String),

    /// The element id is unknown or went stale after a navigation.
    #[error("Element {id} not found")]
    ElementNotFound { id: u32 },

    #[error("Element {id} is not interactable: {reason}")]
    ElementNotInteractable { id: u32, reason: String },

    #[error("Invalid selector: {selector}")]
    SelectorInvalid { selector: String },

    #[error("Script execution error: {0}")]
    ScriptError(String),

    #[error("Timed out waiting for {operation}")]
    TimeoutWithContext { operation: String },

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Connection to the browser lost")]
    ConnectionLost,

    /// The backend was used before `launch` or after `close`.
    #[error("Browser not launched")]
    NotReady,

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("{0}")]
    Other(String),

    #[error("{0} is not supported by this backend")]
    NotSupported(String),
}

impl BackendError {
    pub fn timeout(operation: impl Into<String>) -> Self {
        BackendError::TimeoutWithContext {
            operation: operation.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BackendError::TimeoutWithContext { .. })
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Serialization(err.to_string())
    }
}
