use thiserror::Error;

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("CONFIG_INVALID: {0}")]
    Config(String),
    #[error("STYLESHEET_MISSING: {0}")]
    Stylesheet(String),
    #[error("CLIENT_INIT: {0}")]
    Client(String),
    #[error("BIND_FAILURE: {0}")]
    Bind(String),
}

impl From<reqwest::Error> for DashboardError {
    fn from(value: reqwest::Error) -> Self {
        Self::Client(value.to_string())
    }
}

pub type DashboardResult<T> = Result<T, DashboardError>;

/// Why a single analytics fetch produced no data.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("backend answered HTTP {0}")]
    Status(u16),
    #[error("unreadable response body: {0}")]
    Body(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() || value.is_body() {
            Self::Body(value.to_string())
        } else {
            Self::Transport(value.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(value: serde_json::Error) -> Self {
        Self::Body(value.to_string())
    }
}
