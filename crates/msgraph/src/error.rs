//! Error taxonomy for Graph calls.

use std::time::Duration;

use reqwest::{Response, StatusCode};
use serde::Deserialize;

/// Errors returned by the Graph layer.
///
/// Status-derived variants carry the `code` and `message` from Graph's
/// `{"error":{"code","message"}}` body when one is present.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum GraphError {
    /// 401 or 403. Never retried.
    #[error("Microsoft Graph denied access ({status}): {code}: {message}")]
    Unauthorized {
        status: u16,
        code: String,
        message: String,
    },

    #[error("not found: {code}: {message}")]
    NotFound { code: String, message: String },

    #[error("conflict: {code}: {message}")]
    Conflict { code: String, message: String },

    /// 410 on a delta link: the cursor expired and a full resync is needed.
    #[error("delta cursor is no longer valid: {code}: {message}")]
    ResyncRequired { code: String, message: String },

    #[error("throttled by Microsoft Graph (retry after {retry_after_secs:?}s): {message}")]
    Throttled {
        retry_after_secs: Option<u64>,
        message: String,
    },

    #[error("Microsoft Graph server error ({status}): {code}: {message}")]
    Server {
        status: u16,
        code: String,
        message: String,
    },

    /// Any other non-success status.
    #[error("Microsoft Graph request failed ({status}): {code}: {message}")]
    Request {
        status: u16,
        code: String,
        message: String,
    },

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response from Microsoft Graph: {0}")]
    Decode(String),

    #[error("token acquisition failed: {0}")]
    Auth(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl GraphError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Throttled { .. } | Self::Server { .. } => true,
            Self::Request { status, .. } => *status == StatusCode::REQUEST_TIMEOUT.as_u16(),
            Self::Transport(err) => !(err.is_builder() || err.is_decode() || err.is_redirect()),
            _ => false,
        }
    }

    /// Wait the service asked for before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Throttled {
                retry_after_secs: Some(secs),
                ..
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Builds the error for a non-success response, consuming its body.
    pub async fn from_response(response: Response) -> Self {
        let status = response.status();
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok());
        let body = response.text().await.unwrap_or_default();

        Self::from_status(status, retry_after_secs, &body)
    }

    pub(crate) fn from_status(
        status: StatusCode,
        retry_after_secs: Option<u64>,
        body: &str,
    ) -> Self {
        let ErrorBody { code, message } = serde_json::from_str::<ErrorEnvelope>(body)
            .map(|envelope| envelope.error)
            .unwrap_or_default();
        let message = if message.is_empty() {
            body.trim().to_string()
        } else {
            message
        };
        let code = if code.is_empty() {
            status.canonical_reason().unwrap_or("unknown").to_string()
        } else {
            code
        };

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Unauthorized {
                status: status.as_u16(),
                code,
                message,
            },
            StatusCode::NOT_FOUND => Self::NotFound { code, message },
            StatusCode::CONFLICT => Self::Conflict { code, message },
            StatusCode::GONE => Self::ResyncRequired { code, message },
            StatusCode::TOO_MANY_REQUESTS => Self::Throttled {
                retry_after_secs,
                message,
            },
            s if s.is_server_error() => Self::Server {
                status: s.as_u16(),
                code,
                message,
            },
            s => Self::Request {
                status: s.as_u16(),
                code,
                message,
            },
        }
    }
}

impl From<serde_json::Error> for GraphError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
