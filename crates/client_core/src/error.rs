use std::time::Duration;

use shared::error::{ApiErrorBody, ApiException, ErrorCode};
use thiserror::Error;

/// Failure of a fetch or mutation against the API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("network unavailable: {0}")]
    Network(String),
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("server responded {status}: {message}")]
    Server { status: u16, message: String },
    #[error("request rejected: {0}")]
    Validation(String),
    #[error("unexpected response payload: {0}")]
    InvalidPayload(String),
}

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Server { status, .. } => *status >= 500,
            Self::Validation(_) | Self::InvalidPayload(_) => false,
        }
    }

    pub fn from_status(status: u16, body: &ApiErrorBody) -> Self {
        let exception = ApiException::from_response(status, body);
        match exception.code {
            ErrorCode::Validation => Self::Validation(exception.message),
            _ => Self::Server {
                status,
                message: exception.message,
            },
        }
    }

    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout)
        } else if err.is_decode() {
            Self::InvalidPayload(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Server {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            Self::Network(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeSource {
    Mutation,
    GeoSearch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub source: NoticeSource,
    pub message: String,
}

impl Notice {
    pub fn new(source: NoticeSource, message: impl Into<String>) -> Self {
        Self {
            source,
            message: message.into(),
        }
    }
}
