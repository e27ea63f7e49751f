//! Unified engine error model and mapping helpers.
//! Every operation of the aggregation and retrieval engine reports failures through
//! `AppError`, so the layer above can map them onto HTTP responses or UI messages
//! without inspecting strings.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    /// An operation was invoked out of order, or against state that cannot support it.
    InvalidOperation { code: String, message: String },
    InvalidArgument { code: String, message: String },
    NotFound { code: String, message: String },
    /// The external query service rejected or failed the work.
    Service { code: String, message: String },
    Io { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::InvalidOperation { code, .. }
            | AppError::InvalidArgument { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Service { code, .. }
            | AppError::Io { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::InvalidOperation { message, .. }
            | AppError::InvalidArgument { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Service { message, .. }
            | AppError::Io { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn invalid_operation<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::InvalidOperation { code: code.into(), message: msg.into() } }
    pub fn invalid_argument<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::InvalidArgument { code: code.into(), message: msg.into() } }
    pub fn not_found<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn service<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Service { code: code.into(), message: msg.into() } }
    pub fn io<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Io { code: code.into(), message: msg.into() } }
    pub fn internal<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    pub fn is_not_found(&self) -> bool { matches!(self, AppError::NotFound { .. }) }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::InvalidOperation { .. } => 409,
            AppError::InvalidArgument { .. } => 400,
            AppError::NotFound { .. } => 404,
            AppError::Service { .. } => 502,
            AppError::Io { .. } => 503,
            AppError::Internal { .. } => 500,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // Default mapping: treat as a service failure unless downcast to AppError
        match err.downcast::<AppError>() {
            Ok(app) => app,
            Err(other) => AppError::Service { code: "service_error".into(), message: format!("{:#}", other) },
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Io { code: "transport_error".into(), message: err.to_string() }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal { code: "json_error".into(), message: err.to_string() }
    }
}
