//!
//! Columnar query service contract
//! -------------------------------
//! The engine never executes SQL itself. It submits text to an external,
//! asynchronous Presto-family service and polls it. This module defines that
//! contract; `http` talks to a real gateway and `memory` is a scripted in-process
//! stand-in.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::AppResult;

pub mod http;
pub mod memory;

pub use http::HttpQueryService;
pub use memory::MemoryQueryService;

/// One result row keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Raw execution status as reported by the service. Interpretation into the
/// engine's own states happens in the query runner.
/// Gateways spell the failure text `error_message` or `error`; both are accepted
/// and `error_message` wins when both are present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawServiceStatus")]
pub struct ServiceStatus {
    pub state: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Deserialize)]
struct RawServiceStatus {
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl From<RawServiceStatus> for ServiceStatus {
    fn from(raw: RawServiceStatus) -> Self {
        Self { state: raw.state, error_message: raw.error_message.or(raw.error) }
    }
}

impl ServiceStatus {
    pub fn new(state: impl Into<String>) -> Self {
        Self { state: Some(state.into()), error_message: None }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { state: Some("FAILED".to_string()), error_message: Some(message.into()) }
    }
}

/// Client of the external query execution service.
///
/// Errors from `init` and `start_query` are surfaced to callers unchanged; nothing
/// in the engine retries them.
pub trait QueryService: Send + Sync {
    /// Establish the session. Implementations may be called more than once.
    fn init(&self) -> impl Future<Output = AppResult<()>> + Send;

    /// Submit SQL for asynchronous execution, returning the opaque execution id.
    fn start_query(&self, sql: &str) -> impl Future<Output = AppResult<String>> + Send;

    fn get_query_status(&self, execution_id: &str) -> impl Future<Output = AppResult<ServiceStatus>> + Send;

    /// Result rows of a finished execution.
    fn get_query_results(&self, execution_id: &str) -> impl Future<Output = AppResult<Vec<Row>>> + Send;

    /// Run a statement and return its rows; `sync` asks the service to wait for
    /// completion before answering. Intended for small lookups and row pages.
    fn run_query(&self, sql: &str, max_rows: Option<usize>, sync: bool) -> impl Future<Output = AppResult<Vec<Row>>> + Send;
}
