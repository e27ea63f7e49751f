//! Query execution state machine.
//!
//! `NOT_STARTED → RUNNING → {SUCCEEDED | FAILED | UNKNOWN}`. SUCCEEDED and FAILED
//! are terminal: once reached, the runner freezes and answers status requests from
//! memory. UNKNOWN is not terminal; a later poll may still resolve it.
//!
//! A runner tracks a single execution. Calling `start_query` again starts a new,
//! independent execution and forgets the previous one; nothing de-duplicates
//! concurrent use, so share runners through `RunnerRegistry` instead of locking
//! around them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::project::AccumulatorType;
use crate::service::{QueryService, ServiceStatus};

use super::bucket::{decode_buckets, GlyphBucket};
use super::compose::{compose_aggregation_query, RunnerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryState {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl QueryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueryState::Succeeded | QueryState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryStatus {
    pub status: QueryState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryStatus {
    pub fn new(status: QueryState) -> Self { Self { status, error: None } }

    pub fn failed(error: impl Into<String>) -> Self { Self { status: QueryState::Failed, error: Some(error.into()) } }

    /// Interpret a raw service report. Unrecognized or missing states are UNKNOWN.
    pub fn from_service(reported: ServiceStatus) -> Self {
        let state = reported.state.as_deref().map(|s| s.trim().to_ascii_uppercase());
        match state.as_deref() {
            Some("SUCCEEDED") => QueryStatus::new(QueryState::Succeeded),
            Some("FAILED") => QueryStatus::failed(reported.error_message.unwrap_or_else(|| "query failed".to_string())),
            Some("CANCELLED") => QueryStatus::failed(reported.error_message.unwrap_or_else(|| "query was cancelled".to_string())),
            Some("QUEUED") | Some("RUNNING") => QueryStatus::new(QueryState::Running),
            _ => QueryStatus::new(QueryState::Unknown),
        }
    }
}

pub struct QueryRunner<S> {
    service: Arc<S>,
    config: RunnerConfig,
    initialized: OnceCell<()>,
    query_id: Option<String>,
    status: QueryStatus,
    /// Set once a terminal status is cached; cleared only by a new `start_query`.
    frozen: bool,
}

impl<S: QueryService> QueryRunner<S> {
    pub fn new(service: Arc<S>, config: RunnerConfig) -> Self {
        Self {
            service,
            config,
            initialized: OnceCell::new(),
            query_id: None,
            status: QueryStatus::new(QueryState::NotStarted),
            frozen: false,
        }
    }

    pub fn config(&self) -> &RunnerConfig { &self.config }

    pub fn query_id(&self) -> Option<&str> { self.query_id.as_deref() }

    /// Last known status without contacting the service.
    pub fn cached_status(&self) -> &QueryStatus { &self.status }

    pub fn sql(&self) -> String { compose_aggregation_query(&self.config) }

    /// Open the service session. Repeated calls share the first successful one;
    /// a failed attempt is returned unchanged and may be retried by the caller.
    pub async fn init(&self) -> AppResult<()> {
        self.initialized.get_or_try_init(|| self.service.init()).await?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool { self.initialized.initialized() }

    /// Compose and submit the aggregation. Service errors are returned unchanged.
    pub async fn start_query(&mut self) -> AppResult<String> {
        if !self.is_initialized() {
            return Err(AppError::invalid_operation(
                "runner_not_initialized",
                "init() must complete before start_query()",
            ));
        }
        let acc = self.config.accumulator();
        if self.config.is_z_date && matches!(acc, AccumulatorType::Sum | AccumulatorType::Avg) {
            warn!(target: "glyph::runner", "{} over date column '{}' is likely to be rejected", acc.sql_function(), self.config.z_column);
        }
        let sql = self.sql();
        debug!(target: "glyph::runner", "submitting aggregation:\n{}", sql);
        let id = self.service.start_query(&sql).await?;
        info!(target: "glyph::runner", "aggregation over {}.{} started as execution {}", self.config.database_name, self.config.view_name, id);
        self.query_id = Some(id.clone());
        self.status = QueryStatus::new(QueryState::Running);
        self.frozen = false;
        Ok(id)
    }

    /// Current status of the started execution. Terminal results are served from
    /// memory; execution failures are reported as FAILED, never as `Err`.
    pub async fn get_query_status(&mut self) -> AppResult<QueryStatus> {
        let id = match &self.query_id {
            Some(id) => id.clone(),
            None => {
                return Err(AppError::invalid_operation(
                    "status_before_start",
                    "get_query_status() called before start_query()",
                ))
            }
        };
        if self.frozen {
            return Ok(self.status.clone());
        }
        let reported = self.service.get_query_status(&id).await?;
        let status = QueryStatus::from_service(reported);
        if status.status.is_terminal() {
            self.frozen = true;
            match &status.error {
                Some(e) => warn!(target: "glyph::runner", "execution {} failed: {}", id, e),
                None => info!(target: "glyph::runner", "execution {} succeeded", id),
            }
        } else if status.status == QueryState::Unknown {
            debug!(target: "glyph::runner", "execution {} reported an unrecognized state", id);
        }
        self.status = status.clone();
        Ok(status)
    }

    /// Glyph buckets of a SUCCEEDED execution.
    pub async fn results(&self) -> AppResult<Vec<GlyphBucket>> {
        let id = match (&self.query_id, self.status.status) {
            (Some(id), QueryState::Succeeded) => id.clone(),
            (_, state) => {
                return Err(AppError::invalid_operation(
                    "results_not_ready",
                    format!("results requested while execution is {:?}", state),
                ))
            }
        };
        let rows = self.service.get_query_results(&id).await?;
        decode_buckets(&rows)
    }
}

/// Poll `runner` every `interval` until it reaches a terminal status.
/// Exceeding `timeout` yields `Service { code: "poll_timeout" }`; the execution
/// itself keeps running on the service.
pub async fn poll_until_terminal<S: QueryService>(
    runner: &mut QueryRunner<S>,
    interval: Duration,
    timeout: Option<Duration>,
) -> AppResult<QueryStatus> {
    let started = Instant::now();
    loop {
        let status = runner.get_query_status().await?;
        if status.status.is_terminal() {
            return Ok(status);
        }
        if let Some(limit) = timeout {
            if started.elapsed() >= limit {
                return Err(AppError::service(
                    "poll_timeout",
                    format!(
                        "execution {} still {:?} after {} ms",
                        runner.query_id().unwrap_or("?"),
                        status.status,
                        limit.as_millis()
                    ),
                ));
            }
        }
        tokio::time::sleep(interval).await;
    }
}
