//! Keyed runner registry.
//! Runners are keyed by a fingerprint of the SQL they compose, so identical
//! aggregations requested concurrently share one execution. A fingerprint has at
//! most one active execution: a RUNNING/UNKNOWN or SUCCEEDED execution is reused,
//! a FAILED one is replaced by a fresh submission.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{AppError, AppResult};
use crate::service::QueryService;

use super::bucket::GlyphBucket;
use super::compose::{compose_aggregation_query, RunnerConfig};
use super::runner::{QueryRunner, QueryState, QueryStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub fingerprint: String,
    pub execution_id: String,
    /// True when an existing execution was handed back instead of starting one.
    pub reused: bool,
    pub started_at: DateTime<Utc>,
}

struct Slot<S> {
    runner: QueryRunner<S>,
    started_at: Option<DateTime<Utc>>,
}

/// Stable fingerprint of the aggregation a config composes, as fixed-width hex.
pub fn fingerprint(cfg: &RunnerConfig) -> String {
    format!("{:016x}", xxh3_64(compose_aggregation_query(cfg).as_bytes()))
}

/// Slots live until the caller evicts them with `remove` or `remove_failed`; a
/// FAILED execution is re-submitted in place, so retries never add slots.
pub struct RunnerRegistry<S> {
    service: Arc<S>,
    slots: Mutex<HashMap<String, Arc<AsyncMutex<Slot<S>>>>>,
}

impl<S: QueryService> RunnerRegistry<S> {
    pub fn new(service: Arc<S>) -> Self {
        Self { service, slots: Mutex::new(HashMap::new()) }
    }

    fn slot(&self, fp: &str) -> AppResult<Arc<AsyncMutex<Slot<S>>>> {
        self.slots
            .lock()
            .get(fp)
            .cloned()
            .ok_or_else(|| AppError::not_found("submission_not_found", format!("no aggregation with fingerprint {}", fp)))
    }

    pub async fn submit(&self, cfg: RunnerConfig) -> AppResult<Submission> {
        let fp = fingerprint(&cfg);
        let slot = {
            let mut slots = self.slots.lock();
            slots
                .entry(fp.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(Slot { runner: QueryRunner::new(self.service.clone(), cfg), started_at: None })))
                .clone()
        };
        let mut slot = slot.lock().await;
        if let (Some(id), Some(started_at)) = (slot.runner.query_id(), slot.started_at) {
            if slot.runner.cached_status().status != QueryState::Failed {
                return Ok(Submission { fingerprint: fp, execution_id: id.to_string(), reused: true, started_at });
            }
        }
        slot.runner.init().await?;
        let execution_id = slot.runner.start_query().await?;
        let started_at = Utc::now();
        slot.started_at = Some(started_at);
        info!(target: "glyph::registry", "fingerprint {} -> execution {}", fp, execution_id);
        Ok(Submission { fingerprint: fp, execution_id, reused: false, started_at })
    }

    pub async fn status(&self, fp: &str) -> AppResult<QueryStatus> {
        let slot = self.slot(fp)?;
        let mut slot = slot.lock().await;
        slot.runner.get_query_status().await
    }

    pub async fn results(&self, fp: &str) -> AppResult<Vec<GlyphBucket>> {
        let slot = self.slot(fp)?;
        let slot = slot.lock().await;
        slot.runner.results().await
    }

    /// Forget a fingerprint. The execution itself is owned by the service.
    pub fn remove(&self, fp: &str) -> bool {
        self.slots.lock().remove(fp).is_some()
    }

    /// Drop every fingerprint whose execution ended FAILED. Slots busy with a
    /// submit or poll are left alone. Returns how many were removed.
    pub fn remove_failed(&self) -> usize {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, slot| {
            let keep = match slot.try_lock() {
                Ok(s) => s.runner.cached_status().status != QueryState::Failed,
                Err(_) => true,
            };
            keep
        });
        let removed = before - slots.len();
        if removed > 0 {
            info!(target: "glyph::registry", "evicted {} failed aggregations", removed);
        }
        removed
    }

    pub fn len(&self) -> usize { self.slots.lock().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}
