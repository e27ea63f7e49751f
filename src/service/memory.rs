//! Scripted in-process query service.
//! Status responses are served from a queue (falling back to a fixed default once
//! drained), every submitted statement is recorded, and each trait method keeps a
//! call counter so memoization can be asserted on.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::{AppError, AppResult};
use crate::service::{QueryService, Row, ServiceStatus};

type RunHandler = Box<dyn Fn(&str, Option<usize>) -> AppResult<Vec<Row>> + Send + Sync>;

#[derive(Default)]
struct Counters {
    init: AtomicUsize,
    start: AtomicUsize,
    status: AtomicUsize,
    results: AtomicUsize,
    run: AtomicUsize,
}

struct Script {
    statuses: VecDeque<ServiceStatus>,
    default_status: ServiceStatus,
    results: Vec<Row>,
    run_handler: Option<RunHandler>,
    init_error: Option<AppError>,
    start_error: Option<AppError>,
    submitted: Vec<String>,
    run_sql: Vec<String>,
}

pub struct MemoryQueryService {
    script: Mutex<Script>,
    calls: Counters,
}

impl Default for MemoryQueryService {
    fn default() -> Self { Self::new() }
}

impl MemoryQueryService {
    /// Every execution reports SUCCEEDED with no rows until scripted otherwise.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                statuses: VecDeque::new(),
                default_status: ServiceStatus::new("SUCCEEDED"),
                results: Vec::new(),
                run_handler: None,
                init_error: None,
                start_error: None,
                submitted: Vec::new(),
                run_sql: Vec::new(),
            }),
            calls: Counters::default(),
        }
    }

    /// Queue status responses served in order by `get_query_status`.
    pub fn push_statuses<I: IntoIterator<Item = ServiceStatus>>(&self, statuses: I) {
        self.script.lock().statuses.extend(statuses);
    }

    pub fn set_default_status(&self, status: ServiceStatus) {
        self.script.lock().default_status = status;
    }

    pub fn set_results(&self, rows: Vec<Row>) {
        self.script.lock().results = rows;
    }

    /// Answer `run_query` calls with `handler(sql, max_rows)`.
    pub fn on_run<F>(&self, handler: F)
    where
        F: Fn(&str, Option<usize>) -> AppResult<Vec<Row>> + Send + Sync + 'static,
    {
        self.script.lock().run_handler = Some(Box::new(handler));
    }

    pub fn fail_init(&self, err: AppError) { self.script.lock().init_error = Some(err); }
    pub fn fail_start(&self, err: AppError) { self.script.lock().start_error = Some(err); }

    pub fn submitted_sql(&self) -> Vec<String> { self.script.lock().submitted.clone() }
    pub fn run_sql(&self) -> Vec<String> { self.script.lock().run_sql.clone() }

    pub fn init_calls(&self) -> usize { self.calls.init.load(Ordering::SeqCst) }
    pub fn start_calls(&self) -> usize { self.calls.start.load(Ordering::SeqCst) }
    pub fn status_calls(&self) -> usize { self.calls.status.load(Ordering::SeqCst) }
    pub fn results_calls(&self) -> usize { self.calls.results.load(Ordering::SeqCst) }
    pub fn run_calls(&self) -> usize { self.calls.run.load(Ordering::SeqCst) }
}

impl QueryService for MemoryQueryService {
    async fn init(&self) -> AppResult<()> {
        self.calls.init.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().init_error.clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn start_query(&self, sql: &str) -> AppResult<String> {
        let n = self.calls.start.fetch_add(1, Ordering::SeqCst) + 1;
        let mut script = self.script.lock();
        if let Some(e) = script.start_error.clone() {
            return Err(e);
        }
        script.submitted.push(sql.to_string());
        Ok(format!("exec-{}", n))
    }

    async fn get_query_status(&self, _execution_id: &str) -> AppResult<ServiceStatus> {
        self.calls.status.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock();
        let next = script.statuses.pop_front();
        Ok(next.unwrap_or_else(|| script.default_status.clone()))
    }

    async fn get_query_results(&self, _execution_id: &str) -> AppResult<Vec<Row>> {
        self.calls.results.fetch_add(1, Ordering::SeqCst);
        Ok(self.script.lock().results.clone())
    }

    async fn run_query(&self, sql: &str, max_rows: Option<usize>, _sync: bool) -> AppResult<Vec<Row>> {
        self.calls.run.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock();
        script.run_sql.push(sql.to_string());
        let mut rows = match &script.run_handler {
            Some(handler) => handler(sql, max_rows)?,
            None => Vec::new(),
        };
        if let Some(limit) = max_rows {
            rows.truncate(limit);
        }
        Ok(rows)
    }
}
