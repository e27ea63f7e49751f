use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use glyph_engine::glyph::{poll_until_terminal, QueryRunner, QueryState, RowRetriever, RunnerConfig};
use glyph_engine::project::{AccumulatorType, Axis, AxisProperty, DateGrouping, FieldType, MemoryProjectSource, Project, ViewReference};
use glyph_engine::service::{HttpQueryService, QueryService};

// In-process stand-in for the query service gateway.
#[derive(Default)]
struct Stub {
    sessions_opened: usize,
    submitted: Vec<String>,
    status_polls: usize,
    run_requests: Vec<Value>,
    reject_sql_containing: Option<String>,
}

type Shared = Arc<Mutex<Stub>>;

fn authorized(headers: &HeaderMap) -> Result<(), (StatusCode, String)> {
    match headers.get("x-session-token").and_then(|v| v.to_str().ok()) {
        Some("tok-1") => Ok(()),
        _ => Err((StatusCode::UNAUTHORIZED, "missing session".to_string())),
    }
}

async fn open_session(State(st): State<Shared>) -> Json<Value> {
    st.lock().unwrap().sessions_opened += 1;
    Json(json!({"session": "tok-1"}))
}

async fn start_query(State(st): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Result<Json<Value>, (StatusCode, String)> {
    authorized(&headers)?;
    let sql = body["sql"].as_str().unwrap_or_default().to_string();
    let mut st = st.lock().unwrap();
    if let Some(bad) = &st.reject_sql_containing {
        if sql.contains(bad.as_str()) {
            return Err((StatusCode::BAD_REQUEST, format!("SYNTAX_ERROR near {}", bad)));
        }
    }
    st.submitted.push(sql);
    Ok(Json(json!({"execution_id": format!("q-{}", st.submitted.len())})))
}

async fn query_status(State(st): State<Shared>, headers: HeaderMap, Path(id): Path<String>) -> Result<Json<Value>, (StatusCode, String)> {
    authorized(&headers)?;
    let mut st = st.lock().unwrap();
    st.status_polls += 1;
    let body = match id.as_str() {
        "q-1" if st.status_polls < 3 => json!({"state": "RUNNING"}),
        "q-1" => json!({"state": "SUCCEEDED"}),
        _ => json!({"state": "FAILED", "error": "COLUMN_NOT_FOUND: revenue"}),
    };
    Ok(Json(body))
}

async fn query_results(headers: HeaderMap, Path(_id): Path<String>) -> Result<Json<Value>, (StatusCode, String)> {
    authorized(&headers)?;
    Ok(Json(json!({"rows": [
        {"rowids": "1|2|3", "groupedxcolumn": "west", "groupedycolumn": 1, "zvalue": 30.5},
        {"rowids": "4", "groupedxcolumn": "east", "groupedycolumn": 2, "zvalue": 7}
    ]})))
}

async fn run_query(State(st): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Result<Json<Value>, (StatusCode, String)> {
    authorized(&headers)?;
    st.lock().unwrap().run_requests.push(body.clone());
    let sql = body["sql"].as_str().unwrap_or_default();
    if sql.contains(" as rowid") {
        return Ok(Json(json!({"rows": [{"rowid": 5, "groupedxcolumn": "west", "groupedycolumn": 1}]})));
    }
    Ok(Json(json!({"rows": [{"glyphx_id__": 1, "region": "west", "revenue": 10}]})))
}

async fn start_stub() -> (JoinHandle<()>, String, Shared) {
    let state: Shared = Arc::new(Mutex::new(Stub::default()));
    let app = Router::new()
        .route("/session", post(open_session))
        .route("/queries", post(start_query))
        .route("/queries/{id}", get(query_status))
        .route("/queries/{id}/results", get(query_results))
        .route("/run", post(run_query))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.expect("bind 127.0.0.1:0");
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            eprintln!("stub server error: {e:?}");
        }
    });
    (handle, format!("http://{}", addr), state)
}

// Ensure cleanup no matter what
struct Guard(JoinHandle<()>);
impl Drop for Guard { fn drop(&mut self) { self.0.abort(); } }

fn project() -> Project {
    Project::new("orders", ViewReference::new("sales_db", "orders_view"))
        .with_property(Axis::X, AxisProperty::new("region", FieldType::String))
        .with_property(Axis::Y, AxisProperty::new("order_date", FieldType::Date).with_date_grouping(DateGrouping::MonthOfYear))
        .with_property(Axis::Z, AxisProperty::new("revenue", FieldType::Number).with_accumulator(AccumulatorType::Sum))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn aggregation_runs_to_completion_over_http() {
    let (srv, base, state) = start_stub().await;
    let _g = Guard(srv);

    let service = Arc::new(HttpQueryService::new(&base, Duration::from_secs(5)).unwrap());
    let cfg = RunnerConfig::from_project(&project()).unwrap();
    let mut runner = QueryRunner::new(service.clone(), cfg);
    runner.init().await.unwrap();
    runner.init().await.unwrap();
    service.init().await.unwrap();
    assert_eq!(state.lock().unwrap().sessions_opened, 1);

    let id = runner.start_query().await.unwrap();
    assert_eq!(id, "q-1");
    assert_eq!(state.lock().unwrap().submitted, vec![runner.sql()]);

    let status = poll_until_terminal(&mut runner, Duration::from_millis(5), Some(Duration::from_secs(5))).await.unwrap();
    assert_eq!(status.status, QueryState::Succeeded);
    let polls = state.lock().unwrap().status_polls;
    assert_eq!(polls, 3);
    // memoized: no further network polls
    runner.get_query_status().await.unwrap();
    assert_eq!(state.lock().unwrap().status_polls, polls);

    let buckets = runner.results().await.unwrap();
    assert_eq!(buckets.len(), 2);
    assert_eq!(buckets[0].row_ids, vec![1, 2, 3]);
    assert_eq!(buckets[0].x, json!("west"));
    assert_eq!(buckets[1].z_value, 7.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_execution_reports_service_error_text() {
    let (srv, base, _state) = start_stub().await;
    let _g = Guard(srv);

    let service = Arc::new(HttpQueryService::new(&base, Duration::from_secs(5)).unwrap());
    service.init().await.unwrap();
    service.start_query("SELECT 1").await.unwrap();
    let second = service.start_query("SELECT 2").await.unwrap();
    let reported = service.get_query_status(&second).await.unwrap();
    assert_eq!(reported.state.as_deref(), Some("FAILED"));
    assert_eq!(reported.error_message.as_deref(), Some("COLUMN_NOT_FOUND: revenue"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_submission_propagates_unchanged() {
    let (srv, base, state) = start_stub().await;
    let _g = Guard(srv);
    state.lock().unwrap().reject_sql_containing = Some("MONTH(".to_string());

    let service = Arc::new(HttpQueryService::new(&base, Duration::from_secs(5)).unwrap());
    let mut runner = QueryRunner::new(service, RunnerConfig::from_project(&project()).unwrap());
    runner.init().await.unwrap();
    let err = runner.start_query().await.unwrap_err();
    assert_eq!(err.code_str(), "service_http_error");
    assert!(err.message().contains("400"));
    assert!(err.message().contains("SYNTAX_ERROR"));
    let err = runner.get_query_status().await.unwrap_err();
    assert_eq!(err.code_str(), "status_before_start");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn requests_without_session_are_rejected() {
    let (srv, base, _state) = start_stub().await;
    let _g = Guard(srv);

    let service = HttpQueryService::new(&base, Duration::from_secs(5)).unwrap();
    let err = service.start_query("SELECT 1").await.unwrap_err();
    assert_eq!(err.code_str(), "service_http_error");
    assert!(err.message().contains("401"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn glyph_rows_are_fetched_through_lookup_and_page_queries() {
    let (srv, base, state) = start_stub().await;
    let _g = Guard(srv);

    let service = Arc::new(HttpQueryService::new(&base, Duration::from_secs(5)).unwrap());
    service.init().await.unwrap();
    let projects = Arc::new(MemoryProjectSource::new());
    projects.insert(project());
    let retriever = RowRetriever::new(service, projects);

    let rows = retriever.fetch_glyph_rows("orders", &[1, -9999, 5, 2], 50, 2, false).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["region"], json!("west"));

    let requests = state.lock().unwrap().run_requests.clone();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0]["sync"], json!(true));
    assert_eq!(
        requests[1]["sql"],
        json!("SELECT * FROM \"sales_db\".\"orders_view\" WHERE glyphx_id__ IN (1,2) OR (\"region\" = 'west' AND MONTH(\"order_date\") = 1) ORDER BY glyphx_id__ OFFSET 100 LIMIT 50")
    );
    assert_eq!(requests[1]["max_rows"], json!(50));
}
