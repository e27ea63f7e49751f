//! HTTP client for a columnar query service gateway.
//!
//! Endpoints (JSON bodies):
//! - `POST /session` → `{"session": "<token>"}`
//! - `POST /queries {"sql"}` → `{"execution_id"}`
//! - `GET /queries/{id}` → `{"state", "error"}`
//! - `GET /queries/{id}/results` → `{"rows": [...]}`
//! - `POST /run {"sql", "max_rows", "sync"}` → `{"rows": [...]}`
//!
//! The session token obtained by `init` is sent as `x-session-token` on every
//! later request.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{AppError, AppResult};
use crate::service::{QueryService, Row, ServiceStatus};

const SESSION_HEADER: &str = "x-session-token";

#[derive(Deserialize)]
struct SessionResponse { session: String }

#[derive(Deserialize)]
struct StartResponse { execution_id: String }

#[derive(Deserialize)]
struct RowsResponse {
    #[serde(default)]
    rows: Vec<Row>,
}

pub struct HttpQueryService {
    base: Url,
    client: reqwest::Client,
    session: OnceCell<String>,
}

impl HttpQueryService {
    pub fn new(base: &str, timeout: Duration) -> AppResult<Self> {
        let base = Url::parse(base)
            .map_err(|e| AppError::invalid_argument("invalid_service_url", format!("{}: {}", base, e)))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base, client, session: OnceCell::new() })
    }

    pub fn from_config(cfg: &EngineConfig) -> AppResult<Self> {
        Self::new(&cfg.service_url, cfg.request_timeout())
    }

    pub fn base_url(&self) -> &Url { &self.base }

    fn url(&self, path: &str) -> AppResult<Url> {
        self.base
            .join(path)
            .map_err(|e| AppError::internal("invalid_service_path", format!("{}: {}", path, e)))
    }

    fn headers(&self) -> AppResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(token) = self.session.get() {
            let v = HeaderValue::from_str(token)
                .map_err(|e| AppError::internal("invalid_session_token", e.to_string()))?;
            headers.insert(SESSION_HEADER, v);
        }
        Ok(headers)
    }

    async fn read_json<T: DeserializeOwned>(what: &str, resp: reqwest::Response) -> AppResult<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::service(
                "service_http_error",
                format!("{} failed: HTTP {}: {}", what, status, body.trim()),
            ));
        }
        let text = resp.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| AppError::service("service_bad_response", format!("{}: {}: {}", what, e, text)))
    }

    fn query_path(execution_id: &str, suffix: &str) -> String {
        format!("/queries/{}{}", urlencoding::encode(execution_id), suffix)
    }
}

impl QueryService for HttpQueryService {
    async fn init(&self) -> AppResult<()> {
        self.session
            .get_or_try_init(|| async {
                let resp = self.client.post(self.url("/session")?).json(&serde_json::json!({})).send().await?;
                let s: SessionResponse = Self::read_json("open session", resp).await?;
                info!(target: "glyph::service", "query service session opened at {}", self.base);
                Ok::<String, AppError>(s.session)
            })
            .await
            .map(|_| ())
    }

    async fn start_query(&self, sql: &str) -> AppResult<String> {
        let resp = self
            .client
            .post(self.url("/queries")?)
            .headers(self.headers()?)
            .json(&serde_json::json!({ "sql": sql }))
            .send()
            .await?;
        let s: StartResponse = Self::read_json("start query", resp).await?;
        debug!(target: "glyph::service", "started execution {}", s.execution_id);
        Ok(s.execution_id)
    }

    async fn get_query_status(&self, execution_id: &str) -> AppResult<ServiceStatus> {
        let resp = self
            .client
            .get(self.url(&Self::query_path(execution_id, ""))?)
            .headers(self.headers()?)
            .send()
            .await?;
        Self::read_json("query status", resp).await
    }

    async fn get_query_results(&self, execution_id: &str) -> AppResult<Vec<Row>> {
        let resp = self
            .client
            .get(self.url(&Self::query_path(execution_id, "/results"))?)
            .headers(self.headers()?)
            .send()
            .await?;
        let r: RowsResponse = Self::read_json("query results", resp).await?;
        Ok(r.rows)
    }

    async fn run_query(&self, sql: &str, max_rows: Option<usize>, sync: bool) -> AppResult<Vec<Row>> {
        let resp = self
            .client
            .post(self.url("/run")?)
            .headers(self.headers()?)
            .json(&serde_json::json!({ "sql": sql, "max_rows": max_rows, "sync": sync }))
            .send()
            .await?;
        let r: RowsResponse = Self::read_json("run query", resp).await?;
        Ok(r.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_base_url() {
        let err = HttpQueryService::new("not a url", Duration::from_secs(1)).err().unwrap();
        assert_eq!(err.code_str(), "invalid_service_url");
    }

    #[test]
    fn execution_ids_are_path_escaped() {
        assert_eq!(HttpQueryService::query_path("a/b c", "/results"), "/queries/a%2Fb%20c/results");
    }

    #[test]
    fn status_accepts_error_alias() {
        let s: ServiceStatus = serde_json::from_str(r#"{"state":"FAILED","error":"SYNTAX_ERROR"}"#).unwrap();
        assert_eq!(s, ServiceStatus::failed("SYNTAX_ERROR"));
        let empty: ServiceStatus = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.state, None);
    }
}
