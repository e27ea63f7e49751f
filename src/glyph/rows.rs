//! Row retrieval and lookup reconciliation.
//!
//! A glyph selection arrives as a compact row-id list (see `rowids`). Direct ids
//! become an `IN (...)` predicate on the row id column. Every lookup id is resolved
//! to the (X, Y) bucket of its row with one secondary query, and each bucket becomes
//! an `OR (<x> = v AND <y> = v)` clause, so the final filter matches every row the
//! selected glyphs stand for. Row data is then fetched page by page, or whole when
//! exporting.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{AppError, AppResult};
use crate::ident::{equality_predicate, id_list, ROW_ID_COLUMN};
use crate::project::{Axis, ProjectSource, ViewReference};
use crate::service::{QueryService, Row};

use super::bucket::{column, row_id};
use super::field::{resolve_axis_field, ResolvedField};
use super::rowids::decode_row_ids;

/// `SELECT glyphx_id__ as rowid, <x> as groupedXColumn, <y> as groupedYColumn ... WHERE glyphx_id__ IN (...)`
pub fn lookup_query(view: &ViewReference, x: &ResolvedField, y: &ResolvedField, lookup_ids: &[i64]) -> String {
    format!(
        "SELECT {rid} as rowid, {x} as {xa}, {y} as {ya} FROM {view} WHERE {rid} IN ({ids})",
        rid = ROW_ID_COLUMN,
        x = x.select_expr,
        xa = x.alias(),
        y = y.select_expr,
        ya = y.alias(),
        view = view.qualified(),
        ids = id_list(lookup_ids),
    )
}

/// Row-level query over `filter`, ordered by row id, paged unless exporting.
pub fn row_page_query(view: &ViewReference, filter: &str, page_size: usize, page_number: usize, is_export: bool) -> AppResult<String> {
    let mut sql = format!("SELECT * FROM {} WHERE {} ORDER BY {}", view.qualified(), filter, ROW_ID_COLUMN);
    if !is_export {
        let offset = page_number.checked_mul(page_size).ok_or_else(|| {
            AppError::invalid_argument("page_out_of_range", format!("page {} of size {} overflows", page_number, page_size))
        })?;
        sql.push_str(&format!(" OFFSET {} LIMIT {}", offset, page_size));
    }
    Ok(sql)
}

pub struct RowRetriever<S, P> {
    service: Arc<S>,
    projects: Arc<P>,
    lookup_max_rows: usize,
}

impl<S: QueryService, P: ProjectSource> RowRetriever<S, P> {
    pub fn new(service: Arc<S>, projects: Arc<P>) -> Self {
        Self::with_config(service, projects, &EngineConfig::default())
    }

    pub fn with_config(service: Arc<S>, projects: Arc<P>, cfg: &EngineConfig) -> Self {
        Self { service, projects, lookup_max_rows: cfg.lookup_max_rows }
    }

    /// Expand an encoded glyph selection into a filter over the project's view.
    pub async fn build_row_filter(&self, project_id: &str, row_ids: &[i64]) -> AppResult<String> {
        let decoded = decode_row_ids(row_ids)?;
        if decoded.is_empty() {
            return Err(AppError::invalid_argument("empty_row_selection", "no row ids selected"));
        }
        let mut parts: Vec<String> = Vec::new();
        if !decoded.good_ids.is_empty() {
            parts.push(format!("{} IN ({})", ROW_ID_COLUMN, id_list(&decoded.good_ids)));
        }
        if !decoded.lookup_ids.is_empty() {
            parts.extend(self.resolve_lookup_clauses(project_id, &decoded.lookup_ids).await?);
        }
        debug!(
            target: "glyph::rows",
            "row filter for project '{}': {} direct ids, {} lookups",
            project_id,
            decoded.good_ids.len(),
            decoded.lookup_ids.len()
        );
        Ok(parts.join(" OR "))
    }

    async fn resolve_lookup_clauses(&self, project_id: &str, lookup_ids: &[i64]) -> AppResult<Vec<String>> {
        let project = self.projects.get_project(project_id).await?;
        let x = resolve_axis_field(Axis::X, project.property(Axis::X)?);
        let y = resolve_axis_field(Axis::Y, project.property(Axis::Y)?);
        let sql = lookup_query(&project.view, &x, &y, lookup_ids);
        // one row per lookup id, so the cap never truncates a complete answer
        let cap = self.lookup_max_rows.max(lookup_ids.len());
        let rows = self
            .service
            .run_query(&sql, Some(cap), true)
            .await
            .map_err(|e| {
                AppError::service(
                    "lookup_query_failed",
                    format!("resolving lookup ids [{}] in {} failed: {}", id_list(lookup_ids), project.view.qualified(), e),
                )
            })?;

        if rows.len() != lookup_ids.len() {
            return Err(lookup_mismatch(&project.view, lookup_ids, &rows));
        }

        let mut seen = HashSet::new();
        let mut clauses = Vec::with_capacity(rows.len());
        for row in &rows {
            let xv = column(row, &x.alias()).cloned().unwrap_or_default();
            let yv = column(row, &y.alias()).cloned().unwrap_or_default();
            let clause = format!("({} AND {})", equality_predicate(&x.select_expr, &xv), equality_predicate(&y.select_expr, &yv));
            // several lookup ids can share one bucket
            if seen.insert(clause.clone()) {
                clauses.push(clause);
            }
        }
        Ok(clauses)
    }

    /// Row data matching `filter`. Pages are `page_size` rows starting at
    /// `page_number * page_size`; export mode returns every row.
    pub async fn fetch_rows(
        &self,
        project_id: &str,
        filter: &str,
        page_size: usize,
        page_number: usize,
        is_export: bool,
    ) -> AppResult<Vec<Row>> {
        let filter = filter.trim();
        if filter.is_empty() {
            return Err(AppError::invalid_argument("empty_row_filter", "row filter is empty"));
        }
        if !is_export && page_size == 0 {
            return Err(AppError::invalid_argument("invalid_page_size", "page size must be at least 1"));
        }
        let project = self.projects.get_project(project_id).await?;
        let sql = row_page_query(&project.view, filter, page_size, page_number, is_export)?;
        let max_rows = if is_export { None } else { Some(page_size) };
        let rows = self.service.run_query(&sql, max_rows, true).await.map_err(|e| {
            AppError::service(
                "row_fetch_failed",
                format!("fetching rows from {} where {} failed: {}", project.view.qualified(), filter, e),
            )
        })?;
        if rows.is_empty() && !is_export && page_number > 0 {
            return Err(AppError::invalid_argument(
                "page_out_of_range",
                format!("page {} (size {}) is beyond the available rows", page_number, page_size),
            ));
        }
        info!(target: "glyph::rows", "fetched {} rows from {} (page {}, export {})", rows.len(), project.view.qualified(), page_number, is_export);
        Ok(rows)
    }

    /// `build_row_filter` followed by `fetch_rows`.
    pub async fn fetch_glyph_rows(
        &self,
        project_id: &str,
        row_ids: &[i64],
        page_size: usize,
        page_number: usize,
        is_export: bool,
    ) -> AppResult<Vec<Row>> {
        let filter = self.build_row_filter(project_id, row_ids).await?;
        self.fetch_rows(project_id, &filter, page_size, page_number, is_export).await
    }
}

fn lookup_mismatch(view: &ViewReference, requested: &[i64], rows: &[Row]) -> AppError {
    let resolved: HashSet<i64> = rows
        .iter()
        .filter_map(|r| column(r, "rowid").and_then(row_id))
        .collect();
    let missing: Vec<i64> = requested.iter().copied().filter(|id| !resolved.contains(id)).collect();
    let detail = if missing.is_empty() {
        format!("lookup ids [{}] matched {} rows", id_list(requested), rows.len())
    } else {
        format!("lookup ids [{}] not found", id_list(&missing))
    };
    AppError::not_found(
        "lookup_rows_not_found",
        format!("{} in {} (requested {}, resolved {})", detail, view.qualified(), requested.len(), rows.len()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{AxisProperty, DateGrouping, FieldType, MemoryProjectSource, Project};
    use crate::glyph::rowids::SENTINEL;
    use crate::service::MemoryQueryService;
    use serde_json::json;

    fn project() -> Project {
        Project::new("p1", ViewReference::new("db", "v"))
            .with_property(Axis::X, AxisProperty::new("region", FieldType::String))
            .with_property(Axis::Y, AxisProperty::new("order_date", FieldType::Date).with_date_grouping(DateGrouping::MonthOfYear))
            .with_property(Axis::Z, AxisProperty::new("revenue", FieldType::Number))
    }

    fn row(v: serde_json::Value) -> Row { v.as_object().unwrap().clone() }

    fn setup() -> (Arc<MemoryQueryService>, RowRetriever<MemoryQueryService, MemoryProjectSource>) {
        let svc = Arc::new(MemoryQueryService::new());
        let projects = Arc::new(MemoryProjectSource::new());
        projects.insert(project());
        let r = RowRetriever::new(svc.clone(), projects);
        (svc, r)
    }

    #[tokio::test]
    async fn direct_ids_make_a_pure_in_predicate() {
        let (svc, r) = setup();
        let f = r.build_row_filter("p1", &[1, 2, 3]).await.unwrap();
        assert_eq!(f, "glyphx_id__ IN (1,2,3)");
        assert!(!f.contains(" OR "));
        assert_eq!(svc.run_calls(), 0);
    }

    #[tokio::test]
    async fn lookups_expand_to_bucket_clauses() {
        let (svc, r) = setup();
        svc.on_run(|_, _| Ok(vec![json!({"rowid": 5, "groupedxcolumn": "west", "groupedycolumn": 3})]
            .into_iter().map(|v| v.as_object().unwrap().clone()).collect()));
        let f = r.build_row_filter("p1", &[1, -9999, 5, 2]).await.unwrap();
        assert_eq!(f, "glyphx_id__ IN (1,2) OR (\"region\" = 'west' AND MONTH(\"order_date\") = 3)");
        let sql = svc.run_sql();
        assert_eq!(sql.len(), 1);
        assert_eq!(
            sql[0],
            "SELECT glyphx_id__ as rowid, \"region\" as groupedXColumn, MONTH(\"order_date\") as groupedYColumn FROM \"db\".\"v\" WHERE glyphx_id__ IN (5)"
        );
    }

    #[tokio::test]
    async fn only_lookups_omit_the_in_predicate() {
        let (svc, r) = setup();
        svc.on_run(|_, _| Ok(vec![
            json!({"rowid": 5, "groupedXColumn": "west", "groupedYColumn": 3}),
            json!({"rowid": 8, "groupedXColumn": "west", "groupedYColumn": 3}),
            json!({"rowid": 9, "groupedXColumn": null, "groupedYColumn": 4}),
        ].into_iter().map(|v| v.as_object().unwrap().clone()).collect()));
        let f = r.build_row_filter("p1", &[-9999, 5, -9999, 8, -9999, 9]).await.unwrap();
        assert_eq!(
            f,
            "(\"region\" = 'west' AND MONTH(\"order_date\") = 3) OR (\"region\" IS NULL AND MONTH(\"order_date\") = 4)"
        );
    }

    #[tokio::test]
    async fn short_lookup_result_is_not_found_naming_ids() {
        let (svc, r) = setup();
        svc.on_run(|_, _| Ok(vec![json!({"rowid": 5, "groupedXColumn": "west", "groupedYColumn": 3})]
            .into_iter().map(|v| v.as_object().unwrap().clone()).collect()));
        let err = r.build_row_filter("p1", &[-9999, 5, -9999, 7]).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.code_str(), "lookup_rows_not_found");
        assert!(err.message().contains("[7]"), "{}", err);
    }

    #[tokio::test]
    async fn lookups_beyond_the_row_cap_all_resolve() {
        let (svc, r) = setup();
        svc.on_run(|sql, _| {
            let ids = sql.rsplit_once("IN (").map(|(_, t)| t.trim_end_matches(')')).unwrap_or_default();
            Ok(ids
                .split(',')
                .map(|id| row(json!({"rowid": id.parse::<i64>().unwrap(), "groupedXColumn": "west", "groupedYColumn": 3})))
                .collect())
        });
        let n = EngineConfig::default().lookup_max_rows as i64 + 1;
        let selection: Vec<i64> = (1..=n).flat_map(|id| [SENTINEL, id]).collect();
        let f = r.build_row_filter("p1", &selection).await.unwrap();
        assert_eq!(f, "(\"region\" = 'west' AND MONTH(\"order_date\") = 3)");
        assert_eq!(svc.run_calls(), 1);
    }

    #[tokio::test]
    async fn mismatch_names_ids_beyond_float_precision() {
        let (svc, r) = setup();
        let big = (1i64 << 53) + 1;
        svc.on_run(move |_, _| Ok(vec![row(json!({"rowid": big, "groupedXColumn": "west", "groupedYColumn": 3}))]));
        let err = r.build_row_filter("p1", &[SENTINEL, big, SENTINEL, big - 1]).await.unwrap_err();
        assert_eq!(err.code_str(), "lookup_rows_not_found");
        assert!(err.message().contains(&format!("[{}]", big - 1)), "{}", err);
        assert!(!err.message().contains(&format!("[{}]", big)), "{}", err);
    }

    #[tokio::test]
    async fn missing_project_is_distinct_not_found() {
        let (_svc, r) = setup();
        let err = r.build_row_filter("ghost", &[-9999, 5]).await.unwrap_err();
        assert_eq!(err.code_str(), "project_not_found");
        // no lookup needed, no project needed
        assert!(r.build_row_filter("ghost", &[5]).await.is_ok());
    }

    #[tokio::test]
    async fn malformed_selections_are_invalid_arguments() {
        let (_svc, r) = setup();
        assert_eq!(r.build_row_filter("p1", &[]).await.unwrap_err().code_str(), "empty_row_selection");
        assert_eq!(r.build_row_filter("p1", &[1, -9999]).await.unwrap_err().code_str(), "trailing_sentinel");
    }

    #[tokio::test]
    async fn lookup_failures_are_wrapped_service_errors() {
        let (svc, r) = setup();
        svc.on_run(|_, _| Err(AppError::service("service_http_error", "HTTP 500")));
        let err = r.build_row_filter("p1", &[-9999, 5]).await.unwrap_err();
        assert_eq!(err.code_str(), "lookup_query_failed");
        assert!(err.message().contains("\"db\".\"v\""));
        assert!(err.message().contains("[5]"));
    }

    #[test]
    fn page_query_shapes() {
        let view = ViewReference::new("db", "v");
        assert_eq!(
            row_page_query(&view, "glyphx_id__ IN (1)", 50, 2, false).unwrap(),
            "SELECT * FROM \"db\".\"v\" WHERE glyphx_id__ IN (1) ORDER BY glyphx_id__ OFFSET 100 LIMIT 50"
        );
        assert_eq!(
            row_page_query(&view, "glyphx_id__ IN (1)", 50, 2, true).unwrap(),
            "SELECT * FROM \"db\".\"v\" WHERE glyphx_id__ IN (1) ORDER BY glyphx_id__"
        );
        assert!(row_page_query(&view, "x", usize::MAX, 2, false).is_err());
    }

    #[tokio::test]
    async fn fetch_rows_pages_and_exports() {
        let (svc, r) = setup();
        svc.on_run(|_, _| Ok(vec![row(json!({"glyphx_id__": 1, "region": "west"}))]));
        let rows = r.fetch_rows("p1", "glyphx_id__ IN (1)", 50, 2, false).await.unwrap();
        assert_eq!(rows.len(), 1);
        r.fetch_rows("p1", "glyphx_id__ IN (1)", 50, 2, true).await.unwrap();
        let sql = svc.run_sql();
        assert!(sql[0].ends_with("OFFSET 100 LIMIT 50"));
        assert!(!sql[1].contains("OFFSET") && !sql[1].contains("LIMIT"));
    }

    #[tokio::test]
    async fn fetch_rows_argument_checks() {
        let (_svc, r) = setup();
        assert_eq!(r.fetch_rows("p1", "x = 1", 0, 0, false).await.unwrap_err().code_str(), "invalid_page_size");
        assert_eq!(r.fetch_rows("p1", "  ", 10, 0, false).await.unwrap_err().code_str(), "empty_row_filter");
        // empty service answer beyond the first page
        assert_eq!(r.fetch_rows("p1", "x = 1", 10, 3, false).await.unwrap_err().code_str(), "page_out_of_range");
        assert!(r.fetch_rows("p1", "x = 1", 10, 0, false).await.unwrap().is_empty());
        assert_eq!(r.fetch_rows("ghost", "x = 1", 10, 0, false).await.unwrap_err().code_str(), "project_not_found");
    }

    #[tokio::test]
    async fn fetch_failures_carry_table_context() {
        let (svc, r) = setup();
        svc.on_run(|_, _| Err(AppError::io("transport_error", "reset")));
        let err = r.fetch_rows("p1", "glyphx_id__ IN (4,5)", 10, 0, false).await.unwrap_err();
        assert_eq!(err.code_str(), "row_fetch_failed");
        assert!(err.message().contains("\"db\".\"v\""));
        assert!(err.message().contains("IN (4,5)"));
    }
}
