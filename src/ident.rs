//! Identifier quoting and literal rendering for generated SQL
//! ----------------------------------------------------------
//! Single source of truth for how column names, view references and values are
//! spelled in the Presto-family SQL the engine emits.

use serde_json::Value;

/// Fixed system column carrying the stable row identifier of every ingested row.
pub const ROW_ID_COLUMN: &str = "glyphx_id__";

/// Strip one level of surrounding double quotes from a user-supplied column key.
/// Column keys are case-sensitive in the views, so no case folding happens here.
pub fn normalize_identifier(ident: &str) -> &str {
    let trimmed = ident.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        &trimmed[1..trimmed.len() - 1]
    } else {
        trimmed
    }
}

/// Quote an identifier for Presto: `"name"`, doubling any embedded quote.
pub fn quote_ident(ident: &str) -> String {
    let bare = normalize_identifier(ident);
    format!("\"{}\"", bare.replace('"', "\"\""))
}

/// `"<database>"."<view>"`
pub fn qualify_view(database: &str, view: &str) -> String {
    format!("{}.{}", quote_ident(database), quote_ident(view))
}

/// Single-quoted string literal with `''` escaping.
pub fn string_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Render a JSON value returned by the query service as a SQL literal.
/// Returns `None` for null, which callers must express as `IS NULL`.
pub fn render_literal(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(if *b { "TRUE".to_string() } else { "FALSE".to_string() }),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(string_literal(s)),
        // Arrays and objects never come back for bucket columns; compare on their JSON text
        other => Some(string_literal(&other.to_string())),
    }
}

/// `<expr> = <literal>` or `<expr> IS NULL`.
pub fn equality_predicate(expr: &str, value: &Value) -> String {
    match render_literal(value) {
        Some(lit) => format!("{} = {}", expr, lit),
        None => format!("{} IS NULL", expr),
    }
}

/// Comma-separated integer list for `IN (...)`.
pub fn id_list(ids: &[i64]) -> String {
    ids.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(",")
}
