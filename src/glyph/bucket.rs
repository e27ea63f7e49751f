//! Decoding aggregated result rows into glyph buckets.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::service::Row;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlyphBucket {
    pub row_ids: Vec<i64>,
    /// `groupedXColumn` as returned by the service.
    pub x: Value,
    pub y: Value,
    pub z_value: f64,
}

/// Parse the `|`-delimited `rowids` column.
pub fn parse_row_id_list(text: &str) -> AppResult<Vec<i64>> {
    text.split('|')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| {
            t.parse::<i64>()
                .map_err(|_| AppError::service("malformed_rowids", format!("row id '{}' in '{}' is not an integer", t, text)))
        })
        .collect()
}

pub(crate) fn number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        // services that return every cell as text
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Exact integer row id from a number or numeric string.
pub(crate) fn row_id(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Column value by name, falling back to a case-insensitive match.
pub(crate) fn column<'a>(row: &'a Row, key: &str) -> Option<&'a Value> {
    row.get(key).or_else(|| row.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)).map(|(_, v)| v))
}

impl GlyphBucket {
    /// Column names are matched case-insensitively since Presto lowercases unquoted aliases.
    pub fn from_row(row: &Row) -> AppResult<Self> {
        let row_ids = match column(row, "rowids") {
            Some(Value::String(s)) => parse_row_id_list(s)?,
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| row_id(v).ok_or_else(|| AppError::service("malformed_rowids", format!("row id {} is not an integer", v))))
                .collect::<AppResult<Vec<_>>>()?,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => return Err(AppError::service("malformed_rowids", format!("unexpected rowids value {}", other))),
        };
        let x = column(row, "groupedXColumn").cloned().unwrap_or(Value::Null);
        let y = column(row, "groupedYColumn").cloned().unwrap_or(Value::Null);
        // aggregates over zero non-null values come back as null
        let z_value = column(row, "zValue").and_then(number).unwrap_or(0.0);
        Ok(Self { row_ids, x, y, z_value })
    }

    pub fn row_count(&self) -> usize { self.row_ids.len() }
}

pub fn decode_buckets(rows: &[Row]) -> AppResult<Vec<GlyphBucket>> {
    rows.iter().map(GlyphBucket::from_row).collect()
}
