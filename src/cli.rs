//! Plain-text rendering for the command line tool: glyph buckets and fetched rows
//! as ASCII tables, plus parsing of row-id arguments.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use terminal_size::{terminal_size, Width};

use crate::error::{AppError, AppResult};
use crate::glyph::GlyphBucket;
use crate::service::Row;

const MAX_COL_WIDTH: usize = 80;

static ID_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"[,\s]+").expect("static regex"));

/// Comma-joined selection, the form `parse_row_id_arg` reads back.
pub fn format_row_id_arg(ids: &[i64]) -> String {
    ids.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(",")
}

/// Parse `"1, 2 -9999,5"` style row-id lists.
pub fn parse_row_id_arg(text: &str) -> AppResult<Vec<i64>> {
    ID_SEPARATOR
        .split(text.trim())
        .filter(|t| !t.is_empty())
        .map(|t| t.parse::<i64>().map_err(|_| AppError::invalid_argument("invalid_row_id", format!("'{}' is not a row id", t))))
        .collect()
}

fn to_cell_string(v: &Value) -> String {
    match v {
        Value::Null => String::from("NULL"),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    let len = s.chars().count();
    if len <= max { return s.to_string(); }
    if max <= 1 { return "…".to_string(); }
    s.chars().take(max - 1).collect::<String>() + "…"
}

fn is_numeric_like(s: &str) -> bool {
    let st = s.trim();
    if st.is_empty() { return false; }
    let mut has_digit = false;
    for ch in st.chars() {
        if ch.is_ascii_digit() { has_digit = true; continue; }
        if ".-+eE".contains(ch) { continue; }
        return false;
    }
    has_digit
}

fn build_separator(widths: &[usize]) -> String {
    let mut s = String::from("+");
    for w in widths {
        s.push_str(&"-".repeat(*w + 2));
        s.push('+');
    }
    s
}

fn build_row(cells: &[String], widths: &[usize]) -> String {
    let mut s = String::from("|");
    for (i, w) in widths.iter().enumerate() {
        let cell = cells.get(i).cloned().unwrap_or_default();
        let text = truncate(&cell, *w);
        let pad = " ".repeat(w.saturating_sub(text.chars().count()));
        s.push(' ');
        if is_numeric_like(&cell) {
            s.push_str(&pad);
            s.push_str(&text);
        } else {
            s.push_str(&text);
            s.push_str(&pad);
        }
        s.push_str(" |");
    }
    s
}

/// ASCII table with a trailing `rows: N` summary line.
pub fn render_table(columns: &[String], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count().min(MAX_COL_WIDTH)).collect();
    for r in rows {
        for (i, cell) in r.iter().enumerate().take(columns.len()) {
            widths[i] = widths[i].max(cell.chars().count().min(MAX_COL_WIDTH));
        }
    }
    let sep = build_separator(&widths);
    let mut out = vec![sep.clone(), build_row(columns, &widths), sep.clone()];
    out.extend(rows.iter().map(|r| build_row(r, &widths)));
    out.push(sep);
    out.push(format!("rows: {}", rows.len()));
    out.join("\n")
}

fn terminal_width() -> usize {
    match terminal_size() {
        Some((Width(w), _)) if w > 4 => (w - 4) as usize,
        _ => 80,
    }
}

/// Clip every line of `text` to `width` characters.
pub fn fit_lines(text: &str, width: usize) -> String {
    text.lines().map(|l| truncate(l, width)).collect::<Vec<_>>().join("\n")
}

/// `fit_lines` at the width of the attached terminal (80 when there is none).
pub fn fit_to_terminal(text: &str) -> String {
    fit_lines(text, terminal_width())
}

pub fn render_buckets(buckets: &[GlyphBucket]) -> String {
    let columns: Vec<String> = ["x", "y", "z", "rows"].iter().map(|s| s.to_string()).collect();
    let rows: Vec<Vec<String>> = buckets
        .iter()
        .map(|b| vec![to_cell_string(&b.x), to_cell_string(&b.y), b.z_value.to_string(), b.row_count().to_string()])
        .collect();
    render_table(&columns, &rows)
}

/// Columns are taken in first-seen order across all rows.
pub fn render_rows(rows: &[Row]) -> String {
    let mut columns: Vec<String> = Vec::new();
    for r in rows {
        for k in r.keys() {
            if !columns.contains(k) { columns.push(k.clone()); }
        }
    }
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|r| columns.iter().map(|c| r.get(c).map(to_cell_string).unwrap_or_default()).collect())
        .collect();
    render_table(&columns, &cells)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_row_id_lists() {
        assert_eq!(parse_row_id_arg("1, 2 -9999,5").unwrap(), vec![1, 2, -9999, 5]);
        assert!(parse_row_id_arg("").unwrap().is_empty());
        assert_eq!(parse_row_id_arg("1,x").unwrap_err().code_str(), "invalid_row_id");
    }

    #[test]
    fn formatted_selection_parses_back() {
        let ids = vec![1, 2, -9999, 5];
        assert_eq!(format_row_id_arg(&ids), "1,2,-9999,5");
        assert_eq!(parse_row_id_arg(&format_row_id_arg(&ids)).unwrap(), ids);
    }

    #[test]
    fn renders_aligned_bucket_table() {
        let b = GlyphBucket { row_ids: vec![1, 2, 3], x: json!("west"), y: json!(12), z_value: 4.5 };
        let t = render_buckets(&[b]);
        let lines: Vec<&str> = t.lines().collect();
        assert_eq!(lines[0], "+------+----+-----+------+");
        assert_eq!(lines[1], "| x    | y  | z   | rows |");
        assert_eq!(lines[3], "| west | 12 | 4.5 |    3 |");
        assert_eq!(lines.last().copied(), Some("rows: 1"));
    }

    #[test]
    fn renders_rows_with_union_of_columns() {
        let rows = vec![
            json!({"glyphx_id__": 1, "region": "west"}).as_object().unwrap().clone(),
            json!({"glyphx_id__": 2, "revenue": null}).as_object().unwrap().clone(),
        ];
        let t = render_rows(&rows);
        assert!(t.contains("glyphx_id__ | region | revenue"));
        assert!(t.contains("NULL"));
    }

    #[test]
    fn fits_wide_tables() {
        let t = fit_lines("+------+\n| abcd |\nrows: 1", 5);
        assert_eq!(t, "+---…\n| ab…\nrows…");
    }

    #[test]
    fn truncates_long_cells() {
        assert_eq!(truncate("abcdef", 4), "abc…");
        assert_eq!(truncate("abc", 4), "abc");
    }
}
