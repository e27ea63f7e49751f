//! Grouped aggregation query composition.
//!
//! The statement is two-staged: an inner projection reads the stable row id, the
//! X/Y bucket expressions and the raw Z value from the view (filtering raw rows),
//! and the outer stage groups by the two buckets, folds the row ids of each bucket
//! into one `|`-delimited string and applies the accumulator to Z. The row id order
//! inside `rowids` is whatever the engine's `array_agg` produces.

use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::ident::{qualify_view, quote_ident, ROW_ID_COLUMN};
use crate::project::{AccumulatorType, Axis, AxisProperty, DateGrouping, FieldType, Project, ViewReference};

use super::field::resolve_axis_field;

/// Everything a `QueryRunner` needs to compose its aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerConfig {
    pub database_name: String,
    pub view_name: String,
    pub x_column: String,
    pub y_column: String,
    pub z_column: String,
    pub is_x_date: bool,
    pub is_y_date: bool,
    pub is_z_date: bool,
    #[serde(default)]
    pub x_date_grouping: Option<DateGrouping>,
    #[serde(default)]
    pub y_date_grouping: Option<DateGrouping>,
    #[serde(default)]
    pub z_accumulator_type: Option<AccumulatorType>,
    /// Raw predicate text applied to source rows before bucketing.
    #[serde(default)]
    pub filter: Option<String>,
}

impl RunnerConfig {
    /// Build from a project's X/Y/Z properties. The filter is the AND of the axis
    /// filters; use `with_filter` to supply explicit predicate text instead.
    pub fn from_project(project: &Project) -> AppResult<Self> {
        let x = project.property(Axis::X)?;
        let y = project.property(Axis::Y)?;
        let z = project.property(Axis::Z)?;
        Ok(Self {
            database_name: project.view.database_name.clone(),
            view_name: project.view.view_name.clone(),
            x_column: x.column_key.clone(),
            y_column: y.column_key.clone(),
            z_column: z.column_key.clone(),
            is_x_date: x.is_date(),
            is_y_date: y.is_date(),
            is_z_date: z.is_date(),
            x_date_grouping: x.date_grouping,
            y_date_grouping: y.date_grouping,
            z_accumulator_type: z.accumulator_type,
            filter: project.filter_clause(),
        })
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn view(&self) -> ViewReference {
        ViewReference::new(self.database_name.clone(), self.view_name.clone())
    }

    fn axis_property(column: &str, is_date: bool, grouping: Option<DateGrouping>) -> AxisProperty {
        let ft = if is_date { FieldType::Date } else { FieldType::Unknown };
        AxisProperty { column_key: column.to_string(), data_type: ft, date_grouping: grouping, accumulator_type: None, filter: None }
    }

    pub fn x_property(&self) -> AxisProperty { Self::axis_property(&self.x_column, self.is_x_date, self.x_date_grouping) }
    pub fn y_property(&self) -> AxisProperty { Self::axis_property(&self.y_column, self.is_y_date, self.y_date_grouping) }

    pub fn accumulator(&self) -> AccumulatorType { self.z_accumulator_type.unwrap_or_default() }

    /// Trimmed filter text, or `None` when absent or blank.
    pub fn effective_filter(&self) -> Option<&str> {
        self.filter.as_deref().map(str::trim).filter(|f| !f.is_empty())
    }
}

/// `SUM("zColumn")` and friends; absent or unsupported accumulators mean SUM.
pub fn accumulator_expression(acc: Option<AccumulatorType>) -> String {
    format!("{}(\"zColumn\")", acc.unwrap_or_default().sql_function())
}

pub fn compose_aggregation_query(cfg: &RunnerConfig) -> String {
    let x = resolve_axis_field(Axis::X, &cfg.x_property());
    let y = resolve_axis_field(Axis::Y, &cfg.y_property());
    let where_line = match cfg.effective_filter() {
        Some(f) => format!("    WHERE {}\n", f),
        None => String::new(),
    };
    format!(
        "WITH temp as (\n    SELECT {rowid} as rowid,\n    {x} as groupedXColumn,\n    {y} as groupedYColumn,\n    {z} as zColumn\n    FROM {view}\n{where_line})\nSELECT array_join(array_agg(rowid), '|') as \"rowids\",\ngroupedXColumn,\ngroupedYColumn,\n{acc} as zValue\nFROM temp\nGROUP BY groupedXColumn, groupedYColumn;",
        rowid = ROW_ID_COLUMN,
        x = x.select_expr,
        y = y.select_expr,
        z = quote_ident(&cfg.z_column),
        view = qualify_view(&cfg.database_name, &cfg.view_name),
        where_line = where_line,
        acc = accumulator_expression(cfg.z_accumulator_type),
    )
}
