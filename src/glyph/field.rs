//! Field resolution: which raw column an axis reads and what expression it groups by.

use crate::ident::quote_ident;
use crate::project::{Axis, AxisProperty, DateGrouping, FieldType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedField {
    pub axis: Axis,
    /// Column key as configured, without quotes.
    pub raw_column: String,
    /// Expression placed in the SELECT list and compared against in lookups.
    pub select_expr: String,
}

impl ResolvedField {
    /// `groupedXColumn`, `groupedYColumn`, ... as used by the composed query.
    pub fn alias(&self) -> String {
        format!("grouped{}Column", self.axis.as_str())
    }
}

/// Bucketing expression for a date column. `None` grouping means the default
/// (day of year); unsupported groupings leave the column untransformed.
pub fn date_expression(column: &str, grouping: Option<DateGrouping>) -> String {
    let col = quote_ident(column);
    match grouping.unwrap_or_default() {
        DateGrouping::DayOfYear => format!("DATE_FORMAT({}, '%Y-%j')", col),
        DateGrouping::DayOfMonth => format!("DAY({})", col),
        // ISO day of week is 1 (Monday) .. 7 (Sunday); shift so Sunday is 0
        DateGrouping::DayOfWeek => format!("(EXTRACT(DOW FROM {}) % 7)", col),
        DateGrouping::WeekOfYear => format!("EXTRACT(WEEK FROM {})", col),
        DateGrouping::MonthOfYear => format!("MONTH({})", col),
        DateGrouping::Year => format!("YEAR({})", col),
        DateGrouping::Quarter => format!("QUARTER({})", col),
        DateGrouping::Unsupported => col,
    }
}

pub fn resolve_axis_field(axis: Axis, property: &AxisProperty) -> ResolvedField {
    let select_expr = match property.data_type {
        FieldType::Date => date_expression(&property.column_key, property.date_grouping),
        _ => quote_ident(&property.column_key),
    };
    ResolvedField {
        axis,
        raw_column: crate::ident::normalize_identifier(&property.column_key).to_string(),
        select_expr,
    }
}
