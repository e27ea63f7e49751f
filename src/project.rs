//!
//! Project configuration model
//! ---------------------------
//! The engine only ever reads a project's current axis configuration and the
//! view it was materialized into. Projects are owned and mutated elsewhere; this
//! module defines their shape and the `ProjectSource` seam used to look them up.
//!
//! JSON field names follow the camelCase shape the project documents are stored in,
//! enum values are SCREAMING_SNAKE_CASE (`"DAY_OF_YEAR"`, `"SUM"`, ...). Values this
//! build does not recognize deserialize into the `Unsupported`/`Unknown` variants
//! instead of failing, so they can degrade to documented defaults downstream.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::PathBuf;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::ident::{quote_ident, string_literal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Axis { X, Y, Z, A, B, C }

impl Axis {
    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
            Axis::A => "A",
            Axis::B => "B",
            Axis::C => "C",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    Number,
    String,
    Integer,
    Date,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DateGrouping {
    DayOfYear,
    DayOfMonth,
    DayOfWeek,
    WeekOfYear,
    MonthOfYear,
    Year,
    Quarter,
    #[serde(other)]
    Unsupported,
}

impl Default for DateGrouping {
    fn default() -> Self { DateGrouping::DayOfYear }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccumulatorType {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    #[serde(other)]
    Unsupported,
}

impl Default for AccumulatorType {
    fn default() -> Self { AccumulatorType::Sum }
}

impl AccumulatorType {
    /// SQL aggregate function name; unsupported values fall back to SUM.
    pub fn sql_function(&self) -> &'static str {
        match self {
            AccumulatorType::Sum | AccumulatorType::Unsupported => "SUM",
            AccumulatorType::Avg => "AVG",
            AccumulatorType::Min => "MIN",
            AccumulatorType::Max => "MAX",
            AccumulatorType::Count => "COUNT",
        }
    }
}

/// Per-axis filter chosen in the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AxisFilter {
    KeywordSet { keywords: Vec<String> },
    NumericRange {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
}

impl AxisFilter {
    /// Predicate over the raw column, or `None` when the filter selects everything.
    pub fn to_sql(&self, column_key: &str) -> Option<String> {
        let col = quote_ident(column_key);
        match self {
            AxisFilter::KeywordSet { keywords } if keywords.is_empty() => None,
            AxisFilter::KeywordSet { keywords } => {
                let items: Vec<String> = keywords.iter().map(|k| string_literal(k)).collect();
                Some(format!("{} IN ({})", col, items.join(", ")))
            }
            AxisFilter::NumericRange { min: Some(lo), max: Some(hi) } => Some(format!("{} BETWEEN {} AND {}", col, lo, hi)),
            AxisFilter::NumericRange { min: Some(lo), max: None } => Some(format!("{} >= {}", col, lo)),
            AxisFilter::NumericRange { min: None, max: Some(hi) } => Some(format!("{} <= {}", col, hi)),
            AxisFilter::NumericRange { min: None, max: None } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AxisProperty {
    pub column_key: String,
    pub data_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_grouping: Option<DateGrouping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accumulator_type: Option<AccumulatorType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<AxisFilter>,
}

impl AxisProperty {
    pub fn new(column_key: impl Into<String>, data_type: FieldType) -> Self {
        Self { column_key: column_key.into(), data_type, date_grouping: None, accumulator_type: None, filter: None }
    }

    pub fn with_date_grouping(mut self, grouping: DateGrouping) -> Self { self.date_grouping = Some(grouping); self }
    pub fn with_accumulator(mut self, acc: AccumulatorType) -> Self { self.accumulator_type = Some(acc); self }
    pub fn with_filter(mut self, filter: AxisFilter) -> Self { self.filter = Some(filter); self }

    pub fn is_date(&self) -> bool { self.data_type == FieldType::Date }
}

/// The materialized columnar table backing a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewReference {
    pub database_name: String,
    pub view_name: String,
}

impl ViewReference {
    pub fn new(database_name: impl Into<String>, view_name: impl Into<String>) -> Self {
        Self { database_name: database_name.into(), view_name: view_name.into() }
    }

    pub fn qualified(&self) -> String {
        crate::ident::qualify_view(&self.database_name, &self.view_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub view: ViewReference,
    #[serde(default)]
    pub properties: BTreeMap<Axis, AxisProperty>,
}

impl Project {
    pub fn new(id: impl Into<String>, view: ViewReference) -> Self {
        Self { id: id.into(), name: String::new(), view, properties: BTreeMap::new() }
    }

    pub fn with_property(mut self, axis: Axis, prop: AxisProperty) -> Self {
        self.properties.insert(axis, prop);
        self
    }

    pub fn property(&self, axis: Axis) -> AppResult<&AxisProperty> {
        self.properties.get(&axis).ok_or_else(|| {
            AppError::invalid_operation(
                "axis_property_missing",
                format!("project '{}' has no {} axis property", self.id, axis.as_str()),
            )
        })
    }

    /// AND of the X, Y and Z axis filters, or `None` when no axis filters anything.
    pub fn filter_clause(&self) -> Option<String> {
        let parts: Vec<String> = [Axis::X, Axis::Y, Axis::Z]
            .iter()
            .filter_map(|a| self.properties.get(a))
            .filter_map(|p| p.filter.as_ref().and_then(|f| f.to_sql(&p.column_key)))
            .collect();
        if parts.is_empty() { None } else { Some(parts.join(" AND ")) }
    }
}

/// Provider of a project's current configuration.
pub trait ProjectSource: Send + Sync {
    /// Fails with `NotFound { code: "project_not_found" }` when the id is unknown.
    fn get_project(&self, project_id: &str) -> impl Future<Output = AppResult<Project>> + Send;
}

fn project_not_found(project_id: &str) -> AppError {
    AppError::not_found("project_not_found", format!("project '{}' not found", project_id))
}

/// In-memory project source.
#[derive(Default)]
pub struct MemoryProjectSource {
    projects: RwLock<HashMap<String, Project>>,
}

impl MemoryProjectSource {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&self, project: Project) {
        self.projects.write().insert(project.id.clone(), project);
    }

    pub fn remove(&self, project_id: &str) -> Option<Project> {
        self.projects.write().remove(project_id)
    }
}

impl ProjectSource for MemoryProjectSource {
    async fn get_project(&self, project_id: &str) -> AppResult<Project> {
        let found = self.projects.read().get(project_id).cloned();
        found.ok_or_else(|| project_not_found(project_id))
    }
}

/// Reads `<dir>/<project id>.json` on every lookup so edits are picked up immediately.
pub struct JsonDirProjectSource {
    dir: PathBuf,
}

impl JsonDirProjectSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self { Self { dir: dir.into() } }
}

impl ProjectSource for JsonDirProjectSource {
    async fn get_project(&self, project_id: &str) -> AppResult<Project> {
        if project_id.is_empty() || project_id.contains(['/', '\\']) || project_id.starts_with('.') {
            return Err(AppError::invalid_argument("invalid_project_id", format!("invalid project id '{}'", project_id)));
        }
        let path = self.dir.join(format!("{}.json", project_id));
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(project_not_found(project_id)),
            Err(e) => return Err(AppError::io("project_read_failed", format!("{}: {}", path.display(), e))),
        };
        debug!(target: "glyph::project", "loaded project '{}' from {}", project_id, path.display());
        let project: Project = serde_json::from_str(&text)
            .map_err(|e| AppError::invalid_argument("project_parse_failed", format!("{}: {}", path.display(), e)))?;
        Ok(project)
    }
}
