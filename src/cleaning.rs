//! Config-driven source cleaning for the sales, store and feature tables.
//!
//! All three raw sources go through [`clean_source`]; what differs between them
//! lives entirely in their [`CleanerConfig`]:
//! - expected fields with a coercion kind and a missing-value policy
//! - derived features appended after deduplication
//!
//! Processing order is fixed: required-column check, type coercion, row drops,
//! missing-value fill, exact-duplicate removal, derived features.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::table::{date_column, is_missing_token, is_numeric_dtype, RawTable, TableError};
use crate::timeseries::{trailing_window, ROW_INDEX};

pub const RAW_DATE_FORMAT: &str = "%d/%m/%Y";
pub const MACRO_FIELDS: [&str; 4] = ["Temperature", "Fuel_Price", "CPI", "Unemployment"];
pub const MARKDOWN_FIELDS: [&str; 5] = [
    "MarkDown1",
    "MarkDown2",
    "MarkDown3",
    "MarkDown4",
    "MarkDown5",
];
pub const CALENDAR_COLUMNS: [&str; 4] = ["Year", "Month", "Week", "DayOfWeek"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    Sales,
    Stores,
    Features,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sales => "sales",
            Self::Stores => "stores",
            Self::Features => "features",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Int,
    Float,
    Bool,
    Date,
    Categorical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissingPolicy {
    /// A missing value is a schema error.
    Required,
    /// Rows with a missing value are removed.
    DropRow,
    /// Missing means "none happened", e.g. no markdown.
    Zero,
    /// Column median over the coerced values.
    Median,
    /// Most frequent value; ties go to the smallest value.
    Mode,
    /// Left missing for downstream imputation.
    Keep,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub missing: MissingPolicy,
}

impl FieldSpec {
    pub fn new(name: &str, kind: FieldKind, missing: MissingPolicy) -> Self {
        Self {
            name: name.to_string(),
            kind,
            missing,
        }
    }
}

/// Row order used by the macro rolling averages of the feature table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MacroRollingScope {
    /// One continuous series over the whole table in file order.
    Global,
    /// One series per store, ordered by date.
    PerStore,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DerivedFeature {
    Calendar {
        date_column: String,
    },
    OneHot {
        column: String,
        prefix: String,
        categories: Vec<String>,
    },
    Log1p {
        column: String,
        output: String,
    },
    RollingMean {
        columns: Vec<String>,
        windows: Vec<usize>,
        scope: MacroRollingScope,
        group_column: String,
        order_column: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanerConfig {
    pub source: SourceKind,
    pub fields: Vec<FieldSpec>,
    pub derived: Vec<DerivedFeature>,
    pub date_format: String,
}

impl CleanerConfig {
    pub fn sales() -> Self {
        Self {
            source: SourceKind::Sales,
            fields: vec![
                FieldSpec::new("Store", FieldKind::Int, MissingPolicy::DropRow),
                FieldSpec::new("Dept", FieldKind::Int, MissingPolicy::DropRow),
                FieldSpec::new("Date", FieldKind::Date, MissingPolicy::Required),
                FieldSpec::new("Weekly_Sales", FieldKind::Float, MissingPolicy::Zero),
                FieldSpec::new("IsHoliday", FieldKind::Bool, MissingPolicy::Required),
            ],
            derived: vec![DerivedFeature::Calendar {
                date_column: "Date".to_string(),
            }],
            date_format: RAW_DATE_FORMAT.to_string(),
        }
    }

    pub fn stores() -> Self {
        Self {
            source: SourceKind::Stores,
            fields: vec![
                FieldSpec::new("Store", FieldKind::Int, MissingPolicy::Required),
                FieldSpec::new("Type", FieldKind::Categorical, MissingPolicy::Mode),
                FieldSpec::new("Size", FieldKind::Float, MissingPolicy::Median),
            ],
            derived: vec![
                DerivedFeature::OneHot {
                    column: "Type".to_string(),
                    prefix: "Type".to_string(),
                    categories: vec!["A".to_string(), "B".to_string(), "C".to_string()],
                },
                DerivedFeature::Log1p {
                    column: "Size".to_string(),
                    output: "Size_log".to_string(),
                },
            ],
            date_format: RAW_DATE_FORMAT.to_string(),
        }
    }

    pub fn features() -> Self {
        Self::features_with_scope(MacroRollingScope::Global)
    }

    pub fn features_with_scope(scope: MacroRollingScope) -> Self {
        let mut fields = vec![
            FieldSpec::new("Store", FieldKind::Int, MissingPolicy::Required),
            FieldSpec::new("Date", FieldKind::Date, MissingPolicy::Required),
            FieldSpec::new("Temperature", FieldKind::Float, MissingPolicy::Median),
            FieldSpec::new("Fuel_Price", FieldKind::Float, MissingPolicy::Median),
        ];
        for markdown in MARKDOWN_FIELDS {
            fields.push(FieldSpec::new(markdown, FieldKind::Float, MissingPolicy::Zero));
        }
        fields.push(FieldSpec::new("CPI", FieldKind::Float, MissingPolicy::Median));
        fields.push(FieldSpec::new(
            "Unemployment",
            FieldKind::Float,
            MissingPolicy::Median,
        ));
        fields.push(FieldSpec::new(
            "IsHoliday",
            FieldKind::Bool,
            MissingPolicy::Required,
        ));

        Self {
            source: SourceKind::Features,
            fields,
            derived: vec![
                DerivedFeature::Calendar {
                    date_column: "Date".to_string(),
                },
                DerivedFeature::RollingMean {
                    columns: MACRO_FIELDS.iter().map(|c| c.to_string()).collect(),
                    windows: vec![7, 30],
                    scope,
                    group_column: "Store".to_string(),
                    order_column: "Date".to_string(),
                },
            ],
            date_format: RAW_DATE_FORMAT.to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), CleanError> {
        if self.fields.is_empty() {
            return Err(CleanError::InvalidConfig(format!(
                "{} cleaner declares no fields",
                self.source
            )));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(CleanError::InvalidConfig(format!(
                    "field '{}' declared twice",
                    field.name
                )));
            }
            let compatible = match field.missing {
                MissingPolicy::Median => field.kind == FieldKind::Float,
                MissingPolicy::Mode => field.kind == FieldKind::Categorical,
                MissingPolicy::Zero => matches!(field.kind, FieldKind::Float | FieldKind::Int),
                _ => true,
            };
            if !compatible {
                return Err(CleanError::InvalidConfig(format!(
                    "policy {:?} does not apply to {:?} field '{}'",
                    field.missing, field.kind, field.name
                )));
            }
        }

        for derived in &self.derived {
            if let DerivedFeature::RollingMean { windows, .. } = derived {
                if windows.iter().any(|w| *w == 0) {
                    return Err(CleanError::InvalidConfig(
                        "rolling windows must be > 0".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CleanReport {
    pub input_rows: usize,
    pub dropped_rows: usize,
    pub duplicates_removed: usize,
    pub output_rows: usize,
    pub filled_values: BTreeMap<String, usize>,
}

#[derive(Debug, Error)]
pub enum CleanError {
    #[error("invalid cleaner config: {0}")]
    InvalidConfig(String),
    #[error("{table} table is missing required column '{column}'")]
    MissingColumn { table: SourceKind, column: String },
    #[error("{table} table: cannot parse {column} value '{value}' at row {row}")]
    ParseField {
        table: SourceKind,
        column: String,
        row: usize,
        value: String,
    },
    #[error("{table} table: invalid date '{value}' in {column} at row {row} (expected {format})")]
    InvalidDate {
        table: SourceKind,
        column: String,
        row: usize,
        value: String,
        format: String,
    },
    #[error("{table} table: invalid boolean '{value}' in {column} at row {row}")]
    InvalidBool {
        table: SourceKind,
        column: String,
        row: usize,
        value: String,
    },
    #[error("{table} table: missing required value in {column} at row {row}")]
    MissingRequiredValue {
        table: SourceKind,
        column: String,
        row: usize,
    },
    #[error("{table} table: column {column} has no values to derive a fill from")]
    EmptyColumn { table: SourceKind, column: String },
    #[error("{table} table: unknown category '{value}' in {column}")]
    UnknownCategory {
        table: SourceKind,
        column: String,
        value: String,
    },
    #[error("table error: {0}")]
    Table(#[from] TableError),
    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),
}


pub fn clean_source(
    raw: &RawTable,
    cfg: &CleanerConfig,
) -> Result<(DataFrame, CleanReport), CleanError> {
    cfg.validate()?;

    info!(
        component = "cleaning",
        event = "clean.start",
        source = cfg.source.as_str(),
        input_rows = raw.len(),
        columns = raw.headers.len()
    );

    let mut report = CleanReport {
        input_rows: raw.len(),
        ..CleanReport::default()
    };

    let mut indices = Vec::with_capacity(cfg.fields.len());
    for field in &cfg.fields {
        let idx = raw
            .column_index(&field.name)
            .ok_or_else(|| CleanError::MissingColumn {
                table: cfg.source,
                column: field.name.clone(),
            })?;
        indices.push(idx);
    }

    let ignored: Vec<&str> = raw
        .headers
        .iter()
        .filter(|h| !cfg.fields.iter().any(|f| &f.name == *h))
        .map(String::as_str)
        .collect();
    if !ignored.is_empty() {
        debug!(
            component = "cleaning",
            event = "clean.columns_ignored",
            source = cfg.source.as_str(),
            columns = ?ignored
        );
    }

    let columns = cfg
        .fields
        .iter()
        .zip(&indices)
        .map(|(field, &idx)| coerce_column(raw, idx, field, cfg))
        .collect::<Result<Vec<_>, _>>()?;
    let mut frame = DataFrame::new(columns)?;

    frame = drop_rows_with_missing_keys(frame, cfg, &mut report)?;
    frame = fill_missing(frame, cfg, &mut report)?;

    let before_dedup = frame.height();
    frame = frame
        .lazy()
        .unique_stable(None, UniqueKeepStrategy::First)
        .collect()?;
    report.duplicates_removed = before_dedup - frame.height();
    if report.duplicates_removed > 0 {
        info!(
            component = "cleaning",
            event = "clean.duplicates_removed",
            source = cfg.source.as_str(),
            duplicates_removed = report.duplicates_removed
        );
    }

    for derived in &cfg.derived {
        frame = apply_derived(frame, derived, cfg.source)?;
    }

    report.output_rows = frame.height();

    info!(
        component = "cleaning",
        event = "clean.finish",
        source = cfg.source.as_str(),
        input_rows = report.input_rows,
        dropped_rows = report.dropped_rows,
        duplicates_removed = report.duplicates_removed,
        output_rows = report.output_rows,
        columns = frame.width()
    );

    Ok((frame, report))
}

fn coerce_column(
    raw: &RawTable,
    idx: usize,
    field: &FieldSpec,
    cfg: &CleanerConfig,
) -> Result<Column, CleanError> {
    let n = raw.len();
    let name: PlSmallStr = field.name.as_str().into();
    let values = (0..n).map(|row| (row, raw.value(row, idx)));

    let column = match field.kind {
        FieldKind::Int => {
            let parsed: Vec<Option<i64>> = values
                .map(|(row, v)| parse_int(v).map_err(|_| parse_error(cfg, field, row, v)))
                .collect::<Result<_, _>>()?;
            Column::new(name, parsed)
        }
        FieldKind::Float => {
            let parsed: Vec<Option<f64>> = values
                .map(|(row, v)| parse_float(v).map_err(|_| parse_error(cfg, field, row, v)))
                .collect::<Result<_, _>>()?;
            Column::new(name, parsed)
        }
        FieldKind::Bool => {
            let parsed: Vec<Option<bool>> = values
                .map(|(row, v)| {
                    parse_bool(v).map_err(|_| CleanError::InvalidBool {
                        table: cfg.source,
                        column: field.name.clone(),
                        row: row + 1,
                        value: v.to_string(),
                    })
                })
                .collect::<Result<_, _>>()?;
            Column::new(name, parsed)
        }
        FieldKind::Date => {
            let parsed: Vec<Option<NaiveDate>> = values
                .map(|(row, v)| {
                    parse_date(v, &cfg.date_format).map_err(|_| CleanError::InvalidDate {
                        table: cfg.source,
                        column: field.name.clone(),
                        row: row + 1,
                        value: v.to_string(),
                        format: cfg.date_format.clone(),
                    })
                })
                .collect::<Result<_, _>>()?;
            date_column(&field.name, &parsed)?
        }
        FieldKind::Categorical => {
            let parsed: Vec<Option<String>> = values
                .map(|(_, v)| {
                    if is_missing_token(v) {
                        None
                    } else {
                        Some(v.trim().to_string())
                    }
                })
                .collect();
            Column::new(name, parsed)
        }
    };

    Ok(column)
}

fn parse_error(cfg: &CleanerConfig, field: &FieldSpec, row: usize, value: &str) -> CleanError {
    CleanError::ParseField {
        table: cfg.source,
        column: field.name.clone(),
        row: row + 1,
        value: value.to_string(),
    }
}

/// 2^63; integral floats in `[-2^63, 2^63)` fit an `i64` exactly.
const I64_FLOAT_BOUND: f64 = 9_223_372_036_854_775_808.0;

fn parse_int(raw: &str) -> Result<Option<i64>, ()> {
    if is_missing_token(raw) {
        return Ok(None);
    }
    let trimmed = raw.trim();
    if let Ok(v) = trimmed.parse::<i64>() {
        return Ok(Some(v));
    }
    match trimmed.parse::<f64>() {
        Ok(v) if v.fract() == 0.0 && (-I64_FLOAT_BOUND..I64_FLOAT_BOUND).contains(&v) => {
            Ok(Some(v as i64))
        }
        _ => Err(()),
    }
}

fn parse_float(raw: &str) -> Result<Option<f64>, ()> {
    if is_missing_token(raw) {
        return Ok(None);
    }
    raw.trim()
        .parse::<f64>()
        .map(|v| Some(v).filter(|v| !v.is_nan()))
        .map_err(|_| ())
}

/// Case-insensitive TRUE/FALSE; anything else is rejected rather than mapped.
fn parse_bool(raw: &str) -> Result<Option<bool>, ()> {
    if is_missing_token(raw) {
        return Ok(None);
    }
    match raw.trim().to_ascii_uppercase().as_str() {
        "TRUE" => Ok(Some(true)),
        "FALSE" => Ok(Some(false)),
        _ => Err(()),
    }
}

fn parse_date(raw: &str, format: &str) -> Result<Option<NaiveDate>, ()> {
    if is_missing_token(raw) {
        return Ok(None);
    }
    NaiveDate::parse_from_str(raw.trim(), format)
        .map(Some)
        .map_err(|_| ())
}

fn drop_rows_with_missing_keys(
    frame: DataFrame,
    cfg: &CleanerConfig,
    report: &mut CleanReport,
) -> Result<DataFrame, CleanError> {
    let predicate = cfg
        .fields
        .iter()
        .filter(|f| f.missing == MissingPolicy::DropRow)
        .map(|f| col(f.name.as_str()).is_not_null())
        .reduce(|acc, next| acc.and(next));
    let Some(predicate) = predicate else {
        return Ok(frame);
    };

    let before = frame.height();
    let kept = frame.lazy().filter(predicate).collect()?;
    let dropped = before - kept.height();
    if dropped > 0 {
        report.dropped_rows = dropped;
        warn!(
            component = "cleaning",
            event = "clean.rows_dropped",
            source = cfg.source.as_str(),
            reason = "missing_key",
            dropped_rows = dropped
        );
    }
    Ok(kept)
}

fn fill_missing(
    frame: DataFrame,
    cfg: &CleanerConfig,
    report: &mut CleanReport,
) -> Result<DataFrame, CleanError> {
    let mut fills = Vec::new();
    for field in &cfg.fields {
        let column = frame
            .column(&field.name)
            .map_err(|_| TableError::MissingColumn(field.name.clone()))?;
        let missing = column.null_count();
        if missing == 0 {
            continue;
        }
        let name = field.name.as_str();

        let fill = match (field.missing, field.kind) {
            (MissingPolicy::Keep, _) | (MissingPolicy::DropRow, _) => continue,
            (MissingPolicy::Required, _) => {
                let row = column
                    .as_materialized_series()
                    .is_null()
                    .into_iter()
                    .position(|v| v == Some(true))
                    .unwrap_or_default();
                return Err(CleanError::MissingRequiredValue {
                    table: cfg.source,
                    column: field.name.clone(),
                    row: row + 1,
                });
            }
            (MissingPolicy::Zero, FieldKind::Int) => col(name).fill_null(lit(0i64)),
            (MissingPolicy::Zero, _) => col(name).fill_null(lit(0.0)),
            (MissingPolicy::Median, _) => {
                if missing == column.len() {
                    return Err(CleanError::EmptyColumn {
                        table: cfg.source,
                        column: field.name.clone(),
                    });
                }
                col(name).fill_null(col(name).median())
            }
            (MissingPolicy::Mode, _) => {
                let values: Vec<Option<String>> = column
                    .str()?
                    .into_iter()
                    .map(|v| v.map(str::to_string))
                    .collect();
                let fill = mode(&values).ok_or_else(|| CleanError::EmptyColumn {
                    table: cfg.source,
                    column: field.name.clone(),
                })?;
                col(name).fill_null(lit(fill))
            }
        };
        report.filled_values.insert(field.name.clone(), missing);
        fills.push(fill);
    }

    if fills.is_empty() {
        return Ok(frame);
    }
    Ok(frame.lazy().with_columns(fills).collect()?)
}

/// Median of the given values, averaging the middle pair for even counts.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

fn mode(values: &[Option<String>]) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for value in values.iter().flatten() {
        *counts.entry(value.as_str()).or_default() += 1;
    }
    // Ascending iteration with a strict `>` keeps the smallest value among ties.
    counts
        .into_iter()
        .fold(None::<(&str, usize)>, |best, (value, count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((value, count)),
        })
        .map(|(value, _)| value.to_string())
}

fn apply_derived(
    frame: DataFrame,
    derived: &DerivedFeature,
    source: SourceKind,
) -> Result<DataFrame, CleanError> {
    match derived {
        DerivedFeature::Calendar { date_column } => add_calendar_columns(frame, date_column),
        DerivedFeature::OneHot {
            column,
            prefix,
            categories,
        } => one_hot_encode(frame, column, prefix, categories, source),
        DerivedFeature::Log1p { column, output } => {
            let dtype = frame
                .column(column)
                .map_err(|_| TableError::MissingColumn(column.clone()))?
                .dtype();
            if !is_numeric_dtype(dtype) {
                return Err(CleanError::InvalidConfig(format!(
                    "log1p needs a numeric column, '{column}' is {dtype}"
                )));
            }
            Ok(frame
                .lazy()
                .with_column(
                    col(column.as_str())
                        .cast(DataType::Float64)
                        .log1p()
                        .alias(output.as_str()),
                )
                .collect()?)
        }
        DerivedFeature::RollingMean {
            columns,
            windows,
            scope,
            group_column,
            order_column,
        } => add_rolling_means(frame, columns, windows, *scope, group_column, order_column, source),
    }
}

fn add_calendar_columns(frame: DataFrame, date_column: &str) -> Result<DataFrame, CleanError> {
    let dtype = frame
        .column(date_column)
        .map_err(|_| TableError::MissingColumn(date_column.to_string()))?
        .dtype();
    if dtype != &DataType::Date {
        return Err(CleanError::InvalidConfig(format!(
            "calendar decomposition needs a date column, '{date_column}' is {dtype}"
        )));
    }

    let date = || col(date_column).dt();
    Ok(frame
        .lazy()
        .with_columns([
            date().year().cast(DataType::Int64).alias(CALENDAR_COLUMNS[0]),
            date().month().cast(DataType::Int64).alias(CALENDAR_COLUMNS[1]),
            date().week().cast(DataType::Int64).alias(CALENDAR_COLUMNS[2]),
            // ISO weekday is 1..=7 from Monday; stored as 0..=6.
            (date().weekday().cast(DataType::Int64) - lit(1i64)).alias(CALENDAR_COLUMNS[3]),
        ])
        .collect()?)
}

fn one_hot_encode(
    frame: DataFrame,
    column: &str,
    prefix: &str,
    categories: &[String],
    source: SourceKind,
) -> Result<DataFrame, CleanError> {
    let data = frame
        .column(column)
        .map_err(|_| TableError::MissingColumn(column.to_string()))?;
    if data.dtype() != &DataType::String {
        return Err(CleanError::InvalidConfig(format!(
            "one-hot encoding needs a categorical column, '{column}' is {}",
            data.dtype()
        )));
    }

    if let Some(unknown) = data
        .str()?
        .into_iter()
        .flatten()
        .find(|v| !categories.iter().any(|c| c == v))
    {
        return Err(CleanError::UnknownCategory {
            table: source,
            column: column.to_string(),
            value: unknown.to_string(),
        });
    }

    let indicators: Vec<Expr> = categories
        .iter()
        .map(|category| {
            when(col(column).eq(lit(category.as_str())))
                .then(lit(1i64))
                .otherwise(lit(0i64))
                .alias(format!("{prefix}_{category}"))
        })
        .collect();

    let encoded = frame.lazy().with_columns(indicators).collect()?;
    Ok(encoded.drop(column)?)
}

fn add_rolling_means(
    frame: DataFrame,
    columns: &[String],
    windows: &[usize],
    scope: MacroRollingScope,
    group_column: &str,
    order_column: &str,
    source: SourceKind,
) -> Result<DataFrame, CleanError> {
    let means = |partition: Option<&str>| -> Vec<Expr> {
        columns
            .iter()
            .flat_map(|column| {
                windows.iter().map(move |&window| {
                    let mean = col(column.as_str())
                        .cast(DataType::Float64)
                        .rolling_mean(trailing_window(window));
                    let mean = match partition {
                        Some(group) => mean.over([col(group)]),
                        None => mean,
                    };
                    mean.alias(format!("{column}_{window}d_avg"))
                })
            })
            .collect()
    };

    let averaged = match scope {
        MacroRollingScope::Global => {
            warn!(
                component = "cleaning",
                event = "clean.macro_rolling.ungrouped",
                source = source.as_str(),
                columns = ?columns,
                reason = "rolling averages span all stores in file order"
            );
            frame.lazy().with_columns(means(None)).collect()?
        }
        MacroRollingScope::PerStore => frame
            .lazy()
            .with_row_index(ROW_INDEX, None)
            .sort(
                [group_column, order_column],
                SortMultipleOptions::default().with_maintain_order(true),
            )
            .with_columns(means(Some(group_column)))
            .sort([ROW_INDEX], SortMultipleOptions::default())
            .collect()?
            .drop(ROW_INDEX)?,
    };

    Ok(averaged)
}
