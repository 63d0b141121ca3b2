//! Left joins of the cleaned sources into one row per (Store, Dept, Date).

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::table::TableError;
use crate::timeseries::ROW_INDEX;

pub const FEATURE_JOIN_KEYS: [&str; 3] = ["Store", "Date", "IsHoliday"];
pub const STORE_JOIN_KEYS: [&str; 1] = ["Store"];
pub const MERGE_SUFFIXES: (&str, &str) = ("_x", "_y");

const MATCH_MARKER: &str = "__matched";
const KEY_COUNT: &str = "__key_count";

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("{side} table has no join key column '{column}'")]
    MissingKey { side: &'static str, column: String },
    #[error("join key '{column}' is {left} on the left but {right} on the right")]
    KeyTypeMismatch {
        column: String,
        left: DataType,
        right: DataType,
    },
    #[error("duplicate right-hand key {key} on ({keys}) in {table}; join would fan out")]
    DuplicateRightKey {
        table: String,
        keys: String,
        key: String,
    },
    #[error("left join changed row count from {expected} to {actual}")]
    RowCountChanged { expected: usize, actual: usize },
    #[error("table error: {0}")]
    Table(#[from] TableError),
    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JoinReport {
    pub left_rows: usize,
    pub right_rows: usize,
    pub matched_rows: usize,
    pub unmatched_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MergeReport {
    pub rows: usize,
    pub features: JoinReport,
    pub stores: JoinReport,
}

/// Left join `right` onto `left`.
///
/// Every left row survives in order; unmatched right columns are null.
/// Right-hand keys must be unique. Rows with a null key never match.
/// Overlapping non-key names get `suffixes.0` on the left side and
/// `suffixes.1` on the right side.
pub fn left_join(
    left: &DataFrame,
    right: &DataFrame,
    right_name: &str,
    keys: &[&str],
    suffixes: (&str, &str),
) -> Result<(DataFrame, JoinReport), MergeError> {
    for key in keys {
        let l = left.column(key).map_err(|_| MergeError::MissingKey {
            side: "left",
            column: key.to_string(),
        })?;
        let r = right.column(key).map_err(|_| MergeError::MissingKey {
            side: "right",
            column: key.to_string(),
        })?;
        if l.dtype() != r.dtype() {
            return Err(MergeError::KeyTypeMismatch {
                column: key.to_string(),
                left: l.dtype().clone(),
                right: r.dtype().clone(),
            });
        }
    }
    ensure_unique_keys(right, right_name, keys)?;

    let overlapping: Vec<String> = left
        .get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .filter(|name| !keys.contains(&name.as_str()) && right.column(name).is_ok())
        .collect();
    let mut left = left.clone();
    let mut right = right.clone();
    for name in &overlapping {
        left.rename(name, format!("{name}{}", suffixes.0).into())?;
        right.rename(name, format!("{name}{}", suffixes.1).into())?;
    }

    let left_rows = left.height();
    let right_rows = right.height();
    let on: Vec<Expr> = keys.iter().map(|key| col(*key)).collect();
    let joined = left
        .lazy()
        .with_row_index(ROW_INDEX, None)
        .join(
            right.lazy().with_column(lit(true).alias(MATCH_MARKER)),
            on.clone(),
            on,
            JoinArgs::new(JoinType::Left),
        )
        .sort([ROW_INDEX], SortMultipleOptions::default())
        .collect()?;

    if joined.height() != left_rows {
        return Err(MergeError::RowCountChanged {
            expected: left_rows,
            actual: joined.height(),
        });
    }

    let unmatched_rows = joined.column(MATCH_MARKER)?.null_count();
    let out = joined.drop(ROW_INDEX)?.drop(MATCH_MARKER)?;

    let report = JoinReport {
        left_rows,
        right_rows,
        matched_rows: left_rows - unmatched_rows,
        unmatched_rows,
    };
    Ok((out, report))
}

/// Fails on the first right-hand key that occurs more than once. Null keys are ignored.
fn ensure_unique_keys(right: &DataFrame, right_name: &str, keys: &[&str]) -> Result<(), MergeError> {
    let on: Vec<Expr> = keys.iter().map(|key| col(*key)).collect();
    let not_null = on
        .iter()
        .cloned()
        .map(|key| key.is_not_null())
        .reduce(|acc, next| acc.and(next))
        .unwrap_or_else(|| lit(true));

    let duplicates = right
        .clone()
        .lazy()
        .filter(not_null)
        .group_by_stable(on.clone())
        .agg([len().alias(KEY_COUNT)])
        .filter(col(KEY_COUNT).gt(lit(1)))
        .limit(1)
        .collect()?;
    if duplicates.height() == 0 {
        return Ok(());
    }

    let key = keys
        .iter()
        .map(|name| {
            let value = duplicates.column(name)?.get(0)?;
            Ok(format!("{name}={value}"))
        })
        .collect::<PolarsResult<Vec<_>>>()?
        .join(", ");
    Err(MergeError::DuplicateRightKey {
        table: right_name.to_string(),
        keys: keys.join(", "),
        key,
    })
}

/// Sales ⋈ features on (Store, Date, IsHoliday), then ⋈ stores on Store.
pub fn merge_sources(
    sales: &DataFrame,
    features: &DataFrame,
    stores: &DataFrame,
) -> Result<(DataFrame, MergeReport), MergeError> {
    let (with_features, features_report) =
        left_join(sales, features, "features", &FEATURE_JOIN_KEYS, MERGE_SUFFIXES)?;
    let (merged, stores_report) =
        left_join(&with_features, stores, "stores", &STORE_JOIN_KEYS, MERGE_SUFFIXES)?;

    if merged.height() != sales.height() {
        return Err(MergeError::RowCountChanged {
            expected: sales.height(),
            actual: merged.height(),
        });
    }

    for (table, report) in [("features", &features_report), ("stores", &stores_report)] {
        if report.unmatched_rows > 0 {
            warn!(
                component = "merge",
                event = "merge.unmatched_rows",
                table,
                unmatched_rows = report.unmatched_rows,
                left_rows = report.left_rows
            );
        }
    }

    let report = MergeReport {
        rows: merged.height(),
        features: features_report,
        stores: stores_report,
    };

    info!(
        component = "merge",
        event = "merge.finish",
        rows = report.rows,
        columns = merged.width(),
        feature_matches = report.features.matched_rows,
        store_matches = report.stores.matched_rows
    );

    Ok((merged, report))
}
