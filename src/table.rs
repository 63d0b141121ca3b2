//! Raw delimited-file input and polars frame output shared by every pipeline stage.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use csv::StringRecord;
use polars::prelude::*;
use thiserror::Error;

/// Tokens treated as a missing value when reading raw tables.
pub const MISSING_TOKENS: [&str; 6] = ["", "NA", "NaN", "nan", "N/A", "null"];

const PERSISTED_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error)]
pub enum TableError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),
    #[error("column '{0}' not found")]
    MissingColumn(String),
    #[error("invalid output path: {0}")]
    InvalidPath(String),
}

/// Untyped table exactly as read from a delimited file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, TableError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = reader
            .headers()?
            .iter()
            .map(|h| h.to_string())
            .collect::<Vec<_>>();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record: StringRecord = record?;
            rows.push(record.iter().map(|v| v.to_string()).collect());
        }

        Ok(Self { headers, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn value(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(String::as_str)
            .unwrap_or_default()
    }
}

pub fn read_raw_table(path: &Path) -> Result<RawTable, TableError> {
    let file = fs::File::open(path)?;
    RawTable::from_reader(file)
}

pub fn is_missing_token(raw: &str) -> bool {
    MISSING_TOKENS.contains(&raw.trim())
}

/// Integer and float dtypes; booleans, dates and strings are not numeric.
pub fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int32
            | DataType::Int64
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

/// Values of a numeric column as `f64`; nulls and NaN both read as `None`.
pub fn float_values(frame: &DataFrame, name: &str) -> Result<Vec<Option<f64>>, TableError> {
    let column = frame
        .column(name)
        .map_err(|_| TableError::MissingColumn(name.to_string()))?;
    let values = column.cast(&DataType::Float64)?;
    Ok(values
        .f64()?
        .into_iter()
        .map(|v| v.filter(|x| !x.is_nan()))
        .collect())
}

fn unix_epoch() -> NaiveDate {
    DateTime::<Utc>::UNIX_EPOCH.date_naive()
}

/// Builds a polars `Date` column from calendar dates.
pub fn date_column(name: &str, dates: &[Option<NaiveDate>]) -> Result<Column, TableError> {
    let epoch = unix_epoch();
    let days: Vec<Option<i32>> = dates
        .iter()
        .map(|d| d.and_then(|d| i32::try_from((d - epoch).num_days()).ok()))
        .collect();
    Ok(Column::new(name.into(), days).cast(&DataType::Date)?)
}

fn format_column(column: &Column) -> Result<Vec<String>, TableError> {
    let cells: Vec<Option<String>> = match column.dtype() {
        DataType::Int64 => column
            .i64()?
            .into_iter()
            .map(|v| v.map(|x| x.to_string()))
            .collect(),
        DataType::Float64 => column
            .f64()?
            .into_iter()
            .map(|v| v.filter(|x| !x.is_nan()).map(|x| x.to_string()))
            .collect(),
        DataType::Boolean => column
            .bool()?
            .into_iter()
            .map(|v| v.map(|x| if x { "True" } else { "False" }.to_string()))
            .collect(),
        DataType::Date => {
            let epoch = unix_epoch();
            let days = column.cast(&DataType::Int32)?;
            days.i32()?
                .into_iter()
                .map(|d| {
                    d.and_then(|d| epoch.checked_add_signed(Duration::days(i64::from(d))))
                        .map(|d| d.format(PERSISTED_DATE_FORMAT).to_string())
                })
                .collect()
        }
        _ => {
            let text = column.cast(&DataType::String)?;
            text.str()?
                .into_iter()
                .map(|v| v.map(str::to_string))
                .collect()
        }
    };
    Ok(cells.into_iter().map(Option::unwrap_or_default).collect())
}

/// Header row plus one record per frame row; missing cells are empty.
fn write_csv<W: Write>(frame: &DataFrame, writer: W) -> Result<(), TableError> {
    let columns = frame
        .get_columns()
        .iter()
        .map(format_column)
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = csv::Writer::from_writer(writer);
    out.write_record(frame.get_column_names().iter().map(|name| name.as_str()))?;
    for row in 0..frame.height() {
        out.write_record(columns.iter().map(|cells| cells[row].as_str()))?;
    }
    out.flush()?;
    Ok(())
}

/// Writes a frame to `path` through a temp file so readers never see a partial table.
pub fn write_frame_csv(path: &Path, frame: &DataFrame) -> Result<(), TableError> {
    let mut buf = Vec::new();
    write_csv(frame, &mut buf)?;
    write_atomic(path, &buf)
}

pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), TableError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| TableError::InvalidPath(path.display().to_string()))?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    fs::rename(tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> DataFrame {
        DataFrame::new(vec![
            Column::new("Store".into(), vec![Some(2i64), Some(1), None]),
            Column::new("Sales".into(), vec![Some(1.5), None, Some(3.0)]),
            Column::new("IsHoliday".into(), vec![Some(true), Some(false), None]),
        ])
        .unwrap()
    }

    #[test]
    fn raw_table_reader_trims_headers_and_values() {
        let raw = RawTable::from_reader(" Store , Type\n1 , A\n2,B\n".as_bytes()).unwrap();
        assert_eq!(raw.headers, vec!["Store", "Type"]);
        assert_eq!(raw.len(), 2);
        assert_eq!(raw.value(0, 1), "A");
        assert_eq!(raw.column_index("Type"), Some(1));
        assert_eq!(raw.value(5, 0), "");
    }

    #[test]
    fn float_values_reads_ints_and_treats_nan_as_missing() {
        let frame = DataFrame::new(vec![
            Column::new("Store".into(), vec![Some(2i64), None]),
            Column::new("Temp".into(), vec![f64::NAN, 4.5]),
        ])
        .unwrap();
        assert_eq!(float_values(&frame, "Store").unwrap(), vec![Some(2.0), None]);
        assert_eq!(float_values(&frame, "Temp").unwrap(), vec![None, Some(4.5)]);
        assert!(matches!(
            float_values(&frame, "Dept"),
            Err(TableError::MissingColumn(_))
        ));
    }

    #[test]
    fn dates_survive_the_polars_date_column() {
        let dates = vec![NaiveDate::from_ymd_opt(2010, 2, 5), NaiveDate::from_ymd_opt(2012, 10, 26)];
        let frame = DataFrame::new(vec![date_column("Date", &dates).unwrap()]).unwrap();
        assert_eq!(frame.column("Date").unwrap().dtype(), &DataType::Date);
        let mut out = Vec::new();
        write_csv(&frame, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Date\n2010-02-05\n2012-10-26\n");
    }

    #[test]
    fn csv_output_leaves_missing_cells_empty() {
        let frame = sample_frame();
        let mut out = Vec::new();
        write_csv(&frame, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "Store,Sales,IsHoliday\n2,1.5,True\n1,,False\n,3,\n");
    }
}
