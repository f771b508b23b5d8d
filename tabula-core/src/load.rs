//! Loading tables from delimited text.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use bon::Builder;
use tracing::{debug, instrument};

use crate::value::parse_timestamp;
use crate::{ColumnData, DataType, EngineError, Table, Value};

#[derive(Debug, thiserror::Error)]
/// An error that can occur while loading a table.
pub enum LoadError {
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),
    #[error("Malformed input on line {line}: {reason}")]
    /// The input could not be split into consistent records.
    Malformed { line: u64, reason: String },
    #[error("Unsupported delimiter {0:?}, expected a single byte ASCII character")]
    Delimiter(char),
    #[error(transparent)]
    /// The parsed columns could not form a valid table.
    Engine(#[from] EngineError),
}

impl From<csv::Error> for LoadError {
    fn from(err: csv::Error) -> Self {
        let line = err.position().map(|pos| pos.line()).unwrap_or_default();
        let reason = match err.kind() {
            csv::ErrorKind::UnequalLengths {
                expected_len, len, ..
            } => format!("expected {expected_len} fields but found {len}"),
            _ => err.to_string(),
        };

        match err.into_kind() {
            csv::ErrorKind::Io(err) => Self::Io(err),
            _ => Self::Malformed { line, reason },
        }
    }
}

/// A source of tables.
pub trait Loader {
    /// Reads a complete table from the reader.
    fn load<R: BufRead>(&self, reader: R) -> Result<Table, LoadError>;

    /// Reads a complete table from the file at the given path.
    fn load_path(&self, path: &Path) -> Result<Table, LoadError> {
        let file = File::open(path)?;
        self.load(BufReader::new(file))
    }
}

#[derive(Debug, Clone, Builder)]
/// Loads delimiter separated text, inferring a type for each column.
///
/// Records follow RFC 4180, quoted fields may contain the delimiter, doubled
/// quotes and line breaks.
///
/// Each column takes the narrowest type that every one of its cells parses
/// as, in the order int64, float64, boolean, timestamp then text.
/// Empty cells in a numeric column make it a float column with `NaN` in
/// place of the missing values.
pub struct DelimitedLoader {
    #[builder(default = ',')]
    /// The character separating fields, this must be ASCII.
    delimiter: char,
    #[builder(default = true)]
    /// If the first line names the columns.
    ///
    /// Without a header columns are named `column_1` onwards.
    has_header: bool,
}

impl Default for DelimitedLoader {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Loader for DelimitedLoader {
    #[instrument(skip_all, fields(delimiter = %self.delimiter))]
    fn load<R: BufRead>(&self, reader: R) -> Result<Table, LoadError> {
        let delimiter = u8::try_from(self.delimiter)
            .ok()
            .filter(u8::is_ascii)
            .ok_or(LoadError::Delimiter(self.delimiter))?;

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(self.has_header)
            .flexible(false)
            .from_reader(reader);

        let mut names: Option<Vec<String>> = None;
        if self.has_header {
            let header = reader.headers()?;
            names = Some(header.iter().map(|name| name.trim().to_string()).collect());
        }
        let mut cells: Vec<Vec<String>> =
            vec![Vec::new(); names.as_ref().map_or(0, |names| names.len())];

        for record in reader.records() {
            let record = record?;
            if names.is_none() {
                cells = vec![Vec::new(); record.len()];
                names = Some((1..=record.len()).map(|n| format!("column_{n}")).collect());
            }

            for (column, field) in cells.iter_mut().zip(record.iter()) {
                column.push(field.to_string());
            }
        }

        let names = names.unwrap_or_default();
        let mut columns = Vec::with_capacity(names.len());
        for (name, values) in names.into_iter().zip(cells) {
            let data_type = infer_type(&values);
            let data = parse_column(data_type, &values).ok_or_else(|| {
                EngineError::Type(format!("Column {name:?} does not fit its inferred type"))
            })?;
            debug!(column = %name, %data_type, "Inferred column type");
            columns.push((name, data));
        }

        let table = Table::from_columns(columns)?;
        debug!(rows = table.row_count(), columns = table.columns().len(), "Loaded table");
        Ok(table)
    }
}

fn infer_type(values: &[String]) -> DataType {
    let mut int = true;
    let mut float = true;
    let mut boolean = true;
    let mut timestamp = true;
    let mut has_empty = false;
    let mut has_value = false;

    for value in values {
        let value = value.trim();
        if value.is_empty() {
            has_empty = true;
            continue;
        }
        has_value = true;
        int &= value.parse::<i64>().is_ok();
        float &= value.parse::<f64>().is_ok();
        boolean &= parse_bool(value).is_some();
        timestamp &= parse_timestamp(value).is_some();
    }

    if !has_value {
        DataType::Text
    } else if int && !has_empty {
        DataType::Int64
    } else if int || float {
        DataType::Float64
    } else if has_empty {
        DataType::Text
    } else if boolean {
        DataType::Boolean
    } else if timestamp {
        DataType::Timestamp
    } else {
        DataType::Text
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn parse_cell(data_type: DataType, value: &str) -> Option<Value> {
    let trimmed = value.trim();
    let value = match data_type {
        DataType::Int64 => Value::Int64(trimmed.parse().ok()?),
        DataType::Float64 if trimmed.is_empty() => Value::Float64(f64::NAN),
        DataType::Float64 => Value::Float64(trimmed.parse().ok()?),
        DataType::Boolean => Value::Boolean(parse_bool(trimmed)?),
        DataType::Timestamp => Value::Timestamp(parse_timestamp(trimmed)?),
        DataType::Text => Value::Text(Arc::from(value)),
    };
    Some(value)
}

fn parse_column(data_type: DataType, values: &[String]) -> Option<ColumnData> {
    let mut data = ColumnData::with_capacity(data_type, values.len());
    for value in values {
        data.push(parse_cell(data_type, value)?).ok()?;
    }
    Some(data)
}
