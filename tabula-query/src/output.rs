//! JSON rendering of query results.

use serde_json::{json, Value as JsonValue};
use tabula_core::{QueryOutput, Table, Value, TIMESTAMP_FORMAT};

/// Renders a table as `{"columns": [...], "types": [...], "rows": [[...]]}`.
///
/// At most `limit` rows are rendered when a limit is given. Non-finite
/// floats render as `null`.
pub fn table_to_json(table: &Table, limit: Option<usize>) -> JsonValue {
    let schema = table.schema();
    let columns: Vec<&str> = schema.iter().map(|(name, _)| *name).collect();
    let types: Vec<&str> = schema.iter().map(|(_, data_type)| data_type.name()).collect();

    let end = limit.unwrap_or(usize::MAX);
    let rows: Vec<JsonValue> = table
        .rows(0..end)
        .map(|row| JsonValue::Array(row.iter().map(value_to_json).collect()))
        .collect();

    json!({
        "columns": columns,
        "types": types,
        "rows": rows,
        "total_rows": table.row_count(),
    })
}

/// Renders the output of a query.
///
/// Updates render a summary of the columns written rather than the table.
pub fn output_to_json(output: &QueryOutput, limit: Option<usize>) -> JsonValue {
    match output {
        QueryOutput::Selected(table) => table_to_json(table, limit),
        QueryOutput::Updated {
            columns,
            rows_affected,
            ..
        } => json!({
            "updated_columns": columns,
            "rows_affected": rows_affected,
        }),
    }
}

/// Converts a single value into its JSON form.
pub fn value_to_json(value: &Value) -> JsonValue {
    match value {
        Value::Int64(v) => JsonValue::from(*v),
        Value::Float64(v) => serde_json::Number::from_f64(*v)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Value::Text(v) => JsonValue::String(v.to_string()),
        Value::Timestamp(v) => JsonValue::String(v.format(TIMESTAMP_FORMAT).to_string()),
        Value::Boolean(v) => JsonValue::Bool(*v),
    }
}

#[cfg(test)]
mod tests {
    use tabula_core::ColumnData;

    use super::*;

    #[test]
    fn test_table_to_json() {
        let table = Table::from_columns(vec![
            ("asset", ColumnData::from(vec!["A", "B", "C"])),
            ("signal", ColumnData::from(vec![1.5, f64::NAN, f64::INFINITY])),
            ("id", ColumnData::from(vec![1i64, 2, 3])),
        ])
        .unwrap();

        let rendered = table_to_json(&table, Some(2));
        assert_eq!(
            rendered,
            json!({
                "columns": ["asset", "signal", "id"],
                "types": ["text", "float64", "int64"],
                "rows": [["A", 1.5, 1], ["B", null, 2]],
                "total_rows": 3,
            })
        );
    }

    #[test]
    fn test_timestamp_and_boolean_values() {
        let ts = tabula_core::parse_timestamp("2024-05-06").unwrap();
        assert_eq!(value_to_json(&Value::Timestamp(ts)), json!("2024-05-06 00:00:00"));
        assert_eq!(value_to_json(&Value::Boolean(true)), json!(true));
        assert_eq!(value_to_json(&Value::Float64(f64::NEG_INFINITY)), JsonValue::Null);
    }
}
