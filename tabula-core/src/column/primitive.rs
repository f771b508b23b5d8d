//! Typed storage buffers for columns.
//!
//! These hold plain vectors of cheaply cloned values with no nested
//! pointers other than the shared text slices.

use std::sync::Arc;

use chrono::NaiveDateTime;

use super::ColumnAccess;
use crate::{DataType, EngineError, Value};

#[derive(Debug, Clone, PartialEq)]
/// The physical values of a column.
pub enum ColumnData {
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    Text(Vec<Arc<str>>),
    Timestamp(Vec<NaiveDateTime>),
    Boolean(Vec<bool>),
}

impl ColumnData {
    /// Creates an empty buffer of the given type with room for `capacity` values.
    pub fn with_capacity(data_type: DataType, capacity: usize) -> Self {
        match data_type {
            DataType::Int64 => Self::Int64(Vec::with_capacity(capacity)),
            DataType::Float64 => Self::Float64(Vec::with_capacity(capacity)),
            DataType::Text => Self::Text(Vec::with_capacity(capacity)),
            DataType::Timestamp => Self::Timestamp(Vec::with_capacity(capacity)),
            DataType::Boolean => Self::Boolean(Vec::with_capacity(capacity)),
        }
    }

    /// Builds a buffer of the given type from a list of values.
    ///
    /// Returns a [EngineError::Type] if any value does not fit the type.
    pub fn from_values(
        data_type: DataType,
        values: impl IntoIterator<Item = Value>,
    ) -> Result<Self, EngineError> {
        let values = values.into_iter();
        let mut data = Self::with_capacity(data_type, values.size_hint().0);
        for value in values {
            data.push(value)?;
        }
        Ok(data)
    }

    /// Appends a value to the end of the buffer.
    ///
    /// Integers are widened when pushed into a float buffer, any other
    /// type mismatch is rejected.
    pub fn push(&mut self, value: Value) -> Result<(), EngineError> {
        match (self, value) {
            (Self::Int64(values), Value::Int64(v)) => values.push(v),
            (Self::Float64(values), Value::Float64(v)) => values.push(v),
            (Self::Float64(values), Value::Int64(v)) => values.push(v as f64),
            (Self::Text(values), Value::Text(v)) => values.push(v),
            (Self::Timestamp(values), Value::Timestamp(v)) => values.push(v),
            (Self::Boolean(values), Value::Boolean(v)) => values.push(v),
            (data, value) => {
                return Err(EngineError::Type(format!(
                    "Cannot store {} value {value} in a {} column",
                    value.data_type(),
                    data.data_type(),
                )))
            },
        }
        Ok(())
    }

    /// Overwrites the value at the given physical position.
    pub fn set(&mut self, position: usize, value: Value) -> Result<(), EngineError> {
        match (self, value) {
            (Self::Int64(values), Value::Int64(v)) => values[position] = v,
            (Self::Float64(values), Value::Float64(v)) => values[position] = v,
            (Self::Float64(values), Value::Int64(v)) => values[position] = v as f64,
            (Self::Text(values), Value::Text(v)) => values[position] = v,
            (Self::Timestamp(values), Value::Timestamp(v)) => values[position] = v,
            (Self::Boolean(values), Value::Boolean(v)) => values[position] = v,
            (data, value) => {
                return Err(EngineError::Type(format!(
                    "Cannot store {} value {value} in a {} column",
                    value.data_type(),
                    data.data_type(),
                )))
            },
        }
        Ok(())
    }

    /// Copies the values at the given physical positions into a new buffer.
    pub fn gather(&self, positions: impl Iterator<Item = usize>) -> Self {
        match self {
            Self::Int64(values) => Self::Int64(positions.map(|p| values[p]).collect()),
            Self::Float64(values) => {
                Self::Float64(positions.map(|p| values[p]).collect())
            },
            Self::Text(values) => {
                Self::Text(positions.map(|p| values[p].clone()).collect())
            },
            Self::Timestamp(values) => {
                Self::Timestamp(positions.map(|p| values[p]).collect())
            },
            Self::Boolean(values) => {
                Self::Boolean(positions.map(|p| values[p]).collect())
            },
        }
    }
}

impl ColumnAccess for ColumnData {
    fn data_type(&self) -> DataType {
        match self {
            Self::Int64(_) => DataType::Int64,
            Self::Float64(_) => DataType::Float64,
            Self::Text(_) => DataType::Text,
            Self::Timestamp(_) => DataType::Timestamp,
            Self::Boolean(_) => DataType::Boolean,
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Int64(values) => values.len(),
            Self::Float64(values) => values.len(),
            Self::Text(values) => values.len(),
            Self::Timestamp(values) => values.len(),
            Self::Boolean(values) => values.len(),
        }
    }

    #[inline]
    fn value(&self, row: usize) -> Value {
        match self {
            Self::Int64(values) => Value::Int64(values[row]),
            Self::Float64(values) => Value::Float64(values[row]),
            Self::Text(values) => Value::Text(values[row].clone()),
            Self::Timestamp(values) => Value::Timestamp(values[row]),
            Self::Boolean(values) => Value::Boolean(values[row]),
        }
    }
}

impl From<Vec<i64>> for ColumnData {
    fn from(values: Vec<i64>) -> Self {
        Self::Int64(values)
    }
}

impl From<Vec<f64>> for ColumnData {
    fn from(values: Vec<f64>) -> Self {
        Self::Float64(values)
    }
}

impl From<Vec<&str>> for ColumnData {
    fn from(values: Vec<&str>) -> Self {
        Self::Text(values.into_iter().map(Arc::from).collect())
    }
}

impl From<Vec<String>> for ColumnData {
    fn from(values: Vec<String>) -> Self {
        Self::Text(values.into_iter().map(Arc::from).collect())
    }
}

impl From<Vec<bool>> for ColumnData {
    fn from(values: Vec<bool>) -> Self {
        Self::Boolean(values)
    }
}

impl From<Vec<NaiveDateTime>> for ColumnData {
    fn from(values: Vec<NaiveDateTime>) -> Self {
        Self::Timestamp(values)
    }
}
