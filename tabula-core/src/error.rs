use std::time::Duration;

use crate::engine::QueryStage;

#[derive(Debug, thiserror::Error)]
/// An error that can occur while building, indexing or querying a table.
///
/// None of these errors are retried internally, table operations are
/// deterministic so the same input will always fail the same way.
/// The one exception callers are expected to handle is [EngineError::StaleIndex]
/// which should be answered by rebuilding the index and retrying.
pub enum EngineError {
    #[error("Schema Error: {0}")]
    /// The table could not be constructed from the given column specs.
    Schema(String),
    #[error("{kind} not found: {name:?}")]
    /// The target column, row or table does not exist.
    NotFound { kind: &'static str, name: String },
    #[error("Length mismatch on column {column:?}: expected {expected} values, got {actual}")]
    /// The number of values provided does not match the table row count.
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },
    #[error("Index on {key_columns:?} is stale and must be rebuilt")]
    /// The index was invalidated by a mutation of the table.
    StaleIndex { key_columns: Vec<String> },
    #[error("Unknown column: {0:?}")]
    /// An expression referenced a column that is not part of the schema.
    UnknownColumn(String),
    #[error("Column {column:?} must be a group key or used within an aggregate")]
    /// A bare column reference was mixed with aggregate calls.
    MixedAggregation { column: String },
    #[error("Type Error: {0}")]
    /// An operation was applied to values of an incompatible type.
    Type(String),
    #[error("Stage {stage} took {elapsed:?} which exceeds the budget of {budget:?}")]
    /// A query stage ran for longer than the configured per-stage budget.
    Timeout {
        stage: QueryStage,
        elapsed: Duration,
        budget: Duration,
    },
    #[error("Aggregate function {0:?} is not enabled")]
    /// The aggregate is valid but disabled by the engine config.
    DisabledAggregate(String),
}

impl EngineError {
    pub(crate) fn column_not_found(name: &str) -> Self {
        Self::NotFound {
            kind: "column",
            name: name.to_string(),
        }
    }

    /// Returns a stable machine readable name for the error variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Schema(_) => "schema",
            Self::NotFound { .. } => "not_found",
            Self::LengthMismatch { .. } => "length_mismatch",
            Self::StaleIndex { .. } => "stale_index",
            Self::UnknownColumn(_) => "unknown_column",
            Self::MixedAggregation { .. } => "mixed_aggregation",
            Self::Type(_) => "type",
            Self::Timeout { .. } => "timeout",
            Self::DisabledAggregate(_) => "disabled_aggregate",
        }
    }
}
