use poem_openapi::payload::Json;
use poem_openapi::{ApiResponse, Object, Tags};
use tabula_core::EngineError;
use tabula_query::ParseError;
use tracing::warn;

mod health;
mod info;
mod query;
mod tables;

pub use self::health::HealthApi;
pub use self::info::InfoApi;
pub use self::query::QueryApi;
pub use self::tables::TablesApi;

#[derive(Tags)]
pub(super) enum Tag {
    #[oai(rename = "Health Endpoints")]
    /// Service health related endpoints
    ///
    /// The basic health check endpoint will always return `200 OK` and can be used to
    /// check the service is reachable.
    HealthEndpoints,
    #[oai(rename = "Info Endpoints")]
    /// Service information endpoints allows access to inspect:
    ///
    /// - Service version
    /// - Loaded tables, their row counts and column types
    /// - The index installed on each table and if it is stale
    InfoEndpoints,
    #[oai(rename = "Query Endpoints")]
    /// Used for filtering, projecting, aggregating and updating a single table.
    ///
    /// Expressions are written in a small SQL-like language, for example:
    ///
    /// ```json
    /// {
    ///     "table": "signals",
    ///     "filter": "signal > 2.5 AND asset = 'A'",
    ///     "select": "mean(signal) AS avg_signal, count(*) AS n",
    ///     "group_by": "asset"
    /// }
    /// ```
    ///
    /// A `select` where every item has the form `name := expression` updates the
    /// table in place instead, adding or replacing the named columns for the rows
    /// matching the filter.
    ///
    /// Filters made up of equality checks on a prefix of the key columns of the
    /// table's index are answered using the index.
    QueryEndpoints,
    #[oai(rename = "Table Endpoints")]
    /// Endpoints for managing the tables themselves.
    ///
    /// Indexes become stale once a column they cover is updated, queries which
    /// would use a stale index fail with `409 Conflict` until it is rebuilt.
    TableEndpoints,
}

#[derive(Debug, Object)]
/// Details of a failed request.
pub(super) struct ErrorDetail {
    /// A stable machine readable name for the error.
    kind: String,
    /// A human readable description of the error.
    message: String,
}

#[derive(Debug, ApiResponse)]
pub(super) enum ApiError {
    #[oai(status = 400)]
    /// The request could not be parsed or is invalid for the target table.
    BadRequest(Json<ErrorDetail>),
    #[oai(status = 404)]
    /// The target table or column does not exist.
    NotFound(Json<ErrorDetail>),
    #[oai(status = 408)]
    /// A query stage exceeded its time budget.
    Timeout(Json<ErrorDetail>),
    #[oai(status = 409)]
    /// The table's index is stale and must be rebuilt.
    Conflict(Json<ErrorDetail>),
    #[oai(status = 500)]
    /// The request failed unexpectedly.
    Internal(Json<ErrorDetail>),
}

impl ApiError {
    pub(super) fn table_not_found(name: &str) -> Self {
        Self::NotFound(detail("not_found", format!("table not found: {name:?}")))
    }

    pub(super) fn internal(message: impl ToString) -> Self {
        let message = message.to_string();
        warn!(error = %message, "Request failed unexpectedly");
        Self::Internal(detail("internal", message))
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let body = detail(err.kind(), err.to_string());
        match err {
            EngineError::NotFound { .. } | EngineError::UnknownColumn(_) => Self::NotFound(body),
            EngineError::StaleIndex { .. } => Self::Conflict(body),
            EngineError::Timeout { .. } => Self::Timeout(body),
            EngineError::Schema(_)
            | EngineError::LengthMismatch { .. }
            | EngineError::MixedAggregation { .. }
            | EngineError::Type(_)
            | EngineError::DisabledAggregate(_) => Self::BadRequest(body),
        }
    }
}

impl From<ParseError> for ApiError {
    fn from(err: ParseError) -> Self {
        Self::BadRequest(detail("parse", err.to_string()))
    }
}

fn detail(kind: &str, message: String) -> Json<ErrorDetail> {
    Json(ErrorDetail {
        kind: kind.to_string(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tabula_core::QueryStage;

    use super::*;

    fn status_kind(err: ApiError) -> (u16, String) {
        match err {
            ApiError::BadRequest(Json(body)) => (400, body.kind),
            ApiError::NotFound(Json(body)) => (404, body.kind),
            ApiError::Timeout(Json(body)) => (408, body.kind),
            ApiError::Conflict(Json(body)) => (409, body.kind),
            ApiError::Internal(Json(body)) => (500, body.kind),
        }
    }

    #[rstest::rstest]
    #[case(EngineError::Schema("x".into()), 400, "schema")]
    #[case(EngineError::Type("x".into()), 400, "type")]
    #[case(EngineError::MixedAggregation { column: "x".into() }, 400, "mixed_aggregation")]
    #[case(EngineError::DisabledAggregate("sum".into()), 400, "disabled_aggregate")]
    #[case(EngineError::UnknownColumn("x".into()), 404, "unknown_column")]
    #[case(EngineError::NotFound { kind: "row", name: "9".into() }, 404, "not_found")]
    #[case(EngineError::StaleIndex { key_columns: vec!["asset".into()] }, 409, "stale_index")]
    #[case(
        EngineError::Timeout {
            stage: QueryStage::Filtered,
            elapsed: Duration::from_millis(5),
            budget: Duration::ZERO,
        },
        408,
        "timeout"
    )]
    fn test_engine_error_status(
        #[case] err: EngineError,
        #[case] status: u16,
        #[case] kind: &str,
    ) {
        assert_eq!(status_kind(ApiError::from(err)), (status, kind.to_string()));
    }

    #[test]
    fn test_parse_error_is_bad_request() {
        let err = ApiError::from(ParseError::MixedProjection);
        assert_eq!(status_kind(err), (400, "parse".to_string()));
    }
}
