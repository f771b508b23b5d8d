use std::sync::Arc;

use poem_openapi::payload::Json;
use poem_openapi::{Object, OpenApi};
use serde_json::Value as JsonValue;
use tabula_core::{EngineError, Projection, Query};
use tabula_query::output::output_to_json;
use tabula_query::{parse_group_by, parse_projection, FilterExpr, ParseError};
use tracing::{debug, instrument};

use super::{ApiError, Tag};
use crate::catalog::Catalog;

#[derive(Debug, Object)]
pub(super) struct QueryRequest {
    /// The name of the table to query.
    table: String,
    /// Only rows matching the filter are selected or updated.
    filter: Option<FilterExpr>,
    /// A comma separated list of output expressions, `*` selects every column.
    ///
    /// If every item has the form `name := expression` the query updates
    /// the table in place.
    select: Option<String>,
    /// A comma separated list of columns to group rows by.
    group_by: Option<String>,
    /// The maximum number of rows to return.
    limit: Option<u64>,
}

impl QueryRequest {
    fn to_query(&self) -> Result<Query, ParseError> {
        let projection = match present(&self.select) {
            Some(select) => parse_projection(select)?,
            None => Projection::All,
        };
        let group_by = match present(&self.group_by) {
            Some(group_by) => parse_group_by(group_by)?,
            None => Vec::new(),
        };

        Ok(Query::builder()
            .maybe_filter(self.filter.as_ref().map(|filter| filter.0.clone()))
            .projection(projection)
            .group_by(group_by)
            .build())
    }
}

fn present(part: &Option<String>) -> Option<&str> {
    part.as_deref().filter(|text| !text.trim().is_empty())
}

/// Query execution API endpoints
pub struct QueryApi {
    catalog: Arc<Catalog>,
}

impl QueryApi {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }
}

#[OpenApi(tag = Tag::QueryEndpoints)]
impl QueryApi {
    #[oai(path = "/query/execute", method = "post")]
    /// Execute Query
    ///
    /// Runs the query against the table and returns the result table as
    /// `{"columns", "types", "rows", "total_rows"}`.
    ///
    /// Update queries instead return the names of the columns written
    /// and the number of rows affected.
    async fn execute(
        &self,
        request: Json<QueryRequest>,
    ) -> Result<Json<JsonValue>, ApiError> {
        execute_query(&self.catalog, request.0).await.map(Json)
    }
}

#[instrument(skip_all, fields(table = %request.table))]
async fn execute_query(
    catalog: &Catalog,
    request: QueryRequest,
) -> Result<JsonValue, ApiError> {
    let table = catalog
        .table(&request.table)
        .ok_or_else(|| ApiError::table_not_found(&request.table))?;
    let query = request.to_query()?;
    let limit = request.limit.map(|limit| limit as usize);

    let engine = catalog.engine().clone();
    let output = tokio::task::spawn_blocking(move || {
        let output = engine.execute(&table, &query)?;
        Ok::<_, EngineError>(output_to_json(&output, limit))
    })
    .await
    .map_err(ApiError::internal)??;

    debug!("Query completed");
    Ok(output)
}
