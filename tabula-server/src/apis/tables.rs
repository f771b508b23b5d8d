use std::sync::Arc;

use poem_openapi::param::Path;
use poem_openapi::payload::Json;
use poem_openapi::{Object, OpenApi};
use tabula_core::EngineError;
use tracing::{info, instrument};

use super::info::IndexSummary;
use super::{ApiError, Tag};
use crate::catalog::Catalog;

#[derive(Debug, Object)]
pub(super) struct IndexRequest {
    /// The columns to sort the index by, in order of precedence.
    #[oai(validator(min_items = 1))]
    key_columns: Vec<String>,
}

/// Table management API endpoints
pub struct TablesApi {
    catalog: Arc<Catalog>,
}

impl TablesApi {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }
}

#[OpenApi(tag = Tag::TableEndpoints)]
impl TablesApi {
    #[oai(path = "/tables/:name/index", method = "post")]
    /// Build Index
    ///
    /// Builds an index on the given key columns of the table, replacing any
    /// existing index. Rebuilding is the way to recover a stale index.
    async fn build_index(
        &self,
        name: Path<String>,
        request: Json<IndexRequest>,
    ) -> Result<Json<IndexSummary>, ApiError> {
        build_index(&self.catalog, &name.0, request.0.key_columns)
            .await
            .map(Json)
    }
}

#[instrument(skip(catalog))]
async fn build_index(
    catalog: &Catalog,
    name: &str,
    key_columns: Vec<String>,
) -> Result<IndexSummary, ApiError> {
    let table = catalog
        .table(name)
        .ok_or_else(|| ApiError::table_not_found(name))?;

    let engine = catalog.engine().clone();
    let summary = tokio::task::spawn_blocking(move || {
        let keys: Vec<&str> = key_columns.iter().map(String::as_str).collect();
        let index = engine.index_manager().build(&table.read(), &keys)?;
        Ok::<_, EngineError>(IndexSummary::from(index.as_ref()))
    })
    .await
    .map_err(ApiError::internal)??;

    info!(distinct_keys = summary.distinct_keys, "Index built");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use tabula_core::{ColumnData, QueryEngine, SharedTable, Table};

    use super::*;

    fn catalog() -> Catalog {
        let table = Table::from_columns(vec![
            ("asset", ColumnData::from(vec!["A", "B", "A", "C"])),
            ("venue", ColumnData::from(vec!["x", "x", "y", "x"])),
        ])
        .unwrap();
        let catalog = Catalog::new(Arc::new(QueryEngine::default()));
        catalog.insert("signals", SharedTable::new(table));
        catalog
    }

    #[tokio::test]
    async fn test_build_index() {
        let catalog = catalog();
        let summary = build_index(&catalog, "signals", vec!["asset".into(), "venue".into()])
            .await
            .unwrap();

        assert_eq!(summary.key_columns, vec!["asset".to_string(), "venue".to_string()]);
        assert_eq!(summary.distinct_keys, 4);
        assert!(!summary.stale);

        let table = catalog.table("signals").unwrap();
        assert!(table.read().index().is_some());
    }

    #[rstest::rstest]
    #[case("missing", vec!["asset"])]
    #[case("signals", vec!["nope"])]
    #[tokio::test]
    async fn test_build_index_not_found(#[case] table: &str, #[case] keys: Vec<&str>) {
        let catalog = catalog();
        let keys = keys.into_iter().map(String::from).collect();
        let err = build_index(&catalog, table, keys).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)), "Got {err:?}");
    }

    #[tokio::test]
    async fn test_duplicate_keys_are_rejected() {
        let catalog = catalog();
        let err = build_index(&catalog, "signals", vec!["asset".into(), "asset".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)), "Got {err:?}");
    }
}
