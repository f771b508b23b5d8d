use std::sync::Arc;

use poem_openapi::payload::Json;
use poem_openapi::{Object, OpenApi};
use tabula_core::{ColumnAccess, Index, Table};

use super::Tag;
use crate::catalog::Catalog;

#[derive(Debug, Object)]
/// A summary of the service and its tables.
pub(super) struct Summary {
    /// The version of the service.
    version: String,
    /// Every loaded table, sorted by name.
    tables: Vec<TableSummary>,
}

#[derive(Debug, Object)]
pub(super) struct TableSummary {
    name: String,
    rows: u64,
    columns: Vec<ColumnSummary>,
    /// The index installed on the table, if any.
    index: Option<IndexSummary>,
}

impl TableSummary {
    fn new(name: String, table: &Table) -> Self {
        Self {
            name,
            rows: table.row_count() as u64,
            columns: table
                .columns()
                .iter()
                .map(|column| ColumnSummary {
                    name: column.name().to_string(),
                    data_type: column.data_type().to_string(),
                })
                .collect(),
            index: table.index().as_deref().map(IndexSummary::from),
        }
    }
}

#[derive(Debug, Object)]
pub(super) struct ColumnSummary {
    name: String,
    /// One of `int64`, `float64`, `boolean`, `timestamp` or `text`.
    data_type: String,
}

#[derive(Debug, Object)]
/// The state of a table's index.
pub(super) struct IndexSummary {
    /// The columns the index is sorted by.
    pub(super) key_columns: Vec<String>,
    /// If the index must be rebuilt before it can be used.
    pub(super) stale: bool,
    /// The number of distinct keys.
    pub(super) distinct_keys: u64,
}

impl From<&Index> for IndexSummary {
    fn from(index: &Index) -> Self {
        Self {
            key_columns: index.key_columns().to_vec(),
            stale: index.is_stale(),
            distinct_keys: index.distinct_keys() as u64,
        }
    }
}

/// System information API endpoints
pub struct InfoApi {
    catalog: Arc<Catalog>,
}

impl InfoApi {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }
}

#[OpenApi(tag = Tag::InfoEndpoints)]
impl InfoApi {
    #[oai(path = "/info/summary", method = "get")]
    /// Get Server Summary
    ///
    /// Returns summary information about the loaded tables.
    async fn get_summary(&self) -> Json<Summary> {
        Json(summarize(&self.catalog))
    }
}

fn summarize(catalog: &Catalog) -> Summary {
    let tables = catalog
        .tables()
        .into_iter()
        .map(|(name, table)| TableSummary::new(name, &table.read()))
        .collect();

    Summary {
        version: env!("CARGO_PKG_VERSION").to_string(),
        tables,
    }
}

#[cfg(test)]
mod tests {
    use tabula_core::{ColumnData, QueryEngine, SharedTable};

    use super::*;

    #[test]
    fn test_summary_reports_index_state() {
        let engine = Arc::new(QueryEngine::default());
        let table = Table::from_columns(vec![
            ("asset", ColumnData::from(vec!["A", "B", "A"])),
            ("signal", ColumnData::from(vec![1.0, 2.0, 3.0])),
        ])
        .unwrap();
        engine.index_manager().build(&table, &["asset"]).unwrap();

        let catalog = Catalog::new(engine);
        catalog.insert("signals", SharedTable::new(table));
        catalog.insert(
            "empty",
            SharedTable::new(Table::from_columns(Vec::<(&str, ColumnData)>::new()).unwrap()),
        );

        let summary = summarize(&catalog);
        assert_eq!(summary.tables.len(), 2);
        assert_eq!(summary.tables[0].name, "empty");
        assert!(summary.tables[0].index.is_none());

        let signals = &summary.tables[1];
        assert_eq!(signals.rows, 3);
        assert_eq!(signals.columns[1].name, "signal");
        assert_eq!(signals.columns[1].data_type, "float64");

        let index = signals.index.as_ref().unwrap();
        assert_eq!(index.key_columns, vec!["asset".to_string()]);
        assert_eq!(index.distinct_keys, 2);
        assert!(!index.stale);
    }
}
