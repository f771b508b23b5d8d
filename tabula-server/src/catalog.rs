use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tabula_core::{DelimitedLoader, LoadError, Loader, QueryEngine, SharedTable};
use tokio::task::JoinError;
use tracing::{info, instrument};

/// The set of named tables served by the API.
///
/// Tables are loaded from a single directory when the catalog is opened,
/// each `*.csv` file becomes a table named after the file stem and is
/// registered with the engine, which indexes the configured key columns.
pub struct Catalog {
    engine: Arc<QueryEngine>,
    tables: Arc<RwLock<ahash::HashMap<String, SharedTable>>>,
}

impl Catalog {
    /// Creates an empty catalog.
    pub fn new(engine: Arc<QueryEngine>) -> Self {
        Self {
            engine,
            tables: Arc::default(),
        }
    }

    #[instrument(skip(engine))]
    /// Opens the catalog, loading every CSV file within the given directory.
    pub async fn open(path: PathBuf, engine: Arc<QueryEngine>) -> Result<Self, CatalogError> {
        let catalog = Self::new(engine);

        let mut entries = tokio::fs::read_dir(&path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_path = entry.path();
            let is_csv = file_path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
            let Some(name) = file_path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !is_csv || !entry.file_type().await?.is_file() {
                continue;
            }

            let name = name.to_string();
            info!(table = %name, path = %file_path.display(), "Attempting to load table");
            catalog.load_file(name, file_path).await?;
        }

        info!(tables = catalog.len(), "Catalog is ready");
        Ok(catalog)
    }

    /// Loads the table stored in the file and registers it under the given name,
    /// replacing any existing table with the same name.
    pub async fn load_file(&self, name: String, path: PathBuf) -> Result<(), CatalogError> {
        let engine = self.engine.clone();
        let table = tokio::task::spawn_blocking(move || load_table(&engine, &path))
            .await?
            .map_err(|source| CatalogError::Load {
                table: name.clone(),
                source,
            })?;

        self.insert(name, table);
        Ok(())
    }

    /// Adds a table to the catalog, replacing any existing table with the same name.
    pub fn insert(&self, name: impl Into<String>, table: SharedTable) {
        self.tables.write().insert(name.into(), table);
    }

    /// Returns a clone of the [SharedTable] if it exists.
    pub fn table(&self, name: &str) -> Option<SharedTable> {
        self.tables.read().get(name).cloned()
    }

    /// Returns every table sorted by name.
    pub fn tables(&self) -> Vec<(String, SharedTable)> {
        let mut tables: Vec<_> = self
            .tables
            .read()
            .iter()
            .map(|(name, table)| (name.clone(), table.clone()))
            .collect();
        tables.sort_by(|a, b| a.0.cmp(&b.0));
        tables
    }

    /// Returns the number of tables.
    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    /// Returns if the catalog holds no tables.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the engine queries are run with.
    pub fn engine(&self) -> &Arc<QueryEngine> {
        &self.engine
    }
}

fn load_table(engine: &QueryEngine, path: &Path) -> Result<SharedTable, LoadError> {
    let table = DelimitedLoader::default().load_path(path)?;
    Ok(engine.register(table)?)
}

#[derive(Debug, thiserror::Error)]
/// An error that can occur while opening the catalog.
pub enum CatalogError {
    #[error("IO Error: {0}")]
    /// The data directory could not be read.
    Io(#[from] io::Error),
    #[error("Failed to load table {table:?}: {source}")]
    /// One of the table files could not be loaded.
    Load {
        table: String,
        #[source]
        source: LoadError,
    },
    #[error("Background load failed: {0}")]
    /// The blocking task loading a table panicked or was cancelled.
    Background(#[from] JoinError),
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tabula_core::{ColumnAccess, ColumnData, EngineConfig, Table, Value};

    use super::*;

    fn write_tables(dir: &Path) {
        fs::write(
            dir.join("signals.csv"),
            "id,asset,signal\n1,A,1.0\n2,B,2.0\n3,A,3.0\n4,B,4.0\n",
        )
        .unwrap();
        fs::write(dir.join("assets.CSV"), "asset,venue\nA,x\nB,y\n").unwrap();
        fs::write(dir.join("notes.txt"), "not a table").unwrap();
    }

    #[tokio::test]
    async fn test_open_loads_csv_files() {
        let dir = tempfile::tempdir().unwrap();
        write_tables(dir.path());

        let engine = Arc::new(QueryEngine::default());
        let catalog = Catalog::open(dir.path().to_path_buf(), engine).await.unwrap();

        let names: Vec<String> = catalog.tables().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["assets".to_string(), "signals".to_string()]);

        let signals = catalog.table("signals").unwrap();
        let guard = signals.read();
        assert_eq!(guard.row_count(), 4);
        assert_eq!(guard.column("asset").unwrap().value(2), Value::from("A"));
        assert!(guard.index().is_none());
    }

    #[tokio::test]
    async fn test_open_indexes_configured_keys() {
        let dir = tempfile::tempdir().unwrap();
        write_tables(dir.path());

        let config = EngineConfig::builder()
            .key_columns(vec!["asset".to_string()])
            .build();
        let engine = Arc::new(QueryEngine::new(config));
        let catalog = Catalog::open(dir.path().to_path_buf(), engine).await.unwrap();

        for (name, table) in catalog.tables() {
            let index = table.read().index();
            let index = index.unwrap_or_else(|| panic!("Table {name} should be indexed"));
            assert_eq!(index.key_columns(), &["asset".to_string()]);
            assert_eq!(index.distinct_keys(), 2);
        }
    }

    #[tokio::test]
    async fn test_open_reports_malformed_table() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.csv"), "a,b\n1,2,3\n").unwrap();

        let err = Catalog::open(dir.path().to_path_buf(), Arc::new(QueryEngine::default()))
            .await
            .err()
            .expect("Catalog should fail to open");
        assert!(
            matches!(&err, CatalogError::Load { table, source: LoadError::Malformed { line: 2, .. } } if table == "broken"),
            "Got {err}"
        );
    }

    #[tokio::test]
    async fn test_open_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");

        let err = Catalog::open(missing, Arc::new(QueryEngine::default()))
            .await
            .err()
            .expect("Catalog should fail to open");
        assert!(matches!(err, CatalogError::Io(_)), "Got {err}");
    }

    #[test]
    fn test_insert_replaces_table() {
        let catalog = Catalog::new(Arc::new(QueryEngine::default()));
        assert!(catalog.is_empty());

        let first = SharedTable::new(Table::from_columns(vec![("id", ColumnData::from(vec![1i64]))]).unwrap());
        let second = SharedTable::new(Table::from_columns(vec![("id", ColumnData::from(vec![2i64]))]).unwrap());
        catalog.insert("t", first);
        catalog.insert("t", second.clone());

        assert_eq!(catalog.len(), 1);
        assert!(catalog.table("t").unwrap().ptr_eq(&second));
        assert!(catalog.table("other").is_none());
    }
}
