use std::ops::Range;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::column::{Column, ColumnAccess, ColumnData, RowSelection};
use crate::index::Index;
use crate::{DataType, EngineError, Value};

#[derive(Debug, Clone)]
/// The definition of a single column used to create a table.
pub struct ColumnSpec {
    name: String,
    data_type: String,
    values: Vec<Value>,
}

impl ColumnSpec {
    /// Creates a new column spec.
    ///
    /// The type name is resolved when the table is created, see [DataType]
    /// for the recognised names.
    pub fn new(
        name: impl Into<String>,
        data_type: impl Into<String>,
        values: Vec<Value>,
    ) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            values,
        }
    }
}

#[derive(Debug)]
/// An ordered set of equally sized, uniquely named columns.
///
/// A table holds a single index slot, the index in the slot is
/// invalidated whenever the table is mutated in a way that affects it.
pub struct Table {
    columns: Vec<Column>,
    row_count: usize,
    index: RwLock<Option<Arc<Index>>>,
}

impl Table {
    /// Creates a new table from a set of column specs.
    ///
    /// Returns a [EngineError::Schema] if the column names collide,
    /// a type is not recognised or a value does not match its column type.
    pub fn create(specs: Vec<ColumnSpec>) -> Result<Self, EngineError> {
        let mut columns = Vec::with_capacity(specs.len());
        for spec in specs {
            let data_type = spec.data_type.parse::<DataType>()?;
            let data = ColumnData::from_values(data_type, spec.values).map_err(|e| {
                EngineError::Schema(format!("Column {:?}: {e}", spec.name))
            })?;
            columns.push((spec.name, data));
        }
        Self::from_columns(columns)
    }

    /// Creates a new table from named column buffers.
    pub fn from_columns<N: Into<Arc<str>>>(
        columns: Vec<(N, ColumnData)>,
    ) -> Result<Self, EngineError> {
        let columns: Vec<Column> = columns
            .into_iter()
            .map(|(name, data)| Column::new(name, data))
            .collect();
        Self::from_parts(columns)
    }

    fn from_parts(columns: Vec<Column>) -> Result<Self, EngineError> {
        for (i, column) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name() == column.name()) {
                return Err(EngineError::Schema(format!(
                    "Duplicate column name {:?}",
                    column.name()
                )));
            }
        }

        let row_count = columns.first().map(|c| c.len()).unwrap_or(0);
        if let Some(column) = columns.iter().find(|c| c.len() != row_count) {
            return Err(EngineError::LengthMismatch {
                column: column.name().to_string(),
                expected: row_count,
                actual: column.len(),
            });
        }

        Ok(Self {
            columns,
            row_count,
            index: RwLock::new(None),
        })
    }

    #[inline]
    /// Returns the number of rows in the table.
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Returns the columns of the table in order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Returns the names and types of the columns in order.
    pub fn schema(&self) -> Vec<(&str, DataType)> {
        self.columns
            .iter()
            .map(|c| (c.name(), c.data_type()))
            .collect()
    }

    /// Returns the position of the column with the given name.
    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    /// Returns the column with the given name.
    pub fn column(&self, name: &str) -> Result<&Column, EngineError> {
        self.column_position(name)
            .map(|i| &self.columns[i])
            .ok_or_else(|| EngineError::column_not_found(name))
    }

    /// Returns the currently installed index, if any.
    ///
    /// The index may be stale.
    pub fn index(&self) -> Option<Arc<Index>> {
        self.index.read().clone()
    }

    pub(crate) fn install_index(&self, index: Arc<Index>) {
        let mut slot = self.index.write();
        if let Some(previous) = slot.replace(index) {
            previous.invalidate();
        }
    }

    fn invalidate_index_if(&self, affected: impl FnOnce(&Index) -> bool) {
        if let Some(index) = self.index.read().as_ref() {
            if affected(index) {
                index.invalidate();
            }
        }
    }

    /// Returns a view of every row of the table.
    pub fn view(&self) -> View<'_> {
        View {
            table: self,
            rows: RowSelection::All,
        }
    }

    /// Returns a view of the selected rows.
    ///
    /// This never copies any column data, ranges are checked in `O(1)`
    /// and position lists in `O(k)`.
    pub fn slice(&self, rows: RowSelection) -> Result<View<'_>, EngineError> {
        let out_of_bounds = match &rows {
            RowSelection::All => None,
            RowSelection::Range(range) => {
                (range.end > self.row_count || range.start > range.end)
                    .then(|| range.end)
            },
            RowSelection::Positions(positions) => positions
                .iter()
                .copied()
                .find(|position| *position >= self.row_count),
        };

        if let Some(position) = out_of_bounds {
            return Err(EngineError::NotFound {
                kind: "row",
                name: position.to_string(),
            });
        }

        Ok(View { table: self, rows })
    }

    /// Replaces the values of an existing column or appends a new column.
    ///
    /// An existing column keeps its type, attempting to replace it with values
    /// of a different type is a [EngineError::Type].
    pub fn set_column(&mut self, name: &str, data: ColumnData) -> Result<(), EngineError> {
        if data.len() != self.row_count && !self.columns.is_empty() {
            return Err(EngineError::LengthMismatch {
                column: name.to_string(),
                expected: self.row_count,
                actual: data.len(),
            });
        }

        match self.column_position(name) {
            Some(position) => {
                let existing = self.columns[position].data_type();
                if existing != data.data_type() {
                    return Err(EngineError::Type(format!(
                        "Column {name:?} is {existing} and cannot be assigned {} values",
                        data.data_type(),
                    )));
                }
                self.columns[position] = Column::new(name, data);
                self.invalidate_index_if(|index| {
                    index.key_columns().iter().any(|key| key == name)
                });
            },
            None => {
                self.row_count = data.len();
                self.columns.push(Column::new(name, data));
            },
        }

        debug!(column = name, "Column set");
        Ok(())
    }

    /// Removes the column with the given name from the table.
    pub fn drop_column(&mut self, name: &str) -> Result<Column, EngineError> {
        let position = self
            .column_position(name)
            .ok_or_else(|| EngineError::column_not_found(name))?;
        let column = self.columns.remove(position);
        self.invalidate_index_if(|index| index.key_columns().iter().any(|key| key == name));
        Ok(column)
    }

    /// Appends a single row of values, one per column, to the table.
    pub fn append_row(&mut self, values: Vec<Value>) -> Result<(), EngineError> {
        if values.len() != self.columns.len() {
            return Err(EngineError::LengthMismatch {
                column: "<row>".to_string(),
                expected: self.columns.len(),
                actual: values.len(),
            });
        }

        for (column, value) in self.columns.iter().zip(values.iter()) {
            let accepted = column.data_type() == value.data_type()
                || (column.data_type() == DataType::Float64
                    && value.data_type() == DataType::Int64);
            if !accepted {
                return Err(EngineError::Type(format!(
                    "Column {:?} is {} and cannot store {value}",
                    column.name(),
                    column.data_type(),
                )));
            }
        }

        for (column, value) in self.columns.iter_mut().zip(values) {
            column.dense_mut().push(value)?;
        }
        self.row_count += 1;
        self.invalidate_index_if(|_| true);

        Ok(())
    }

    /// Deletes the rows at the given positions, returning the number of rows removed.
    pub fn delete_rows(&mut self, positions: &[usize]) -> Result<usize, EngineError> {
        if let Some(position) = positions.iter().find(|p| **p >= self.row_count) {
            return Err(EngineError::NotFound {
                kind: "row",
                name: position.to_string(),
            });
        }

        let mut keep = vec![true; self.row_count];
        for position in positions {
            keep[*position] = false;
        }
        let removed = keep.iter().filter(|keep| !**keep).count();
        if removed == 0 {
            return Ok(0);
        }

        for column in self.columns.iter_mut() {
            column.retain_rows(&keep);
        }
        self.row_count -= removed;
        self.invalidate_index_if(|_| true);

        Ok(removed)
    }

    /// Iterates the rows within the given range, clamped to the table size.
    pub fn rows(&self, range: Range<usize>) -> impl Iterator<Item = Vec<Value>> + '_ {
        let end = range.end.min(self.row_count);
        let start = range.start.min(end);
        (start..end).map(|row| self.columns.iter().map(|c| c.value(row)).collect())
    }
}

#[derive(Debug, Clone)]
/// A selection of rows of a table.
///
/// A view borrows the columns of its table and never copies them.
/// Writes go through [View::materialize] which copies only the
/// columns about to be written.
pub struct View<'a> {
    table: &'a Table,
    rows: RowSelection,
}

impl<'a> View<'a> {
    /// Returns the table the view reads from.
    pub fn table(&self) -> &'a Table {
        self.table
    }

    /// Returns the selected rows.
    pub fn selection(&self) -> &RowSelection {
        &self.rows
    }

    /// Returns the number of rows in the view.
    pub fn len(&self) -> usize {
        self.rows.len(self.table.row_count())
    }

    /// Returns if the view has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates the table row positions selected by the view.
    pub fn positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.rows.iter(self.table.row_count())
    }

    /// Creates an independent table from the view.
    ///
    /// Columns named in `touched` are about to be written and are copied into
    /// new storage. Every other column shares storage with the source table.
    pub fn materialize(&self, touched: &[&str]) -> Result<Table, EngineError> {
        let columns = self
            .table
            .columns()
            .iter()
            .map(|column| {
                let selected = column.select(&self.rows);
                if touched.contains(&column.name()) {
                    Column::new(column.name(), selected.to_dense())
                } else {
                    selected
                }
            })
            .collect();

        Table::from_parts(columns)
    }
}

#[derive(Debug, Clone)]
/// A table that can be cheaply cloned and shared between callers.
///
/// Read-only queries hold a shared lock, updates hold an upgradable lock
/// while evaluating and only take exclusive access to apply their writes.
pub struct SharedTable(Arc<RwLock<Table>>);

impl SharedTable {
    /// Wraps the given table.
    pub fn new(table: Table) -> Self {
        Self(Arc::new(RwLock::new(table)))
    }

    /// Acquires shared read access to the table.
    pub fn read(&self) -> RwLockReadGuard<'_, Table> {
        self.0.read()
    }

    /// Acquires exclusive write access to the table.
    pub fn write(&self) -> RwLockWriteGuard<'_, Table> {
        self.0.write()
    }

    /// Acquires read access which can later be upgraded to write access.
    ///
    /// Only one upgradable guard may exist at a time.
    pub fn upgradable_read(&self) -> RwLockUpgradableReadGuard<'_, Table> {
        self.0.upgradable_read()
    }

    /// Returns if both handles refer to the same table.
    pub fn ptr_eq(&self, other: &SharedTable) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<Table> for SharedTable {
    fn from(table: Table) -> Self {
        Self::new(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IndexManager;

    fn signals() -> Table {
        Table::create(vec![
            ColumnSpec::new(
                "id",
                "int64",
                vec![1i64.into(), 2i64.into(), 3i64.into(), 4i64.into()],
            ),
            ColumnSpec::new(
                "asset",
                "text",
                vec!["A".into(), "B".into(), "A".into(), "B".into()],
            ),
            ColumnSpec::new(
                "signal",
                "float64",
                vec![1.0.into(), 2.0.into(), 3.0.into(), 4.0.into()],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_create_table() {
        let table = signals();
        assert_eq!(table.row_count(), 4);
        assert_eq!(
            table.schema(),
            vec![
                ("id", DataType::Int64),
                ("asset", DataType::Text),
                ("signal", DataType::Float64),
            ]
        );
        assert_eq!(table.column("asset").unwrap().value(1), Value::from("B"));
    }

    #[rstest::rstest]
    #[case(
        vec![
            ColumnSpec::new("id", "int64", vec![1i64.into()]),
            ColumnSpec::new("id", "text", vec!["a".into()]),
        ],
        "schema"
    )]
    #[case(vec![ColumnSpec::new("id", "decimal", vec![1i64.into()])], "schema")]
    #[case(vec![ColumnSpec::new("id", "int64", vec!["a".into()])], "schema")]
    #[case(
        vec![
            ColumnSpec::new("id", "int64", vec![1i64.into(), 2i64.into()]),
            ColumnSpec::new("name", "text", vec!["a".into()]),
        ],
        "length_mismatch"
    )]
    fn test_create_table_errors(#[case] specs: Vec<ColumnSpec>, #[case] kind: &str) {
        let err = Table::create(specs).unwrap_err();
        assert_eq!(err.kind(), kind, "Unexpected error: {err}");
    }

    #[test]
    fn test_missing_column_not_found() {
        let table = signals();
        let err = table.column("price").unwrap_err();
        assert!(matches!(err, EngineError::NotFound { kind: "column", .. }));
    }

    #[test]
    fn test_set_column_append_and_replace() {
        let mut table = signals();
        table
            .set_column("doubled", ColumnData::from(vec![2.0, 4.0, 6.0, 8.0]))
            .unwrap();
        assert_eq!(table.columns().len(), 4);

        table
            .set_column("signal", ColumnData::from(vec![0.0, 0.0, 0.0, 0.0]))
            .unwrap();
        assert_eq!(table.column("signal").unwrap().value(3), Value::Float64(0.0));
    }

    #[test]
    fn test_set_column_errors() {
        let mut table = signals();

        let err = table
            .set_column("signal", ColumnData::from(vec![1.0]))
            .unwrap_err();
        assert!(matches!(err, EngineError::LengthMismatch { expected: 4, actual: 1, .. }));

        let err = table
            .set_column("signal", ColumnData::from(vec!["a", "b", "c", "d"]))
            .unwrap_err();
        assert!(matches!(err, EngineError::Type(_)), "Got {err}");
    }

    #[test]
    fn test_key_column_mutation_invalidates_index() {
        let mut table = signals();
        let index = IndexManager::default().build(&table, &["asset"]).unwrap();

        table
            .set_column("signal", ColumnData::from(vec![9.0, 9.0, 9.0, 9.0]))
            .unwrap();
        assert!(!index.is_stale(), "Non key columns should not invalidate");

        table
            .set_column("asset", ColumnData::from(vec!["C", "C", "C", "C"]))
            .unwrap();
        assert!(index.is_stale());
    }

    #[test]
    fn test_row_count_changes_invalidate_index() {
        let mut table = signals();
        let manager = IndexManager::default();

        let index = manager.build(&table, &["id"]).unwrap();
        table
            .append_row(vec![5i64.into(), "C".into(), 5i64.into()])
            .unwrap();
        assert!(index.is_stale());
        assert_eq!(table.row_count(), 5);
        assert_eq!(table.column("signal").unwrap().value(4), Value::Float64(5.0));

        let index = manager.build(&table, &["id"]).unwrap();
        assert_eq!(table.delete_rows(&[0, 2]).unwrap(), 2);
        assert!(index.is_stale());
        assert_eq!(table.row_count(), 3);
        let ids: Vec<Value> = table.rows(0..10).map(|row| row[0].clone()).collect();
        assert_eq!(ids, vec![Value::Int64(2), Value::Int64(4), Value::Int64(5)]);
    }

    #[test]
    fn test_append_row_rejects_bad_rows_without_partial_writes() {
        let mut table = signals();
        let err = table
            .append_row(vec![5i64.into(), 1i64.into(), 5.0.into()])
            .unwrap_err();
        assert!(matches!(err, EngineError::Type(_)));
        assert_eq!(table.row_count(), 4);
        assert_eq!(table.column("id").unwrap().len(), 4);

        let err = table.append_row(vec![5i64.into()]).unwrap_err();
        assert!(matches!(err, EngineError::LengthMismatch { .. }));
    }

    #[rstest::rstest]
    #[case(RowSelection::Range(1..3), 2)]
    #[case(RowSelection::Positions(Arc::from([3, 0, 0])), 3)]
    #[case(RowSelection::All, 4)]
    fn test_slice(#[case] rows: RowSelection, #[case] expected_len: usize) {
        let table = signals();
        let view = table.slice(rows).unwrap();
        assert_eq!(view.len(), expected_len);
    }

    #[rstest::rstest]
    #[case(RowSelection::Range(2..5))]
    #[case(RowSelection::Positions(Arc::from([1, 4])))]
    fn test_slice_out_of_bounds(#[case] rows: RowSelection) {
        let table = signals();
        let err = table.slice(rows).unwrap_err();
        assert!(matches!(err, EngineError::NotFound { kind: "row", .. }));
    }

    #[test]
    fn test_materialize_copies_only_touched_columns() {
        let table = signals();
        let view = table.slice(RowSelection::Positions(Arc::from([2, 3]))).unwrap();

        let mut materialized = view.materialize(&["signal"]).unwrap();
        assert_eq!(materialized.row_count(), 2);

        let source_id = table.column("id").unwrap();
        let source_signal = table.column("signal").unwrap();
        assert!(materialized.column("id").unwrap().shares_storage(source_id));
        assert!(materialized.column("asset").unwrap().shares_storage(table.column("asset").unwrap()));
        assert!(!materialized.column("signal").unwrap().shares_storage(source_signal));

        materialized
            .set_column("signal", ColumnData::from(vec![-1.0, -1.0]))
            .unwrap();
        materialized
            .set_column("id", ColumnData::from(vec![0i64, 0]))
            .unwrap();

        assert_eq!(
            source_signal.to_dense(),
            ColumnData::from(vec![1.0, 2.0, 3.0, 4.0])
        );
        assert_eq!(
            table.column("id").unwrap().to_dense(),
            ColumnData::from(vec![1i64, 2, 3, 4])
        );
        assert_eq!(
            materialized.column("asset").unwrap().to_dense(),
            ColumnData::from(vec!["A", "B"])
        );
    }

    #[test]
    fn test_rows_iterator_is_bounded() {
        let table = signals();
        let rows: Vec<Vec<Value>> = table.rows(3..100).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][1], Value::from("B"));
        assert_eq!(table.rows(10..20).count(), 0);
    }
}
