mod primitive;

use std::ops::Range;
use std::sync::Arc;

pub use self::primitive::ColumnData;
use crate::{DataType, Value};

/// Accessor methods for a given column.
///
/// This provides a common abstraction over both the raw storage buffers and
/// columns which may only expose a selection of the rows of their buffer.
pub trait ColumnAccess {
    /// Returns the data type of the values.
    fn data_type(&self) -> DataType;
    /// Returns the number of logical rows.
    fn len(&self) -> usize;
    /// Returns the value at the given logical row.
    ///
    /// Panics if the row is out of bounds.
    fn value(&self, row: usize) -> Value;

    /// Returns if there are no rows.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A selection of rows within some underlying storage.
///
/// Selecting rows never copies the underlying values, position lists
/// are shared between clones.
pub enum RowSelection {
    /// Every row of the storage.
    All,
    /// A contiguous run of rows.
    Range(Range<usize>),
    /// An arbitrary list of row positions, possibly out of order.
    Positions(Arc<[usize]>),
}

impl RowSelection {
    /// Returns the number of rows selected out of a total of `total` rows.
    pub fn len(&self, total: usize) -> usize {
        match self {
            Self::All => total,
            Self::Range(range) => range.len(),
            Self::Positions(positions) => positions.len(),
        }
    }

    #[inline]
    /// Maps the nth selected row to its position in the underlying storage.
    pub fn position(&self, nth: usize) -> usize {
        match self {
            Self::All => nth,
            Self::Range(range) => range.start + nth,
            Self::Positions(positions) => positions[nth],
        }
    }

    /// Iterates the underlying positions of the selected rows in selection order.
    pub fn iter(&self, total: usize) -> impl Iterator<Item = usize> + '_ {
        let (range, positions) = match self {
            Self::All => (Some(0..total), None),
            Self::Range(range) => (Some(range.clone()), None),
            Self::Positions(positions) => (None, Some(positions.iter().copied())),
        };
        range
            .into_iter()
            .flatten()
            .chain(positions.into_iter().flatten())
    }

    /// Selects `inner` out of the rows already selected by `self`.
    ///
    /// The returned selection addresses the same storage as `self`.
    pub fn compose(&self, inner: &RowSelection) -> RowSelection {
        match (self, inner) {
            (Self::All, inner) => inner.clone(),
            (outer, Self::All) => outer.clone(),
            (Self::Range(outer), Self::Range(inner)) => {
                Self::Range(outer.start + inner.start..outer.start + inner.end)
            },
            (outer, Self::Range(inner)) => {
                Self::Positions(inner.clone().map(|nth| outer.position(nth)).collect())
            },
            (outer, Self::Positions(inner)) => {
                Self::Positions(inner.iter().map(|nth| outer.position(*nth)).collect())
            },
        }
    }
}

#[derive(Debug, Clone)]
/// A named column of a table.
///
/// The storage buffer is reference counted and may be shared with other
/// columns, for example those of a materialized view. The first write to
/// shared storage copies it, leaving every other holder untouched.
pub struct Column {
    name: Arc<str>,
    data: Arc<ColumnData>,
    rows: RowSelection,
}

impl Column {
    /// Creates a new column owning the given values.
    pub fn new(name: impl Into<Arc<str>>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            data: Arc::new(data),
            rows: RowSelection::All,
        }
    }

    #[inline]
    /// Returns the name of the column.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the underlying storage buffer.
    ///
    /// This may contain more values than the column has rows if the
    /// column only selects part of the buffer.
    pub fn storage(&self) -> &Arc<ColumnData> {
        &self.data
    }

    /// Returns the rows of the storage buffer this column selects.
    pub fn selection(&self) -> &RowSelection {
        &self.rows
    }

    /// Returns if both columns read from the same storage buffer.
    pub fn shares_storage(&self, other: &Column) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Creates a column reading the selected rows of this column without
    /// copying any values.
    pub(crate) fn select(&self, rows: &RowSelection) -> Column {
        Column {
            name: self.name.clone(),
            data: self.data.clone(),
            rows: self.rows.compose(rows),
        }
    }

    /// Copies the selected rows into a new compact buffer.
    pub fn to_dense(&self) -> ColumnData {
        match self.rows {
            RowSelection::All => self.data.as_ref().clone(),
            _ => self.data.gather(self.rows.iter(self.data.len())),
        }
    }

    /// Converts the column into a compact buffer, reusing the storage
    /// if nothing else holds it.
    pub fn into_dense(mut self) -> ColumnData {
        self.dense_mut();
        Arc::unwrap_or_clone(self.data)
    }

    /// Returns a mutable reference to storage owned solely by this column.
    ///
    /// Shared or partially selected storage is copied first.
    pub(crate) fn dense_mut(&mut self) -> &mut ColumnData {
        if self.rows != RowSelection::All {
            self.data = Arc::new(self.to_dense());
            self.rows = RowSelection::All;
        }
        Arc::make_mut(&mut self.data)
    }

    /// Keeps only the rows where `keep` is `true`.
    pub(crate) fn retain_rows(&mut self, keep: &[bool]) {
        let positions = (0..self.len()).filter(|row| keep[*row]);
        let data = self
            .data
            .gather(positions.map(|row| self.rows.position(row)));
        self.data = Arc::new(data);
        self.rows = RowSelection::All;
    }
}

impl ColumnAccess for Column {
    fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    fn len(&self) -> usize {
        self.rows.len(self.data.len())
    }

    #[inline]
    fn value(&self, row: usize) -> Value {
        self.data.value(self.rows.position(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rstest::rstest]
    #[case(RowSelection::All, RowSelection::Range(1..3), RowSelection::Range(1..3))]
    #[case(RowSelection::Range(2..6), RowSelection::Range(1..3), RowSelection::Range(3..5))]
    #[case(
        RowSelection::Range(2..6),
        RowSelection::Positions(Arc::from([3, 0])),
        RowSelection::Positions(Arc::from([5, 2]))
    )]
    #[case(
        RowSelection::Positions(Arc::from([4, 1, 0])),
        RowSelection::Range(1..3),
        RowSelection::Positions(Arc::from([1, 0]))
    )]
    #[case(RowSelection::Range(2..6), RowSelection::All, RowSelection::Range(2..6))]
    fn test_compose_selection(
        #[case] outer: RowSelection,
        #[case] inner: RowSelection,
        #[case] expected: RowSelection,
    ) {
        assert_eq!(outer.compose(&inner), expected);
    }

    #[test]
    fn test_selected_column_shares_storage() {
        let column = Column::new("signal", ColumnData::from(vec![1.0, 2.0, 3.0, 4.0]));
        let selected = column.select(&RowSelection::Positions(Arc::from([3, 1])));

        assert!(selected.shares_storage(&column));
        assert_eq!(selected.len(), 2);
        assert_eq!(selected.value(0), Value::Float64(4.0));
        assert_eq!(selected.to_dense(), ColumnData::from(vec![4.0, 2.0]));
    }

    #[test]
    fn test_dense_mut_copies_shared_storage() {
        let column = Column::new("id", ColumnData::from(vec![1i64, 2, 3]));
        let mut copy = column.clone();
        copy.dense_mut().set(0, Value::Int64(10)).unwrap();

        assert!(!copy.shares_storage(&column));
        assert_eq!(column.value(0), Value::Int64(1));
        assert_eq!(copy.value(0), Value::Int64(10));
    }
}
