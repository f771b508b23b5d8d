//! Sort-order indexes over one or more key columns.
//!
//! An index is a permutation of the table's row positions sorted by the
//! tuple of key column values, alongside the boundaries of each run of
//! equal keys. Lookups binary search the boundaries, so finding every row
//! for a key (or key prefix) is `O(log m)` in the number of distinct keys.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::column::ColumnAccess;
use crate::{EngineError, Table, TieBreak, Value};

#[derive(Debug, Clone)]
/// A run of rows in the index permutation sharing the same key.
pub struct KeyRange {
    /// The key shared by the rows.
    pub key: Box<[Value]>,
    /// The start offset of the run within the permutation.
    pub start: usize,
    /// The exclusive end offset of the run within the permutation.
    pub end: usize,
}

#[derive(Debug)]
/// A sort-order index over a table.
///
/// The index reflects the table contents at the time it was built, once
/// the table changes in a way that affects the index it is marked stale
/// and every lookup fails until it is rebuilt.
pub struct Index {
    key_columns: Vec<String>,
    permutation: Vec<usize>,
    boundaries: Vec<KeyRange>,
    stale: AtomicBool,
}

impl Index {
    /// Returns the key columns in the order they are compared.
    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    /// Returns the number of distinct keys within the index.
    pub fn distinct_keys(&self) -> usize {
        self.boundaries.len()
    }

    /// Returns the ordered key boundaries of the index.
    pub fn boundaries(&self) -> &[KeyRange] {
        &self.boundaries
    }

    /// Returns if the index has been invalidated.
    pub fn is_stale(&self) -> bool {
        self.stale.load(AtomicOrdering::Acquire)
    }

    /// Marks the index as stale.
    ///
    /// Lookups will fail with [EngineError::StaleIndex] until a new index
    /// is built.
    pub fn invalidate(&self) {
        if !self.stale.swap(true, AtomicOrdering::AcqRel) {
            debug!(key_columns = ?self.key_columns, "Index invalidated");
        }
    }

    fn ensure_fresh(&self) -> Result<(), EngineError> {
        if self.is_stale() {
            return Err(EngineError::StaleIndex {
                key_columns: self.key_columns.clone(),
            });
        }
        Ok(())
    }

    /// Returns the positions of the rows matching the given key.
    ///
    /// The key may be a prefix of the full key, in which case every row
    /// starting with that prefix matches. Rows are returned in index order.
    /// An absent key produces an empty slice.
    pub fn lookup(&self, key: &[Value]) -> Result<&[usize], EngineError> {
        self.ensure_fresh()?;

        if key.len() > self.key_columns.len() {
            return Err(EngineError::Type(format!(
                "Lookup key has {} values but the index only has {} key columns",
                key.len(),
                self.key_columns.len(),
            )));
        }

        let compare_prefix = |range: &KeyRange| range.key[..key.len()].cmp(key);
        let lower = self
            .boundaries
            .partition_point(|range| compare_prefix(range) == Ordering::Less);
        let upper = self
            .boundaries
            .partition_point(|range| compare_prefix(range) != Ordering::Greater);

        if lower == upper {
            return Ok(&[]);
        }

        let start = self.boundaries[lower].start;
        let end = self.boundaries[upper - 1].end;
        Ok(&self.permutation[start..end])
    }

    /// Returns the rows of the index grouped by the first `prefix_len`
    /// key columns, in key order.
    pub fn prefix_groups(
        &self,
        prefix_len: usize,
    ) -> Result<Vec<(&[Value], &[usize])>, EngineError> {
        self.ensure_fresh()?;

        let prefix_len = prefix_len.min(self.key_columns.len());
        let mut groups: Vec<(&[Value], &[usize])> = Vec::new();
        let mut current: Option<(&[Value], usize, usize)> = None;
        for range in self.boundaries.iter() {
            let prefix = &range.key[..prefix_len];
            match current {
                Some((key, start, _)) if key == prefix => {
                    current = Some((key, start, range.end));
                },
                _ => {
                    if let Some((key, start, end)) = current.take() {
                        groups.push((key, &self.permutation[start..end]));
                    }
                    current = Some((prefix, range.start, range.end));
                },
            }
        }
        if let Some((key, start, end)) = current {
            groups.push((key, &self.permutation[start..end]));
        }

        Ok(groups)
    }
}

#[derive(Debug, Default, Clone, Copy)]
/// Builds indexes and installs them into a table's index slot.
pub struct IndexManager {
    ties: TieBreak,
}

impl IndexManager {
    /// Creates a new manager using the given tie policy.
    pub fn new(ties: TieBreak) -> Self {
        Self { ties }
    }

    #[instrument(skip(self, table), fields(rows = table.row_count()))]
    /// Builds a new index on the given key columns and installs it on the table,
    /// replacing any existing index.
    pub fn build(
        &self,
        table: &Table,
        key_columns: &[&str],
    ) -> Result<Arc<Index>, EngineError> {
        if key_columns.is_empty() {
            return Err(EngineError::Schema(
                "An index requires at least one key column".to_string(),
            ));
        }

        let mut columns = Vec::with_capacity(key_columns.len());
        for (i, name) in key_columns.iter().enumerate() {
            if key_columns[..i].contains(name) {
                return Err(EngineError::Schema(format!(
                    "Key column {name:?} is listed more than once"
                )));
            }
            let column = table
                .column(name)
                .map_err(|_| EngineError::UnknownColumn(name.to_string()))?;
            columns.push(column);
        }

        let keys: Vec<Box<[Value]>> = (0..table.row_count())
            .map(|row| columns.iter().map(|column| column.value(row)).collect())
            .collect();

        let mut permutation: Vec<usize> = (0..table.row_count()).collect();
        match self.ties {
            // `sort_by` is stable so equal keys keep their row order.
            TieBreak::RowOrder => permutation.sort_by(|a, b| keys[*a].cmp(&keys[*b])),
            TieBreak::ReverseRowOrder => {
                permutation.sort_by(|a, b| keys[*a].cmp(&keys[*b]).then(b.cmp(a)))
            },
        }

        let mut boundaries: Vec<KeyRange> = Vec::new();
        for (offset, row) in permutation.iter().enumerate() {
            match boundaries.last_mut() {
                Some(last) if *last.key == *keys[*row] => last.end = offset + 1,
                _ => boundaries.push(KeyRange {
                    key: keys[*row].clone(),
                    start: offset,
                    end: offset + 1,
                }),
            }
        }

        debug!(distinct_keys = boundaries.len(), "Index built");

        let index = Arc::new(Index {
            key_columns: key_columns.iter().map(|name| name.to_string()).collect(),
            permutation,
            boundaries,
            stale: AtomicBool::new(false),
        });
        table.install_index(index.clone());

        Ok(index)
    }
}
