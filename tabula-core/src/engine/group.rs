//! Partitioning of selected rows into groups of equal keys.

use ahash::HashMap;
use tracing::debug;

use crate::column::{ColumnAccess, RowSelection};
use crate::{EngineError, Table, Value};

#[derive(Debug, Clone, PartialEq)]
/// A set of rows sharing the same group key values.
pub struct Group {
    /// The group key values, one per group-by column.
    pub key: Vec<Value>,
    /// The table positions of the rows within the group.
    pub rows: Vec<usize>,
}

/// Partitions the selected rows by the given key columns.
///
/// If the table has an index whose key columns start with `keys`,
/// groups are produced in index key order, otherwise groups are produced in
/// the order their first row appears within the selection.
///
/// Without any keys every selected row forms a single group, unless no rows
/// are selected in which case there are no groups.
pub(crate) fn partition(
    table: &Table,
    rows: &RowSelection,
    keys: &[String],
) -> Result<Vec<Group>, EngineError> {
    if keys.is_empty() {
        let rows: Vec<usize> = rows.iter(table.row_count()).collect();
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        return Ok(vec![Group { key: Vec::new(), rows }]);
    }

    if let Some(index) = table.index() {
        if index.key_columns().starts_with(keys) {
            debug!(key_columns = ?index.key_columns(), "Grouping in index order");
            return partition_by_index(table, &index, rows, keys.len());
        }
    }

    partition_by_hash(table, rows, keys)
}

fn partition_by_index(
    table: &Table,
    index: &crate::Index,
    rows: &RowSelection,
    prefix_len: usize,
) -> Result<Vec<Group>, EngineError> {
    let selected = match rows {
        RowSelection::All => None,
        rows => {
            let mut mask = vec![false; table.row_count()];
            for row in rows.iter(table.row_count()) {
                mask[row] = true;
            }
            Some(mask)
        },
    };

    let groups = index
        .prefix_groups(prefix_len)?
        .into_iter()
        .filter_map(|(key, positions)| {
            let rows: Vec<usize> = match &selected {
                None => positions.to_vec(),
                Some(mask) => positions.iter().copied().filter(|p| mask[*p]).collect(),
            };
            (!rows.is_empty()).then(|| Group {
                key: key.to_vec(),
                rows,
            })
        })
        .collect();

    Ok(groups)
}

fn partition_by_hash(
    table: &Table,
    rows: &RowSelection,
    keys: &[String],
) -> Result<Vec<Group>, EngineError> {
    let columns = keys
        .iter()
        .map(|name| {
            table
                .column(name)
                .map_err(|_| EngineError::UnknownColumn(name.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut lookup: HashMap<Vec<Value>, usize> = HashMap::default();
    let mut groups: Vec<Group> = Vec::new();
    for row in rows.iter(table.row_count()) {
        let key: Vec<Value> = columns.iter().map(|column| column.value(row)).collect();
        match lookup.get(&key) {
            Some(slot) => groups[*slot].rows.push(row),
            None => {
                lookup.insert(key.clone(), groups.len());
                groups.push(Group {
                    key,
                    rows: vec![row],
                });
            },
        }
    }

    Ok(groups)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{ColumnData, IndexManager};

    fn trades() -> Table {
        Table::from_columns(vec![
            ("asset", ColumnData::from(vec!["B", "A", "B", "C", "A"])),
            ("qty", ColumnData::from(vec![1i64, 2, 3, 4, 5])),
        ])
        .unwrap()
    }

    fn keys(groups: &[Group]) -> Vec<Value> {
        groups.iter().map(|g| g.key[0].clone()).collect()
    }

    #[test]
    fn test_hash_groups_keep_first_seen_order() {
        let table = trades();
        let groups = partition(&table, &RowSelection::All, &["asset".to_string()]).unwrap();
        assert_eq!(keys(&groups), vec![Value::from("B"), Value::from("A"), Value::from("C")]);
        assert_eq!(groups[0].rows, vec![0, 2]);
        assert_eq!(groups[1].rows, vec![1, 4]);
    }

    #[test]
    fn test_index_groups_follow_key_order() {
        let table = trades();
        IndexManager::default().build(&table, &["asset"]).unwrap();

        let selection = RowSelection::Positions(Arc::from([0, 1, 2, 4]));
        let groups = partition(&table, &selection, &["asset".to_string()]).unwrap();
        assert_eq!(keys(&groups), vec![Value::from("A"), Value::from("B")]);
        assert_eq!(groups[1].rows, vec![0, 2]);
    }

    #[test]
    fn test_stale_index_fails_grouping() {
        let table = trades();
        let index = IndexManager::default().build(&table, &["asset"]).unwrap();
        index.invalidate();

        let err = partition(&table, &RowSelection::All, &["asset".to_string()]).unwrap_err();
        assert!(matches!(err, EngineError::StaleIndex { .. }));

        let groups = partition(&table, &RowSelection::All, &["qty".to_string()]).unwrap();
        assert_eq!(groups.len(), 5, "Non matching index should be ignored");
    }

    #[test]
    fn test_no_keys_forms_a_single_group() {
        let table = trades();
        let groups = partition(&table, &RowSelection::Range(1..3), &[]).unwrap();
        assert_eq!(groups, vec![Group { key: vec![], rows: vec![1, 2] }]);

        let groups = partition(&table, &RowSelection::Range(1..1), &[]).unwrap();
        assert!(groups.is_empty());
    }
}
