//! The query pipeline.
//!
//! A query moves through the stages in [QueryStage] order, each stage
//! either succeeds or aborts the whole query with the originating error.
//! The source table is only ever written to once every expression of an
//! update has been evaluated.

mod group;
mod stage;

use std::sync::Arc;

use bon::Builder;
use parking_lot::RwLockUpgradableReadGuard;
use tracing::{debug, instrument, warn};

pub use self::group::Group;
pub use self::stage::QueryStage;
use self::stage::StageTimer;
use crate::column::{ColumnAccess, ColumnData, RowSelection};
use crate::expr::{col, BoundExpr, Expr, ExpressionEvaluator, NamedExpr, Scope};
use crate::index::Index;
use crate::{DataType, EngineConfig, EngineError, IndexManager, SharedTable, Table, Value};

#[derive(Debug, Clone, Default, PartialEq)]
/// What a query produces from the rows it selects.
pub enum Projection {
    #[default]
    /// Every column of the selected rows.
    ///
    /// When grouped this produces the distinct group keys.
    All,
    /// A new table built from the named expressions.
    Select(Vec<NamedExpr>),
    /// Assignments written back into the source table.
    Update(Vec<NamedExpr>),
}

impl Projection {
    fn exprs(&self) -> &[NamedExpr] {
        match self {
            Self::All => &[],
            Self::Select(exprs) | Self::Update(exprs) => exprs,
        }
    }
}

#[derive(Debug, Clone, Default, Builder)]
/// A query to run against a single table.
pub struct Query {
    /// A boolean predicate rows must match.
    filter: Option<Expr>,
    #[builder(default)]
    /// The output of the query.
    projection: Projection,
    #[builder(default)]
    /// The columns to group the selected rows by.
    group_by: Vec<String>,
}

impl Query {
    pub fn filter(&self) -> Option<&Expr> {
        self.filter.as_ref()
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn group_by(&self) -> &[String] {
        &self.group_by
    }

    /// Returns if the query produces one row per group rather than per row.
    pub fn is_aggregate(&self) -> bool {
        !self.group_by.is_empty()
            || self
                .projection
                .exprs()
                .iter()
                .any(|named| named.expr.contains_aggregate())
    }
}

#[derive(Debug)]
/// The result of a query.
pub enum QueryOutput {
    /// A new table independent of the source table.
    Selected(Table),
    /// The source table after the update was applied.
    Updated {
        table: SharedTable,
        /// The names of the columns written.
        columns: Vec<String>,
        /// The number of rows assigned a value.
        rows_affected: usize,
    },
}

/// Expressions and selected rows shared by both query forms.
struct Prepared<'a> {
    outputs: Vec<(&'a str, BoundExpr)>,
    rows: RowSelection,
    groups: Option<Vec<Group>>,
}

#[derive(Debug, Default, Clone)]
/// Runs queries against shared tables.
pub struct QueryEngine {
    config: EngineConfig,
    indexes: IndexManager,
}

impl QueryEngine {
    /// Creates a new engine with the given config.
    pub fn new(config: EngineConfig) -> Self {
        let indexes = IndexManager::new(config.ties());
        Self { config, indexes }
    }

    /// Returns the engine config.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the index manager using the engine's tie policy.
    pub fn index_manager(&self) -> &IndexManager {
        &self.indexes
    }

    #[instrument(skip_all, fields(rows = table.row_count()))]
    /// Wraps the table for sharing and builds an index on the configured
    /// key columns.
    ///
    /// Key columns missing from the table are skipped, if none remain the
    /// table is left unindexed.
    pub fn register(&self, table: Table) -> Result<SharedTable, EngineError> {
        let mut keys = Vec::with_capacity(self.config.key_columns().len());
        for name in self.config.key_columns() {
            if table.column_position(name).is_some() {
                keys.push(name.as_str());
            } else {
                warn!(column = %name, "Configured key column is missing from table, skipping");
            }
        }

        if !keys.is_empty() {
            self.indexes.build(&table, &keys)?;
        }

        Ok(SharedTable::new(table))
    }

    #[instrument(skip_all)]
    /// Runs the query against the table.
    ///
    /// Select queries hold a shared lock for their whole duration. Updates
    /// evaluate under an upgradable lock and only take exclusive access to
    /// install the new columns.
    pub fn execute(
        &self,
        table: &SharedTable,
        query: &Query,
    ) -> Result<QueryOutput, EngineError> {
        match query.projection() {
            Projection::Update(assignments) => self.execute_update(table, query, assignments),
            _ => {
                let guard = table.read();
                self.execute_select(&guard, query).map(QueryOutput::Selected)
            },
        }
    }

    fn execute_select(&self, table: &Table, query: &Query) -> Result<Table, EngineError> {
        let mut timer = StageTimer::start(self.config.timeout_per_stage());
        let evaluator = ExpressionEvaluator::new(table, &self.config);

        let key_outputs: Vec<NamedExpr>;
        let outputs = match query.projection() {
            Projection::All if query.is_aggregate() => {
                key_outputs = query
                    .group_by()
                    .iter()
                    .map(|key| col(key).alias(key.as_str()))
                    .collect();
                &key_outputs
            },
            projection => projection.exprs(),
        };

        let prepared = self.prepare(table, &evaluator, query, outputs, &mut timer)?;

        let result = match (query.projection(), &prepared.groups) {
            (Projection::All, None) => {
                let view = table.slice(prepared.rows)?;
                timer.finish(QueryStage::Projected)?;
                view.materialize(&[])?
            },
            (_, Some(groups)) => {
                let mut columns = Vec::with_capacity(prepared.outputs.len());
                for (name, expr) in prepared.outputs.iter() {
                    columns.push((*name, evaluator.evaluate_groups(expr, groups)?));
                }
                timer.finish(QueryStage::Projected)?;
                Table::from_columns(columns)?
            },
            (_, None) => {
                let mut columns = Vec::with_capacity(prepared.outputs.len());
                for (name, expr) in prepared.outputs.iter() {
                    let rows = prepared.rows.iter(table.row_count());
                    columns.push((*name, evaluator.evaluate_rows(expr, rows)?));
                }
                timer.finish(QueryStage::Projected)?;
                Table::from_columns(columns)?
            },
        };

        timer.finish(QueryStage::Materialized)?;
        debug!(rows = result.row_count(), columns = result.columns().len(), "Query complete");
        Ok(result)
    }

    fn execute_update(
        &self,
        shared: &SharedTable,
        query: &Query,
        assignments: &[NamedExpr],
    ) -> Result<QueryOutput, EngineError> {
        let mut timer = StageTimer::start(self.config.timeout_per_stage());

        let guard = shared.upgradable_read();
        let (columns, rows_affected) =
            self.evaluate_update(&guard, query, assignments, &mut timer)?;

        timer.finish(QueryStage::Materialized)?;

        let mut table = RwLockUpgradableReadGuard::upgrade(guard);
        let names: Vec<String> = columns.iter().map(|(name, _)| name.clone()).collect();
        for (name, data) in columns {
            table.set_column(&name, data)?;
        }
        drop(table);

        debug!(columns = ?names, rows_affected, "Update applied");

        Ok(QueryOutput::Updated {
            table: shared.clone(),
            columns: names,
            rows_affected,
        })
    }

    fn evaluate_update(
        &self,
        table: &Table,
        query: &Query,
        assignments: &[NamedExpr],
        timer: &mut StageTimer,
    ) -> Result<(Vec<(String, ColumnData)>, usize), EngineError> {
        let evaluator = ExpressionEvaluator::new(table, &self.config);
        let prepared = self.prepare(table, &evaluator, query, assignments, timer)?;

        for (name, expr) in prepared.outputs.iter() {
            if let Ok(existing) = table.column(name) {
                let assignable = existing.data_type() == expr.data_type()
                    || (existing.data_type() == DataType::Float64
                        && expr.data_type() == DataType::Int64);
                if !assignable {
                    return Err(EngineError::Type(format!(
                        "Column {name:?} is {} and cannot be assigned {} values",
                        existing.data_type(),
                        expr.data_type(),
                    )));
                }
            }
        }

        let touched: Vec<&str> = prepared
            .outputs
            .iter()
            .map(|(name, _)| *name)
            .filter(|name| table.column_position(name).is_some())
            .collect();
        let mut base = table.view().materialize(&touched)?;

        let row_count = table.row_count();
        let mut rows_affected = 0;
        let mut columns = Vec::with_capacity(prepared.outputs.len());
        for (name, expr) in prepared.outputs.iter() {
            let mut writes: Vec<(usize, Value)> = Vec::new();
            match &prepared.groups {
                Some(groups) => {
                    for group in groups {
                        let value = evaluator.evaluate_group(expr, group)?;
                        writes.extend(group.rows.iter().map(|row| (*row, value.clone())));
                    }
                },
                None => {
                    for row in prepared.rows.iter(row_count) {
                        writes.push((row, evaluator.evaluate_row(expr, row)?));
                    }
                },
            }
            rows_affected = writes.len();

            let data = if base.column_position(name).is_some() {
                let mut data = base.drop_column(name)?.into_dense();
                for (row, value) in writes {
                    data.set(row, value)?;
                }
                data
            } else {
                new_column(name, expr.data_type(), row_count, writes)?
            };
            columns.push((name.to_string(), data));
        }

        timer.finish(QueryStage::Updated)?;
        Ok((columns, rows_affected))
    }

    /// Runs the parse, filter and group stages shared by both query forms.
    fn prepare<'q>(
        &self,
        table: &Table,
        evaluator: &ExpressionEvaluator<'_>,
        query: &Query,
        outputs: &'q [NamedExpr],
        timer: &mut StageTimer,
    ) -> Result<Prepared<'q>, EngineError> {
        for (i, key) in query.group_by().iter().enumerate() {
            if table.column_position(key).is_none() {
                return Err(EngineError::UnknownColumn(key.clone()));
            }
            if query.group_by()[..i].contains(key) {
                return Err(EngineError::Schema(format!(
                    "Group key {key:?} is listed more than once"
                )));
            }
        }

        let scope = if query.is_aggregate() {
            Scope::Groups(query.group_by())
        } else {
            Scope::Rows
        };

        let filter = query
            .filter()
            .map(|expr| evaluator.bind_predicate(expr))
            .transpose()?;

        let mut bound = Vec::with_capacity(outputs.len());
        for (i, named) in outputs.iter().enumerate() {
            if outputs[..i].iter().any(|other| other.name == named.name) {
                return Err(EngineError::Schema(format!(
                    "Output column {:?} is produced more than once",
                    named.name
                )));
            }
            bound.push((named.name.as_str(), evaluator.bind(&named.expr, scope)?));
        }
        timer.finish(QueryStage::Parsed)?;

        let rows = match (query.filter(), filter) {
            (Some(expr), Some(predicate)) => {
                match table.index().and_then(|index| index_key(&index, expr).map(|k| (index, k))) {
                    Some((index, key)) => {
                        debug!(key_columns = ?index.key_columns(), "Filtering with index lookup");
                        RowSelection::Positions(Arc::from(index.lookup(&key)?))
                    },
                    None => {
                        debug!("Filtering with full scan");
                        RowSelection::Positions(Arc::from(
                            evaluator.filter(&predicate, &table.view())?,
                        ))
                    },
                }
            },
            _ => RowSelection::Range(0..table.row_count()),
        };
        timer.finish(QueryStage::Filtered)?;

        let groups = match scope {
            Scope::Groups(keys) => {
                let groups = group::partition(table, &rows, keys)?;
                timer.finish(QueryStage::Grouped)?;
                Some(groups)
            },
            Scope::Rows => None,
        };

        Ok(Prepared {
            outputs: bound,
            rows,
            groups,
        })
    }
}

/// Assembles the lookup key for an equality filter whose columns are
/// exactly a prefix of the index key columns.
fn index_key(index: &Index, filter: &Expr) -> Option<Vec<Value>> {
    let conjuncts = filter.equality_conjuncts()?;

    let mut key: Vec<Value> = Vec::new();
    for key_column in index.key_columns() {
        let mut matching = conjuncts
            .iter()
            .filter(|(column, _)| *column == key_column.as_str())
            .map(|(_, value)| *value);
        let Some(value) = matching.next() else {
            break;
        };
        // A missing float never matches, the scan handles that.
        if value.is_nan() || matching.any(|other| other != value) {
            return None;
        }
        key.push(value.clone());
    }

    let covered = &index.key_columns()[..key.len()];
    let all_covered = conjuncts
        .iter()
        .all(|(column, _)| covered.iter().any(|key| key.as_str() == *column));
    (!key.is_empty() && all_covered).then_some(key)
}

/// Builds a brand new column from the rows written by an update.
///
/// Rows without a value are only allowed for float columns where
/// they are left undefined.
fn new_column(
    name: &str,
    data_type: DataType,
    row_count: usize,
    writes: Vec<(usize, Value)>,
) -> Result<ColumnData, EngineError> {
    let mut slots: Vec<Option<Value>> = vec![None; row_count];
    for (row, value) in writes {
        slots[row] = Some(value);
    }

    let mut data = ColumnData::with_capacity(data_type, row_count);
    for slot in slots {
        match slot {
            Some(value) => data.push(value)?,
            None if data_type == DataType::Float64 => data.push(Value::Float64(f64::NAN))?,
            None => {
                return Err(EngineError::Schema(format!(
                    "New {data_type} column {name:?} must be assigned a value for every row"
                )))
            },
        }
    }

    Ok(data)
}
