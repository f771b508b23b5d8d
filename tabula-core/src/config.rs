use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use bon::Builder;

use crate::expr::AggregateFn;

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
/// How rows sharing the same key are ordered within an index.
pub enum TieBreak {
    #[default]
    /// Rows with equal keys keep their original ascending row order.
    RowOrder,
    /// Rows with equal keys are ordered by descending row position.
    ReverseRowOrder,
}

impl Display for TieBreak {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RowOrder => f.write_str("row-order"),
            Self::ReverseRowOrder => f.write_str("reverse-row-order"),
        }
    }
}

impl FromStr for TieBreak {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "row-order" => Ok(Self::RowOrder),
            "reverse-row-order" => Ok(Self::ReverseRowOrder),
            other => Err(format!("Unknown tie policy {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Builder)]
/// Configuration options for the query engine.
///
/// These have sane defaults, every aggregate is enabled, no stage
/// timeout is applied and index ties keep their row order.
pub struct EngineConfig {
    #[builder(default)]
    /// The columns to index when a table is registered with the engine.
    ///
    /// Tables missing any of these columns are left unindexed.
    key_columns: Vec<String>,
    #[builder(default)]
    /// The ordering of rows sharing the same key within an index.
    ties: TieBreak,
    #[builder(default = AggregateFn::ALL.iter().copied().collect())]
    /// The set of aggregate functions queries are allowed to call.
    aggregate_fns: ahash::HashSet<AggregateFn>,
    /// The maximum time a single query stage may run for.
    ///
    /// This is only checked once a stage completes, a long running scan
    /// will not be interrupted part way through.
    timeout_per_stage: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl EngineConfig {
    /// Returns the default key columns to index.
    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    /// Returns the configured tie policy.
    pub fn ties(&self) -> TieBreak {
        self.ties
    }

    /// Returns if the given aggregate function may be called.
    pub fn is_aggregate_enabled(&self, func: AggregateFn) -> bool {
        self.aggregate_fns.contains(&func)
    }

    /// Returns the per-stage time budget, if any.
    pub fn timeout_per_stage(&self) -> Option<Duration> {
        self.timeout_per_stage
    }
}
