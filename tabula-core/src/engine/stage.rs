use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::EngineError;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
/// A step of the query pipeline.
pub enum QueryStage {
    /// Expressions are bound and type checked against the table schema.
    Parsed,
    /// The rows matching the filter are selected.
    Filtered,
    /// The selected rows are partitioned by the group keys.
    Grouped,
    /// A select list is evaluated into new columns.
    Projected,
    /// Assignments are evaluated into updated columns.
    Updated,
    /// The output table is assembled.
    Materialized,
}

impl Display for QueryStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Parsed => "parsed",
            Self::Filtered => "filtered",
            Self::Grouped => "grouped",
            Self::Projected => "projected",
            Self::Updated => "updated",
            Self::Materialized => "materialized",
        };
        f.write_str(name)
    }
}

/// Tracks the time spent in each stage against an optional budget.
pub(crate) struct StageTimer {
    budget: Option<Duration>,
    started: Instant,
}

impl StageTimer {
    pub(crate) fn start(budget: Option<Duration>) -> Self {
        Self {
            budget,
            started: Instant::now(),
        }
    }

    /// Completes the given stage and starts timing the next.
    pub(crate) fn finish(&mut self, stage: QueryStage) -> Result<(), EngineError> {
        let elapsed = self.started.elapsed();
        debug!(%stage, elapsed = ?elapsed, "Stage complete");

        if let Some(budget) = self.budget {
            if elapsed > budget {
                return Err(EngineError::Timeout {
                    stage,
                    elapsed,
                    budget,
                });
            }
        }

        self.started = Instant::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_over_budget_times_out() {
        let mut timer = StageTimer::start(Some(Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(5));
        let err = timer.finish(QueryStage::Filtered).unwrap_err();
        assert!(
            matches!(err, EngineError::Timeout { stage: QueryStage::Filtered, .. }),
            "Got {err}"
        );
    }

    #[test]
    fn test_stage_without_budget_never_times_out() {
        let mut timer = StageTimer::start(None);
        std::thread::sleep(Duration::from_millis(2));
        timer.finish(QueryStage::Parsed).unwrap();
        timer.finish(QueryStage::Materialized).unwrap();
    }
}
