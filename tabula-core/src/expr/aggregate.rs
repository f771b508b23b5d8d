//! Accumulators used to reduce the values of a group.

use std::cmp::Ordering;

use crate::expr::AggregateFn;
use crate::{DataType, EngineError, Value};

#[derive(Debug)]
/// The running state of a single aggregate call over one group.
pub(crate) enum Accumulator {
    Count(i64),
    SumInt(i64),
    SumFloat(f64),
    Mean { sum: f64, count: usize },
    /// Welford's online algorithm, the running sum of squared deviations
    /// can never go negative.
    StdDev { count: usize, mean: f64, m2: f64 },
    Min(Option<Value>),
    Max(Option<Value>),
}

impl Accumulator {
    pub(crate) fn new(func: AggregateFn, arg_type: Option<DataType>) -> Self {
        match func {
            AggregateFn::Count => Self::Count(0),
            AggregateFn::Sum if arg_type == Some(DataType::Int64) => Self::SumInt(0),
            AggregateFn::Sum => Self::SumFloat(0.0),
            AggregateFn::Mean => Self::Mean { sum: 0.0, count: 0 },
            AggregateFn::StdDev => Self::StdDev {
                count: 0,
                mean: 0.0,
                m2: 0.0,
            },
            AggregateFn::Min => Self::Min(None),
            AggregateFn::Max => Self::Max(None),
        }
    }

    /// Adds `rows` rows to a count without looking at any values.
    pub(crate) fn add_rows(&mut self, rows: usize) {
        if let Self::Count(count) = self {
            *count += rows as i64;
        }
    }

    pub(crate) fn update(&mut self, value: Value) -> Result<(), EngineError> {
        match self {
            Self::Count(count) => *count += 1,
            Self::SumInt(sum) => {
                let Value::Int64(v) = value else {
                    return Err(non_numeric("sum", &value));
                };
                *sum = sum.checked_add(v).ok_or_else(|| {
                    EngineError::Type("Integer overflow computing sum".to_string())
                })?;
            },
            Self::SumFloat(sum) => {
                *sum += value.as_f64().ok_or_else(|| non_numeric("sum", &value))?
            },
            Self::Mean { sum, count } => {
                *sum += value.as_f64().ok_or_else(|| non_numeric("mean", &value))?;
                *count += 1;
            },
            Self::StdDev { count, mean, m2 } => {
                let x = value
                    .as_f64()
                    .ok_or_else(|| non_numeric("stddev", &value))?;
                *count += 1;
                let delta = x - *mean;
                *mean += delta / *count as f64;
                *m2 += delta * (x - *mean);
            },
            Self::Min(current) => {
                if replaces(current.as_ref(), &value, Ordering::Less) {
                    *current = Some(value);
                }
            },
            Self::Max(current) => {
                if replaces(current.as_ref(), &value, Ordering::Greater) {
                    *current = Some(value);
                }
            },
        }
        Ok(())
    }

    pub(crate) fn finish(self) -> Result<Value, EngineError> {
        let value = match self {
            Self::Count(count) => Value::Int64(count),
            Self::SumInt(sum) => Value::Int64(sum),
            Self::SumFloat(sum) => Value::Float64(sum),
            Self::Mean { count: 0, .. } => Value::Float64(f64::NAN),
            Self::Mean { sum, count } => Value::Float64(sum / count as f64),
            // The sample deviation is undefined for fewer than two rows.
            Self::StdDev { count, .. } if count < 2 => Value::Float64(f64::NAN),
            Self::StdDev { count, m2, .. } => {
                Value::Float64((m2 / (count - 1) as f64).max(0.0).sqrt())
            },
            Self::Min(value) | Self::Max(value) => value.ok_or_else(|| {
                EngineError::Type("Cannot take min or max of an empty group".to_string())
            })?,
        };
        Ok(value)
    }
}

/// Returns if `value` should replace the current min or max.
///
/// Missing floats are skipped unless the group holds nothing else.
fn replaces(current: Option<&Value>, value: &Value, wanted: Ordering) -> bool {
    match current {
        None => true,
        Some(current) if current.is_nan() => !value.is_nan(),
        Some(_) if value.is_nan() => false,
        Some(current) => value.cmp(current) == wanted,
    }
}

fn non_numeric(func: &str, value: &Value) -> EngineError {
    EngineError::Type(format!(
        "{func} expects numeric values, got {}",
        value.data_type()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(func: AggregateFn, values: &[Value]) -> Value {
        let mut acc = Accumulator::new(func, values.first().map(|v| v.data_type()));
        for value in values {
            acc.update(value.clone()).unwrap();
        }
        acc.finish().unwrap()
    }

    fn floats(values: &[f64]) -> Vec<Value> {
        values.iter().copied().map(Value::Float64).collect()
    }

    #[rstest::rstest]
    #[case(AggregateFn::Mean, floats(&[1.0, 2.0, 3.0, 4.0]), 2.5)]
    #[case(AggregateFn::Sum, floats(&[1.5, 2.5]), 4.0)]
    #[case(AggregateFn::Min, floats(&[3.0, -1.0, 2.0]), -1.0)]
    #[case(AggregateFn::Max, floats(&[3.0, -1.0, 2.0]), 3.0)]
    #[case(AggregateFn::StdDev, floats(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]), 2.138089935299395)]
    fn test_float_aggregates(
        #[case] func: AggregateFn,
        #[case] values: Vec<Value>,
        #[case] expected: f64,
    ) {
        let result = run(func, &values).as_f64().unwrap();
        assert!((result - expected).abs() < 1e-9, "{func}: {result} != {expected}");
    }

    #[test]
    fn test_integer_sum_and_count() {
        let values = vec![Value::Int64(1), Value::Int64(2), Value::Int64(3)];
        assert_eq!(run(AggregateFn::Sum, &values), Value::Int64(6));
        assert_eq!(run(AggregateFn::Count, &values), Value::Int64(3));
    }

    #[test]
    fn test_integer_sum_overflow_is_an_error() {
        let mut acc = Accumulator::new(AggregateFn::Sum, Some(DataType::Int64));
        acc.update(Value::Int64(i64::MAX)).unwrap();
        let err = acc.update(Value::Int64(1)).unwrap_err();
        assert!(matches!(err, EngineError::Type(_)));
    }

    #[test]
    fn test_single_row_stddev_is_undefined() {
        let result = run(AggregateFn::StdDev, &floats(&[42.0]));
        let Value::Float64(v) = result else {
            panic!("Expected a float, got {result:?}");
        };
        assert!(v.is_nan());
    }

    #[test]
    fn test_constant_stddev_is_never_negative() {
        let result = run(AggregateFn::StdDev, &floats(&[0.1; 1000]));
        let v = result.as_f64().unwrap();
        assert!(v >= 0.0 && v < 1e-9, "Got {v}");
    }

    #[rstest::rstest]
    #[case(AggregateFn::Min, floats(&[f64::NAN, 3.0, -1.0, f64::NAN]), -1.0)]
    #[case(AggregateFn::Max, floats(&[3.0, f64::NAN, 7.5, 2.0]), 7.5)]
    #[case(AggregateFn::Max, floats(&[f64::NAN, 2.0]), 2.0)]
    fn test_min_max_skip_missing_floats(
        #[case] func: AggregateFn,
        #[case] values: Vec<Value>,
        #[case] expected: f64,
    ) {
        assert_eq!(run(func, &values), Value::Float64(expected));
    }

    #[test]
    fn test_min_max_of_only_missing_floats_is_missing() {
        let result = run(AggregateFn::Max, &floats(&[f64::NAN, f64::NAN]));
        assert!(result.is_nan(), "Got {result:?}");
    }

    #[test]
    fn test_text_min_max() {
        let values = vec![Value::from("pear"), Value::from("apple"), Value::from("zucchini")];
        assert_eq!(run(AggregateFn::Min, &values), Value::from("apple"));
        assert_eq!(run(AggregateFn::Max, &values), Value::from("zucchini"));
    }
}
