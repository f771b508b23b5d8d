use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};

use crate::DataType;

/// The format used when displaying and parsing timestamp values.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parses a timestamp in one of the accepted textual forms.
///
/// Accepts `YYYY-MM-DD HH:MM:SS`, the `T` separated ISO form and a plain
/// date which is taken as midnight.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

#[derive(Debug, Clone)]
/// A single scalar value held by a column, a literal or a key tuple.
///
/// Values are totally ordered so they can be used directly as index and
/// group keys:
///
/// - `Int64` and `Float64` compare numerically with each other.
/// - Floats use [f64::total_cmp] with `-0.0` folded into `0.0`, so `NaN`
///   compares equal to itself and sorts after every other number.
/// - Values of otherwise unrelated types order by their type.
pub enum Value {
    Int64(i64),
    Float64(f64),
    Text(Arc<str>),
    Timestamp(NaiveDateTime),
    Boolean(bool),
}

impl Value {
    /// Returns the data type of the value.
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Int64(_) => DataType::Int64,
            Self::Float64(_) => DataType::Float64,
            Self::Text(_) => DataType::Text,
            Self::Timestamp(_) => DataType::Timestamp,
            Self::Boolean(_) => DataType::Boolean,
        }
    }

    #[inline]
    /// Returns the value as a float if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int64(v) => Some(*v as f64),
            Self::Float64(v) => Some(*v),
            _ => None,
        }
    }

    #[inline]
    /// Returns the value as a bool if it is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    #[inline]
    /// Returns if the value is an undefined float.
    pub fn is_nan(&self) -> bool {
        matches!(self, Self::Float64(v) if v.is_nan())
    }

    fn type_rank(&self) -> u8 {
        match self {
            Self::Int64(_) | Self::Float64(_) => 0,
            Self::Text(_) => 1,
            Self::Timestamp(_) => 2,
            Self::Boolean(_) => 3,
        }
    }
}

#[inline]
fn canonical(v: f64) -> f64 {
    if v == 0.0 {
        0.0
    } else if v.is_nan() {
        f64::NAN
    } else {
        v
    }
}

/// Compares an integer with a float exactly, without rounding the integer.
fn cmp_int_float(int: i64, float: f64) -> Ordering {
    // 2^63, the first float above every i64.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;

    if float.is_nan() || float >= LIMIT {
        return Ordering::Less;
    }
    if float < -LIMIT {
        return Ordering::Greater;
    }

    let whole = float.trunc();
    int.cmp(&(whole as i64)).then_with(|| {
        if float > whole {
            Ordering::Less
        } else if float < whole {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    })
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Int64(a), Self::Int64(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (Self::Float64(a), Self::Float64(b)) => canonical(*a).total_cmp(&canonical(*b)),
            (Self::Int64(a), Self::Float64(b)) => cmp_int_float(*a, *b),
            (Self::Float64(a), Self::Int64(b)) => cmp_int_float(*b, *a).reverse(),
            (a, b) => a.type_rank().cmp(&b.type_rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_rank().hash(state);
        match self {
            // Integers hash through their float form to agree with `Eq`.
            Self::Int64(v) => canonical(*v as f64).to_bits().hash(state),
            Self::Float64(v) => canonical(*v).to_bits().hash(state),
            Self::Text(v) => v.hash(state),
            Self::Timestamp(v) => v.hash(state),
            Self::Boolean(v) => v.hash(state),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v:?}"),
            Self::Text(v) => write!(f, "{v:?}"),
            Self::Timestamp(v) => write!(f, "{}", v.format(TIMESTAMP_FORMAT)),
            Self::Boolean(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float64(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(Arc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(Arc::from(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Self::Timestamp(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rstest::rstest]
    #[case("2024-03-01 09:30:00", Some((2024, 3, 1, 9, 30)))]
    #[case("2024-03-01T09:30:00", Some((2024, 3, 1, 9, 30)))]
    #[case("2024-03-01", Some((2024, 3, 1, 0, 0)))]
    #[case("01/03/2024", None)]
    fn test_parse_timestamp(#[case] input: &str, #[case] expected: Option<(i32, u32, u32, u32, u32)>) {
        let expected = expected.map(|(y, m, d, h, min)| {
            NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(h, min, 0)
                .unwrap()
        });
        assert_eq!(parse_timestamp(input), expected);
    }

    #[rstest::rstest]
    #[case(Value::Int64(1), Value::Float64(1.0), Ordering::Equal)]
    #[case(Value::Int64(2), Value::Float64(1.5), Ordering::Greater)]
    #[case(Value::Float64(-0.0), Value::Float64(0.0), Ordering::Equal)]
    #[case(Value::Float64(f64::NAN), Value::Float64(f64::NAN), Ordering::Equal)]
    #[case(Value::Float64(f64::NAN), Value::Float64(f64::INFINITY), Ordering::Greater)]
    #[case(Value::from("A"), Value::from("B"), Ordering::Less)]
    #[case(Value::Int64(10), Value::from("A"), Ordering::Less)]
    #[case(Value::Int64(-3), Value::Float64(-2.5), Ordering::Less)]
    #[case(Value::Int64(-2), Value::Float64(-2.5), Ordering::Greater)]
    #[case(Value::Int64(0), Value::Float64(-0.0), Ordering::Equal)]
    #[case(Value::Int64(i64::MAX), Value::Float64(f64::INFINITY), Ordering::Less)]
    #[case(Value::Int64(i64::MIN), Value::Float64(-9.223372036854775808e18), Ordering::Equal)]
    #[case(Value::Int64(5), Value::Float64(f64::NAN), Ordering::Less)]
    #[case(Value::Float64(f64::NAN), Value::Int64(5), Ordering::Greater)]
    #[case(Value::Int64((1 << 53) + 1), Value::Float64(9_007_199_254_740_992.0), Ordering::Greater)]
    fn test_value_ordering(#[case] a: Value, #[case] b: Value, #[case] expected: Ordering) {
        assert_eq!(a.cmp(&b), expected, "Comparing {a} to {b}");
    }

    #[test]
    fn test_equal_values_hash_equal() {
        let state = ahash::RandomState::new();
        assert_eq!(
            state.hash_one(Value::Int64(3)),
            state.hash_one(Value::Float64(3.0)),
        );
        assert_eq!(
            state.hash_one(Value::Float64(0.0)),
            state.hash_one(Value::Float64(-0.0)),
        );
    }
}
