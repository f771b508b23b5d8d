use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::EngineError;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
/// The data type of a column.
///
/// The type of a column is fixed when the column is created, these types
/// have no concept of nested structures or nullability.
pub enum DataType {
    Int64,
    Float64,
    Text,
    Timestamp,
    Boolean,
}

impl DataType {
    #[inline]
    /// Returns if arithmetic can be applied to values of this type.
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int64 | Self::Float64)
    }

    /// Returns the canonical name of the type.
    pub fn name(self) -> &'static str {
        match self {
            Self::Int64 => "int64",
            Self::Float64 => "float64",
            Self::Text => "text",
            Self::Timestamp => "timestamp",
            Self::Boolean => "boolean",
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dtype = match s.to_ascii_lowercase().as_str() {
            "int64" | "bigint" | "integer" | "int" => Self::Int64,
            "float64" | "double" | "float" => Self::Float64,
            "text" | "string" => Self::Text,
            "timestamp" | "datetime" => Self::Timestamp,
            "boolean" | "bool" => Self::Boolean,
            _ => return Err(EngineError::Schema(format!("Unrecognized column type {s:?}"))),
        };
        Ok(dtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rstest::rstest]
    #[case("int64", Some(DataType::Int64))]
    #[case("BIGINT", Some(DataType::Int64))]
    #[case("double", Some(DataType::Float64))]
    #[case("String", Some(DataType::Text))]
    #[case("datetime", Some(DataType::Timestamp))]
    #[case("bool", Some(DataType::Boolean))]
    #[case("ipv6", None)]
    #[case("", None)]
    fn test_parse_data_type(#[case] name: &str, #[case] expected: Option<DataType>) {
        let parsed = name.parse::<DataType>().ok();
        assert_eq!(parsed, expected, "Unexpected parse result for {name:?}");
    }
}
