//! API types carrying textual expressions.
//!
//! These are parsed as part of request validation so malformed expressions
//! are rejected before a request reaches a table.

use std::borrow::Cow;

use poem_openapi::registry::{MetaSchema, MetaSchemaRef};
use poem_openapi::types::{ParseError, ParseResult};
use serde_json::{json, Value};
use tabula_core::Expr;
use tracing::debug;

use crate::parse_expr;

#[derive(Debug, Clone, PartialEq)]
/// A boolean filter expression, for example `signal > 2.5 AND asset = 'A'`.
pub struct FilterExpr(pub Expr);

impl poem_openapi::types::Type for FilterExpr {
    const IS_REQUIRED: bool = true;
    type RawValueType = Self;
    type RawElementValueType = Self;

    fn name() -> Cow<'static, str> {
        Cow::Borrowed("FilterExpr")
    }

    fn schema_ref() -> MetaSchemaRef {
        MetaSchemaRef::Inline(Box::new(MetaSchema {
            rust_typename: Some("FilterExpr"),
            format: Some("filter-expression"),
            description: Some("A boolean expression over the columns of a table"),
            example: Some(json!("signal > 2.5 AND asset = 'A'")),
            min_length: Some(1),
            ..MetaSchema::new("string")
        }))
    }

    fn as_raw_value(&self) -> Option<&Self::RawValueType> {
        Some(self)
    }

    fn raw_element_iter<'a>(
        &'a self,
    ) -> Box<dyn Iterator<Item = &'a Self::RawElementValueType> + 'a> {
        Box::new(std::iter::once(self))
    }
}

impl poem_openapi::types::ParseFromJSON for FilterExpr {
    fn parse_from_json(value: Option<Value>) -> ParseResult<Self> {
        let Value::String(value) = value.unwrap_or(Value::Null) else {
            return Err(ParseError::expected_type(Value::String(String::new())));
        };
        let expr = parse_expr(&value).map_err(|e| {
            debug!(error = %e, "Rejected filter expression");
            format!("Invalid filter: {e}")
        })?;
        Ok(Self(expr))
    }
}

impl poem_openapi::types::ToJSON for FilterExpr {
    fn to_json(&self) -> Option<Value> {
        Some(Value::String(self.0.to_string()))
    }
}
