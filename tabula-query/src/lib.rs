//! Textual query parsing and result rendering for tabula.
//!
//! Expressions are written in a small SQL-like language and parsed with
//! `sqlparser` before being converted into core expression trees.

mod error;
pub mod output;
mod parse;
mod sql;

pub use self::error::ParseError;
pub use self::parse::{parse_expr, parse_group_by, parse_projection, QueryText};
pub use self::sql::FilterExpr;
