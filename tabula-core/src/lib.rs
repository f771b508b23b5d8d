mod column;
mod config;
mod datatype;
mod engine;
mod error;
pub mod expr;
mod index;
mod load;
mod table;
mod value;

pub use self::column::{Column, ColumnAccess, ColumnData, RowSelection};
pub use self::config::{EngineConfig, TieBreak};
pub use self::datatype::DataType;
pub use self::engine::{Group, Projection, Query, QueryEngine, QueryOutput, QueryStage};
pub use self::error::EngineError;
pub use self::expr::{AggregateFn, BinaryOp, Expr, NamedExpr};
pub use self::index::{Index, IndexManager, KeyRange};
pub use self::load::{DelimitedLoader, LoadError, Loader};
pub use self::table::{ColumnSpec, SharedTable, Table, View};
pub use self::value::{parse_timestamp, Value, TIMESTAMP_FORMAT};
