//! The expression language evaluated against table rows and groups.
//!
//! Expressions are a plain tree of column references, literals, operators
//! and aggregate calls. Before evaluation an expression is bound to a table
//! schema by the [ExpressionEvaluator] which resolves columns and checks types.

mod aggregate;
mod eval;

use std::fmt::{Display, Formatter};
use std::ops;
use std::str::FromStr;
use std::sync::Arc;

pub use self::eval::{BoundExpr, ExpressionEvaluator, Scope};
use crate::Value;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
/// A binary operator.
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinaryOp {
    /// Returns the textual symbol of the operator.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::And => "AND",
            Self::Or => "OR",
        }
    }

    pub(crate) fn is_arithmetic(self) -> bool {
        matches!(self, Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Rem)
    }

    pub(crate) fn is_logical(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
/// An aggregate function which reduces a group of rows to one value.
pub enum AggregateFn {
    Mean,
    StdDev,
    Count,
    Sum,
    Min,
    Max,
}

impl AggregateFn {
    /// Every supported aggregate function.
    pub const ALL: &'static [AggregateFn] = &[
        Self::Mean,
        Self::StdDev,
        Self::Count,
        Self::Sum,
        Self::Min,
        Self::Max,
    ];

    /// Returns the canonical name of the function.
    pub fn name(self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::StdDev => "stddev",
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

impl Display for AggregateFn {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AggregateFn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let func = match s.to_ascii_lowercase().as_str() {
            "mean" | "avg" => Self::Mean,
            "stddev" | "stdev" | "sd" => Self::StdDev,
            "count" => Self::Count,
            "sum" => Self::Sum,
            "min" => Self::Min,
            "max" => Self::Max,
            _ => return Err(format!("Unknown aggregate function {s:?}")),
        };
        Ok(func)
    }
}

#[derive(Debug, Clone, PartialEq)]
/// An expression tree.
pub enum Expr {
    /// A reference to a column by name.
    Column(Arc<str>),
    /// A constant value.
    Literal(Value),
    /// A binary arithmetic, comparison or logical operation.
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Logical negation.
    Not(Box<Expr>),
    /// An aggregate call, `count` may be called without an argument
    /// to count rows.
    Aggregate {
        func: AggregateFn,
        arg: Option<Box<Expr>>,
    },
}

/// Creates a column reference expression.
pub fn col(name: &str) -> Expr {
    Expr::Column(Arc::from(name))
}

/// Creates a literal expression.
pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Literal(value.into())
}

/// Creates an aggregate call over the given argument.
pub fn aggregate(func: AggregateFn, arg: Expr) -> Expr {
    Expr::Aggregate {
        func,
        arg: Some(Box::new(arg)),
    }
}

/// Creates a `count` aggregate which counts the rows of a group.
pub fn count_rows() -> Expr {
    Expr::Aggregate {
        func: AggregateFn::Count,
        arg: None,
    }
}

impl Expr {
    /// Combines two expressions with a binary operator.
    pub fn binary(self, op: BinaryOp, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    pub fn equals(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Eq, right)
    }

    pub fn not_equals(self, right: Expr) -> Expr {
        self.binary(BinaryOp::NotEq, right)
    }

    pub fn lt(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Lt, right)
    }

    pub fn lt_eq(self, right: Expr) -> Expr {
        self.binary(BinaryOp::LtEq, right)
    }

    pub fn gt(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Gt, right)
    }

    pub fn gt_eq(self, right: Expr) -> Expr {
        self.binary(BinaryOp::GtEq, right)
    }

    pub fn and(self, right: Expr) -> Expr {
        self.binary(BinaryOp::And, right)
    }

    pub fn or(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Or, right)
    }

    /// Binds the expression to an output column name.
    pub fn alias(self, name: impl Into<String>) -> NamedExpr {
        NamedExpr {
            name: name.into(),
            expr: self,
        }
    }

    /// Returns if the expression contains any aggregate calls.
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Self::Column(_) | Self::Literal(_) => false,
            Self::Binary { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            },
            Self::Not(inner) => inner.contains_aggregate(),
            Self::Aggregate { .. } => true,
        }
    }

    /// Splits a conjunction of `column = literal` tests into its parts.
    ///
    /// Returns `None` if any part of the expression is something else.
    pub fn equality_conjuncts(&self) -> Option<Vec<(&str, &Value)>> {
        match self {
            Self::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                let mut parts = left.equality_conjuncts()?;
                parts.extend(right.equality_conjuncts()?);
                Some(parts)
            },
            Self::Binary {
                op: BinaryOp::Eq,
                left,
                right,
            } => match (left.as_ref(), right.as_ref()) {
                (Self::Column(name), Self::Literal(value))
                | (Self::Literal(value), Self::Column(name)) => {
                    Some(vec![(&**name, value)])
                },
                _ => None,
            },
            _ => None,
        }
    }

    fn fmt_operand(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Binary { .. } => write!(f, "({self})"),
            _ => write!(f, "{self}"),
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Column(name) => f.write_str(name),
            Self::Literal(Value::Text(text)) => {
                write!(f, "'{}'", text.replace('\'', "''"))
            },
            Self::Literal(Value::Timestamp(ts)) => write!(f, "TIMESTAMP '{}'", Value::Timestamp(*ts)),
            Self::Literal(value) => write!(f, "{value}"),
            Self::Binary { op, left, right } => {
                left.fmt_operand(f)?;
                write!(f, " {} ", op.symbol())?;
                right.fmt_operand(f)
            },
            Self::Not(inner) => {
                f.write_str("NOT ")?;
                inner.fmt_operand(f)
            },
            Self::Aggregate { func, arg: None } => write!(f, "{func}(*)"),
            Self::Aggregate {
                func,
                arg: Some(arg),
            } => write!(f, "{func}({arg})"),
        }
    }
}

macro_rules! impl_arithmetic {
    ($trait:ident, $method:ident, $op:expr) => {
        impl ops::$trait for Expr {
            type Output = Expr;

            fn $method(self, rhs: Expr) -> Expr {
                self.binary($op, rhs)
            }
        }
    };
}

impl_arithmetic!(Add, add, BinaryOp::Add);
impl_arithmetic!(Sub, sub, BinaryOp::Sub);
impl_arithmetic!(Mul, mul, BinaryOp::Mul);
impl_arithmetic!(Div, div, BinaryOp::Div);
impl_arithmetic!(Rem, rem, BinaryOp::Rem);

impl ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}

#[derive(Debug, Clone, PartialEq)]
/// An expression bound to the name of the column it produces.
pub struct NamedExpr {
    pub name: String,
    pub expr: Expr,
}

impl NamedExpr {
    /// Creates a named expression, using the display form of the expression
    /// as its name, or the column name for plain column references.
    pub fn unnamed(expr: Expr) -> Self {
        let name = match &expr {
            Expr::Column(name) => name.to_string(),
            other => other.to_string(),
        };
        Self { name, expr }
    }
}
