use std::cmp::Ordering;

use super::aggregate::Accumulator;
use super::{AggregateFn, BinaryOp, Expr};
use crate::column::{ColumnAccess, ColumnData};
use crate::engine::Group;
use crate::{DataType, EngineConfig, EngineError, Table, Value, View};

#[derive(Debug, Copy, Clone)]
/// The shape of the data an expression is evaluated against.
pub enum Scope<'k> {
    /// The expression produces one value per row and may not
    /// call aggregates.
    Rows,
    /// The expression produces one value per group.
    ///
    /// Column references outside of an aggregate call must be one of
    /// the group keys.
    Groups(&'k [String]),
}

#[derive(Debug, Clone)]
/// An expression with every column resolved and every type checked
/// against a table schema.
pub struct BoundExpr {
    node: Node,
    data_type: DataType,
}

#[derive(Debug, Clone)]
enum Node {
    Column(usize),
    Key(usize),
    Literal(Value),
    Binary {
        op: BinaryOp,
        left: Box<BoundExpr>,
        right: Box<BoundExpr>,
    },
    Not(Box<BoundExpr>),
    Aggregate {
        func: AggregateFn,
        arg: Option<Box<BoundExpr>>,
    },
}

impl BoundExpr {
    #[inline]
    /// Returns the type of the values the expression produces.
    pub fn data_type(&self) -> DataType {
        self.data_type
    }
}

#[derive(Copy, Clone)]
enum Context<'g> {
    Row(usize),
    Group(&'g Group),
}

/// Evaluates expressions against the rows of a single table.
pub struct ExpressionEvaluator<'a> {
    table: &'a Table,
    config: &'a EngineConfig,
}

impl<'a> ExpressionEvaluator<'a> {
    pub fn new(table: &'a Table, config: &'a EngineConfig) -> Self {
        Self { table, config }
    }

    /// Resolves and type checks the expression for the given scope.
    ///
    /// This does not touch any row data, so errors are raised even if the
    /// expression would later be evaluated against no rows.
    pub fn bind(&self, expr: &Expr, scope: Scope<'_>) -> Result<BoundExpr, EngineError> {
        self.bind_inner(expr, scope, false)
    }

    /// Binds a row-wise expression which must produce a boolean.
    pub fn bind_predicate(&self, expr: &Expr) -> Result<BoundExpr, EngineError> {
        let bound = self.bind(expr, Scope::Rows)?;
        if bound.data_type != DataType::Boolean {
            return Err(EngineError::Type(format!(
                "Filter `{expr}` produces {} values, expected boolean",
                bound.data_type,
            )));
        }
        Ok(bound)
    }

    fn bind_inner(
        &self,
        expr: &Expr,
        scope: Scope<'_>,
        in_aggregate: bool,
    ) -> Result<BoundExpr, EngineError> {
        let bound = match expr {
            Expr::Column(name) => {
                let position = self
                    .table
                    .column_position(name)
                    .ok_or_else(|| EngineError::UnknownColumn(name.to_string()))?;
                let data_type = self.table.columns()[position].data_type();

                let node = match scope {
                    Scope::Groups(keys) if !in_aggregate => {
                        let key = keys
                            .iter()
                            .position(|key| key.as_str() == &**name)
                            .ok_or_else(|| EngineError::MixedAggregation {
                                column: name.to_string(),
                            })?;
                        Node::Key(key)
                    },
                    _ => Node::Column(position),
                };
                BoundExpr { node, data_type }
            },
            Expr::Literal(value) => BoundExpr {
                data_type: value.data_type(),
                node: Node::Literal(value.clone()),
            },
            Expr::Binary { op, left, right } => {
                let left = self.bind_inner(left, scope, in_aggregate)?;
                let right = self.bind_inner(right, scope, in_aggregate)?;
                let data_type = binary_type(*op, left.data_type, right.data_type)?;
                BoundExpr {
                    node: Node::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    data_type,
                }
            },
            Expr::Not(inner) => {
                let inner = self.bind_inner(inner, scope, in_aggregate)?;
                if inner.data_type != DataType::Boolean {
                    return Err(EngineError::Type(format!(
                        "NOT expects a boolean, got {}",
                        inner.data_type
                    )));
                }
                BoundExpr {
                    node: Node::Not(Box::new(inner)),
                    data_type: DataType::Boolean,
                }
            },
            Expr::Aggregate { func, arg } => {
                if in_aggregate {
                    return Err(EngineError::Type(format!(
                        "Aggregate `{expr}` cannot be nested within another aggregate"
                    )));
                }
                if matches!(scope, Scope::Rows) {
                    return Err(EngineError::Type(format!(
                        "Aggregate `{expr}` is not allowed in a row-wise expression"
                    )));
                }
                if !self.config.is_aggregate_enabled(*func) {
                    return Err(EngineError::DisabledAggregate(func.to_string()));
                }

                let arg = arg
                    .as_ref()
                    .map(|arg| self.bind_inner(arg, scope, true))
                    .transpose()?;
                let data_type = aggregate_type(*func, arg.as_ref().map(|a| a.data_type))?;
                BoundExpr {
                    node: Node::Aggregate {
                        func: *func,
                        arg: arg.map(Box::new),
                    },
                    data_type,
                }
            },
        };

        Ok(bound)
    }

    /// Returns the positions of the rows in the view matching the predicate,
    /// in view order.
    pub fn filter(
        &self,
        predicate: &BoundExpr,
        view: &View<'_>,
    ) -> Result<Vec<usize>, EngineError> {
        let mut matches = Vec::new();
        for row in view.positions() {
            if self.eval(predicate, Context::Row(row))?.as_bool() == Some(true) {
                matches.push(row);
            }
        }
        Ok(matches)
    }

    /// Evaluates the expression once per row at the given table positions.
    pub fn evaluate_rows(
        &self,
        expr: &BoundExpr,
        rows: impl Iterator<Item = usize>,
    ) -> Result<ColumnData, EngineError> {
        let mut data = ColumnData::with_capacity(expr.data_type, rows.size_hint().0);
        for row in rows {
            data.push(self.eval(expr, Context::Row(row))?)?;
        }
        Ok(data)
    }

    /// Evaluates the expression once per group.
    pub fn evaluate_groups(
        &self,
        expr: &BoundExpr,
        groups: &[Group],
    ) -> Result<ColumnData, EngineError> {
        let mut data = ColumnData::with_capacity(expr.data_type, groups.len());
        for group in groups {
            data.push(self.evaluate_group(expr, group)?)?;
        }
        Ok(data)
    }

    /// Evaluates the expression against a single row.
    pub fn evaluate_row(&self, expr: &BoundExpr, row: usize) -> Result<Value, EngineError> {
        self.eval(expr, Context::Row(row))
    }

    /// Evaluates the expression against a single group.
    pub fn evaluate_group(
        &self,
        expr: &BoundExpr,
        group: &Group,
    ) -> Result<Value, EngineError> {
        self.eval(expr, Context::Group(group))
    }

    fn eval(&self, expr: &BoundExpr, ctx: Context<'_>) -> Result<Value, EngineError> {
        match (&expr.node, ctx) {
            (Node::Literal(value), _) => Ok(value.clone()),
            (Node::Column(position), Context::Row(row)) => {
                Ok(self.table.columns()[*position].value(row))
            },
            (Node::Key(key), Context::Group(group)) => Ok(group.key[*key].clone()),
            (Node::Binary { op, left, right }, ctx) => {
                let left = self.eval(left, ctx)?;
                match (op, left.as_bool()) {
                    (BinaryOp::And, Some(false)) => return Ok(Value::Boolean(false)),
                    (BinaryOp::Or, Some(true)) => return Ok(Value::Boolean(true)),
                    _ => {},
                }
                let right = self.eval(right, ctx)?;
                apply_binary(*op, left, right)
            },
            (Node::Not(inner), ctx) => {
                let value = self.eval(inner, ctx)?;
                let value = value.as_bool().ok_or_else(|| {
                    EngineError::Type(format!("NOT expects a boolean, got {value}"))
                })?;
                Ok(Value::Boolean(!value))
            },
            (Node::Aggregate { func, arg }, Context::Group(group)) => {
                let arg_type = arg.as_ref().map(|a| a.data_type);
                let mut acc = Accumulator::new(*func, arg_type);
                match arg {
                    None => acc.add_rows(group.rows.len()),
                    Some(arg) => {
                        for row in group.rows.iter() {
                            acc.update(self.eval(arg, Context::Row(*row))?)?;
                        }
                    },
                }
                acc.finish()
            },
            (Node::Column(_), Context::Group(_)) => Err(EngineError::Type(
                "Column referenced outside of an aggregate in a grouped expression"
                    .to_string(),
            )),
            (Node::Key(_), Context::Row(_)) | (Node::Aggregate { .. }, Context::Row(_)) => {
                Err(EngineError::Type(
                    "Grouped expression evaluated against a single row".to_string(),
                ))
            },
        }
    }
}

fn binary_type(op: BinaryOp, left: DataType, right: DataType) -> Result<DataType, EngineError> {
    let incompatible = || {
        EngineError::Type(format!(
            "Cannot apply `{}` to {left} and {right}",
            op.symbol()
        ))
    };

    if op.is_arithmetic() {
        if !left.is_numeric() || !right.is_numeric() {
            return Err(incompatible());
        }
        let promoted = if op == BinaryOp::Div
            || left == DataType::Float64
            || right == DataType::Float64
        {
            DataType::Float64
        } else {
            DataType::Int64
        };
        return Ok(promoted);
    }

    if op.is_logical() {
        if left != DataType::Boolean || right != DataType::Boolean {
            return Err(incompatible());
        }
        return Ok(DataType::Boolean);
    }

    let comparable = left == right || (left.is_numeric() && right.is_numeric());
    if !comparable {
        return Err(incompatible());
    }
    Ok(DataType::Boolean)
}

fn aggregate_type(
    func: AggregateFn,
    arg: Option<DataType>,
) -> Result<DataType, EngineError> {
    let data_type = match (func, arg) {
        (AggregateFn::Count, _) => DataType::Int64,
        (func, None) => {
            return Err(EngineError::Type(format!("{func} requires an argument")))
        },
        (AggregateFn::Sum, Some(arg)) if arg.is_numeric() => arg,
        (AggregateFn::Mean | AggregateFn::StdDev, Some(arg)) if arg.is_numeric() => {
            DataType::Float64
        },
        (AggregateFn::Min | AggregateFn::Max, Some(arg)) => arg,
        (func, Some(arg)) => {
            return Err(EngineError::Type(format!(
                "{func} expects a numeric argument, got {arg}"
            )))
        },
    };
    Ok(data_type)
}

fn apply_binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, EngineError> {
    // A missing float is never equal to, less than or greater than anything.
    let unordered = left.is_nan() || right.is_nan();
    let ordering = || left.cmp(&right);
    let result = match op {
        BinaryOp::Eq => Value::Boolean(!unordered && ordering() == Ordering::Equal),
        BinaryOp::NotEq => Value::Boolean(unordered || ordering() != Ordering::Equal),
        BinaryOp::Lt => Value::Boolean(!unordered && ordering() == Ordering::Less),
        BinaryOp::LtEq => Value::Boolean(!unordered && ordering() != Ordering::Greater),
        BinaryOp::Gt => Value::Boolean(!unordered && ordering() == Ordering::Greater),
        BinaryOp::GtEq => Value::Boolean(!unordered && ordering() != Ordering::Less),
        BinaryOp::And | BinaryOp::Or => match (left.as_bool(), right.as_bool()) {
            (Some(l), Some(r)) if op == BinaryOp::And => Value::Boolean(l && r),
            (Some(l), Some(r)) => Value::Boolean(l || r),
            _ => {
                return Err(EngineError::Type(format!(
                    "`{}` expects booleans, got {left} and {right}",
                    op.symbol()
                )))
            },
        },
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            arithmetic(op, &left, &right)?
        },
    };
    Ok(result)
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EngineError> {
    if let (Value::Int64(a), Value::Int64(b), false) = (left, right, op == BinaryOp::Div) {
        let result = match op {
            BinaryOp::Add => a.checked_add(*b),
            BinaryOp::Sub => a.checked_sub(*b),
            BinaryOp::Mul => a.checked_mul(*b),
            _ => a.checked_rem(*b),
        };
        return result.map(Value::Int64).ok_or_else(|| {
            EngineError::Type(format!(
                "Integer overflow or division by zero evaluating {a} {} {b}",
                op.symbol()
            ))
        });
    }

    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return Err(EngineError::Type(format!(
            "Cannot apply `{}` to {left} and {right}",
            op.symbol()
        )));
    };
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        _ => a % b,
    };
    Ok(Value::Float64(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{aggregate, col, count_rows, lit};

    fn signals() -> Table {
        Table::from_columns(vec![
            ("id", ColumnData::from(vec![1i64, 2, 3, 4])),
            ("asset", ColumnData::from(vec!["A", "B", "A", "B"])),
            ("signal", ColumnData::from(vec![1.0, 2.0, 3.0, 4.0])),
            ("active", ColumnData::from(vec![true, false, true, true])),
        ])
        .unwrap()
    }

    #[rstest::rstest]
    #[case(col("id") + lit(1i64), DataType::Int64)]
    #[case(col("id") * col("signal"), DataType::Float64)]
    #[case(col("id") / lit(2i64), DataType::Float64)]
    #[case(col("signal").gt(lit(2i64)), DataType::Boolean)]
    #[case(col("asset").equals(lit("A")).and(col("active")), DataType::Boolean)]
    fn test_bind_types(#[case] expr: Expr, #[case] expected: DataType) {
        let table = signals();
        let config = EngineConfig::default();
        let evaluator = ExpressionEvaluator::new(&table, &config);
        let bound = evaluator.bind(&expr, Scope::Rows).unwrap();
        assert_eq!(bound.data_type(), expected);
    }

    #[rstest::rstest]
    #[case(col("asset") + lit(1i64), "type")]
    #[case(col("asset").gt(lit(1i64)), "type")]
    #[case(col("active").and(col("id")), "type")]
    #[case(col("price") * lit(2i64), "unknown_column")]
    #[case(aggregate(AggregateFn::Mean, col("signal")), "type")]
    fn test_bind_rows_errors(#[case] expr: Expr, #[case] kind: &str) {
        let table = signals();
        let config = EngineConfig::default();
        let evaluator = ExpressionEvaluator::new(&table, &config);
        let err = evaluator.bind(&expr, Scope::Rows).unwrap_err();
        assert_eq!(err.kind(), kind, "Unexpected error: {err}");
    }

    #[rstest::rstest]
    #[case(aggregate(AggregateFn::Mean, col("signal")) + col("signal"), "mixed_aggregation")]
    #[case(col("id"), "mixed_aggregation")]
    #[case(aggregate(AggregateFn::Sum, aggregate(AggregateFn::Sum, col("id"))), "type")]
    #[case(aggregate(AggregateFn::Mean, col("asset")), "type")]
    #[case(aggregate(AggregateFn::Sum, col("nope")), "unknown_column")]
    fn test_bind_groups_errors(#[case] expr: Expr, #[case] kind: &str) {
        let table = signals();
        let config = EngineConfig::default();
        let evaluator = ExpressionEvaluator::new(&table, &config);
        let keys = vec!["asset".to_string()];
        let err = evaluator.bind(&expr, Scope::Groups(&keys)).unwrap_err();
        assert_eq!(err.kind(), kind, "Unexpected error: {err}");
    }

    #[test]
    fn test_disabled_aggregate() {
        let table = signals();
        let config = EngineConfig::builder()
            .aggregate_fns([AggregateFn::Count].into_iter().collect())
            .build();
        let evaluator = ExpressionEvaluator::new(&table, &config);

        let keys = vec!["asset".to_string()];
        evaluator.bind(&count_rows(), Scope::Groups(&keys)).unwrap();
        let err = evaluator
            .bind(&aggregate(AggregateFn::StdDev, col("signal")), Scope::Groups(&keys))
            .unwrap_err();
        assert!(matches!(err, EngineError::DisabledAggregate(name) if name == "stddev"));
    }

    #[test]
    fn test_filter_full_scan() {
        let table = signals();
        let config = EngineConfig::default();
        let evaluator = ExpressionEvaluator::new(&table, &config);

        let predicate = evaluator
            .bind_predicate(&col("signal").gt(lit(2.5)))
            .unwrap();
        let rows = evaluator.filter(&predicate, &table.view()).unwrap();
        assert_eq!(rows, vec![2, 3]);

        let err = evaluator.bind_predicate(&col("signal")).unwrap_err();
        assert!(matches!(err, EngineError::Type(_)));
    }

    #[rstest::rstest]
    #[case(col("signal").gt(lit(1000.0)), vec![])]
    #[case(col("signal").lt(lit(1000i64)), vec![0, 2])]
    #[case(col("signal").gt_eq(lit(1.0)), vec![0, 2])]
    #[case(col("signal").lt_eq(lit(f64::INFINITY)), vec![0, 2])]
    #[case(col("signal").equals(col("signal")), vec![0, 2])]
    #[case(col("signal").not_equals(lit(3.0)), vec![0, 1])]
    fn test_missing_floats_never_compare(#[case] filter: Expr, #[case] expected: Vec<usize>) {
        let table = Table::from_columns(vec![
            ("id", ColumnData::from(vec![1i64, 2, 3])),
            ("signal", ColumnData::from(vec![1.0, f64::NAN, 3.0])),
        ])
        .unwrap();
        let config = EngineConfig::default();
        let evaluator = ExpressionEvaluator::new(&table, &config);

        let predicate = evaluator.bind_predicate(&filter).unwrap();
        let rows = evaluator.filter(&predicate, &table.view()).unwrap();
        assert_eq!(rows, expected, "Filter {filter}");
    }

    #[test]
    fn test_evaluate_rows_promotes_to_float() {
        let table = signals();
        let config = EngineConfig::default();
        let evaluator = ExpressionEvaluator::new(&table, &config);

        let bound = evaluator
            .bind(&(col("id") + col("signal")), Scope::Rows)
            .unwrap();
        let data = evaluator.evaluate_rows(&bound, [0, 3].into_iter()).unwrap();
        assert_eq!(data, ColumnData::from(vec![2.0, 8.0]));
    }

    #[test]
    fn test_integer_overflow_is_a_type_error() {
        let table = signals();
        let config = EngineConfig::default();
        let evaluator = ExpressionEvaluator::new(&table, &config);

        let bound = evaluator
            .bind(&(col("id") * lit(i64::MAX)), Scope::Rows)
            .unwrap();
        let err = evaluator.evaluate_row(&bound, 1).unwrap_err();
        assert!(matches!(err, EngineError::Type(_)));

        let bound = evaluator
            .bind(&(col("id") % lit(0i64)), Scope::Rows)
            .unwrap();
        assert!(evaluator.evaluate_row(&bound, 0).is_err());
    }

    #[test]
    fn test_short_circuit_skips_failing_right_side() {
        let table = signals();
        let config = EngineConfig::default();
        let evaluator = ExpressionEvaluator::new(&table, &config);

        let expr = col("active")
            .not_equals(lit(true))
            .and((col("id") * lit(i64::MAX)).gt(lit(0i64)));
        let bound = evaluator.bind_predicate(&expr).unwrap();
        assert_eq!(evaluator.evaluate_row(&bound, 0).unwrap(), Value::Boolean(false));
    }

    #[test]
    fn test_evaluate_group_with_key_reference() {
        let table = signals();
        let config = EngineConfig::default();
        let evaluator = ExpressionEvaluator::new(&table, &config);

        let keys = vec!["asset".to_string()];
        let group = Group {
            key: vec![Value::from("B")],
            rows: vec![1, 3],
        };

        let bound = evaluator.bind(&col("asset"), Scope::Groups(&keys)).unwrap();
        assert_eq!(evaluator.evaluate_group(&bound, &group).unwrap(), Value::from("B"));

        let expr = aggregate(AggregateFn::Mean, col("signal") * lit(2i64)) + lit(1i64);
        let bound = evaluator.bind(&expr, Scope::Groups(&keys)).unwrap();
        assert_eq!(
            evaluator.evaluate_group(&bound, &group).unwrap(),
            Value::Float64(7.0)
        );

        let bound = evaluator.bind(&count_rows(), Scope::Groups(&keys)).unwrap();
        assert_eq!(evaluator.evaluate_group(&bound, &group).unwrap(), Value::Int64(2));
    }
}
