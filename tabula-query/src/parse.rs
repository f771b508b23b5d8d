use sqlparser::ast::{
    BinaryOperator,
    Expr as SqlExpr,
    FunctionArg,
    FunctionArgExpr,
    FunctionArguments,
    SelectItem,
    UnaryOperator,
    Value as SqlValue,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;
use tabula_core::expr::{aggregate, col, count_rows, lit};
use tabula_core::{
    parse_timestamp,
    AggregateFn,
    BinaryOp,
    Expr,
    NamedExpr,
    Projection,
    Query,
    Value,
};

use crate::ParseError;

/// Parses a single expression.
///
/// Identifiers refer to columns, numbers which fit an `i64` are integers
/// and any other number is a float.
pub fn parse_expr(text: &str) -> Result<Expr, ParseError> {
    if text.trim().is_empty() {
        return Err(ParseError::Empty("expression"));
    }

    let mut parser = Parser::new(&GenericDialect {}).try_with_sql(text)?;
    let expr = parser.parse_expr()?;
    parser.expect_token(&Token::EOF)?;
    convert(expr)
}

/// Parses a comma separated projection.
///
/// Either every item is an assignment of the form `name := expr` which
/// produces an update, or none are and the items form a select list with
/// optional `AS` aliases. A lone `*` selects every column.
pub fn parse_projection(text: &str) -> Result<Projection, ParseError> {
    let items = split_top_level(text)?;
    if items.is_empty() {
        return Err(ParseError::Empty("projection"));
    }

    if items.len() == 1 && items[0] == "*" {
        return Ok(Projection::All);
    }

    let assignments = items
        .iter()
        .filter(|item| find_assignment(item).is_some())
        .count();

    if assignments == items.len() {
        let mut exprs = Vec::with_capacity(items.len());
        for item in items {
            exprs.push(parse_assignment(item)?);
        }
        Ok(Projection::Update(exprs))
    } else if assignments == 0 {
        let mut exprs = Vec::with_capacity(items.len());
        for item in items {
            exprs.push(parse_select_item(item)?);
        }
        Ok(Projection::Select(exprs))
    } else {
        Err(ParseError::MixedProjection)
    }
}

/// Parses a comma separated list of group key columns.
pub fn parse_group_by(text: &str) -> Result<Vec<String>, ParseError> {
    let items = split_top_level(text)?;
    if items.is_empty() {
        return Err(ParseError::Empty("group key list"));
    }

    items
        .into_iter()
        .map(|item| {
            parse_identifier(item).ok_or_else(|| {
                ParseError::Syntax(format!("Expected a column name, got {item:?}"))
            })
        })
        .collect()
}

#[derive(Debug, Default, Clone)]
/// The textual parts of a query.
///
/// Missing or blank parts are treated as absent.
pub struct QueryText {
    pub filter: Option<String>,
    pub select: Option<String>,
    pub group_by: Option<String>,
}

impl QueryText {
    /// Parses every part of the query.
    pub fn parse(&self) -> Result<Query, ParseError> {
        let filter = present(&self.filter).map(parse_expr).transpose()?;
        let projection = present(&self.select)
            .map(parse_projection)
            .transpose()?
            .unwrap_or_default();
        let group_by = present(&self.group_by)
            .map(parse_group_by)
            .transpose()?
            .unwrap_or_default();

        Ok(Query::builder()
            .maybe_filter(filter)
            .projection(projection)
            .group_by(group_by)
            .build())
    }
}

impl TryFrom<&QueryText> for Query {
    type Error = ParseError;

    fn try_from(text: &QueryText) -> Result<Self, Self::Error> {
        text.parse()
    }
}

fn present(part: &Option<String>) -> Option<&str> {
    part.as_deref().filter(|text| !text.trim().is_empty())
}

fn parse_assignment(item: &str) -> Result<NamedExpr, ParseError> {
    let Some(split) = find_assignment(item) else {
        return Err(ParseError::InvalidAssignment(item.to_string()));
    };
    let (name, expr) = (&item[..split], &item[split + 2..]);
    let name = parse_identifier(name)
        .ok_or_else(|| ParseError::InvalidAssignment(item.to_string()))?;
    if expr.trim().is_empty() {
        return Err(ParseError::InvalidAssignment(item.to_string()));
    }
    Ok(parse_expr(expr)?.alias(name))
}

fn parse_select_item(item: &str) -> Result<NamedExpr, ParseError> {
    let mut parser = Parser::new(&GenericDialect {}).try_with_sql(item)?;
    let select_item = parser.parse_select_item()?;
    parser.expect_token(&Token::EOF)?;

    match select_item {
        SelectItem::UnnamedExpr(expr) => Ok(NamedExpr::unnamed(convert(expr)?)),
        SelectItem::ExprWithAlias { expr, alias } => Ok(convert(expr)?.alias(alias.value)),
        _ => Err(ParseError::Unsupported(format!(
            "{item:?}, `*` must be the only item of a projection"
        ))),
    }
}

/// Returns the offset of a top level `:=` within the item.
fn find_assignment(item: &str) -> Option<usize> {
    let mut quote = None;
    let bytes = item.as_bytes();
    for (i, byte) in bytes.iter().enumerate() {
        match (quote, byte) {
            (Some(open), byte) if open == *byte => quote = None,
            (Some(_), _) => {},
            (None, b'\'' | b'"') => quote = Some(*byte),
            (None, b':') if bytes.get(i + 1) == Some(&b'=') => return Some(i),
            _ => {},
        }
    }
    None
}

/// Splits the text on commas outside of parentheses and string literals.
fn split_top_level(text: &str) -> Result<Vec<&str>, ParseError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut quote = None;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        let quoted = quote.is_some();
        match c {
            c if quote == Some(c) => quote = None,
            '\'' | '"' if !quoted => quote = Some(c),
            '(' if !quoted => depth += 1,
            ')' if !quoted => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    ParseError::Syntax(format!("Unbalanced `)` at offset {i}"))
                })?;
            },
            ',' if !quoted && depth == 0 => {
                items.push(text[start..i].trim());
                start = i + 1;
            },
            _ => {},
        }
    }
    items.push(text[start..].trim());

    if quote.is_some() || depth != 0 {
        return Err(ParseError::Syntax(
            "Unterminated string literal or parenthesis".to_string(),
        ));
    }
    if let Some(position) = items.iter().position(|item| item.is_empty()) {
        return Err(ParseError::Syntax(format!("Item {} is empty", position + 1)));
    }

    Ok(items)
}

/// Returns the column name if the text is a single plain or double quoted
/// identifier.
fn parse_identifier(text: &str) -> Option<String> {
    let text = text.trim();
    if let Some(inner) = text.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
        return (!inner.is_empty() && !inner.contains('"')).then(|| inner.to_string());
    }

    let mut chars = text.chars();
    let first = chars.next()?;
    let valid = (first.is_alphabetic() || first == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_');
    valid.then(|| text.to_string())
}

fn convert(expr: SqlExpr) -> Result<Expr, ParseError> {
    let converted = match expr {
        SqlExpr::Identifier(ident) => col(&ident.value),
        SqlExpr::Nested(inner) => convert(*inner)?,
        SqlExpr::Value(value) => Expr::Literal(convert_value(value)?),
        SqlExpr::TypedString {
            data_type, value, ..
        } => {
            let type_name = data_type.to_string().to_ascii_uppercase();
            if type_name != "TIMESTAMP" && type_name != "DATE" {
                return Err(ParseError::Unsupported(format!(
                    "{type_name} literals are not supported"
                )));
            }
            let value = value.to_string();
            let value = value.trim_matches('\'');
            let ts = parse_timestamp(value).ok_or_else(|| {
                ParseError::Syntax(format!("Invalid timestamp literal {value:?}"))
            })?;
            lit(ts)
        },
        SqlExpr::UnaryOp { op, expr } => {
            let inner = convert(*expr)?;
            match op {
                UnaryOperator::Not => !inner,
                UnaryOperator::Plus => inner,
                UnaryOperator::Minus => negate(inner),
                other => {
                    return Err(ParseError::Unsupported(format!(
                        "Unary operator {other}"
                    )))
                },
            }
        },
        SqlExpr::BinaryOp { left, op, right } => {
            let op = match op {
                BinaryOperator::Plus => BinaryOp::Add,
                BinaryOperator::Minus => BinaryOp::Sub,
                BinaryOperator::Multiply => BinaryOp::Mul,
                BinaryOperator::Divide => BinaryOp::Div,
                BinaryOperator::Modulo => BinaryOp::Rem,
                BinaryOperator::Eq => BinaryOp::Eq,
                BinaryOperator::NotEq => BinaryOp::NotEq,
                BinaryOperator::Lt => BinaryOp::Lt,
                BinaryOperator::LtEq => BinaryOp::LtEq,
                BinaryOperator::Gt => BinaryOp::Gt,
                BinaryOperator::GtEq => BinaryOp::GtEq,
                BinaryOperator::And => BinaryOp::And,
                BinaryOperator::Or => BinaryOp::Or,
                other => {
                    return Err(ParseError::Unsupported(format!(
                        "Binary operator {other}"
                    )))
                },
            };
            convert(*left)?.binary(op, convert(*right)?)
        },
        SqlExpr::Function(function) => {
            let name = function.name.to_string();
            let func: AggregateFn = name
                .parse()
                .map_err(|_| ParseError::Unsupported(format!("Function {name:?}")))?;

            if function.over.is_some()
                || function.filter.is_some()
                || !function.within_group.is_empty()
            {
                return Err(ParseError::Unsupported(format!(
                    "Window and filter clauses on {name}"
                )));
            }

            let FunctionArguments::List(list) = function.args else {
                return Err(ParseError::Unsupported(format!(
                    "{name} must be called with a single argument"
                )));
            };
            if list.duplicate_treatment.is_some() || !list.clauses.is_empty() {
                return Err(ParseError::Unsupported(format!(
                    "DISTINCT or argument clauses within {name}"
                )));
            }
            match list.args.as_slice() {
                [FunctionArg::Unnamed(FunctionArgExpr::Wildcard)]
                    if func == AggregateFn::Count =>
                {
                    count_rows()
                },
                [FunctionArg::Unnamed(FunctionArgExpr::Expr(arg))] => {
                    aggregate(func, convert(arg.clone())?)
                },
                _ => {
                    return Err(ParseError::Unsupported(format!(
                        "{name} must be called with a single argument"
                    )))
                },
            }
        },
        other => return Err(ParseError::Unsupported(other.to_string())),
    };

    Ok(converted)
}

fn convert_value(value: SqlValue) -> Result<Value, ParseError> {
    let value = match value {
        SqlValue::Number(text, _) => match text.parse::<i64>() {
            Ok(v) => Value::Int64(v),
            Err(_) => Value::Float64(text.parse::<f64>().map_err(|_| {
                ParseError::Syntax(format!("Invalid number literal {text:?}"))
            })?),
        },
        SqlValue::SingleQuotedString(text) => Value::from(text),
        SqlValue::Boolean(v) => Value::Boolean(v),
        other => {
            return Err(ParseError::Unsupported(format!("Literal {other}")));
        },
    };
    Ok(value)
}

fn negate(expr: Expr) -> Expr {
    match expr {
        Expr::Literal(Value::Int64(v)) if v != i64::MIN => lit(-v),
        Expr::Literal(Value::Float64(v)) => lit(-v),
        other => lit(0i64) - other,
    }
}
