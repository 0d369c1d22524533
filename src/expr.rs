//! Small expression language used by mappings and loop characteristics.
//!
//! Supports variable paths (`order.items`), JSON-style literals, arrays,
//! and `+ - * /` arithmetic. This is deliberately not a full expression
//! language; every operation the container processors need (called-element
//! ids, input collections, loop items, output expressions) fits in this
//! grammar. Evaluation failures are returned as [`Failure`] values, never
//! panics.

use nom::branch::alt;
use nom::bytes::complete::{is_not, tag};
use nom::character::complete::{alpha1, alphanumeric1, char, digit1, multispace0};
use nom::combinator::{map, opt, recognize, value};
use nom::multi::{many0, separated_list0};
use nom::sequence::{delimited, pair, preceded, tuple};
use nom::IResult;
use serde_json::{Number, Value};

use crate::domain::Failure;

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Variable path: name plus zero or more field accesses
    Path(Vec<String>),
    Array(Vec<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Resolves a top-level variable name to its value in some scope.
pub trait VariableResolver {
    fn resolve(&self, name: &str) -> Option<Value>;
}

impl<F> VariableResolver for F
where
    F: Fn(&str) -> Option<Value>,
{
    fn resolve(&self, name: &str) -> Option<Value> {
        self(name)
    }
}

/// Parse and evaluate an expression against the given resolver.
pub fn evaluate(source: &str, resolver: &dyn VariableResolver) -> Result<Value, Failure> {
    parse(source)?.eval(resolver)
}

/// Parse an expression without evaluating it.
pub fn parse(source: &str) -> Result<Expr, Failure> {
    match expression(source) {
        Ok((rest, expr)) if rest.trim().is_empty() => Ok(expr),
        Ok((rest, _)) => Err(Failure::expression(format!(
            "Unexpected trailing input '{}' in expression '{}'",
            rest.trim(),
            source
        ))),
        Err(_) => Err(Failure::expression(format!(
            "Failed to parse expression '{}'",
            source
        ))),
    }
}

impl Expr {
    /// Evaluate the tree. Unknown variables and type mismatches are
    /// expression failures.
    pub fn eval(&self, resolver: &dyn VariableResolver) -> Result<Value, Failure> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Path(segments) => {
                let name = &segments[0];
                let mut current = resolver.resolve(name).ok_or_else(|| {
                    Failure::expression(format!("No variable named '{}' in scope", name))
                })?;
                for segment in &segments[1..] {
                    current = match current {
                        Value::Object(mut map) => map.remove(segment).ok_or_else(|| {
                            Failure::expression(format!(
                                "No field '{}' on variable '{}'",
                                segment, name
                            ))
                        })?,
                        other => {
                            return Err(Failure::expression(format!(
                                "Cannot access field '{}' of non-object value {}",
                                segment, other
                            )))
                        }
                    };
                }
                Ok(current)
            }
            Expr::Array(items) => items
                .iter()
                .map(|item| item.eval(resolver))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Expr::Binary { op, left, right } => {
                let left = left.eval(resolver)?;
                let right = right.eval(resolver)?;
                arithmetic(*op, &left, &right)
            }
        }
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, Failure> {
    let (Value::Number(l), Value::Number(r)) = (left, right) else {
        return Err(Failure::expression(format!(
            "Arithmetic requires numbers, got {} and {}",
            left, right
        )));
    };

    if let (Some(l), Some(r)) = (l.as_i64(), r.as_i64()) {
        let result = match op {
            BinaryOp::Add => l.checked_add(r),
            BinaryOp::Sub => l.checked_sub(r),
            BinaryOp::Mul => l.checked_mul(r),
            BinaryOp::Div => {
                if r == 0 {
                    None
                } else {
                    l.checked_div(r)
                }
            }
        };
        return result.map(Value::from).ok_or_else(|| {
            Failure::expression(format!("Integer arithmetic failed on {} and {}", l, r))
        });
    }

    let (l, r) = (l.as_f64().unwrap_or(f64::NAN), r.as_f64().unwrap_or(f64::NAN));
    let result = match op {
        BinaryOp::Add => l + r,
        BinaryOp::Sub => l - r,
        BinaryOp::Mul => l * r,
        BinaryOp::Div => l / r,
    };
    Number::from_f64(result)
        .map(Value::Number)
        .ok_or_else(|| Failure::expression(format!("Non-finite result from {} and {}", l, r)))
}

// ── grammar ──

fn expression(input: &str) -> IResult<&str, Expr> {
    let (input, first) = term(input)?;
    let (input, rest) = many0(pair(
        ws(alt((
            value(BinaryOp::Add, char('+')),
            value(BinaryOp::Sub, char('-')),
        ))),
        term,
    ))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn term(input: &str) -> IResult<&str, Expr> {
    let (input, first) = primary(input)?;
    let (input, rest) = many0(pair(
        ws(alt((
            value(BinaryOp::Mul, char('*')),
            value(BinaryOp::Div, char('/')),
        ))),
        primary,
    ))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn fold_binary(first: Expr, rest: Vec<(BinaryOp, Expr)>) -> Expr {
    rest.into_iter().fold(first, |left, (op, right)| Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

fn primary(input: &str) -> IResult<&str, Expr> {
    ws(alt((
        parens,
        array,
        string_literal,
        number,
        keyword,
        path,
    )))(input)
}

fn parens(input: &str) -> IResult<&str, Expr> {
    delimited(char('('), expression, ws(char(')')))(input)
}

fn array(input: &str) -> IResult<&str, Expr> {
    map(
        delimited(
            char('['),
            separated_list0(ws(char(',')), expression),
            ws(char(']')),
        ),
        Expr::Array,
    )(input)
}

fn string_literal(input: &str) -> IResult<&str, Expr> {
    map(
        delimited(char('"'), opt(is_not("\"")), char('"')),
        |content: Option<&str>| Expr::Literal(Value::String(content.unwrap_or_default().to_string())),
    )(input)
}

fn number(input: &str) -> IResult<&str, Expr> {
    map(
        recognize(tuple((
            opt(char('-')),
            digit1,
            opt(pair(char('.'), digit1)),
        ))),
        |text: &str| {
            let value = if text.contains('.') {
                Number::from_f64(text.parse().unwrap_or(f64::NAN))
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            } else {
                text.parse::<i64>().map(Value::from).unwrap_or(Value::Null)
            };
            Expr::Literal(value)
        },
    )(input)
}

fn keyword(input: &str) -> IResult<&str, Expr> {
    alt((
        value(Expr::Literal(Value::Bool(true)), tag("true")),
        value(Expr::Literal(Value::Bool(false)), tag("false")),
        value(Expr::Literal(Value::Null), tag("null")),
    ))(input)
}

fn path(input: &str) -> IResult<&str, Expr> {
    map(
        pair(identifier, many0(preceded(char('.'), identifier))),
        |(first, rest)| {
            let mut segments = vec![first.to_string()];
            segments.extend(rest.into_iter().map(str::to_string));
            Expr::Path(segments)
        },
    )(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))(input)
}

fn ws<'a, O>(
    inner: impl FnMut(&'a str) -> IResult<&'a str, O>,
) -> impl FnMut(&'a str) -> IResult<&'a str, O> {
    preceded(multispace0, inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope(name: &str) -> Option<Value> {
        match name {
            "item" => Some(json!(21)),
            "items" => Some(json!([1, 2, 3])),
            "order" => Some(json!({"id": "A-1", "total": 99.5})),
            _ => None,
        }
    }

    #[test]
    fn test_literals() {
        assert_eq!(evaluate("42", &scope).unwrap(), json!(42));
        assert_eq!(evaluate("-7", &scope).unwrap(), json!(-7));
        assert_eq!(evaluate("2.5", &scope).unwrap(), json!(2.5));
        assert_eq!(evaluate("\"billing\"", &scope).unwrap(), json!("billing"));
        assert_eq!(evaluate("true", &scope).unwrap(), json!(true));
        assert_eq!(evaluate("null", &scope).unwrap(), Value::Null);
        assert_eq!(evaluate("[1, 2, 3]", &scope).unwrap(), json!([1, 2, 3]));
    }

    #[test]
    fn test_variable_paths() {
        assert_eq!(evaluate("item", &scope).unwrap(), json!(21));
        assert_eq!(evaluate("order.id", &scope).unwrap(), json!("A-1"));

        let failure = evaluate("missing", &scope).unwrap_err();
        assert!(failure.message.contains("missing"));
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(evaluate("item * 2", &scope).unwrap(), json!(42));
        assert_eq!(evaluate("item + 1", &scope).unwrap(), json!(22));
        assert_eq!(evaluate("(item - 1) * 2", &scope).unwrap(), json!(40));
        assert_eq!(evaluate("order.total * 2", &scope).unwrap(), json!(199.0));
    }

    #[test]
    fn test_arithmetic_type_errors() {
        assert!(evaluate("order.id * 2", &scope).is_err());
        assert!(evaluate("items / 0", &scope).is_err());
    }

    #[test]
    fn test_trailing_input_rejected() {
        assert!(evaluate("item item", &scope).is_err());
        assert!(evaluate("1 +", &scope).is_err());
    }
}
