//! Rate and guard expressions.
//!
//! A small arithmetic/boolean language evaluated against the current
//! marking: identifiers resolve to token counts of named places, `t` to the
//! logical time. Expressions are parsed once and kept as a tree; they
//! serialise back to source text.
use std::collections::HashMap;
use std::convert::TryFrom;
use std::fmt;

use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{alpha1, alphanumeric1, char, multispace0};
use nom::combinator::{all_consuming, map, opt, recognize, value};
use nom::multi::{fold_many0, many0_count, separated_list0};
use nom::number::complete::double;
use nom::sequence::{delimited, pair, preceded};
use nom::{IResult, Parser};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("syntax error near {found:?} at offset {offset}")]
    Syntax { found: char, offset: usize },
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unknown identifier {0:?}")]
    UnknownIdentifier(String),
    #[error("unknown function {0:?}")]
    UnknownFunction(String),
    #[error("function {name} expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("expected a {expected} value")]
    TypeMismatch { expected: &'static str },
}

/// Variable lookup used during evaluation.
pub trait Scope {
    fn lookup(&self, name: &str) -> Option<f64>;
}

impl Scope for HashMap<String, f64> {
    fn lookup(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Number(f64),
    Bool(bool),
}

impl Value {
    pub fn as_number(self) -> Result<f64, ExprError> {
        match self {
            Value::Number(n) => Ok(n),
            Value::Bool(_) => Err(ExprError::TypeMismatch { expected: "numeric" }),
        }
    }

    /// Numbers are truthy when non-zero.
    pub fn truthy(self) -> bool {
        match self {
            Value::Number(n) => n != 0.0,
            Value::Bool(b) => b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "^",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Number(f64),
    Bool(bool),
    Ident(String),
    Unary(UnaryOp, Box<Expression>),
    Binary(BinaryOp, Box<Expression>, Box<Expression>),
    Call(String, Vec<Expression>),
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        match all_consuming(preceded(multispace0, or_expr)).parse(source) {
            Ok((_, expr)) => Ok(expr),
            Err(nom::Err::Incomplete(_)) => Err(ExprError::UnexpectedEnd),
            Err(nom::Err::Error(e) | nom::Err::Failure(e)) => Err(syntax_error(source, e.input)),
        }
    }

    pub fn eval(&self, scope: &dyn Scope) -> Result<Value, ExprError> {
        match self {
            Expression::Number(n) => Ok(Value::Number(*n)),
            Expression::Bool(b) => Ok(Value::Bool(*b)),
            Expression::Ident(name) => scope
                .lookup(name)
                .map(Value::Number)
                .ok_or_else(|| ExprError::UnknownIdentifier(name.clone())),
            Expression::Unary(UnaryOp::Neg, inner) => {
                Ok(Value::Number(-inner.eval(scope)?.as_number()?))
            }
            Expression::Unary(UnaryOp::Not, inner) => Ok(Value::Bool(!inner.eval(scope)?.truthy())),
            Expression::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs, scope),
            Expression::Call(name, args) => {
                let values = args
                    .iter()
                    .map(|arg| arg.eval(scope)?.as_number())
                    .collect::<Result<Vec<_>, _>>()?;
                call(name, &values).map(Value::Number)
            }
        }
    }

    pub fn eval_number(&self, scope: &dyn Scope) -> Result<f64, ExprError> {
        self.eval(scope)?.as_number()
    }

    pub fn eval_bool(&self, scope: &dyn Scope) -> Result<bool, ExprError> {
        Ok(self.eval(scope)?.truthy())
    }

    /// Identifiers referenced anywhere in the tree, excluding function names.
    pub fn identifiers(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_identifiers(&mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    fn collect_identifiers<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expression::Number(_) | Expression::Bool(_) => {}
            Expression::Ident(name) => out.push(name),
            Expression::Unary(_, inner) => inner.collect_identifiers(out),
            Expression::Binary(_, lhs, rhs) => {
                lhs.collect_identifiers(out);
                rhs.collect_identifiers(out);
            }
            Expression::Call(_, args) => args.iter().for_each(|a| a.collect_identifiers(out)),
        }
    }
}

fn eval_binary(
    op: BinaryOp,
    lhs: &Expression,
    rhs: &Expression,
    scope: &dyn Scope,
) -> Result<Value, ExprError> {
    // 短路求值
    match op {
        BinaryOp::And => {
            return Ok(Value::Bool(
                lhs.eval(scope)?.truthy() && rhs.eval(scope)?.truthy(),
            ));
        }
        BinaryOp::Or => {
            return Ok(Value::Bool(
                lhs.eval(scope)?.truthy() || rhs.eval(scope)?.truthy(),
            ));
        }
        _ => {}
    }
    let l = lhs.eval(scope)?.as_number()?;
    let r = rhs.eval(scope)?.as_number()?;
    let value = match op {
        BinaryOp::Add => Value::Number(l + r),
        BinaryOp::Sub => Value::Number(l - r),
        BinaryOp::Mul => Value::Number(l * r),
        BinaryOp::Div => Value::Number(l / r),
        BinaryOp::Pow => Value::Number(l.powf(r)),
        BinaryOp::Lt => Value::Bool(l < r),
        BinaryOp::Le => Value::Bool(l <= r),
        BinaryOp::Gt => Value::Bool(l > r),
        BinaryOp::Ge => Value::Bool(l >= r),
        BinaryOp::Eq => Value::Bool(l == r),
        BinaryOp::Ne => Value::Bool(l != r),
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    };
    Ok(value)
}

fn call(name: &str, args: &[f64]) -> Result<f64, ExprError> {
    let arity = |expected: usize| {
        if args.len() == expected {
            Ok(())
        } else {
            Err(ExprError::Arity {
                name: name.to_string(),
                expected,
                got: args.len(),
            })
        }
    };
    match name {
        "abs" => arity(1).map(|_| args[0].abs()),
        "exp" => arity(1).map(|_| args[0].exp()),
        "ln" => arity(1).map(|_| args[0].ln()),
        "sqrt" => arity(1).map(|_| args[0].sqrt()),
        "pow" => arity(2).map(|_| args[0].powf(args[1])),
        "min" => arity(2).map(|_| args[0].min(args[1])),
        "max" => arity(2).map(|_| args[0].max(args[1])),
        // hill(x, k, n) = x^n / (k^n + x^n)
        "hill" => arity(3).map(|_| {
            let xn = args[0].max(0.0).powf(args[2]);
            let kn = args[1].powf(args[2]);
            if xn + kn == 0.0 { 0.0 } else { xn / (kn + xn) }
        }),
        // mm(s, vmax, km) = vmax * s / (km + s)
        "mm" => arity(3).map(|_| {
            let s = args[0].max(0.0);
            if args[2] + s == 0.0 {
                0.0
            } else {
                args[1] * s / (args[2] + s)
            }
        }),
        other => Err(ExprError::UnknownFunction(other.to_string())),
    }
}

impl TryFrom<&str> for Expression {
    type Error = ExprError;

    fn try_from(source: &str) -> Result<Self, Self::Error> {
        Expression::parse(source)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Number(n) if n.is_sign_negative() => write!(f, "({})", n),
            Expression::Number(n) => write!(f, "{}", n),
            Expression::Bool(b) => write!(f, "{}", b),
            Expression::Ident(name) => write!(f, "{}", name),
            Expression::Unary(UnaryOp::Neg, inner) => write!(f, "(-{})", inner),
            Expression::Unary(UnaryOp::Not, inner) => write!(f, "(!{})", inner),
            Expression::Binary(op, lhs, rhs) => write!(f, "({} {} {})", lhs, op.symbol(), rhs),
            Expression::Call(name, args) => {
                write!(f, "{}(", name)?;
                for (idx, arg) in args.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl Serialize for Expression {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Expression {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let source = String::deserialize(deserializer)?;
        Expression::parse(&source).map_err(serde::de::Error::custom)
    }
}

type Res<'a, O> = IResult<&'a str, O>;

fn ws<'a, O, P>(inner: P) -> impl Parser<&'a str, Output = O, Error = nom::error::Error<&'a str>>
where
    P: Parser<&'a str, Output = O, Error = nom::error::Error<&'a str>>,
{
    delimited(multispace0, inner, multispace0)
}

fn binary(op: BinaryOp, lhs: Expression, rhs: Expression) -> Expression {
    Expression::Binary(op, Box::new(lhs), Box::new(rhs))
}

fn or_expr(input: &str) -> Res<'_, Expression> {
    let (input, first) = and_expr(input)?;
    fold_many0(
        preceded(ws(tag("||")), and_expr),
        move || first.clone(),
        |lhs, rhs| binary(BinaryOp::Or, lhs, rhs),
    )
    .parse(input)
}

fn and_expr(input: &str) -> Res<'_, Expression> {
    let (input, first) = comparison(input)?;
    fold_many0(
        preceded(ws(tag("&&")), comparison),
        move || first.clone(),
        |lhs, rhs| binary(BinaryOp::And, lhs, rhs),
    )
    .parse(input)
}

// 比较运算不结合：`a < b < c` 是语法错误
fn comparison(input: &str) -> Res<'_, Expression> {
    let op = alt((
        value(BinaryOp::Le, tag("<=")),
        value(BinaryOp::Ge, tag(">=")),
        value(BinaryOp::Eq, tag("==")),
        value(BinaryOp::Ne, tag("!=")),
        value(BinaryOp::Lt, tag("<")),
        value(BinaryOp::Gt, tag(">")),
    ));
    let (input, lhs) = additive(input)?;
    let (input, rhs) = opt(pair(ws(op), additive)).parse(input)?;
    let expr = match rhs {
        Some((op, rhs)) => binary(op, lhs, rhs),
        None => lhs,
    };
    Ok((input, expr))
}

fn additive(input: &str) -> Res<'_, Expression> {
    let op = alt((value(BinaryOp::Add, char('+')), value(BinaryOp::Sub, char('-'))));
    let (input, first) = multiplicative(input)?;
    fold_many0(
        pair(ws(op), multiplicative),
        move || first.clone(),
        |lhs, (op, rhs)| binary(op, lhs, rhs),
    )
    .parse(input)
}

fn multiplicative(input: &str) -> Res<'_, Expression> {
    let op = alt((value(BinaryOp::Mul, char('*')), value(BinaryOp::Div, char('/'))));
    let (input, first) = unary(input)?;
    fold_many0(
        pair(ws(op), unary),
        move || first.clone(),
        |lhs, (op, rhs)| binary(op, lhs, rhs),
    )
    .parse(input)
}

fn unary(input: &str) -> Res<'_, Expression> {
    alt((
        map(preceded(ws(char('-')), unary), |e| {
            Expression::Unary(UnaryOp::Neg, Box::new(e))
        }),
        map(preceded(ws(char('!')), unary), |e| {
            Expression::Unary(UnaryOp::Not, Box::new(e))
        }),
        power,
    ))
    .parse(input)
}

// `^` binds tighter than unary minus on its left and is right associative.
fn power(input: &str) -> Res<'_, Expression> {
    let (input, base) = primary(input)?;
    let (input, exponent) = opt(preceded(ws(char('^')), unary)).parse(input)?;
    let expr = match exponent {
        Some(exponent) => binary(BinaryOp::Pow, base, exponent),
        None => base,
    };
    Ok((input, expr))
}

// 标识符先于数字尝试，否则 `inflow` 会被 `double` 读成 `inf`
fn primary(input: &str) -> Res<'_, Expression> {
    ws(alt((
        call_or_ident,
        map(double, Expression::Number),
        delimited(ws(char('(')), or_expr, char(')')),
    )))
    .parse(input)
}

fn identifier(input: &str) -> Res<'_, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0_count(alt((alphanumeric1, tag("_")))),
    ))
    .parse(input)
}

fn call_or_ident(input: &str) -> Res<'_, Expression> {
    let (input, name) = identifier(input)?;
    let arguments = delimited(
        ws(char('(')),
        separated_list0(char(','), or_expr),
        char(')'),
    );
    let (input, args) = opt(arguments).parse(input)?;
    let expr = match (name, args) {
        (_, Some(args)) => Expression::Call(name.to_string(), args),
        ("true", None) => Expression::Bool(true),
        ("false", None) => Expression::Bool(false),
        (_, None) => Expression::Ident(name.to_string()),
    };
    Ok((input, expr))
}

fn syntax_error(source: &str, rest: &str) -> ExprError {
    match rest.chars().next() {
        None => ExprError::UnexpectedEnd,
        Some(found) => ExprError::Syntax {
            found,
            offset: source.len() - rest.len(),
        },
    }
}
