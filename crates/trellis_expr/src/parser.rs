//! Visibility-expression grammar
//!
//! Parses the small expression subset used by `rendered` fields into an AST.
//! Supported syntax:
//!
//! - Literals: numbers, single- or double-quoted strings, `true`, `false`,
//!   `null`
//! - Dotted identifier paths: `store.user.role`
//! - Calls on a bare identifier: `add_days(now, 7)`
//! - Unary `!` and `-`, binary `* /`, `+ -`, comparisons
//!   `== != < <= > >=`, and short-circuiting `&&` / `||`
//!
//! The grammar is deliberately tiny; anything richer belongs in a custom
//! [`Evaluate`](crate::Evaluate) implementation. Parse failures are reported
//! as [`ParseError`] and callers degrade the expression to a falsy value.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till},
    character::complete::{char, multispace0},
    combinator::{all_consuming, map, opt},
    multi::{many0, separated_list0, separated_list1},
    number::complete::double,
    sequence::{delimited, pair, preceded},
    Finish, IResult,
};
use thiserror::Error;

type PResult<'a, O> = IResult<&'a str, O>;

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    /// Dotted identifier path; the head is resolved externally, the rest
    /// indexes into the resolved value
    Path(Vec<String>),
    /// Call on a bare identifier
    Call(String, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    Add,
    Sub,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

/// Error produced when an expression does not match the grammar
#[derive(Debug, Clone, Error)]
#[error("expression parse error at offset {offset}: unexpected input near \"{near}\"")]
pub struct ParseError {
    /// Byte offset of the failure in the source expression
    pub offset: usize,
    /// A short fragment around the failure point
    pub near: String,
}

/// Parse a whole expression string
pub fn parse(input: &str) -> Result<Expr, ParseError> {
    match all_consuming(ws(or_expr))(input).finish() {
        Ok((_, expr)) => Ok(expr),
        Err(err) => {
            let offset = input.len().saturating_sub(err.input.len());
            let near: String = err.input.chars().take(24).collect();
            Err(ParseError { offset, near })
        }
    }
}

fn ws<'a, O>(
    inner: impl FnMut(&'a str) -> PResult<'a, O>,
) -> impl FnMut(&'a str) -> PResult<'a, O> {
    delimited(multispace0, inner, multispace0)
}

fn or_expr(input: &str) -> PResult<'_, Expr> {
    let (input, init) = and_expr(input)?;
    let (input, rest) = many0(preceded(ws(tag("||")), and_expr))(input)?;
    Ok((input, fold_ops(init, rest, BinaryOp::Or)))
}

fn and_expr(input: &str) -> PResult<'_, Expr> {
    let (input, init) = cmp_expr(input)?;
    let (input, rest) = many0(preceded(ws(tag("&&")), cmp_expr))(input)?;
    Ok((input, fold_ops(init, rest, BinaryOp::And)))
}

fn fold_ops(init: Expr, rest: Vec<Expr>, op: BinaryOp) -> Expr {
    rest.into_iter()
        .fold(init, |acc, rhs| Expr::Binary(op, Box::new(acc), Box::new(rhs)))
}

fn cmp_expr(input: &str) -> PResult<'_, Expr> {
    let (input, init) = add_expr(input)?;
    let (input, rest) = many0(pair(ws(cmp_op), add_expr))(input)?;
    Ok((input, fold_binary(init, rest)))
}

fn cmp_op(input: &str) -> PResult<'_, BinaryOp> {
    alt((
        map(tag("<="), |_| BinaryOp::Le),
        map(tag(">="), |_| BinaryOp::Ge),
        map(tag("=="), |_| BinaryOp::Eq),
        map(tag("!="), |_| BinaryOp::Ne),
        map(tag("<"), |_| BinaryOp::Lt),
        map(tag(">"), |_| BinaryOp::Gt),
    ))(input)
}

fn add_expr(input: &str) -> PResult<'_, Expr> {
    let (input, init) = mul_expr(input)?;
    let (input, rest) = many0(pair(
        ws(alt((
            map(char('+'), |_| BinaryOp::Add),
            map(char('-'), |_| BinaryOp::Sub),
        ))),
        mul_expr,
    ))(input)?;
    Ok((input, fold_binary(init, rest)))
}

fn mul_expr(input: &str) -> PResult<'_, Expr> {
    let (input, init) = unary_expr(input)?;
    let (input, rest) = many0(pair(
        ws(alt((
            map(char('*'), |_| BinaryOp::Mul),
            map(char('/'), |_| BinaryOp::Div),
        ))),
        unary_expr,
    ))(input)?;
    Ok((input, fold_binary(init, rest)))
}

fn fold_binary(init: Expr, rest: Vec<(BinaryOp, Expr)>) -> Expr {
    rest.into_iter()
        .fold(init, |acc, (op, rhs)| Expr::Binary(op, Box::new(acc), Box::new(rhs)))
}

fn unary_expr(input: &str) -> PResult<'_, Expr> {
    alt((
        map(preceded(ws(char('!')), unary_expr), |e| {
            Expr::Unary(UnaryOp::Not, Box::new(e))
        }),
        map(preceded(ws(char('-')), unary_expr), |e| {
            Expr::Unary(UnaryOp::Neg, Box::new(e))
        }),
        primary,
    ))(input)
}

fn primary(input: &str) -> PResult<'_, Expr> {
    ws(alt((
        delimited(char('('), ws(or_expr), char(')')),
        string_literal,
        number_literal,
        call_or_path,
    )))(input)
}

fn number_literal(input: &str) -> PResult<'_, Expr> {
    // Reject `double`'s "inf"/"nan" spellings so they stay plain identifiers.
    if input.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
        map(double, Expr::Number)(input)
    } else {
        Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Float,
        )))
    }
}

fn string_literal(input: &str) -> PResult<'_, Expr> {
    let quoted = |q: char| delimited(char(q), take_till(move |c| c == q), char(q));
    map(alt((quoted('\''), quoted('"'))), |s: &str| {
        Expr::Str(s.to_string())
    })(input)
}

fn identifier(input: &str) -> PResult<'_, &str> {
    let start = input
        .chars()
        .next()
        .filter(|c| c.is_ascii_alphabetic() || *c == '_' || *c == '$');
    if start.is_none() {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Alpha,
        )));
    }
    let end = input
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '$'))
        .map(|(i, _)| i)
        .unwrap_or(input.len());
    Ok((&input[end..], &input[..end]))
}

fn call_or_path(input: &str) -> PResult<'_, Expr> {
    let (input, path) = separated_list1(char('.'), identifier)(input)?;
    // Keyword literals fall out of the identifier grammar.
    if path.len() == 1 {
        match path[0] {
            "true" => return Ok((input, Expr::Bool(true))),
            "false" => return Ok((input, Expr::Bool(false))),
            "null" => return Ok((input, Expr::Null)),
            _ => {}
        }
    }

    if path.len() == 1 {
        let (rest, args) = opt(delimited(
            ws(char('(')),
            separated_list0(ws(char(',')), or_expr),
            char(')'),
        ))(input)?;
        if let Some(args) = args {
            return Ok((rest, Expr::Call(path[0].to_string(), args)));
        }
    }

    Ok((
        input,
        Expr::Path(path.into_iter().map(str::to_string).collect()),
    ))
}
