//! Nom-based parser for column formulas.
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! expression := term (('+' | '-') term)*
//! term       := unary (('*' | '/') unary)*
//! unary      := ('-' | '+') unary | power
//! power      := primary ('^' unary)?          right-associative
//! primary    := number | identifier | identifier '(' args ')' | '(' expression ')'
//! ```
//!
//! `-2^2` is `-(2^2)`, and `2^-1` is accepted.

use nom::{
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::{char, multispace0, one_of},
    combinator::{all_consuming, map, opt, recognize, value},
    error::ErrorKind,
    multi::{fold_many0, separated_list0},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};
use std::cell::Cell;
use thiserror::Error;

use crate::ast::{BinaryOp, Expr, UnaryOp};

#[derive(Debug, Clone, PartialEq, Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

/// Deepest nesting of parentheses, signs and exponents accepted
pub const MAX_NESTING: usize = 64;

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Run `parser` one nesting level deeper, failing once [`MAX_NESTING`] is exceeded
fn nested<'a, O>(
    input: &'a str,
    parser: impl FnOnce(&'a str) -> IResult<&'a str, O>,
) -> IResult<&'a str, O> {
    let depth = DEPTH.with(|d| {
        d.set(d.get() + 1);
        d.get()
    });
    let result = if depth > MAX_NESTING {
        Err(nom::Err::Failure(nom::error::Error::new(
            input,
            ErrorKind::TooLarge,
        )))
    } else {
        parser(input)
    };
    DEPTH.with(|d| d.set(d.get() - 1));
    result
}

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

/// Decimal number with optional fraction and exponent; the sign belongs to the unary rule
fn parse_number(input: &str) -> IResult<&str, Expr> {
    let (input, text) = recognize(tuple((
        take_while1(|c: char| c.is_ascii_digit()),
        opt(pair(char('.'), take_while(|c: char| c.is_ascii_digit()))),
        opt(tuple((
            one_of("eE"),
            opt(one_of("+-")),
            take_while1(|c: char| c.is_ascii_digit()),
        ))),
    )))(input)?;

    let number: f64 = text.parse().unwrap_or(f64::NAN);
    Ok((input, Expr::Number(number)))
}

fn parse_identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

/// Either a function call or a bare variable
fn parse_variable_or_call(input: &str) -> IResult<&str, Expr> {
    let (after_name, name) = parse_identifier(input)?;
    let (rest, _) = multispace0(after_name)?;

    if let Ok((rest, _)) = char::<&str, nom::error::Error<&str>>('(')(rest) {
        let (rest, args) = separated_list0(ws(char(',')), parse_expression)(rest)?;
        let (rest, _) = preceded(multispace0, char(')'))(rest)?;
        return Ok((
            rest,
            Expr::FunctionCall {
                name: name.to_lowercase(),
                args,
            },
        ));
    }

    Ok((after_name, Expr::Variable(name.to_string())))
}

fn parse_primary(input: &str) -> IResult<&str, Expr> {
    let (input, _) = multispace0(input)?;

    alt((
        map(
            delimited(char('('), parse_expression, preceded(multispace0, char(')'))),
            |e| Expr::Grouped(Box::new(e)),
        ),
        parse_number,
        parse_variable_or_call,
    ))(input)
}

/// Power binds tighter than unary minus on its left, looser on its right
fn parse_power(input: &str) -> IResult<&str, Expr> {
    let (input, base) = parse_primary(input)?;
    let (input, _) = multispace0(input)?;

    if let Ok((input, _)) = char::<&str, nom::error::Error<&str>>('^')(input) {
        let (input, exponent) = parse_unary(input)?;
        Ok((input, Expr::binary(base, BinaryOp::Pow, exponent)))
    } else {
        Ok((input, base))
    }
}

fn parse_unary(input: &str) -> IResult<&str, Expr> {
    nested(input, |input| {
        let (input, _) = multispace0(input)?;

        alt((
            map(preceded(char('-'), parse_unary), |e| {
                Expr::unary(UnaryOp::Neg, e)
            }),
            map(preceded(char('+'), parse_unary), |e| {
                Expr::unary(UnaryOp::Pos, e)
            }),
            parse_power,
        ))(input)
    })
}

fn parse_multiplicative_op(input: &str) -> IResult<&str, BinaryOp> {
    alt((
        value(BinaryOp::Mul, char('*')),
        value(BinaryOp::Div, char('/')),
    ))(input)
}

fn parse_additive_op(input: &str) -> IResult<&str, BinaryOp> {
    alt((
        value(BinaryOp::Add, char('+')),
        value(BinaryOp::Sub, char('-')),
    ))(input)
}

fn parse_multiplicative(input: &str) -> IResult<&str, Expr> {
    let (input, init) = parse_unary(input)?;

    fold_many0(
        pair(ws(parse_multiplicative_op), parse_unary),
        move || init.clone(),
        |acc, (op, val)| Expr::binary(acc, op, val),
    )(input)
}

fn parse_additive(input: &str) -> IResult<&str, Expr> {
    let (input, init) = parse_multiplicative(input)?;

    fold_many0(
        pair(ws(parse_additive_op), parse_multiplicative),
        move || init.clone(),
        |acc, (op, val)| Expr::binary(acc, op, val),
    )(input)
}

fn parse_expression(input: &str) -> IResult<&str, Expr> {
    parse_additive(input)
}

/// Formula parser
#[derive(Debug, Default, Clone, Copy)]
pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a whole expression; trailing input is an error
    pub fn parse(&self, input: &str) -> Result<Expr, ParseError> {
        if input.trim().is_empty() {
            return Err(ParseError {
                message: "empty expression".to_string(),
                position: 0,
            });
        }

        DEPTH.with(|d| d.set(0));
        match all_consuming(ws(parse_expression))(input) {
            Ok((_, expr)) => Ok(expr),
            Err(nom::Err::Failure(e)) if e.code == ErrorKind::TooLarge => Err(ParseError {
                message: format!("expression nested deeper than {} levels", MAX_NESTING),
                position: input.len() - e.input.len(),
            }),
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                let position = input.len() - e.input.len();
                let near: String = e.input.chars().take(10).collect();
                Err(ParseError {
                    message: if near.is_empty() {
                        "unexpected end of expression".to_string()
                    } else {
                        format!("unexpected input near '{}'", near)
                    },
                    position,
                })
            }
            Err(nom::Err::Incomplete(_)) => Err(ParseError {
                message: "incomplete expression".to_string(),
                position: input.len(),
            }),
        }
    }
}
