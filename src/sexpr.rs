//! S-expression reader for the IR surface syntax.
//!
//! Tokens are parentheses, whitespace-separated atoms and `;` line comments. An atom
//! that reads entirely as a number (decimal, exponent or `0x` hexadecimal, with an
//! optional `s` suffix for the short form) becomes a number; every other atom is an
//! identifier, so `native.i64.add`, `<=` and `1+` are all identifiers.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag_no_case, take_while1},
    character::complete::{char, hex_digit1, multispace0, multispace1, not_line_ending},
    combinator::{all_consuming, map_res, opt, recognize, value},
    error::ErrorKind,
    multi::many0,
    number::complete::recognize_float,
    sequence::{delimited, pair, preceded, terminated},
};

use crate::ast::{NumberType, Value};
use crate::{MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

/// Reader settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseConfig {
    /// Treat `;` as the start of a line comment
    pub handle_comments: bool,
    /// Maximum list nesting
    pub max_depth: usize,
}

impl Default for ParseConfig {
    fn default() -> Self {
        ParseConfig {
            handle_comments: true,
            max_depth: MAX_PARSE_DEPTH,
        }
    }
}

/// Convert nom parsing errors to structured parse errors
fn parse_error_to_message(
    input: &str,
    error: nom::Err<nom::error::Error<&str>>,
    config: &ParseConfig,
) -> ParseError {
    match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let position = input.len().saturating_sub(e.input.len());
            let (kind, message) = match e.code {
                ErrorKind::TooLarge => (
                    ParseErrorKind::TooDeeplyNested,
                    format!(
                        "Expression too deeply nested (max depth: {})",
                        config.max_depth
                    ),
                ),
                _ if e.input.trim_start().is_empty() => (
                    ParseErrorKind::Incomplete,
                    "Unexpected end of input (unclosed parenthesis?)".to_owned(),
                ),
                _ if e.input.starts_with(')') => (
                    ParseErrorKind::InvalidSyntax,
                    format!("Unexpected ')' at position {position}"),
                ),
                _ => (
                    ParseErrorKind::InvalidSyntax,
                    format!("Invalid syntax at position {position}"),
                ),
            };
            ParseError::with_context(kind, message, input, position)
        }
        nom::Err::Incomplete(_) => {
            ParseError::from_message(ParseErrorKind::Incomplete, "Incomplete input")
        }
    }
}

fn line_comment(input: &str) -> IResult<&str, &str> {
    recognize(pair(char(';'), not_line_ending)).parse(input)
}

/// Skip whitespace and, when enabled, comments
fn skip_trivia<'a>(input: &'a str, config: &ParseConfig) -> IResult<&'a str, ()> {
    if config.handle_comments {
        value((), many0(alt((multispace1, line_comment)))).parse(input)
    } else {
        value((), multispace0).parse(input)
    }
}

/// Read an atom as a number; `None` means it is an identifier
fn parse_number(token: &str) -> Option<NumberType> {
    let hexadecimal = map_res(
        (opt(char('-')), tag_no_case("0x"), hex_digit1),
        |(sign, _, digits): (Option<char>, &str, &str)| {
            u64::from_str_radix(digits, 16).map(|n| {
                let n = n as NumberType;
                if sign.is_some() { -n } else { n }
            })
        },
    );
    let decimal = map_res(recognize_float, |text: &str| text.parse::<NumberType>());

    let result: IResult<&str, NumberType> =
        all_consuming(terminated(alt((hexadecimal, decimal)), opt(char('s')))).parse(token);
    result.ok().map(|(_, n)| n)
}

fn parse_atom<'a>(input: &'a str, config: &ParseConfig) -> IResult<&'a str, Value> {
    let comments = config.handle_comments;
    let (rest, token) = take_while1(|c: char| {
        !c.is_whitespace() && c != '(' && c != ')' && !(comments && c == ';')
    })
    .parse(input)?;

    let atom = match parse_number(token) {
        Some(n) => Value::Number(n),
        None => Value::Symbol(token.to_owned()),
    };
    Ok((rest, atom))
}

fn parse_list<'a>(input: &'a str, config: &ParseConfig, depth: usize) -> IResult<&'a str, Value> {
    let (input, elements) = delimited(
        char('('),
        many0(|input| parse_expr(input, config, depth + 1)),
        preceded(|input| skip_trivia(input, config), char(')')),
    )
    .parse(input)?;
    Ok((input, Value::List(elements)))
}

fn parse_expr<'a>(input: &'a str, config: &ParseConfig, depth: usize) -> IResult<&'a str, Value> {
    if depth >= config.max_depth {
        // Failure, so enclosing repetitions report it instead of backtracking
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            ErrorKind::TooLarge,
        )));
    }
    preceded(
        |input| skip_trivia(input, config),
        alt((
            |input| parse_list(input, config, depth),
            |input| parse_atom(input, config),
        )),
    )
    .parse(input)
}

/// Parse exactly one expression
pub fn parse_sexpr(input: &str) -> Result<Value, ParseError> {
    parse_sexpr_with_config(input, &ParseConfig::default())
}

pub fn parse_sexpr_with_config(input: &str, config: &ParseConfig) -> Result<Value, ParseError> {
    let (rest, expr) = terminated(
        |input| parse_expr(input, config, 0),
        |input| skip_trivia(input, config),
    )
    .parse(input)
    .map_err(|e| parse_error_to_message(input, e, config))?;

    if rest.is_empty() {
        return Ok(expr);
    }
    let position = input.len() - rest.len();
    if rest.starts_with(')') {
        Err(ParseError::with_context(
            ParseErrorKind::InvalidSyntax,
            format!("Unexpected ')' at position {position}"),
            input,
            position,
        ))
    } else {
        Err(ParseError::with_context(
            ParseErrorKind::TrailingContent,
            format!("Unexpected remaining input at position {position}"),
            input,
            position,
        ))
    }
}

/// Parse zero or more top-level forms, e.g. the body of a module
pub fn parse_program(input: &str) -> Result<Vec<Value>, ParseError> {
    parse_program_with_config(input, &ParseConfig::default())
}

pub fn parse_program_with_config(
    input: &str,
    config: &ParseConfig,
) -> Result<Vec<Value>, ParseError> {
    let to_error = |e| parse_error_to_message(input, e, config);
    let mut exprs = Vec::new();
    let mut remaining = input;
    loop {
        let (rest, ()) = skip_trivia(remaining, config).map_err(to_error)?;
        if rest.is_empty() {
            return Ok(exprs);
        }
        let (rest, expr) = parse_expr(rest, config, 0).map_err(to_error)?;
        exprs.push(expr);
        remaining = rest;
    }
}
