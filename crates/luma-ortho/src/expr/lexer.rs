use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not},
    character::complete::{anychar, char, multispace0},
    combinator::{map, value},
    IResult,
};

use super::{ParseError, ParseErrorKind, SetOperator};

/// Characters that end an unescaped bucket name.
const RESERVED: &str = "&|-()\\^~!+*/, \t\r\n";
/// Operator-like punctuation with no meaning in an expression.
const UNSUPPORTED: &str = "^~!+*/,";
pub(crate) const ESCAPE: char = '\\';

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    LParen,
    RParen,
    Op(SetOperator),
    Name(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    /// Byte offset in the source expression
    pub position: usize,
}

pub(crate) fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut rest = input;

    loop {
        rest = skip_whitespace(rest);
        if rest.is_empty() {
            break;
        }
        let position = input.len() - rest.len();
        match lex_token(rest) {
            Ok((remaining, kind)) => {
                tokens.push(Token { kind, position });
                rest = remaining;
            }
            Err(_) if starts_unsupported(rest) => {
                return Err(unexpected_char(rest, position));
            }
            Err(_) if rest.ends_with(ESCAPE) => {
                // An escape followed by any character is valid, so a name can
                // only fail on an unpaired escape at the very end.
                return Err(ParseError {
                    kind: ParseErrorKind::TrailingEscape,
                    position: input.len() - ESCAPE.len_utf8(),
                });
            }
            Err(_) => return Err(unexpected_char(rest, position)),
        }
    }

    Ok(tokens)
}

/// Whether `c` must be escaped to appear inside a bucket name.
pub(crate) fn is_reserved(c: char) -> bool {
    RESERVED.contains(c) || c.is_whitespace()
}

fn starts_unsupported(input: &str) -> bool {
    input.chars().next().is_some_and(|c| UNSUPPORTED.contains(c))
}

fn unexpected_char(input: &str, position: usize) -> ParseError {
    ParseError {
        kind: ParseErrorKind::UnexpectedToken(input.chars().take(1).collect()),
        position,
    }
}

fn skip_whitespace(input: &str) -> &str {
    match multispace0::<&str, nom::error::Error<&str>>(input) {
        Ok((rest, _)) => rest,
        Err(_) => input,
    }
}

fn lex_token(input: &str) -> IResult<&str, TokenKind> {
    alt((
        value(TokenKind::LParen, char('(')),
        value(TokenKind::RParen, char(')')),
        value(TokenKind::Op(SetOperator::Intersect), char('&')),
        value(TokenKind::Op(SetOperator::Union), char('|')),
        value(TokenKind::Op(SetOperator::Difference), char('-')),
        map(bucket_name, TokenKind::Name),
    ))(input)
}

/// A run of non-reserved characters; `\` makes the next character literal.
fn bucket_name(input: &str) -> IResult<&str, String> {
    escaped_transform(is_not(RESERVED), ESCAPE, anychar)(input)
}
