//! Set-algebra expressions over bucket names.
//!
//! Grammar (no precedence; equal operators apply strictly left to right):
//!
//! ```text
//! expr    := operand (op operand)*
//! operand := name | '(' expr ')'
//! op      := '&' (intersect) | '|' (union) | '-' (difference)
//! ```
//!
//! Names are runs of characters other than operators, parentheses, whitespace
//! and `\`. A `\` makes the following character part of the name.
//!
//! An expression is parsed once into a postfix program and evaluated once per
//! aggregate group against the fully merged state.

mod lexer;

use roaring::RoaringBitmap;
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

use crate::config::OrthConfig;
use crate::state::{BucketKey, BucketedState};
use lexer::{Token, TokenKind, ESCAPE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOperator {
    Intersect,
    Union,
    Difference,
}

impl SetOperator {
    pub fn symbol(&self) -> char {
        match self {
            SetOperator::Intersect => '&',
            SetOperator::Union => '|',
            SetOperator::Difference => '-',
        }
    }

    pub fn apply(&self, lhs: &mut RoaringBitmap, rhs: &RoaringBitmap) {
        match self {
            SetOperator::Intersect => *lhs &= rhs,
            SetOperator::Union => *lhs |= rhs,
            SetOperator::Difference => *lhs -= rhs,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseErrorKind {
    #[error("empty expression")]
    Empty,
    #[error("unbalanced parenthesis")]
    UnbalancedParenthesis,
    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),
    #[error("missing operand")]
    MissingOperand,
    #[error("bucket '{0}' is not declared")]
    UndeclaredBucket(String),
    #[error("'{name}' is not a valid {key_type} bucket name")]
    InvalidBucketName { name: String, key_type: &'static str },
    #[error("dangling escape character")]
    TrailingEscape,
    #[error("parentheses nested deeper than {0}")]
    TooDeep(usize),
    #[error("expression longer than {0} bytes")]
    TooLong(usize),
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind} at position {position}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    /// Byte offset in the source expression
    pub position: usize,
}

impl ParseError {
    fn new(kind: ParseErrorKind, position: usize) -> Self {
        Self { kind, position }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Instruction {
    /// Push the bucket at this index of `BucketExpr::buckets`
    Load(usize),
    Apply(SetOperator),
}

/// A parsed, immutable set-algebra expression.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketExpr<K: BucketKey> {
    source: String,
    /// Distinct referenced buckets, in order of first appearance
    buckets: Vec<K>,
    /// Source offset of each bucket's first appearance
    positions: Vec<usize>,
    program: Vec<Instruction>,
}

impl<K: BucketKey> BucketExpr<K> {
    /// Parse an expression; every referenced name becomes a declared bucket.
    pub fn parse(input: &str, config: &OrthConfig) -> Result<Self, ParseError> {
        if input.len() > config.max_expression_len {
            return Err(ParseError::new(
                ParseErrorKind::TooLong(config.max_expression_len),
                config.max_expression_len,
            ));
        }
        let tokens = lexer::tokenize(input)?;
        if tokens.is_empty() {
            return Err(ParseError::new(ParseErrorKind::Empty, 0));
        }

        let mut parser = Parser {
            tokens: &tokens,
            cursor: 0,
            end: input.len(),
            max_depth: config.max_expression_depth,
            buckets: Vec::new(),
            positions: Vec::new(),
            program: Vec::new(),
        };
        parser.parse_expr(0)?;
        if let Some(token) = parser.peek() {
            let kind = match token.kind {
                TokenKind::RParen => ParseErrorKind::UnbalancedParenthesis,
                _ => ParseErrorKind::UnexpectedToken(describe(&token.kind)),
            };
            return Err(ParseError::new(kind, token.position));
        }

        Ok(Self {
            source: input.to_string(),
            buckets: parser.buckets,
            positions: parser.positions,
            program: parser.program,
        })
    }

    /// Parse an expression that may only reference `declared` buckets.
    pub fn parse_declared(
        input: &str,
        declared: &[K],
        config: &OrthConfig,
    ) -> Result<Self, ParseError> {
        let expr = Self::parse(input, config)?;
        for (bucket, position) in expr.buckets.iter().zip(&expr.positions) {
            if !declared.contains(bucket) {
                return Err(ParseError::new(
                    ParseErrorKind::UndeclaredBucket(bucket.to_name()),
                    *position,
                ));
            }
        }
        Ok(expr)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Distinct bucket keys the expression references.
    pub fn bucket_names(&self) -> &[K] {
        &self.buckets
    }

    pub fn references(&self, key: &K) -> bool {
        self.buckets.contains(key)
    }

    /// Evaluate against a fully merged state. Buckets absent from the state
    /// evaluate to the empty set.
    pub fn evaluate(&self, state: &BucketedState<K>) -> RoaringBitmap {
        let mut stack: Vec<Cow<'_, RoaringBitmap>> = Vec::with_capacity(self.buckets.len());

        for instruction in &self.program {
            match *instruction {
                Instruction::Load(index) => stack.push(state.get(&self.buckets[index])),
                Instruction::Apply(op) => {
                    let (lhs, rhs) = match (stack.pop(), stack.pop()) {
                        (Some(rhs), Some(lhs)) => (lhs, rhs),
                        _ => unreachable!("operator without two operands in {:?}", self.source),
                    };
                    let mut result = lhs.into_owned();
                    op.apply(&mut result, &rhs);
                    stack.push(Cow::Owned(result));
                }
            }
        }

        stack.pop().map(Cow::into_owned).unwrap_or_default()
    }
}

impl<K: BucketKey> fmt::Display for BucketExpr<K> {
    /// Fully parenthesized canonical form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stack: Vec<String> = Vec::new();
        for instruction in &self.program {
            match *instruction {
                Instruction::Load(index) => {
                    stack.push(escape_name(&self.buckets[index].to_name()))
                }
                Instruction::Apply(op) => {
                    let rhs = stack.pop().unwrap_or_default();
                    let lhs = stack.pop().unwrap_or_default();
                    stack.push(format!("({}{}{})", lhs, op.symbol(), rhs));
                }
            }
        }
        write!(f, "{}", stack.pop().unwrap_or_default())
    }
}

fn escape_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if lexer::is_reserved(c) {
            out.push(ESCAPE);
        }
        out.push(c);
    }
    out
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::LParen => "(".to_string(),
        TokenKind::RParen => ")".to_string(),
        TokenKind::Op(op) => op.symbol().to_string(),
        TokenKind::Name(name) => name.clone(),
    }
}

struct Parser<'t, K> {
    tokens: &'t [Token],
    cursor: usize,
    /// Source length, reported as the position of errors at end of input
    end: usize,
    max_depth: usize,
    buckets: Vec<K>,
    positions: Vec<usize>,
    program: Vec<Instruction>,
}

impl<'t, K: BucketKey> Parser<'t, K> {
    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.cursor)
    }

    fn next(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.cursor);
        if token.is_some() {
            self.cursor += 1;
        }
        token
    }

    fn parse_expr(&mut self, depth: usize) -> Result<(), ParseError> {
        self.parse_operand(depth)?;
        loop {
            let op = match self.peek() {
                Some(Token {
                    kind: TokenKind::Op(op),
                    ..
                }) => *op,
                // Closing parenthesis and end of input are handled by the caller.
                Some(Token {
                    kind: TokenKind::RParen,
                    ..
                })
                | None => return Ok(()),
                Some(token) => {
                    return Err(ParseError::new(
                        ParseErrorKind::UnexpectedToken(describe(&token.kind)),
                        token.position,
                    ))
                }
            };
            self.cursor += 1;
            self.parse_operand(depth)?;
            self.program.push(Instruction::Apply(op));
        }
    }

    fn parse_operand(&mut self, depth: usize) -> Result<(), ParseError> {
        let token = match self.next() {
            Some(token) => token,
            None => return Err(ParseError::new(ParseErrorKind::MissingOperand, self.end)),
        };

        match &token.kind {
            TokenKind::Name(name) => {
                let key = K::parse_name(name).ok_or_else(|| {
                    ParseError::new(
                        ParseErrorKind::InvalidBucketName {
                            name: name.clone(),
                            key_type: K::type_name(),
                        },
                        token.position,
                    )
                })?;
                let index = match self.buckets.iter().position(|b| *b == key) {
                    Some(index) => index,
                    None => {
                        self.buckets.push(key);
                        self.positions.push(token.position);
                        self.buckets.len() - 1
                    }
                };
                self.program.push(Instruction::Load(index));
                Ok(())
            }
            TokenKind::LParen => {
                if depth + 1 > self.max_depth {
                    return Err(ParseError::new(
                        ParseErrorKind::TooDeep(self.max_depth),
                        token.position,
                    ));
                }
                self.parse_expr(depth + 1)?;
                match self.next() {
                    Some(Token {
                        kind: TokenKind::RParen,
                        ..
                    }) => Ok(()),
                    _ => Err(ParseError::new(
                        ParseErrorKind::UnbalancedParenthesis,
                        token.position,
                    )),
                }
            }
            TokenKind::RParen | TokenKind::Op(_) => Err(ParseError::new(
                ParseErrorKind::MissingOperand,
                token.position,
            )),
        }
    }
}
