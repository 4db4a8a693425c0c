// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Content filter expressions.
//!
//! A small predicate language over sample fields, used by query conditions
//! and content-filtered readers:
//!
//! ```text
//! x > 50 and x < 100 and y > 50 and y < 100
//! color = 'Red' or color = 'Blue'
//! not (size >= 40)
//! ```
//!
//! Comparison operators: `=`, `<>`, `!=`, `<`, `<=`, `>`, `>=`. Boolean
//! combinators: `and`, `or`, `not`, parentheses. Literals are integers,
//! floats and single-quoted strings.

use std::collections::HashMap;
use std::fmt;

/// A field value extracted from a sample.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
}

impl FieldValue {
    fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::Boolean(v) => Some(f64::from(u8::from(*v))),
            FieldValue::Text(_) => None,
        }
    }
}

/// Filter parse/evaluate errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// Expression text could not be parsed at the given offset.
    Syntax(usize),
    /// A referenced field is missing from the sample.
    UnknownField(String),
    /// Operands cannot be compared (string vs number).
    TypeMismatch,
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::Syntax(pos) => write!(f, "syntax error at offset {}", pos),
            FilterError::UnknownField(name) => write!(f, "unknown field '{}'", name),
            FilterError::TypeMismatch => write!(f, "type mismatch in comparison"),
        }
    }
}

impl std::error::Error for FilterError {}

#[derive(Debug, Clone, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone)]
enum Expr {
    Compare {
        field: String,
        op: CmpOp,
        literal: FieldValue,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

/// A compiled filter expression.
#[derive(Debug, Clone)]
pub struct ContentFilter {
    expr: Expr,
    expression_text: String,
}

impl ContentFilter {
    /// Parse an expression.
    pub fn parse(text: &str) -> Result<Self, FilterError> {
        let mut parser = Parser {
            tokens: tokenize(text)?,
            pos: 0,
        };
        let expr = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(FilterError::Syntax(parser.pos));
        }
        Ok(ContentFilter {
            expr,
            expression_text: text.to_string(),
        })
    }

    /// The original expression text.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression_text
    }

    /// Evaluate against a field map.
    pub fn evaluate(&self, fields: &HashMap<String, FieldValue>) -> Result<bool, FilterError> {
        eval(&self.expr, fields)
    }
}

fn eval(expr: &Expr, fields: &HashMap<String, FieldValue>) -> Result<bool, FilterError> {
    match expr {
        Expr::And(a, b) => Ok(eval(a, fields)? && eval(b, fields)?),
        Expr::Or(a, b) => Ok(eval(a, fields)? || eval(b, fields)?),
        Expr::Not(inner) => Ok(!eval(inner, fields)?),
        Expr::Compare { field, op, literal } => {
            let value = fields
                .get(field)
                .ok_or_else(|| FilterError::UnknownField(field.clone()))?;
            compare(value, op, literal)
        }
    }
}

fn compare(value: &FieldValue, op: &CmpOp, literal: &FieldValue) -> Result<bool, FilterError> {
    match (value, literal) {
        (FieldValue::Text(a), FieldValue::Text(b)) => Ok(match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
        }),
        (FieldValue::Text(_), _) | (_, FieldValue::Text(_)) => Err(FilterError::TypeMismatch),
        (a, b) => {
            let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
                return Err(FilterError::TypeMismatch);
            };
            Ok(match op {
                CmpOp::Eq => (x - y).abs() < f64::EPSILON,
                CmpOp::Ne => (x - y).abs() >= f64::EPSILON,
                CmpOp::Lt => x < y,
                CmpOp::Le => x <= y,
                CmpOp::Gt => x > y,
                CmpOp::Ge => x >= y,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Integer(i64),
    Text(String),
    Op(CmpOp),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

fn tokenize(text: &str) -> Result<Vec<Token>, FilterError> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Op(CmpOp::Eq));
                i += 1;
            }
            '<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Op(CmpOp::Le));
                    i += 2;
                } else if bytes.get(i + 1) == Some(&b'>') {
                    tokens.push(Token::Op(CmpOp::Ne));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CmpOp::Lt));
                    i += 1;
                }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Op(CmpOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CmpOp::Gt));
                    i += 1;
                }
            }
            '!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Op(CmpOp::Ne));
                    i += 2;
                } else {
                    return Err(FilterError::Syntax(i));
                }
            }
            '\'' => {
                let start = i + 1;
                let mut j = start;
                while j < bytes.len() && bytes[j] != b'\'' {
                    j += 1;
                }
                if j >= bytes.len() {
                    return Err(FilterError::Syntax(i));
                }
                tokens.push(Token::Text(text[start..j].to_string()));
                i = j + 1;
            }
            c if c.is_ascii_digit() || c == '-' || c == '+' => {
                let start = i;
                i += 1;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_digit() || bytes[i] == b'.' || bytes[i] == b'e')
                {
                    i += 1;
                }
                let slice = &text[start..i];
                if slice.contains('.') || slice.contains('e') {
                    let v = slice.parse::<f64>().map_err(|_| FilterError::Syntax(start))?;
                    tokens.push(Token::Number(v));
                } else {
                    let v = slice.parse::<i64>().map_err(|_| FilterError::Syntax(start))?;
                    tokens.push(Token::Integer(v));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric()
                        || bytes[i] == b'_'
                        || bytes[i] == b'.')
                {
                    i += 1;
                }
                let word = &text[start..i];
                match word.to_ascii_lowercase().as_str() {
                    "and" => tokens.push(Token::And),
                    "or" => tokens.push(Token::Or),
                    "not" => tokens.push(Token::Not),
                    "true" => tokens.push(Token::Integer(1)),
                    "false" => tokens.push(Token::Integer(0)),
                    _ => tokens.push(Token::Ident(word.to_string())),
                }
            }
            _ => return Err(FilterError::Syntax(i)),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn parse_or(&mut self) -> Result<Expr, FilterError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, FilterError> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, FilterError> {
        match self.peek() {
            Some(Token::Not) => {
                self.next();
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            Some(Token::LParen) => {
                self.next();
                let inner = self.parse_or()?;
                if self.next() != Some(Token::RParen) {
                    return Err(FilterError::Syntax(self.pos));
                }
                Ok(inner)
            }
            _ => self.parse_compare(),
        }
    }

    fn parse_compare(&mut self) -> Result<Expr, FilterError> {
        let field = match self.next() {
            Some(Token::Ident(name)) => name,
            _ => return Err(FilterError::Syntax(self.pos)),
        };
        let op = match self.next() {
            Some(Token::Op(op)) => op,
            _ => return Err(FilterError::Syntax(self.pos)),
        };
        let literal = match self.next() {
            Some(Token::Integer(v)) => FieldValue::Integer(v),
            Some(Token::Number(v)) => FieldValue::Float(v),
            Some(Token::Text(s)) => FieldValue::Text(s),
            _ => return Err(FilterError::Syntax(self.pos)),
        };
        Ok(Expr::Compare { field, op, literal })
    }
}
