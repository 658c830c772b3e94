// src/recipe/condition.rs

//! `when` conditions of declarative recipes
//!
//! Grammar:
//!
//! ```text
//! expr    := and ("or" and)*
//! and     := unary ("and" unary)*
//! unary   := ("not" | "!") unary | primary
//! primary := "(" expr ")" | path ("==" | "!=") value | path "in" "[" value ("," value)* "]" | path
//! ```
//!
//! A bare path is true when it has a value other than `False`, `0`, `None`
//! or the empty string. Paths are looked up through a caller-provided
//! function (`settings.os`, `options.shared`, `package_type`, ...).

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Eq,
    Ne,
    Not,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '+' | '-' | '/' | '*')
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '[' => {
                chars.next();
                tokens.push(Token::LBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::RBracket);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '=' => {
                chars.next();
                if chars.next() != Some('=') {
                    return Err(Error::ParseError(format!("expected '==' in '{}'", input)));
                }
                tokens.push(Token::Eq);
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ne);
                } else {
                    tokens.push(Token::Not);
                }
            }
            '"' | '\'' => {
                let quote = c;
                chars.next();
                let mut word = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == quote => break,
                        Some(ch) => word.push(ch),
                        None => {
                            return Err(Error::ParseError(format!(
                                "unterminated string in '{}'",
                                input
                            )));
                        }
                    }
                }
                tokens.push(Token::Word(word));
            }
            c if is_word_char(c) => {
                let mut word = String::new();
                while let Some(&ch) = chars.peek() {
                    if !is_word_char(ch) {
                        break;
                    }
                    word.push(ch);
                    chars.next();
                }
                if word == "not" {
                    tokens.push(Token::Not);
                } else {
                    tokens.push(Token::Word(word));
                }
            }
            other => {
                return Err(Error::ParseError(format!(
                    "unexpected '{}' in condition '{}'",
                    other, input
                )));
            }
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Eq(String, String),
    Ne(String, String),
    In(String, Vec<String>),
    Truthy(String),
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    source: &'a str,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn error(&self, msg: &str) -> Error {
        Error::ParseError(format!("invalid condition '{}': {}", self.source, msg))
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w == keyword)
    }

    fn expr(&mut self) -> Result<Expr> {
        let mut left = self.and()?;
        while self.is_keyword("or") {
            self.pos += 1;
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        while self.is_keyword("and") {
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn value(&mut self) -> Result<String> {
        match self.next() {
            Some(Token::Word(w)) => Ok(w),
            _ => Err(self.error("expected a value")),
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(self.error("missing ')'")),
                }
            }
            Some(Token::Word(path)) if path != "and" && path != "or" && path != "in" => {
                match self.peek() {
                    Some(Token::Eq) => {
                        self.pos += 1;
                        Ok(Expr::Eq(path, self.value()?))
                    }
                    Some(Token::Ne) => {
                        self.pos += 1;
                        Ok(Expr::Ne(path, self.value()?))
                    }
                    Some(Token::Word(w)) if w == "in" => {
                        self.pos += 1;
                        if self.next() != Some(Token::LBracket) {
                            return Err(self.error("expected '[' after 'in'"));
                        }
                        let mut values = Vec::new();
                        loop {
                            if self.peek() == Some(&Token::RBracket) {
                                self.pos += 1;
                                break;
                            }
                            values.push(self.value()?);
                            match self.next() {
                                Some(Token::Comma) => {}
                                Some(Token::RBracket) => break,
                                _ => return Err(self.error("expected ',' or ']'")),
                            }
                        }
                        Ok(Expr::In(path, values))
                    }
                    _ => Ok(Expr::Truthy(path)),
                }
            }
            _ => Err(self.error("expected a path or '('")),
        }
    }
}

fn truthy(value: Option<&str>) -> bool {
    !matches!(value, None | Some("False" | "false" | "0" | "None" | ""))
}

/// A parsed condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    expr: Expr,
}

impl Condition {
    pub fn parse(input: &str) -> Result<Self> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(Error::ParseError("empty condition".to_string()));
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            source: input,
        };
        let expr = parser.expr()?;
        if parser.pos < parser.tokens.len() {
            return Err(parser.error("trailing input"));
        }
        Ok(Self { expr })
    }

    /// Evaluate with a path lookup
    pub fn evaluate<F>(&self, lookup: &F) -> bool
    where
        F: Fn(&str) -> Option<String>,
    {
        eval(&self.expr, lookup)
    }
}

fn eval<F>(expr: &Expr, lookup: &F) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match expr {
        Expr::Or(a, b) => eval(a, lookup) || eval(b, lookup),
        Expr::And(a, b) => eval(a, lookup) && eval(b, lookup),
        Expr::Not(e) => !eval(e, lookup),
        Expr::Eq(path, value) => lookup(path).as_deref() == Some(value.as_str()),
        Expr::Ne(path, value) => lookup(path).as_deref() != Some(value.as_str()),
        Expr::In(path, values) => lookup(path).is_some_and(|v| values.contains(&v)),
        Expr::Truthy(path) => truthy(lookup(path).as_deref()),
    }
}
