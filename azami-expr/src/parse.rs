//! 式のトークナイザとパーサ
//!
//! ドット・添字つきの名前（`a.b[3].c`）、`#id` による直接参照、
//! `$` 擬似変数、リテラル、および条件付きブレークポイントが必要とする
//! 比較演算子をサポートします。

use azami_session::ValueId;

use crate::{EvalError, Result};

/// パス式の1セグメント
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// `#N` — IDによる直接参照（先頭のみ）
    Id(ValueId),
    /// `$name` / `$N` / `$` — ローカル擬似変数（先頭のみ）
    Pseudo(String),
    /// `.name` または先頭の名前
    Member(String),
    /// `[N]` — 添字アクセス
    Index(u64),
}

/// リテラル値
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiteralValue {
    Int(i64),
    Str(String),
    Bool(bool),
    Undefined,
}

/// 比較演算子
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// パース済みの式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// 変数パス: `timer.interval` など
    Path(Vec<Segment>),
    /// リテラル
    Literal(LiteralValue),
    /// 比較: `count == 3` など
    Compare {
        lhs: Box<Expr>,
        op: CompareOp,
        rhs: Box<Expr>,
    },
    /// 論理否定: `!flag`
    Not(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Int(i64),
    Str(String),
    Hash,
    Dollar,
    Dot,
    LBracket,
    RBracket,
    Bang,
    Op(CompareOp),
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '#' => {
                chars.next();
                tokens.push(Token::Hash);
            }
            '$' => {
                chars.next();
                tokens.push(Token::Dollar);
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '[' => {
                chars.next();
                tokens.push(Token::LBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::RBracket);
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Op(CompareOp::Eq));
                } else {
                    return Err(EvalError::BadExpression(
                        "single '=' is not a comparison; use '=='".to_string(),
                    ));
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Op(CompareOp::Ne));
                } else {
                    tokens.push(Token::Bang);
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Op(CompareOp::Le));
                } else {
                    tokens.push(Token::Op(CompareOp::Lt));
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Op(CompareOp::Ge));
                } else {
                    tokens.push(Token::Op(CompareOp::Gt));
                }
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == quote => break,
                        Some(ch) => s.push(ch),
                        None => {
                            return Err(EvalError::BadExpression(format!(
                                "unterminated string literal: {input}"
                            )))
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            '0'..='9' | '-' => {
                let mut s = String::new();
                if c == '-' {
                    s.push(c);
                    chars.next();
                }
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        s.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n = s
                    .parse::<i64>()
                    .map_err(|_| EvalError::BadExpression(format!("invalid number '{s}'")))?;
                tokens.push(Token::Int(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut s = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' {
                        s.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(s));
            }
            other => {
                return Err(EvalError::BadExpression(format!(
                    "unexpected character '{other}'"
                )))
            }
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

    fn expr(&mut self) -> Result<Expr> {
        let lhs = self.unary()?;
        if let Some(Token::Op(op)) = self.peek().cloned() {
            self.next();
            let rhs = self.unary()?;
            return Ok(Expr::Compare {
                lhs: Box::new(lhs),
                op,
                rhs: Box::new(rhs),
            });
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Bang) {
            self.next();
            let inner = self.unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Expr::Literal(LiteralValue::Str(s))),
            Some(Token::Int(n)) => Ok(Expr::Literal(LiteralValue::Int(n))),
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Literal(LiteralValue::Bool(true))),
                "false" => Ok(Expr::Literal(LiteralValue::Bool(false))),
                "undefined" => Ok(Expr::Literal(LiteralValue::Undefined)),
                _ => self.path(Segment::Member(name)),
            },
            Some(Token::Hash) => match self.next() {
                Some(Token::Int(n)) if n >= 0 => self.path(Segment::Id(n)),
                _ => Err(EvalError::BadExpression(
                    "'#' must be followed by a value id".to_string(),
                )),
            },
            Some(Token::Dollar) => {
                // `$`単独は直前の評価結果、`$N`は履歴、`$name`は名前付きプロパティ
                let key = match self.peek().cloned() {
                    Some(Token::Ident(name)) => {
                        self.next();
                        name
                    }
                    Some(Token::Int(n)) if n >= 0 => {
                        self.next();
                        n.to_string()
                    }
                    _ => String::new(),
                };
                self.path(Segment::Pseudo(key))
            }
            other => Err(EvalError::BadExpression(format!(
                "expected a name, literal, '#' or '$', got {other:?}"
            ))),
        }
    }

    /// 先頭セグメントに続く `.name` / `[N]` の連なりを読む
    fn path(&mut self, head: Segment) -> Result<Expr> {
        let mut segments = vec![head];
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.next();
                    match self.next() {
                        Some(Token::Ident(name)) => segments.push(Segment::Member(name)),
                        other => {
                            return Err(EvalError::BadExpression(format!(
                                "expected a member name after '.', got {other:?}"
                            )))
                        }
                    }
                }
                Some(Token::LBracket) => {
                    self.next();
                    let index = match self.next() {
                        Some(Token::Int(n)) if n >= 0 => n as u64,
                        other => {
                            return Err(EvalError::BadExpression(format!(
                                "expected an index after '[', got {other:?}"
                            )))
                        }
                    };
                    if self.next() != Some(Token::RBracket) {
                        return Err(EvalError::BadExpression(
                            "missing closing bracket ']'".to_string(),
                        ));
                    }
                    segments.push(Segment::Index(index));
                }
                _ => break,
            }
        }
        Ok(Expr::Path(segments))
    }
}

/// 式文字列をパースする
pub fn parse_expression(input: &str) -> Result<Expr> {
    let tokens = tokenize(input.trim())?;
    if tokens.is_empty() {
        return Err(EvalError::BadExpression("empty expression".to_string()));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(EvalError::BadExpression(format!(
            "trailing tokens in expression '{input}'"
        )));
    }
    Ok(expr)
}
