//! Token stream to expression tree.
//!
//! Nesting is bounded by the evaluator's [`MAX_DEPTH`], so a parsed tree can always be
//! walked, cloned and dropped without exhausting the stack.

use super::eval::MAX_DEPTH;
use super::lexer::{Lexer, Spanned, Token};
use super::InterpretError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expr {
    Nil,
    Bool(bool),
    Int(i64),
    Str(String),
    Symbol(String),
    List(Vec<Expr>),
    Quote(Box<Expr>),
}

impl Expr {
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Expr::Symbol(s) => Some(s),
            _ => None,
        }
    }
}

/// Parse every top-level form of `source`
pub fn parse(source: &str) -> Result<Vec<Expr>, InterpretError> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let mut forms = Vec::new();
    while parser.pos < parser.tokens.len() {
        forms.push(parser.expr()?);
    }
    Ok(forms)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn expr(&mut self) -> Result<Expr, InterpretError> {
        if self.depth >= MAX_DEPTH {
            return Err(InterpretError::DepthExceeded(MAX_DEPTH));
        }
        self.depth += 1;
        let result = self.expr_inner();
        self.depth -= 1;
        result
    }

    fn expr_inner(&mut self) -> Result<Expr, InterpretError> {
        let Some(spanned) = self.tokens.get(self.pos).cloned() else {
            return Err(self.eof());
        };
        self.pos += 1;
        match spanned.token {
            Token::LParen => {
                let mut items = Vec::new();
                loop {
                    match self.tokens.get(self.pos) {
                        None => return Err(self.eof()),
                        Some(Spanned {
                            token: Token::RParen,
                            ..
                        }) => {
                            self.pos += 1;
                            return Ok(Expr::List(items));
                        }
                        Some(_) => items.push(self.expr()?),
                    }
                }
            }
            Token::RParen => Err(InterpretError::Syntax {
                line: spanned.line,
                column: spanned.column,
                message: "unexpected ')'".into(),
            }),
            Token::Quote => Ok(Expr::Quote(Box::new(self.expr()?))),
            Token::Integer(n) => Ok(Expr::Int(n)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::Bool(b) => Ok(Expr::Bool(b)),
            Token::Nil => Ok(Expr::Nil),
            Token::Symbol(s) => Ok(Expr::Symbol(s)),
        }
    }

    fn eof(&self) -> InterpretError {
        let (line, column) = self
            .tokens
            .last()
            .map(|t| (t.line, t.column))
            .unwrap_or((1, 1));
        InterpretError::Syntax {
            line,
            column,
            message: "unexpected end of input".into(),
        }
    }
}
