//! Tokenizer for program source.

use super::InterpretError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    LParen,
    RParen,
    Quote,
    Integer(i64),
    Str(String),
    Bool(bool),
    Nil,
    Symbol(String),
}

/// A token with its 1-based source position
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
    pub column: usize,
}

pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> InterpretError {
        InterpretError::Syntax {
            line: self.line,
            column: self.column,
            message: message.into(),
        }
    }

    /// Skip whitespace and `;` line comments
    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
            } else if c == ';' {
                while let Some(c) = self.advance() {
                    if c == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn string(&mut self) -> Result<Token, InterpretError> {
        let (line, column) = (self.line, self.column);
        self.advance();
        let mut value = String::new();
        loop {
            match self.advance() {
                None => {
                    return Err(InterpretError::Syntax {
                        line,
                        column,
                        message: "unterminated string".into(),
                    })
                }
                Some('"') => break,
                Some('\\') => match self.advance() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some(c) => value.push(c),
                    None => return Err(self.error("unterminated escape")),
                },
                Some(c) => value.push(c),
            }
        }
        Ok(Token::Str(value))
    }

    fn number(&mut self) -> Result<Token, InterpretError> {
        let mut text = String::new();
        if self.peek() == Some('-') {
            text.push('-');
            self.advance();
        }
        while let Some(c) = self.peek() {
            if !c.is_ascii_digit() {
                break;
            }
            text.push(c);
            self.advance();
        }
        text.parse::<i64>()
            .map(Token::Integer)
            .map_err(|_| self.error(format!("integer out of range: {}", text)))
    }

    fn symbol(&mut self) -> Token {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() || "()'\";".contains(c) {
                break;
            }
            text.push(c);
            self.advance();
        }
        match text.as_str() {
            "nil" => Token::Nil,
            "true" => Token::Bool(true),
            "false" => Token::Bool(false),
            _ => Token::Symbol(text),
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Spanned>, InterpretError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let Some(c) = self.peek() else {
                return Ok(tokens);
            };
            let (line, column) = (self.line, self.column);
            let token = match c {
                '(' => {
                    self.advance();
                    Token::LParen
                }
                ')' => {
                    self.advance();
                    Token::RParen
                }
                '\'' => {
                    self.advance();
                    Token::Quote
                }
                '"' => self.string()?,
                '-' if self.peek_next().is_some_and(|n| n.is_ascii_digit()) => self.number()?,
                c if c.is_ascii_digit() => self.number()?,
                _ => self.symbol(),
            };
            tokens.push(Spanned {
                token,
                line,
                column,
            });
        }
    }
}
