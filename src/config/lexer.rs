use std::iter::Peekable;
use std::str::Chars;

use crate::config::parser::ConfigError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Word(String), // listen, 8080, /var/www, .py
    LBrace,       // {
    RBrace,       // }
    Semicolon,    // ;
}

#[derive(Debug, Clone)]
pub struct ConfigToken {
    pub kind: TokenKind,
    pub loc: Loc,
}

#[derive(Debug, Clone, Copy)]
pub struct Loc {
    pub line: usize,
    pub col: usize,
}

impl std::fmt::Display for Loc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}, col {}", self.line, self.col)
    }
}

// Alphabet of unquoted words in the block grammar.
fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "_-./:".contains(c)
}

pub struct Lexer<'a> {
    input: Peekable<Chars<'a>>,
    line: usize,
    col: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input: input.chars().peekable(),
            line: 1,
            col: 1,
        }
    }

    fn advance(&mut self) {
        if let Some(c) = self.input.next() {
            if c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.input.peek().copied()
    }

    fn current_loc(&self) -> Loc {
        Loc {
            line: self.line,
            col: self.col,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<ConfigToken>, ConfigError> {
        let mut tokens = Vec::new();

        while let Some(c) = self.peek() {
            let loc = self.current_loc();

            match c {
                '#' => self.skip_comment(),
                '{' => {
                    tokens.push(ConfigToken {
                        kind: TokenKind::LBrace,
                        loc,
                    });
                    self.advance();
                }
                '}' => {
                    tokens.push(ConfigToken {
                        kind: TokenKind::RBrace,
                        loc,
                    });
                    self.advance();
                }
                ';' => {
                    tokens.push(ConfigToken {
                        kind: TokenKind::Semicolon,
                        loc,
                    });
                    self.advance();
                }
                c if c.is_whitespace() => self.advance(),
                c if is_word_char(c) => {
                    let mut word = String::new();
                    while let Some(n) = self.peek() {
                        if is_word_char(n) {
                            word.push(n);
                            self.advance();
                        } else {
                            break;
                        }
                    }
                    tokens.push(ConfigToken {
                        kind: TokenKind::Word(word),
                        loc,
                    });
                }
                other => {
                    return Err(ConfigError::Syntax {
                        message: format!("unexpected character '{}'", other),
                        line: loc.line,
                        col: loc.col,
                    });
                }
            }
        }

        Ok(tokens)
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.advance();
        }
    }
}
