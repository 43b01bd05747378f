use crate::ast::Pos;

pub struct Lexer<'a> {
    source: &'a str,
    start: usize,
    current: usize,
    row: u32,
    line_start: usize,
    start_pos: Pos,
}

#[derive(Debug, Clone, Copy)]
pub struct Token<'a> {
    pub tok_type: TokenType,
    pub source: &'a str,
    pub pos: Pos,
}

impl<'a> Token<'a> {
    fn new(tok_type: TokenType, source: &'a str, pos: Pos) -> Self {
        Self {
            tok_type,
            source,
            pos,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TokenType {
    LeftParen, RightParen,
    LeftBrace, RightBrace,
    LeftBracket, RightBracket,
    Comma, SemiColon,
    Minus, Plus, Slash, Star,

    Bang, BangEqual,
    Equal, EqualEqual,
    Greater, GreaterEqual,
    Less, LessEqual,
    AndAnd, OrOr,

    Identifier, Integer,

    Bool, Else, False, If, Int,
    Return, True, Void, While,

    Error,
    Eof,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            start: 0,
            current: 0,
            row: 0,
            line_start: 0,
            start_pos: Pos::default(),
        }
    }

    pub fn next(&mut self) -> Token<'a> {
        if let Some(error) = self.skip_whitespace() {
            return error;
        }
        self.start = self.current;
        self.start_pos = self.pos();
        if self.is_at_end() {
            return self.make_token(TokenType::Eof);
        }
        match self.advance() {
            b'(' => self.make_token(TokenType::LeftParen),
            b')' => self.make_token(TokenType::RightParen),
            b'{' => self.make_token(TokenType::LeftBrace),
            b'}' => self.make_token(TokenType::RightBrace),
            b'[' => self.make_token(TokenType::LeftBracket),
            b']' => self.make_token(TokenType::RightBracket),
            b';' => self.make_token(TokenType::SemiColon),
            b',' => self.make_token(TokenType::Comma),
            b'-' => self.make_token(TokenType::Minus),
            b'+' => self.make_token(TokenType::Plus),
            b'/' => self.make_token(TokenType::Slash),
            b'*' => self.make_token(TokenType::Star),
            b'~' => self.make_token(TokenType::Bang),
            b'!' => if self.match_char(b'=') { self.make_token(TokenType::BangEqual) } else { self.make_token(TokenType::Bang) },
            b'=' => if self.match_char(b'=') { self.make_token(TokenType::EqualEqual) } else { self.make_token(TokenType::Equal) },
            b'<' => if self.match_char(b'=') { self.make_token(TokenType::LessEqual) } else { self.make_token(TokenType::Less) },
            b'>' => if self.match_char(b'=') { self.make_token(TokenType::GreaterEqual) } else { self.make_token(TokenType::Greater) },
            b'&' => if self.match_char(b'&') { self.make_token(TokenType::AndAnd) } else { self.error_token("Unexpected character '&'.") },
            b'|' => if self.match_char(b'|') { self.make_token(TokenType::OrOr) } else { self.error_token("Unexpected character '|'.") },
            c if c.is_ascii_digit() => self.number(),
            c if c.is_ascii_alphabetic() || c == b'_' => self.identifier(),
            _ => self.error_token("Unexpected character."),
        }
    }

    /// Position of the byte under the cursor.
    fn pos(&self) -> Pos {
        Pos::new(self.row, (self.current - self.line_start) as u32)
    }

    fn skip_whitespace(&mut self) -> Option<Token<'a>> {
        loop {
            match self.peek() {
                b' ' | b'\r' | b'\t' => self.current += 1,
                b'\n' => self.newline(),
                b'/' if self.peek_2() == b'/' => {
                    while self.peek() != b'\n' && !self.is_at_end() {
                        self.current += 1;
                    }
                }
                b'/' if self.peek_2() == b'*' => {
                    self.start = self.current;
                    self.start_pos = self.pos();
                    self.current += 2;
                    loop {
                        if self.is_at_end() {
                            return Some(self.error_token("Unterminated comment."));
                        }
                        if self.peek() == b'*' && self.peek_2() == b'/' {
                            self.current += 2;
                            break;
                        }
                        if self.peek() == b'\n' {
                            self.newline();
                        } else {
                            self.current += 1;
                        }
                    }
                }
                _ => return None,
            }
        }
    }

    fn newline(&mut self) -> () {
        self.current += 1;
        self.row += 1;
        self.line_start = self.current;
    }

    fn peek(&self) -> u8 {
        self.source.as_bytes().get(self.current).copied().unwrap_or(b'\0')
    }

    fn peek_2(&self) -> u8 {
        self.source.as_bytes().get(self.current + 1).copied().unwrap_or(b'\0')
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn advance(&mut self) -> u8 {
        self.current += 1;
        self.source.as_bytes()[self.current - 1]
    }

    fn match_char(&mut self, expected: u8) -> bool {
        if self.peek() == expected && !self.is_at_end() {
            self.current += 1;
            true
        } else {
            false
        }
    }

    fn lexeme(&self) -> &'a str {
        self.source.get(self.start..self.current).unwrap_or("")
    }

    fn make_token(&self, tok_type: TokenType) -> Token<'a> {
        Token::new(tok_type, self.lexeme(), self.start_pos)
    }

    pub fn error_token(&self, message: &'static str) -> Token<'a> {
        Token::new(TokenType::Error, message, self.start_pos)
    }

    fn number(&mut self) -> Token<'a> {
        while self.peek().is_ascii_digit() {
            self.current += 1;
        }
        self.make_token(TokenType::Integer)
    }

    fn identifier(&mut self) -> Token<'a> {
        while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' {
            self.current += 1;
        }
        self.make_token(identifier_type(self.lexeme()))
    }
}

fn identifier_type(word: &str) -> TokenType {
    match word {
        "bool" => TokenType::Bool,
        "else" => TokenType::Else,
        "false" => TokenType::False,
        "if" => TokenType::If,
        "int" => TokenType::Int,
        "return" => TokenType::Return,
        "true" => TokenType::True,
        "void" => TokenType::Void,
        "while" => TokenType::While,
        _ => TokenType::Identifier,
    }
}
