use std::mem::swap;

use log::trace;

use crate::ast::{
    Compound, DataType, Dec, Exp, ExpKind, FunctionDec, Operator, Pos, Program, Stmt, StmtKind,
    TypeSpec, Var, VarDec,
};
use crate::common::ParseError;
use crate::lexer::{Lexer, Token, TokenType};

/// Parses a whole C-minus source file.
pub fn parse(source: &str) -> Result<Program, Vec<ParseError>> {
    let mut parser = Parser::new(Lexer::new(source));
    parser.advance();
    let program = parser.program();
    if parser.errors.is_empty() {
        Ok(program)
    } else {
        Err(parser.errors)
    }
}

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token<'a>,
    previous: Token<'a>,
    pub errors: Vec<ParseError>,
    panic_mode: bool,
}

impl<'a> Parser<'a> {
    pub fn new(lexer: Lexer<'a>) -> Self {
        let current = lexer.error_token("Before start");
        let previous = lexer.error_token("Before start");
        Self {
            lexer,
            current,
            previous,
            errors: Vec::new(),
            panic_mode: false,
        }
    }

    pub fn advance(&mut self) -> () {
        swap(&mut self.current, &mut self.previous);
        loop {
            self.current = self.lexer.next();
            trace!("{:?} '{}'", self.current.tok_type, self.current.source);

            if self.current.tok_type != TokenType::Error {
                break;
            }
            self.error_at(self.current, self.current.source);
        }
    }

    fn consume(&mut self, tok_type: TokenType, message: &str) -> bool {
        if self.current.tok_type == tok_type {
            self.advance();
            true
        } else {
            self.error_at(self.current, message);
            false
        }
    }

    fn error_at(&mut self, token: Token<'a>, message: &str) -> () {
        if self.panic_mode {
            return;
        } // Silence errors until sync point
        self.panic_mode = true;
        let message = match token.tok_type {
            TokenType::Eof => format!("{} (at end of input)", message),
            TokenType::Error => message.to_string(),
            _ => format!("{} (at '{}')", message, token.source),
        };
        self.errors.push(ParseError::new(message, token.pos));
    }

    fn error(&mut self, message: &str) -> () {
        self.error_at(self.previous, message)
    }

    fn match_tok(&mut self, tok_type: TokenType) -> bool {
        if !self.check(tok_type) {
            false
        } else {
            self.advance();
            true
        }
    }

    fn check(&self, tok_type: TokenType) -> bool {
        self.current.tok_type == tok_type
    }

    fn check_type_specifier(&self) -> bool {
        matches!(
            self.current.tok_type,
            TokenType::Int | TokenType::Bool | TokenType::Void
        )
    }

    fn synchronize(&mut self) -> () {
        self.panic_mode = false;

        // Consume tokens until either after a semicolon or a closing brace, or
        // before a token that starts a declaration or statement
        while self.current.tok_type != TokenType::Eof {
            if matches!(
                self.previous.tok_type,
                TokenType::SemiColon | TokenType::RightBrace
            ) {
                break;
            }

            match self.current.tok_type {
                TokenType::Int
                | TokenType::Bool
                | TokenType::Void
                | TokenType::If
                | TokenType::While
                | TokenType::Return
                | TokenType::LeftBrace => break,
                _ => (),
            }
            self.advance();
        }
    }

    /// Recovery that consumed nothing would loop forever on the same token.
    fn skip_if_stuck(&mut self, start: Pos) -> () {
        if self.current.pos == start && !self.check(TokenType::Eof) {
            self.advance();
        }
    }

    pub fn program(&mut self) -> Program {
        let mut decls = Vec::new();
        while !self.match_tok(TokenType::Eof) {
            let start = self.current.pos;
            if let Some(dec) = self.declaration() {
                decls.push(dec);
            }
            if self.panic_mode {
                self.synchronize();
                self.skip_if_stuck(start);
            }
        }
        Program::new(decls)
    }

    fn type_specifier(&mut self) -> Option<TypeSpec> {
        let data_type = match self.current.tok_type {
            TokenType::Int => DataType::Int,
            TokenType::Bool => DataType::Bool,
            TokenType::Void => DataType::Void,
            _ => {
                self.error_at(self.current, "Expect type specifier.");
                return None;
            }
        };
        let pos = self.current.pos;
        self.advance();
        Some(TypeSpec {
            pos,
            data_type,
            is_array: false,
        })
    }

    fn declaration(&mut self) -> Option<Dec> {
        let type_spec = self.type_specifier()?;
        let name = self.current;
        if !self.consume(TokenType::Identifier, "Expect declaration name.") {
            return None;
        }
        if self.match_tok(TokenType::LeftParen) {
            self.function_declaration(type_spec, name).map(Dec::Function)
        } else {
            self.var_declaration(type_spec, name).map(Dec::Var)
        }
    }

    fn var_declaration(&mut self, type_spec: TypeSpec, name: Token<'a>) -> Option<VarDec> {
        let mut size = -1;
        if self.match_tok(TokenType::LeftBracket) {
            if !self.consume(TokenType::Integer, "Expect array size.") {
                return None;
            }
            size = match self.previous.source.parse::<i32>() {
                Ok(size) => size,
                Err(_) => {
                    self.error("Array size out of range.");
                    return None;
                }
            };
            if !self.consume(TokenType::RightBracket, "Expect ']' after array size.") {
                return None;
            }
        }
        if !self.consume(TokenType::SemiColon, "Expect ';' after variable declaration.") {
            return None;
        }
        Some(VarDec::new(type_spec.pos, type_spec, name.source, size))
    }

    fn function_declaration(&mut self, result: TypeSpec, name: Token<'a>) -> Option<FunctionDec> {
        let params = self.params()?;
        if !self.consume(TokenType::RightParen, "Expect ')' after parameters.") {
            return None;
        }
        let body = if self.match_tok(TokenType::SemiColon) {
            None
        } else {
            if !self.consume(TokenType::LeftBrace, "Expect '{' before function body.") {
                return None;
            }
            Some(self.compound())
        };
        Some(FunctionDec::new(result.pos, result, name.source, params, body))
    }

    fn params(&mut self) -> Option<Vec<VarDec>> {
        let mut params = Vec::new();
        if self.check(TokenType::RightParen) {
            return Some(params);
        }
        loop {
            let type_spec = self.type_specifier()?;
            // `(void)` declares an empty parameter list
            if params.is_empty()
                && type_spec.data_type == DataType::Void
                && self.check(TokenType::RightParen)
            {
                return Some(params);
            }
            params.push(self.param(type_spec)?);
            if !self.match_tok(TokenType::Comma) {
                return Some(params);
            }
        }
    }

    fn param(&mut self, mut type_spec: TypeSpec) -> Option<VarDec> {
        let name = self.current;
        if !self.consume(TokenType::Identifier, "Expect parameter name.") {
            return None;
        }
        if self.match_tok(TokenType::LeftBracket) {
            if !self.consume(TokenType::RightBracket, "Expect ']' after '[' in parameter.") {
                return None;
            }
            type_spec.is_array = true;
        }
        Some(VarDec::new(type_spec.pos, type_spec, name.source, -1))
    }

    /// Parses the rest of a block whose `{` was just consumed.
    fn compound(&mut self) -> Compound {
        let pos = self.previous.pos;
        let mut decls = Vec::new();
        while self.check_type_specifier() {
            let dec = self.type_specifier().and_then(|type_spec| {
                let name = self.current;
                if self.consume(TokenType::Identifier, "Expect variable name.") {
                    self.var_declaration(type_spec, name)
                } else {
                    None
                }
            });
            if let Some(dec) = dec {
                decls.push(dec);
            }
            if self.panic_mode {
                self.synchronize();
            }
        }

        let mut stmts = Vec::new();
        while !self.check(TokenType::RightBrace) && !self.check(TokenType::Eof) {
            let start = self.current.pos;
            stmts.push(self.statement());
            if self.panic_mode {
                self.synchronize();
                self.skip_if_stuck(start);
            }
        }

        self.consume(TokenType::RightBrace, "Expect '}' after block.");
        Compound { pos, decls, stmts }
    }

    fn statement(&mut self) -> Stmt {
        let pos = self.current.pos;
        if self.match_tok(TokenType::LeftBrace) {
            Stmt::new(pos, StmtKind::Compound(self.compound()))
        } else if self.match_tok(TokenType::If) {
            self.if_statement(pos)
        } else if self.match_tok(TokenType::While) {
            self.while_statement(pos)
        } else if self.match_tok(TokenType::Return) {
            self.return_statement(pos)
        } else if self.match_tok(TokenType::SemiColon) {
            Stmt::new(pos, StmtKind::Exp(Exp::new(pos, ExpKind::Nil)))
        } else if self.check_type_specifier() {
            self.error_at(self.current, "Declarations must come before statements in a block.");
            self.advance();
            Stmt::new(pos, StmtKind::Exp(Exp::new(pos, ExpKind::Nil)))
        } else {
            self.expression_statement(pos)
        }
    }

    fn if_statement(&mut self, pos: Pos) -> Stmt {
        self.consume(TokenType::LeftParen, "Expect '(' after 'if'.");
        let test = self.expression();
        self.consume(TokenType::RightParen, "Expect ')' after if condition.");
        let then_branch = self.statement();
        let else_branch = if self.match_tok(TokenType::Else) {
            Some(Box::new(self.statement()))
        } else {
            None
        };
        Stmt::new(pos, StmtKind::If(test, Box::new(then_branch), else_branch))
    }

    fn while_statement(&mut self, pos: Pos) -> Stmt {
        self.consume(TokenType::LeftParen, "Expect '(' after 'while'.");
        let test = self.expression();
        self.consume(TokenType::RightParen, "Expect ')' after while condition.");
        let body = self.statement();
        Stmt::new(pos, StmtKind::While(test, Box::new(body)))
    }

    fn return_statement(&mut self, pos: Pos) -> Stmt {
        if self.match_tok(TokenType::SemiColon) {
            return Stmt::new(pos, StmtKind::Return(None));
        }
        let value = self.expression();
        self.consume(TokenType::SemiColon, "Expect ';' after return value.");
        Stmt::new(pos, StmtKind::Return(Some(value)))
    }

    fn expression_statement(&mut self, pos: Pos) -> Stmt {
        let e = self.expression();
        self.consume(TokenType::SemiColon, "Expect ';' after expression.");
        Stmt::new(pos, StmtKind::Exp(e))
    }

    fn expression(&mut self) -> Exp {
        self.parse_precedence(Precedence::Base)
    }

    fn parse_precedence(&mut self, precedence: Precedence) -> Exp {
        self.advance();
        let pos = self.previous.pos;
        let mut node = match self.previous.tok_type {
            TokenType::LeftParen => self.grouping(),
            TokenType::Minus | TokenType::Bang => self.unary(),
            TokenType::Integer => self.integer(),
            TokenType::True => Exp::new(pos, ExpKind::BoolLiteral(true)),
            TokenType::False => Exp::new(pos, ExpKind::BoolLiteral(false)),
            TokenType::Identifier => self.variable_or_call(),
            _ => {
                self.error("Expect expression.");
                Exp::new(pos, ExpKind::Nil)
            }
        };

        while precedence <= infix_left_precedence(self.current.tok_type) {
            self.advance();
            node = match self.previous.tok_type {
                TokenType::Equal => self.assignment(node),
                _ => self.binary(node),
            };
        }
        node
    }

    fn integer(&mut self) -> Exp {
        let pos = self.previous.pos;
        match self.previous.source.parse::<i32>() {
            Ok(value) => Exp::new(pos, ExpKind::IntLiteral(value)),
            Err(_) => {
                self.error("Integer literal out of range.");
                Exp::new(pos, ExpKind::IntLiteral(0))
            }
        }
    }

    fn variable_or_call(&mut self) -> Exp {
        let pos = self.previous.pos;
        let name = self.previous.source;
        if self.match_tok(TokenType::LeftParen) {
            let mut args = Vec::new();
            if !self.check(TokenType::RightParen) {
                loop {
                    args.push(self.expression());
                    if !self.match_tok(TokenType::Comma) {
                        break;
                    }
                }
            }
            self.consume(TokenType::RightParen, "Expect ')' after arguments.");
            Exp::new(pos, ExpKind::Call(name.to_string(), args))
        } else if self.match_tok(TokenType::LeftBracket) {
            let index = self.expression();
            self.consume(TokenType::RightBracket, "Expect ']' after index.");
            Exp::new(pos, ExpKind::Var(Var::indexed(pos, name, index)))
        } else {
            Exp::new(pos, ExpKind::Var(Var::simple(pos, name)))
        }
    }

    fn grouping(&mut self) -> Exp {
        let e = self.expression();
        self.consume(TokenType::RightParen, "Expect ')' after expression.");
        e
    }

    fn unary(&mut self) -> Exp {
        let operator = match self.previous.tok_type {
            TokenType::Minus => Operator::Neg,
            _ => Operator::Not,
        };
        let pos = self.previous.pos;
        let operand = self.parse_precedence(Precedence::UnaryRight);
        Exp::unary(pos, operator, operand)
    }

    fn assignment(&mut self, lhs: Exp) -> Exp {
        let equals = self.previous;
        let rhs = self.parse_precedence(Precedence::AssignmentRight);
        match lhs.kind {
            ExpKind::Var(var) => Exp::new(equals.pos, ExpKind::Assign(var, Box::new(rhs))),
            _ => {
                self.error_at(equals, "Invalid assignment target.");
                rhs
            }
        }
    }

    fn binary(&mut self, lhs: Exp) -> Exp {
        let operator = match self.previous.tok_type {
            TokenType::Plus => Operator::Add,
            TokenType::Minus => Operator::Sub,
            TokenType::Slash => Operator::Div,
            TokenType::Star => Operator::Mul,
            TokenType::Greater => Operator::Greater,
            TokenType::Less => Operator::Less,
            TokenType::GreaterEqual => Operator::GreaterEqual,
            TokenType::LessEqual => Operator::LessEqual,
            TokenType::EqualEqual => Operator::Equal,
            TokenType::BangEqual => Operator::NotEqual,
            TokenType::AndAnd => Operator::And,
            _ => Operator::Or,
        };
        let pos = self.previous.pos;
        let precedence = infix_right_precedence(self.previous.tok_type);
        let rhs = self.parse_precedence(precedence);
        Exp::binary(pos, operator, lhs, rhs)
    }
}

fn infix_left_precedence(tok_type: TokenType) -> Precedence {
    match tok_type {
        TokenType::Minus | TokenType::Plus => Precedence::TermLeft,
        TokenType::Slash | TokenType::Star => Precedence::FactorLeft,
        TokenType::Greater
        | TokenType::Less
        | TokenType::GreaterEqual
        | TokenType::LessEqual => Precedence::ComparisonLeft,
        TokenType::EqualEqual | TokenType::BangEqual => Precedence::EqualityLeft,
        TokenType::Equal => Precedence::AssignmentLeft,
        TokenType::AndAnd => Precedence::AndLeft,
        TokenType::OrOr => Precedence::OrLeft,
        _ => Precedence::Nothing,
    }
}

fn infix_right_precedence(tok_type: TokenType) -> Precedence {
    match tok_type {
        TokenType::Minus | TokenType::Plus => Precedence::TermRight,
        TokenType::Slash | TokenType::Star => Precedence::FactorRight,
        TokenType::Greater
        | TokenType::Less
        | TokenType::GreaterEqual
        | TokenType::LessEqual => Precedence::ComparisonRight,
        TokenType::EqualEqual | TokenType::BangEqual => Precedence::EqualityRight,
        TokenType::Equal => Precedence::AssignmentRight,
        TokenType::AndAnd => Precedence::AndRight,
        TokenType::OrOr => Precedence::OrRight,
        _ => Precedence::Nothing,
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Nothing,
    Base,

    // Assignment is right associative, so right comes first
    AssignmentRight,
    AssignmentLeft,

    OrLeft,
    OrRight,
    AndLeft,
    AndRight,
    EqualityLeft,
    EqualityRight,
    ComparisonLeft,
    ComparisonRight,
    TermLeft,
    TermRight,
    FactorLeft,
    FactorRight,
    UnaryRight,
}
