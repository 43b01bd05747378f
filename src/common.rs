use std::fmt;
use std::io;

use thiserror::Error;

use crate::ast::Pos;
use crate::vm::{Fault, MachineError};

/// Lexical and syntax errors reported by the front end.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ParseError {
    pub message: String,
    pub pos: Pos,
}

impl ParseError {
    pub fn new(message: impl Into<String>, pos: Pos) -> Self {
        Self {
            message: message.into(),
            pos,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SemanticErrorKind {
    Redeclaration,
    UndefinedSymbol,
    TypeMismatch,
    ArityMismatch,
    InvalidArraySize,
    NotAnArray,
    MissingReturn,
    VoidMisuse,
}

/// A recoverable error found by the semantic analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct SemanticError {
    pub kind: SemanticErrorKind,
    pub message: String,
    pub pos: Pos,
}

impl SemanticError {
    pub fn new(kind: SemanticErrorKind, message: impl Into<String>, pos: Pos) -> Self {
        Self {
            kind,
            message: message.into(),
            pos,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Error: {} at {}", self.message, self.pos)
    }
}

impl fmt::Display for SemanticError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Error: {} at {}", self.message, self.pos)
    }
}

/// Fatal conditions that abort code generation.
#[derive(Debug, Error)]
pub enum CodeGenError {
    #[error("no function named 'main' was declared")]
    MissingMainFunction,
    #[error("cannot write output to '{path}': {source}")]
    OutputTargetUnavailable {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("function '{0}' is called but never defined")]
    UnresolvedCalleeAddress(String),
    #[error("internal code generator fault: {0}")]
    Internal(String),
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("cannot read '{path}': {source}")]
    File {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("{0} error(s); no code generated")]
    Syntax(usize),
    #[error("{0} error(s); no code generated")]
    Semantic(usize),
    #[error(transparent)]
    CodeGen(#[from] CodeGenError),
    #[error("Runtime error: {0}")]
    Runtime(#[from] MachineError),
    #[error("Runtime fault: {}", .0.describe())]
    Fault(Fault),
}

pub type CompileResult<T> = Result<T, CompileError>;
