//! The snippet language: a small, Python-flavoured scripting language that the
//! console executes against a persistent namespace.
//!
//! This is **not** a full Python implementation. It covers the subset that
//! interactive numeric/plotting snippets lean on:
//! - indentation blocks, `if`/`elif`/`else`, `while`, `for`, `def`,
//!   `try`/`except`/`finally`, `raise`, `import`, `from ... import`
//! - ints, floats, strings (including f-strings), lists, tuples, dicts
//! - a builtin library (`print`, `len`, `range`, ...) plus the `math`, `sys`
//!   and `matplotlib.pyplot` modules
//!
//! Figures created through `matplotlib.pyplot` land in a [`FigureRegistry`]
//! owned by the caller, which is how the engine finds plots after a run.

mod ast;
mod builtins;
mod exception;
mod figure;
mod interp;
mod lexer;
mod parser;
mod value;

use thiserror::Error;

pub use crate::lang::ast::{Expr, Program, Stmt, StmtKind};
pub use crate::lang::exception::{Exception, Frame};
pub use crate::lang::figure::{Figure, FigureId, FigureRegistry, Rgb, Series, SeriesKind};
pub use crate::lang::interp::{Interpreter, Sink, Streams};
pub use crate::lang::value::{
    is_identifier, Dict, Namespace, RangeValue, StreamKind, Value, MAX_CONTAINER_DEPTH,
};

/// Library bindings a fresh namespace starts with (`math`, `plt`).
pub fn prelude() -> Vec<(&'static str, Value)> {
    builtins::prelude()
}

/// Error raised while turning source text into an AST.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}: {message} (line {line})", self.type_name())]
pub struct SyntaxError {
    pub message: String,
    pub line: usize,
    pub indentation: bool,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, line: usize) -> Self {
        Self {
            message: message.into(),
            line,
            indentation: false,
        }
    }

    pub fn indentation(message: impl Into<String>, line: usize) -> Self {
        Self {
            message: message.into(),
            line,
            indentation: true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        if self.indentation {
            "IndentationError"
        } else {
            "SyntaxError"
        }
    }

    /// Render the error the way the console shows it to users.
    pub fn to_report(&self) -> String {
        format!(
            "  File \"<console>\", line {}\n{}: {}\n",
            self.line,
            self.type_name(),
            self.message
        )
    }
}

/// Parse a whole snippet (a sequence of statements).
pub fn parse_program(source: &str) -> Result<Program, SyntaxError> {
    parser::parse_program(source)
}

/// Parse a single expression, as used by expression evaluation.
pub fn parse_expression(source: &str) -> Result<Expr, SyntaxError> {
    parser::parse_expression(source)
}
