//! # Error Types
//!
//! This module defines the error types surfaced by each stage of the
//! pipeline: lexing, parsing, compiling, and executing bytecode on the VM.
//!
//! ## Design
//! - Each stage gets its own error enum so a caller can match on where a
//!   program failed without string-sniffing a single catch-all type.
//! - All of them implement [`fmt::Display`] by hand (no derive macro) and
//!   [`std::error::Error`], so they compose with `?` and with each other via
//!   [`Error`], the umbrella enum returned by [`crate::run_source`].
//!
//! ## Categories
//! - [`LexError`] / [`ParseError`] — front-end errors, always reported with a
//!   source line number.
//! - [`CompileError`] — scope/bytecode-emission errors (undefined locals in
//!   a stale scope, jump displacement overflow, duplicate struct properties).
//! - [`RuntimeError`] — faults raised by the running VM (arity mismatches,
//!   undefined globals, type errors, unknown methods/blueprints).

use std::fmt;

/// Error produced while scanning source text into tokens.
#[derive(Debug, PartialEq)]
pub struct LexError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lex error (line {}): {}", self.line, self.message)
    }
}

impl std::error::Error for LexError {}

/// Error produced while parsing a token stream into an AST.
#[derive(Debug, PartialEq)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error (line {}): {}", self.line, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Error produced while lowering an AST to a bytecode chunk.
#[derive(Debug, PartialEq)]
pub enum CompileError {
    /// A name was referenced as a local but does not resolve in the current
    /// function's scope stack.
    UndefinedLocal(String),
    /// A forward/backward jump displacement does not fit in a signed 16-bit
    /// offset.
    JumpOverflow,
    /// A struct declared the same property name twice.
    DuplicateProperty { blueprint: String, property: String },
    /// An assignment target is not an lvalue (variable, attribute, or deref).
    InvalidAssignTarget,
    /// `impl` block references a struct that was never declared.
    UnknownBlueprint(String),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::UndefinedLocal(name) => {
                write!(f, "undefined local '{}'", name)
            }
            CompileError::JumpOverflow => {
                write!(f, "jump displacement does not fit in 16 bits")
            }
            CompileError::DuplicateProperty { blueprint, property } => {
                write!(
                    f,
                    "struct '{}' declares property '{}' more than once",
                    blueprint, property
                )
            }
            CompileError::InvalidAssignTarget => {
                write!(f, "invalid assignment target")
            }
            CompileError::UnknownBlueprint(name) => {
                write!(f, "impl references undeclared struct '{}'", name)
            }
        }
    }
}

impl std::error::Error for CompileError {}

/// Error produced by the running VM.
#[derive(Debug, PartialEq)]
pub enum RuntimeError {
    /// Reference to a global name that was never bound.
    UndefinedGlobal(String),
    /// Reference to a struct property that the blueprint never declared.
    UndefinedProperty(String),
    /// A call supplied a different argument count than the callee expects.
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
    },
    /// An operation received operands of the wrong type (includes `==`
    /// between mismatched tags).
    TypeError(String),
    /// A method call named a method the receiver's blueprint does not have.
    UnknownMethod(String),
    /// `STRUCT`/`IMPL` named a blueprint that was never registered.
    UnknownBlueprint(String),
    /// Malformed bytecode: unknown opcode, truncated operand, stack
    /// underflow/overflow. Represents a compiler or VM bug, not a guest
    /// program error.
    VmInvariant(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::UndefinedGlobal(name) => {
                write!(f, "undefined global '{}'", name)
            }
            RuntimeError::UndefinedProperty(name) => {
                write!(f, "undefined property '{}'", name)
            }
            RuntimeError::ArityMismatch { name, expected, got } => {
                write!(
                    f,
                    "function '{}' requires {} arguments, got {}",
                    name, expected, got
                )
            }
            RuntimeError::TypeError(msg) => write!(f, "type error: {}", msg),
            RuntimeError::UnknownMethod(name) => {
                write!(f, "unknown method '{}'", name)
            }
            RuntimeError::UnknownBlueprint(name) => {
                write!(f, "unknown struct '{}'", name)
            }
            RuntimeError::VmInvariant(msg) => write!(f, "vm invariant violated: {}", msg),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// Umbrella error returned by [`crate::run_source`], unifying every stage so
/// the CLI driver can report a single exit path.
#[derive(Debug)]
pub enum Error {
    Lex(LexError),
    Parse(ParseError),
    Compile(CompileError),
    Runtime(RuntimeError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Lex(e) => write!(f, "{}", e),
            Error::Parse(e) => write!(f, "{}", e),
            Error::Compile(e) => write!(f, "compile error: {}", e),
            Error::Runtime(e) => write!(f, "runtime error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<LexError> for Error {
    fn from(e: LexError) -> Self {
        Error::Lex(e)
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::Parse(e)
    }
}

impl From<CompileError> for Error {
    fn from(e: CompileError) -> Self {
        Error::Compile(e)
    }
}

impl From<RuntimeError> for Error {
    fn from(e: RuntimeError) -> Self {
        Error::Runtime(e)
    }
}
