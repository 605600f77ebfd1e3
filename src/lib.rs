//! ircore - a tree-walking evaluator for a Lisp-like IR bound to a reference-counted heap
//!
//! The IR is a homoiconic tree of numbers, identifiers and lists. The evaluator walks
//! that tree against one of three kinds of lexical context (namespace, scope, closure)
//! and drives a manual, reference-counted arena of heap records ("chunks") that
//! emulates the linear memory of a register-less virtual machine.
//!
//! ```text
//! (defn fib (i)
//!     (if (native.i64.le_s i 2)
//!         i
//!         (native.i64.add (fib (native.i64.sub i 1)) (fib (native.i64.sub i 2)))))
//!
//! (loop (i) (1) (if (< i 10) (recur (+ i 1)) (break i)))   ; => 10
//!
//! (do
//!     (let addr (builtin.memory.create_struct 16 0))
//!     (builtin.memory.inc_ref addr)
//!     (builtin.memory.write_i64 addr 0 42)
//!     (builtin.memory.read_i64 addr 0))                      ; => 42
//! ```
//!
//! ## Memory model
//!
//! Chunks start with a reference count of zero and are freed exactly when a
//! `dec_ref` brings the count from one to zero. Teardown is precise: the chunk's
//! mark bitmask says which 8-byte members hold addresses, and only those members are
//! released in turn. Chunks created with a destructor call back into the evaluator
//! before their members are released. Cycles are never collected.
//!
//! ## Limits
//!
//! Ordinary function calls recurse on the host stack and are capped at
//! `EvaluatorConfig::max_call_depth` nested calls ([`DEFAULT_MAX_CALL_DEPTH`] by
//! default); deeper programs fail with `CALL_DEPTH_EXCEEDED`. `loop`, `defnr` and
//! self-recurring closures are trampolined and never hit this cap. A single chunk may
//! not exceed `EvaluatorConfig::max_chunk_bytes` ([`DEFAULT_MAX_CHUNK_BYTES`] by
//! default); larger requests fail with `ALLOCATION_TOO_LARGE`.
//!
//! ## Modules
//!
//! - `ast`: the value tree shared by code and data
//! - `context`: global table and the namespace / scope / closure environments
//! - `memory`: chunk arena, reference counting and teardown
//! - `evaluator`: special forms, function calls and the tail-iteration trampoline
//! - `builtinops`: special-form table and the native function catalogue
//! - `sexpr`: S-expression reader (feature `sexpr`)
//! - `json`: JSON front end (feature `json`)

use std::fmt;
use thiserror::Error;

/// Maximum nesting accepted by the readers before they give up
pub const MAX_PARSE_DEPTH: usize = 128;

/// Default bound on nested ordinary and closure calls
///
/// Ordinary `defn` recursion runs on the host stack, so this bound stands in for the
/// host's own stack limit: exceeding it raises `CALL_DEPTH_EXCEEDED` rather than
/// overflowing. Hosts that run the evaluator on a thread with a larger stack can
/// raise it through [`EvaluatorConfig::max_call_depth`]. Trampolined iterations
/// (`loop`, `defnr`, self-recurring closures) are not counted.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 1_000;

/// Default upper bound on the buffer of a single chunk (64 MiB)
pub const DEFAULT_MAX_CHUNK_BYTES: usize = 1 << 26;

/// Module used by `Evaluator::eval` when no context is given
pub const DEFAULT_MODULE: &str = "user";

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Clone)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (stray tokens, malformed expressions)
    InvalidSyntax,
    /// Input ended before the expression was complete (unclosed parens)
    Incomplete,
    /// Expression nesting exceeded the maximum parse depth
    TooDeeplyNested,
    /// Extra input found after a complete, valid expression
    TrailingContent,
    /// Well-formed input that has no IR representation (JSON objects, booleans, null)
    Unsupported,
}

/// A structured error providing detailed information about a parsing failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred (max 100 chars)
    pub context: Option<String>,
    /// The problematic token or character encountered, if identifiable
    pub found: Option<String>,
}

impl ParseError {
    pub fn new(
        kind: ParseErrorKind,
        message: impl Into<String>,
        context: Option<String>,
        found: Option<String>,
    ) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context,
            found,
        }
    }

    /// Create a simple ParseError with a kind and message but no context
    pub fn from_message(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, None, None)
    }

    /// Create a ParseError with context extracted from input at a given offset
    pub fn with_context(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;

        let context_start = error_offset.saturating_sub(20);
        let context_str: String = input
            .chars()
            .skip(context_start)
            .take(MAX_CONTEXT)
            .collect();

        let mut display_context = String::new();
        if context_start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if context_start + context_str.len() < input.len() {
            display_context.push_str("[...]");
        }
        let display_context = display_context.replace('\n', "\\n").replace('\r', "");

        let found = input
            .get(error_offset..)
            .and_then(|rest| rest.split_whitespace().next())
            .map(str::to_owned);

        Self::new(kind, message, Some(display_context), found)
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(found) = &self.found {
            write!(f, "\nFound: {found}")?;
        }
        if let Some(context) = &self.context {
            write!(f, "\nContext: {context}")?;
        }
        Ok(())
    }
}

/// Malformed special-form usage or a malformed iteration result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyntaxError {
    #[error("'{name}' expects {expect} arguments, got {actual}")]
    IncorrectNumberOfParameters {
        name: String,
        actual: usize,
        expect: usize,
    },
    #[error("loop expects {expect} values, got {actual}")]
    IncorrectNumberOfLoopArgs { actual: usize, expect: usize },
    #[error("break must carry exactly {expect} value, got {actual}")]
    RequireLoopReturnOneValue { actual: usize, expect: usize },
    #[error("iteration body must end in 'recur' or 'break', got {found}")]
    RequireRecurOrBreak { found: String },
    /// A special form with the wrong shape, or used in a context that does not allow it
    #[error("invalid '{form}' expression: {reason}")]
    InvalidForm { form: &'static str, reason: String },
    #[error("invalid expression: {expression}")]
    InvalidExpression { expression: String },
}

impl SyntaxError {
    pub fn code(&self) -> &'static str {
        match self {
            SyntaxError::IncorrectNumberOfParameters { .. } => "INCORRECT_NUMBER_OF_PARAMETERS",
            SyntaxError::IncorrectNumberOfLoopArgs { .. } => "INCORRECT_NUMBER_OF_LOOP_ARGS",
            SyntaxError::RequireLoopReturnOneValue { .. } => "REQUIRE_LOOP_RETURN_ONE_VALUE",
            SyntaxError::RequireRecurOrBreak { .. } => "REQUIRE_RECUR_OR_BREAK",
            SyntaxError::InvalidForm { form, .. } => match *form {
                "const" => "INVALID_CONST_EXPRESSION",
                "let" => "INVALID_LET_EXPRESSION",
                "namespace" => "INVALID_NAMESPACE_EXPRESSION",
                "do" => "INVALID_DO_EXPRESSION",
                "if" => "INVALID_IF_EXPRESSION",
                "loop" => "INVALID_LOOP_EXPRESSION",
                "recur" => "INVALID_RECUR_EXPRESSION",
                "break" => "INVALID_BREAK_EXPRESSION",
                "defn" => "INVALID_DEFN_EXPRESSION",
                "defnr" => "INVALID_DEFNR_EXPRESSION",
                "fn" => "INVALID_FN_EXPRESSION",
                _ => "INVALID_EXPRESSION",
            },
            SyntaxError::InvalidExpression { .. } => "INVALID_EXPRESSION",
        }
    }
}

/// Definition and lookup failures, always carrying the name that was attempted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IdentifierError {
    #[error("identifier \"{name}\" already exists")]
    AlreadyExist { name: String },
    #[error("identifier \"{name}\" not found")]
    NotFound { name: String },
}

impl IdentifierError {
    pub fn code(&self) -> &'static str {
        match self {
            IdentifierError::AlreadyExist { .. } => "IDENTIFIER_ALREADY_EXIST",
            IdentifierError::NotFound { .. } => "IDENTIFIER_NOT_FOUND",
        }
    }
}

/// Runtime failures raised while applying functions or touching the heap.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("address {address} is not a closure")]
    AddressNotAClosure { address: f64 },
    #[error("\"{name}\" is not a function")]
    IdentifierNotAFunction { name: String },
    #[error("{name} is not implemented")]
    NotImplemented { name: String },
    #[error("runtime exception with code {code}")]
    RuntimeException { code: f64 },
    #[error("{name}: division by zero")]
    DivisionByZero { name: &'static str },
    #[error("expected {expected}, got {found}")]
    TypeMismatch {
        expected: &'static str,
        found: String,
    },
    #[error("no live chunk at address {address}")]
    InvalidAddress { address: usize },
    #[error("reference count of chunk {address} is already zero")]
    RefCountUnderflow { address: usize },
    #[error("access of {width} bytes at offset {offset} is outside chunk {address} ({size} bytes)")]
    OutOfBounds {
        address: usize,
        offset: usize,
        width: usize,
        size: usize,
    },
    #[error("chunk {address} is a closure and cannot be written")]
    ReadOnlyChunk { address: usize },
    #[error("cannot run destructor \"{name}\" without an evaluator")]
    DestructorUnavailable { name: String },
    #[error("chunk of {requested} bytes exceeds the allocation limit of {limit} bytes")]
    AllocationTooLarge { requested: usize, limit: usize },
    #[error("call depth limit exceeded (max: {limit})")]
    CallDepthExceeded { limit: usize },
    #[error("i/o failure: {message}")]
    Io { message: String },
}

impl EvalError {
    pub fn code(&self) -> &'static str {
        match self {
            EvalError::AddressNotAClosure { .. } => "ADDRESS_NOT_A_CLOSURE",
            EvalError::IdentifierNotAFunction { .. } => "IDENTIFIER_NOT_A_FUNCTION",
            EvalError::NotImplemented { .. } => "NOT_IMPLEMENTED",
            EvalError::RuntimeException { .. } => "RUNTIME_EXCEPTION",
            EvalError::DivisionByZero { .. } => "DIVISION_BY_ZERO",
            EvalError::TypeMismatch { .. } => "TYPE_MISMATCH",
            EvalError::InvalidAddress { .. } => "INVALID_ADDRESS",
            EvalError::RefCountUnderflow { .. } => "REF_COUNT_UNDERFLOW",
            EvalError::OutOfBounds { .. } => "OUT_OF_BOUNDS",
            EvalError::ReadOnlyChunk { .. } => "READ_ONLY_CHUNK",
            EvalError::DestructorUnavailable { .. } => "DESTRUCTOR_UNAVAILABLE",
            EvalError::AllocationTooLarge { .. } => "ALLOCATION_TOO_LARGE",
            EvalError::CallDepthExceeded { .. } => "CALL_DEPTH_EXCEEDED",
            EvalError::Io { .. } => "IO_ERROR",
        }
    }
}

/// Error types for the interpreter
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("ParseError: {0}")]
    Parse(ParseError),
    #[error("SyntaxError: {0}")]
    Syntax(#[from] SyntaxError),
    #[error("IdentifierError: {0}")]
    Identifier(#[from] IdentifierError),
    #[error("EvalError: {0}")]
    Eval(#[from] EvalError),
}

impl Error {
    /// Machine-readable code, e.g. `IDENTIFIER_NOT_FOUND`
    pub fn code(&self) -> &'static str {
        match self {
            Error::Parse(_) => "PARSE_ERROR",
            Error::Syntax(e) => e.code(),
            Error::Identifier(e) => e.code(),
            Error::Eval(e) => e.code(),
        }
    }

    pub(crate) fn invalid_form(form: &'static str, reason: impl Into<String>) -> Self {
        Error::Syntax(SyntaxError::InvalidForm {
            form,
            reason: reason.into(),
        })
    }

    pub(crate) fn type_mismatch(expected: &'static str, found: &ast::Value) -> Self {
        Error::Eval(EvalError::TypeMismatch {
            expected,
            found: found.to_string(),
        })
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::Parse(e)
    }
}

pub mod ast;
pub mod builtinops;
pub mod context;
pub mod evaluator;
pub mod memory;

#[cfg(feature = "json")]
pub mod json;

#[cfg(feature = "sexpr")]
pub mod sexpr;

pub use ast::Value;
pub use context::Context;
pub use evaluator::{Evaluator, EvaluatorConfig};
pub use memory::{Address, Heap, HeapStatus};
