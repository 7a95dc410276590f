// The error taxonomy. Everything that can go wrong after parsing is
// an ErrorKind; the VM wraps the kind with the failing instruction,
// its span, and the call stack at the moment of failure. Compile
// problems stay separate because they surface as diagnostics and
// never produce a program.

use thiserror::Error;

use crate::ids::{FunctionId, SymbolId};
use crate::span::{Diagnostic, Span};

#[derive(Clone, Debug, PartialEq, Error)]
pub enum ErrorKind {
    // Decode
    #[error("invalid opcode byte 0x{0:02x}")]
    InvalidOpcode(u8),
    #[error("varint overflow")]
    VarintOverflow,
    #[error("unexpected end of bytecode")]
    UnexpectedEof,

    // Runtime
    #[error("value stack underflow")]
    StackUnderflow,
    #[error("instruction is missing operand {0}")]
    MissingOperand(usize),
    #[error("invalid local index {0}")]
    InvalidLocal(usize),
    #[error("invalid constant index {0}")]
    InvalidConstant(usize),
    #[error("unknown function {0}")]
    UnknownFunction(FunctionId),
    #[error("field access on non-struct value of type {0}")]
    NotAStruct(&'static str),
    #[error("missing field on instance of {type_name}")]
    MissingField { type_name: String },
    #[error("return with an empty call stack")]
    ReturnWithoutFrame,
    #[error("make_struct operand mismatch")]
    MalformedStruct,
    #[error("type mismatch: {operation} does not apply to {lhs} and {rhs}")]
    TypeMismatch { operation: String, lhs: &'static str, rhs: &'static str },
    #[error("expected {expected}, got {got}")]
    TypeError { expected: &'static str, got: &'static str },
    #[error("division by zero")]
    DivisionByZero,
    #[error("{0}")]
    Bridge(String),

    // Policy
    #[error("bridge symbol {0} is not allowed by the configured capabilities")]
    BridgeDenied(SymbolId),
    #[error("unknown bridge symbol {0}")]
    UnknownBridge(SymbolId),

    // Resource
    #[error("instruction budget exceeded ({budget} instructions)")]
    InstructionBudgetExceeded { budget: u64 },
    #[error("call depth limit exceeded ({limit} frames)")]
    CallDepthExceeded { limit: usize },
    #[error("value stack limit exceeded ({limit} values)")]
    ValueStackExceeded { limit: usize },
    #[error("time limit exceeded ({elapsed_ms}ms elapsed, {limit_ms}ms allowed)")]
    TimeLimitExceeded { elapsed_ms: u64, limit_ms: u64 },
}

// One entry of the captured call stack: the frame's function and the
// span of the call site that created it.
#[derive(Clone, Debug, PartialEq)]
pub struct StackTraceFrame {
    pub function_name: String,
    pub call_site: Option<Span>,
}

// An ErrorKind decorated by the VM with where it happened.
#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub symbol: Option<SymbolId>,
    pub instruction: Option<usize>,
    pub span: Option<Span>,
    pub call_stack: Vec<StackTraceFrame>,
}

impl RuntimeError {
    pub fn bare(kind: ErrorKind) -> RuntimeError {
        RuntimeError {
            kind,
            symbol: None,
            instruction: None,
            span: None,
            call_stack: Vec::new(),
        }
    }
}

impl From<ErrorKind> for RuntimeError {
    fn from(kind: ErrorKind) -> RuntimeError {
        RuntimeError::bare(kind)
    }
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(span) = self.span {
            write!(f, " at {}", span)?;
        }
        if let Some(index) = self.instruction {
            write!(f, " (instruction {})", index)?;
        }
        for frame in &self.call_stack {
            write!(f, "\n  in {}", frame.function_name)?;
            if let Some(site) = frame.call_site {
                write!(f, " (called at {})", site)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

// Compile-time failures carry the offending construct's span and
// lower into diagnostics; they never escape the frontend.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("{message}")]
pub struct CompileError {
    pub message: String,
    pub span: Option<Span>,
}

impl CompileError {
    pub fn new(message: impl Into<String>, span: Option<Span>) -> CompileError {
        CompileError { message: message.into(), span }
    }

    pub fn into_diagnostic(self) -> Diagnostic {
        Diagnostic::error(self.message, self.span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denied_message_names_the_policy() {
        let message = ErrorKind::BridgeDenied(SymbolId::of("Date.now")).to_string();
        assert!(message.contains("not allowed"));
    }

    #[test]
    fn test_runtime_error_display_carries_stack() {
        let mut error = RuntimeError::bare(ErrorKind::StackUnderflow);
        error.call_stack.push(StackTraceFrame {
            function_name: "add".to_string(),
            call_site: None,
        });
        let text = error.to_string();
        assert!(text.contains("value stack underflow"));
        assert!(text.contains("in add"));
    }
}
