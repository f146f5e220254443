//! Runtime errors for the Zym virtual machine

use std::fmt;

/// A runtime error that occurred during VM execution
#[derive(Debug, Clone)]
pub struct RuntimeError {
    /// The kind of error
    pub kind: RuntimeErrorKind,

    /// Innermost frame first
    pub stack_trace: Vec<StackFrame>,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind) -> Self {
        Self {
            kind,
            stack_trace: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_trace(mut self, trace: Vec<StackFrame>) -> Self {
        self.stack_trace = trace;
        self
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RuntimeError: {}", self.kind)?;
        if !self.stack_trace.is_empty() {
            write!(f, "\nStack trace:")?;
            for frame in &self.stack_trace {
                write!(f, "\n  {frame}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

/// A stack frame in a stack trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub function_name: String,
    pub module: String,
    /// Original source line, 0 when line info was not kept
    pub line: u32,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] line {} in {}",
            self.module, self.line, self.function_name
        )
    }
}

/// The kind of runtime error
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeErrorKind {
    /// Type mismatch in an operation
    TypeError {
        expected: &'static str,
        got: &'static str,
        operation: &'static str,
    },

    DivisionByZero,

    /// Read or write of a global that was never defined
    UndefinedVariable(String),

    /// Undefined field on a struct
    UndefinedField { type_name: String, field: String },

    IndexOutOfBounds { index: i64, length: usize },

    /// Container indexed with a value of the wrong type
    InvalidIndexType {
        container: &'static str,
        got: &'static str,
    },

    NotIndexable(&'static str),

    NotCallable(&'static str),

    ArityMismatch { expected: u8, got: u8 },

    /// No overload of a dispatcher takes this many arguments
    NoMatchingOverload { name: String, arity: u8 },

    /// Call depth exceeded the configured frame limit
    StackOverflow,

    InvalidOpcode(u8),

    /// A native function reported an error
    Native { name: &'static str, message: String },

    /// Writing through a chain of references never reached a location
    ReferenceCycle,

    /// `capture` or `abort` with no matching `withPrompt` active
    MissingPrompt,

    /// Malformed bytecode or VM state
    Internal(String),
}

impl fmt::Display for RuntimeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeErrorKind::TypeError {
                expected,
                got,
                operation,
            } => {
                write!(f, "type error: {operation} expected {expected}, got {got}")
            }
            RuntimeErrorKind::DivisionByZero => write!(f, "division by zero"),
            RuntimeErrorKind::UndefinedVariable(name) => {
                write!(f, "undefined variable '{name}'")
            }
            RuntimeErrorKind::UndefinedField { type_name, field } => {
                write!(f, "undefined field '{field}' on type {type_name}")
            }
            RuntimeErrorKind::IndexOutOfBounds { index, length } => {
                write!(f, "index {index} out of bounds for length {length}")
            }
            RuntimeErrorKind::InvalidIndexType { container, got } => {
                write!(f, "cannot index {container} with {got}")
            }
            RuntimeErrorKind::NotIndexable(type_name) => {
                write!(f, "{type_name} is not indexable")
            }
            RuntimeErrorKind::NotCallable(type_name) => {
                write!(f, "{type_name} is not callable")
            }
            RuntimeErrorKind::ArityMismatch { expected, got } => {
                write!(f, "expected {expected} arguments, got {got}")
            }
            RuntimeErrorKind::NoMatchingOverload { name, arity } => {
                write!(f, "no overload of '{name}' takes {arity} arguments")
            }
            RuntimeErrorKind::StackOverflow => write!(f, "stack overflow"),
            RuntimeErrorKind::InvalidOpcode(op) => write!(f, "invalid opcode: {op}"),
            RuntimeErrorKind::Native { name, message } => write!(f, "{name}: {message}"),
            RuntimeErrorKind::ReferenceCycle => write!(f, "reference chain does not end"),
            RuntimeErrorKind::MissingPrompt => write!(f, "no active prompt for this tag"),
            RuntimeErrorKind::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

/// Result type for VM operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_trace() {
        let error = RuntimeError::new(RuntimeErrorKind::DivisionByZero).with_trace(vec![
            StackFrame {
                function_name: "half".into(),
                module: "main".into(),
                line: 2,
            },
            StackFrame {
                function_name: "<script>".into(),
                module: "main".into(),
                line: 5,
            },
        ]);
        assert_eq!(
            error.to_string(),
            "RuntimeError: division by zero\nStack trace:\n  [main] line 2 in half\n  \
             [main] line 5 in <script>"
        );
    }
}
