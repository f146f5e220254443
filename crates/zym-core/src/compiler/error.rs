//! Compile error types

use thiserror::Error;

use crate::parser::ParseErrorKind;

/// A diagnostic attributed to a module and original source line
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub module: String,
    pub line: u32,
}

impl CompileError {
    #[must_use]
    pub fn new(kind: CompileErrorKind, module: impl Into<String>, line: u32) -> Self {
        Self {
            kind,
            module: module.into(),
            line,
        }
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] line {}: {}", self.module, self.line, self.kind)
    }
}

impl std::error::Error for CompileError {}

/// The kind of compile error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileErrorKind {
    #[error("{0}")]
    Parse(ParseErrorKind),

    // ===== Types =====
    #[error("undefined struct '{0}'")]
    UndefinedStruct(String),

    #[error("struct '{name}' has {expected} fields but {found} values were given")]
    StructArity {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("field '{field}' initialized twice in '{name}' literal")]
    DuplicateField { name: String, field: String },

    #[error("struct '{name}' has no field '{field}'")]
    UndefinedField { name: String, field: String },

    #[error("duplicate field '{field}' in struct '{name}'")]
    DuplicateFieldDecl { name: String, field: String },

    #[error("enum '{name}' has no variant '{variant}'")]
    UndefinedVariant { name: String, variant: String },

    #[error("too many enum types (limit is 65536)")]
    EnumOverflow,

    #[error("enum '{0}' has too many variants (limit is 65536)")]
    TooManyVariants(String),

    #[error("cannot assign to type '{0}'")]
    AssignToType(String),

    // ===== References =====
    #[error(
        "cannot take a reference to a temporary value; 'ref' needs a variable, element or field"
    )]
    RefToTemporary,

    #[error("'slot' must bind a variable, element or field, not a temporary value")]
    SlotToTemporary,

    #[error(
        "argument {index} of '{function}' is a '{qualifier}' parameter and needs a variable, \
         element or field"
    )]
    QualifiedArgument {
        function: String,
        index: usize,
        qualifier: &'static str,
    },

    // ===== Overloads =====
    #[error("'{0}' is overloaded; it cannot be assigned to or referenced here")]
    AmbiguousOverload(String),

    #[error("function '{name}' with {arity} parameters is already declared")]
    DuplicateFunction { name: String, arity: usize },

    #[error("'{0}' has too many overloads (limit is 16)")]
    TooManyOverloads(String),

    // ===== Variables =====
    #[error("variable '{0}' is already declared in this scope")]
    DuplicateVariable(String),

    #[error("parameter '{0}' is declared twice")]
    DuplicateParameter(String),

    // ===== Control flow =====
    #[error("'break' outside of a loop")]
    BreakOutsideLoop,

    #[error("'continue' outside of a loop")]
    ContinueOutsideLoop,

    #[error("label '{0}' is already defined in this function")]
    DuplicateLabel(String),

    #[error("undefined label '{0}'")]
    UndefinedLabel(String),

    #[error("too many labels in one function (limit is 256)")]
    TooManyLabels,

    #[error("goto '{0}' jumps into a block that does not enclose it")]
    GotoIntoScope(String),

    #[error("goto '{label}' jumps over the declaration of '{variable}'")]
    GotoSkipsDeclaration { label: String, variable: String },

    #[error("jump distance too large")]
    JumpTooLarge,

    // ===== Limits =====
    #[error("too many local variables in function")]
    TooManyLocals,

    #[error("expression needs too many registers")]
    TooManyRegisters,

    #[error("too many captured variables in function")]
    TooManyUpvalues,

    #[error("too many constants in one function")]
    TooManyConstants,

    #[error("too many arguments (limit is 255)")]
    TooManyArguments,

    #[error("too many parameters (limit is 255)")]
    TooManyParameters,

    #[error("too many global variables")]
    TooManyGlobals,
}
