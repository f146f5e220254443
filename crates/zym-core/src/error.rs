//! Crate-level error types

use thiserror::Error;

use crate::bytecode::SerializeError;
use crate::compiler::CompileError;
use crate::config::ConfigError;
use crate::loader::LoadError;
use crate::object::ObjRef;
use crate::vm::RuntimeError;

/// Unrecoverable internal failures. The heap is in an undefined state once
/// one of these happens, so they abort instead of propagating.
#[derive(Debug, Clone, Error)]
pub enum FatalError {
    #[error("garbage collection requested while sweeping")]
    GcReentrancy,

    #[error("stale heap handle {0:?}")]
    StaleHandle(ObjRef),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Report an unrecoverable error and abort the current thread
#[cold]
pub fn fatal(error: FatalError) -> ! {
    tracing::error!(%error, "fatal");
    panic!("{error}");
}

/// Any failure surfaced by the public entry points
#[derive(Debug, Error)]
pub enum ZymError {
    #[error("{}", format_compile_errors(.0))]
    Compile(Vec<CompileError>),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Serialize(#[from] SerializeError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<Vec<CompileError>> for ZymError {
    fn from(errors: Vec<CompileError>) -> Self {
        ZymError::Compile(errors)
    }
}

fn format_compile_errors(errors: &[CompileError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

pub type Result<T> = std::result::Result<T, ZymError>;
