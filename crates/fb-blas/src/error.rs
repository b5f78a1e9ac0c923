use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlasError {
    #[error("failed to load {path}: {reason}")]
    LibraryLoad { path: PathBuf, reason: String },
    #[error("missing symbol: {0}")]
    MissingSymbol(String),
    #[error("no BLAS kernel is loaded for {0}")]
    KernelNotFound(String),
    #[error("leading dimension of {operand} is {ld}, must be at least {min}")]
    InvalidLeadingDimension {
        operand: &'static str,
        ld: usize,
        min: usize,
    },
    #[error("buffer {operand} holds {got} elements, GEMM needs {needed}")]
    BufferTooSmall {
        operand: &'static str,
        needed: usize,
        got: usize,
    },
}

pub type Result<T> = std::result::Result<T, BlasError>;
