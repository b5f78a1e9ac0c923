use fb_blas::BlasError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("no BLAS backend available for sgemm_: {reason}. Use environment variable LBT_DEFAULT_LIBS to specify one.")]
    BackendUnavailable { reason: String },
    #[error("BLAS validation failed: expected {expected:?}, got {got:?}")]
    ValidationFailed { expected: [f32; 4], got: [f32; 4] },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("BLAS error: {0}")]
    Blas(BlasError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BenchError {
    /// Process exit status for this error. Every fatal condition exits with 1.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

impl From<BlasError> for BenchError {
    fn from(err: BlasError) -> Self {
        match err {
            BlasError::LibraryLoad { .. }
            | BlasError::MissingSymbol(_)
            | BlasError::KernelNotFound(_) => BenchError::BackendUnavailable {
                reason: err.to_string(),
            },
            other => BenchError::Blas(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, BenchError>;
