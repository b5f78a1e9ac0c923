//! `fb-blas` - BLAS backend boundary for flopbench.
//!
//! This crate provides:
//! - A `GemmOp` describing one single-precision GEMM call and its argument checks
//! - A `BlasBackend` trait for pluggable BLAS implementations
//! - A pure-Rust `ReferenceBackend`
//! - A `TrampolineBackend` that forwards to whatever libblastrampoline has loaded

pub mod backend;
pub mod error;
pub mod gemm;
pub mod reference;
pub mod trampoline;

// Re-export primary types at the crate root for convenience.
pub use backend::{open, BackendSelection, BlasBackend};
pub use error::{BlasError, Result};
pub use gemm::{GemmOp, Layout, Transpose};
pub use reference::ReferenceBackend;
pub use trampoline::TrampolineBackend;
