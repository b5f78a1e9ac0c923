use std::fmt::Debug;
use std::path::PathBuf;

use crate::error::Result;
use crate::gemm::GemmOp;
use crate::reference::ReferenceBackend;
use crate::trampoline::TrampolineBackend;

/// Trait for pluggable BLAS backends.
///
/// A backend exposes a single-precision GEMM kernel together with the
/// knob controlling its internal parallelism. The internal thread count is
/// independent of how many threads call `sgemm` concurrently.
pub trait BlasBackend: Send + Sync + Debug {
    /// Returns the name of this backend (e.g., "reference", "lbt").
    fn name(&self) -> &str;

    /// Confirm that an `sgemm_` implementation is available.
    ///
    /// Backends that always carry their own kernel keep the default.
    fn resolve_kernel(&self) -> Result<()> {
        Ok(())
    }

    /// `C := alpha * op(A) * op(B) + beta * C`.
    ///
    /// Implementations validate `op` against the buffer lengths with
    /// [`GemmOp::check`] before touching any memory. When `beta == 0`, `C`
    /// is write-only.
    fn sgemm(&self, op: &GemmOp, a: &[f32], b: &[f32], c: &mut [f32]) -> Result<()>;

    /// Request the number of threads the backend uses inside one call.
    fn set_num_threads(&self, n: usize);

    /// Number of threads the backend currently uses inside one call.
    fn num_threads(&self) -> usize;

    /// Names of the implementation libraries currently backing this backend.
    fn loaded_libraries(&self) -> Vec<String>;
}

/// Which backend to open at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendSelection {
    /// libblastrampoline, optionally from an explicit path.
    Trampoline { library: Option<PathBuf> },
    /// The pure-Rust reference kernel.
    Reference,
}

impl Default for BackendSelection {
    fn default() -> Self {
        BackendSelection::Trampoline { library: None }
    }
}

/// Open the selected backend. Call [`BlasBackend::resolve_kernel`] before
/// the first GEMM.
///
/// # Errors
/// Returns an error if libblastrampoline cannot be loaded or lacks its entry points.
pub fn open(selection: &BackendSelection) -> Result<Box<dyn BlasBackend>> {
    match selection {
        BackendSelection::Trampoline { library } => {
            let backend = match library {
                Some(path) => TrampolineBackend::open(path)?,
                None => TrampolineBackend::open_default()?,
            };
            Ok(Box::new(backend))
        }
        BackendSelection::Reference => Ok(Box::new(ReferenceBackend::new())),
    }
}
