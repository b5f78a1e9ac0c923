//! Correctness gate: one small, known GEMM through the selected backend
//! before any timing starts.

use std::fmt;

use fb_blas::{BlasBackend, GemmOp, Layout, Transpose};
use tracing::{info, warn};

use crate::error::{BenchError, Result};
use crate::fpmode::DenormalGuard;

/// Largest absolute error accepted per entry (exclusive).
pub const TOLERANCE: f32 = 0.5;

/// Column-major 2x3 A = [1 2 3; 4 5 6].
const INPUT_A: [f32; 6] = [1.0, 4.0, 2.0, 5.0, 3.0, 6.0];
/// Column-major 2x3 B = [7 9 11; 8 10 12], used transposed.
const INPUT_B: [f32; 6] = [7.0, 8.0, 9.0, 10.0, 11.0, 12.0];

/// A * B^T in column-major order, i.e. [58 64; 139 154].
pub const EXPECTED: [f32; 4] = [58.0, 139.0, 64.0, 154.0];

/// The validation call: `C := A * B^T + C` with `C` starting at zero.
pub fn validation_op() -> GemmOp {
    GemmOp {
        layout: Layout::ColMajor,
        trans_a: Transpose::NoTrans,
        trans_b: Transpose::Trans,
        m: 2,
        n: 2,
        k: 3,
        alpha: 1.0,
        lda: 2,
        ldb: 2,
        beta: 1.0,
        ldc: 2,
    }
}

/// True when every entry of a column-major result is within [`TOLERANCE`] of [`EXPECTED`].
pub fn within_tolerance(got: &[f32; 4]) -> bool {
    got.iter()
        .zip(EXPECTED.iter())
        .all(|(g, e)| (g - e).abs() < TOLERANCE)
}

/// Reorders a column-major 2x2 matrix for row-by-row display.
fn row_major(c: &[f32; 4]) -> [f32; 4] {
    [c[0], c[2], c[1], c[3]]
}

/// Outcome of a gate run that produced a result.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    /// Backend result, column-major.
    pub got: [f32; 4],
    /// Whether the backend reported one internal thread after being asked to.
    pub threads_honored: bool,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        within_tolerance(&self.got)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let e = row_major(&EXPECTED);
        let g = row_major(&self.got);
        write!(
            f,
            "BLAS validation: expect [{:.0}, {:.0}, {:.0}, {:.0}], got [{:.0}, {:.0}, {:.0}, {:.0}].",
            e[0], e[1], e[2], e[3], g[0], g[1], g[2], g[3]
        )
    }
}

/// Run the correctness gate.
///
/// Forces the backend to one internal thread, computes `A * B^T` and
/// compares it to [`EXPECTED`]. Prints the expected and actual values with
/// a pass/fail verdict. A backend that ignores the thread request is
/// reported but not rejected.
///
/// # Errors
/// Returns `ValidationFailed` (values in row-major reading order) if any
/// entry is off by [`TOLERANCE`] or more, or the backend's own error if the
/// call is rejected.
pub fn validate<K: BlasBackend + ?Sized>(backend: &K) -> Result<ValidationReport> {
    let _denormals = DenormalGuard::new();

    backend.set_num_threads(1);
    let mut c = [0.0f32; 4];
    backend.sgemm(&validation_op(), &INPUT_A, &INPUT_B, &mut c)?;

    let threads = backend.num_threads();
    let threads_honored = threads == 1;
    if !threads_honored {
        println!("Error: set_num_threads(1) failed");
        warn!(backend = backend.name(), threads, "backend ignored the single-thread request");
    }

    let report = ValidationReport {
        got: c,
        threads_honored,
    };

    if report.passed() {
        println!("{} Passed!", report);
        info!(backend = backend.name(), "BLAS validation passed");
        Ok(report)
    } else {
        println!("{} Failed!", report);
        Err(BenchError::ValidationFailed {
            expected: row_major(&EXPECTED),
            got: row_major(&c),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fb_blas::ReferenceBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Writes a fixed column-major result regardless of inputs.
    #[derive(Debug)]
    struct FixedOutput {
        out: [f32; 4],
        threads: AtomicUsize,
        honor_threads: bool,
        calls: AtomicUsize,
    }

    impl FixedOutput {
        fn new(out: [f32; 4]) -> Self {
            FixedOutput {
                out,
                threads: AtomicUsize::new(4),
                honor_threads: true,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl BlasBackend for FixedOutput {
        fn name(&self) -> &str {
            "fixed"
        }

        fn sgemm(&self, op: &GemmOp, a: &[f32], b: &[f32], c: &mut [f32]) -> fb_blas::Result<()> {
            op.check(a.len(), b.len(), c.len())?;
            self.calls.fetch_add(1, Ordering::Relaxed);
            c.copy_from_slice(&self.out);
            Ok(())
        }

        fn set_num_threads(&self, n: usize) {
            if self.honor_threads {
                self.threads.store(n, Ordering::Relaxed);
            }
        }

        fn num_threads(&self) -> usize {
            self.threads.load(Ordering::Relaxed)
        }

        fn loaded_libraries(&self) -> Vec<String> {
            vec!["fixed".to_string()]
        }
    }

    #[test]
    fn test_reference_passes_exactly() {
        let report = validate(&ReferenceBackend::new()).unwrap();
        assert!(report.passed());
        assert!(report.threads_honored);
        assert_eq!(report.got, EXPECTED);
        assert_eq!(row_major(&report.got), [58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_zero_kernel_rejected() {
        let stub = FixedOutput::new([0.0; 4]);
        match validate(&stub) {
            Err(err @ BenchError::ValidationFailed { .. }) => {
                assert_eq!(err.exit_code(), 1);
                if let BenchError::ValidationFailed { expected, got } = err {
                    assert_eq!(expected, [58.0, 64.0, 139.0, 154.0]);
                    assert_eq!(got, [0.0; 4]);
                }
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(stub.calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_rounding_within_tolerance_accepted() {
        let stub = FixedOutput::new([58.49, 138.51, 64.3, 153.6]);
        assert!(validate(&stub).is_ok());
    }

    #[test]
    fn test_tolerance_boundary() {
        assert!(within_tolerance(&[58.25, 139.0, 64.0, 154.0]));
        assert!(!within_tolerance(&[58.5, 139.0, 64.0, 154.0]));
        assert!(!within_tolerance(&[58.0, 139.0, 64.0, 154.75]));
        assert!(!within_tolerance(&[f32::NAN, 139.0, 64.0, 154.0]));
    }

    #[test]
    fn test_swapped_layout_rejected() {
        // Row-major output from a backend wired with the wrong layout.
        let stub = FixedOutput::new([58.0, 64.0, 139.0, 154.0]);
        assert!(matches!(
            validate(&stub),
            Err(BenchError::ValidationFailed { .. })
        ));
    }

    #[test]
    fn test_ignored_thread_request_is_not_fatal() {
        let mut stub = FixedOutput::new(EXPECTED);
        stub.honor_threads = false;
        let report = validate(&stub).unwrap();
        assert!(!report.threads_honored);
        assert!(report.passed());
    }

    #[test]
    fn test_report_display() {
        let report = ValidationReport {
            got: EXPECTED,
            threads_honored: true,
        };
        assert_eq!(
            report.to_string(),
            "BLAS validation: expect [58, 64, 139, 154], got [58, 64, 139, 154]."
        );
        let report = ValidationReport {
            got: [0.0; 4],
            threads_honored: true,
        };
        assert_eq!(
            report.to_string(),
            "BLAS validation: expect [58, 64, 139, 154], got [0, 0, 0, 0]."
        );
    }

    #[test]
    fn test_gate_leaves_fp_mode_untouched() {
        let before = crate::fpmode::current_mode();
        let _ = validate(&ReferenceBackend::new());
        assert_eq!(crate::fpmode::current_mode(), before);
    }
}
