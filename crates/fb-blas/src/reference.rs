use std::sync::atomic::{AtomicUsize, Ordering};

use crate::backend::BlasBackend;
use crate::error::Result;
use crate::gemm::{GemmOp, Transpose};

/// Pure-Rust reference BLAS backend.
///
/// Implements GEMM with a straightforward triple loop optimized for
/// correctness rather than peak performance. Always computes on the calling
/// thread; the thread-count knob is recorded but has no effect.
#[derive(Debug)]
pub struct ReferenceBackend {
    threads: AtomicUsize,
}

impl ReferenceBackend {
    pub fn new() -> Self {
        ReferenceBackend {
            threads: AtomicUsize::new(1),
        }
    }
}

impl Default for ReferenceBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl BlasBackend for ReferenceBackend {
    fn name(&self) -> &str {
        "reference"
    }

    fn sgemm(&self, op: &GemmOp, a: &[f32], b: &[f32], c: &mut [f32]) -> Result<()> {
        op.check(a.len(), b.len(), c.len())?;

        let layout = op.layout;
        for j in 0..op.n {
            for i in 0..op.m {
                let mut sum = 0.0f32;
                for p in 0..op.k {
                    let a_ip = match op.trans_a {
                        Transpose::NoTrans => a[layout.index(i, p, op.lda)],
                        Transpose::Trans => a[layout.index(p, i, op.lda)],
                    };
                    let b_pj = match op.trans_b {
                        Transpose::NoTrans => b[layout.index(p, j, op.ldb)],
                        Transpose::Trans => b[layout.index(j, p, op.ldb)],
                    };
                    sum += a_ip * b_pj;
                }

                let idx = layout.index(i, j, op.ldc);
                // beta == 0 must not read C, so NaN/Inf garbage is overwritten.
                c[idx] = if op.beta == 0.0 {
                    op.alpha * sum
                } else {
                    op.alpha * sum + op.beta * c[idx]
                };
            }
        }
        Ok(())
    }

    fn set_num_threads(&self, n: usize) {
        self.threads.store(n, Ordering::Relaxed);
    }

    fn num_threads(&self) -> usize {
        self.threads.load(Ordering::Relaxed)
    }

    fn loaded_libraries(&self) -> Vec<String> {
        vec!["reference".to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemm::Layout;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    fn backend() -> ReferenceBackend {
        ReferenceBackend::new()
    }

    fn op(m: usize, n: usize, k: usize, beta: f32) -> GemmOp {
        GemmOp {
            layout: Layout::ColMajor,
            trans_a: Transpose::NoTrans,
            trans_b: Transpose::NoTrans,
            m,
            n,
            k,
            alpha: 1.0,
            lda: m.max(1),
            ldb: k.max(1),
            beta,
            ldc: m.max(1),
        }
    }

    #[test]
    fn test_sgemm_validation_case() {
        // Column-major A is 2x3 ([1,2,3],[4,5,6]); B is stored 2x3 and transposed.
        let a = [1.0, 4.0, 2.0, 5.0, 3.0, 6.0];
        let b = [7.0, 8.0, 9.0, 10.0, 11.0, 12.0];
        let mut c = [0.0f32; 4];
        let op = GemmOp {
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
        };
        backend().sgemm(&op, &a, &b, &mut c).unwrap();
        assert_eq!(c, [58.0, 139.0, 64.0, 154.0]);
    }

    #[test]
    fn test_sgemm_row_major() {
        // [1,2;3,4] @ [5,6;7,8] = [19,22;43,50]
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [5.0, 6.0, 7.0, 8.0];
        let mut c = [0.0f32; 4];
        let op = GemmOp {
            layout: Layout::RowMajor,
            ..op(2, 2, 2, 0.0)
        };
        backend().sgemm(&op, &a, &b, &mut c).unwrap();
        assert_eq!(c, [19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_sgemm_transpose_a() {
        // op(A) = A^T: stored A is 2x2 column-major [1,3;2,4] => A^T = [1,2;3,4].
        let a = [1.0, 2.0, 3.0, 4.0];
        let identity = [1.0, 0.0, 0.0, 1.0];
        let mut c = [0.0f32; 4];
        let op = GemmOp {
            trans_a: Transpose::Trans,
            ..op(2, 2, 2, 0.0)
        };
        backend().sgemm(&op, &a, &identity, &mut c).unwrap();
        // Column-major [1,2;3,4] is [1,3,2,4].
        assert_eq!(c, [1.0, 3.0, 2.0, 4.0]);
    }

    #[test]
    fn test_sgemm_alpha_beta() {
        let a = [2.0];
        let b = [3.0];
        let mut c = [10.0f32];
        let op = GemmOp {
            alpha: 0.5,
            ..op(1, 1, 1, 2.0)
        };
        backend().sgemm(&op, &a, &b, &mut c).unwrap();
        assert_eq!(c, [23.0]);
    }

    #[test]
    fn test_sgemm_beta_zero_ignores_nan() {
        let a = [1.0];
        let b = [1.0];
        let mut c = [f32::NAN];
        backend().sgemm(&op(1, 1, 1, 0.0), &a, &b, &mut c).unwrap();
        assert_eq!(c, [1.0]);
    }

    #[test]
    fn test_sgemm_rejects_short_buffer() {
        let mut c = [0.0f32; 4];
        assert!(backend()
            .sgemm(&op(2, 2, 2, 0.0), &[1.0; 3], &[1.0; 4], &mut c)
            .is_err());
        assert_eq!(c, [0.0; 4]);
    }

    #[test]
    fn test_thread_knob() {
        let b = backend();
        assert_eq!(b.num_threads(), 1);
        b.set_num_threads(8);
        assert_eq!(b.num_threads(), 8);
        assert_eq!(b.loaded_libraries(), vec!["reference".to_string()]);
    }

    fn dims_and_data() -> impl Strategy<Value = (usize, usize, usize, Vec<f32>, Vec<f32>, Vec<f32>)> {
        (1usize..6, 1usize..6, 1usize..6).prop_flat_map(|(m, n, k)| {
            (
                Just(m),
                Just(n),
                Just(k),
                prop::collection::vec(-8.0f32..8.0, m * k),
                prop::collection::vec(-8.0f32..8.0, k * n),
                prop::collection::vec(-8.0f32..8.0, m * n),
            )
        })
    }

    proptest! {
        #[test]
        fn prop_accumulate_is_linear((m, n, k, a, b, c0) in dims_and_data()) {
            let backend = backend();

            let mut accumulated = c0.clone();
            backend.sgemm(&op(m, n, k, 1.0), &a, &b, &mut accumulated).unwrap();

            let mut product = vec![0.0f32; m * n];
            backend.sgemm(&op(m, n, k, 0.0), &a, &b, &mut product).unwrap();

            for ((acc, p), c) in accumulated.iter().zip(&product).zip(&c0) {
                assert_abs_diff_eq!(*acc, p + c, epsilon = 1e-4);
            }
        }
    }
}
