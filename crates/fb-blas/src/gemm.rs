use crate::error::{BlasError, Result};

/// Storage order of a dense matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layout {
    RowMajor,
    ColMajor,
}

impl Layout {
    /// CBLAS enumeration value (`CblasRowMajor` / `CblasColMajor`).
    pub fn cblas(&self) -> i32 {
        match self {
            Layout::RowMajor => 101,
            Layout::ColMajor => 102,
        }
    }

    /// Flat index of element (`row`, `col`) in a matrix with leading dimension `ld`.
    #[inline]
    pub fn index(&self, row: usize, col: usize, ld: usize) -> usize {
        match self {
            Layout::RowMajor => row * ld + col,
            Layout::ColMajor => row + col * ld,
        }
    }
}

/// Whether an input operand is used as stored or transposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transpose {
    NoTrans,
    Trans,
}

impl Transpose {
    /// CBLAS enumeration value (`CblasNoTrans` / `CblasTrans`).
    pub fn cblas(&self) -> i32 {
        match self {
            Transpose::NoTrans => 111,
            Transpose::Trans => 112,
        }
    }

    /// Stored (rows, cols) of an operand whose op() has shape `rows x cols`.
    fn stored(&self, rows: usize, cols: usize) -> (usize, usize) {
        match self {
            Transpose::NoTrans => (rows, cols),
            Transpose::Trans => (cols, rows),
        }
    }
}

/// One single-precision GEMM call: `C := alpha * op(A) * op(B) + beta * C`.
///
/// `op(A)` is `m x k`, `op(B)` is `k x n` and `C` is `m x n`. Leading
/// dimensions follow the usual BLAS convention for the chosen `layout`.
#[derive(Debug, Clone, PartialEq)]
pub struct GemmOp {
    pub layout: Layout,
    pub trans_a: Transpose,
    pub trans_b: Transpose,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub alpha: f32,
    pub lda: usize,
    pub ldb: usize,
    pub beta: f32,
    pub ldc: usize,
}

impl GemmOp {
    /// The square `n x n x n` multiply-accumulate used by the throughput loop:
    /// column-major, `B` transposed, `alpha = beta = 1`.
    pub fn square(n: usize) -> Self {
        let ld = n.max(1);
        GemmOp {
            layout: Layout::ColMajor,
            trans_a: Transpose::NoTrans,
            trans_b: Transpose::Trans,
            m: n,
            n,
            k: n,
            alpha: 1.0,
            lda: ld,
            ldb: ld,
            beta: 1.0,
            ldc: ld,
        }
    }

    /// Floating-point operations performed by one call, counted as
    /// `m * n * (2k + 2)` (k multiply-adds per entry plus the alpha and beta scaling).
    pub fn flop(&self) -> u64 {
        (self.m as u64) * (self.n as u64) * (2 * self.k as u64 + 2)
    }

    /// Stored (rows, cols) of A, B and C.
    pub fn stored_a(&self) -> (usize, usize) {
        self.trans_a.stored(self.m, self.k)
    }

    pub fn stored_b(&self) -> (usize, usize) {
        self.trans_b.stored(self.k, self.n)
    }

    pub fn stored_c(&self) -> (usize, usize) {
        (self.m, self.n)
    }

    /// Validate leading dimensions and buffer lengths for all three operands.
    ///
    /// # Errors
    /// Returns `InvalidLeadingDimension` or `BufferTooSmall` naming the offending operand.
    pub fn check(&self, a_len: usize, b_len: usize, c_len: usize) -> Result<()> {
        let (ar, ac) = self.stored_a();
        let (br, bc) = self.stored_b();
        let (cr, cc) = self.stored_c();
        self.check_operand("A", ar, ac, self.lda, a_len)?;
        self.check_operand("B", br, bc, self.ldb, b_len)?;
        self.check_operand("C", cr, cc, self.ldc, c_len)
    }

    fn check_operand(
        &self,
        operand: &'static str,
        rows: usize,
        cols: usize,
        ld: usize,
        len: usize,
    ) -> Result<()> {
        // (contiguous extent, number of strided runs)
        let (inner, outer) = match self.layout {
            Layout::ColMajor => (rows, cols),
            Layout::RowMajor => (cols, rows),
        };
        let min = inner.max(1);
        if ld < min {
            return Err(BlasError::InvalidLeadingDimension { operand, ld, min });
        }
        let needed = if inner == 0 || outer == 0 {
            0
        } else {
            ld * (outer - 1) + inner
        };
        if len < needed {
            return Err(BlasError::BufferTooSmall {
                operand,
                needed,
                got: len,
            });
        }
        Ok(())
    }
}
