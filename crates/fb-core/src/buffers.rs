use std::ops::{Deref, DerefMut};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Edge length of the square matrices each worker multiplies.
pub const TILE: usize = 64;

/// Assumed cache-line size in bytes (x86-64 and AArch64).
pub const CACHE_LINE_BYTES: usize = 64;

/// Wraps a value so it starts on its own cache line.
///
/// `#[repr(C, align(64))]` also rounds the size up to a multiple of 64, so
/// two wrapped values written by different threads never share a line.
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct CacheAligned<T> {
    value: T,
}

impl<T> CacheAligned<T> {
    pub const fn new(value: T) -> Self {
        Self { value }
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Deref for CacheAligned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for CacheAligned<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

/// Thread-private storage for one worker: two `TILE x TILE` inputs laid out
/// back to back, and one `TILE x TILE` accumulator.
///
/// Allocated once per worker and reused for every cycle. Nothing else holds
/// a reference to it, so workers never alias each other's data.
pub struct WorkerBuffers {
    inputs: Box<CacheAligned<[f32; 2 * TILE * TILE]>>,
    acc: Box<CacheAligned<[f32; TILE * TILE]>>,
}

impl WorkerBuffers {
    /// Zero-filled buffers.
    pub fn new() -> Self {
        WorkerBuffers {
            inputs: Box::new(CacheAligned::new([0.0; 2 * TILE * TILE])),
            acc: Box::new(CacheAligned::new([0.0; TILE * TILE])),
        }
    }

    /// Buffers whose inputs are standard-normal draws from an RNG seeded
    /// from OS entropy. The accumulator starts at zero.
    pub fn randomized() -> Self {
        let mut buffers = Self::new();
        buffers.fill_standard_normal(&mut StdRng::from_entropy());
        buffers
    }

    /// Overwrite both inputs with independent standard-normal samples.
    pub fn fill_standard_normal<R: Rng>(&mut self, rng: &mut R) {
        for x in self.inputs.iter_mut() {
            *x = rng.sample(StandardNormal);
        }
    }

    /// First input matrix.
    pub fn a(&self) -> &[f32] {
        &self.inputs[..TILE * TILE]
    }

    /// Second input matrix.
    pub fn b(&self) -> &[f32] {
        &self.inputs[TILE * TILE..]
    }

    /// The accumulator.
    pub fn acc(&self) -> &[f32] {
        &self.acc[..]
    }

    /// Borrow the inputs immutably and the accumulator mutably at once.
    pub fn split(&mut self) -> (&[f32], &[f32], &mut [f32]) {
        let (a, b) = self.inputs.split_at(TILE * TILE);
        (a, b, &mut self.acc[..])
    }
}

impl Default for WorkerBuffers {
    fn default() -> Self {
        Self::new()
    }
}
