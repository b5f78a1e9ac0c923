//! Scoped control of the floating-point denormal mode.
//!
//! GEMM kernels fed with random data occasionally produce subnormal values,
//! and subnormal arithmetic is orders of magnitude slower on most cores.
//! [`DenormalGuard`] turns on flush-to-zero / denormals-are-zero for the
//! current thread and puts the previous setting back when dropped.

use std::marker::PhantomData;

#[cfg(target_arch = "x86_64")]
mod arch {
    use std::arch::asm;

    pub type ControlWord = u32;

    /// MXCSR FTZ (bit 15) | DAZ (bit 6).
    pub const FLUSH_MASK: ControlWord = 0x8040;

    #[inline]
    pub fn read() -> ControlWord {
        let mut csr: ControlWord = 0;
        // SAFETY: stmxcsr stores the 32-bit MXCSR into the pointed-to u32.
        unsafe {
            asm!("stmxcsr [{}]", in(reg) &mut csr as *mut ControlWord, options(nostack, preserves_flags));
        }
        csr
    }

    #[inline]
    pub fn write(csr: ControlWord) {
        // SAFETY: the value comes from a prior stmxcsr with only FTZ/DAZ
        // toggled, so no reserved bit is set.
        unsafe {
            asm!("ldmxcsr [{}]", in(reg) &csr as *const ControlWord, options(nostack, readonly, preserves_flags));
        }
    }
}

#[cfg(target_arch = "aarch64")]
mod arch {
    use std::arch::asm;

    pub type ControlWord = u64;

    /// FPCR.FZ (bit 24).
    pub const FLUSH_MASK: ControlWord = 1 << 24;

    #[inline]
    pub fn read() -> ControlWord {
        let fpcr: ControlWord;
        // SAFETY: reading FPCR has no side effects.
        unsafe {
            asm!("mrs {}, fpcr", out(reg) fpcr, options(nomem, nostack, preserves_flags));
        }
        fpcr
    }

    #[inline]
    pub fn write(fpcr: ControlWord) {
        // SAFETY: only the FZ bit differs from a value previously read.
        unsafe {
            asm!("msr fpcr, {}", in(reg) fpcr, options(nomem, nostack, preserves_flags));
        }
    }
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
mod arch {
    pub type ControlWord = u32;

    pub const FLUSH_MASK: ControlWord = 0;

    #[inline]
    pub fn read() -> ControlWord {
        0
    }

    #[inline]
    pub fn write(_: ControlWord) {}
}

pub use arch::{ControlWord, FLUSH_MASK};

/// Whether this target has a flush-to-zero control the guard can toggle.
pub const SUPPORTED: bool = FLUSH_MASK != 0;

/// Raw floating-point control word of the current thread (MXCSR on x86_64,
/// FPCR on aarch64, always 0 elsewhere).
pub fn current_mode() -> ControlWord {
    arch::read()
}

/// True when every flush bit is set for the current thread.
pub fn flush_enabled() -> bool {
    SUPPORTED && current_mode() & FLUSH_MASK == FLUSH_MASK
}

/// Enables flush-to-zero and denormals-are-zero until dropped.
///
/// Only the flush bits are saved and restored, so guards nest: after any
/// sequence of nested acquisitions and releases on one thread, the control
/// word is identical to its value before the outermost acquisition. The
/// guard is `!Send` because the control word is per-thread state.
#[must_use = "the denormal mode is restored as soon as the guard is dropped"]
pub struct DenormalGuard {
    saved: ControlWord,
    _not_send: PhantomData<*const ()>,
}

impl DenormalGuard {
    pub fn new() -> Self {
        let mode = arch::read();
        arch::write(mode | FLUSH_MASK);
        DenormalGuard {
            saved: mode & FLUSH_MASK,
            _not_send: PhantomData,
        }
    }
}

impl Default for DenormalGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DenormalGuard {
    fn drop(&mut self) {
        let mode = arch::read();
        arch::write((mode & !FLUSH_MASK) | self.saved);
    }
}
