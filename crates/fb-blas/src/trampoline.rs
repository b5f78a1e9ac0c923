//! libblastrampoline backend.
//!
//! libblastrampoline (LBT) is a BLAS/LAPACK demuxer: it exports the standard
//! BLAS symbols and forwards them to whichever implementation it was told to
//! load through `LBT_DEFAULT_LIBS`. We load LBT itself at runtime and call its
//! ILP64 CBLAS entry point.

use std::ffi::{c_char, c_void, CStr};
use std::fmt;
use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::{debug, info};

use crate::backend::BlasBackend;
use crate::error::{BlasError, Result};
use crate::gemm::GemmOp;

/// `LBT_INTERFACE_ILP64`: 64-bit integer BLAS interface.
pub const LBT_INTERFACE_ILP64: i32 = 64;
/// `LBT_F2C_UNKNOWN`: accept a forward regardless of its f2c calling convention.
pub const LBT_F2C_UNKNOWN: i32 = -1;

/// Library names tried, in order, when no explicit path is configured.
pub const DEFAULT_LIBRARY_NAMES: &[&str] = &[
    "libblastrampoline.so.5",
    "libblastrampoline.so",
    "libblastrampoline.dylib",
    "libblastrampoline.dll",
];

type LbtGetForward = unsafe extern "C" fn(*const c_char, i32, i32) -> *const c_void;
type LbtGetConfig = unsafe extern "C" fn() -> *const LbtConfig;
type LbtSetNumThreads = unsafe extern "C" fn(i32);
type LbtGetNumThreads = unsafe extern "C" fn() -> i32;
type CblasSgemm64 = unsafe extern "C" fn(
    i32,
    i32,
    i32,
    i64,
    i64,
    i64,
    f32,
    *const f32,
    i64,
    *const f32,
    i64,
    f32,
    *mut f32,
    i64,
);

/// Leading fields of `lbt_library_info_t`.
#[repr(C)]
struct LbtLibraryInfo {
    libname: *const c_char,
}

/// Leading fields of `lbt_config_t`.
#[repr(C)]
struct LbtConfig {
    loaded_libs: *const *const LbtLibraryInfo,
}

/// BLAS backend forwarding to the implementation loaded by libblastrampoline.
pub struct TrampolineBackend {
    path: PathBuf,
    get_forward: LbtGetForward,
    get_config: LbtGetConfig,
    set_threads: LbtSetNumThreads,
    get_threads: LbtGetNumThreads,
    sgemm: CblasSgemm64,
    // Keeps every function pointer above valid.
    _library: Library,
}

impl TrampolineBackend {
    /// Load libblastrampoline from the first loadable default name.
    ///
    /// # Errors
    /// Returns `LibraryLoad` listing every attempt if none of the names load.
    pub fn open_default() -> Result<Self> {
        let mut reasons = Vec::new();
        for name in DEFAULT_LIBRARY_NAMES {
            match Self::open(Path::new(name)) {
                Ok(backend) => return Ok(backend),
                Err(BlasError::LibraryLoad { reason, .. }) => {
                    debug!(library = name, %reason, "libblastrampoline candidate not loadable");
                    reasons.push(reason);
                }
                Err(other) => return Err(other),
            }
        }
        Err(BlasError::LibraryLoad {
            path: PathBuf::from(DEFAULT_LIBRARY_NAMES[0]),
            reason: reasons.join("; "),
        })
    }

    /// Load libblastrampoline from `path` and resolve its entry points.
    ///
    /// Whether a BLAS implementation sits behind it is checked separately by
    /// [`BlasBackend::resolve_kernel`].
    ///
    /// # Errors
    /// Returns `LibraryLoad` if the library cannot be opened and
    /// `MissingSymbol` if it does not look like libblastrampoline.
    pub fn open(path: &Path) -> Result<Self> {
        // SAFETY: loading LBT runs its constructor, which only reads
        // LBT_DEFAULT_LIBS and dlopens the BLAS libraries named there.
        let library = unsafe { Library::new(path) }.map_err(|e| BlasError::LibraryLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        // SAFETY: each type alias matches the C prototype in libblastrampoline.h.
        let (get_forward, get_config, set_threads, get_threads, sgemm) = unsafe {
            (
                symbol::<LbtGetForward>(&library, b"lbt_get_forward\0")?,
                symbol::<LbtGetConfig>(&library, b"lbt_get_config\0")?,
                symbol::<LbtSetNumThreads>(&library, b"lbt_set_num_threads\0")?,
                symbol::<LbtGetNumThreads>(&library, b"lbt_get_num_threads\0")?,
                symbol::<CblasSgemm64>(&library, b"cblas_sgemm64_\0")?,
            )
        };

        debug!(library = %path.display(), "loaded libblastrampoline");

        Ok(TrampolineBackend {
            path: path.to_path_buf(),
            get_forward,
            get_config,
            set_threads,
            get_threads,
            sgemm,
            _library: library,
        })
    }
}

/// Copy a function pointer out of `library`.
///
/// # Safety
/// `T` must be the exact function-pointer type of the exported symbol.
unsafe fn symbol<T: Copy>(library: &Library, name: &[u8]) -> Result<T> {
    library.get::<T>(name).map(|s| *s).map_err(|_| {
        BlasError::MissingSymbol(
            String::from_utf8_lossy(name.strip_suffix(b"\0").unwrap_or(name)).into_owned(),
        )
    })
}

impl fmt::Debug for TrampolineBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrampolineBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl BlasBackend for TrampolineBackend {
    fn name(&self) -> &str {
        "lbt"
    }

    fn resolve_kernel(&self) -> Result<()> {
        // SAFETY: the symbol name is NUL-terminated and outlives the call.
        let forward = unsafe {
            (self.get_forward)(
                b"sgemm_\0".as_ptr().cast::<c_char>(),
                LBT_INTERFACE_ILP64,
                LBT_F2C_UNKNOWN,
            )
        };
        info!(library = %self.path.display(), sgemm_ = ?forward, "resolved BLAS kernel");
        if forward.is_null() {
            return Err(BlasError::KernelNotFound("sgemm_".to_string()));
        }
        Ok(())
    }

    fn sgemm(&self, op: &GemmOp, a: &[f32], b: &[f32], c: &mut [f32]) -> Result<()> {
        op.check(a.len(), b.len(), c.len())?;
        // SAFETY: `check` proved every operand fits its buffer for this shape
        // and these leading dimensions, so the kernel stays in bounds.
        unsafe {
            (self.sgemm)(
                op.layout.cblas(),
                op.trans_a.cblas(),
                op.trans_b.cblas(),
                op.m as i64,
                op.n as i64,
                op.k as i64,
                op.alpha,
                a.as_ptr(),
                op.lda as i64,
                b.as_ptr(),
                op.ldb as i64,
                op.beta,
                c.as_mut_ptr(),
                op.ldc as i64,
            );
        }
        Ok(())
    }

    fn set_num_threads(&self, n: usize) {
        let n = i32::try_from(n).unwrap_or(i32::MAX);
        // SAFETY: plain integer argument.
        unsafe { (self.set_threads)(n) }
    }

    fn num_threads(&self) -> usize {
        // SAFETY: no arguments; returns an integer.
        let n = unsafe { (self.get_threads)() };
        n.max(0) as usize
    }

    fn loaded_libraries(&self) -> Vec<String> {
        let mut names = Vec::new();
        // SAFETY: lbt_get_config returns a pointer to LBT's static config,
        // whose `loaded_libs` is a NULL-terminated array of library records.
        unsafe {
            let config = (self.get_config)();
            if config.is_null() {
                return names;
            }
            let mut cursor = (*config).loaded_libs;
            if cursor.is_null() {
                return names;
            }
            while !(*cursor).is_null() {
                let libname = (**cursor).libname;
                if !libname.is_null() {
                    names.push(CStr::from_ptr(libname).to_string_lossy().into_owned());
                }
                cursor = cursor.add(1);
            }
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_open_nonexistent() {
        let err = TrampolineBackend::open(Path::new("/nonexistent/libblastrampoline.so"))
            .unwrap_err();
        match err {
            BlasError::LibraryLoad { path, .. } => {
                assert_eq!(path, PathBuf::from("/nonexistent/libblastrampoline.so"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_open_not_a_library() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"definitely not an ELF object").unwrap();
        assert!(matches!(
            TrampolineBackend::open(file.path()),
            Err(BlasError::LibraryLoad { .. })
        ));
    }

    #[test]
    fn test_default_names() {
        assert!(DEFAULT_LIBRARY_NAMES
            .iter()
            .all(|name| name.starts_with("libblastrampoline")));
    }
}
