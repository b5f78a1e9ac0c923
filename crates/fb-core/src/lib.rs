//! `fb-core` - the measurement core of flopbench.
//!
//! This crate provides:
//! - `DenormalGuard`, a scoped flush-to-zero / denormals-are-zero mode
//! - The correctness gate run before any timing (`gate::validate`)
//! - The barrier-synchronized throughput loop (`throughput::run`)
//! - Environment-driven configuration and the fatal error taxonomy

pub mod buffers;
pub mod config;
pub mod error;
pub mod fpmode;
pub mod gate;
pub mod throughput;

pub use buffers::{CacheAligned, WorkerBuffers, TILE};
pub use config::{BenchConfig, LoopConfig};
pub use error::{BenchError, Result};
pub use fpmode::DenormalGuard;
pub use gate::{validate, ValidationReport};
pub use throughput::{run, timed_burst, CycleReport, FLOP_PER_CALL};
