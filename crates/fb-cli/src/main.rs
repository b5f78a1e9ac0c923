//! `flopbench` - sustained single-precision GEMM throughput of the BLAS
//! library behind libblastrampoline.
//!
//! Validates the kernel on a tiny known product, then reports the aggregate
//! Gflop/s of all worker threads every ten seconds until killed.

use std::io::{self, Write};
use std::process;

use fb_blas::BlasBackend;
use fb_core::{BenchConfig, Result, TILE};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    init_tracing();
    if let Err(err) = run() {
        println!("Error: {}", err);
        error!(%err, "benchmark aborted");
        process::exit(err.exit_code());
    }
}

/// Diagnostics go to stderr; stdout carries only the benchmark's own lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(true)
        .init();
}

fn run() -> Result<()> {
    let config = BenchConfig::from_env()?;
    info!(?config, "configuration loaded");

    let backend = fb_blas::open(&config.backend)?;
    announce_backend(backend.as_ref(), &mut io::stdout().lock())?;

    fb_core::validate(backend.as_ref())?;

    let loop_config = config.loop_config();
    println!(
        "Running {t}\u{d7}{t}\u{d7}{t} GEMM benchmark on {} threads.",
        loop_config.workers,
        t = TILE
    );
    fb_core::run(backend.as_ref(), &loop_config, |report| {
        println!("Total performance: {:.9} Gflop/s", report.gflops());
    })
}

/// List the libraries behind `backend`, then require an `sgemm_` kernel.
fn announce_backend<W: Write>(backend: &dyn BlasBackend, out: &mut W) -> Result<()> {
    writeln!(out, "BLAS backend: {}", backend.loaded_libraries().join(" "))?;
    out.flush()?;
    backend.resolve_kernel()?;
    Ok(())
}
