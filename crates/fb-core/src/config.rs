use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use fb_blas::BackendSelection;

use crate::error::{BenchError, Result};

/// Length of one timed burst in production runs.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10);

/// Selects the backend: `lbt` (default) or `reference`.
pub const ENV_BACKEND: &str = "FLOPBENCH_BACKEND";
/// Explicit path to libblastrampoline.
pub const ENV_LBT_LIBRARY: &str = "FLOPBENCH_LBT_LIBRARY";
/// Worker thread count; takes precedence over `OMP_NUM_THREADS`.
pub const ENV_THREADS: &str = "FLOPBENCH_THREADS";
/// Conventional OpenMP thread count, honored when `FLOPBENCH_THREADS` is unset.
pub const ENV_OMP_THREADS: &str = "OMP_NUM_THREADS";
/// Burst length in milliseconds.
pub const ENV_WINDOW_MS: &str = "FLOPBENCH_WINDOW_MS";

/// Process-level configuration, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchConfig {
    /// Backend to open.
    pub backend: BackendSelection,
    /// Number of worker threads in the throughput loop.
    pub workers: usize,
    /// Length of each timed burst.
    pub window: Duration,
}

impl BenchConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<BenchConfig> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    ///
    /// Reads the following keys:
    /// - `FLOPBENCH_BACKEND` -> backend kind (`lbt` or `reference`)
    /// - `FLOPBENCH_LBT_LIBRARY` -> libblastrampoline path for `lbt`
    /// - `FLOPBENCH_THREADS`, then the first entry of `OMP_NUM_THREADS`
    ///   -> workers (default: available hardware parallelism)
    /// - `FLOPBENCH_WINDOW_MS` -> burst length (default: 10 s)
    pub fn from_lookup<F>(lookup: F) -> Result<BenchConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend = match non_empty(ENV_BACKEND).as_deref().map(str::trim) {
            None | Some("lbt") => BackendSelection::Trampoline {
                library: non_empty(ENV_LBT_LIBRARY).map(PathBuf::from),
            },
            Some("reference") => BackendSelection::Reference,
            Some(other) => {
                return Err(BenchError::InvalidConfig(format!(
                    "{}={} (expected 'lbt' or 'reference')",
                    ENV_BACKEND, other
                )))
            }
        };

        let workers = if let Some(raw) = non_empty(ENV_THREADS) {
            parse_positive(ENV_THREADS, &raw)?
        } else if let Some(raw) = non_empty(ENV_OMP_THREADS) {
            // OpenMP allows a per-nesting-level list; only the outer level applies.
            let outer = raw.split(',').next().unwrap_or_default();
            parse_positive(ENV_OMP_THREADS, outer)?
        } else {
            default_workers()
        };

        let window = match non_empty(ENV_WINDOW_MS) {
            Some(raw) => Duration::from_millis(parse_positive(ENV_WINDOW_MS, &raw)?),
            None => DEFAULT_WINDOW,
        };

        Ok(BenchConfig {
            backend,
            workers,
            window,
        })
    }

    /// Throughput-loop settings for a production run.
    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig::new(self.workers).with_window(self.window)
    }
}

fn parse_positive<T>(key: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr + PartialEq + Default,
    T::Err: std::fmt::Display,
{
    match raw.trim().parse::<T>() {
        Ok(n) if n == T::default() => Err(BenchError::InvalidConfig(format!(
            "{} must be at least 1",
            key
        ))),
        Ok(n) => Ok(n),
        Err(e) => Err(BenchError::InvalidConfig(format!(
            "{}={}: {}",
            key, raw, e
        ))),
    }
}

/// Number of hardware execution contexts, or 1 if it cannot be determined.
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Settings for [`crate::throughput::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// Number of worker threads, at least 1.
    pub workers: usize,
    /// Length of each timed burst.
    pub window: Duration,
    /// Stop after this many cycles. Only tests set this; production runs
    /// use `None` and loop until the process is killed.
    pub max_cycles: Option<u64>,
}

impl LoopConfig {
    pub fn new(workers: usize) -> Self {
        LoopConfig {
            workers,
            window: DEFAULT_WINDOW,
            max_cycles: None,
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_max_cycles(mut self, cycles: u64) -> Self {
        self.max_cycles = Some(cycles);
        self
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::new(default_workers())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = BenchConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.backend, BackendSelection::Trampoline { library: None });
        assert_eq!(config.workers, default_workers());
        assert!(config.workers >= 1);
        assert_eq!(config.window, DEFAULT_WINDOW);
        assert_eq!(config.loop_config().window, DEFAULT_WINDOW);
        assert_eq!(config.loop_config().max_cycles, None);
    }

    #[test]
    fn test_reference_backend() {
        let config = BenchConfig::from_lookup(lookup(&[(ENV_BACKEND, "reference")])).unwrap();
        assert_eq!(config.backend, BackendSelection::Reference);
    }

    #[test]
    fn test_library_path() {
        let config = BenchConfig::from_lookup(lookup(&[
            (ENV_BACKEND, "lbt"),
            (ENV_LBT_LIBRARY, "/opt/lbt/libblastrampoline.so.5"),
        ]))
        .unwrap();
        assert_eq!(
            config.backend,
            BackendSelection::Trampoline {
                library: Some(PathBuf::from("/opt/lbt/libblastrampoline.so.5"))
            }
        );
    }

    #[test]
    fn test_unknown_backend() {
        let err = BenchConfig::from_lookup(lookup(&[(ENV_BACKEND, "mkl")])).unwrap_err();
        assert!(matches!(err, BenchError::InvalidConfig(_)));
    }

    #[test]
    fn test_thread_precedence() {
        let config = BenchConfig::from_lookup(lookup(&[
            (ENV_THREADS, "3"),
            (ENV_OMP_THREADS, "8"),
        ]))
        .unwrap();
        assert_eq!(config.workers, 3);

        let config = BenchConfig::from_lookup(lookup(&[(ENV_OMP_THREADS, "6,2")])).unwrap();
        assert_eq!(config.workers, 6);
    }

    #[test]
    fn test_invalid_threads() {
        assert!(BenchConfig::from_lookup(lookup(&[(ENV_THREADS, "0")])).is_err());
        assert!(BenchConfig::from_lookup(lookup(&[(ENV_THREADS, "many")])).is_err());
    }

    #[test]
    fn test_window() {
        let config = BenchConfig::from_lookup(lookup(&[(ENV_WINDOW_MS, "250")])).unwrap();
        assert_eq!(config.window, Duration::from_millis(250));
        assert_eq!(config.loop_config().window, Duration::from_millis(250));

        assert!(BenchConfig::from_lookup(lookup(&[(ENV_WINDOW_MS, "0")])).is_err());
        assert!(BenchConfig::from_lookup(lookup(&[(ENV_WINDOW_MS, "-5")])).is_err());
    }

    #[test]
    fn test_loop_config() {
        let config = LoopConfig::new(2)
            .with_window(Duration::from_millis(5))
            .with_max_cycles(3);
        assert_eq!(config.workers, 2);
        assert_eq!(config.window, Duration::from_millis(5));
        assert_eq!(config.max_cycles, Some(3));
        assert_eq!(LoopConfig::new(1).window, DEFAULT_WINDOW);
        assert_eq!(LoopConfig::new(1).max_cycles, None);
    }
}
