//! Common utilities and types for the fcp fan-out copy tool
//!
//! This crate copies files and directory trees to any number of destinations at once. Every
//! source file is opened once per destination and the destinations advance in lockstep: each
//! round moves one slice of the file to all of them, and the slice size adapts so that rounds
//! take about as long as the configured update interval.
//!
//! # Core Modules
//!
//! - [`source`] - source definitions (base directory + regular expression) and their expansion
//! - [`job`] - copy jobs and the mapping of source files onto destinations
//! - [`validate`] - conflict checks run before anything is written
//! - [`transfer`] - slice-synchronized copying of one file to many destinations
//! - [`copier`] - [`FileCopier`], which runs batches of jobs and reports progress
//! - [`progress`] - state machine, events and progress rendering
//! - [`config`] - transfer, runtime and output settings
//!
//! # Usage
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), common::copier::Error> {
//! let mut copier = common::FileCopier::new(common::Settings::default());
//! let mut events = copier.subscribe();
//! let mut jobs = [common::CopyJob::from_paths(["/data/in"], ["/mnt/a", "/mnt/b"], true)
//!     .map_err(|err| common::copier::Error::new(err.into(), Default::default()))?];
//! let summary = copier.copy(&mut jobs).await?;
//! while let Ok(event) = events.try_recv() {
//!     println!("{event:?}");
//! }
//! println!("{summary}");
//! # Ok(())
//! # }
//! ```
//!
//! Binaries use [`run`] to set up logging and the tokio runtime.

pub mod config;
pub mod copier;
pub mod job;
pub mod progress;
pub mod source;
pub mod transfer;
pub mod validate;

#[cfg(test)]
pub mod testutils;

pub use config::{OutputConfig, ProgressSettings, RuntimeConfig, Settings, TransferSettings};
pub use copier::{FileCopier, Summary};
pub use job::CopyJob;
pub use progress::{Event, ProgressType, State};
pub use source::Source;

fn log_filter(output: &OutputConfig) -> tracing_subscriber::EnvFilter {
    let level = if output.quiet {
        "off"
    } else {
        match output.verbose {
            0 => "error",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level))
}

/// Runs `func` on a freshly built tokio runtime.
///
/// Returns `None` if the runtime could not be built or `func` failed; the error is printed to
/// stderr unless `quiet` is set. The summary is printed on success when requested (or when
/// running verbose).
pub fn run<Fut>(
    output: OutputConfig,
    runtime: RuntimeConfig,
    func: impl FnOnce() -> Fut,
) -> Option<Summary>
where
    Fut: std::future::Future<Output = anyhow::Result<Summary>>,
{
    // a subscriber might already be installed, e.g. by a test harness
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter(&output))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    let rt = match builder.build() {
        Ok(rt) => rt,
        Err(error) => {
            if !output.quiet {
                eprintln!("failed to build the tokio runtime: {error}");
            }
            return None;
        }
    };
    match rt.block_on(func()) {
        Ok(summary) => {
            if output.print_summary || output.verbose > 0 {
                println!("{summary}");
            }
            Some(summary)
        }
        Err(error) => {
            if !output.quiet {
                eprintln!("{error:#}");
            }
            None
        }
    }
}
