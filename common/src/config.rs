//! Configuration types for transfers, runtime and output settings

/// Initial number of bytes every destination worker moves per round (1 MiB)
pub const DEFAULT_SLICE: u64 = 1024 * 1024;

/// Default cadence of byte-counter updates
pub const DEFAULT_UPDATE_INTERVAL: std::time::Duration = std::time::Duration::from_millis(1000);

/// Default size of the buffer each worker uses to move data (128 KiB)
pub const DEFAULT_BUFFER_SIZE: usize = 128 * 1024;

/// Tuning of the slice-synchronized transfer algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSettings {
    /// Slice size used for the first round of every file
    pub initial_slice: u64,
    /// Wall time a round should take; the slice is doubled or halved to approach it
    pub target_interval: std::time::Duration,
    /// Size of the per-worker read/write buffer
    pub buffer_size: usize,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            initial_slice: DEFAULT_SLICE,
            target_interval: DEFAULT_UPDATE_INTERVAL,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl TransferSettings {
    /// Validate configuration and return errors if invalid
    pub fn validate(&self) -> Result<(), String> {
        if self.initial_slice == 0 {
            return Err("initial slice must be greater than 0".to_string());
        }
        if self.target_interval.is_zero() {
            return Err("update interval must be greater than 0".to_string());
        }
        if self.buffer_size == 0 {
            return Err("buffer size must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Settings for a whole batch of copy jobs
#[derive(Debug, Clone, Copy, Default)]
pub struct Settings {
    /// Abort the batch on the first failed file transfer
    pub fail_early: bool,
    pub transfer: TransferSettings,
}

/// Runtime configuration for tokio and thread pools
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
    /// Number of blocking threads (0 = tokio default of 512)
    pub max_blocking_threads: usize,
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress error output
    pub quiet: bool,
    /// Verbosity level: 0=ERROR, 1=INFO, 2=DEBUG, 3=TRACE
    pub verbose: u8,
    /// Print summary statistics at the end
    pub print_summary: bool,
}

/// How progress is shown by the binaries
#[derive(Debug, Clone, Default)]
pub struct ProgressSettings {
    pub progress_type: crate::progress::ProgressType,
    /// Human readable duration, e.g. "200ms" or "10s"
    pub progress_delay: Option<String>,
}

impl ProgressSettings {
    /// Resolves `Auto` depending on whether stderr is a terminal.
    pub fn resolved_type(&self) -> crate::progress::ProgressType {
        use crate::progress::ProgressType;
        match self.progress_type {
            ProgressType::Auto => {
                if std::io::IsTerminal::is_terminal(&std::io::stderr()) {
                    ProgressType::ProgressBar
                } else {
                    ProgressType::TextUpdates
                }
            }
            other => other,
        }
    }

    /// Delay between progress updates: 200ms for the bar and 10s for text updates unless set.
    pub fn delay(&self) -> anyhow::Result<std::time::Duration> {
        use anyhow::Context;
        match &self.progress_delay {
            Some(delay) => humantime::parse_duration(delay)
                .with_context(|| format!("invalid progress delay {delay:?}")),
            None => Ok(match self.resolved_type() {
                crate::progress::ProgressType::ProgressBar => std::time::Duration::from_millis(200),
                _ => std::time::Duration::from_secs(10),
            }),
        }
    }
}
