use anyhow::{Result, anyhow};
use clap::Parser;
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "fcp",
    version,
    about = "Copy files and directory trees to many destinations at once",
    long_about = "`fcp` copies every source to every destination. Each source file is read once per destination and
all destinations advance in lockstep, one slice at a time.

EXAMPLES:
    # Copy a directory into two existing directories
    fcp /data/in -d /mnt/a -d /mnt/b --progress --summary

    # Copy all .log files below /var/log, keeping their relative paths
    fcp --base-dir /var/log --pattern '.*\\.log' -d /backup/logs

Existing destination directories receive the sources below them; any other destination is used as
the target path itself."
)]
struct Args {
    // Copy options
    /// Destination path (can be specified multiple times)
    #[arg(short = 'd', long = "destination", value_name = "PATH", required = true, action = clap::ArgAction::Append, help_heading = "Copy options")]
    destination: Vec<std::path::PathBuf>,

    /// Exit on first error
    #[arg(short = 'e', long = "fail-early", help_heading = "Copy options")]
    fail_early: bool,

    /// Do not descend into directories, only copy the entries matched directly
    #[arg(long, help_heading = "Copy options")]
    no_recursive: bool,

    // Source selection
    /// Base directory for --pattern sources
    #[arg(long, value_name = "PATH", requires = "pattern", help_heading = "Source selection")]
    base_dir: Option<std::path::PathBuf>,

    /// Regular expression selecting paths below --base-dir (can be specified multiple times)
    ///
    /// The expression has to match the whole path relative to the base directory, with `/` as the
    /// separator, e.g. `src/.*\.rs`.
    #[arg(long, value_name = "REGEX", requires = "base_dir", action = clap::ArgAction::Append, help_heading = "Source selection")]
    pattern: Vec<String>,

    // Transfer tuning
    /// Number of bytes moved to every destination in the first round of each file
    #[arg(
        long,
        default_value = "1MiB",
        value_name = "SIZE",
        help_heading = "Transfer tuning"
    )]
    slice: bytesize::ByteSize,

    /// Target duration of one round; the slice size adapts to approach it
    ///
    /// This option accepts a human readable duration, e.g. "500ms", "1s" etc.
    #[arg(
        long,
        default_value = "1s",
        value_name = "DURATION",
        help_heading = "Transfer tuning"
    )]
    update_interval: humantime::Duration,

    /// Size of the buffer every destination worker copies through
    #[arg(
        long,
        default_value = "128KiB",
        value_name = "SIZE",
        help_heading = "Transfer tuning"
    )]
    buffer_size: bytesize::ByteSize,

    // Progress & output
    /// Show progress
    #[arg(long, help_heading = "Progress & output")]
    progress: bool,

    /// Toggles the type of progress to show
    ///
    /// If specified, --progress flag is implied.
    ///
    /// Options are: `ProgressBar` (animated progress bar), `TextUpdates` (appropriate for logging), Auto (default, will
    /// choose between `ProgressBar` or `TextUpdates` depending on the type of terminal attached to stderr)
    #[arg(long, value_name = "TYPE", help_heading = "Progress & output")]
    progress_type: Option<common::ProgressType>,

    /// Sets the delay between progress updates
    ///
    /// - For the interactive (--progress-type=ProgressBar), the default is 200ms.
    /// - For the non-interactive (--progress-type=TextUpdates), the default is 10s.
    ///
    /// If specified, --progress flag is implied.
    #[arg(long, value_name = "DELAY", help_heading = "Progress & output")]
    progress_delay: Option<String>,

    /// Verbose level (implies "summary"): -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Print summary at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Advanced settings
    /// Number of worker threads, 0 means number of cores
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads, 0 means Tokio runtime default (512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,

    // ARGUMENTS
    /// Path(s) to copy
    #[arg()]
    paths: Vec<std::path::PathBuf>,
}

impl Args {
    fn progress_settings(&self) -> Option<common::ProgressSettings> {
        if self.progress || self.progress_type.is_some() || self.progress_delay.is_some() {
            Some(common::ProgressSettings {
                progress_type: self.progress_type.unwrap_or_default(),
                progress_delay: self.progress_delay.clone(),
            })
        } else {
            None
        }
    }
}

#[instrument]
async fn async_main(args: Args) -> Result<common::Summary> {
    let recursive = !args.no_recursive;
    let settings = common::Settings {
        fail_early: args.fail_early,
        transfer: common::TransferSettings {
            initial_slice: args.slice.0,
            target_interval: args.update_interval.into(),
            buffer_size: usize::try_from(args.buffer_size.0)?,
        },
    };
    settings.transfer.validate().map_err(|err| anyhow!(err))?;
    let mut sources = args
        .paths
        .iter()
        .map(|path| common::Source::from_path(path, recursive))
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(base_dir) = &args.base_dir {
        for pattern in &args.pattern {
            sources.push(common::Source::new(base_dir, pattern, recursive)?);
        }
    }
    if sources.is_empty() {
        return Err(anyhow!("fcp: no sources given, pass paths or --base-dir with --pattern"));
    }
    let mut jobs = [common::CopyJob::new(sources, args.destination.clone())];
    let mut copier = common::FileCopier::new(settings);
    let display = match args.progress_settings() {
        Some(progress) => {
            let delay = progress.delay()?;
            Some(tokio::spawn(common::progress::display(
                copier.subscribe(),
                copier.byte_counter(),
                progress.resolved_type(),
                delay,
            )))
        }
        None => None,
    };
    let result = copier.copy(&mut jobs).await;
    // closes the event stream so the display can finish
    drop(copier);
    if let Some(display) = display {
        display.await?;
    }
    match result {
        Ok(summary) => Ok(summary),
        Err(error) => {
            if args.summary {
                return Err(anyhow!("{}\n\n{}", error, &error.summary));
            }
            Err(anyhow!("{}", error))
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let res = common::run(output, runtime, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
