use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use tokio::sync::mpsc;
use tracing::instrument;

use crate::config::Settings;
use crate::job::{self, CopyJob};
use crate::progress::{self, ByteCounter, Reporter, State};
use crate::source;
use crate::transfer;
use crate::validate::{self, Conflict};

/// Error type for copy batches that preserves the batch summary even on failure.
///
/// # Logging Convention
/// The Display implementation automatically shows the full error chain, so you can log it
/// with any format specifier:
/// ```ignore
/// tracing::error!("copy failed: {}", &error);   // ✅ Shows full chain
/// tracing::error!("copy failed: {:#}", &error); // ✅ Shows full chain
/// ```
#[derive(Debug, thiserror::Error)]
#[error("{source:#}")]
pub struct Error {
    #[source]
    pub source: anyhow::Error,
    pub summary: Summary,
}

impl Error {
    #[must_use]
    pub fn new(source: anyhow::Error, summary: Summary) -> Self {
        Error { source, summary }
    }

    /// The destination conflict behind this error, if that is what stopped the batch
    pub fn conflict(&self) -> Option<&Conflict> {
        self.source.downcast_ref::<Conflict>()
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    /// source bytes moved, each counted once regardless of the number of destinations
    pub bytes_copied: u64,
    /// source files transferred
    pub files_copied: usize,
    /// destination directories created
    pub directories_created: usize,
    /// destination directories that already existed
    pub directories_unchanged: usize,
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            bytes_copied: self.bytes_copied + other.bytes_copied,
            files_copied: self.files_copied + other.files_copied,
            directories_created: self.directories_created + other.directories_created,
            directories_unchanged: self.directories_unchanged + other.directories_unchanged,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "bytes copied: {}\n\
            files copied: {}\n\
            directories created: {}\n\
            directories unchanged: {}",
            bytesize::ByteSize(self.bytes_copied),
            self.files_copied,
            self.directories_created,
            self.directories_unchanged,
        )
    }
}

/// Creates `destinations` for the source directory `directory`, one after another.
async fn create_directories(directory: &Path, destinations: &[PathBuf]) -> Result<Summary, Error> {
    let mut summary = Summary::default();
    for destination in destinations {
        match tokio::fs::metadata(destination).await {
            Ok(metadata) if metadata.is_dir() => {
                tracing::info!("directory {:?} already exists", destination);
                summary.directories_unchanged += 1;
            }
            Ok(_) => {
                return Err(Error::new(
                    Conflict::FileWithDirectory {
                        destination: destination.clone(),
                        directory: directory.to_path_buf(),
                    }
                    .into(),
                    summary,
                ));
            }
            Err(_) => {
                tracing::info!("creating directory {:?}", destination);
                tokio::fs::create_dir_all(destination)
                    .await
                    .with_context(|| format!("could not create directory {:?}", destination))
                    .map_err(|err| Error::new(err, summary))?;
                summary.directories_created += 1;
            }
        }
    }
    Ok(summary)
}

/// Copies files and directories to any number of destinations at once.
///
/// One instance runs one batch at a time; [`FileCopier::copy`] borrows it mutably.
#[derive(Debug, Default)]
pub struct FileCopier {
    settings: Settings,
    reporter: Reporter,
}

impl FileCopier {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            reporter: Reporter::new(),
        }
    }

    /// Registers a new listener; events of all following batches are delivered to it.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<progress::Event> {
        self.reporter.subscribe()
    }

    pub fn state(&self) -> State {
        self.reporter.state()
    }

    /// Bytes of all plain source files found in the current batch
    pub fn byte_count(&self) -> u64 {
        self.reporter.bytes().total()
    }

    /// Bytes copied so far in the current batch
    pub fn copied_bytes(&self) -> u64 {
        self.reporter.bytes().copied()
    }

    pub fn byte_counter(&self) -> Arc<ByteCounter> {
        self.reporter.bytes().clone()
    }

    /// Prepares the copier for another batch.
    pub fn reset(&mut self) {
        self.reporter.reset();
    }

    /// Expands the sources of all jobs; returns the number of entries found.
    async fn check_sources(&mut self, jobs: &mut [CopyJob]) -> Result<usize, Error> {
        let mut file_count = 0;
        for job in jobs.iter_mut() {
            if job.is_empty() {
                continue;
            }
            let mut directory_infos = Vec::with_capacity(job.sources().len());
            for source in job.sources() {
                let info = source::expand_source(self.reporter.listeners(), source)
                    .await
                    .map_err(|err| Error::new(err.into(), Summary::default()))?;
                if let Some(info) = info {
                    self.reporter.bytes().add_total(info.byte_count);
                    file_count += info.file_count();
                    directory_infos.push(info);
                }
            }
            job.set_directory_infos(directory_infos);
            tracing::info!(
                "job with {} entries, {}, recursive: {}",
                job.file_count(),
                bytesize::ByteSize(job.byte_count()),
                job.is_recursive()
            );
        }
        Ok(file_count)
    }

    async fn run_job(&self, job: &mut CopyJob, summary: &mut Summary) -> Result<bool, Error> {
        let mut success = true;
        let Some(directory_infos) = job.take_directory_infos() else {
            return Ok(success);
        };
        for info in &directory_infos {
            for source_file in &info.files {
                let destinations =
                    job::destination_files(&info.base_directory, source_file, job.destinations())
                        .await;
                let is_dir = tokio::fs::metadata(source_file)
                    .await
                    .map(|metadata| metadata.is_dir())
                    .unwrap_or(false);
                if is_dir {
                    let created = create_directories(source_file, &destinations)
                        .await
                        .map_err(|err| Error::new(err.source, *summary + err.summary))?;
                    *summary = *summary + created;
                    continue;
                }
                match transfer::copy_file(
                    source_file,
                    &destinations,
                    &self.settings.transfer,
                    self.reporter.bytes(),
                    self.reporter.listeners(),
                )
                .await
                {
                    Ok(bytes) => {
                        summary.bytes_copied += bytes;
                        summary.files_copied += 1;
                    }
                    Err(error) => {
                        tracing::error!("copy: {:?} -> {:?} failed with: {:#}", source_file, destinations, &error);
                        if self.settings.fail_early {
                            return Err(Error::new(error, *summary));
                        }
                        success = false;
                    }
                }
            }
        }
        Ok(success)
    }

    /// Runs a batch of jobs.
    ///
    /// All sources are expanded and all jobs are validated before the first byte is written; a
    /// conflict fails the batch without touching any destination.
    #[instrument(skip_all)]
    pub async fn copy(&mut self, jobs: &mut [CopyJob]) -> Result<Summary, Error> {
        self.reporter.transition(State::CheckingSource);
        let file_count = self.check_sources(jobs).await?;
        if file_count == 0 {
            tracing::info!("there are no files to copy");
            self.reporter.transition(State::End);
            return Ok(Summary::default());
        }
        validate::validate(jobs)
            .await
            .map_err(|conflict| Error::new(conflict.into(), Summary::default()))?;
        self.reporter.transition(State::Copying);
        let mut summary = Summary::default();
        let mut success = true;
        for job in jobs.iter_mut() {
            if job.is_empty() {
                continue;
            }
            success &= self.run_job(job, &mut summary).await?;
        }
        self.reporter.finish();
        if !success {
            return Err(Error::new(anyhow!("some files could not be copied"), summary));
        }
        Ok(summary)
    }
}
