use std::path::{Path, PathBuf};

use crate::source::{self, DirectoryInfo, Source};

/// One copy request: every file resolved from `sources` goes to every path in `destinations`.
///
/// A job without sources is a no-op.
#[derive(Debug, Clone, Default)]
pub struct CopyJob {
    sources: Vec<Source>,
    destinations: Vec<PathBuf>,
    recursive: bool,
    directory_infos: Option<Vec<DirectoryInfo>>,
}

impl CopyJob {
    pub fn new(sources: Vec<Source>, destinations: Vec<PathBuf>) -> Self {
        let recursive = sources.iter().any(Source::is_recursive);
        Self {
            sources,
            destinations,
            recursive,
            directory_infos: None,
        }
    }

    /// Builds a job from plain source paths, see [`Source::from_path`].
    pub fn from_paths<S, D>(
        sources: impl IntoIterator<Item = S>,
        destinations: impl IntoIterator<Item = D>,
        recursive: bool,
    ) -> Result<Self, source::Error>
    where
        S: AsRef<Path>,
        D: Into<PathBuf>,
    {
        let sources = sources
            .into_iter()
            .map(|path| Source::from_path(path, recursive))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            sources,
            destinations: destinations.into_iter().map(Into::into).collect(),
            recursive,
            directory_infos: None,
        })
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn destinations(&self) -> &[PathBuf] {
        &self.destinations
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Expansion results, set once the job's sources were expanded
    pub fn directory_infos(&self) -> Option<&[DirectoryInfo]> {
        self.directory_infos.as_deref()
    }

    pub fn set_directory_infos(&mut self, directory_infos: Vec<DirectoryInfo>) {
        self.directory_infos = Some(directory_infos);
    }

    pub fn take_directory_infos(&mut self) -> Option<Vec<DirectoryInfo>> {
        self.directory_infos.take()
    }

    /// Number of expanded entries (files and directories) over all sources
    pub fn file_count(&self) -> usize {
        self.directory_infos()
            .map(|infos| infos.iter().map(DirectoryInfo::file_count).sum())
            .unwrap_or(0)
    }

    pub fn byte_count(&self) -> u64 {
        self.directory_infos()
            .map(|infos| infos.iter().map(|info| info.byte_count).sum())
            .unwrap_or(0)
    }
}

/// Maps `source_file` onto every destination.
///
/// An existing destination directory receives the source path relative to its base directory;
/// any other destination is used as is, which allows copying under a new name.
pub async fn destination_files(
    base_directory: &Path,
    source_file: &Path,
    destinations: &[PathBuf],
) -> Vec<PathBuf> {
    let relative = match source_file.strip_prefix(base_directory) {
        Ok(relative) => relative.to_path_buf(),
        Err(_) => source_file
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_default(),
    };
    let mut destination_files = Vec::with_capacity(destinations.len());
    for destination in destinations {
        let is_dir = tokio::fs::metadata(destination)
            .await
            .map(|metadata| metadata.is_dir())
            .unwrap_or(false);
        if is_dir {
            destination_files.push(destination.join(&relative));
        } else {
            destination_files.push(destination.clone());
        }
    }
    destination_files
}
