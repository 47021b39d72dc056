//! Source definitions and their expansion into file lists.
//!
//! A [`Source`] names a base directory and a regular expression. Expansion walks the base
//! directory depth-first and matches every entry's path, relative to the base directory and
//! written with `/` separators, against the whole pattern.

use std::path::{Path, PathBuf};

use async_recursion::async_recursion;
use tracing::instrument;

use crate::progress;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("source pattern must not be absent")]
    MissingPattern,
    #[error("invalid source pattern {pattern:?}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("cannot determine the base directory of {path:?}")]
    NoParent { path: PathBuf },
}

/// A subtree root plus a filter over paths relative to that root
#[derive(Debug, Clone)]
pub struct Source {
    base_directory: PathBuf,
    pattern: regex::Regex,
    recursive: bool,
}

fn compile(pattern: &str) -> Result<regex::Regex, Error> {
    // the pattern has to match the whole relative path
    regex::Regex::new(&format!("^(?:{pattern})$")).map_err(|source| Error::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

impl Source {
    pub fn new(
        base_directory: impl Into<PathBuf>,
        pattern: &str,
        recursive: bool,
    ) -> Result<Self, Error> {
        Ok(Self {
            base_directory: base_directory.into(),
            pattern: compile(pattern)?,
            recursive,
        })
    }

    /// Builds a source from a plain path.
    ///
    /// - a directory `a/b` becomes base `a` with a pattern matching `b` and everything below it
    /// - a file system root becomes base `/` matching everything
    /// - anything else (usually a file) becomes base `a` matching exactly `b`
    pub fn from_path(path: impl AsRef<Path>, recursive: bool) -> Result<Self, Error> {
        let path = path.as_ref();
        let name = path.file_name().map(|name| name.to_string_lossy().into_owned());
        let parent = path
            .parent()
            .map(|parent| {
                if parent.as_os_str().is_empty() {
                    PathBuf::from(".")
                } else {
                    parent.to_path_buf()
                }
            });
        if path.is_dir() {
            return match (parent, name) {
                (Some(parent), Some(name)) => Self::new(
                    parent,
                    &format!("{}(?:/.*)?", regex::escape(&name)),
                    recursive,
                ),
                // the file system root
                _ => Self::new(path, ".*", recursive),
            };
        }
        match (parent, name) {
            (Some(parent), Some(name)) => Self::new(parent, &regex::escape(&name), recursive),
            _ => Err(Error::NoParent {
                path: path.to_path_buf(),
            }),
        }
    }

    pub fn base_directory(&self) -> &Path {
        &self.base_directory
    }

    pub fn pattern(&self) -> &regex::Regex {
        &self.pattern
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive
    }
}

/// Files and directories resolved from one [`Source`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryInfo {
    pub base_directory: PathBuf,
    /// parents always precede their children
    pub files: Vec<PathBuf>,
    /// sum of the lengths of the plain files in `files`
    pub byte_count: u64,
}

impl DirectoryInfo {
    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

/// Path of `path` relative to `base`, always using `/` as separator
pub fn relative_path(base: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let components: Vec<_> = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect();
    Some(components.join("/"))
}

/// Checks that `directory` can be scanned; a problem is logged and yields `None`.
async fn can_scan(directory: &Path) -> Option<std::fs::Metadata> {
    match tokio::fs::metadata(directory).await {
        Ok(metadata) if metadata.is_dir() => Some(metadata),
        Ok(_) => {
            tracing::warn!("{:?} is no directory", directory);
            None
        }
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("{:?} does not exist", directory);
            None
        }
        Err(error) => {
            tracing::warn!("cannot read {:?}: {}", directory, error);
            None
        }
    }
}

fn file_id(metadata: &std::fs::Metadata) -> (u64, u64) {
    use std::os::unix::fs::MetadataExt;
    (metadata.dev(), metadata.ino())
}

async fn sorted_children(directory: &Path) -> Option<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(directory).await {
        Ok(entries) => entries,
        Err(error) => {
            tracing::warn!("cannot read {:?}: {}", directory, error);
            return None;
        }
    };
    let mut children = Vec::new();
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => children.push(entry.path()),
            Ok(None) => break,
            Err(error) => {
                tracing::warn!("failed traversing {:?}: {}", directory, error);
                return None;
            }
        }
    }
    children.sort();
    Some(children)
}

#[async_recursion]
async fn expand_into(
    listeners: &progress::Listeners,
    base_directory: &Path,
    directory: &Path,
    pattern: &regex::Regex,
    recursive: bool,
    info: &mut DirectoryInfo,
    ancestors: &mut Vec<(u64, u64)>,
) -> bool {
    tracing::debug!("current directory: {:?}, pattern: {:?}", directory, pattern.as_str());
    listeners.emit(progress::Event::Visiting(directory.to_path_buf()));
    let Some(directory_metadata) = can_scan(directory).await else {
        return false;
    };
    let Some(children) = sorted_children(directory).await else {
        return false;
    };
    ancestors.push(file_id(&directory_metadata));
    for child in children {
        // follows symlinks, a link to a directory is scanned like a directory
        let metadata = match tokio::fs::metadata(&child).await {
            Ok(metadata) => metadata,
            Err(error) => {
                tracing::warn!("failed reading metadata from {:?}: {}", child, error);
                continue;
            }
        };
        if metadata.is_dir() && ancestors.contains(&file_id(&metadata)) {
            tracing::warn!("{:?} links back to one of its parent directories, skipping", child);
            continue;
        }
        let is_match = relative_path(base_directory, &child)
            .is_some_and(|relative| pattern.is_match(&relative));
        if is_match {
            tracing::trace!("{:?} matches", child);
            if !metadata.is_dir() {
                info.byte_count += metadata.len();
                info.files.push(child.clone());
            } else if recursive {
                info.files.push(child.clone());
            }
        } else {
            tracing::trace!("{:?} does not match", child);
        }
        if recursive && metadata.is_dir() {
            // an unreadable subdirectory contributes nothing
            expand_into(
                listeners,
                base_directory,
                &child,
                pattern,
                recursive,
                info,
                ancestors,
            )
            .await;
        }
    }
    ancestors.pop();
    true
}

/// Expands `base_directory` against `pattern`.
///
/// Returns `Ok(None)` when the base directory is missing, not a directory or unreadable.
#[instrument(skip(listeners))]
pub async fn expand(
    listeners: &progress::Listeners,
    base_directory: &Path,
    pattern: Option<&regex::Regex>,
    recursive: bool,
) -> Result<Option<DirectoryInfo>, Error> {
    let pattern = pattern.ok_or(Error::MissingPattern)?;
    let mut info = DirectoryInfo {
        base_directory: base_directory.to_path_buf(),
        ..Default::default()
    };
    if !expand_into(
        listeners,
        base_directory,
        base_directory,
        pattern,
        recursive,
        &mut info,
        &mut Vec::new(),
    )
    .await
    {
        return Ok(None);
    }
    if tracing::enabled!(tracing::Level::INFO) {
        let mut listing = format!("source files in base directory {:?}:", base_directory);
        for file in &info.files {
            let kind = if file.is_dir() { 'd' } else { 'f' };
            listing.push_str(&format!("\n{kind} {}", file.display()));
        }
        tracing::info!("{}", listing);
    }
    Ok(Some(info))
}

pub async fn expand_source(
    listeners: &progress::Listeners,
    source: &Source,
) -> Result<Option<DirectoryInfo>, Error> {
    expand(
        listeners,
        source.base_directory(),
        Some(source.pattern()),
        source.is_recursive(),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils;
    use tracing_test::traced_test;

    async fn sum_of_file_sizes(info: &DirectoryInfo) -> anyhow::Result<u64> {
        let mut sum = 0;
        for file in &info.files {
            let metadata = tokio::fs::metadata(file).await?;
            if metadata.is_file() {
                sum += metadata.len();
            }
        }
        Ok(sum)
    }

    #[tokio::test]
    #[traced_test]
    async fn recursive_expansion_lists_parents_first() -> anyhow::Result<()> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let source = Source::from_path(tmp_dir.path().join("foo"), true)?;
        let info = expand_source(&Default::default(), &source)
            .await?
            .expect("foo must be expandable");
        assert_eq!(info.base_directory, tmp_dir.path());
        // foo, bar, baz + 6 files
        assert_eq!(info.file_count(), 9);
        assert_eq!(info.files[0], tmp_dir.path().join("foo"));
        for (idx, file) in info.files.iter().enumerate() {
            if let Some(parent) = file.parent() {
                if let Some(parent_idx) = info.files.iter().position(|f| f == parent) {
                    assert!(parent_idx < idx, "{parent:?} listed after {file:?}");
                }
            }
        }
        assert_eq!(info.byte_count, sum_of_file_sizes(&info).await?);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn non_recursive_expansion_skips_directories() -> anyhow::Result<()> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let foo = tmp_dir.path().join("foo");
        let pattern = regex::Regex::new("^(?:.*)$")?;
        let info = expand(&Default::default(), &foo, Some(&pattern), false)
            .await?
            .expect("foo must be expandable");
        assert_eq!(info.files, vec![foo.join("0.txt")]);
        assert_eq!(info.byte_count, 1);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn pattern_matches_relative_to_base() -> anyhow::Result<()> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let foo = tmp_dir.path().join("foo");
        // only files in "bar", matched against the path relative to foo
        let source = Source::new(&foo, r"bar/[0-9]\.txt", true)?;
        let info = expand_source(&Default::default(), &source)
            .await?
            .expect("foo must be expandable");
        assert_eq!(
            info.files,
            vec![
                foo.join("bar").join("1.txt"),
                foo.join("bar").join("2.txt"),
                foo.join("bar").join("3.txt"),
            ]
        );
        assert_eq!(info.byte_count, 3);
        // a partial match is not enough
        let source = Source::new(&foo, "txt", true)?;
        let info = expand_source(&Default::default(), &source)
            .await?
            .expect("foo must be expandable");
        assert!(info.files.is_empty());
        assert_eq!(info.byte_count, 0);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn missing_directory_expands_to_nothing() -> anyhow::Result<()> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let pattern = regex::Regex::new(".*")?;
        let missing = tmp_dir.path().join("missing");
        assert!(
            expand(&Default::default(), &missing, Some(&pattern), true)
                .await?
                .is_none()
        );
        let file = tmp_dir.path().join("foo").join("0.txt");
        assert!(
            expand(&Default::default(), &file, Some(&pattern), true)
                .await?
                .is_none()
        );
        assert!(logs_contain("does not exist"));
        Ok(())
    }

    #[tokio::test]
    async fn absent_pattern_is_an_error() -> anyhow::Result<()> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let result = expand(&Default::default(), tmp_dir.path(), None, true).await;
        assert!(matches!(result, Err(Error::MissingPattern)));
        Ok(())
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        assert!(matches!(
            Source::new("/tmp", "(", true),
            Err(Error::InvalidPattern { .. })
        ));
    }

    #[tokio::test]
    async fn shorthand_sources() -> anyhow::Result<()> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let foo = tmp_dir.path().join("foo");
        let source = Source::from_path(&foo, true)?;
        assert_eq!(source.base_directory(), tmp_dir.path());
        assert!(source.pattern().is_match("foo"));
        assert!(source.pattern().is_match("foo/bar/1.txt"));
        assert!(!source.pattern().is_match("foobar"));
        let source = Source::from_path(foo.join("0.txt"), false)?;
        assert_eq!(source.base_directory(), foo);
        assert!(source.pattern().is_match("0.txt"));
        assert!(!source.pattern().is_match("0atxt"));
        assert!(!source.is_recursive());
        let source = Source::from_path("/", true)?;
        assert_eq!(source.base_directory(), Path::new("/"));
        assert!(source.pattern().is_match("etc/hosts"));
        Ok(())
    }

    #[tokio::test]
    async fn visiting_events_are_emitted() -> anyhow::Result<()> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let mut listeners = progress::Listeners::default();
        let mut events = listeners.subscribe();
        let source = Source::from_path(tmp_dir.path().join("foo"), true)?;
        expand_source(&listeners, &source).await?;
        let mut visited = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let progress::Event::Visiting(directory) = event {
                visited.push(directory);
            }
        }
        assert_eq!(visited.len(), 4);
        assert_eq!(visited[0], tmp_dir.path());
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn symlink_to_parent_is_not_followed() -> anyhow::Result<()> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let foo = tmp_dir.path().join("foo");
        std::os::unix::fs::symlink(&foo, foo.join("bar").join("up"))?;
        // a link elsewhere in the tree is still followed
        std::os::unix::fs::symlink(foo.join("baz"), foo.join("link_baz"))?;
        let source = Source::from_path(&foo, true)?;
        let info = expand_source(&Default::default(), &source)
            .await?
            .expect("foo must be expandable");
        // the 9 fixture entries plus link_baz and its two files
        assert_eq!(info.file_count(), 12);
        assert!(!info.files.iter().any(|file| file.ends_with("up")));
        assert!(info.files.contains(&foo.join("link_baz").join("4.txt")));
        assert_eq!(info.byte_count, sum_of_file_sizes(&info).await?);
        assert!(logs_contain("links back to one of its parent directories"));
        Ok(())
    }
}
