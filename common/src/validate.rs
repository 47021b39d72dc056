//! Pre-flight checks run over all expanded jobs before anything is written.

use std::path::PathBuf;

use tracing::instrument;

use crate::job::CopyJob;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Conflict {
    #[error("cannot overwrite file {destination:?} with directory {directory:?}")]
    FileWithDirectory {
        destination: PathBuf,
        directory: PathBuf,
    },
    #[error(
        "cannot copy multiple sources onto one file target {destination:?}, sources: {sources:?}"
    )]
    ManyToOne {
        sources: Vec<PathBuf>,
        destination: PathBuf,
    },
}

async fn is_file(path: &std::path::Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|metadata| metadata.is_file())
        .unwrap_or(false)
}

/// Checks one expanded job.
pub async fn validate_job(job: &CopyJob) -> Result<(), Conflict> {
    let Some(directory_infos) = job.directory_infos() else {
        return Ok(());
    };
    let source_count = job.file_count();
    if source_count == 0 {
        return Ok(());
    }
    for destination in job.destinations() {
        if !is_file(destination).await {
            continue;
        }
        if source_count == 1 {
            let single = directory_infos
                .iter()
                .flat_map(|info| info.files.iter())
                .next();
            if let Some(single) = single {
                if tokio::fs::metadata(single)
                    .await
                    .map(|metadata| metadata.is_dir())
                    .unwrap_or(false)
                {
                    return Err(Conflict::FileWithDirectory {
                        destination: destination.clone(),
                        directory: single.clone(),
                    });
                }
            }
        } else {
            return Err(Conflict::ManyToOne {
                sources: directory_infos
                    .iter()
                    .flat_map(|info| info.files.iter().cloned())
                    .collect(),
                destination: destination.clone(),
            });
        }
    }
    Ok(())
}

/// Checks every job; the first conflict rejects the whole batch.
#[instrument(skip(jobs))]
pub async fn validate(jobs: &[CopyJob]) -> Result<(), Conflict> {
    for job in jobs {
        if job.is_empty() {
            continue;
        }
        validate_job(job).await?;
    }
    Ok(())
}
