//! Slice-synchronized copy of one source file to many destinations.
//!
//! Every destination gets its own worker task. Workers move the same slice of the source, meet
//! at a barrier, and one of them (the barrier leader) commits the round: it advances the shared
//! position, reports the bytes and picks the next slice size. A second barrier keeps the others
//! from starting the next round before that commit is done, so all destinations sit at the same
//! position at every round boundary.
//!
//! The slice size follows the measured round time: whenever a round would have needed a slice
//! more than twice (or less than half) as large to take exactly the target interval, the slice
//! doubles (or halves). Progress updates therefore arrive at roughly the target interval no
//! matter how fast the underlying storage is.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::config::TransferSettings;
use crate::progress::{ByteCounter, Listeners};

/// Returned by workers that stopped because a sibling failed
#[derive(Debug, thiserror::Error)]
#[error("transfer cancelled")]
pub struct Cancelled;

/// Next slice size after a round of `volume` bytes that took `elapsed_ms`.
///
/// The ideal slice for the target interval is `slice² × target / (elapsed × volume)`; it is only
/// ever approached by doubling or halving.
pub fn next_slice(slice: u64, target_interval_ms: u64, elapsed_ms: u64, volume: u64) -> u64 {
    if elapsed_ms == 0 || volume == 0 {
        return slice;
    }
    let candidate = (slice as u128 * slice as u128 * target_interval_ms as u128)
        / (elapsed_ms as u128 * volume as u128);
    let double_slice = slice.saturating_mul(2);
    let half_slice = slice / 2;
    if candidate > double_slice as u128 {
        double_slice
    } else if candidate < half_slice as u128 && half_slice > 0 {
        half_slice
    } else {
        slice
    }
}

/// Adaptive state shared by the workers of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceState {
    pub source_length: u64,
    pub slice: u64,
    /// bytes committed to every destination
    pub position: u64,
    /// bytes every worker moves in the current round
    pub volume: u64,
}

impl SliceState {
    pub fn new(source_length: u64, initial_slice: u64) -> Self {
        Self {
            source_length,
            slice: initial_slice,
            position: 0,
            volume: initial_slice.min(source_length),
        }
    }

    pub fn is_done(&self) -> bool {
        self.position >= self.source_length
    }

    /// Commits the current round and prepares the next one; returns the committed volume.
    pub fn advance(&mut self, elapsed_ms: u64, target_interval_ms: u64) -> u64 {
        let committed = self.volume;
        self.position += committed;
        self.slice = next_slice(self.slice, target_interval_ms, elapsed_ms, committed);
        self.volume = self.slice.min(self.source_length - self.position);
        committed
    }
}

struct Round {
    state: SliceState,
    started: std::time::Instant,
}

/// Owns the rendezvous of one file's workers
struct Coordinator {
    round: std::sync::Mutex<Round>,
    arrive: tokio::sync::Barrier,
    release: tokio::sync::Barrier,
    cancel: CancellationToken,
    target_interval_ms: u64,
    bytes: Arc<ByteCounter>,
    listeners: Listeners,
}

impl Coordinator {
    fn new(
        workers: usize,
        state: SliceState,
        settings: &TransferSettings,
        bytes: Arc<ByteCounter>,
        listeners: Listeners,
    ) -> Self {
        Self {
            round: std::sync::Mutex::new(Round {
                state,
                started: std::time::Instant::now(),
            }),
            arrive: tokio::sync::Barrier::new(workers),
            release: tokio::sync::Barrier::new(workers),
            cancel: CancellationToken::new(),
            target_interval_ms: settings.target_interval.as_millis() as u64,
            bytes,
            listeners,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Round> {
        // only the barrier leader writes, a poisoned lock still holds consistent data
        self.round
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn state(&self) -> SliceState {
        self.lock().state
    }

    fn complete_round(&self) {
        let mut round = self.lock();
        let elapsed_ms = round.started.elapsed().as_millis() as u64;
        tracing::trace!("time = {} ms", elapsed_ms);
        let committed = round.state.advance(elapsed_ms, self.target_interval_ms);
        self.bytes.commit(committed, &self.listeners);
        tracing::trace!(
            "slice = {} bytes, transfer volume = {} bytes",
            round.state.slice,
            round.state.volume
        );
        round.started = std::time::Instant::now();
    }

    /// Waits for all workers; the barrier leader commits the round before anyone continues.
    async fn rendezvous(&self) -> Result<(), Cancelled> {
        let arrived = tokio::select! {
            arrived = self.arrive.wait() => arrived,
            _ = self.cancel.cancelled() => return Err(Cancelled),
        };
        if arrived.is_leader() {
            self.complete_round();
        }
        tokio::select! {
            _ = self.release.wait() => Ok(()),
            _ = self.cancel.cancelled() => Err(Cancelled),
        }
    }
}

/// Moves exactly `volume` bytes starting at `position`, retrying short reads and writes.
async fn transfer_slice(
    reader: &mut tokio::fs::File,
    writer: &mut tokio::fs::File,
    position: u64,
    volume: u64,
    buffer: &mut [u8],
) -> anyhow::Result<()> {
    reader.seek(std::io::SeekFrom::Start(position)).await?;
    writer.seek(std::io::SeekFrom::Start(position)).await?;
    let mut transferred = 0u64;
    while transferred < volume {
        let wanted = (volume - transferred).min(buffer.len() as u64) as usize;
        let read = reader.read(&mut buffer[..wanted]).await?;
        if read == 0 {
            return Err(anyhow!(
                "unexpected end of source at {} bytes",
                position + transferred
            ));
        }
        writer.write_all(&buffer[..read]).await?;
        transferred += read as u64;
        tracing::trace!(
            "position = {}, transferred = {}, volume = {}",
            position,
            transferred,
            volume
        );
    }
    Ok(())
}

async fn run_worker(
    coordinator: Arc<Coordinator>,
    source: PathBuf,
    destination: PathBuf,
    buffer_size: usize,
) -> anyhow::Result<()> {
    let mut reader = tokio::fs::File::open(&source)
        .await
        .with_context(|| format!("cannot open {:?} for reading", &source))?;
    let mut writer = tokio::fs::OpenOptions::new()
        .write(true)
        .open(&destination)
        .await
        .with_context(|| format!("cannot open {:?} for writing", &destination))?;
    let mut buffer = vec![0u8; buffer_size];
    loop {
        let state = coordinator.state();
        if state.is_done() {
            break;
        }
        transfer_slice(
            &mut reader,
            &mut writer,
            state.position,
            state.volume,
            &mut buffer,
        )
        .await
        .with_context(|| format!("could not transfer data from {:?} to {:?}", &source, &destination))?;
        coordinator.rendezvous().await?;
    }
    writer
        .flush()
        .await
        .with_context(|| format!("failed flushing {:?}", &destination))?;
    Ok(())
}

/// Fails if any destination is the source file itself, which truncating would wipe.
async fn reject_source_as_destination(
    source: &Path,
    source_metadata: &std::fs::Metadata,
    destinations: &[PathBuf],
) -> anyhow::Result<()> {
    use std::os::unix::fs::MetadataExt;
    for destination in destinations {
        let Ok(metadata) = tokio::fs::metadata(destination).await else {
            continue;
        };
        if metadata.dev() == source_metadata.dev() && metadata.ino() == source_metadata.ino() {
            return Err(anyhow!(
                "cannot copy {:?} onto itself, destination {:?}",
                source,
                destination
            ));
        }
    }
    Ok(())
}

/// Creates (or truncates) every destination file, including missing parent directories.
async fn create_destinations(destinations: &[PathBuf]) -> anyhow::Result<()> {
    for destination in destinations {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("cannot create directory {:?}", parent))?;
        }
        tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(destination)
            .await
            .with_context(|| format!("cannot create file {:?}", destination))?;
    }
    Ok(())
}

/// Copies `source` to all `destinations` in lock-step slices; returns the number of bytes copied
/// to each destination.
///
/// A failing worker cancels its siblings and its error is returned.
#[instrument(skip(settings, bytes, listeners))]
pub async fn copy_file(
    source: &Path,
    destinations: &[PathBuf],
    settings: &TransferSettings,
    bytes: &Arc<ByteCounter>,
    listeners: &Listeners,
) -> anyhow::Result<u64> {
    tracing::info!(
        "copying file {:?} to the following destinations: {:?}",
        source,
        destinations
    );
    let source_metadata = tokio::fs::metadata(source)
        .await
        .with_context(|| format!("failed reading metadata from {:?}", source))?;
    reject_source_as_destination(source, &source_metadata, destinations).await?;
    create_destinations(destinations).await?;
    let source_length = source_metadata.len();
    if source_length == 0 || destinations.is_empty() {
        return Ok(0);
    }
    let state = SliceState::new(source_length, settings.initial_slice.max(1));
    tracing::trace!(
        "slice = {} bytes, transfer volume = {} bytes",
        state.slice,
        state.volume
    );
    let coordinator = Arc::new(Coordinator::new(
        destinations.len(),
        state,
        settings,
        bytes.clone(),
        listeners.clone(),
    ));
    let mut join_set = tokio::task::JoinSet::new();
    for destination in destinations {
        let coordinator = coordinator.clone();
        let source = source.to_path_buf();
        let destination = destination.clone();
        let buffer_size = settings.buffer_size.max(1);
        join_set.spawn(async move {
            let cancel = coordinator.cancel.clone();
            let result = run_worker(coordinator, source, destination, buffer_size).await;
            if result.is_err() {
                cancel.cancel();
            }
            result
        });
    }
    let mut failure: Option<anyhow::Error> = None;
    while let Some(res) = join_set.join_next().await {
        let error = match res {
            Ok(Ok(())) => continue,
            Ok(Err(error)) => error,
            Err(error) => {
                coordinator.cancel.cancel();
                anyhow::Error::from(error)
            }
        };
        let is_cancellation = error.downcast_ref::<Cancelled>().is_some();
        if !is_cancellation {
            tracing::error!("could not transfer data: {:#}", &error);
        }
        // keep the root failure rather than a sibling's cancellation
        match &failure {
            Some(existing) if existing.downcast_ref::<Cancelled>().is_none() => {}
            _ => failure = Some(error),
        }
    }
    if let Some(error) = failure {
        return Err(error);
    }
    let state = coordinator.state();
    debug_assert_eq!(state.position, source_length);
    Ok(state.position)
}
