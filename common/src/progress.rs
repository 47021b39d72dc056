//! Progress reporting for copy batches.
//!
//! The engine never talks to a UI directly. It pushes [`Event`]s onto unbounded channels handed
//! out by [`Reporter::subscribe`]; whoever holds the receiving end (the CLI progress bar, a test,
//! a GUI) renders them. Dropping the receiver unsubscribes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

/// Lifecycle of one copy batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    /// initial state, also entered by `reset`
    #[default]
    Start,
    /// sources are being expanded and jobs validated
    CheckingSource,
    /// data is being transferred
    Copying,
    /// the batch finished
    End,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            State::Start => "start",
            State::CheckingSource => "checking source",
            State::Copying => "copying",
            State::End => "end",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// the batch moved from one state to another
    State { previous: State, current: State },
    /// running total of bytes committed to all destinations of the batch
    Bytes { previous: u64, current: u64 },
    /// a source directory is being scanned
    Visiting(std::path::PathBuf),
}

/// Fan-out of events to every subscribed channel.
///
/// Cloning is cheap; transfer workers carry their own copy.
#[derive(Debug, Clone, Default)]
pub struct Listeners {
    senders: Vec<mpsc::UnboundedSender<Event>>,
}

impl Listeners {
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Event> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.senders.push(sender);
        receiver
    }

    pub fn emit(&self, event: Event) {
        for sender in &self.senders {
            // a dropped receiver just stops listening
            let _ = sender.send(event.clone());
        }
    }

    pub fn prune(&mut self) {
        self.senders.retain(|sender| !sender.is_closed());
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

/// Running byte totals of a batch.
///
/// Only the elected leader of a transfer round calls [`ByteCounter::commit`], so the counter is
/// never updated concurrently; atomics make it shareable with the worker tasks.
#[derive(Debug, Default)]
pub struct ByteCounter {
    total: AtomicU64,
    copied: AtomicU64,
    reported: AtomicU64,
}

impl ByteCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_total(&self, bytes: u64) {
        self.total.fetch_add(bytes, Ordering::AcqRel);
    }

    /// Bytes found by source expansion
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    /// Bytes committed so far
    pub fn copied(&self) -> u64 {
        self.copied.load(Ordering::Acquire)
    }

    pub fn commit(&self, bytes: u64, listeners: &Listeners) {
        let current = self.copied.fetch_add(bytes, Ordering::AcqRel) + bytes;
        let previous = self.reported.swap(current, Ordering::AcqRel);
        listeners.emit(Event::Bytes { previous, current });
    }

    /// Emits one last byte event if the last reported value lags behind the total.
    pub fn flush(&self, listeners: &Listeners) -> bool {
        let current = self.copied();
        let previous = self.reported.swap(current, Ordering::AcqRel);
        if previous == current {
            return false;
        }
        listeners.emit(Event::Bytes { previous, current });
        true
    }

    pub fn clear(&self) {
        self.total.store(0, Ordering::Release);
        self.copied.store(0, Ordering::Release);
        self.reported.store(0, Ordering::Release);
    }
}

/// State machine of a copy batch plus the channels its events go to.
#[derive(Debug, Default)]
pub struct Reporter {
    state: State,
    listeners: Listeners,
    bytes: Arc<ByteCounter>,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Event> {
        self.listeners.prune();
        self.listeners.subscribe()
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn listeners(&self) -> &Listeners {
        &self.listeners
    }

    pub fn bytes(&self) -> &Arc<ByteCounter> {
        &self.bytes
    }

    pub fn transition(&mut self, current: State) {
        let previous = std::mem::replace(&mut self.state, current);
        tracing::debug!("state: {} -> {}", previous, current);
        self.listeners.emit(Event::State { previous, current });
    }

    pub fn visiting(&self, directory: &std::path::Path) {
        self.listeners.emit(Event::Visiting(directory.to_path_buf()));
    }

    /// Flushes the byte counter and enters [`State::End`].
    pub fn finish(&mut self) {
        if self.bytes.flush(&self.listeners) {
            tracing::debug!("flushed final byte count: {}", self.bytes.copied());
        }
        self.transition(State::End);
    }

    /// Forces [`State::Start`] and zeroes the byte counters; only valid between batches.
    pub fn reset(&mut self) {
        self.bytes.clear();
        self.transition(State::Start);
    }
}

/// How progress is rendered by the command line tool
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ProgressType {
    /// progress bar when stderr is a terminal, text updates otherwise
    #[default]
    Auto,
    /// animated progress bar
    ProgressBar,
    /// periodic text updates, appropriate for logging
    TextUpdates,
}

/// Accumulates events and formats periodic text updates
pub struct ProgressPrinter {
    state: State,
    total: u64,
    copied: u64,
    last_copied: u64,
    last_update: std::time::Instant,
    start_time: std::time::Instant,
    current_directory: Option<std::path::PathBuf>,
}

impl ProgressPrinter {
    pub fn new(total: u64) -> Self {
        let now = std::time::Instant::now();
        Self {
            state: State::Start,
            total,
            copied: 0,
            last_copied: 0,
            last_update: now,
            start_time: now,
            current_directory: None,
        }
    }

    pub fn set_total(&mut self, total: u64) {
        self.total = total;
    }

    pub fn copied(&self) -> u64 {
        self.copied
    }

    pub fn update(&mut self, event: &Event) {
        match event {
            Event::State { current, .. } => self.state = *current,
            Event::Bytes { current, .. } => self.copied = *current,
            Event::Visiting(directory) => self.current_directory = Some(directory.clone()),
        }
    }

    pub fn print(&mut self) -> String {
        let time_now = std::time::Instant::now();
        let total_duration_secs = (time_now - self.start_time).as_secs_f64();
        let curr_duration_secs = (time_now - self.last_update).as_secs_f64();
        let average_rate = rate(self.copied, total_duration_secs);
        let current_rate = rate(self.copied.saturating_sub(self.last_copied), curr_duration_secs);
        self.last_copied = self.copied;
        self.last_update = time_now;
        if self.state == State::CheckingSource {
            let directory = self
                .current_directory
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_default();
            return format!("checking source: {directory}");
        }
        format!(
            "-----------------------\n\
            state:   {:>10}\n\
            copied:  {:>10} / {}\n\
            average: {:>10}/s\n\
            current: {:>10}/s",
            self.state,
            bytesize::ByteSize(self.copied),
            bytesize::ByteSize(self.total),
            bytesize::ByteSize(average_rate),
            bytesize::ByteSize(current_rate),
        )
    }
}

fn rate(bytes: u64, secs: f64) -> u64 {
    if secs <= 0.0 {
        return 0;
    }
    (bytes as f64 / secs) as u64
}

/// Renders the event stream until every sender is gone.
///
/// `total` is read again on every update since it is only known once sources are expanded.
pub async fn display(
    mut events: mpsc::UnboundedReceiver<Event>,
    bytes: Arc<ByteCounter>,
    progress_type: ProgressType,
    delay: std::time::Duration,
) {
    let use_bar = match progress_type {
        ProgressType::Auto => std::io::IsTerminal::is_terminal(&std::io::stderr()),
        ProgressType::ProgressBar => true,
        ProgressType::TextUpdates => false,
    };
    if use_bar {
        let bar = indicatif::ProgressBar::new(0);
        let style = indicatif::ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}",
        );
        if let Ok(style) = style {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.enable_steady_tick(delay);
        while let Some(event) = events.recv().await {
            bar.set_length(bytes.total());
            match event {
                Event::State { current, .. } => bar.set_message(current.to_string()),
                Event::Bytes { current, .. } => bar.set_position(current),
                Event::Visiting(directory) => {
                    bar.set_message(format!("scanning {}", directory.display()))
                }
            }
        }
        bar.finish_and_clear();
    } else {
        let mut printer = ProgressPrinter::new(bytes.total());
        let mut interval = tokio::time::interval(delay);
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => printer.update(&event),
                    None => break,
                },
                _ = interval.tick() => {
                    printer.set_total(bytes.total());
                    eprintln!("{}", printer.print());
                }
            }
        }
        printer.set_total(bytes.total());
        eprintln!("{}", printer.print());
    }
}
