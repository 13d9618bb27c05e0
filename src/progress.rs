//! Sync progress reporting.
//!
//! A run reports each step as a [`ProgressEvent`] to a [`ProgressSink`].
//! The CLI prints events on **stderr** so stdout remains parseable for
//! scripts; streaming endpoints forward them over a bounded channel.
//!
//! Percentages follow a fixed layout: setup checkpoints occupy `0..=20`,
//! per-file work spans `20..90`, and `95`/`100` mark finalizing and
//! completion.

use async_trait::async_trait;
use std::io::Write;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use vaultsync_core::models::ProgressEvent;

/// Percentage at which per-file work starts.
pub const FILES_START: u8 = 20;
/// Width of the per-file band.
pub const FILES_SPAN: u8 = 70;
pub const FINALIZING: u8 = 95;
pub const COMPLETE: u8 = 100;

/// Receives progress events for one run.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, event: ProgressEvent);
}

/// Forwards events into a bounded channel.
///
/// Once the receiver is gone events are dropped and the run carries on.
pub struct ChannelSink {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ProgressSink for ChannelSink {
    async fn emit(&self, event: ProgressEvent) {
        if self.tx.is_closed() {
            return;
        }
        let _ = self.tx.send(event).await;
    }
}

/// Human-friendly progress on stderr: `[ 47%] (3/10) notes/a.md  eta 4s`.
pub struct StderrProgress;

#[async_trait]
impl ProgressSink for StderrProgress {
    async fn emit(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Progress {
                progress,
                current,
                total,
                path,
                eta,
                ..
            } => format!(
                "[{:>3}%] ({}/{}) {}  eta {}\n",
                progress,
                format_number(*current as u64),
                format_number(*total as u64),
                path,
                eta
            ),
            ProgressEvent::FileComplete { .. } => return,
            ProgressEvent::Warning { message, path, .. } => {
                format!("  warning  {}: {}\n", path, message)
            }
            ProgressEvent::Error {
                message,
                path: Some(path),
                ..
            } => format!("  error    {}: {}\n", path, message),
            other => format!("[{:>3}%] {}\n", other.progress(), other.message()),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

#[async_trait]
impl ProgressSink for JsonProgress {
    async fn emit(&self, event: ProgressEvent) {
        if let Ok(line) = serde_json::to_string(&event) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op sink when progress is disabled.
pub struct NoProgress;

#[async_trait]
impl ProgressSink for NoProgress {
    async fn emit(&self, _event: ProgressEvent) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn sink(&self) -> Box<dyn ProgressSink> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

/// Percentage for file `current` (zero-based) of `total`.
pub fn file_percent(current: usize, total: usize) -> u8 {
    if total == 0 {
        return FILES_START;
    }
    let done = current.min(total) as u64;
    FILES_START + (FILES_SPAN as u64 * done / total as u64) as u8
}

/// Estimates time remaining from the average time per finished file.
pub struct EtaTracker {
    started: Instant,
    total: usize,
}

impl EtaTracker {
    pub fn new(total: usize) -> Self {
        Self {
            started: Instant::now(),
            total,
        }
    }

    /// ETA before starting file `done` (zero-based): `"calculating"` until
    /// at least one file has finished.
    pub fn eta(&self, done: usize) -> String {
        eta_from(self.started.elapsed(), done, self.total)
    }
}

fn eta_from(elapsed: Duration, done: usize, total: usize) -> String {
    if done == 0 {
        return "calculating".to_string();
    }
    let remaining = total.saturating_sub(done) as f64;
    let per_file = elapsed.as_secs_f64() / done as f64;
    format_duration(Duration::from_secs_f64(remaining * per_file))
}

/// `42s`, `3m 05s`, `1h 02m`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60)
    }
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}
