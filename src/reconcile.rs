//! Sync reconciliation between the vault and the search index.
//!
//! A [`Reconciler`] owns one [`RepositoryProvider`] and one [`IndexStore`]
//! and runs every operation that changes the index:
//!
//! | Operation | What it does |
//! |-----------|--------------|
//! | [`full_sync`](Reconciler::full_sync) | Re-index every listed document |
//! | [`incremental_sync`](Reconciler::incremental_sync) | Diff, pull, remove, re-index changed paths |
//! | [`rebuild`](Reconciler::rebuild) | Setup, clear the index, full sync |
//! | [`initial_setup`](Reconciler::initial_setup) | Setup, full sync |
//! | [`sweep_orphans`](Reconciler::sweep_orphans) | Remove indexed paths with no file behind them |
//! | [`force_reindex`](Reconciler::force_reindex) | Re-index one path |
//!
//! Only one of these runs at a time per reconciler; a second caller gets
//! [`SyncError::Busy`] before any work starts. [`status`](Reconciler::status),
//! [`search`](Reconciler::search), and [`stats`](Reconciler::stats) never wait
//! on a run.
//!
//! For a path, the index holds either the chunks of its last successful
//! processing or nothing: [`IndexStore::upsert`] drops old chunks before
//! writing new ones, and a failed write leaves the path empty and counted
//! in [`SyncStats::failed`].

use serde::Serialize;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use vaultsync_core::chunk::chunk_document;
use vaultsync_core::classify::classify;
use vaultsync_core::models::{
    ChangeStatus, CommitInfo, FileChange, IndexStats, ProgressEvent, SearchHit, SearchQuery,
    SyncStats,
};
use vaultsync_core::normalize::normalize;
use vaultsync_core::repository::RepositoryProvider;
use vaultsync_core::store::IndexStore;
use vaultsync_core::sweep::find_orphans;
use vaultsync_core::tokenize::TokenCounter;

use crate::config::Config;
use crate::error::SyncError;
use crate::progress::{
    file_percent, ChannelSink, EtaTracker, NoProgress, ProgressSink, COMPLETE, FINALIZING,
};
use crate::tokenizer::build_token_counter;

/// Tunables for a [`Reconciler`].
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub max_tokens: usize,
    /// Capacity of the channel returned by [`Reconciler::stream`].
    pub progress_buffer: usize,
    pub token_counter: TokenCounter,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_tokens: 500,
            progress_buffer: 64,
            token_counter: TokenCounter::approximate(),
        }
    }
}

impl SyncSettings {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            max_tokens: config.chunking.max_tokens,
            progress_buffer: config.sync.progress_buffer,
            token_counter: build_token_counter(&config.chunking)?,
        })
    }
}

/// Which reconciliation a run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Full,
    Incremental,
    Rebuild,
    InitialSetup,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Incremental => "incremental",
            SyncMode::Rebuild => "rebuild",
            SyncMode::InitialSetup => "initial_setup",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            SyncMode::Full => "full sync",
            SyncMode::Incremental => "incremental sync",
            SyncMode::Rebuild => "rebuild",
            SyncMode::InitialSetup => "initial setup",
        }
    }
}

/// Error code and message of a failed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeError {
    pub code: &'static str,
    pub message: String,
}

impl From<&SyncError> for OutcomeError {
    fn from(err: &SyncError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// Result of a sync run. Either `stats` or `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<SyncStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OutcomeError>,
    /// Classified changes of an incremental run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<Vec<FileChange>>,
}

impl SyncOutcome {
    fn failed(err: &SyncError) -> Self {
        Self {
            success: false,
            message: None,
            stats: None,
            error: Some(err.into()),
            changes: None,
        }
    }

    /// The failure as a [`SyncError`] code, if any.
    pub fn error_code(&self) -> Option<&'static str> {
        self.error.as_ref().map(|e| e.code)
    }
}

/// Result of [`Reconciler::force_reindex`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReindexOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OutcomeError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub removed: usize,
    pub total_orphaned: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepositoryDetails {
    pub url: String,
    pub local_path: String,
    pub branch: String,
    pub last_commit: Option<CommitInfo>,
    pub total_md_files: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepositoryStatus {
    pub repository: RepositoryDetails,
    pub index: IndexStats,
    /// `"ready"` or `"busy"`.
    pub sync_status: &'static str,
}

/// What went wrong with a single document.
#[derive(Debug)]
enum FileFailure {
    Missing,
    Empty,
    Invalid(String),
    Read(String),
    Store(String),
}

impl FileFailure {
    /// Warnings are expected content problems; the rest are I/O errors.
    fn is_warning(&self) -> bool {
        matches!(
            self,
            FileFailure::Missing | FileFailure::Empty | FileFailure::Invalid(_)
        )
    }

    fn message(&self) -> String {
        match self {
            FileFailure::Missing => "File not found".to_string(),
            FileFailure::Empty => "Empty content".to_string(),
            FileFailure::Invalid(reason) => reason.clone(),
            FileFailure::Read(reason) => format!("Failed to read: {}", reason),
            FileFailure::Store(reason) => format!("Failed to index: {}", reason),
        }
    }
}

/// Successful end of a run, before it is reported.
struct RunReport {
    stats: SyncStats,
    changes: Option<Vec<FileChange>>,
    /// Nothing to do: skip the finalizing checkpoint.
    noop: bool,
}

/// Per-run state: the sink, the cancellation token, and the counters.
struct Run<'a> {
    sink: &'a dyn ProgressSink,
    token: CancellationToken,
    stats: SyncStats,
    percent: u8,
}

impl<'a> Run<'a> {
    fn new(sink: &'a dyn ProgressSink, token: CancellationToken) -> Self {
        Self {
            sink,
            token,
            stats: SyncStats::default(),
            percent: 0,
        }
    }

    async fn emit(&mut self, event: ProgressEvent) {
        self.percent = self.percent.max(event.progress());
        self.sink.emit(event).await;
    }

    async fn status(&mut self, message: impl Into<String>, progress: u8) {
        self.emit(ProgressEvent::status(message, progress)).await;
    }

    fn check_cancelled(&self) -> Result<(), SyncError> {
        if self.token.is_cancelled() {
            tracing::warn!(
                processed = self.stats.processed,
                failed = self.stats.failed,
                deleted = self.stats.deleted,
                renamed = self.stats.renamed,
                "run cancelled"
            );
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }
}

/// Keeps an [`IndexStore`] in step with a [`RepositoryProvider`].
pub struct Reconciler<R: ?Sized, S: ?Sized> {
    repo: Arc<R>,
    store: Arc<S>,
    settings: SyncSettings,
    run_lock: Arc<Mutex<()>>,
    cancel: StdMutex<CancellationToken>,
}

/// The reconciler the CLI and HTTP server share.
pub type DynReconciler = Reconciler<dyn RepositoryProvider, dyn IndexStore>;

impl<R, S> Reconciler<R, S>
where
    R: RepositoryProvider + ?Sized,
    S: IndexStore + ?Sized,
{
    pub fn new(repo: Arc<R>, store: Arc<S>, settings: SyncSettings) -> Self {
        Self {
            repo,
            store,
            settings,
            run_lock: Arc::new(Mutex::new(())),
            cancel: StdMutex::new(CancellationToken::new()),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    /// Cancel the in-flight run, if any. Returns whether one was running.
    pub fn cancel(&self) -> bool {
        let running = self.is_busy();
        if running {
            self.current_token().cancel();
        }
        running
    }

    fn current_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Take the run lock and install a fresh cancellation token.
    fn begin(&self) -> Result<(OwnedMutexGuard<()>, CancellationToken), SyncError> {
        let guard = Arc::clone(&self.run_lock)
            .try_lock_owned()
            .map_err(|_| SyncError::Busy)?;
        let token = CancellationToken::new();
        *self
            .cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = token.clone();
        Ok((guard, token))
    }

    pub async fn full_sync(&self) -> SyncOutcome {
        self.run(SyncMode::Full, &NoProgress).await
    }

    pub async fn incremental_sync(&self) -> SyncOutcome {
        self.run(SyncMode::Incremental, &NoProgress).await
    }

    pub async fn rebuild(&self) -> SyncOutcome {
        self.run(SyncMode::Rebuild, &NoProgress).await
    }

    pub async fn initial_setup(&self) -> SyncOutcome {
        self.run(SyncMode::InitialSetup, &NoProgress).await
    }

    /// Run `mode` to completion, reporting each step to `sink`.
    pub async fn run(&self, mode: SyncMode, sink: &dyn ProgressSink) -> SyncOutcome {
        match self.begin() {
            Ok((_guard, token)) => self.execute(mode, sink, token).await,
            Err(err) => {
                tracing::warn!(mode = mode.as_str(), "rejected: {}", err);
                SyncOutcome::failed(&err)
            }
        }
    }

    async fn execute(
        &self,
        mode: SyncMode,
        sink: &dyn ProgressSink,
        token: CancellationToken,
    ) -> SyncOutcome {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("sync", run = %run_id, mode = mode.as_str());

        async move {
            let started = Instant::now();
            tracing::info!("starting {}", mode.label());

            let mut run = Run::new(sink, token);
            run.status(format!("Starting {}", mode.label()), 0).await;

            let result = match mode {
                SyncMode::Full => self.full_pass(&mut run).await,
                SyncMode::Incremental => self.incremental_pass(&mut run).await,
                SyncMode::Rebuild => self.rebuild_pass(&mut run).await,
                SyncMode::InitialSetup => self.setup_pass(&mut run).await,
            };

            match result {
                Ok(report) => {
                    let stats = report.stats;
                    let elapsed = started.elapsed().as_secs_f64();
                    let message = if report.noop {
                        "No changes detected".to_string()
                    } else {
                        run.status("Finalizing", FINALIZING).await;
                        format!(
                            "{} completed: {} processed, {} failed, {} chunks",
                            capitalize(mode.label()),
                            stats.processed,
                            stats.failed,
                            stats.total_chunks
                        )
                    };
                    tracing::info!(
                        processed = stats.processed,
                        failed = stats.failed,
                        deleted = stats.deleted,
                        renamed = stats.renamed,
                        total_chunks = stats.total_chunks,
                        elapsed_secs = elapsed,
                        "{}",
                        message
                    );
                    run.emit(ProgressEvent::Complete {
                        message: message.clone(),
                        progress: COMPLETE,
                        stats,
                        elapsed_secs: elapsed,
                    })
                    .await;
                    SyncOutcome {
                        success: true,
                        message: Some(message),
                        stats: Some(stats),
                        error: None,
                        changes: report.changes,
                    }
                }
                Err(err) => {
                    tracing::error!("{} failed: {}", mode.label(), err);
                    let percent = run.percent;
                    run.emit(ProgressEvent::fatal(err.to_string(), percent)).await;
                    SyncOutcome::failed(&err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn full_pass(&self, run: &mut Run<'_>) -> Result<RunReport, SyncError> {
        let paths = self.enumerate(run).await?;
        self.process_paths(run, &paths).await?;
        Ok(RunReport {
            stats: run.stats,
            changes: None,
            noop: false,
        })
    }

    async fn setup_pass(&self, run: &mut Run<'_>) -> Result<RunReport, SyncError> {
        run.status("Setting up repository", 5).await;
        self.repo.setup().await.map_err(SyncError::setup)?;
        self.full_pass(run).await
    }

    async fn rebuild_pass(&self, run: &mut Run<'_>) -> Result<RunReport, SyncError> {
        run.status("Setting up repository", 5).await;
        self.repo.setup().await.map_err(SyncError::setup)?;

        run.status("Clearing index", 10).await;
        self.store.clear().await.map_err(SyncError::clear)?;

        self.full_pass(run).await
    }

    async fn incremental_pass(&self, run: &mut Run<'_>) -> Result<RunReport, SyncError> {
        let diff = self
            .repo
            .diff_since_last_sync()
            .await
            .map_err(SyncError::diff)?;
        let changes = classify(&diff);

        if changes.is_empty() {
            tracing::info!(head = %diff.local_head, "no changes since last sync");
            return Ok(RunReport {
                stats: SyncStats::default(),
                changes: Some(changes),
                noop: true,
            });
        }

        tracing::info!(
            from = %diff.local_head,
            to = %diff.remote_head,
            changes = changes.len(),
            "changes detected"
        );
        run.status(format!("Found {} changes", changes.len()), 5)
            .await;

        run.status("Pulling latest changes", 10).await;
        self.repo.pull().await.map_err(SyncError::pull)?;

        run.status("Applying removals", 15).await;
        self.apply_removals(run, &changes).await?;

        let to_index: Vec<String> = changes
            .iter()
            .filter(|c| c.needs_indexing())
            .map(|c| c.path.clone())
            .collect();
        run.status(format!("Processing {} changes", to_index.len()), 20)
            .await;
        self.process_paths(run, &to_index).await?;

        Ok(RunReport {
            stats: run.stats,
            changes: Some(changes),
            noop: false,
        })
    }

    async fn apply_removals(
        &self,
        run: &mut Run<'_>,
        changes: &[FileChange],
    ) -> Result<(), SyncError> {
        for change in changes {
            let target = match (change.status, change.old_path.as_deref()) {
                (ChangeStatus::Deleted, _) => change.path.as_str(),
                (ChangeStatus::Renamed, Some(old)) => old,
                _ => continue,
            };
            run.check_cancelled()?;

            match self.store.remove(target).await {
                Ok(()) => {
                    if change.status == ChangeStatus::Deleted {
                        run.stats.deleted += 1;
                    } else {
                        run.stats.renamed += 1;
                    }
                    tracing::debug!(path = target, "removed from index");
                }
                Err(e) => {
                    run.stats.failed += 1;
                    tracing::warn!(path = target, "failed to remove from index: {:#}", e);
                    let percent = run.percent;
                    run.emit(ProgressEvent::Error {
                        message: format!("Failed to remove: {:#}", e),
                        progress: percent,
                        path: Some(target.to_string()),
                    })
                    .await;
                }
            }
        }
        Ok(())
    }

    async fn enumerate(&self, run: &mut Run<'_>) -> Result<Vec<String>, SyncError> {
        run.status("Enumerating files", 15).await;
        let paths = self
            .repo
            .list_document_paths()
            .await
            .map_err(SyncError::list)?;
        tracing::info!(files = paths.len(), "enumerated documents");
        run.status(format!("Found {} files", paths.len()), 20).await;
        Ok(paths)
    }

    async fn process_paths(&self, run: &mut Run<'_>, paths: &[String]) -> Result<(), SyncError> {
        let total = paths.len();
        let eta = EtaTracker::new(total);

        for (i, path) in paths.iter().enumerate() {
            run.check_cancelled()?;
            let percent = file_percent(i, total);
            run.emit(ProgressEvent::Progress {
                message: format!("Processing {}", path),
                progress: percent,
                current: i + 1,
                total,
                path: path.clone(),
                eta: eta.eta(i),
            })
            .await;

            match self.index_path(path).await {
                Ok(chunks) => {
                    run.stats.processed += 1;
                    run.stats.total_chunks += chunks;
                    tracing::debug!(path = %path, chunks, "indexed");
                    run.emit(ProgressEvent::FileComplete {
                        message: format!("Indexed {} ({} chunks)", path, chunks),
                        progress: percent,
                        path: path.clone(),
                        chunks,
                    })
                    .await;
                }
                Err(failure) => {
                    run.stats.failed += 1;
                    let message = failure.message();
                    tracing::warn!(path = %path, "{}", message);
                    let event = if failure.is_warning() {
                        ProgressEvent::Warning {
                            message,
                            progress: percent,
                            path: path.clone(),
                        }
                    } else {
                        ProgressEvent::Error {
                            message,
                            progress: percent,
                            path: Some(path.clone()),
                        }
                    };
                    run.emit(event).await;
                }
            }
        }
        Ok(())
    }

    /// Read, normalize, chunk, and upsert one path. Returns the chunk count.
    async fn index_path(&self, path: &str) -> Result<usize, FileFailure> {
        let raw = match self.repo.read_document(path).await {
            Ok(Some(raw)) if raw.trim().is_empty() => return Err(FileFailure::Empty),
            Ok(Some(raw)) => raw,
            Ok(None) => return Err(FileFailure::Missing),
            Err(e) => return Err(FileFailure::Read(format!("{:#}", e))),
        };

        let counter = &self.settings.token_counter;
        let doc = normalize(path, &raw, counter).map_err(|e| FileFailure::Invalid(e.to_string()))?;
        let chunks = chunk_document(&doc, self.settings.max_tokens, counter);

        self.store
            .upsert(path, &chunks)
            .await
            .map_err(|e| FileFailure::Store(format!("{:#}", e)))?;
        Ok(chunks.len())
    }

    /// Remove every indexed path the repository no longer lists.
    pub async fn sweep_orphans(&self) -> Result<SweepReport, SyncError> {
        let (_guard, _token) = self.begin()?;

        let indexed = self
            .store
            .list_indexed_paths()
            .await
            .map_err(SyncError::store)?;
        let present = self
            .repo
            .list_document_paths()
            .await
            .map_err(SyncError::list)?;
        let orphans = find_orphans(&indexed, &present);

        let mut removed = 0;
        for path in &orphans {
            match self.store.remove(path).await {
                Ok(()) => {
                    removed += 1;
                    tracing::debug!(path = %path, "removed orphan");
                }
                Err(e) => tracing::warn!(path = %path, "failed to remove orphan: {:#}", e),
            }
        }

        let message = format!("Removed {} of {} orphaned documents", removed, orphans.len());
        tracing::info!(removed, orphaned = orphans.len(), "orphan sweep finished");
        Ok(SweepReport {
            removed,
            total_orphaned: orphans.len(),
            message,
        })
    }

    /// Re-index a single path outside of a sync cycle.
    ///
    /// Paths the repository does not track (not `.md`, or outside the
    /// include/exclude globs) are rejected before the run lock is taken.
    pub async fn force_reindex(&self, path: &str) -> ReindexOutcome {
        let checked = if self.repo.tracks(path) {
            self.begin()
        } else {
            Err(SyncError::Untracked(path.to_string()))
        };
        let result = match checked {
            Ok((_guard, _token)) => self.index_path(path).await.map_err(|failure| match failure {
                FileFailure::Missing => SyncError::NotFound(path.to_string()),
                FileFailure::Store(reason) => SyncError::Store(reason),
                other => SyncError::Document(other.message()),
            }),
            Err(err) => Err(err),
        };

        match result {
            Ok(chunks) => {
                tracing::info!(path, chunks, "reindexed");
                ReindexOutcome {
                    success: true,
                    message: Some(format!("Reindexed {} ({} chunks)", path, chunks)),
                    chunks: Some(chunks),
                    error: None,
                }
            }
            Err(err) => {
                tracing::warn!(path, "reindex failed: {}", err);
                ReindexOutcome {
                    success: false,
                    message: None,
                    chunks: None,
                    error: Some((&err).into()),
                }
            }
        }
    }

    /// Repository and index overview. Never waits on a running sync.
    pub async fn status(&self) -> Result<RepositoryStatus, SyncError> {
        let info = self.repo.describe();
        let last_commit = self.repo.last_sync_info().await.unwrap_or_else(|e| {
            tracing::warn!("could not read last commit: {:#}", e);
            None
        });
        let total_md_files = match self.repo.list_document_paths().await {
            Ok(paths) => paths.len(),
            Err(e) => {
                tracing::warn!("could not list documents: {:#}", e);
                0
            }
        };
        let index = self.store.stats().await.map_err(SyncError::store)?;

        Ok(RepositoryStatus {
            repository: RepositoryDetails {
                url: info.url,
                local_path: info.local_path,
                branch: info.branch,
                last_commit,
                total_md_files,
            },
            index,
            sync_status: if self.is_busy() { "busy" } else { "ready" },
        })
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, SyncError> {
        self.store.search(query).await.map_err(SyncError::store)
    }

    pub async fn stats(&self) -> Result<IndexStats, SyncError> {
        self.store.stats().await.map_err(SyncError::store)
    }
}

impl<R, S> Reconciler<R, S>
where
    R: RepositoryProvider + ?Sized + 'static,
    S: IndexStore + ?Sized + 'static,
{
    /// Run `mode` on a background task and wait for its outcome.
    ///
    /// Unlike [`run`](Self::run), dropping the returned future does not
    /// stop the run: it carries on to completion and releases the lock.
    pub async fn run_detached(self: &Arc<Self>, mode: SyncMode) -> SyncOutcome {
        let (guard, token) = match self.begin() {
            Ok(started) => started,
            Err(err) => {
                tracing::warn!(mode = mode.as_str(), "rejected: {}", err);
                return SyncOutcome::failed(&err);
            }
        };
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let _guard = guard;
            this.execute(mode, &NoProgress, token).await
        });

        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(mode = mode.as_str(), "sync task failed: {}", e);
                SyncOutcome::failed(&SyncError::Aborted(e.to_string()))
            }
        }
    }

    /// Start `mode` on a background task and return its event stream.
    ///
    /// The run lock is taken before this returns, so a busy reconciler is
    /// rejected here rather than through the stream. The stream ends with
    /// a `complete` event or a single fatal `error` event. Dropping the
    /// receiver does not stop the run.
    pub fn stream(self: &Arc<Self>, mode: SyncMode) -> Result<mpsc::Receiver<ProgressEvent>, SyncError> {
        let (guard, token) = self.begin()?;
        let (tx, rx) = mpsc::channel(self.settings.progress_buffer.max(1));
        let this = Arc::clone(self);

        tokio::spawn(async move {
            // The lock is released before the channel closes, so a consumer
            // that sees the end of the stream can start the next run.
            let sink = ChannelSink::new(tx);
            let _guard = guard;
            this.execute(mode, &sink, token).await;
        });
        Ok(rx)
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
