// The job client: one `Flow` per kind of job (convert or separate).
//
// A flow owns the selected file, the state of the current job and the
// result artifacts of the last successful one:
//
//     idle -> submitting -> subscribed -> succeeded | failed -> idle
//                      \____________\__ cancel() __________/
//
// Everything is driven through `&mut self`, so a flow never runs two jobs
// at once. Each submission first tears down whatever the previous one
// left behind: the subscription, a job id still known to the backend, and
// the blob handles of earlier results.
//
// Failures never escape as `Err`. They end the job and leave a
// `Status` with the message meant for the user.

use crate::backend::{Backend, Download};
use crate::blob::{BlobHandle, BlobStore};
use crate::error::ClientError;
use crate::model::{disposition_filename, Capabilities, FlowKind, JobId, Stem};
use crate::picker::SelectedFile;
use futures::future::{self, try_join_all};
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const CONNECTION_LOST: &str = "Connection lost. Please try again.";
pub const DOWNLOAD_FAILED: &str = "Download failed.";
pub const SOMETHING_WENT_WRONG: &str = "Something went wrong.";

/// Where a flow is in the lifecycle of its current job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Submitting,
    Subscribed(JobId),
    Succeeded,
    Failed,
}

impl Phase {
    pub fn is_active(&self) -> bool {
        matches!(self, Phase::Submitting | Phase::Subscribed(_))
    }
}

/// Message shown to the user after a job ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub message: String,
    pub is_error: bool,
}

/// One downloadable output of a finished job.
#[derive(Debug)]
pub struct ResultArtifact {
    pub stem: Stem,
    /// File name offered for saving.
    pub name: String,
    pub blob: BlobHandle,
}

/// Receives state changes of a flow. Every method defaults to a no-op.
pub trait FlowObserver: Send + Sync {
    fn on_phase(&self, phase: &Phase) {
        let _ = phase;
    }

    fn on_progress(&self, percent: u8) {
        let _ = percent;
    }

    fn on_status(&self, status: &Status) {
        let _ = status;
    }
}

pub struct NoopObserver;

impl FlowObserver for NoopObserver {}

/// Fetch the server's capabilities, falling back to the defaults on any
/// failure.
pub async fn load_capabilities<B: Backend>(backend: &B) -> Capabilities {
    match backend.capabilities().await {
        Ok(caps) => {
            debug!("Server capabilities: {:?}", caps);
            caps
        }
        Err(e) => {
            debug!("Capability info unavailable, using defaults: {}", e);
            Capabilities::default()
        }
    }
}

/// Phase and progress, written while a job runs.
struct Tracker<'a> {
    phase: &'a mut Phase,
    percent: &'a mut u8,
    observer: &'a dyn FlowObserver,
}

impl Tracker<'_> {
    fn set_phase(&mut self, phase: Phase) {
        *self.phase = phase;
        self.observer.on_phase(self.phase);
    }

    fn set_percent(&mut self, percent: u8) {
        *self.percent = percent;
        self.observer.on_progress(percent);
    }
}

pub struct Flow<B: Backend> {
    kind: FlowKind,
    backend: B,
    blobs: BlobStore,
    capabilities: Capabilities,
    observer: Arc<dyn FlowObserver>,
    file: Option<SelectedFile>,
    phase: Phase,
    percent: u8,
    status: Option<Status>,
    results: Vec<ResultArtifact>,
}

impl<B: Backend> Flow<B> {
    pub fn new(kind: FlowKind, backend: B) -> Self {
        Flow {
            kind,
            backend,
            blobs: BlobStore::new(),
            capabilities: Capabilities::default(),
            observer: Arc::new(NoopObserver),
            file: None,
            phase: Phase::Idle,
            percent: 0,
            status: None,
            results: Vec::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_blob_store(mut self, blobs: BlobStore) -> Self {
        self.blobs = blobs;
        self
    }

    pub fn set_observer(&mut self, observer: Arc<dyn FlowObserver>) {
        self.observer = observer;
    }

    /// Ask the backend for its capabilities; keep the current ones if that
    /// fails.
    pub async fn load_capabilities(&mut self) {
        self.capabilities = load_capabilities(&self.backend).await;
    }

    pub fn kind(&self) -> FlowKind {
        self.kind
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn file(&self) -> Option<&SelectedFile> {
        self.file.as_ref()
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    pub fn results(&self) -> &[ResultArtifact] {
        &self.results
    }

    pub fn is_busy(&self) -> bool {
        self.phase.is_active()
    }

    /// Whether there is anything for `reset` to clear.
    pub fn can_reset(&self) -> bool {
        self.file.is_some() || self.status.is_some() || !self.results.is_empty()
    }

    /// Record a newly chosen file and clear the outcome of any earlier job.
    /// `None` (nothing picked) leaves the flow untouched.
    pub fn pick(&mut self, file: Option<SelectedFile>) {
        let Some(file) = file else {
            return;
        };
        debug!("{}: selected {}", self.kind.label(), file.name());
        self.file = Some(file);
        self.clear_outcome();
    }

    /// Run a job for the selected file to completion. No-op without a file.
    pub async fn submit(&mut self) {
        self.submit_until(future::pending::<()>()).await;
    }

    /// Like [`Flow::submit`], but cancel the job if `cancelled` resolves
    /// before it finishes.
    ///
    /// If the returned future is dropped mid-job instead, the flow stays in
    /// its active phase; the next `submit`, `cancel`, `reset` or drop of
    /// the flow cleans up.
    pub async fn submit_until<F>(&mut self, cancelled: F)
    where
        F: Future<Output = ()>,
    {
        let Some(file) = self.file.clone() else {
            return;
        };

        self.stop_job();
        self.clear_outcome();

        let outcome = {
            let mut tracker = Tracker {
                phase: &mut self.phase,
                percent: &mut self.percent,
                observer: self.observer.as_ref(),
            };
            tracker.set_phase(Phase::Submitting);
            let run = run_job(
                &self.backend,
                self.kind,
                &file,
                &self.capabilities,
                &self.blobs,
                &mut tracker,
            );
            tokio::pin!(run);
            tokio::pin!(cancelled);
            tokio::select! {
                biased;
                _ = &mut cancelled => None,
                outcome = &mut run => Some(outcome),
            }
        };

        match outcome {
            None => {
                info!("{}: job cancelled", self.kind.label());
                self.cancel();
            }
            Some(Ok(results)) => {
                self.results = results;
                self.set_phase(Phase::Succeeded);
                info!("{}: job succeeded", self.kind.label());
                self.set_status(self.kind.success_message(), false);
            }
            Some(Err(message)) => self.fail(message),
        }
    }

    /// Abandon the running job and return to idle without a message.
    /// Does nothing unless a job is submitting or subscribed.
    pub fn cancel(&mut self) {
        if !self.phase.is_active() {
            return;
        }
        self.stop_job();
        self.clear_outcome();
        self.set_phase(Phase::Idle);
    }

    /// Cancel whatever is running and forget the selected file.
    pub fn reset(&mut self) {
        self.stop_job();
        self.file = None;
        self.clear_outcome();
        self.set_phase(Phase::Idle);
    }

    fn fail(&mut self, message: String) {
        warn!("{}: job failed: {}", self.kind.label(), message);
        self.stop_job();
        self.set_phase(Phase::Failed);
        self.set_status(&message, true);
    }

    /// Send a cancel notice for a job id the backend still knows about.
    /// The subscription itself was closed when the job future ended.
    fn stop_job(&mut self) {
        if let Phase::Subscribed(job) = &self.phase {
            debug!("{}: notifying backend to drop job {}", self.kind.label(), job);
            self.backend.cancel(self.kind, job);
        }
        if self.phase.is_active() {
            self.phase = Phase::Idle;
        }
    }

    /// Clear status, progress and results. Dropping the artifacts releases
    /// their blob handles.
    fn clear_outcome(&mut self) {
        self.status = None;
        self.percent = 0;
        self.results.clear();
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.observer.on_phase(&self.phase);
    }

    fn set_status(&mut self, message: &str, is_error: bool) {
        let status = Status {
            message: message.to_string(),
            is_error,
        };
        self.observer.on_status(&status);
        self.status = Some(status);
    }
}

impl<B: Backend> Drop for Flow<B> {
    fn drop(&mut self) {
        self.stop_job();
    }
}

/// Submit, follow progress, fetch results. `Err` carries the message for
/// the user.
async fn run_job<B: Backend>(
    backend: &B,
    kind: FlowKind,
    file: &SelectedFile,
    caps: &Capabilities,
    blobs: &BlobStore,
    tracker: &mut Tracker<'_>,
) -> Result<Vec<ResultArtifact>, String> {
    let job = backend
        .submit(kind, file)
        .await
        .map_err(|e| rejected_message(kind, &e))?;
    info!("{}: job {} started", kind.label(), job);
    tracker.set_phase(Phase::Subscribed(job.clone()));

    let mut events = backend.subscribe(kind, &job).await.map_err(|e| {
        warn!("Could not open progress stream for job {}: {}", job, e);
        CONNECTION_LOST.to_string()
    })?;

    loop {
        match events.next().await {
            Some(Ok(event)) => {
                tracker.set_percent(event.percent());
                if let Some(message) = event.error_message() {
                    return Err(message.to_string());
                }
                if event.done {
                    break;
                }
            }
            Some(Err(e)) => {
                warn!("Progress stream for job {} failed: {}", job, e);
                return Err(CONNECTION_LOST.to_string());
            }
            None => return Err(CONNECTION_LOST.to_string()),
        }
    }
    drop(events);
    tracker.set_percent(100);

    let downloads = try_join_all(
        kind.stems()
            .iter()
            .map(|&stem| backend.download(kind, &job, stem)),
    )
    .await
    .map_err(|e| {
        warn!("Fetching results of job {} failed: {}", job, e);
        DOWNLOAD_FAILED.to_string()
    })?;

    let base = file.base_name().unwrap_or("audio");
    Ok(kind
        .stems()
        .iter()
        .zip(downloads)
        .map(|(&stem, download)| artifact(stem, download, base, caps, blobs))
        .collect())
}

fn artifact(
    stem: Stem,
    download: Download,
    base: &str,
    caps: &Capabilities,
    blobs: &BlobStore,
) -> ResultArtifact {
    let name = download
        .content_disposition
        .as_deref()
        .and_then(disposition_filename)
        .unwrap_or_else(|| format!("{}{}", base, stem.fallback_suffix(caps)));
    ResultArtifact {
        stem,
        name,
        blob: blobs.create(download.bytes),
    }
}

/// User-facing text for a submission that did not produce a job.
fn rejected_message(kind: FlowKind, err: &ClientError) -> String {
    match err {
        ClientError::Status { .. } => err
            .server_message()
            .unwrap_or(kind.rejected_message())
            .to_string(),
        other => {
            warn!("Submission failed: {}", other);
            SOMETHING_WENT_WRONG.to_string()
        }
    }
}
