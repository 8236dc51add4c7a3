// Job lifecycle tests against an in-memory backend.
//
// `FakeBackend` scripts the submission answer, the progress events and the
// result downloads, and counts open subscriptions and cancel notices so
// the tests can check what the flow did with them.

use copyrem_cli::backend::{Backend, Download, ProgressStream};
use copyrem_cli::flow::{self, CONNECTION_LOST, DOWNLOAD_FAILED, SOMETHING_WENT_WRONG};
use copyrem_cli::{
    BlobStore, Capabilities, ClientError, Flow, FlowKind, FlowObserver, JobId, Phase,
    ProgressEvent, SelectedFile, Status, Stem,
};
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

// ── Fake backend ─────────────────────────────────────────────────────────────

#[derive(Clone)]
enum SubmitScript {
    Accept(&'static str),
    Reject {
        status: u16,
        reason: Option<&'static str>,
        message: Option<&'static str>,
    },
    Transport,
}

#[derive(Clone)]
enum Item {
    Event(ProgressEvent),
    TransportError,
    /// Never yields again.
    Hang,
}

fn pct(percent: u32) -> Item {
    Item::Event(ProgressEvent {
        percent,
        ..Default::default()
    })
}

fn done() -> Item {
    Item::Event(ProgressEvent {
        done: true,
        ..Default::default()
    })
}

fn error(message: &str) -> Item {
    Item::Event(ProgressEvent {
        error: Some(message.to_string()),
        ..Default::default()
    })
}

struct Inner {
    capabilities: Option<Capabilities>,
    submit: SubmitScript,
    items: Vec<Item>,
    vocals_fail: bool,
    instrumental_fail: bool,
    disposition: Option<&'static str>,
    submits: AtomicUsize,
    subscribed: AtomicUsize,
    open: AtomicUsize,
    max_open: AtomicUsize,
    cancels: Mutex<Vec<JobId>>,
}

#[derive(Clone)]
struct FakeBackend(Arc<Inner>);

struct Builder(Inner);

impl Builder {
    fn submit(mut self, script: SubmitScript) -> Self {
        self.0.submit = script;
        self
    }

    fn items(mut self, items: Vec<Item>) -> Self {
        self.0.items = items;
        self
    }

    fn capabilities(mut self, caps: Capabilities) -> Self {
        self.0.capabilities = Some(caps);
        self
    }

    fn fail_instrumental(mut self) -> Self {
        self.0.instrumental_fail = true;
        self
    }

    fn disposition(mut self, header: &'static str) -> Self {
        self.0.disposition = Some(header);
        self
    }

    fn build(self) -> FakeBackend {
        FakeBackend(Arc::new(self.0))
    }
}

impl FakeBackend {
    fn builder() -> Builder {
        Builder(Inner {
            capabilities: None,
            submit: SubmitScript::Accept("abc"),
            items: vec![pct(30), pct(70), done()],
            vocals_fail: false,
            instrumental_fail: false,
            disposition: None,
            submits: AtomicUsize::new(0),
            subscribed: AtomicUsize::new(0),
            open: AtomicUsize::new(0),
            max_open: AtomicUsize::new(0),
            cancels: Mutex::new(Vec::new()),
        })
    }

    fn submits(&self) -> usize {
        self.0.submits.load(Ordering::SeqCst)
    }

    fn subscribed(&self) -> usize {
        self.0.subscribed.load(Ordering::SeqCst)
    }

    fn open(&self) -> usize {
        self.0.open.load(Ordering::SeqCst)
    }

    fn max_open(&self) -> usize {
        self.0.max_open.load(Ordering::SeqCst)
    }

    fn cancels(&self) -> Vec<String> {
        self.0
            .cancels
            .lock()
            .unwrap()
            .iter()
            .map(|j| j.as_str().to_string())
            .collect()
    }
}

/// Decrements the open-subscription count when the stream is dropped.
struct OpenGuard(Arc<Inner>);

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.open.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Backend for FakeBackend {
    async fn capabilities(&self) -> Result<Capabilities, ClientError> {
        self.0.capabilities.clone().ok_or(ClientError::Status {
            status: 503,
            reason: Some("Service Unavailable".into()),
            message: None,
        })
    }

    async fn submit(&self, _kind: FlowKind, _file: &SelectedFile) -> Result<JobId, ClientError> {
        self.0.submits.fetch_add(1, Ordering::SeqCst);
        match &self.0.submit {
            SubmitScript::Accept(id) => Ok(JobId::new(*id)),
            SubmitScript::Reject {
                status,
                reason,
                message,
            } => Err(ClientError::Status {
                status: *status,
                reason: reason.map(str::to_string),
                message: message.map(str::to_string),
            }),
            SubmitScript::Transport => Err(ClientError::StreamClosed),
        }
    }

    async fn subscribe(&self, _kind: FlowKind, _job: &JobId) -> Result<ProgressStream, ClientError> {
        self.0.subscribed.fetch_add(1, Ordering::SeqCst);
        let now_open = self.0.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.0.max_open.fetch_max(now_open, Ordering::SeqCst);
        let guard = OpenGuard(self.0.clone());

        let mut finite = Vec::new();
        let mut hang = false;
        for item in self.0.items.clone() {
            match item {
                Item::Event(ev) => finite.push(Ok(ev)),
                Item::TransportError => finite.push(Err(ClientError::Config("reset".into()))),
                Item::Hang => {
                    hang = true;
                    break;
                }
            }
        }
        let tail = if hang {
            stream::pending().boxed()
        } else {
            stream::empty().boxed()
        };
        let events = stream::iter(finite).chain(tail).map(move |item| {
            let _held = &guard;
            item
        });
        Ok(Box::pin(events))
    }

    async fn download(&self, _kind: FlowKind, _job: &JobId, stem: Stem) -> Result<Download, ClientError> {
        let failing = match stem {
            Stem::Vocals => self.0.vocals_fail,
            Stem::Instrumental => self.0.instrumental_fail,
            Stem::Modified => false,
        };
        if failing {
            return Err(ClientError::Status {
                status: 500,
                reason: Some("Internal Server Error".into()),
                message: None,
            });
        }
        Ok(Download {
            bytes: format!("{}-bytes", stem.label()).into_bytes(),
            content_disposition: self.0.disposition.map(str::to_string),
        })
    }

    fn cancel(&self, _kind: FlowKind, job: &JobId) {
        self.0.cancels.lock().unwrap().push(job.clone());
    }
}

// ── Observer ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    progress: Mutex<Vec<u8>>,
    phases: Mutex<Vec<Phase>>,
    statuses: Mutex<Vec<Status>>,
    /// Notified on the first progress update at or above `trigger_at`.
    notify: Arc<Notify>,
    trigger_at: u8,
}

impl FlowObserver for Recorder {
    fn on_phase(&self, phase: &Phase) {
        self.phases.lock().unwrap().push(phase.clone());
    }

    fn on_progress(&self, percent: u8) {
        self.progress.lock().unwrap().push(percent);
        if self.trigger_at > 0 && percent >= self.trigger_at {
            self.notify.notify_one();
        }
    }

    fn on_status(&self, status: &Status) {
        self.statuses.lock().unwrap().push(status.clone());
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn audio_file(dir: &TempDir, name: &str) -> SelectedFile {
    let path = dir.path().join(name);
    std::fs::write(&path, b"fake audio").unwrap();
    SelectedFile::open(&path).unwrap()
}

fn flow_with(kind: FlowKind, backend: &FakeBackend, dir: &TempDir) -> Flow<FakeBackend> {
    let mut flow = Flow::new(kind, backend.clone());
    flow.pick(Some(audio_file(dir, "Take Five.mp3")));
    flow
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn convert_job_succeeds_with_full_progress() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend::builder()
        .disposition("attachment; filename=\"Take Five_modified.mp3\"")
        .build();
    let recorder = Arc::new(Recorder::default());
    let mut flow = flow_with(FlowKind::Convert, &backend, &dir);
    flow.set_observer(recorder.clone());

    flow.submit().await;

    assert_eq!(*flow.phase(), Phase::Succeeded);
    assert_eq!(flow.percent(), 100);
    assert_eq!(flow.results().len(), 1);
    assert_eq!(flow.results()[0].name, "Take Five_modified.mp3");
    assert_eq!(&*flow.results()[0].blob.bytes(), b"modified-bytes");
    let status = flow.status().unwrap();
    assert!(!status.is_error);
    assert_eq!(status.message, FlowKind::Convert.success_message());

    let progress = recorder.progress.lock().unwrap().clone();
    assert_eq!(&progress[..2], &[30, 70]);
    assert_eq!(progress.last(), Some(&100));
    assert_eq!(
        recorder.phases.lock().unwrap().clone(),
        vec![
            Phase::Submitting,
            Phase::Subscribed(JobId::new("abc")),
            Phase::Succeeded
        ]
    );

    assert_eq!(backend.open(), 0);
    assert!(backend.cancels().is_empty());
}

#[tokio::test]
async fn done_forces_progress_to_100() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend::builder().items(vec![pct(12), done()]).build();
    let mut flow = flow_with(FlowKind::Convert, &backend, &dir);

    flow.submit().await;

    assert_eq!(flow.percent(), 100);
    assert_eq!(*flow.phase(), Phase::Succeeded);
}

#[tokio::test]
async fn error_event_fails_with_server_message() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend::builder()
        .items(vec![pct(40), error("disk full"), pct(90)])
        .build();
    let mut flow = flow_with(FlowKind::Convert, &backend, &dir);

    flow.submit().await;

    assert_eq!(*flow.phase(), Phase::Failed);
    let status = flow.status().unwrap();
    assert!(status.is_error);
    assert_eq!(status.message, "disk full");
    assert!(flow.results().is_empty());
    assert_eq!(backend.open(), 0);
    assert_eq!(backend.cancels(), vec!["abc".to_string()]);
}

#[tokio::test]
async fn rejected_submission_never_subscribes() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend::builder()
        .submit(SubmitScript::Reject {
            status: 400,
            reason: Some("Bad Request"),
            message: Some("unsupported format"),
        })
        .build();
    let mut flow = flow_with(FlowKind::Convert, &backend, &dir);

    flow.submit().await;

    assert_eq!(*flow.phase(), Phase::Failed);
    assert_eq!(flow.status().unwrap().message, "unsupported format");
    assert_eq!(backend.subscribed(), 0);
    assert!(backend.cancels().is_empty());
}

#[tokio::test]
async fn rejected_submission_falls_back_to_status_text_then_generic() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend::builder()
        .submit(SubmitScript::Reject {
            status: 413,
            reason: Some("Payload Too Large"),
            message: None,
        })
        .build();
    let mut flow = flow_with(FlowKind::Separate, &backend, &dir);
    flow.submit().await;
    assert_eq!(flow.status().unwrap().message, "Payload Too Large");

    let backend = FakeBackend::builder()
        .submit(SubmitScript::Reject {
            status: 599,
            reason: None,
            message: None,
        })
        .build();
    let mut flow = flow_with(FlowKind::Separate, &backend, &dir);
    flow.submit().await;
    assert_eq!(flow.status().unwrap().message, "Separation failed");
}

#[tokio::test]
async fn unreachable_server_reports_generic_failure() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend::builder().submit(SubmitScript::Transport).build();
    let mut flow = flow_with(FlowKind::Convert, &backend, &dir);

    flow.submit().await;

    assert_eq!(flow.status().unwrap().message, SOMETHING_WENT_WRONG);
    assert_eq!(backend.subscribed(), 0);
}

#[tokio::test]
async fn stream_ending_early_is_connection_lost() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend::builder().items(vec![pct(20)]).build();
    let mut flow = flow_with(FlowKind::Convert, &backend, &dir);

    flow.submit().await;

    assert_eq!(*flow.phase(), Phase::Failed);
    assert_eq!(flow.status().unwrap().message, CONNECTION_LOST);
    assert_eq!(backend.open(), 0);
}

#[tokio::test]
async fn transport_error_is_connection_lost() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend::builder()
        .items(vec![pct(20), Item::TransportError, done()])
        .build();
    let mut flow = flow_with(FlowKind::Separate, &backend, &dir);

    flow.submit().await;

    assert_eq!(flow.status().unwrap().message, CONNECTION_LOST);
    assert!(flow.results().is_empty());
}

#[tokio::test]
async fn cancel_mid_subscription_returns_to_idle_silently() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend::builder().items(vec![pct(10), Item::Hang]).build();
    let recorder = Arc::new(Recorder {
        trigger_at: 10,
        ..Default::default()
    });
    let mut flow = flow_with(FlowKind::Convert, &backend, &dir);
    flow.set_observer(recorder.clone());

    let notify = recorder.notify.clone();
    flow.submit_until(async move { notify.notified().await }).await;

    assert_eq!(*flow.phase(), Phase::Idle);
    assert!(flow.status().is_none());
    assert!(recorder.statuses.lock().unwrap().is_empty());
    assert_eq!(flow.percent(), 0);
    assert!(flow.results().is_empty());
    assert!(flow.file().is_some());
    assert_eq!(backend.open(), 0);
    assert_eq!(backend.cancels(), vec!["abc".to_string()]);
}

#[tokio::test]
async fn separate_fetches_both_stems() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend::builder().build();
    let mut flow = flow_with(FlowKind::Separate, &backend, &dir);

    flow.submit().await;

    assert_eq!(*flow.phase(), Phase::Succeeded);
    let names: Vec<&str> = flow.results().iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["Take Five_vocals.mp3", "Take Five_instrumental.mp3"]);
    assert_eq!(&*flow.results()[1].blob.bytes(), b"instrumental-bytes");
    assert_eq!(
        flow.status().unwrap().message,
        "Vocals and instrumental are ready."
    );
}

#[tokio::test]
async fn separate_fails_when_one_stem_fails() {
    let dir = tempfile::tempdir().unwrap();
    let blobs = BlobStore::new();
    let backend = FakeBackend::builder().fail_instrumental().build();
    let mut flow = Flow::new(FlowKind::Separate, backend.clone()).with_blob_store(blobs.clone());
    flow.pick(Some(audio_file(&dir, "mix.wav")));

    flow.submit().await;

    assert_eq!(*flow.phase(), Phase::Failed);
    assert_eq!(flow.status().unwrap().message, DOWNLOAD_FAILED);
    assert!(flow.results().is_empty());
    assert_eq!(blobs.live(), 0);
    assert_eq!(backend.cancels(), vec!["abc".to_string()]);
}

#[tokio::test]
async fn repeated_jobs_release_earlier_results() {
    let dir = tempfile::tempdir().unwrap();
    let blobs = BlobStore::new();
    let backend = FakeBackend::builder().build();
    let mut flow = Flow::new(FlowKind::Separate, backend.clone()).with_blob_store(blobs.clone());
    flow.pick(Some(audio_file(&dir, "mix.wav")));

    for _ in 0..3 {
        flow.submit().await;
        assert_eq!(*flow.phase(), Phase::Succeeded);
        assert_eq!(blobs.live(), 2);
    }
    assert_eq!(backend.subscribed(), 3);
    assert_eq!(backend.max_open(), 1);

    flow.reset();
    assert_eq!(blobs.live(), 0);
    assert!(flow.file().is_none());
    assert!(!flow.can_reset());
    assert_eq!(*flow.phase(), Phase::Idle);
}

#[tokio::test]
async fn picking_a_file_clears_the_previous_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let blobs = BlobStore::new();
    let backend = FakeBackend::builder().build();
    let mut flow = Flow::new(FlowKind::Convert, backend.clone()).with_blob_store(blobs.clone());
    flow.pick(Some(audio_file(&dir, "a.mp3")));
    flow.submit().await;
    assert_eq!(blobs.live(), 1);

    flow.pick(None);
    assert_eq!(blobs.live(), 1, "an empty pick is a no-op");

    flow.pick(Some(audio_file(&dir, "b.mp3")));
    assert_eq!(blobs.live(), 0);
    assert!(flow.status().is_none());
    assert_eq!(flow.percent(), 0);
    assert_eq!(flow.file().unwrap().name(), "b.mp3");
}

#[tokio::test]
async fn submit_without_file_does_nothing() {
    let backend = FakeBackend::builder().build();
    let mut flow = Flow::new(FlowKind::Convert, backend.clone());

    flow.submit().await;

    assert_eq!(*flow.phase(), Phase::Idle);
    assert_eq!(backend.submits(), 0);
}

#[tokio::test]
async fn cancel_outside_a_job_keeps_results() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend::builder().build();
    let mut flow = flow_with(FlowKind::Convert, &backend, &dir);
    flow.submit().await;

    flow.cancel();

    assert_eq!(*flow.phase(), Phase::Succeeded);
    assert_eq!(flow.results().len(), 1);
    assert!(backend.cancels().is_empty());
}

#[tokio::test]
async fn dropping_an_active_flow_notifies_the_backend() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend::builder().items(vec![pct(5), Item::Hang]).build();
    let mut flow = flow_with(FlowKind::Convert, &backend, &dir);

    let timed_out = tokio::time::timeout(Duration::from_millis(50), flow.submit())
        .await
        .is_err();
    assert!(timed_out);
    assert!(flow.is_busy());
    assert_eq!(backend.open(), 0, "dropping the job future closes the stream");

    drop(flow);
    assert_eq!(backend.cancels(), vec!["abc".to_string()]);
}

#[tokio::test]
async fn resubmitting_after_an_abandoned_job_cancels_it_first() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend::builder().items(vec![Item::Hang]).build();
    let mut flow = flow_with(FlowKind::Convert, &backend, &dir);

    let _ = tokio::time::timeout(Duration::from_millis(20), flow.submit()).await;
    let _ = tokio::time::timeout(Duration::from_millis(20), flow.submit()).await;

    assert_eq!(backend.cancels(), vec!["abc".to_string()]);
    assert_eq!(backend.max_open(), 1);
}

#[tokio::test]
async fn capability_loader_falls_back_to_defaults() {
    let unavailable = FakeBackend::builder().build();
    assert_eq!(flow::load_capabilities(&unavailable).await, Capabilities::default());

    let custom = Capabilities {
        max_upload_mb: 20,
        allowed_extensions: vec![".wav".into()],
        download_suffix: Some("_new.mp3".into()),
    };
    let available = FakeBackend::builder().capabilities(custom.clone()).build();
    let mut flow = Flow::new(FlowKind::Convert, available);
    flow.load_capabilities().await;
    assert_eq!(flow.capabilities(), &custom);
}

#[tokio::test]
async fn fallback_name_uses_download_suffix_from_capabilities() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend::builder().build();
    let caps = Capabilities {
        download_suffix: Some("_fresh.mp3".into()),
        ..Capabilities::default()
    };
    let mut flow = Flow::new(FlowKind::Convert, backend).with_capabilities(caps);
    flow.pick(Some(audio_file(&dir, "demo.flac")));

    flow.submit().await;

    assert_eq!(flow.results()[0].name, "demo_fresh.mp3");
}
