// The seam between the job client and the service it drives. The HTTP
// implementation lives in `api`; tests plug in their own.

use crate::error::ClientError;
use crate::model::{Capabilities, FlowKind, JobId, ProgressEvent, Stem};
use crate::picker::SelectedFile;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;

/// Live progress subscription for one job. Dropping it closes the
/// subscription.
pub type ProgressStream = Pin<Box<dyn Stream<Item = Result<ProgressEvent, ClientError>> + Send>>;

/// A fetched result body and the `Content-Disposition` header it came with.
#[derive(Debug, Clone, Default)]
pub struct Download {
    pub bytes: Vec<u8>,
    pub content_disposition: Option<String>,
}

/// Operations the job client needs from the backend.
pub trait Backend {
    /// Server-declared limits and naming.
    fn capabilities(&self) -> impl Future<Output = Result<Capabilities, ClientError>>;

    /// Upload `file` and return the id of the job created for it.
    fn submit(
        &self,
        kind: FlowKind,
        file: &SelectedFile,
    ) -> impl Future<Output = Result<JobId, ClientError>>;

    /// Open the progress stream of `job`.
    fn subscribe(
        &self,
        kind: FlowKind,
        job: &JobId,
    ) -> impl Future<Output = Result<ProgressStream, ClientError>>;

    /// Fetch one result file of a finished job.
    fn download(
        &self,
        kind: FlowKind,
        job: &JobId,
        stem: Stem,
    ) -> impl Future<Output = Result<Download, ClientError>>;

    /// Ask the backend to abandon `job`. Must not block and must not
    /// report failure: the request is advisory.
    fn cancel(&self, kind: FlowKind, job: &JobId);
}
