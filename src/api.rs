// API client module: a small async HTTP client for the audio job service.
// It implements `Backend`, so the job client in `flow` never touches
// reqwest directly.

use crate::backend::{Backend, Download, ProgressStream};
use crate::config::Settings;
use crate::error::ClientError;
use crate::model::{Capabilities, FlowKind, JobId, Stem};
use crate::picker::SelectedFile;
use crate::sse;
use reqwest::header::{ACCEPT, CONTENT_DISPOSITION};
use reqwest::multipart;
use reqwest::{Client, Response};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

/// Holds a reqwest client and the base URL of the service.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

/// Body of an accepted submission.
#[derive(Deserialize, Debug)]
struct SubmitResponse {
    job_id: JobId,
}

/// Body the service sends with error statuses.
#[derive(Deserialize, Debug, Default)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

impl ApiClient {
    /// Build a client for `base_url` (scheme and host, optional path prefix).
    pub fn new(base_url: impl Into<String>, connect_timeout: Duration) -> Result<Self, ClientError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("copyrem-cli/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Self::with_client(base_url, client)
    }

    /// Use an already configured reqwest client.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Result<Self, ClientError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ClientError::Config(format!(
                "server URL must start with http:// or https://, got '{base_url}'"
            )));
        }
        Ok(ApiClient { client, base_url })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ClientError> {
        Self::new(
            settings.server_url.clone(),
            Duration::from_secs(settings.connect_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn download_path(kind: FlowKind, job: &JobId, stem: Stem) -> String {
        match stem.path_segment() {
            Some(segment) => format!("{}/download/{}/{}", kind.route(), job, segment),
            None => format!("{}/download/{}", kind.route(), job),
        }
    }

    /// Pass success responses through; turn everything else into
    /// `ClientError::Status`, keeping the `error` field of a JSON body.
    async fn check(res: Response) -> Result<Response, ClientError> {
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let body = res.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .unwrap_or_default()
            .error;
        Err(ClientError::Status {
            status: status.as_u16(),
            reason: status.canonical_reason().map(str::to_string),
            message,
        })
    }
}

impl Backend for ApiClient {
    async fn capabilities(&self) -> Result<Capabilities, ClientError> {
        let res = self.client.get(self.url("api/info")).send().await?;
        let res = Self::check(res).await?;
        let body = res.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn submit(&self, kind: FlowKind, file: &SelectedFile) -> Result<JobId, ClientError> {
        let data = tokio::fs::read(file.path())
            .await
            .map_err(|source| ClientError::Io {
                path: file.path().to_path_buf(),
                source,
            })?;
        let part = multipart::Part::bytes(data)
            .file_name(file.name().to_string())
            .mime_str(file.mime())?;
        let form = multipart::Form::new().part("file", part);

        info!("Uploading {} ({} bytes) to /{}", file.name(), file.size(), kind.route());
        let res = self
            .client
            .post(self.url(kind.route()))
            .multipart(form)
            .send()
            .await?;
        let res = Self::check(res).await?;
        let body = res.bytes().await?;
        let accepted: SubmitResponse = serde_json::from_slice(&body)?;
        debug!("Job {} accepted", accepted.job_id);
        Ok(accepted.job_id)
    }

    async fn subscribe(&self, kind: FlowKind, job: &JobId) -> Result<ProgressStream, ClientError> {
        let url = self.url(&format!("{}/progress/{}", kind.route(), job));
        let res = self
            .client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let res = Self::check(res).await?;
        debug!("Subscribed to progress of job {}", job);
        Ok(sse::progress_events(res.bytes_stream()))
    }

    async fn download(&self, kind: FlowKind, job: &JobId, stem: Stem) -> Result<Download, ClientError> {
        let url = self.url(&Self::download_path(kind, job, stem));
        let res = self.client.get(url).send().await?;
        let res = Self::check(res).await?;
        let content_disposition = res
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = res.bytes().await?.to_vec();
        debug!("Fetched {} result of job {} ({} bytes)", stem.label(), job, bytes.len());
        Ok(Download {
            bytes,
            content_disposition,
        })
    }

    fn cancel(&self, kind: FlowKind, job: &JobId) {
        let request = self
            .client
            .post(self.url(&format!("{}/cancel/{}", kind.route(), job)));
        let job = job.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = request.send().await {
                        debug!("Cancel notice for job {} not delivered: {}", job, e);
                    }
                });
            }
            Err(_) => debug!("No runtime available; cancel notice for job {} skipped", job),
        }
    }
}
