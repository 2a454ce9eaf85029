// crates/client/src/client.rs
//! Thin reqwest wrapper over the host's `/api` surface.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chatshell_core::api::{ErrorResponse, JobStatus, SubmitRequest, SubmitResponse, UploadResponse};
use chatshell_core::JobId;
use futures_util::StreamExt;
use reqwest::{header, Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use crate::error::ClientError;
use crate::retry::RetryPolicy;

pub const DEFAULT_SERVER: &str = "http://127.0.0.1:47900";

/// Subset of `GET /api/health` the client cares about.
#[derive(Debug, Clone, Deserialize)]
pub struct Health {
    pub status: String,
    pub version: String,
    #[serde(default)]
    pub active_job: Option<String>,
}

#[derive(Clone)]
pub struct HostClient {
    http: Client,
    base_url: String,
}

impl HostClient {
    pub fn new() -> Result<Self, ClientError> {
        Self::with_base_url(DEFAULT_SERVER)
    }

    /// Point at another host (tests, non-default ports).
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, ClientError> {
        // No overall timeout: artifact transfers may take minutes.
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    pub async fn health(&self) -> Result<Health, ClientError> {
        let response = self.http.get(self.url("/health")).send().await?;
        decode(response).await
    }

    /// Poll `/health` until the host answers, following `policy`.
    pub async fn wait_ready(&self, policy: &RetryPolicy) -> Result<Health, ClientError> {
        policy
            .run(|| self.health())
            .await
            .map_err(|(attempts, e)| {
                tracing::debug!(error = %e, "Host never became ready");
                ClientError::HostUnavailable { attempts }
            })
    }

    pub async fn submit(&self, request: &SubmitRequest) -> Result<JobId, ClientError> {
        let response = self.http.post(self.url("/jobs")).json(request).send().await?;
        let body: SubmitResponse = decode(response).await?;
        Ok(body.job_id)
    }

    pub async fn status(&self, id: &str) -> Result<JobStatus, ClientError> {
        let response = self.http.get(self.url(&format!("/jobs/{id}"))).send().await?;
        decode(response).await
    }

    pub async fn list(&self) -> Result<Vec<JobStatus>, ClientError> {
        let response = self.http.get(self.url("/jobs")).send().await?;
        decode(response).await
    }

    pub async fn cancel(&self, id: &str) -> Result<(), ClientError> {
        let response = self
            .http
            .post(self.url(&format!("/jobs/{id}/cancel")))
            .send()
            .await?;
        check(response).await.map(drop)
    }

    pub async fn cleanup(&self, id: &str) -> Result<(), ClientError> {
        let response = self
            .http
            .post(self.url(&format!("/jobs/{id}/cleanup")))
            .send()
            .await?;
        check(response).await.map(drop)
    }

    /// Stream a completed export to `dest`.
    ///
    /// A directory `dest` receives the host's suggested file name. The body
    /// lands in `<file>.partial` first, so an interrupted transfer never
    /// leaves a truncated archive under the final name.
    pub async fn download_artifact(&self, id: &str, dest: &Path) -> Result<PathBuf, ClientError> {
        let response = self
            .http
            .get(self.url(&format!("/jobs/{id}/artifact")))
            .send()
            .await?;
        let response = check(response).await?;

        let target = if dest.is_dir() {
            let name = attachment_name(&response).unwrap_or_else(|| format!("{id}.chatshell.gz"));
            dest.join(name)
        } else {
            dest.to_path_buf()
        };
        let partial = partial_path(&target);

        let result = write_body(response, &partial, &target).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&partial).await;
        }
        result.map(|()| target)
    }

    /// Send a local archive to the host; returns the id for an import.
    pub async fn upload(&self, archive: &Path) -> Result<UploadResponse, ClientError> {
        let file = tokio::fs::File::open(archive)
            .await
            .map_err(|e| ClientError::io(archive, e))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| ClientError::io(archive, e))?
            .len();
        let response = self
            .http
            .post(self.url("/uploads"))
            .header(header::CONTENT_TYPE, "application/gzip")
            .header(header::CONTENT_LENGTH, len)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await?;
        decode(response).await
    }
}

async fn write_body(response: Response, partial: &Path, target: &Path) -> Result<(), ClientError> {
    let mut file = tokio::fs::File::create(partial)
        .await
        .map_err(|e| ClientError::io(partial, e))?;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        file.write_all(&chunk?)
            .await
            .map_err(|e| ClientError::io(partial, e))?;
    }
    file.sync_all().await.map_err(|e| ClientError::io(partial, e))?;
    tokio::fs::rename(partial, target)
        .await
        .map_err(|e| ClientError::io(target, e))
}

/// Turn a non-success response into `ClientError::Api`.
async fn check(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(ClientError::Api {
        status: status.as_u16(),
        message: error_message(&text, status.canonical_reason()),
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let response = check(response).await?;
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(e.to_string()))
}

/// `"error: details"` from the host's error body, or the raw text.
fn error_message(body: &str, reason: Option<&str>) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(ErrorResponse {
            error,
            details: Some(details),
        }) => format!("{error}: {details}"),
        Ok(ErrorResponse { error, details: None }) => error,
        Err(_) if !body.trim().is_empty() => body.trim().to_string(),
        Err(_) => reason.unwrap_or("unknown error").to_string(),
    }
}

fn attachment_name(response: &Response) -> Option<String> {
    let value = response
        .headers()
        .get(header::CONTENT_DISPOSITION)?
        .to_str()
        .ok()?;
    let name = value.split("filename=").nth(1)?.trim().trim_matches('"');
    // Only a bare file name; never let the host pick a directory.
    let name = Path::new(name).file_name()?.to_str()?;
    (!name.is_empty()).then(|| name.to_string())
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(".partial");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_from_error_body() {
        let body = r#"{"error":"Bad request","details":"import requires a source"}"#;
        assert_eq!(
            error_message(body, Some("Bad Request")),
            "Bad request: import requires a source"
        );
        assert_eq!(error_message(r#"{"error":"Nope"}"#, None), "Nope");
    }

    #[test]
    fn test_error_message_falls_back_to_text_then_reason() {
        assert_eq!(error_message("  gateway down \n", None), "gateway down");
        assert_eq!(error_message("", Some("Bad Gateway")), "Bad Gateway");
        assert_eq!(error_message("", None), "unknown error");
    }

    #[test]
    fn test_partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/tmp/a.chatshell.gz")),
            PathBuf::from("/tmp/a.chatshell.gz.partial")
        );
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let client = HostClient::with_base_url("http://localhost:1/").unwrap();
        assert_eq!(client.url("/jobs"), "http://localhost:1/api/jobs");
    }
}
