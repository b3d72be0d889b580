use crate::config::Config;
use crate::retry::{with_retry_if, RetryConfig};
use anyhow::{Context, Result};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;
use tracing::debug;

/// One remote file record. Snapshot data; the remote platform is the source
/// of truth for existence.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProjectFile {
    pub id: u64,
    pub name: String,
}

/// One translatable entry of a remote file. `key` addresses a position in
/// the source document as `->`-delimited segments; `stage` 0 means
/// untranslated/machine, anything above means reviewed or finalized.
///
/// Fields this tool does not interpret (entry id, context, ...) are carried
/// through `extra` so resubmitted batches round-trip them unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationEntry {
    pub key: String,
    pub original: String,
    #[serde(default)]
    pub translation: Option<String>,
    #[serde(default)]
    pub stage: i64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct CreatedEnvelope {
    file: CreatedFile,
}

#[derive(Debug, Deserialize)]
struct CreatedFile {
    id: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("remote API error ({status}): {body}")]
    Status { status: StatusCode, body: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ApiError {
    /// Retry 429 (rate limit), 5xx, and network failures; other 4xx errors
    /// fail immediately.
    fn is_retryable(&self) -> bool {
        match self {
            ApiError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            ApiError::Transport(_) => true,
        }
    }
}

/// Authenticated client for the remote translation platform.
///
/// Owns the global admission gate: a counting semaphore sized to the
/// configured concurrency bound, acquired for the full duration of every
/// outbound call. Any number of logical units may be alive; only this many
/// remote calls are ever outstanding at once. Credentials rotate round-robin
/// across the configured token list.
#[derive(Debug)]
pub struct RemoteClient {
    http: reqwest::Client,
    api_base: String,
    project_id: u64,
    tokens: Vec<String>,
    next_token: AtomicUsize,
    gate: Semaphore,
    retry: RetryConfig,
}

impl RemoteClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: config.api_base.clone(),
            project_id: config.project_id,
            tokens: config.tokens.clone(),
            next_token: AtomicUsize::new(0),
            gate: Semaphore::new(config.max_concurrency),
            retry: RetryConfig::api_call(),
        }
    }

    /// Override the transport retry policy (tests use short delays).
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn token(&self) -> &str {
        let i = self.next_token.fetch_add(1, Ordering::Relaxed);
        &self.tokens[i % self.tokens.len()]
    }

    fn url(&self, path: &str) -> String {
        format!("{}/projects/{}/{}", self.api_base, self.project_id, path)
    }

    /// Run one request under the admission gate, retrying transient
    /// failures. `build` constructs a fresh request per attempt. Returns the
    /// response body on success.
    async fn execute<F>(&self, name: &str, build: F) -> Result<String, ApiError>
    where
        F: Fn() -> Result<reqwest::RequestBuilder, reqwest::Error>,
    {
        let _permit = self
            .gate
            .acquire()
            .await
            .expect("admission gate is never closed");

        with_retry_if(
            &self.retry,
            name,
            || async {
                let response = build()?
                    .header("Authorization", self.token())
                    .send()
                    .await?;

                let status = response.status();
                let body = response.text().await;
                if !status.is_success() {
                    let body =
                        body.unwrap_or_else(|e| format!("<failed to read body: {}>", e));
                    return Err(ApiError::Status { status, body });
                }
                Ok(body?)
            },
            ApiError::is_retryable,
        )
        .await
    }

    /// List the project's remote file records.
    pub async fn list_files(&self) -> Result<Vec<ProjectFile>> {
        let url = self.url("files");
        let body = self
            .execute("List project files", || Ok(self.http.get(&url)))
            .await
            .context("Failed to list project files")?;

        serde_json::from_str(&body).context("Failed to parse project file listing")
    }

    /// Fetch one file's translation entries. An empty response body reads as
    /// no entries.
    pub async fn file_translations(&self, file_id: u64) -> Result<Vec<TranslationEntry>> {
        let url = self.url(&format!("files/{}/translation", file_id));
        let body = self
            .execute("Fetch translations", || Ok(self.http.get(&url)))
            .await
            .with_context(|| format!("Failed to fetch translations for file {}", file_id))?;

        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse translations for file {}", file_id))
    }

    /// Submit a batch of translation entries for one file as a single write.
    pub async fn upload_translations(
        &self,
        file_id: u64,
        file_name: &str,
        entries: &[TranslationEntry],
    ) -> Result<()> {
        let url = self.url(&format!("files/{}/translation", file_id));
        let payload = serde_json::to_vec(entries).context("Failed to serialize entry batch")?;

        debug!(
            "Submitting {} entries for file {} ({})",
            entries.len(),
            file_id,
            file_name
        );
        self.execute("Upload translations", || {
            let form = Form::new().part(
                "file",
                Part::bytes(payload.clone())
                    .file_name(file_name.to_string())
                    .mime_str("application/json")?,
            );
            Ok(self.http.post(&url).multipart(form))
        })
        .await
        .with_context(|| format!("Failed to upload translations for file {}", file_id))?;
        Ok(())
    }

    /// Create a new remote file record under `folder`; returns its id.
    pub async fn create_file(
        &self,
        folder: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<u64> {
        let url = self.url("files");
        let body = self
            .execute("Create file", || {
                let form = Form::new().text("path", folder.to_string()).part(
                    "file",
                    Part::bytes(bytes.clone())
                        .file_name(file_name.to_string())
                        .mime_str("application/json")?,
                );
                Ok(self.http.post(&url).multipart(form))
            })
            .await
            .with_context(|| format!("Failed to create remote file {}", file_name))?;

        let created: CreatedEnvelope = serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse create response for {}", file_name))?;
        Ok(created.file.id)
    }

    /// Replace an existing remote file record's content.
    pub async fn update_file(&self, file_id: u64, file_name: &str, bytes: Vec<u8>) -> Result<()> {
        let url = self.url(&format!("files/{}", file_id));
        self.execute("Update file", || {
            let form = Form::new().part(
                "file",
                Part::bytes(bytes.clone())
                    .file_name(file_name.to_string())
                    .mime_str("application/json")?,
            );
            Ok(self.http.post(&url).multipart(form))
        })
        .await
        .with_context(|| format!("Failed to update remote file {}", file_id))?;
        Ok(())
    }

    /// Delete a remote file record by id.
    pub async fn delete_file(&self, file_id: u64) -> Result<()> {
        let url = self.url(&format!("files/{}", file_id));
        self.execute("Delete file", || Ok(self.http.delete(&url)))
            .await
            .with_context(|| format!("Failed to delete remote file {}", file_id))?;
        Ok(())
    }
}
