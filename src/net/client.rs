//! HTTP client for the remote issue submission endpoint.
//!
//! One call is one delivery attempt: the client performs the multipart
//! POST, classifies the outcome into the retry taxonomy, and nothing
//! more. Requeueing and retries belong to the reconciler.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::domain::Submission;

/// Outcome classification for one delivery attempt
#[derive(Debug, Error)]
pub enum SubmitError {
    /// Transient transport failure (includes timeouts); requeue and retry
    #[error("network error: {0}")]
    Network(String),

    /// Payload permanently rejected; drop the entry and tell the user
    #[error("submission rejected: {0}")]
    Validation(String),

    /// Ambiguous server-side outcome; retried conservatively
    #[error("server error (status {0})")]
    Server(u16),

    /// Credential rejected; retry-worthy once re-auth has happened
    #[error("authentication rejected")]
    Auth,
}

impl SubmitError {
    /// Whether the reconciler should requeue the entry for a later flush
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SubmitError::Validation(_))
    }
}

/// Successful receipt confirmation from the remote service
#[derive(Debug, Clone)]
pub struct Ack {
    pub message: String,
}

/// One-shot delivery of a submission to the remote service
#[async_trait]
pub trait SubmitClient: Send + Sync {
    async fn send(&self, submission: &Submission) -> Result<Ack, SubmitError>;
}

/// Supplies the bearer credential per call.
///
/// Token acquisition and renewal live outside this crate; a missing or
/// stale credential surfaces as [`SubmitError::Auth`].
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, SubmitError>;
}

/// Fixed token, mainly for tests and one-off CLI calls
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String, SubmitError> {
        Ok(self.0.clone())
    }
}

/// Token from `MEDRELAY_TOKEN` or the `access_token` file in the app home
pub struct StoredToken;

#[async_trait]
impl TokenProvider for StoredToken {
    async fn access_token(&self) -> Result<String, SubmitError> {
        if let Ok(token) = std::env::var("MEDRELAY_TOKEN") {
            if !token.trim().is_empty() {
                return Ok(token.trim().to_string());
            }
        }

        let path = crate::config::token_path().map_err(|_| SubmitError::Auth)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
            _ => Err(SubmitError::Auth),
        }
    }
}

/// Body shape the issues endpoint uses for both acks and errors
#[derive(Debug, Deserialize)]
struct IssueResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// reqwest-backed submission client
pub struct HttpSubmitClient {
    base_url: String,
    client: reqwest::Client,
    token: Arc<dyn TokenProvider>,
}

impl HttpSubmitClient {
    /// Create a client with the given request timeout.
    ///
    /// An exceeded timeout surfaces as [`SubmitError::Network`].
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        token: Arc<dyn TokenProvider>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into(),
            client,
            token,
        })
    }

    /// Build the submit endpoint URL
    fn issue_url(&self) -> String {
        format!("{}/issue", self.base_url.trim_end_matches('/'))
    }

    /// Assemble the multipart form: text, locale hint, audio attachment
    async fn build_form(&self, submission: &Submission) -> Result<Form, SubmitError> {
        let mut form = Form::new();

        if let Some(text) = &submission.text {
            form = form.text("text", text.clone());
        }
        if let Some(code) = &submission.language_code {
            form = form.text("language_code", code.clone());
        }

        if let Some(audio_path) = &submission.audio_ref {
            let bytes = tokio::fs::read(audio_path).await.map_err(|e| {
                // An unreadable artifact can never succeed later
                SubmitError::Validation(format!(
                    "audio file unreadable: {}: {}",
                    audio_path.display(),
                    e
                ))
            })?;

            let file_name = audio_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "audio.wav".to_string());

            let part = Part::bytes(bytes)
                .file_name(file_name)
                .mime_str(audio_mime(audio_path))
                .map_err(|e| SubmitError::Validation(e.to_string()))?;
            form = form.part("audio", part);
        }

        Ok(form)
    }
}

#[async_trait]
impl SubmitClient for HttpSubmitClient {
    async fn send(&self, submission: &Submission) -> Result<Ack, SubmitError> {
        let token = self.token.access_token().await?;
        let form = self.build_form(submission).await?;

        let response = self
            .client
            .post(self.issue_url())
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| SubmitError::Network(e.to_string()))?;

        let status = response.status();
        let body: Option<IssueResponse> = response.json().await.ok();

        if status.is_success() {
            let message = body
                .and_then(|b| b.message)
                .unwrap_or_else(|| "submitted".to_string());
            tracing::debug!(id = %submission.id, "submission acknowledged");
            return Ok(Ack { message });
        }

        let detail = body.and_then(|b| b.error);
        Err(classify_status(status, detail))
    }
}

/// Map a non-success HTTP status onto the retry taxonomy
fn classify_status(status: StatusCode, detail: Option<String>) -> SubmitError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SubmitError::Auth,
        s if s.is_server_error() => SubmitError::Server(s.as_u16()),
        s => SubmitError::Validation(detail.unwrap_or_else(|| format!("HTTP {}", s.as_u16()))),
    }
}

/// Content type for the audio part, by file extension
fn audio_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("wav") => "audio/wav",
        Some("m4a") | Some("mp4") => "audio/mp4",
        Some("mp3") => "audio/mpeg",
        Some("ogg") => "audio/ogg",
        _ => "application/octet-stream",
    }
}
