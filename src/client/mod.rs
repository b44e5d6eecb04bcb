//! HTTP client for the relay server, including the incremental reader of the
//! streaming endpoint.

pub mod sse;

use std::time::Duration;

use futures_util::TryStreamExt;
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use thiserror::Error;
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::errors::Problem;
use crate::models::{ChatContext, ChatMessage};
use crate::routes::USER_ID_HEADER;
use crate::client::sse::{SseDecoder, Signal};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid base URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Response status code does not indicate success: {status}")]
    Status { status: StatusCode, problem: Option<Problem> },

    #[error("Failed to read the event stream: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode a stream frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Stream failed: {0}")]
    Stream(Problem),

    #[error("Stream ended without the [DONE] marker")]
    Truncated,

    #[error("Stream cancelled")]
    Cancelled,
}

/// Reader-side settings of a streamed reply.
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    /// Delay after each frame, to smooth out rendering. Zero reads as fast as possible.
    pub pacing: Duration,
}

impl StreamOptions {
    pub fn paced(pacing: Duration) -> Self {
        Self { pacing }
    }
}

#[derive(Clone)]
pub struct RelayClient {
    http: reqwest::Client,
    base_url: Url,
    user_id: Option<String>,
}

impl RelayClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&normalized).map_err(|e| ClientError::InvalidUrl {
            url: base_url.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self { http: reqwest::Client::new(), base_url, user_id: None })
    }

    /// Identifies the caller to the server; without it topics go to the anonymous bucket.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ClientError> {
        let url = self.base_url.join(path).map_err(|e| ClientError::InvalidUrl {
            url: format!("{}{path}", self.base_url),
            message: e.to_string(),
        })?;
        let request = self.http.request(method, url);
        Ok(match &self.user_id {
            Some(user_id) => request.header(USER_ID_HEADER, user_id),
            None => request,
        })
    }

    async fn check(response: Response) -> Result<Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let problem = response.json::<Problem>().await.ok();
        warn!("Server answered {status}: {problem:?}");
        Err(ClientError::Status { status, problem })
    }

    // ── Topics ────────────────────────────────────────────────────────────────

    /// The caller's topics, most recently updated first.
    pub async fn get_topics(&self) -> Result<Vec<ChatContext>, ClientError> {
        let response = self.request(Method::GET, "topics")?.send().await?;
        let mut topics: Vec<ChatContext> = Self::check(response).await?.json().await?;
        topics.sort_by(|a, b| b.updated_date_time.cmp(&a.updated_date_time));
        Ok(topics)
    }

    pub async fn save_topic(&self, topic: &ChatContext) -> Result<(), ClientError> {
        let response = self.request(Method::POST, "topics")?.json(topic).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn delete_topic(&self, topic: &ChatContext) -> Result<(), ClientError> {
        let response = self.request(Method::DELETE, "topics")?.json(topic).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    // ── Completions ───────────────────────────────────────────────────────────

    pub async fn post(&self, messages: &[ChatMessage]) -> Result<ChatMessage, ClientError> {
        let response = self.request(Method::POST, "openaimodel")?.json(messages).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Streams a reply and folds it into one message.
    ///
    /// `on_fragment` receives the message accumulated so far and the text of the
    /// frame that was just read. It is called for every frame with text or
    /// metadata, in arrival order. The returned message is the final fold.
    ///
    /// The stream counts as failed unless it ends with the `[DONE]` marker.
    /// Cancelling `cancel` stops the read between frames and no further
    /// callbacks are made.
    pub async fn post_streaming<F>(
        &self,
        messages: &[ChatMessage],
        options: &StreamOptions,
        cancel: &CancellationToken,
        mut on_fragment: F,
    ) -> Result<ChatMessage, ClientError>
    where
        F: FnMut(&ChatMessage, &str),
    {
        let request = self.request(Method::POST, "openaimodel/streaming")?.json(messages);
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            response = request.send() => response.map_err(|e| {
                error!("An error occurred while sending the HTTP request: {e}");
                e
            })?,
        };
        let response = Self::check(response).await?;

        let body = response.bytes_stream().map_err(std::io::Error::other);
        let mut lines = StreamReader::new(Box::pin(body)).lines();
        let mut decoder = SseDecoder::default();
        let mut message = ChatMessage::default();

        loop {
            let line = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Stream cancelled by caller");
                    return Err(ClientError::Cancelled);
                }
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                warn!("Stream ended without the [DONE] marker");
                return Err(ClientError::Truncated);
            };

            match decoder.decode(&line)? {
                None => continue,
                Some(Signal::Done) => return Ok(message),
                Some(Signal::Failed(problem)) => {
                    error!("Server reported a stream failure: {problem}");
                    return Err(ClientError::Stream(problem));
                }
                Some(Signal::Frame(frame)) => {
                    message = message.absorb(&frame);
                    if frame.is_signal() {
                        on_fragment(&message, frame.content.as_deref().unwrap_or_default());
                    }
                }
            }

            if !options.pacing.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                    _ = tokio::time::sleep(options.pacing) => {}
                }
            }
        }
    }
}
