//! Documents API client
//!
//! Talks to the backend's document endpoints:
//! - `GET /api/v1/documents/?limit=&offset=`: document list
//! - `GET /api/v1/documents/{id}`: single document (when the backend has it)
//! - `GET /api/v1/documents/stream/{id}`: processing status as an event stream
//!
//! Implements both stream client seams, so one instance can back a
//! [`JobStatusStreamClient`](crate::stream::JobStatusStreamClient).

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::ApiConfig;
use crate::models::{DocumentListResponse, StatusUpdate};
use crate::sse::SseDecoder;
use crate::stream::{FrameStream, StatusChannel, StatusQuery};
use crate::types::{AppError, AppResult};

const DOCUMENTS_PATH: &[&str] = &["api", "v1", "documents"];

/// The backend caps list pages at this size
pub const MAX_LIST_LIMIT: u32 = 100;

/// How the out-of-band status re-check finds a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusLookup {
    /// Scan the document list; a job missing from it is treated as removed
    #[default]
    List,
    /// Fetch the single document; 404 means removed
    Single,
}

impl std::str::FromStr for StatusLookup {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "list" => Ok(StatusLookup::List),
            "single" => Ok(StatusLookup::Single),
            other => Err(AppError::Config(format!(
                "unknown status lookup {:?} (expected \"list\" or \"single\")",
                other
            ))),
        }
    }
}

/// FastAPI error body
#[derive(Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

pub struct DocumentsApi {
    client: Client,
    base_url: String,
    token: Option<String>,
    lookup: StatusLookup,
    list_limit: u32,
    request_timeout: Duration,
}

impl DocumentsApi {
    pub fn new(config: &ApiConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            lookup: config.status_lookup,
            list_limit: config.list_limit.clamp(1, MAX_LIST_LIMIT),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    pub fn lookup(&self) -> StatusLookup {
        self.lookup
    }

    /// Documents endpoint with `segments` appended, each percent-encoded so an
    /// id containing `/`, `?` or `#` stays a single path segment.
    fn url(&self, segments: &[&str]) -> AppResult<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| AppError::Config(format!("invalid API url {:?}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| AppError::Config(format!("API url {:?} cannot take a path", self.base_url)))?
            .pop_if_empty()
            .extend(DOCUMENTS_PATH)
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// First page of documents, newest first
    pub async fn list_documents(&self, limit: u32) -> AppResult<DocumentListResponse> {
        self.list_page(limit, 0).await
    }

    pub async fn list_page(&self, limit: u32, offset: u64) -> AppResult<DocumentListResponse> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT);
        let response = self
            .authorized(self.client.get(self.url(&[""])?))
            .query(&[("limit", u64::from(limit)), ("offset", offset)])
            .timeout(self.request_timeout)
            .send()
            .await?;

        let list: DocumentListResponse = check_status(response).await?.json().await?;
        debug!(
            "Listed {} of {} documents at offset {}",
            list.documents.len(),
            list.total,
            offset
        );
        Ok(list)
    }

    /// Walk the list page by page; the job is gone only once every page has been seen.
    async fn status_from_list(&self, job_id: &str) -> AppResult<Option<StatusUpdate>> {
        let mut offset = 0u64;
        loop {
            let page = self.list_page(self.list_limit, offset).await?;
            if let Some(doc) = page.documents.iter().find(|doc| doc.document_id == job_id) {
                return Ok(Some(doc.status()));
            }

            offset += page.documents.len() as u64;
            if page.documents.is_empty() || offset >= page.total {
                return Ok(None);
            }
        }
    }

    async fn status_from_document(&self, job_id: &str) -> AppResult<Option<StatusUpdate>> {
        let response = self
            .authorized(self.client.get(self.url(&[job_id])?))
            .timeout(self.request_timeout)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let update: StatusUpdate = check_status(response).await?.json().await?;
        Ok(Some(update))
    }
}

#[async_trait]
impl StatusChannel for DocumentsApi {
    async fn open(&self, job_id: &str) -> AppResult<FrameStream> {
        let url = self.url(&["stream", job_id])?;
        // no timeout: the stream stays open until the job finishes
        let response = self
            .authorized(self.client.get(url.clone()))
            .header(header::ACCEPT, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| AppError::Transport(format!("connect to {} failed: {}", url, e)))?;

        let response = check_status(response)
            .await
            .map_err(|e| AppError::Transport(e.to_string()))?;
        info!("Opened status stream for job {}", job_id);

        let mut decoder = SseDecoder::new();
        let frames = response
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(bytes) => match decoder.feed(&bytes) {
                    Ok(frames) => frames.into_iter().map(Ok).collect::<Vec<_>>(),
                    Err(e) => vec![Err(e)],
                },
                Err(e) => vec![Err(AppError::Transport(e.to_string()))],
            })
            .flat_map(futures::stream::iter)
            .boxed();

        Ok(frames)
    }
}

#[async_trait]
impl StatusQuery for DocumentsApi {
    async fn current_status(&self, job_id: &str) -> AppResult<Option<StatusUpdate>> {
        match self.lookup {
            StatusLookup::List => self.status_from_list(job_id).await,
            StatusLookup::Single => self.status_from_document(job_id).await,
        }
    }
}

/// Map a non-success response to `AppError::Api`, preferring FastAPI's `detail`.
async fn check_status(response: Response) -> AppResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(ErrorBody { detail: serde_json::Value::String(detail) }) => detail,
        Ok(ErrorBody { detail }) => detail.to_string(),
        Err(_) if body.is_empty() => status.canonical_reason().unwrap_or("error").to_string(),
        Err(_) => body,
    };

    Err(AppError::Api {
        status: status.as_u16(),
        message,
    })
}
