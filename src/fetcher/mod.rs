//! External collaborators: metadata fetchers and content derivers.
//!
//! Defines the [`MetadataFetcher`] trait and concrete implementations:
//! - **[`HttpFetcher`]** — fetches a page over HTTP and scrapes title,
//!   description, OpenGraph/Twitter tags, JSON-LD blocks and images.
//! - **[`RetryingFetcher`]** — decorator adding exponential backoff around
//!   any fetcher. The regeneration orchestrator itself never retries.
//! - **[`StaticFetcher`]** — canned responses, for tests and dry runs.
//!
//! # Retry Strategy
//!
//! [`RetryingFetcher`] retries only transient failures
//! ([`FetchError::is_transient`]):
//! - network errors and timeouts → retry
//! - HTTP 429 and 5xx → retry
//! - other HTTP errors and parse failures → fail immediately
//! - backoff: `base_delay × 2^(attempt-1)`, exponent capped at 5

mod html;

pub use html::HttpFetcher;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{FetchError, Result};
use crate::models::ContentItem;
use crate::snapshot::Snapshot;

/// Source of fresh metadata for a URL.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    /// Structured metadata: title, description, tags, structured data, ...
    async fn fetch_metadata(&self, url: &str) -> std::result::Result<Snapshot, FetchError>;

    /// Image data: primary image, icons, gallery, ...
    async fn fetch_images(&self, url: &str) -> std::result::Result<Snapshot, FetchError>;
}

/// Produces the derived ("rewritten") representation of an item.
///
/// The engine only decides *whether* to call this; how the derivation
/// works is up to the implementation.
#[async_trait]
pub trait ContentDeriver: Send + Sync {
    async fn derive(&self, item: &ContentItem) -> Result<Snapshot>;
}

// ============ Retry decorator ============

/// Wraps a fetcher with exponential backoff for transient failures.
pub struct RetryingFetcher<F> {
    inner: F,
    max_retries: u32,
    base_delay: Duration,
}

impl<F: MetadataFetcher> RetryingFetcher<F> {
    pub fn new(inner: F, max_retries: u32) -> Self {
        Self {
            inner,
            max_retries,
            base_delay: Duration::from_secs(1),
        }
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << (attempt - 1).min(5))
    }
}

macro_rules! with_retry {
    ($self:ident, $url:ident, $call:ident) => {{
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                tokio::time::sleep($self.delay_for(attempt)).await;
            }
            match $self.inner.$call($url).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(e) if e.is_transient() && attempt < $self.max_retries => {
                    tracing::debug!(url = $url, attempt, error = %e, "retrying fetch");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }};
}

#[async_trait]
impl<F: MetadataFetcher> MetadataFetcher for RetryingFetcher<F> {
    async fn fetch_metadata(&self, url: &str) -> std::result::Result<Snapshot, FetchError> {
        with_retry!(self, url, fetch_metadata)
    }

    async fn fetch_images(&self, url: &str) -> std::result::Result<Snapshot, FetchError> {
        with_retry!(self, url, fetch_images)
    }
}

// ============ Static fetcher ============

#[derive(Clone)]
enum StaticResponse {
    Ok { metadata: Snapshot, images: Snapshot },
    Err(FetchError),
}

/// Serves configured snapshots per URL. Unknown URLs fail with HTTP 404.
#[derive(Default)]
pub struct StaticFetcher {
    responses: Mutex<HashMap<String, StaticResponse>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every response, e.g. to exercise timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set(&self, url: &str, metadata: Snapshot, images: Snapshot) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.insert(url.to_string(), StaticResponse::Ok { metadata, images });
        }
    }

    pub fn fail(&self, url: &str, error: FetchError) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.insert(url.to_string(), StaticResponse::Err(error));
        }
    }

    /// Number of fetch calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn respond(&self, url: &str) -> std::result::Result<StaticResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let response = self
            .responses
            .lock()
            .map_err(|_| FetchError::Network {
                url: url.to_string(),
                message: "static fetcher lock poisoned".to_string(),
            })?
            .get(url)
            .cloned();
        response.ok_or_else(|| FetchError::Status {
            url: url.to_string(),
            status: 404,
        })
    }
}

#[async_trait]
impl MetadataFetcher for StaticFetcher {
    async fn fetch_metadata(&self, url: &str) -> std::result::Result<Snapshot, FetchError> {
        match self.respond(url).await? {
            StaticResponse::Ok { metadata, .. } => Ok(metadata),
            StaticResponse::Err(e) => Err(e),
        }
    }

    async fn fetch_images(&self, url: &str) -> std::result::Result<Snapshot, FetchError> {
        match self.respond(url).await? {
            StaticResponse::Ok { images, .. } => Ok(images),
            StaticResponse::Err(e) => Err(e),
        }
    }
}
