//! Source provider collaborator
//!
//! A source fetches the raw content of one chapter. Failures are classified
//! up front ([`FetchError`]) so the scheduler can pick the transition without
//! knowing anything about the source.

use crate::error::{classify_status, FetchError};
use crate::library::ChapterInfo;
use crate::types::DownloadType;
use async_trait::async_trait;
use std::time::Duration;

/// Fetches chapter content from a remote source
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Fetch the content for `chapter`
    ///
    /// `variant` selects the source's raw payload or a derived representation.
    /// The caller enforces the fetch timeout and cancellation; implementations
    /// do not need to.
    async fn fetch(
        &self,
        chapter: &ChapterInfo,
        variant: DownloadType,
    ) -> Result<String, FetchError>;
}

/// Plain HTTP source: GETs the chapter's url
///
/// Only serves [`DownloadType::Original`]; there is no derived representation
/// to fetch over plain HTTP.
#[derive(Clone)]
pub struct HttpSourceProvider {
    client: reqwest::Client,
}

impl HttpSourceProvider {
    /// Build a provider whose client gives up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Source(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Use an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceProvider for HttpSourceProvider {
    async fn fetch(
        &self,
        chapter: &ChapterInfo,
        variant: DownloadType,
    ) -> Result<String, FetchError> {
        if variant == DownloadType::Transformed {
            return Err(FetchError::Source(format!(
                "no transformed content available for chapter {}",
                chapter.id
            )));
        }

        let url = url::Url::parse(&chapter.url).map_err(|e| {
            FetchError::NotFound(format!("invalid chapter url '{}': {}", chapter.url, e))
        })?;

        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(
                status.as_u16(),
                format!("HTTP {} fetching chapter {}", status, chapter.id),
            ));
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Err(FetchError::Source(format!(
                "empty response for chapter {}",
                chapter.id
            )));
        }

        Ok(body)
    }
}
