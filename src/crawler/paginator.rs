//! Cursor paginator with retry support
//!
//! This module walks one upstream source page by page, following the
//! opaque cursor each page returns, until a page cap, an item cap or the
//! end of the listing is reached.

use std::time::Duration;

use super::PageSource;
use crate::config::Config;
use crate::models::InstanceRecord;
use crate::utils::error::{FetchError, UpstreamError};
use crate::utils::retry::{with_retry_if, RetryConfig};

/// Sequential page crawler for a single source
#[derive(Debug, Clone)]
pub struct Paginator {
    /// Retry policy applied to every page
    retry: RetryConfig,

    /// Pause between successful page fetches
    page_delay: Duration,
}

impl Paginator {
    /// Create a paginator
    ///
    /// # Arguments
    ///
    /// * `retry` - Retry policy for failed page requests
    /// * `page_delay` - Fixed delay inserted between successful pages
    #[must_use]
    pub fn new(retry: RetryConfig, page_delay: Duration) -> Self {
        Self { retry, page_delay }
    }

    /// Create a paginator from application configuration
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.retry_config(), config.page_delay())
    }

    /// Collect records from one source
    ///
    /// # Arguments
    ///
    /// * `source` - Source to crawl
    /// * `page_cap` - Maximum pages to fetch (0 = unlimited)
    /// * `item_cap` - Maximum records to return
    ///
    /// # Returns
    ///
    /// Raw records in page order, at most `item_cap` of them. Reaching a cap
    /// or the last page is not an error.
    ///
    /// # Errors
    ///
    /// Returns `UpstreamError` when a page fails with a non-retryable error
    /// or keeps failing past the retry ceiling
    pub async fn fetch_all(
        &self,
        source: &dyn PageSource,
        page_cap: u32,
        item_cap: usize,
    ) -> Result<Vec<InstanceRecord>, UpstreamError> {
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;
        let mut page = 0u32;

        while records.len() < item_cap {
            if page_cap > 0 && page >= page_cap {
                tracing::debug!(source = source.name(), page, page_cap, "Reached maximum pages limit");
                break;
            }

            if page > 0 && !self.page_delay.is_zero() {
                tokio::time::sleep(self.page_delay).await;
            }
            page += 1;

            let current = cursor.as_deref();
            let result = with_retry_if(
                &self.retry,
                || source.fetch_page(current),
                FetchError::is_retryable,
            )
            .await;

            let upstream_page = match result {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(source = source.name(), page, error = %e, "Page fetch failed");
                    return Err(UpstreamError::from_fetch(source.name(), page, &e));
                }
            };

            let fetched = upstream_page.data.len();
            let remaining = item_cap - records.len();
            records.extend(
                upstream_page
                    .data
                    .into_iter()
                    .take(remaining)
                    .map(InstanceRecord::from),
            );

            tracing::debug!(
                source = source.name(),
                page,
                fetched,
                total = records.len(),
                has_more = upstream_page.next_page_cursor.is_some(),
                "Processed page"
            );

            match upstream_page.next_page_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => {
                    tracing::debug!(source = source.name(), page, "No more pages available");
                    break;
                }
            }
        }

        tracing::info!(
            source = source.name(),
            pages = page,
            records = records.len(),
            "Completed source crawl"
        );

        Ok(records)
    }
}
