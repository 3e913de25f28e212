//! Upstream crawling: page sources and the cursor paginator
//!
//! A [`PageSource`] returns one page of an upstream listing for a cursor.
//! [`fetcher::ListingFetcher`] is the HTTP implementation; the
//! [`paginator::Paginator`] walks any source page by page with retries.

pub mod fetcher;
pub mod paginator;

use async_trait::async_trait;

use crate::models::UpstreamPage;
use crate::utils::error::FetchError;

pub use fetcher::ListingFetcher;
pub use paginator::Paginator;

/// One paginated upstream listing
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Name used in reports and logs
    fn name(&self) -> &str;

    /// Fetch the page addressed by `cursor` (`None` for the first page)
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<UpstreamPage, FetchError>;
}
