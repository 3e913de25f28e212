//! Federated aggregation across upstream sources
//!
//! Every source is crawled concurrently. Failing sources are isolated and
//! reported; the merged records go through filter, dedupe, shuffle and
//! truncate, in that order.

use futures::future::join_all;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::Config;
use crate::crawler::{ListingFetcher, PageSource, Paginator};
use crate::metrics;
use crate::models::{InstanceRecord, SourceOutcome, SourceReport};
use crate::utils::error::{FetchError, PoolError};

/// Result of one aggregation cycle
#[derive(Debug, Clone)]
pub struct Collection {
    /// Final records, at most `target_total`
    pub items: Vec<InstanceRecord>,

    /// Per-source outcome
    pub report: SourceReport,
}

/// Fans the paginator out across all sources
pub struct Aggregator {
    sources: Vec<Arc<dyn PageSource>>,
    paginator: Paginator,
    items_per_source: Option<usize>,
}

impl Aggregator {
    /// Create an aggregator over the given sources
    pub fn new(sources: Vec<Arc<dyn PageSource>>, paginator: Paginator) -> Self {
        Self {
            sources,
            paginator,
            items_per_source: None,
        }
    }

    /// Build HTTP sources and the paginator from configuration
    ///
    /// # Errors
    ///
    /// Returns `FetchError` if a source URL is invalid
    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        let sources = config
            .upstream
            .sources
            .iter()
            .map(|source| {
                ListingFetcher::from_config(source, config).map(|f| Arc::new(f) as Arc<dyn PageSource>)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(sources, Paginator::from_config(config))
            .with_items_per_source(config.items_per_source()))
    }

    /// Cap the records taken from each source
    #[must_use]
    pub fn with_items_per_source(mut self, cap: usize) -> Self {
        self.items_per_source = Some(cap);
        self
    }

    /// Names of the configured sources
    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    /// Run one aggregation cycle
    ///
    /// # Arguments
    ///
    /// * `pages_per_source` - Page cap for each source
    /// * `target_total` - Maximum size of the result
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AllSourcesUnavailable` only when every source fails
    pub async fn collect(
        &self,
        pages_per_source: u32,
        target_total: usize,
    ) -> Result<Collection, PoolError> {
        let item_cap = self.items_per_source.unwrap_or(target_total);

        let crawls = self.sources.iter().map(|source| async move {
            let result = self
                .paginator
                .fetch_all(source.as_ref(), pages_per_source, item_cap)
                .await;
            (source.name().to_string(), result)
        });

        let outcomes = join_all(crawls).await;

        let mut report = SourceReport::new();
        let mut failures = Vec::new();
        let mut merged = Vec::new();

        for (name, result) in outcomes {
            match result {
                Ok(records) => {
                    metrics::record_source_result(&name, true);
                    report.insert(name, SourceOutcome::success(records.len()));
                    merged.extend(records);
                }
                Err(e) => {
                    metrics::record_source_result(&name, false);
                    report.insert(name, SourceOutcome::failure(e.to_string(), e.last_status));
                    failures.push(e);
                }
            }
        }

        if failures.len() == self.sources.len() {
            tracing::error!(sources = self.sources.len(), "All upstream sources failed");
            return Err(PoolError::AllSourcesUnavailable { failures });
        }

        let fetched = merged.len();
        let items = merge_records(merged, target_total, &mut rand::thread_rng());

        tracing::info!(
            sources = self.sources.len(),
            failed = failures.len(),
            fetched,
            kept = items.len(),
            target_total,
            "Aggregation complete"
        );

        Ok(Collection { items, report })
    }
}

/// Filter, deduplicate, shuffle and truncate merged records
///
/// Invalid records (no identity, or `occupancy >= capacity`) are dropped,
/// the first occurrence of each identity is kept, the survivors are
/// permuted uniformly and cut to `target_total`.
pub fn merge_records<R: Rng + ?Sized>(
    records: Vec<InstanceRecord>,
    target_total: usize,
    rng: &mut R,
) -> Vec<InstanceRecord> {
    let mut seen = HashSet::new();
    let mut items: Vec<InstanceRecord> = records
        .into_iter()
        .filter(InstanceRecord::is_valid)
        .filter(|record| seen.insert(record.id.clone()))
        .collect();

    items.shuffle(rng);
    items.truncate(target_total);
    items
}
