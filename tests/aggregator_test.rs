//! Multi-source aggregation against mock upstreams

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use poolbroker::crawler::{ListingFetcher, PageSource, Paginator};
use poolbroker::pool::Aggregator;
use poolbroker::utils::error::PoolError;
use poolbroker::utils::retry::RetryConfig;
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{page_body, MemorySource};

/// Mount a two-page listing of 200 unique entries
async fn mount_listing(server: &MockServer, prefix: &str) {
    Mock::given(method("GET"))
        .and(path("/servers"))
        .and(query_param_is_missing("cursor"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(prefix, 0, 100, Some("next"))))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/servers"))
        .and(query_param("cursor", "next"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(prefix, 100, 100, None)))
        .mount(server)
        .await;
}

fn http_source(name: &str, server: &MockServer, timeout: Duration) -> Arc<dyn PageSource> {
    Arc::new(
        ListingFetcher::new(name, &server.uri(), "/servers", timeout)
            .unwrap()
            .with_rate_limit(1000),
    )
}

fn paginator() -> Paginator {
    Paginator::new(RetryConfig::with_delays(1, 5, 10), Duration::from_millis(5))
}

#[tokio::test]
async fn test_three_sources_truncated_to_target() {
    let mut servers = Vec::new();
    for prefix in ["eu", "us", "ap"] {
        let server = MockServer::start().await;
        mount_listing(&server, prefix).await;
        servers.push((prefix, server));
    }

    let sources = servers
        .iter()
        .map(|(name, server)| http_source(name, server, Duration::from_secs(2)))
        .collect();
    let aggregator = Aggregator::new(sources, paginator());

    let collection = aggregator.collect(5, 500).await.unwrap();

    assert_eq!(collection.items.len(), 500);
    let ids: HashSet<_> = collection.items.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids.len(), 500);
    assert!(collection.items.iter().all(|r| r.occupancy < r.capacity));

    assert_eq!(collection.report.len(), 3);
    for outcome in collection.report.values() {
        assert!(outcome.ok);
        assert_eq!(outcome.count, Some(200));
    }
}

#[tokio::test]
async fn test_timing_out_source_is_isolated() {
    let healthy_a = MockServer::start().await;
    let healthy_b = MockServer::start().await;
    let slow = MockServer::start().await;
    mount_listing(&healthy_a, "a").await;
    mount_listing(&healthy_b, "b").await;

    Mock::given(method("GET"))
        .and(path("/servers"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(page_body("slow", 0, 10, None))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&slow)
        .await;

    let aggregator = Aggregator::new(
        vec![
            http_source("a", &healthy_a, Duration::from_secs(2)),
            http_source("b", &healthy_b, Duration::from_secs(2)),
            http_source("slow", &slow, Duration::from_millis(100)),
        ],
        paginator(),
    );

    let collection = aggregator.collect(5, 1000).await.unwrap();

    assert_eq!(collection.items.len(), 400);
    assert!(collection.items.iter().all(|r| !r.id.starts_with("slow-")));

    let failed = &collection.report["slow"];
    assert!(!failed.ok);
    assert!(failed.error.is_some());
    assert_eq!(collection.report.values().filter(|o| !o.ok).count(), 1);
}

#[tokio::test]
async fn test_all_sources_failing() {
    let broken = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&broken)
        .await;

    let aggregator = Aggregator::new(
        vec![
            http_source("one", &broken, Duration::from_secs(1)),
            http_source("two", &broken, Duration::from_secs(1)),
        ],
        paginator(),
    );

    match aggregator.collect(1, 10).await {
        Err(PoolError::AllSourcesUnavailable { failures }) => {
            assert_eq!(failures.len(), 2);
            assert!(failures.iter().all(|f| f.last_status == Some(503)));
        }
        other => panic!("expected AllSourcesUnavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn test_duplicates_across_sources_collapse() {
    let a = MemorySource::with_ids("a", &["x", "y", "z"]);
    let b = MemorySource::with_ids("b", &["y", "z", "w"]);

    let sources: Vec<Arc<dyn PageSource>> = vec![Arc::new(a), Arc::new(b)];
    let aggregator = Aggregator::new(sources, common::fast_paginator());
    let collection = aggregator.collect(1, 100).await.unwrap();

    let mut ids: Vec<_> = collection.items.iter().map(|r| r.id.clone()).collect();
    ids.sort();
    assert_eq!(ids, vec!["w", "x", "y", "z"]);
    assert_eq!(collection.report["a"].count, Some(3));
    assert_eq!(collection.report["b"].count, Some(3));
}

#[tokio::test]
async fn test_fewer_than_target_is_not_an_error() {
    let source = MemorySource::new(
        "mixed",
        vec![
            common::server("free", 10, 2),
            common::server("full", 10, 10),
            common::server("", 10, 0),
        ],
    );

    let aggregator = Aggregator::new(vec![Arc::new(source) as Arc<dyn PageSource>], common::fast_paginator());
    let collection = aggregator.collect(1, 500).await.unwrap();

    assert_eq!(collection.items.len(), 1);
    assert_eq!(collection.items[0].id, "free");
}
