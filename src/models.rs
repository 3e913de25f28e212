//! Core data structures for the pool broker
//!
//! This module contains the upstream wire types and the records and
//! snapshots built from them.

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

// ============================================================================
// Upstream Wire Types
// ============================================================================

/// One page of an upstream listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamPage {
    /// Entries on this page; a missing field is an empty page
    ///
    /// Entries that do not decode are dropped individually.
    #[serde(default, deserialize_with = "decode_entries")]
    pub data: Vec<UpstreamServer>,

    /// Cursor for the next page, absent on the last page
    #[serde(default)]
    pub next_page_cursor: Option<String>,
}

/// A single entry as reported by an upstream source
///
/// Every field is optional because the upstream is untrusted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamServer {
    /// Opaque identity; numeric ids are kept as their decimal text
    #[serde(default, deserialize_with = "decode_id")]
    pub id: Option<String>,

    #[serde(default)]
    pub max_players: Option<i64>,

    #[serde(default)]
    pub playing: Option<i64>,

    #[serde(default)]
    pub ping: Option<f64>,

    #[serde(default)]
    pub fps: Option<f64>,
}

fn decode_entries<'de, D>(deserializer: D) -> Result<Vec<UpstreamServer>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    let total = raw.len();

    let entries: Vec<UpstreamServer> = raw
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed upstream entry");
                None
            }
        })
        .collect();

    if entries.len() < total {
        tracing::warn!(dropped = total - entries.len(), total, "Dropped malformed upstream entries");
    }
    Ok(entries)
}

fn decode_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(id)) => Ok(Some(id)),
        Some(Value::Number(id)) => Ok(Some(id.to_string())),
        Some(other) => Err(de::Error::invalid_type(
            de::Unexpected::Other(&other.to_string()),
            &"a string or numeric id",
        )),
    }
}

// ============================================================================
// Instance Record
// ============================================================================

/// A capacity-limited remote instance discovered upstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Stable identity across pages and refreshes
    pub id: String,

    /// Maximum occupancy
    pub capacity: i64,

    /// Current occupancy as reported upstream
    pub occupancy: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ping: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
}

impl InstanceRecord {
    /// Create a record with the given identity and occupancy
    pub fn new(id: impl Into<String>, capacity: i64, occupancy: i64) -> Self {
        Self {
            id: id.into(),
            capacity,
            occupancy,
            ping: None,
            fps: None,
        }
    }

    /// Whether the record has an identity and free capacity
    pub fn is_valid(&self) -> bool {
        !self.id.trim().is_empty() && self.occupancy >= 0 && self.occupancy < self.capacity
    }

    /// Remaining free slots (zero when full or inconsistent)
    pub fn free_slots(&self) -> i64 {
        (self.capacity - self.occupancy).max(0)
    }
}

impl From<UpstreamServer> for InstanceRecord {
    /// Missing numbers become zero capacity, which the validation filter drops.
    fn from(server: UpstreamServer) -> Self {
        Self {
            id: server.id.unwrap_or_default(),
            capacity: server.max_players.unwrap_or(0),
            occupancy: server.playing.unwrap_or(0),
            ping: server.ping,
            fps: server.fps,
        }
    }
}

// ============================================================================
// Source Report
// ============================================================================

/// Outcome of one source during a refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub ok: bool,

    /// Records fetched (before filtering and deduplication)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl SourceOutcome {
    /// Successful fetch of `count` records
    pub fn success(count: usize) -> Self {
        Self {
            ok: true,
            count: Some(count),
            error: None,
            status: None,
        }
    }

    /// Failed fetch
    pub fn failure(error: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            ok: false,
            count: None,
            error: Some(error.into()),
            status,
        }
    }
}

/// Per-source outcomes keyed by source name
pub type SourceReport = BTreeMap<String, SourceOutcome>;

// ============================================================================
// Pool Snapshot
// ============================================================================

/// Immutable point-in-time view of the aggregated pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// Deduplicated, filtered, shuffled records
    pub items: Vec<InstanceRecord>,

    /// When the snapshot was produced
    pub generated_at: DateTime<Utc>,

    /// Per-source outcome of the refresh that produced it
    pub source_report: SourceReport,
}

impl PoolSnapshot {
    /// Create a snapshot stamped with the current time
    pub fn new(items: Vec<InstanceRecord>, source_report: SourceReport) -> Self {
        Self {
            items,
            generated_at: Utc::now(),
            source_report,
        }
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the snapshot holds no records
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Time elapsed since generation
    pub fn age(&self) -> Duration {
        (Utc::now() - self.generated_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Whether the snapshot is older than `ttl`
    pub fn is_stale(&self, ttl: Duration) -> bool {
        self.age() > ttl
    }

    /// Look up a record by identity
    pub fn find(&self, id: &str) -> Option<&InstanceRecord> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Number of sources that failed in the producing refresh
    pub fn failed_sources(&self) -> usize {
        self.source_report.values().filter(|o| !o.ok).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_page_parsing() {
        let json = r#"{
            "previousPageCursor": null,
            "nextPageCursor": "abc",
            "data": [
                {"id": "s1", "maxPlayers": 8, "playing": 3, "ping": 61.5, "fps": 59.9},
                {"id": "s2", "maxPlayers": 8}
            ]
        }"#;

        let page: UpstreamPage = serde_json::from_str(json).unwrap();
        assert_eq!(page.next_page_cursor.as_deref(), Some("abc"));
        assert_eq!(page.data.len(), 2);
        assert_eq!(page.data[0].playing, Some(3));
        assert_eq!(page.data[1].playing, None);
    }

    #[test]
    fn test_malformed_entries_are_dropped_individually() {
        let json = r#"{
            "data": [
                {"id": "good", "maxPlayers": 10, "playing": 1},
                {"id": "float", "maxPlayers": 10, "playing": 1.5},
                {"id": "text", "maxPlayers": "ten", "playing": 1},
                {"id": ["nested"], "maxPlayers": 10},
                null,
                "garbage",
                {"id": 12345, "maxPlayers": 10, "playing": 1}
            ],
            "nextPageCursor": "n"
        }"#;

        let page: UpstreamPage = serde_json::from_str(json).unwrap();
        let ids: Vec<_> = page.data.iter().map(|s| s.id.as_deref()).collect();
        assert_eq!(ids, vec![Some("good"), Some("12345")]);
        assert_eq!(page.next_page_cursor.as_deref(), Some("n"));
    }

    #[test]
    fn test_null_data_is_empty_page() {
        let page: UpstreamPage = serde_json::from_str(r#"{"data": null}"#).unwrap();
        assert!(page.data.is_empty());
    }

    #[test]
    fn test_upstream_page_without_data() {
        let page: UpstreamPage = serde_json::from_str("{}").unwrap();
        assert!(page.data.is_empty());
        assert!(page.next_page_cursor.is_none());
    }

    #[test]
    fn test_record_validity() {
        assert!(InstanceRecord::new("a", 10, 9).is_valid());
        assert!(!InstanceRecord::new("a", 10, 10).is_valid());
        assert!(!InstanceRecord::new("a", 10, 12).is_valid());
        assert!(!InstanceRecord::new("", 10, 1).is_valid());
        assert!(!InstanceRecord::new("  ", 10, 1).is_valid());
        assert!(!InstanceRecord::new("a", 10, -1).is_valid());
    }

    #[test]
    fn test_record_from_upstream_missing_capacity() {
        let record = InstanceRecord::from(UpstreamServer {
            id: Some("x".into()),
            ..Default::default()
        });
        assert_eq!(record.capacity, 0);
        assert!(!record.is_valid());
    }

    #[test]
    fn test_snapshot_staleness() {
        let mut snapshot = PoolSnapshot::new(vec![InstanceRecord::new("a", 4, 1)], SourceReport::new());
        assert!(!snapshot.is_stale(Duration::from_secs(60)));

        snapshot.generated_at = Utc::now() - chrono::Duration::seconds(120);
        assert!(snapshot.is_stale(Duration::from_secs(60)));
        assert!(snapshot.find("a").is_some());
        assert!(snapshot.find("b").is_none());
    }

    #[test]
    fn test_failed_sources() {
        let mut report = SourceReport::new();
        report.insert("a".into(), SourceOutcome::success(10));
        report.insert("b".into(), SourceOutcome::failure("timeout", None));

        let snapshot = PoolSnapshot::new(vec![], report);
        assert_eq!(snapshot.failed_sources(), 1);
        assert!(snapshot.is_empty());
    }
}
