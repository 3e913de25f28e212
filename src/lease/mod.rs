//! Exclusive leasing on top of pool snapshots
//!
//! The lease manager hands out one instance per request, keyed by a caller
//! supplied client identifier. Reservations lapse after their TTL; confirmed
//! instances stay suppressed until their visited mark expires.

pub mod tables;

pub use tables::{LeaseTables, ReleaseOutcome, Reservation, SweepReport, VisitedMark};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::Config;
use crate::metrics;
use crate::models::InstanceRecord;
use crate::pool::RefreshCache;
use crate::utils::error::LeaseError;

/// A granted lease
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseGrant {
    /// Informational identifier for this grant
    pub lease_id: Uuid,

    /// The leased instance as it appeared in the snapshot
    pub instance: InstanceRecord,

    pub client_id: String,

    /// When the reservation lapses without a release or confirm
    pub expires_at: DateTime<Utc>,
}

/// Active table sizes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseStats {
    pub reservations: usize,
    pub visited: usize,
}

/// Reservation and visited TTLs
#[derive(Debug, Clone)]
pub struct LeaseSettings {
    pub reservation_ttl: Duration,
    pub visited_ttl: Duration,
}

impl LeaseSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            reservation_ttl: config.reservation_ttl(),
            visited_ttl: config.visited_ttl(),
        }
    }
}

/// Lease manager owning the reservation and visited tables
pub struct LeaseManager {
    cache: RefreshCache,
    tables: Mutex<LeaseTables>,
    reservation_ttl: chrono::Duration,
    visited_ttl: chrono::Duration,
}

impl LeaseManager {
    /// Create a lease manager reading snapshots from `cache`
    pub fn new(cache: RefreshCache, settings: LeaseSettings) -> Self {
        Self {
            cache,
            tables: Mutex::new(LeaseTables::new()),
            reservation_ttl: to_delta(settings.reservation_ttl),
            visited_ttl: to_delta(settings.visited_ttl),
        }
    }

    /// Snapshot cache the manager leases from
    pub fn cache(&self) -> &RefreshCache {
        &self.cache
    }

    /// Reserve a random eligible instance for `client_id`
    ///
    /// Returns `Ok(None)` when every instance in the snapshot is reserved or
    /// visited.
    ///
    /// # Errors
    ///
    /// * `LeaseError::InvalidRequest` - blank client id
    /// * `LeaseError::Pool` - no snapshot could be produced
    pub async fn lease(&self, client_id: &str) -> Result<Option<LeaseGrant>, LeaseError> {
        let client_id = require(client_id, "client_id")?;
        let snapshot = self.cache.get(false).await?;

        let now = Utc::now();
        let mut tables = self.tables.lock().await;
        Self::sweep_locked(&mut tables, now);

        let Some(instance) = tables
            .pick(&snapshot.items, now, &mut rand::thread_rng())
            .cloned()
        else {
            metrics::record_lease("exhausted");
            tracing::info!(
                client_id,
                pool_size = snapshot.len(),
                reserved = tables.reservation_count(),
                visited = tables.visited_count(),
                "No eligible instance to lease"
            );
            return Ok(None);
        };

        let reservation = tables.reserve(&instance.id, client_id, now + self.reservation_ttl);
        metrics::record_lease("granted");
        metrics::set_table_sizes(tables.reservation_count(), tables.visited_count());

        tracing::debug!(
            client_id,
            instance_id = %instance.id,
            expires_at = %reservation.expires_at,
            "Lease granted"
        );

        Ok(Some(LeaseGrant {
            lease_id: Uuid::new_v4(),
            instance,
            client_id: reservation.client_id,
            expires_at: reservation.expires_at,
        }))
    }

    /// Release a reservation held by `client_id`
    ///
    /// # Errors
    ///
    /// Returns `LeaseError::InvalidRequest` when either identifier is blank
    pub async fn release(
        &self,
        instance_id: &str,
        client_id: &str,
    ) -> Result<ReleaseOutcome, LeaseError> {
        let instance_id = require(instance_id, "instance_id")?;
        let client_id = require(client_id, "client_id")?;

        let mut tables = self.tables.lock().await;
        let outcome = tables.release(instance_id, client_id, Utc::now());

        match outcome {
            ReleaseOutcome::Released => metrics::record_release("released"),
            ReleaseOutcome::NotFound => metrics::record_release("not_found"),
        }
        metrics::set_table_sizes(tables.reservation_count(), tables.visited_count());

        tracing::debug!(instance_id, client_id, ?outcome, "Release processed");
        Ok(outcome)
    }

    /// Mark an instance as consumed
    ///
    /// Clears any reservation on it regardless of owner and suppresses it
    /// until the visited TTL elapses.
    ///
    /// # Errors
    ///
    /// Returns `LeaseError::InvalidRequest` when either identifier is blank
    pub async fn confirm(&self, instance_id: &str, client_id: &str) -> Result<(), LeaseError> {
        let instance_id = require(instance_id, "instance_id")?;
        let client_id = require(client_id, "client_id")?;

        let now = Utc::now();
        let mut tables = self.tables.lock().await;
        let cleared = tables.confirm(instance_id, now + self.visited_ttl, now);

        metrics::record_confirm();
        metrics::set_table_sizes(tables.reservation_count(), tables.visited_count());

        match cleared {
            Some(r) if r.client_id != client_id => tracing::info!(
                instance_id,
                client_id,
                holder = %r.client_id,
                "Confirm cleared a reservation held by another client"
            ),
            _ => tracing::debug!(instance_id, client_id, "Instance confirmed"),
        }

        Ok(())
    }

    /// Sweep expired entries and report active table sizes
    pub async fn stats(&self) -> LeaseStats {
        let mut tables = self.tables.lock().await;
        Self::sweep_locked(&mut tables, Utc::now());
        LeaseStats {
            reservations: tables.reservation_count(),
            visited: tables.visited_count(),
        }
    }

    /// Remove expired reservations and visited marks
    pub async fn sweep(&self) -> SweepReport {
        let mut tables = self.tables.lock().await;
        let report = Self::sweep_locked(&mut tables, Utc::now());
        if report.reservations > 0 || report.visited > 0 {
            tracing::debug!(
                reservations = report.reservations,
                visited = report.visited,
                "Swept expired lease entries"
            );
        }
        report
    }

    /// Start background task to periodically sweep expired entries
    pub fn start_sweeper(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }

    fn sweep_locked(tables: &mut LeaseTables, now: DateTime<Utc>) -> SweepReport {
        let report = tables.sweep(now);
        metrics::set_table_sizes(tables.reservation_count(), tables.visited_count());
        report
    }
}

fn require<'a>(value: &'a str, field: &str) -> Result<&'a str, LeaseError> {
    crate::utils::non_blank(Some(value))
        .ok_or_else(|| LeaseError::InvalidRequest(format!("{field} is required")))
}

fn to_delta(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365))
}
