//! Reservation and visited-mark tables
//!
//! Plain data structure with an explicit `now`, so expiry is decided in one
//! place: [`LeaseTables::sweep`] runs first in every operation.

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::InstanceRecord;

/// Time-bounded exclusive claim of one client on one instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub instance_id: String,
    pub client_id: String,
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Temporary suppression of a consumed instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitedMark {
    pub instance_id: String,
    pub expires_at: DateTime<Utc>,
}

impl VisitedMark {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Entries removed by a sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub reservations: usize,
    pub visited: usize,
}

/// Result of a release attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseOutcome {
    /// The reservation was removed
    Released,

    /// The caller holds no active reservation on the instance
    NotFound,
}

/// Reservation and visited tables keyed by instance identity
#[derive(Debug, Default)]
pub struct LeaseTables {
    reservations: HashMap<String, Reservation>,
    visited: HashMap<String, VisitedMark>,
}

impl LeaseTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired reservation and visited mark
    pub fn sweep(&mut self, now: DateTime<Utc>) -> SweepReport {
        let reservations_before = self.reservations.len();
        let visited_before = self.visited.len();

        self.reservations.retain(|_, r| !r.is_expired(now));
        self.visited.retain(|_, v| !v.is_expired(now));

        SweepReport {
            reservations: reservations_before - self.reservations.len(),
            visited: visited_before - self.visited.len(),
        }
    }

    /// Whether the instance is neither reserved nor visited
    ///
    /// Callers sweep first; expired entries are still checked here so a
    /// stale entry is never treated as active.
    pub fn is_available(&self, instance_id: &str, now: DateTime<Utc>) -> bool {
        let reserved = self
            .reservations
            .get(instance_id)
            .is_some_and(|r| !r.is_expired(now));
        let visited = self
            .visited
            .get(instance_id)
            .is_some_and(|v| !v.is_expired(now));
        !reserved && !visited
    }

    /// Record a reservation; the instance must be available
    pub fn reserve(
        &mut self,
        instance_id: &str,
        client_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Reservation {
        let reservation = Reservation {
            instance_id: instance_id.to_string(),
            client_id: client_id.to_string(),
            expires_at,
        };
        self.reservations
            .insert(instance_id.to_string(), reservation.clone());
        reservation
    }

    /// Remove a reservation owned by `client_id` or already expired
    pub fn release(
        &mut self,
        instance_id: &str,
        client_id: &str,
        now: DateTime<Utc>,
    ) -> ReleaseOutcome {
        let releasable = self
            .reservations
            .get(instance_id)
            .is_some_and(|r| r.client_id == client_id || r.is_expired(now));

        let outcome = if releasable {
            self.reservations.remove(instance_id);
            ReleaseOutcome::Released
        } else {
            ReleaseOutcome::NotFound
        };

        self.sweep(now);
        outcome
    }

    /// Clear any reservation and mark the instance visited until `expires_at`
    ///
    /// Returns the reservation that was cleared, if one was active.
    pub fn confirm(
        &mut self,
        instance_id: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<Reservation> {
        self.sweep(now);

        let cleared = self.reservations.remove(instance_id);
        self.visited.insert(
            instance_id.to_string(),
            VisitedMark {
                instance_id: instance_id.to_string(),
                expires_at,
            },
        );
        cleared
    }

    /// First available record in a random scan order
    ///
    /// Each record has the same chance of being picked among the
    /// available ones, so concurrent clients spread over the pool.
    pub fn pick<'a, R: Rng + ?Sized>(
        &self,
        items: &'a [InstanceRecord],
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Option<&'a InstanceRecord> {
        let mut order: Vec<usize> = (0..items.len()).collect();
        order.shuffle(rng);
        order
            .into_iter()
            .map(|i| &items[i])
            .find(|record| self.is_available(&record.id, now))
    }

    /// Active reservation on an instance
    pub fn reservation(&self, instance_id: &str) -> Option<&Reservation> {
        self.reservations.get(instance_id)
    }

    /// Number of reservations held (call after a sweep for active count)
    pub fn reservation_count(&self) -> usize {
        self.reservations.len()
    }

    /// Number of visited marks held (call after a sweep for active count)
    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }
}
