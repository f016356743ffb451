//! Activity ledger: last time each route saw an inbound message.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::types::RouteId;

/// Returned by [`ActivityLedger::time_since_last_activity`] for a route that
/// has never been seen. Always exceeds any configured timeout.
pub const NEVER_ACTIVE: Duration = Duration::MAX;

/// Concurrent map from route to last-activity timestamp.
///
/// Many runtime tasks write, one scheduler task reads per cycle. Entries are
/// never removed; the key set is bounded by the routes ever registered.
#[derive(Debug, Default)]
pub struct ActivityLedger {
    last_seen: DashMap<RouteId, Instant>,
}

impl ActivityLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record activity on `route` at `at`.
    ///
    /// A stored timestamp never moves backwards: if a racing writer already
    /// stored a later instant, this write is dropped.
    pub fn record_activity(&self, route: &RouteId, at: Instant) {
        if let Some(mut last) = self.last_seen.get_mut(route) {
            if at > *last {
                *last = at;
            }
            return;
        }
        self.last_seen
            .entry(route.clone())
            .and_modify(|last| {
                if at > *last {
                    *last = at;
                }
            })
            .or_insert(at);
    }

    /// Elapsed time between the last recorded activity and `now`, or
    /// [`NEVER_ACTIVE`] when the route has no entry.
    pub fn time_since_last_activity(&self, route: &RouteId, now: Instant) -> Duration {
        self.last_seen
            .get(route)
            .map_or(NEVER_ACTIVE, |last| now.saturating_duration_since(*last))
    }

    pub fn last_activity(&self, route: &RouteId) -> Option<Instant> {
        self.last_seen.get(route).map(|last| *last)
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn unknown_route_is_never_active() {
        let ledger = ActivityLedger::new();
        let route = RouteId::from("A");
        assert_eq!(ledger.time_since_last_activity(&route, Instant::now()), NEVER_ACTIVE);
        assert!(ledger.last_activity(&route).is_none());
    }

    #[test]
    fn later_record_overwrites_earlier() {
        let ledger = ActivityLedger::new();
        let route = RouteId::from("A");
        let t1 = Instant::now();
        let t2 = t1 + Duration::from_secs(5);

        ledger.record_activity(&route, t1);
        ledger.record_activity(&route, t2);

        let now = t2 + Duration::from_secs(1);
        assert_eq!(ledger.time_since_last_activity(&route, now), Duration::from_secs(1));
        assert_eq!(ledger.last_activity(&route), Some(t2));
    }

    #[test]
    fn stale_write_does_not_move_timestamp_back() {
        let ledger = ActivityLedger::new();
        let route = RouteId::from("A");
        let t1 = Instant::now();
        let t2 = t1 + Duration::from_secs(5);

        ledger.record_activity(&route, t2);
        ledger.record_activity(&route, t1);

        assert_eq!(ledger.last_activity(&route), Some(t2));
    }

    #[test]
    fn now_before_timestamp_saturates_to_zero() {
        let ledger = ActivityLedger::new();
        let route = RouteId::from("A");
        let t = Instant::now() + Duration::from_secs(10);
        ledger.record_activity(&route, t);
        assert_eq!(ledger.time_since_last_activity(&route, Instant::now()), Duration::ZERO);
    }

    #[test]
    fn concurrent_writers_keep_the_newest() {
        let ledger = Arc::new(ActivityLedger::new());
        let base = Instant::now();

        let handles: Vec<_> = (0..8u64)
            .map(|worker| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    for i in 0..500u64 {
                        let route = RouteId::from(format!("route-{}", i % 4));
                        ledger.record_activity(&route, base + Duration::from_millis(worker * 1_000 + i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(ledger.len(), 4);
        let newest = base + Duration::from_millis(7 * 1_000 + 499);
        assert_eq!(ledger.last_activity(&RouteId::from("route-3")), Some(newest));
    }
}
