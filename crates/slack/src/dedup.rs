//! Bounded record of recently seen Slack event ids.
//!
//! Slack redelivers an event when it does not see a fast acknowledgement, so the
//! same `event_id` can arrive several times, possibly concurrently. `admit`
//! returns `true` exactly once per id while that id is retained.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use greeter_core::config::EventsConfig;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DedupPolicy {
    pub retention: Duration,
    pub max_tracked: usize,
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self { retention: Duration::from_secs(3600), max_tracked: 1000 }
    }
}

impl From<&EventsConfig> for DedupPolicy {
    fn from(config: &EventsConfig) -> Self {
        Self {
            retention: Duration::from_secs(config.retention_secs),
            max_tracked: config.max_tracked,
        }
    }
}

#[derive(Debug, Default)]
struct SeenEvents {
    received_at: HashMap<String, Instant>,
    arrival_order: VecDeque<(String, Instant)>,
}

impl SeenEvents {
    fn prune_expired(&mut self, now: Instant, retention: Duration) {
        while let Some((_, seen_at)) = self.arrival_order.front() {
            if now.saturating_duration_since(*seen_at) < retention {
                break;
            }
            if let Some((event_id, seen_at)) = self.arrival_order.pop_front() {
                // Only drop the map entry if it still belongs to this queue slot.
                if self.received_at.get(&event_id) == Some(&seen_at) {
                    self.received_at.remove(&event_id);
                }
            }
        }
    }

    fn evict_oldest(&mut self) {
        if let Some((event_id, seen_at)) = self.arrival_order.pop_front() {
            if self.received_at.get(&event_id) == Some(&seen_at) {
                self.received_at.remove(&event_id);
            }
        }
    }
}

#[derive(Debug)]
pub struct EventDeduplicator {
    policy: DedupPolicy,
    seen: Mutex<SeenEvents>,
}

impl Default for EventDeduplicator {
    fn default() -> Self {
        Self::new(DedupPolicy::default())
    }
}

impl EventDeduplicator {
    pub fn new(policy: DedupPolicy) -> Self {
        Self { policy, seen: Mutex::new(SeenEvents::default()) }
    }

    pub fn policy(&self) -> &DedupPolicy {
        &self.policy
    }

    /// Records `event_id` and returns `true` the first time it is presented.
    pub fn admit(&self, event_id: &str) -> bool {
        self.admit_at(event_id, Instant::now())
    }

    fn admit_at(&self, event_id: &str, now: Instant) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        seen.prune_expired(now, self.policy.retention);

        if seen.received_at.contains_key(event_id) {
            return false;
        }

        while seen.received_at.len() >= self.policy.max_tracked.max(1) {
            seen.evict_oldest();
        }

        seen.received_at.insert(event_id.to_owned(), now);
        seen.arrival_order.push_back((event_id.to_owned(), now));
        true
    }

    /// Forgets an admitted id so a redelivery of it is admitted again.
    pub fn release(&self, event_id: &str) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        seen.arrival_order.retain(|(tracked, _)| tracked != event_id);
        seen.received_at.remove(event_id).is_some()
    }

    pub fn contains(&self, event_id: &str) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        seen.prune_expired(Instant::now(), self.policy.retention);
        seen.received_at.contains_key(event_id)
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).received_at.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use super::{DedupPolicy, EventDeduplicator};

    fn policy(retention_secs: u64, max_tracked: usize) -> DedupPolicy {
        DedupPolicy { retention: Duration::from_secs(retention_secs), max_tracked }
    }

    #[test]
    fn second_presentation_of_same_id_is_rejected() {
        let dedup = EventDeduplicator::default();

        assert_eq!((dedup.admit("Ev01"), dedup.admit("Ev01")), (true, false));
        assert!(dedup.contains("Ev01"));
    }

    #[test]
    fn distinct_ids_are_admitted_independently() {
        let dedup = EventDeduplicator::default();

        assert!(dedup.admit("Ev01"));
        assert!(dedup.admit("Ev02"));
        assert_eq!(dedup.len(), 2);
    }

    #[test]
    fn ids_expire_after_retention_window() {
        let dedup = EventDeduplicator::new(policy(60, 10));
        let start = Instant::now();

        assert!(dedup.admit_at("Ev01", start));
        assert!(!dedup.admit_at("Ev01", start + Duration::from_secs(59)));
        assert!(dedup.admit_at("Ev01", start + Duration::from_secs(61)));
    }

    #[test]
    fn oldest_id_is_evicted_when_capacity_is_reached() {
        let dedup = EventDeduplicator::new(policy(3600, 2));
        let start = Instant::now();

        assert!(dedup.admit_at("Ev01", start));
        assert!(dedup.admit_at("Ev02", start + Duration::from_secs(1)));
        assert!(dedup.admit_at("Ev03", start + Duration::from_secs(2)));

        assert_eq!(dedup.len(), 2);
        assert!(!dedup.admit_at("Ev02", start + Duration::from_secs(3)));
        assert!(!dedup.admit_at("Ev03", start + Duration::from_secs(3)));
        assert!(dedup.admit_at("Ev01", start + Duration::from_secs(3)));
    }

    #[test]
    fn expired_id_is_tracked_again_after_readmission() {
        let dedup = EventDeduplicator::new(policy(10, 10));
        let start = Instant::now();

        assert!(dedup.admit_at("Ev01", start));
        assert!(dedup.admit_at("Ev01", start + Duration::from_secs(11)));
        assert!(!dedup.admit_at("Ev01", start + Duration::from_secs(12)));
    }

    #[test]
    fn released_id_is_admitted_again() {
        let dedup = EventDeduplicator::default();

        assert!(dedup.admit("Ev01"));
        assert!(dedup.release("Ev01"));
        assert!(!dedup.release("Ev01"));
        assert!(dedup.is_empty());
        assert!(dedup.admit("Ev01"));
        assert!(!dedup.admit("Ev01"));
    }

    #[test]
    fn concurrent_presentations_admit_exactly_once() {
        let dedup = Arc::new(EventDeduplicator::default());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let dedup = Arc::clone(&dedup);
                std::thread::spawn(move || dedup.admit("EvRace"))
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread should not panic"))
            .filter(|admitted| *admitted)
            .count();

        assert_eq!(admitted, 1);
    }
}
