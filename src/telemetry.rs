//! Process-wide ambient state: atomic metrics counters and the
//! species-first-seen cache.
//!
//! Per the data model's "global/process-wide state" list, only three
//! things live outside per-source/per-request scope: this cache, the
//! clock source (handled separately as injectable `Arc<dyn Clock>`, not
//! a global here), and these counters.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use once_cell::sync::Lazy;

static TELEMETRY: Lazy<Telemetry> = Lazy::new(Telemetry::default);

/// Access the global telemetry instance.
pub fn telemetry() -> &'static Telemetry {
    &TELEMETRY
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CounterSnapshot {
    pub samples_dropped: u64,
    pub classifier_timeouts: u64,
    pub detections_emitted: u64,
    pub processor_dropped: u64,
    pub action_failures: u64,
}

struct Counters {
    samples_dropped: AtomicU64,
    classifier_timeouts: AtomicU64,
    detections_emitted: AtomicU64,
    processor_dropped: AtomicU64,
    action_failures: AtomicU64,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            samples_dropped: AtomicU64::new(0),
            classifier_timeouts: AtomicU64::new(0),
            detections_emitted: AtomicU64::new(0),
            processor_dropped: AtomicU64::new(0),
            action_failures: AtomicU64::new(0),
        }
    }
}

/// Per-(date, species) "have we already recorded a first sighting"
/// cache, fronting the persistence layer's own `first_seen` table so
/// repeated detections of a common species don't hit it every time.
/// Copy-on-write: readers clone the `Arc` cheaply; a write clones the
/// underlying set, inserts, and swaps the new set in, so no lock is
/// ever held across more than a pointer swap.
struct SpeciesFirstSeenCache {
    seen: Mutex<std::sync::Arc<HashSet<String>>>,
}

impl Default for SpeciesFirstSeenCache {
    fn default() -> Self {
        Self { seen: Mutex::new(std::sync::Arc::new(HashSet::new())) }
    }
}

impl SpeciesFirstSeenCache {
    /// Returns `true` the first time a given key is seen, `false` on
    /// every subsequent call for the same key. Key is caller-chosen
    /// (typically `"{date}:{species_scientific_lowercase}"`).
    fn mark_seen(&self, key: &str) -> bool {
        let current = self.seen.lock().unwrap().clone();
        if current.contains(key) {
            return false;
        }
        let mut next = (*current).clone();
        next.insert(key.to_string());
        *self.seen.lock().unwrap() = std::sync::Arc::new(next);
        true
    }

    fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

pub struct Telemetry {
    counters: Counters,
    first_seen: SpeciesFirstSeenCache,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self { counters: Counters::default(), first_seen: SpeciesFirstSeenCache::default() }
    }
}

impl Telemetry {
    pub fn record_samples_dropped(&self, count: u64) {
        self.counters.samples_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_classifier_timeout(&self) {
        self.counters.classifier_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_detection_emitted(&self) {
        self.counters.detections_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processor_dropped(&self) {
        self.counters.processor_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_action_failure(&self) {
        self.counters.action_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// `true` the first time `species_scientific` is marked for `date`.
    pub fn mark_first_seen(&self, species_scientific: &str, date: chrono::NaiveDate) -> bool {
        let key = format!("{date}:{}", species_scientific.to_lowercase());
        self.first_seen.mark_seen(&key)
    }

    pub fn first_seen_cache_len(&self) -> usize {
        self.first_seen.len()
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            samples_dropped: self.counters.samples_dropped.load(Ordering::Relaxed),
            classifier_timeouts: self.counters.classifier_timeouts.load(Ordering::Relaxed),
            detections_emitted: self.counters.detections_emitted.load(Ordering::Relaxed),
            processor_dropped: self.counters.processor_dropped.load(Ordering::Relaxed),
            action_failures: self.counters.action_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently() {
        let telemetry = Telemetry::default();
        telemetry.record_samples_dropped(10);
        telemetry.record_classifier_timeout();
        telemetry.record_detection_emitted();
        telemetry.record_detection_emitted();

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.samples_dropped, 10);
        assert_eq!(snapshot.classifier_timeouts, 1);
        assert_eq!(snapshot.detections_emitted, 2);
        assert_eq!(snapshot.processor_dropped, 0);
    }

    #[test]
    fn first_seen_is_true_once_per_species_per_date() {
        let telemetry = Telemetry::default();
        let date = chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();

        assert!(telemetry.mark_first_seen("Turdus merula", date));
        assert!(!telemetry.mark_first_seen("Turdus Merula", date));
        assert!(!telemetry.mark_first_seen("turdus merula", date));
        assert_eq!(telemetry.first_seen_cache_len(), 1);
    }

    #[test]
    fn distinct_dates_are_distinct_first_sightings() {
        let telemetry = Telemetry::default();
        let d1 = chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let d2 = chrono::NaiveDate::from_ymd_opt(2026, 1, 2).unwrap();

        assert!(telemetry.mark_first_seen("Turdus merula", d1));
        assert!(telemetry.mark_first_seen("Turdus merula", d2));
    }

    #[test]
    fn global_instance_is_reachable() {
        telemetry().record_detection_emitted();
        assert!(telemetry().snapshot().detections_emitted >= 1);
    }
}
