//! Per-(source, species) deduplication.
//!
//! Cooldown resets from the last *emitted* detection, not from every
//! candidate crossing the dynamic threshold — a candidate arriving
//! mid-cooldown is dropped and does not itself restart the timer.

use std::collections::HashMap;

pub struct DedupTable {
    cooldown_ms: i64,
    last_emission_wall_ms: HashMap<String, i64>,
}

impl DedupTable {
    pub fn new(cooldown_sec: u32) -> Self {
        Self {
            cooldown_ms: cooldown_sec as i64 * 1000,
            last_emission_wall_ms: HashMap::new(),
        }
    }

    pub fn allows(&self, species_scientific: &str, window_start_wall_ms: i64) -> bool {
        match self.last_emission_wall_ms.get(&species_scientific.to_lowercase()) {
            Some(&last) => window_start_wall_ms - last >= self.cooldown_ms,
            None => true,
        }
    }

    pub fn record_emission(&mut self, species_scientific: &str, window_start_wall_ms: i64) {
        self.last_emission_wall_ms
            .insert(species_scientific.to_lowercase(), window_start_wall_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppresses_within_cooldown_then_allows_after() {
        let mut table = DedupTable::new(30);
        assert!(table.allows("turdus merula", 0));
        table.record_emission("turdus merula", 0);
        assert!(!table.allows("turdus merula", 29_000));
        assert!(table.allows("turdus merula", 30_000));
    }

    #[test]
    fn mid_cooldown_candidate_does_not_restart_timer() {
        let mut table = DedupTable::new(30);
        table.record_emission("turdus merula", 0);
        // A later candidate within cooldown is suppressed and must not
        // itself be recorded as an emission.
        assert!(!table.allows("turdus merula", 10_000));
        assert!(table.allows("turdus merula", 30_000));
    }

    #[test]
    fn species_are_tracked_independently() {
        let mut table = DedupTable::new(30);
        table.record_emission("turdus merula", 0);
        assert!(table.allows("parus major", 1_000));
    }
}
