//! Per-(source, species) dynamic threshold state.
//!
//! Owned outright by a single Processor task per spec's no-locking
//! design: only the task that owns a source's Processor ever touches
//! its threshold table.

use std::collections::HashMap;

/// `{baseThreshold, dynamicOffset, lastDecayAt, recentPositives}` per
/// species, keyed case-insensitively on scientific name.
#[derive(Debug, Clone)]
struct ThresholdState {
    dynamic_offset: f32,
    last_decay_wall_ms: i64,
    recent_positives: u32,
}

pub struct ThresholdTable {
    base_default: f32,
    per_species_base: HashMap<String, f32>,
    bump_step: f32,
    max_bump: f32,
    decay_half_life_ms: f64,
    state: HashMap<String, ThresholdState>,
}

impl ThresholdTable {
    pub fn new(
        base_default: f32,
        per_species_base: HashMap<String, f32>,
        bump_step: f32,
        max_bump: f32,
        decay_half_life_sec: u32,
    ) -> Self {
        Self {
            base_default,
            per_species_base: per_species_base
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect(),
            bump_step,
            max_bump,
            decay_half_life_ms: (decay_half_life_sec.max(1) as f64) * 1000.0,
            state: HashMap::new(),
        }
    }

    pub fn base_for(&self, species_scientific_lower: &str) -> f32 {
        self.per_species_base
            .get(species_scientific_lower)
            .copied()
            .unwrap_or(self.base_default)
    }

    /// Decay the species' offset to `now_wall_ms`, then return the
    /// effective threshold (`base + offset`) without mutating state.
    pub fn effective_threshold(&mut self, species_scientific: &str, now_wall_ms: i64) -> f32 {
        let key = species_scientific.to_lowercase();
        let base = self.base_for(&key);
        let entry = self.state.entry(key).or_insert(ThresholdState {
            dynamic_offset: 0.0,
            last_decay_wall_ms: now_wall_ms,
            recent_positives: 0,
        });
        decay(entry, now_wall_ms, self.decay_half_life_ms);
        base + entry.dynamic_offset
    }

    /// Record an accepted detection: bump the offset, capped at
    /// `max_bump`.
    pub fn record_acceptance(&mut self, species_scientific: &str, now_wall_ms: i64) {
        let key = species_scientific.to_lowercase();
        let entry = self.state.entry(key).or_insert(ThresholdState {
            dynamic_offset: 0.0,
            last_decay_wall_ms: now_wall_ms,
            recent_positives: 0,
        });
        decay(entry, now_wall_ms, self.decay_half_life_ms);
        entry.dynamic_offset = (entry.dynamic_offset + self.bump_step).min(self.max_bump);
        entry.recent_positives += 1;
        entry.last_decay_wall_ms = now_wall_ms;
    }

    #[cfg(test)]
    fn dynamic_offset(&self, species_scientific: &str) -> f32 {
        self.state
            .get(&species_scientific.to_lowercase())
            .map(|s| s.dynamic_offset)
            .unwrap_or(0.0)
    }
}

fn decay(entry: &mut ThresholdState, now_wall_ms: i64, half_life_ms: f64) {
    let elapsed_ms = (now_wall_ms - entry.last_decay_wall_ms).max(0) as f64;
    if elapsed_ms == 0.0 || entry.dynamic_offset == 0.0 {
        entry.last_decay_wall_ms = now_wall_ms;
        return;
    }
    let factor = 0.5_f64.powf(elapsed_ms / half_life_ms);
    entry.dynamic_offset = (entry.dynamic_offset as f64 * factor) as f32;
    entry.last_decay_wall_ms = now_wall_ms;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acceptance_bumps_offset_capped_at_max() {
        let mut table = ThresholdTable::new(0.6, HashMap::new(), 0.05, 0.1, 600);
        table.record_acceptance("turdus merula", 0);
        table.record_acceptance("turdus merula", 0);
        table.record_acceptance("turdus merula", 0);
        assert!(table.dynamic_offset("turdus merula") <= 0.1);
    }

    #[test]
    fn offset_decays_toward_zero_over_half_life() {
        let mut table = ThresholdTable::new(0.6, HashMap::new(), 0.1, 0.3, 1000);
        table.record_acceptance("turdus merula", 0);
        let offset_before = table.dynamic_offset("turdus merula");
        let effective = table.effective_threshold("turdus merula", 1000);
        let offset_after = effective - 0.6;
        assert!(offset_after < offset_before);
        assert!((offset_after - offset_before / 2.0).abs() < 0.01);
    }

    #[test]
    fn per_species_base_overrides_default() {
        let mut per_species = HashMap::new();
        per_species.insert("Turdus merula".to_string(), 0.8);
        let mut table = ThresholdTable::new(0.6, per_species, 0.05, 0.2, 600);
        assert_eq!(table.effective_threshold("turdus merula", 0), 0.8);
        assert_eq!(table.effective_threshold("unlisted species", 0), 0.6);
    }
}
