//! Dog-bark false-positive suppression.
//!
//! Dogs generate broadband transients that fool bird classifiers: when
//! a configured bark label crosses `barkThreshold`, every non-bark
//! prediction in that window and the next N windows is suppressed.

use crate::model::RawPrediction;

pub struct BarkSuppressor {
    bark_labels: Vec<String>,
    bark_threshold: f32,
    suppress_windows: u32,
    windows_remaining: u32,
}

impl BarkSuppressor {
    pub fn new(bark_labels: Vec<String>, bark_threshold: f32, suppress_windows: u32) -> Self {
        Self {
            bark_labels: bark_labels.into_iter().map(|l| l.to_lowercase()).collect(),
            bark_threshold,
            suppress_windows,
            windows_remaining: 0,
        }
    }

    /// Apply suppression to one window's predictions: observe whether
    /// this window itself triggers a bark, then filter out every
    /// non-bark prediction if suppression is currently active.
    pub fn apply(&mut self, predictions: Vec<RawPrediction>) -> Vec<RawPrediction> {
        let triggered = predictions
            .iter()
            .any(|p| self.bark_labels.iter().any(|b| b == &p.label.to_lowercase()) && p.score >= self.bark_threshold);

        let suppressing = triggered || self.windows_remaining > 0;
        if triggered {
            self.windows_remaining = self.suppress_windows;
        } else if self.windows_remaining > 0 {
            self.windows_remaining -= 1;
        }

        if !suppressing {
            return predictions;
        }

        predictions
            .into_iter()
            .filter(|p| self.bark_labels.iter().any(|b| b == &p.label.to_lowercase()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pred(label: &str, score: f32) -> RawPrediction {
        RawPrediction { label: label.to_string(), score }
    }

    #[test]
    fn suppresses_birds_in_triggering_and_following_windows() {
        let mut bark = BarkSuppressor::new(vec!["Dog".to_string()], 0.7, 2);

        let out = bark.apply(vec![pred("Dog", 0.9), pred("Turdus merula", 0.8)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, "Dog");

        let out = bark.apply(vec![pred("Turdus merula", 0.9)]);
        assert!(out.is_empty());

        let out = bark.apply(vec![pred("Turdus merula", 0.9)]);
        assert!(out.is_empty());

        let out = bark.apply(vec![pred("Turdus merula", 0.9)]);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn below_threshold_bark_does_not_trigger() {
        let mut bark = BarkSuppressor::new(vec!["Dog".to_string()], 0.7, 2);
        let out = bark.apply(vec![pred("Dog", 0.5), pred("Turdus merula", 0.8)]);
        assert_eq!(out.len(), 2);
    }
}
