use std::collections::HashMap;
use tracing::{info, warn};

use crate::config::HiddenSignalConfig;
use crate::data::types::{share_or, Shares};

#[derive(Debug, Clone)]
pub struct SignalAssessment {
    pub party: String,
    pub signal: f64,
    pub stated_support: f64,
    pub ratio: f64,
    pub flagged: bool,
    pub adjustment: f64,
}

#[derive(Debug, Clone, Default)]
pub struct HiddenSignalReport {
    /// Empty when no interest signal was available.
    pub assessments: Vec<SignalAssessment>,
}

impl HiddenSignalReport {
    pub fn adjustment(&self, party: &str) -> f64 {
        self.assessments
            .iter()
            .find(|a| a.party == party)
            .map(|a| a.adjustment)
            .unwrap_or(0.0)
    }

    pub fn flagged(&self) -> impl Iterator<Item = &SignalAssessment> {
        self.assessments.iter().filter(|a| a.flagged)
    }
}

/// Flags parties whose search interest is far out of proportion to the
/// support they state in surveys.
pub struct HiddenSignalDetector {
    config: HiddenSignalConfig,
}

impl HiddenSignalDetector {
    pub fn new(config: HiddenSignalConfig) -> Self {
        Self { config }
    }

    /// Interest-to-support ratio. Zero support with a positive signal yields
    /// a very large ratio through the epsilon floor, never a division fault.
    pub fn ratio(&self, signal: f64, stated_support: f64) -> f64 {
        if signal <= 0.0 {
            return 0.0;
        }
        signal / stated_support.max(self.config.epsilon)
    }

    pub fn is_hidden_support(&self, signal: f64, stated_support: f64) -> bool {
        self.ratio(signal, stated_support) > self.config.ratio_threshold
            && stated_support > self.config.support_floor
    }

    pub fn detect(
        &self,
        interest: &Shares,
        stated_support: &Shares,
        parties: &[String],
        signal_keys: &HashMap<String, String>,
    ) -> HiddenSignalReport {
        if interest.is_empty() {
            info!("No interest signal available, skipping hidden-support detection");
            return HiddenSignalReport::default();
        }

        let assessments = parties
            .iter()
            .map(|party| {
                let signal = match signal_keys.get(party) {
                    Some(key) => share_or(interest, key, 0.0),
                    None => {
                        warn!("No signal key configured for {}", party);
                        0.0
                    }
                };
                let stated = share_or(
                    stated_support,
                    party,
                    self.config.missing_support_default,
                );

                let ratio = self.ratio(signal, stated);
                let flagged = self.is_hidden_support(signal, stated);
                let adjustment = if flagged { self.config.bonus } else { 0.0 };

                if flagged {
                    info!(
                        "{}: possible hidden support (ratio {:.1}), +{:.2}pp",
                        party, ratio, adjustment
                    );
                } else {
                    info!("{}: interest in line with support (ratio {:.1})", party, ratio);
                }

                SignalAssessment {
                    party: party.clone(),
                    signal,
                    stated_support: stated,
                    ratio,
                    flagged,
                    adjustment,
                }
            })
            .collect();

        HiddenSignalReport { assessments }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> HiddenSignalDetector {
        HiddenSignalDetector::new(HiddenSignalConfig::default())
    }

    fn shares(pairs: &[(&str, f64)]) -> Shares {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn keys() -> HashMap<String, String> {
        [("A", "A_Interest"), ("B", "B_Interest")]
            .into_iter()
            .map(|(p, k)| (p.to_string(), k.to_string()))
            .collect()
    }

    #[test]
    fn test_flag_is_monotonic_in_signal() {
        let d = detector();
        let stated = 10.0;

        let mut flagged_at = None;
        for signal in (0..200).map(|s| s as f64) {
            let flagged = d.is_hidden_support(signal, stated);
            if let Some(first) = flagged_at {
                assert!(flagged, "flag dropped at signal {} after {}", signal, first);
            } else if flagged {
                flagged_at = Some(signal);
            }
        }
        // ratio must exceed 5.0 strictly: 50 / 10 is not enough
        assert_eq!(flagged_at, Some(51.0));
    }

    #[test]
    fn test_zero_support_does_not_fault() {
        let d = detector();
        let mut stated = 4.0;
        while stated > 0.0 {
            let ratio = d.ratio(45.0, stated);
            assert!(ratio.is_finite() && ratio > 0.0);
            stated -= 0.25;
        }

        let ratio = d.ratio(45.0, 0.0);
        assert!(ratio > 1e9);
        // Below the support floor: never flagged however large the ratio.
        assert!(!d.is_hidden_support(45.0, 0.0));
        assert_eq!(d.ratio(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_support_floor_blocks_noisy_baseline() {
        let d = detector();
        assert!(!d.is_hidden_support(100.0, 2.0));
        assert!(d.is_hidden_support(100.0, 2.5));
    }

    #[test]
    fn test_detect_applies_fixed_bonus() {
        let interest = shares(&[("A_Interest", 45.0), ("B_Interest", 70.0), ("source", 1.0)]);
        let stated = shares(&[("A", 3.0), ("B", 26.7)]);
        let parties = vec!["A".to_string(), "B".to_string()];

        let report = detector().detect(&interest, &stated, &parties, &keys());

        assert_eq!(report.adjustment("A"), 1.5);
        assert_eq!(report.adjustment("B"), 0.0);
        assert_eq!(report.flagged().count(), 1);
    }

    #[test]
    fn test_no_signal_means_no_adjustment() {
        let stated = shares(&[("A", 3.0)]);
        let parties = vec!["A".to_string(), "B".to_string()];

        let report = detector().detect(&Shares::new(), &stated, &parties, &keys());

        assert!(report.assessments.is_empty());
        assert_eq!(report.adjustment("A"), 0.0);
        assert_eq!(report.adjustment("B"), 0.0);
    }

    #[test]
    fn test_missing_stated_support_uses_default() {
        // Default stated support 1.0 sits below the 2.0 floor.
        let interest = shares(&[("A_Interest", 90.0)]);
        let parties = vec!["A".to_string()];

        let report = detector().detect(&interest, &Shares::new(), &parties, &keys());

        assert_eq!(report.assessments[0].stated_support, 1.0);
        assert_eq!(report.assessments[0].ratio, 90.0);
        assert!(!report.assessments[0].flagged);
    }
}
