use std::cmp::Ordering;
use tracing::debug;

use crate::analysis::bias::BiasEstimate;
use crate::analysis::economic::{Bloc, EconomicCorrection};
use crate::analysis::hidden_signal::HiddenSignalReport;
use crate::config::{BlendConfig, PartyConfig};
use crate::data::types::{share_or, Shares};

/// Every term that went into one party's final estimate.
#[derive(Debug, Clone)]
pub struct PartyForecast {
    pub party: String,
    pub base: f64,
    pub bias_term: f64,
    pub economic_term: f64,
    pub hidden_bonus: f64,
    pub latest_observed: f64,
    pub corrected: f64,
    pub floored: bool,
    pub estimate: f64,
}

/// Final per-party estimates in party enumeration order.
#[derive(Debug, Clone, Default)]
pub struct ForecastEstimate {
    pub parties: Vec<PartyForecast>,
}

impl ForecastEstimate {
    #[cfg(test)]
    pub fn estimate(&self, party: &str) -> Option<f64> {
        self.parties
            .iter()
            .find(|p| p.party == party)
            .map(|p| p.estimate)
    }

    /// Descending by estimate; exact ties keep enumeration order.
    pub fn ranking(&self) -> Vec<(&str, f64)> {
        let mut ranked: Vec<(&str, f64)> = self
            .parties
            .iter()
            .map(|p| (p.party.as_str(), p.estimate))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        ranked
    }
}

/// Per-stage inputs for one blend. Missing pieces are represented by their
/// neutral defaults (empty maps, zero bias, zero correction).
pub struct BlendInputs<'a> {
    pub base: &'a Shares,
    pub bias: &'a BiasEstimate,
    pub economic: &'a EconomicCorrection,
    pub hidden: &'a HiddenSignalReport,
    /// Most recent observed poll value per party, where one exists.
    pub latest_observed: &'a Shares,
}

pub struct ForecastBlender {
    config: BlendConfig,
}

impl ForecastBlender {
    pub fn new(config: BlendConfig) -> Self {
        Self { config }
    }

    pub fn blend(&self, parties: &PartyConfig, inputs: &BlendInputs<'_>) -> ForecastEstimate {
        let forecasts = parties
            .tracked
            .iter()
            .map(|party| {
                let base = share_or(inputs.base, party, 0.0);
                let bias_term = -inputs.bias.bias(party) * self.config.bias_weight;
                let economic_term = inputs
                    .economic
                    .signed_for(Bloc::of(parties, party), self.config.economic_weight);
                let hidden_bonus = inputs.hidden.adjustment(party);
                let latest_observed = share_or(inputs.latest_observed, party, base);

                self.blend_party(party, base, bias_term, economic_term, hidden_bonus, latest_observed)
            })
            .collect();

        ForecastEstimate { parties: forecasts }
    }

    /// Combine the already-weighted correction terms for one party.
    pub fn blend_party(
        &self,
        party: &str,
        base: f64,
        bias_term: f64,
        economic_term: f64,
        hidden_bonus: f64,
        latest_observed: f64,
    ) -> PartyForecast {
        let corrected = base + bias_term + economic_term + hidden_bonus;
        let mut estimate =
            self.config.corrected_weight * corrected + self.config.observed_weight * latest_observed;

        // Positive baselines are floored at a fraction of themselves.
        let floored = estimate < self.config.floor_threshold && base > 0.0;
        if floored {
            estimate = base * self.config.floor_fraction;
        }
        let estimate = estimate.max(0.0);

        debug!(
            "{}: base {:.2} bias {:+.2} econ {:+.2} hidden {:+.2} latest {:.2} -> {:.2}",
            party, base, bias_term, economic_term, hidden_bonus, latest_observed, estimate
        );

        PartyForecast {
            party: party.to_string(),
            base,
            bias_term,
            economic_term,
            hidden_bonus,
            latest_observed,
            corrected,
            floored,
            estimate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::hidden_signal::SignalAssessment;

    fn shares(pairs: &[(&str, f64)]) -> Shares {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn parties(codes: &[&str]) -> PartyConfig {
        PartyConfig {
            tracked: codes.iter().map(|s| s.to_string()).collect(),
            incumbent: vec![],
            opposition: vec![],
            signal_keys: Default::default(),
        }
    }

    fn blender() -> ForecastBlender {
        ForecastBlender::new(BlendConfig::default())
    }

    #[test]
    fn test_bias_correction_and_observed_blend() {
        let base = shares(&[("A", 30.0)]);
        let bias = BiasEstimate {
            per_party: shares(&[("A", 5.0)]),
            matched_elections: 1,
            elections: vec![],
        };
        let latest = shares(&[("A", 30.0)]);
        let inputs = BlendInputs {
            base: &base,
            bias: &bias,
            economic: &EconomicCorrection::default(),
            hidden: &HiddenSignalReport::default(),
            latest_observed: &latest,
        };

        let forecast = blender().blend(&parties(&["A"]), &inputs);

        let a = &forecast.parties[0];
        assert!((a.corrected - 27.5).abs() < 1e-12);
        assert!((a.estimate - 28.25).abs() < 1e-12);
        assert!(!a.floored);
    }

    #[test]
    fn test_missing_latest_falls_back_to_base() {
        let base = shares(&[("A", 20.0)]);
        let inputs = BlendInputs {
            base: &base,
            bias: &BiasEstimate::default(),
            economic: &EconomicCorrection::default(),
            hidden: &HiddenSignalReport::default(),
            latest_observed: &Shares::new(),
        };

        let forecast = blender().blend(&parties(&["A"]), &inputs);
        assert!((forecast.estimate("A").unwrap() - 20.0).abs() < 1e-12);
    }

    #[test]
    fn test_economic_and_hidden_terms() {
        let mut config = parties(&["GOV", "OPP"]);
        config.incumbent = vec!["GOV".to_string()];
        config.opposition = vec!["OPP".to_string()];
        let base = shares(&[("GOV", 30.0), ("OPP", 30.0)]);
        let economic = EconomicCorrection {
            mean_unemployment: Some(20.0),
            regions: 1,
            magnitude: 1.0,
        };
        let hidden = HiddenSignalReport {
            assessments: vec![SignalAssessment {
                party: "OPP".to_string(),
                signal: 60.0,
                stated_support: 10.0,
                ratio: 6.0,
                flagged: true,
                adjustment: 1.5,
            }],
        };
        let inputs = BlendInputs {
            base: &base,
            bias: &BiasEstimate::default(),
            economic: &economic,
            hidden: &hidden,
            latest_observed: &Shares::new(),
        };

        let forecast = blender().blend(&config, &inputs);

        // GOV: 0.7 * 29.5 + 0.3 * 30; OPP: 0.7 * 32.0 + 0.3 * 30
        assert!((forecast.estimate("GOV").unwrap() - 29.65).abs() < 1e-9);
        assert!((forecast.estimate("OPP").unwrap() - 31.4).abs() < 1e-9);
    }

    #[test]
    fn test_floor_rule_and_clamp() {
        let b = blender();

        // Stacked negatives on a positive base trigger the floor.
        let floored = b.blend_party("A", 2.0, -4.0, -0.5, 0.0, 0.0);
        assert!(floored.floored);
        assert_eq!(floored.estimate, 1.0);

        // Non-positive base: no floor, clamp to zero.
        let clamped = b.blend_party("B", -3.0, -1.0, 0.0, 0.0, 0.0);
        assert!(!clamped.floored);
        assert_eq!(clamped.estimate, 0.0);

        let zero = b.blend_party("C", 0.0, 0.0, 0.0, 0.0, 0.0);
        assert_eq!(zero.estimate, 0.0);
    }

    #[test]
    fn test_estimates_never_negative() {
        let b = blender();
        for base in [-20.0, -1.0, 0.0, 0.3, 1.0, 40.0] {
            for correction in [-50.0, -5.0, 0.0, 5.0] {
                for latest in [0.0, 10.0] {
                    let f = b.blend_party("X", base, correction, correction, 0.0, latest);
                    assert!(f.estimate >= 0.0, "{:?}", f);
                }
            }
        }
    }

    #[test]
    fn test_ranking_is_descending_and_stable() {
        let b = blender();
        let forecast = ForecastEstimate {
            parties: vec![
                b.blend_party("A", 10.0, 0.0, 0.0, 0.0, 10.0),
                b.blend_party("B", 30.0, 0.0, 0.0, 0.0, 30.0),
                b.blend_party("C", 10.0, 0.0, 0.0, 0.0, 10.0),
                b.blend_party("D", 20.0, 0.0, 0.0, 0.0, 20.0),
            ],
        };

        let order: Vec<&str> = forecast.ranking().into_iter().map(|(p, _)| p).collect();
        assert_eq!(order, vec!["B", "D", "A", "C"]);
    }
}
