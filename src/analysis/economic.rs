use tracing::{debug, info, warn};

use crate::config::{EconomicConfig, PartyConfig};
use crate::data::types::EconomicIndicator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bloc {
    Incumbent,
    Opposition,
    Unaligned,
}

impl Bloc {
    pub fn of(parties: &PartyConfig, party: &str) -> Self {
        if parties.incumbent.iter().any(|p| p == party) {
            Bloc::Incumbent
        } else if parties.opposition.iter().any(|p| p == party) {
            Bloc::Opposition
        } else {
            Bloc::Unaligned
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EconomicCorrection {
    pub mean_unemployment: Option<f64>,
    pub regions: usize,
    /// Bloc-level correction in points; zero unless unemployment is above threshold.
    pub magnitude: f64,
}

impl EconomicCorrection {
    /// Signed share of the correction for a bloc: opposition gains, incumbents lose.
    pub fn signed_for(&self, bloc: Bloc, weight: f64) -> f64 {
        match bloc {
            Bloc::Opposition => self.magnitude * weight,
            Bloc::Incumbent => -self.magnitude * weight,
            Bloc::Unaligned => 0.0,
        }
    }
}

pub fn correction_for_mean(mean: f64, config: &EconomicConfig) -> f64 {
    if mean > config.threshold {
        (mean - config.threshold) * config.sensitivity
    } else {
        0.0
    }
}

pub fn economic_correction(
    indicators: &[EconomicIndicator],
    config: &EconomicConfig,
) -> EconomicCorrection {
    if indicators.is_empty() {
        info!("No economic indicators available");
        return EconomicCorrection::default();
    }

    let mean = indicators.iter().map(|i| i.unemployment_rate).sum::<f64>() / indicators.len() as f64;
    let magnitude = correction_for_mean(mean, config);

    info!(
        "Mean unemployment over {} regions: {:.2}%",
        indicators.len(),
        mean
    );
    for indicator in indicators.iter().filter(|i| i.unemployment_rate > config.threshold) {
        debug!(
            "{}: {:.1}% unemployment",
            indicator.region.as_deref().unwrap_or("unnamed region"),
            indicator.unemployment_rate
        );
    }
    if magnitude > 0.0 {
        warn!(
            "Economic distress above {:.1}%: {:.2}pp bloc correction",
            config.threshold, magnitude
        );
    }

    EconomicCorrection {
        mean_unemployment: Some(mean),
        regions: indicators.len(),
        magnitude,
    }
}
