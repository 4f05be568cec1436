use std::collections::HashMap;
use tracing::{debug, info};

use crate::data::types::{share_or, HistoricalBarometer, OfficialResult, Shares};

/// Signed error of one barometer against its official result.
#[derive(Debug, Clone)]
pub struct ElectionError {
    pub election_id: String,
    /// `(party, predicted - actual)` in party enumeration order.
    pub errors: Vec<(String, f64)>,
}

#[derive(Debug, Clone, Default)]
pub struct BiasEstimate {
    pub per_party: Shares,
    pub matched_elections: usize,
    pub elections: Vec<ElectionError>,
}

impl BiasEstimate {
    /// Positive means the surveys historically over-predicted the party.
    pub fn bias(&self, party: &str) -> f64 {
        share_or(&self.per_party, party, 0.0)
    }
}

/// Average signed survey error per party over barometers that have a
/// matching official result. Unmatched barometers are skipped; with no
/// matches every party's bias is zero.
pub fn estimate_bias(
    barometers: &[HistoricalBarometer],
    official: &HashMap<String, OfficialResult>,
    parties: &[String],
) -> BiasEstimate {
    let mut totals: Shares = parties.iter().map(|p| (p.clone(), 0.0)).collect();
    let mut elections = Vec::new();

    for barometer in barometers {
        let Some(result) = official.get(&barometer.election_id) else {
            debug!("No official result for {}, skipping", barometer.election_id);
            continue;
        };
        debug!("Barometer {} matched official result {}", barometer.election_id, result.election_id);

        let errors: Vec<(String, f64)> = parties
            .iter()
            .map(|party| {
                let predicted = share_or(&barometer.predicted, party, 0.0);
                let actual = share_or(&result.actual, party, 0.0);
                (party.clone(), predicted - actual)
            })
            .collect();

        for (party, error) in &errors {
            if let Some(total) = totals.get_mut(party) {
                *total += error;
            }
            info!(
                "Election {}: {} survey error {:+.2}pp",
                barometer.election_id, party, error
            );
        }

        elections.push(ElectionError {
            election_id: barometer.election_id.clone(),
            errors,
        });
    }

    let matched = elections.len();
    if matched > 0 {
        for total in totals.values_mut() {
            *total /= matched as f64;
        }
    }

    BiasEstimate {
        per_party: totals,
        matched_elections: matched,
        elections,
    }
}
