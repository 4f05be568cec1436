use tracing::{info, warn};

use crate::analysis::bias::{estimate_bias, BiasEstimate};
use crate::analysis::blender::{BlendInputs, ForecastBlender, ForecastEstimate};
use crate::analysis::economic::{economic_correction, EconomicCorrection};
use crate::analysis::hidden_signal::{HiddenSignalDetector, HiddenSignalReport};
use crate::analysis::trend::{TrendError, TrendProjection, TrendProjector};
use crate::config::Config;
use crate::data::resolver;
use crate::data::store::CorpusSnapshot;
use crate::data::types::{PollObservation, Shares};

/// Everything one run derived from a corpus snapshot.
#[derive(Debug, Clone)]
pub struct ForecastReport {
    pub records: usize,
    pub skipped_lines: usize,
    pub bias: BiasEstimate,
    pub trend: Result<TrendProjection, TrendError>,
    pub hidden: HiddenSignalReport,
    pub economic: EconomicCorrection,
    pub forecast: ForecastEstimate,
}

/// Run every stage over one snapshot. Thin inputs degrade to neutral
/// defaults; this never fails.
pub fn run(config: &Config, snapshot: &CorpusSnapshot) -> ForecastReport {
    let records = &snapshot.records;
    let tags = &config.sources;
    let parties = &config.parties.tracked;

    info!("Stage 1/5: economic context");
    let indicators = resolver::find_economic_indicators(records, &tags.economic_indicators);
    let economic = economic_correction(&indicators, &config.economic);

    info!("Stage 2/5: historical survey bias");
    let barometers = resolver::find_barometers(records, &tags.historical_barometers);
    let official = resolver::find_official_results(records, &tags.official_results);
    let bias = estimate_bias(&barometers, &official, parties);
    if bias.matched_elections == 0 {
        info!("No barometer matched an official result, bias correction disabled");
    } else {
        for party in parties {
            info!("Average bias {}: {:+.2}pp", party, bias.bias(party));
        }
    }

    info!("Stage 3/5: trend projection");
    let series = resolver::find_poll_series(records, &tags.poll_series);
    if let Some(last) = series.last() {
        info!(
            "{} polls in series, latest {} ({})",
            series.len(),
            last.date,
            last.pollster.as_deref().unwrap_or("unknown pollster")
        );
    }
    let trend = TrendProjector::new(config.trend.clone()).project(&series, parties);
    let base: Shares = match &trend {
        Ok(projection) => projection.projected_shares(),
        Err(e) => {
            warn!("Trend projection unavailable ({}), using 0 as base", e);
            Shares::new()
        }
    };

    info!("Stage 4/5: hidden-support detection");
    let interest = resolver::find_shares(records, &tags.interest_signal);
    let stated = resolver::find_shares(records, &tags.stated_support);
    let hidden = HiddenSignalDetector::new(config.hidden_signal.clone()).detect(
        &interest,
        &stated,
        parties,
        &config.parties.signal_keys,
    );

    info!("Stage 5/5: blending");
    let snapshot_poll = resolver::find_shares(records, &tags.latest_poll);
    let latest_observed = latest_observed(&snapshot_poll, &series, parties);
    let forecast = ForecastBlender::new(config.blend.clone()).blend(
        &config.parties,
        &BlendInputs {
            base: &base,
            bias: &bias,
            economic: &economic,
            hidden: &hidden,
            latest_observed: &latest_observed,
        },
    );

    ForecastReport {
        records: snapshot.records.len(),
        skipped_lines: snapshot.skipped,
        bias,
        trend,
        hidden,
        economic,
        forecast,
    }
}

/// Latest observed value per party: the latest-poll snapshot first, then the
/// most recent observation in the series that mentions the party.
fn latest_observed(snapshot: &Shares, series: &[PollObservation], parties: &[String]) -> Shares {
    parties
        .iter()
        .filter_map(|party| {
            snapshot
                .get(party)
                .copied()
                .or_else(|| series.iter().rev().find_map(|obs| obs.values.get(party).copied()))
                .map(|value| (party.clone(), value))
        })
        .collect()
}
