use chrono::{Datelike, NaiveDate};
use thiserror::Error;
use tracing::info;

use crate::config::TrendConfig;
use crate::data::types::{share_or, PollObservation, Shares};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrendError {
    #[error("insufficient data: {have} poll observations, need at least {need}")]
    InsufficientData { have: usize, need: usize },
}

/// `value = slope * offset + intercept`, slope in points per month.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trend {
    pub slope: f64,
    pub intercept: f64,
}

impl Trend {
    pub fn value_at(&self, offset: f64) -> f64 {
        self.slope * offset + self.intercept
    }
}

/// Whole months between `epoch` and `date`, ignoring the day of month.
pub fn month_offset(date: NaiveDate, epoch: NaiveDate) -> i32 {
    (date.year() - epoch.year()) * 12 + (date.month() as i32 - epoch.month() as i32)
}

/// Ordinary least squares over `(x, y)` points via the normal equations.
/// Zero variance in `x` gives a flat line through the mean of `y`.
pub fn fit_line(points: &[(f64, f64)]) -> Trend {
    if points.is_empty() {
        return Trend { slope: 0.0, intercept: 0.0 };
    }

    let n = points.len() as f64;
    let (sum_x, sum_y, sum_xy, sum_x2) = points.iter().fold(
        (0.0, 0.0, 0.0, 0.0),
        |(sx, sy, sxy, sx2), &(x, y)| (sx + x, sy + y, sxy + x * y, sx2 + x * x),
    );

    let denominator = n * sum_x2 - sum_x * sum_x;
    if denominator == 0.0 {
        return Trend {
            slope: 0.0,
            intercept: sum_y / n,
        };
    }

    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;
    Trend { slope, intercept }
}

#[derive(Debug, Clone)]
pub struct PartyTrend {
    pub party: String,
    pub trend: Trend,
    /// Fitted value at the latest observation's month.
    pub current: f64,
    /// Fitted value at the target offset. Not clamped.
    pub projected: f64,
}

#[derive(Debug, Clone)]
pub struct TrendProjection {
    pub epoch: NaiveDate,
    pub observations: usize,
    pub latest_offset: i32,
    pub target_offset: i32,
    pub parties: Vec<PartyTrend>,
}

impl TrendProjection {
    #[cfg(test)]
    pub fn projected(&self, party: &str) -> Option<f64> {
        self.parties
            .iter()
            .find(|p| p.party == party)
            .map(|p| p.projected)
    }

    pub fn projected_shares(&self) -> Shares {
        self.parties
            .iter()
            .map(|p| (p.party.clone(), p.projected))
            .collect()
    }
}

pub struct TrendProjector {
    config: TrendConfig,
}

impl TrendProjector {
    pub fn new(config: TrendConfig) -> Self {
        Self { config }
    }

    /// Project each party `horizon_months` past the latest observation.
    /// `series` must be sorted by date.
    pub fn project(
        &self,
        series: &[PollObservation],
        parties: &[String],
    ) -> Result<TrendProjection, TrendError> {
        let epoch = self.epoch_for(series)?;
        let latest_offset = series
            .last()
            .map(|obs| month_offset(obs.date, epoch))
            .unwrap_or(0);

        self.project_to(series, parties, latest_offset + self.config.horizon_months)
    }

    /// Fit each party's line and evaluate it at `target_offset` months from the epoch.
    pub fn project_to(
        &self,
        series: &[PollObservation],
        parties: &[String],
        target_offset: i32,
    ) -> Result<TrendProjection, TrendError> {
        let epoch = self.epoch_for(series)?;

        let offsets: Vec<f64> = series
            .iter()
            .map(|obs| month_offset(obs.date, epoch) as f64)
            .collect();
        let latest_offset = series
            .last()
            .map(|obs| month_offset(obs.date, epoch))
            .unwrap_or(0);

        info!(
            "Fitting trends over {} polls ({} to {}), projecting to month {}",
            series.len(),
            series.first().map(|o| o.date.to_string()).unwrap_or_default(),
            series.last().map(|o| o.date.to_string()).unwrap_or_default(),
            target_offset
        );

        let parties = parties
            .iter()
            .map(|party| {
                let points: Vec<(f64, f64)> = offsets
                    .iter()
                    .zip(series)
                    .map(|(&x, obs)| (x, share_or(&obs.values, party, 0.0)))
                    .collect();

                let trend = fit_line(&points);
                let current = trend.value_at(latest_offset as f64);
                let projected = trend.value_at(target_offset as f64);

                info!(
                    "{} trend {:+.3}pp/month: now {:.1}% -> {:.1}% ({:+.1}pp)",
                    party,
                    trend.slope,
                    current,
                    projected,
                    projected - current
                );

                PartyTrend {
                    party: party.clone(),
                    trend,
                    current,
                    projected,
                }
            })
            .collect();

        Ok(TrendProjection {
            epoch,
            observations: series.len(),
            latest_offset,
            target_offset,
            parties,
        })
    }

    fn epoch_for(&self, series: &[PollObservation]) -> Result<NaiveDate, TrendError> {
        if series.len() < self.config.min_samples {
            return Err(TrendError::InsufficientData {
                have: series.len(),
                need: self.config.min_samples,
            });
        }

        let earliest = series.iter().map(|obs| obs.date).min();
        match (self.config.epoch, earliest) {
            (Some(epoch), _) => Ok(epoch),
            (None, Some(earliest)) => Ok(earliest),
            (None, None) => Err(TrendError::InsufficientData {
                have: 0,
                need: self.config.min_samples,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn obs(d: NaiveDate, pairs: &[(&str, f64)]) -> PollObservation {
        PollObservation {
            date: d,
            values: pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            pollster: None,
        }
    }

    fn projector(min_samples: usize) -> TrendProjector {
        TrendProjector::new(TrendConfig {
            epoch: None,
            horizon_months: 12,
            min_samples,
        })
    }

    #[test]
    fn test_month_offset_whole_months() {
        let epoch = date(2025, 7, 1);
        assert_eq!(month_offset(date(2025, 7, 31), epoch), 0);
        assert_eq!(month_offset(date(2025, 12, 1), epoch), 5);
        assert_eq!(month_offset(date(2026, 1, 26), epoch), 6);
        assert_eq!(month_offset(date(2027, 1, 1), epoch), 18);
        assert_eq!(month_offset(date(2025, 6, 30), epoch), -1);
    }

    #[test]
    fn test_fit_recovers_noise_free_line() {
        let (slope, intercept) = (-0.37, 28.4);
        let points: Vec<(f64, f64)> = (0..12)
            .map(|x| (x as f64, slope * x as f64 + intercept))
            .collect();

        let trend = fit_line(&points);

        assert!((trend.slope - slope).abs() < 1e-9);
        assert!((trend.intercept - intercept).abs() < 1e-9);
    }

    #[test]
    fn test_fit_with_repeated_offsets() {
        let points = [(0.0, 10.0), (0.0, 12.0), (2.0, 14.0), (2.0, 16.0), (4.0, 19.0)];
        let trend = fit_line(&points);
        // Hand-computed: n=5, Σx=8, Σy=71, Σxy=136, Σx²=24
        let expected_slope = (5.0 * 136.0 - 8.0 * 71.0) / (5.0 * 24.0 - 64.0);
        assert!((trend.slope - expected_slope).abs() < 1e-12);
        assert!((trend.intercept - (71.0 - expected_slope * 8.0) / 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_variance_is_flat_mean() {
        let points = [(3.0, 10.0), (3.0, 20.0), (3.0, 30.0)];
        let trend = fit_line(&points);
        assert_eq!(trend.slope, 0.0);
        assert_eq!(trend.intercept, 20.0);
    }

    #[test]
    fn test_insufficient_data_reported() {
        let series: Vec<_> = (1..=4).map(|m| obs(date(2025, m, 1), &[("A", 30.0)])).collect();
        let parties = vec!["A".to_string()];

        let err = projector(5).project(&series, &parties).unwrap_err();
        assert_eq!(err, TrendError::InsufficientData { have: 4, need: 5 });

        let err = projector(5).project(&[], &parties).unwrap_err();
        assert_eq!(err, TrendError::InsufficientData { have: 0, need: 5 });
    }

    #[test]
    fn test_projection_recovers_monthly_trend() {
        // One poll per month, +0.5pp per month from 20% in July 2025.
        let series: Vec<_> = (0..7)
            .map(|i| {
                let d = date(2025, 7, 1) + chrono::Months::new(i);
                obs(d, &[("A", 20.0 + 0.5 * i as f64)])
            })
            .collect();
        let parties = vec!["A".to_string(), "B".to_string()];

        let projection = projector(5).project(&series, &parties).unwrap();

        assert_eq!(projection.epoch, date(2025, 7, 1));
        assert_eq!(projection.latest_offset, 6);
        assert_eq!(projection.target_offset, 18);
        let a = &projection.parties[0];
        assert!((a.trend.slope - 0.5).abs() < 1e-9);
        assert!((a.current - 23.0).abs() < 1e-9);
        assert!((a.projected - 29.0).abs() < 1e-9);
        // B never polled: a flat zero line.
        assert_eq!(projection.projected("B"), Some(0.0));
    }

    #[test]
    fn test_projection_not_clamped() {
        let series: Vec<_> = (0..5)
            .map(|i| obs(date(2025, 1 + i, 1), &[("A", 4.0 - 1.0 * i as f64)]))
            .collect();
        let parties = vec!["A".to_string()];

        let projection = projector(5).project(&series, &parties).unwrap();
        assert!(projection.projected("A").unwrap() < 0.0);
    }

    #[test]
    fn test_configured_epoch_and_explicit_target() {
        let series: Vec<_> = (0..5)
            .map(|i| obs(date(2025, 8 + i, 15), &[("A", 10.0 + i as f64)]))
            .collect();
        let parties = vec!["A".to_string()];
        let projector = TrendProjector::new(TrendConfig {
            epoch: Some(date(2025, 7, 1)),
            horizon_months: 12,
            min_samples: 5,
        });

        let projection = projector.project_to(&series, &parties, 18).unwrap();

        // Offsets 1..=5 with values 10..=14: value = offset + 9
        assert!((projection.projected("A").unwrap() - 27.0).abs() < 1e-9);
        assert_eq!(projection.latest_offset, 5);
    }
}
