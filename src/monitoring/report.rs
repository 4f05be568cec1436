use anyhow::{Context, Result};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::analysis::blender::ForecastEstimate;
use crate::pipeline::ForecastReport;

pub const CSV_HEADER: &str = "Party,Estimated %";

/// Writes the ranked forecast table as CSV.
pub struct CsvReportWriter {
    path: PathBuf,
}

impl CsvReportWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the output with a header row and one row per party,
    /// highest estimate first.
    pub fn write(&self, forecast: &ForecastEstimate) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open output file: {}", self.path.display()))?;

        writeln!(file, "{}", CSV_HEADER)?;
        for (party, estimate) in forecast.ranking() {
            writeln!(file, "{},{:.2}", party, estimate)?;
        }

        Ok(())
    }
}

/// Human-readable summary of a run for the console.
impl fmt::Display for ForecastReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(44);

        writeln!(f, "{}", rule)?;
        writeln!(f, "   VOTE SHARE FORECAST")?;
        writeln!(f, "{}", rule)?;
        writeln!(
            f,
            "Corpus: {} records ({} malformed lines skipped)",
            self.records, self.skipped_lines
        )?;

        match self.economic.mean_unemployment {
            Some(mean) => writeln!(
                f,
                "Mean unemployment: {:.2}% over {} regions -> bloc correction {:.2}pp",
                mean, self.economic.regions, self.economic.magnitude
            )?,
            None => writeln!(f, "Mean unemployment: n/a")?,
        }
        match &self.trend {
            Ok(projection) => writeln!(
                f,
                "Trend: {} polls, month {} -> month {} (epoch {})",
                projection.observations,
                projection.latest_offset,
                projection.target_offset,
                projection.epoch.format("%Y-%m")
            )?,
            Err(e) => writeln!(f, "Trend: {}", e)?,
        }

        writeln!(f)?;
        writeln!(f, "Survey error by election ({} matched):", self.bias.matched_elections)?;
        for election in &self.bias.elections {
            write!(f, "  {:12}", election.election_id)?;
            for (party, error) in &election.errors {
                write!(f, " {} {:+.2}", party, error)?;
            }
            writeln!(f)?;
        }

        if !self.hidden.assessments.is_empty() {
            writeln!(f)?;
            writeln!(f, "Interest vs stated support:")?;
            for a in &self.hidden.assessments {
                let mark = if a.flagged { "  <- hidden support" } else { "" };
                writeln!(
                    f,
                    "  {:10} interest {:6.1} / stated {:5.2}% = ratio {:6.2}{}",
                    a.party, a.signal, a.stated_support, a.ratio, mark
                )?;
            }
            let flagged: Vec<&str> = self.hidden.flagged().map(|a| a.party.as_str()).collect();
            if !flagged.is_empty() {
                writeln!(f, "  Flagged: {}", flagged.join(", "))?;
            }
        }
        writeln!(f)?;

        for p in &self.forecast.parties {
            writeln!(f, "{}:", p.party)?;
            let party_trend = self
                .trend
                .as_ref()
                .ok()
                .and_then(|t| t.parties.iter().find(|pt| pt.party == p.party));
            if let Some(pt) = party_trend {
                writeln!(
                    f,
                    "  Trend now:       {:.2}% ({:+.3}pp/month, {:+.2}pp to target)",
                    pt.current,
                    pt.trend.slope,
                    pt.projected - pt.current
                )?;
            }
            writeln!(f, "  Projection:      {:.2}%", p.base)?;
            writeln!(f, "  Survey bias:     {:+.2}pp", p.bias_term)?;
            if p.economic_term != 0.0 {
                writeln!(f, "  Economic factor: {:+.2}pp", p.economic_term)?;
            }
            if p.hidden_bonus != 0.0 {
                writeln!(f, "  Hidden support:  {:+.2}pp", p.hidden_bonus)?;
            }
            writeln!(f, "  Corrected:       {:.2}%", p.corrected)?;
            writeln!(f, "  Latest observed: {:.2}%", p.latest_observed)?;
            let floor_note = if p.floored { " (floored)" } else { "" };
            writeln!(f, "  -> Final:        {:.2}%{}", p.estimate, floor_note)?;
        }

        writeln!(f)?;
        writeln!(f, "{}", "-".repeat(24))?;
        for (party, estimate) in self.forecast.ranking() {
            writeln!(f, "{:10} | {:.2}%", party, estimate)?;
        }

        Ok(())
    }
}
