use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

use crate::config::SourceTags;
use crate::data::types::Record;

/// Biweekly poll series, oldest first: (date, PP, PSOE, VOX, SUMAR).
const POLL_SERIES: [(&str, f64, f64, f64, f64); 15] = [
    ("2025-07-14", 27.6, 31.8, 14.8, 15.4),
    ("2025-07-28", 27.9, 31.5, 15.1, 15.1),
    ("2025-08-11", 28.2, 31.2, 15.4, 14.8),
    ("2025-08-25", 28.5, 30.8, 15.7, 14.5),
    ("2025-09-08", 28.8, 30.4, 16.1, 14.2),
    ("2025-09-22", 29.2, 30.0, 16.4, 13.9),
    ("2025-10-06", 29.7, 29.5, 16.8, 13.5),
    ("2025-10-20", 30.2, 29.1, 17.2, 13.1),
    ("2025-11-03", 30.8, 28.7, 17.5, 12.7),
    ("2025-11-17", 31.3, 28.2, 17.9, 12.3),
    ("2025-12-01", 31.9, 27.8, 18.2, 11.9),
    ("2025-12-15", 32.7, 27.0, 18.5, 11.5),
    ("2025-12-29", 33.1, 26.5, 18.9, 11.2),
    ("2026-01-12", 31.8, 27.2, 19.4, 10.8),
    ("2026-01-26", 32.3, 26.9, 19.7, 10.5),
];

/// (province, unemployment %, average income in EUR)
const PROVINCES: [(&str, f64, u32); 16] = [
    ("Cadiz", 24.1, 19_800),
    ("Jaen", 22.3, 18_900),
    ("Sevilla", 20.6, 21_400),
    ("Malaga", 18.7, 22_100),
    ("Badajoz", 21.5, 18_600),
    ("Almeria", 19.4, 20_300),
    ("Valencia", 14.2, 24_700),
    ("Murcia", 15.1, 22_800),
    ("Zaragoza", 12.4, 26_200),
    ("Asturias", 13.6, 25_100),
    ("A Coruna", 12.9, 25_400),
    ("Toledo", 16.2, 22_500),
    ("Madrid", 10.1, 33_500),
    ("Barcelona", 10.8, 31_200),
    ("Bizkaia", 9.2, 32_400),
    ("Navarra", 8.7, 31_800),
];

fn record(source: &str, data: Value) -> Record {
    Record {
        source: source.to_string(),
        data,
        received_at: None,
    }
}

/// Deterministic reference corpus covering every source the pipeline reads.
pub fn reference_corpus(tags: &SourceTags) -> Vec<Record> {
    let historical = json!([
        {"election_id": "23J-2023", "data": {"PSOE": 32.2, "PP": 30.8, "SUMAR": 14.9, "VOX": 11.8}},
        {"election_id": "10N-2019", "data": {"PSOE": 32.7, "PP": 22.3, "VOX": 8.2, "SUMAR": 9.6}},
        {"election_id": "28A-2019", "data": {"PSOE": 29.5, "PP": 21.0, "VOX": 11.5, "SUMAR": 13.8}},
        {"election_id": "BAR-DEC2025", "data": {"PSOE": 27.4, "PP": 34.1, "VOX": 16.2, "SUMAR": 4.1}},
        {"election_id": "BAR-OCT2025", "data": {"PSOE": 28.6, "PP": 33.2, "VOX": 15.4, "SUMAR": 5.3}},
    ]);

    let official = json!({
        "23J-2023": {"PP": 33.06, "PSOE": 31.68, "VOX": 12.38, "SUMAR": 12.31, "participation": 70.4},
        "10N-2019": {"PSOE": 28.00, "PP": 20.82, "VOX": 15.09, "SUMAR": 12.84},
        "28A-2019": {"PSOE": 28.67, "PP": 16.7, "VOX": 10.26, "SUMAR": 14.31},
    });

    let current = json!({
        "PSOE": 26.7, "PP": 35.3, "VOX": 15.1, "SUMAR": 2.5,
        "source_date": "Jan 2026",
    });

    let series: Vec<Value> = POLL_SERIES
        .iter()
        .map(|&(date, pp, psoe, vox, sumar)| {
            json!({
                "date": date,
                "pollster": "Electomania",
                "data": {"PP": pp, "PSOE": psoe, "VOX": vox, "SUMAR": sumar},
            })
        })
        .collect();

    let (_, pp, psoe, vox, sumar) = POLL_SERIES[POLL_SERIES.len() - 1];
    let latest = json!({
        "PP": pp, "PSOE": psoe, "VOX": vox, "SUMAR": sumar,
        "source": "Electomania Latest",
    });

    let interest = json!({
        "Feijoo_Interest": 65,
        "Sanchez_Interest": 70,
        "Abascal_Interest": 45,
        "Diaz_Interest": 50,
        "source": "reference snapshot",
        "is_dynamic": false,
    });

    let economic: Vec<Value> = PROVINCES
        .iter()
        .map(|&(province, rate, income)| {
            json!({"province": province, "unemployment_rate": rate, "avg_income_eur": income})
        })
        .collect();

    vec![
        record(&tags.historical_barometers, historical),
        record(&tags.official_results, official),
        record(&tags.stated_support, current),
        record(&tags.poll_series, Value::Array(series)),
        record(&tags.latest_poll, latest),
        record(&tags.interest_signal, interest),
        record(&tags.economic_indicators, Value::Array(economic)),
    ]
}

/// Write `records` as a fresh corpus. An existing file is only replaced
/// when `force` is set.
pub fn write_corpus(path: &Path, records: &[Record], force: bool) -> Result<usize> {
    if path.exists() && !force {
        bail!(
            "Corpus {} already exists, pass --force to overwrite",
            path.display()
        );
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create corpus directory: {}", parent.display()))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("Failed to open corpus: {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;

    info!("Seeded {} records into {}", records.len(), path.display());
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::data::store::read_corpus;
    use crate::pipeline;

    #[test]
    fn test_seed_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.jsonl");
        fs::write(&path, "keep me\n").unwrap();

        let records = reference_corpus(&SourceTags::default());
        assert!(write_corpus(&path, &records, false).is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "keep me\n");

        assert_eq!(write_corpus(&path, &records, true).unwrap(), records.len());
        assert_eq!(read_corpus(&path).unwrap().records.len(), records.len());
    }

    #[test]
    fn test_seeded_corpus_drives_every_stage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("raw.jsonl");
        let config = Config::default();

        write_corpus(&path, &reference_corpus(&config.sources), false).unwrap();
        let snapshot = read_corpus(&path).unwrap();
        assert_eq!(snapshot.skipped, 0);

        let report = pipeline::run(&config, &snapshot);

        assert_eq!(report.bias.matched_elections, 3);
        let trend = report.trend.as_ref().unwrap();
        assert_eq!(trend.observations, POLL_SERIES.len());
        assert_eq!(report.economic.regions, PROVINCES.len());
        assert!(report.economic.mean_unemployment.is_some());

        let ranking = report.forecast.ranking();
        assert_eq!(ranking.len(), 4);
        assert!(ranking.iter().all(|(_, estimate)| *estimate >= 0.0));
        // Diaz interest is twenty times SUMAR's stated support.
        assert!(report.hidden.flagged().any(|a| a.party == "SUMAR"));
    }
}
