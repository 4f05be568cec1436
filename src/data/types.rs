use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Party code → percentage. Only numeric payload entries survive deserialization.
pub type Shares = HashMap<String, f64>;

/// One ingested corpus line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub source: String,
    #[serde(default)]
    pub data: Value,
    /// Receipt stamp added by the ingestion server. Unparseable stamps are
    /// dropped rather than failing the whole line.
    #[serde(
        rename = "_received_at",
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub received_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoricalBarometer {
    pub election_id: String,
    #[serde(rename = "data", deserialize_with = "numeric_entries")]
    pub predicted: Shares,
}

#[derive(Debug, Clone)]
pub struct OfficialResult {
    pub election_id: String,
    pub actual: Shares,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollObservation {
    pub date: NaiveDate,
    #[serde(rename = "data", deserialize_with = "numeric_entries")]
    pub values: Shares,
    #[serde(default)]
    pub pollster: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EconomicIndicator {
    pub unemployment_rate: f64,
    #[serde(default, alias = "province")]
    pub region: Option<String>,
}

/// Lookup with an explicit default for parties absent from a share map.
pub fn share_or(shares: &Shares, party: &str, default: f64) -> f64 {
    shares.get(party).copied().unwrap_or(default)
}

/// Keep the numeric entries of a JSON object, dropping annotations such as
/// `source_date` or `is_dynamic` that ride along in the same payload.
pub fn numeric_entries<'de, D>(deserializer: D) -> Result<Shares, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: HashMap<String, Value> = HashMap::deserialize(deserializer)?;
    Ok(shares_from_map(raw))
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Value> = Option::deserialize(deserializer)?;
    let Some(text) = raw.as_ref().and_then(Value::as_str) else {
        return Ok(None);
    };

    let parsed = DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.naive_local())
        .or_else(|_| text.parse::<NaiveDateTime>())
        .ok();
    Ok(parsed)
}

pub fn shares_from_value(value: &Value) -> Shares {
    match value {
        Value::Object(map) => map
            .iter()
            .filter_map(|(k, v)| v.as_f64().map(|n| (k.clone(), n)))
            .collect(),
        _ => Shares::new(),
    }
}

fn shares_from_map(raw: HashMap<String, Value>) -> Shares {
    raw.into_iter()
        .filter_map(|(k, v)| v.as_f64().map(|n| (k, n)))
        .collect()
}
