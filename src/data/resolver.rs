use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

use crate::data::types::{
    shares_from_value, EconomicIndicator, HistoricalBarometer, OfficialResult, PollObservation,
    Record, Shares,
};

/// Payload of the first record tagged `source_tag`, in store order.
pub fn find<'a>(records: &'a [Record], source_tag: &str) -> Option<&'a Value> {
    records
        .iter()
        .find(|r| r.source == source_tag)
        .map(|r| &r.data)
}

pub fn find_or<'a>(records: &'a [Record], source_tag: &str, default: &'a Value) -> &'a Value {
    find(records, source_tag).unwrap_or(default)
}

/// Resolve a list payload, dropping elements that do not match `T`.
pub fn find_list<T: DeserializeOwned>(records: &[Record], source_tag: &str) -> Vec<T> {
    let Some(value) = find(records, source_tag) else {
        return Vec::new();
    };

    let Some(items) = value.as_array() else {
        warn!("Expected a list payload for {}, ignoring", source_tag);
        return Vec::new();
    };

    let parsed: Vec<T> = items
        .iter()
        .filter_map(|item| serde_json::from_value(item.clone()).ok())
        .collect();

    if parsed.len() < items.len() {
        warn!(
            "Dropped {} malformed entries from {}",
            items.len() - parsed.len(),
            source_tag
        );
    }
    parsed
}

/// Resolve a flat `key → number` payload. Absent or non-object payloads
/// resolve to an empty map.
pub fn find_shares(records: &[Record], source_tag: &str) -> Shares {
    let absent = Value::Null;
    shares_from_value(find_or(records, source_tag, &absent))
}

pub fn find_barometers(records: &[Record], source_tag: &str) -> Vec<HistoricalBarometer> {
    find_list(records, source_tag)
}

pub fn find_poll_series(records: &[Record], source_tag: &str) -> Vec<PollObservation> {
    let mut series: Vec<PollObservation> = find_list(records, source_tag);
    // Stable, so same-day observations keep their corpus order.
    series.sort_by_key(|obs| obs.date);
    series
}

pub fn find_economic_indicators(records: &[Record], source_tag: &str) -> Vec<EconomicIndicator> {
    find_list(records, source_tag)
}

/// Official results arrive as one object keyed by election id.
pub fn find_official_results(
    records: &[Record],
    source_tag: &str,
) -> HashMap<String, OfficialResult> {
    let Some(Value::Object(map)) = find(records, source_tag) else {
        return HashMap::new();
    };

    map.iter()
        .filter(|(_, v)| v.is_object())
        .map(|(election_id, v)| {
            (
                election_id.clone(),
                OfficialResult {
                    election_id: election_id.clone(),
                    actual: shares_from_value(v),
                },
            )
        })
        .collect()
}
