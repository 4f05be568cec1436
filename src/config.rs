use anyhow::{ensure, Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub parties: PartyConfig,
    #[serde(default)]
    pub sources: SourceTags,
    #[serde(default)]
    pub trend: TrendConfig,
    #[serde(default)]
    pub hidden_signal: HiddenSignalConfig,
    #[serde(default)]
    pub economic: EconomicConfig,
    #[serde(default)]
    pub blend: BlendConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "default_corpus_path")]
    pub corpus_path: String,
    #[serde(default = "default_output_path")]
    pub output_path: String,
}

/// Party enumeration and the static classifications hanging off it.
/// `tracked` order is the enumeration order used for tie-breaks.
#[derive(Debug, Clone, Deserialize)]
pub struct PartyConfig {
    #[serde(default = "default_tracked")]
    pub tracked: Vec<String>,
    #[serde(default = "default_incumbent")]
    pub incumbent: Vec<String>,
    #[serde(default = "default_opposition")]
    pub opposition: Vec<String>,
    #[serde(default = "default_signal_keys")]
    pub signal_keys: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceTags {
    #[serde(default = "default_tag_historical")]
    pub historical_barometers: String,
    #[serde(default = "default_tag_official")]
    pub official_results: String,
    #[serde(default = "default_tag_stated")]
    pub stated_support: String,
    #[serde(default = "default_tag_latest")]
    pub latest_poll: String,
    #[serde(default = "default_tag_series")]
    pub poll_series: String,
    #[serde(default = "default_tag_interest")]
    pub interest_signal: String,
    #[serde(default = "default_tag_economic")]
    pub economic_indicators: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrendConfig {
    /// Month-offset origin. When unset the earliest observation's month is used.
    #[serde(default)]
    pub epoch: Option<NaiveDate>,
    #[serde(default = "default_horizon_months")]
    pub horizon_months: i32,
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HiddenSignalConfig {
    #[serde(default = "default_ratio_threshold")]
    pub ratio_threshold: f64,
    #[serde(default = "default_support_floor")]
    pub support_floor: f64,
    #[serde(default = "default_bonus")]
    pub bonus: f64,
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    /// Stated support assumed for a party missing from the current barometer.
    #[serde(default = "default_missing_support")]
    pub missing_support_default: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EconomicConfig {
    #[serde(default = "default_unemployment_threshold")]
    pub threshold: f64,
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlendConfig {
    #[serde(default = "default_half")]
    pub bias_weight: f64,
    #[serde(default = "default_half")]
    pub economic_weight: f64,
    #[serde(default = "default_corrected_weight")]
    pub corrected_weight: f64,
    #[serde(default = "default_observed_weight")]
    pub observed_weight: f64,
    #[serde(default = "default_half")]
    pub floor_threshold: f64,
    #[serde(default = "default_half")]
    pub floor_fraction: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_max_payload")]
    pub max_payload_bytes: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
}

fn default_corpus_path() -> String { "data/raw_data.jsonl".to_string() }
fn default_output_path() -> String { "data/final_prediction.csv".to_string() }

fn default_tracked() -> Vec<String> { to_strings(&["PSOE", "PP", "VOX", "SUMAR"]) }
fn default_incumbent() -> Vec<String> { to_strings(&["PSOE", "SUMAR"]) }
fn default_opposition() -> Vec<String> { to_strings(&["PP", "VOX"]) }
fn default_signal_keys() -> HashMap<String, String> {
    [
        ("PSOE", "Sanchez_Interest"),
        ("PP", "Feijoo_Interest"),
        ("VOX", "Abascal_Interest"),
        ("SUMAR", "Diaz_Interest"),
    ]
    .into_iter()
    .map(|(party, key)| (party.to_string(), key.to_string()))
    .collect()
}

fn default_tag_historical() -> String { "CIS_HISTORICAL_MULTI".to_string() }
fn default_tag_official() -> String { "OFFICIAL_MULTI".to_string() }
fn default_tag_stated() -> String { "CIS_CURRENT".to_string() }
fn default_tag_latest() -> String { "ELECTOMANIA".to_string() }
fn default_tag_series() -> String { "ELECTOMANIA_HISTORICAL".to_string() }
fn default_tag_interest() -> String { "GOOGLE_TRENDS".to_string() }
fn default_tag_economic() -> String { "ECONOMIC_CONTEXT".to_string() }

fn default_horizon_months() -> i32 { 12 }
fn default_min_samples() -> usize { 5 }

fn default_ratio_threshold() -> f64 { 5.0 }
fn default_support_floor() -> f64 { 2.0 }
fn default_bonus() -> f64 { 1.5 }
fn default_epsilon() -> f64 { 1e-9 }
fn default_missing_support() -> f64 { 1.0 }

fn default_unemployment_threshold() -> f64 { 15.0 }
fn default_sensitivity() -> f64 { 0.2 }

fn default_half() -> f64 { 0.5 }
fn default_corrected_weight() -> f64 { 0.7 }
fn default_observed_weight() -> f64 { 0.3 }

fn default_bind_addr() -> String { "127.0.0.1:9999".to_string() }
fn default_max_payload() -> usize { 1024 * 1024 }
fn default_queue_capacity() -> usize { 256 }
fn default_read_timeout() -> u64 { 30 }

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            corpus_path: default_corpus_path(),
            output_path: default_output_path(),
        }
    }
}

impl Default for PartyConfig {
    fn default() -> Self {
        Self {
            tracked: default_tracked(),
            incumbent: default_incumbent(),
            opposition: default_opposition(),
            signal_keys: default_signal_keys(),
        }
    }
}

impl Default for SourceTags {
    fn default() -> Self {
        Self {
            historical_barometers: default_tag_historical(),
            official_results: default_tag_official(),
            stated_support: default_tag_stated(),
            latest_poll: default_tag_latest(),
            poll_series: default_tag_series(),
            interest_signal: default_tag_interest(),
            economic_indicators: default_tag_economic(),
        }
    }
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            epoch: None,
            horizon_months: default_horizon_months(),
            min_samples: default_min_samples(),
        }
    }
}

impl Default for HiddenSignalConfig {
    fn default() -> Self {
        Self {
            ratio_threshold: default_ratio_threshold(),
            support_floor: default_support_floor(),
            bonus: default_bonus(),
            epsilon: default_epsilon(),
            missing_support_default: default_missing_support(),
        }
    }
}

impl Default for EconomicConfig {
    fn default() -> Self {
        Self {
            threshold: default_unemployment_threshold(),
            sensitivity: default_sensitivity(),
        }
    }
}

impl Default for BlendConfig {
    fn default() -> Self {
        Self {
            bias_weight: default_half(),
            economic_weight: default_half(),
            corrected_weight: default_corrected_weight(),
            observed_weight: default_observed_weight(),
            floor_threshold: default_half(),
            floor_fraction: default_half(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_payload_bytes: default_max_payload(),
            queue_capacity: default_queue_capacity(),
            read_timeout_secs: default_read_timeout(),
        }
    }
}

/// Overrides read from the process environment (and `.env`, if present).
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub corpus_path: Option<String>,
    pub output_path: Option<String>,
    pub bind_addr: Option<String>,
}

impl Config {
    /// Load from a TOML file. A missing file yields the reference defaults.
    pub fn load(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            tracing::info!("Config file {} not found, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        Ok(config)
    }

    pub fn apply_env(&mut self, env: &EnvConfig) {
        if let Some(path) = &env.corpus_path {
            self.system.corpus_path = path.clone();
        }
        if let Some(path) = &env.output_path {
            self.system.output_path = path.clone();
        }
        if let Some(addr) = &env.bind_addr {
            self.ingest.bind_addr = addr.clone();
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.parties.tracked.is_empty(), "parties.tracked must not be empty");
        for party in &self.parties.tracked {
            // Party codes are written unquoted into the CSV output.
            ensure!(
                !party.is_empty() && !party.contains(&[',', '"', '\r', '\n'][..]),
                "party code {:?} must be non-empty and contain no CSV delimiters",
                party
            );
        }

        for party in self.parties.incumbent.iter().chain(&self.parties.opposition) {
            ensure!(
                self.parties.tracked.contains(party),
                "bloc member {} is not a tracked party",
                party
            );
        }
        if let Some(party) = self
            .parties
            .incumbent
            .iter()
            .find(|p| self.parties.opposition.contains(*p))
        {
            anyhow::bail!("party {} is both incumbent and opposition", party);
        }

        ensure!(self.trend.min_samples >= 2, "trend.min_samples must be at least 2");

        let weights = [
            ("blend.bias_weight", self.blend.bias_weight),
            ("blend.economic_weight", self.blend.economic_weight),
            ("blend.corrected_weight", self.blend.corrected_weight),
            ("blend.observed_weight", self.blend.observed_weight),
            ("blend.floor_fraction", self.blend.floor_fraction),
            ("economic.sensitivity", self.economic.sensitivity),
            ("hidden_signal.epsilon", self.hidden_signal.epsilon),
        ];
        for (name, value) in weights {
            ensure!(value.is_finite() && value >= 0.0, "{} must be non-negative, got {}", name, value);
        }
        ensure!(self.hidden_signal.epsilon > 0.0, "hidden_signal.epsilon must be positive");

        ensure!(self.ingest.max_payload_bytes > 0, "ingest.max_payload_bytes must be positive");
        ensure!(self.ingest.queue_capacity > 0, "ingest.queue_capacity must be positive");
        ensure!(self.ingest.read_timeout_secs > 0, "ingest.read_timeout_secs must be positive");
        self.ingest
            .bind_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid ingest.bind_addr: {}", self.ingest.bind_addr))?;

        Ok(())
    }
}

impl EnvConfig {
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        Ok(Self {
            corpus_path: std::env::var("POLL_FUSION_CORPUS").ok(),
            output_path: std::env::var("POLL_FUSION_OUTPUT").ok(),
            bind_addr: std::env::var("POLL_FUSION_BIND").ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_reference_defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_eq!(config.parties.tracked, vec!["PSOE", "PP", "VOX", "SUMAR"]);
        assert_eq!(config.trend.min_samples, 5);
        assert_eq!(config.trend.horizon_months, 12);
        assert_eq!(config.hidden_signal.ratio_threshold, 5.0);
        assert_eq!(config.economic.threshold, 15.0);
        assert_eq!(config.blend.corrected_weight, 0.7);
        assert_eq!(config.ingest.max_payload_bytes, 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_override() {
        let config: Config = toml::from_str(
            r#"
            [parties]
            tracked = ["A", "B"]
            incumbent = ["A"]
            opposition = []

            [trend]
            epoch = "2025-07-01"
            min_samples = 3

            [economic]
            threshold = 10.0
            "#,
        )
        .unwrap();

        assert_eq!(config.parties.tracked, vec!["A", "B"]);
        assert_eq!(config.trend.epoch, NaiveDate::from_ymd_opt(2025, 7, 1));
        assert_eq!(config.trend.min_samples, 3);
        assert_eq!(config.economic.threshold, 10.0);
        assert_eq!(config.economic.sensitivity, 0.2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_untracked_bloc_member() {
        let mut config = Config::default();
        config.parties.opposition.push("PODEMOS".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_weight() {
        let mut config = Config::default();
        config.blend.observed_weight = -0.3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_csv_breaking_party_codes() {
        for code in ["PSOE,PSC", "\"PP\"", "VOX\n", ""] {
            let mut config = Config::default();
            config.parties.tracked.push(code.to_string());
            assert!(config.validate().is_err(), "accepted {:?}", code);
        }
    }

    #[test]
    fn test_env_overrides_paths() {
        let mut config = Config::default();
        let env = EnvConfig {
            corpus_path: Some("/tmp/corpus.jsonl".to_string()),
            output_path: None,
            bind_addr: Some("0.0.0.0:7000".to_string()),
        };
        config.apply_env(&env);

        assert_eq!(config.system.corpus_path, "/tmp/corpus.jsonl");
        assert_eq!(config.system.output_path, "data/final_prediction.csv");
        assert_eq!(config.ingest.bind_addr, "0.0.0.0:7000");
    }
}
