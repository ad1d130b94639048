use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::models::FreshnessPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub freshness: FreshnessConfig,
    #[serde(default = "default_policies")]
    pub policies: Vec<FreshnessPolicy>,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db: DbConfig::default(),
            freshness: FreshnessConfig::default(),
            policies: default_policies(),
            detection: DetectionConfig::default(),
            batch: BatchConfig::default(),
            fetcher: FetcherConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/fresh.sqlite"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FreshnessConfig {
    #[serde(default = "default_policy_name")]
    pub default_policy: String,
    /// Selection cutoff for `get_stale_items` and `fresh check`. The
    /// `is_stale` flag on a record always uses the fixed
    /// [`STALE_SCORE`](crate::models::STALE_SCORE) of 50; raising this
    /// selects more records without marking them stale.
    #[serde(default = "default_stale_threshold")]
    pub stale_threshold: f64,
    /// Scores below this always need an update.
    #[serde(default = "default_critical_threshold")]
    pub critical_threshold: f64,
    #[serde(default = "default_archive_after_hours")]
    pub archive_after_hours: f64,
    #[serde(default = "default_stale_limit")]
    pub stale_limit: usize,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            default_policy: default_policy_name(),
            stale_threshold: default_stale_threshold(),
            critical_threshold: default_critical_threshold(),
            archive_after_hours: default_archive_after_hours(),
            stale_limit: default_stale_limit(),
        }
    }
}

fn default_policy_name() -> String {
    "standard".to_string()
}
fn default_stale_threshold() -> f64 {
    50.0
}
fn default_critical_threshold() -> f64 {
    30.0
}
fn default_archive_after_hours() -> f64 {
    720.0
}
fn default_stale_limit() -> usize {
    100
}

fn default_policies() -> Vec<FreshnessPolicy> {
    vec![
        FreshnessPolicy::standard(),
        FreshnessPolicy {
            name: "news".to_string(),
            max_age_hours: 24.0,
            stale_threshold_hours: 48.0,
            check_frequency_hours: 6.0,
        },
        FreshnessPolicy {
            name: "evergreen".to_string(),
            max_age_hours: 720.0,
            stale_threshold_hours: 1440.0,
            check_frequency_hours: 168.0,
        },
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectionConfig {
    #[serde(default = "default_significance_threshold")]
    pub significance_threshold: f64,
    #[serde(default = "default_field_weight")]
    pub default_weight: f64,
    #[serde(default = "default_weights")]
    pub weights: BTreeMap<String, f64>,
    #[serde(default = "default_insignificant_fields")]
    pub insignificant_fields: Vec<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            significance_threshold: default_significance_threshold(),
            default_weight: default_field_weight(),
            weights: default_weights(),
            insignificant_fields: default_insignificant_fields(),
        }
    }
}

fn default_significance_threshold() -> f64 {
    0.10
}
fn default_field_weight() -> f64 {
    0.05
}

fn default_weights() -> BTreeMap<String, f64> {
    [
        ("title", 0.40),
        ("description", 0.30),
        ("url", 0.30),
        ("content", 0.25),
        ("image", 0.20),
        ("tags", 0.15),
        ("author", 0.10),
        ("publishedDate", 0.05),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

fn default_insignificant_fields() -> Vec<String> {
    [
        "views",
        "viewCount",
        "likes",
        "likeCount",
        "lastAccessed",
        "lastModified",
        "fetchedAt",
        "lastFetched",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_concurrency() -> usize {
    5
}
fn default_batch_size() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetcherConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            user_agent: default_user_agent(),
        }
    }
}

impl FetcherConfig {
    /// Upper bound for one fetch including retries and their backoff.
    pub fn deadline(&self) -> std::time::Duration {
        let attempts = u64::from(self.max_retries) + 1;
        let backoff: u64 = (1..=self.max_retries).map(|a| 1u64 << (a - 1).min(5)).sum();
        std::time::Duration::from_secs(self.timeout_secs.saturating_mul(attempts).saturating_add(backoff))
    }
}

fn default_timeout_secs() -> u64 {
    15
}
fn default_max_retries() -> u32 {
    2
}
fn default_user_agent() -> String {
    format!("content-freshness/{}", env!("CARGO_PKG_VERSION"))
}

impl Config {
    /// Look up a policy by name, falling back to the default policy.
    pub fn policy(&self, name: Option<&str>) -> FreshnessPolicy {
        let wanted = name.unwrap_or(&self.freshness.default_policy);
        self.policies
            .iter()
            .find(|p| p.name == wanted)
            .or_else(|| {
                self.policies
                    .iter()
                    .find(|p| p.name == self.freshness.default_policy)
            })
            .cloned()
            .unwrap_or_else(FreshnessPolicy::standard)
    }

    pub fn validate(&self) -> Result<()> {
        if self.policies.is_empty() {
            anyhow::bail!("at least one [[policies]] entry is required");
        }
        for (i, policy) in self.policies.iter().enumerate() {
            if policy.name.trim().is_empty() {
                anyhow::bail!("policies[{}].name must not be empty", i);
            }
            if self.policies[..i].iter().any(|p| p.name == policy.name) {
                anyhow::bail!("duplicate policy name: '{}'", policy.name);
            }
            if policy.max_age_hours < 0.0 || policy.check_frequency_hours < 0.0 {
                anyhow::bail!("policy '{}' has negative hours", policy.name);
            }
        }
        if !self
            .policies
            .iter()
            .any(|p| p.name == self.freshness.default_policy)
        {
            anyhow::bail!(
                "freshness.default_policy '{}' does not match any configured policy",
                self.freshness.default_policy
            );
        }

        if !(0.0..=100.0).contains(&self.freshness.stale_threshold) {
            anyhow::bail!("freshness.stale_threshold must be in [0, 100]");
        }
        if !(0.0..=100.0).contains(&self.freshness.critical_threshold) {
            anyhow::bail!("freshness.critical_threshold must be in [0, 100]");
        }

        let archive_after = self.freshness.archive_after_hours;
        if !archive_after.is_finite() || archive_after < 0.0 {
            anyhow::bail!("freshness.archive_after_hours must be a finite number >= 0");
        }

        if !(0.0..=1.0).contains(&self.detection.significance_threshold) {
            anyhow::bail!("detection.significance_threshold must be in [0.0, 1.0]");
        }
        for (field, weight) in &self.detection.weights {
            if !(0.0..=1.0).contains(weight) {
                anyhow::bail!("detection.weights.{} must be in [0.0, 1.0]", field);
            }
        }

        if self.batch.concurrency == 0 {
            anyhow::bail!("batch.concurrency must be >= 1");
        }
        if self.fetcher.timeout_secs == 0 {
            anyhow::bail!("fetcher.timeout_secs must be > 0");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
