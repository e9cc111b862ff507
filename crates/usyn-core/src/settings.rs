//! Tuning configuration loaded from TOML.
//!
//! - `parse_tuning_toml(toml_content)` parses and validates a configuration
//! - `TuningSettings::embedded()` parses the embedded default
//! - Default values are embedded via `include_str!("default_tuning.toml")`

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::crf::{CandidateMode, FeatureSet, FeatureSetKind};
use crate::tuning::{Aggregation, FailurePolicy, Metric, Strategy};

pub const DEFAULT_TUNING_TOML: &str = include_str!("default_tuning.toml");

/// Returns the embedded default tuning TOML content.
pub fn default_toml() -> &'static str {
    DEFAULT_TUNING_TOML
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("TOML parse error: {0}")]
    Parse(String),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningSettings {
    pub search: SearchSettings,
    pub cache: CacheSettings,
    #[serde(rename = "range", default)]
    pub ranges: Vec<RangeSpec>,
}

impl TuningSettings {
    pub fn embedded() -> Result<Self, SettingsError> {
        parse_tuning_toml(DEFAULT_TUNING_TOML)
    }

    /// The configured feature set preset.
    pub fn feature_set(&self) -> FeatureSet {
        FeatureSet::preset(self.search.feature_set)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    pub strategy: Strategy,
    pub passes: usize,
    #[serde(default)]
    pub max_iterations: Option<usize>,
    pub threads: usize,
    #[serde(default)]
    pub metric: Metric,
    #[serde(default)]
    pub aggregate: Aggregation,
    #[serde(default)]
    pub on_item_failure: FailurePolicy,
    pub feature_set: FeatureSetKind,
    #[serde(default)]
    pub candidates: CandidateMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    pub path: PathBuf,
    /// Optional CSV trace of every visited point.
    #[serde(default)]
    pub trace: Option<PathBuf>,
}

/// One `[[range]]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeSpec {
    pub feature: String,
    pub from: f64,
    pub to: f64,
    pub step: f64,
    #[serde(default)]
    pub start: Option<f64>,
}

pub fn parse_tuning_toml(toml_str: &str) -> Result<TuningSettings, SettingsError> {
    let s: TuningSettings =
        toml::from_str(toml_str).map_err(|e| SettingsError::Parse(e.to_string()))?;
    validate(&s)?;
    Ok(s)
}

fn validate(s: &TuningSettings) -> Result<(), SettingsError> {
    macro_rules! check_positive_usize {
        ($section:ident . $field:ident) => {
            if s.$section.$field == 0 {
                return Err(SettingsError::InvalidValue {
                    field: concat!(stringify!($section), ".", stringify!($field)).to_string(),
                    reason: "must be positive".to_string(),
                });
            }
        };
    }
    macro_rules! invalid {
        ($field:expr, $($reason:tt)*) => {
            return Err(SettingsError::InvalidValue {
                field: $field,
                reason: format!($($reason)*),
            })
        };
    }

    check_positive_usize!(search.passes);
    check_positive_usize!(search.threads);
    if s.search.max_iterations == Some(0) {
        invalid!("search.max_iterations".to_string(), "must be positive");
    }
    if s.cache.path.as_os_str().is_empty() {
        invalid!("cache.path".to_string(), "must not be empty");
    }

    if s.ranges.is_empty() {
        invalid!("range".to_string(), "at least one [[range]] is required");
    }
    let features = s.feature_set();
    for (i, r) in s.ranges.iter().enumerate() {
        let field = |name: &str| format!("range[{i}].{name}");
        if !features.names().any(|n| n == r.feature) {
            invalid!(
                field("feature"),
                "{:?} is not a feature of the {:?} set",
                r.feature,
                s.search.feature_set
            );
        }
        if s.ranges[..i].iter().any(|o| o.feature == r.feature) {
            invalid!(field("feature"), "{:?} configured twice", r.feature);
        }
        if !(r.step.is_finite() && r.step > 0.0) {
            invalid!(field("step"), "must be positive (got {})", r.step);
        }
        if !(r.from.is_finite() && r.to.is_finite()) {
            invalid!(field("from"), "bounds must be finite");
        }
        if r.from > r.to {
            invalid!(field("from"), "{} is greater than to ({})", r.from, r.to);
        }
        if let Some(start) = r.start {
            if !(r.from..=r.to).contains(&start) {
                invalid!(field("start"), "{start} is outside [{}, {}]", r.from, r.to);
            }
        }
    }

    Ok(())
}
