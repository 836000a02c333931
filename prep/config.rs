//! User-facing configuration for the condition-data engine.
//!
//! The configuration is plain data: it is deserialized from TOML (or built in
//! code) and handed to [`crate::spec::CovariateSpec::validate`], which turns it
//! into an immutable, checked covariate spec. Nothing here touches the data.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::ConfigError;

/// One perturbation covariate group, e.g. `drug = ["drug_1", "drug_2"]`.
///
/// In TOML an empty string marks an absent linked column, so
/// `columns = ["dose_1", ""]` pairs the second primary slot with nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovariateGroupConfig {
    pub group: String,
    #[serde(
        deserialize_with = "deserialize_optional_columns",
        serialize_with = "serialize_optional_columns"
    )]
    pub columns: Vec<Option<String>>,
}

impl CovariateGroupConfig {
    pub fn new<I, S>(group: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            group: group.into(),
            columns: columns.into_iter().map(|c| Some(c.into())).collect(),
        }
    }

    pub fn with_optional_columns(group: impl Into<String>, columns: Vec<Option<String>>) -> Self {
        Self {
            group: group.into(),
            columns,
        }
    }
}

fn deserialize_optional_columns<'de, D>(deserializer: D) -> Result<Vec<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<String>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|column| (!column.is_empty()).then_some(column))
        .collect())
}

fn serialize_optional_columns<S>(columns: &[Option<String>], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let raw: Vec<&str> = columns
        .iter()
        .map(|column| column.as_deref().unwrap_or(""))
        .collect();
    raw.serialize(serializer)
}

/// Where the per-cell feature matrix comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleRep {
    /// The dataset's primary feature matrix.
    #[default]
    Features,
    /// A named layer stored alongside the primary matrix (e.g. a PCA embedding).
    Layer(String),
}

/// How per-cell masks are computed. Both strategies produce identical masks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskStrategy {
    /// Pick the hash join once the table is large enough to matter.
    #[default]
    Auto,
    /// Filter rows condition by condition.
    Iterative,
    /// Probe every row against hashed split and condition tables in parallel.
    HashJoin,
}

/// The complete, unvalidated engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepConfig {
    /// Boolean-like column marking control cells.
    pub control_key: String,
    /// Ordered covariate groups; the first one is the primary perturbation.
    #[serde(default)]
    pub perturbation_covariates: Vec<CovariateGroupConfig>,
    /// Group name -> representation table key.
    #[serde(default)]
    pub perturbation_covariate_reps: BTreeMap<String, String>,
    #[serde(default)]
    pub sample_covariates: Vec<String>,
    /// Sample covariate -> representation table key.
    #[serde(default)]
    pub sample_covariate_reps: BTreeMap<String, String>,
    #[serde(default)]
    pub split_covariates: Vec<String>,
    /// Inferred from the group length when absent.
    #[serde(default)]
    pub max_combination_length: Option<usize>,
    #[serde(default)]
    pub null_value: f64,
    #[serde(default)]
    pub sample_rep: SampleRep,
    #[serde(default)]
    pub mask_strategy: MaskStrategy,
}

impl PrepConfig {
    pub fn new(control_key: impl Into<String>) -> Self {
        Self {
            control_key: control_key.into(),
            perturbation_covariates: Vec::new(),
            perturbation_covariate_reps: BTreeMap::new(),
            sample_covariates: Vec::new(),
            sample_covariate_reps: BTreeMap::new(),
            split_covariates: Vec::new(),
            max_combination_length: None,
            null_value: 0.0,
            sample_rep: SampleRep::Features,
            mask_strategy: MaskStrategy::Auto,
        }
    }

    pub fn with_group(mut self, group: CovariateGroupConfig) -> Self {
        self.perturbation_covariates.push(group);
        self
    }

    pub fn with_perturbation_rep(mut self, group: &str, table: &str) -> Self {
        self.perturbation_covariate_reps
            .insert(group.to_string(), table.to_string());
        self
    }

    pub fn with_sample_covariate(mut self, column: &str) -> Self {
        self.sample_covariates.push(column.to_string());
        self
    }

    pub fn with_sample_rep_table(mut self, column: &str, table: &str) -> Self {
        self.sample_covariate_reps
            .insert(column.to_string(), table.to_string());
        self
    }

    pub fn with_split_covariate(mut self, column: &str) -> Self {
        self.split_covariates.push(column.to_string());
        self
    }

    pub fn with_max_combination_length(mut self, length: usize) -> Self {
        self.max_combination_length = Some(length);
        self
    }

    pub fn with_null_value(mut self, null_value: f64) -> Self {
        self.null_value = null_value;
        self
    }

    pub fn with_sample_rep(mut self, sample_rep: SampleRep) -> Self {
        self.sample_rep = sample_rep;
        self
    }

    pub fn with_mask_strategy(mut self, strategy: MaskStrategy) -> Self {
        self.mask_strategy = strategy;
        self
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
