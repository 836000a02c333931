//! Covariate specification: validation of a [`PrepConfig`] into an immutable,
//! checked [`CovariateSpec`].
//!
//! Everything that can be decided from the configuration and the representation
//! store alone is checked in [`CovariateSpec::validate`], before any data pass.
//! The one data-dependent configuration check (split reachability) lives in
//! [`CovariateSpec::check_split_reachability`] and runs once at engine
//! construction.

use ahash::AHashSet;
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::PrepConfig;
use crate::error::{ConfigError, PrepError};
use crate::frame::AnnotationFrame;
use crate::types::{RepresentationStore, StoreEntry, render_values};

/// One validated perturbation covariate group.
#[derive(Debug, Clone, PartialEq)]
pub struct CovariateGroup {
    pub name: String,
    pub columns: Vec<Option<String>>,
}

impl CovariateGroup {
    pub fn present_columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().filter_map(|c| c.as_deref())
    }
}

/// For each primary column, the secondary group columns positionally paired with
/// it (or `None` where the secondary group has no column at that position).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LinkedCovariateMap {
    links: Vec<(String, Vec<(String, Option<String>)>)>,
}

impl LinkedCovariateMap {
    fn build(groups: &[CovariateGroup]) -> Self {
        let Some((primary, secondary)) = groups.split_first() else {
            return Self::default();
        };
        let links = primary
            .present_columns()
            .enumerate()
            .map(|(position, primary_column)| {
                let linked = secondary
                    .iter()
                    .map(|group| {
                        (
                            group.name.clone(),
                            group.columns.get(position).cloned().flatten(),
                        )
                    })
                    .collect();
                (primary_column.to_string(), linked)
            })
            .collect();
        Self { links }
    }

    /// Linked `(group, column)` pairs of `primary_column`, in group order.
    pub fn links_for(&self, primary_column: &str) -> &[(String, Option<String>)] {
        self.links
            .iter()
            .find(|(column, _)| column == primary_column)
            .map(|(_, linked)| linked.as_slice())
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[(String, Option<String>)])> {
        self.links
            .iter()
            .map(|(column, linked)| (column.as_str(), linked.as_slice()))
    }
}

/// Immutable, validated covariate configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CovariateSpec {
    groups: Vec<CovariateGroup>,
    representations: BTreeMap<String, String>,
    sample_covariates: Vec<String>,
    split_covariates: Vec<String>,
    control_key: String,
    max_combination_length: usize,
    null_value: f64,
    linked: LinkedCovariateMap,
    condition_columns: Vec<String>,
}

impl CovariateSpec {
    /// Checks `config` against itself and against the representation store.
    pub fn validate(config: &PrepConfig, store: &RepresentationStore) -> Result<Self, ConfigError> {
        let groups = validate_groups(config)?;
        let sample_covariates = validate_names(&config.sample_covariates)?;
        let split_covariates = validate_names(&config.split_covariates)?;

        let group_names: AHashSet<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        let sample_names: AHashSet<&str> = sample_covariates.iter().map(String::as_str).collect();
        validate_reps(&config.perturbation_covariate_reps, &group_names, store)?;
        validate_reps(&config.sample_covariate_reps, &sample_names, store)?;

        let observed = groups.iter().map(|g| g.columns.len()).max().unwrap_or(0);
        let max_combination_length = match config.max_combination_length {
            None => {
                log::warn!(
                    "max_combination_length not supplied, inferring {observed} from the perturbation covariate groups"
                );
                observed
            }
            Some(configured) if configured < observed => {
                return Err(ConfigError::CombinationLengthTooSmall {
                    configured,
                    observed,
                });
            }
            Some(configured) => configured,
        };

        let mut representations = config.perturbation_covariate_reps.clone();
        representations.extend(
            config
                .sample_covariate_reps
                .iter()
                .map(|(name, table)| (name.clone(), table.clone())),
        );

        let condition_columns = groups
            .iter()
            .flat_map(|g| g.present_columns().map(str::to_string))
            .chain(sample_covariates.iter().cloned())
            .chain(split_covariates.iter().cloned())
            .unique()
            .collect();

        Ok(Self {
            linked: LinkedCovariateMap::build(&groups),
            groups,
            representations,
            sample_covariates,
            split_covariates,
            control_key: config.control_key.clone(),
            max_combination_length,
            null_value: config.null_value,
            condition_columns,
        })
    }

    /// Rejects split combinations that occur among control rows but never among
    /// treated rows: such a source population would have nothing to map to.
    pub fn check_split_reachability(
        &self,
        frame: &AnnotationFrame,
        control: &[bool],
    ) -> Result<(), PrepError> {
        if self.split_covariates.is_empty() {
            return Ok(());
        }
        let columns = frame.columns(&self.split_covariates)?;

        let mut source_splits = BTreeSet::new();
        let mut target_splits = BTreeSet::new();
        for (row, &is_control) in control.iter().enumerate() {
            let key = AnnotationFrame::row_key(&columns, row);
            if is_control {
                source_splits.insert(key);
            } else {
                target_splits.insert(key);
            }
        }

        match source_splits.difference(&target_splits).next() {
            Some(unreachable) => {
                Err(ConfigError::UnreachableSplit(render_values(unreachable)).into())
            }
            None => Ok(()),
        }
    }

    /// Checks that every configured representation table is present in
    /// `store`, for requests that bring their own store.
    pub fn check_store(&self, store: &RepresentationStore) -> Result<(), ConfigError> {
        self.representations
            .values()
            .try_for_each(|table_key| check_table(table_key, store))
    }

    pub fn groups(&self) -> &[CovariateGroup] {
        &self.groups
    }

    pub fn primary_group(&self) -> &CovariateGroup {
        &self.groups[0]
    }

    /// Primary columns; never absent after validation.
    pub fn primary_columns(&self) -> Vec<&str> {
        self.primary_group().present_columns().collect()
    }

    pub fn linked(&self) -> &LinkedCovariateMap {
        &self.linked
    }

    pub fn representation_key(&self, name: &str) -> Option<&str> {
        self.representations.get(name).map(String::as_str)
    }

    pub fn representations(&self) -> &BTreeMap<String, String> {
        &self.representations
    }

    pub fn sample_covariates(&self) -> &[String] {
        &self.sample_covariates
    }

    pub fn split_covariates(&self) -> &[String] {
        &self.split_covariates
    }

    pub fn control_key(&self) -> &str {
        &self.control_key
    }

    pub fn max_combination_length(&self) -> usize {
        self.max_combination_length
    }

    pub fn null_value(&self) -> f64 {
        self.null_value
    }

    /// Every column that defines a condition: perturbation columns, sample
    /// covariates and split covariates, without repeats.
    pub fn condition_columns(&self) -> &[String] {
        &self.condition_columns
    }

    /// Condition-defining columns that are not split covariates.
    pub fn perturbation_key_columns(&self) -> Vec<String> {
        self.condition_columns
            .iter()
            .filter(|c| !self.split_covariates.contains(c))
            .cloned()
            .collect()
    }

    /// Names of the `condition_data` entries: perturbation groups, then sample
    /// covariates.
    pub fn output_names(&self) -> Vec<&str> {
        self.groups
            .iter()
            .map(|g| g.name.as_str())
            .chain(self.sample_covariates.iter().map(String::as_str))
            .collect()
    }
}

fn validate_groups(config: &PrepConfig) -> Result<Vec<CovariateGroup>, ConfigError> {
    if config.perturbation_covariates.is_empty() {
        return Err(ConfigError::NoPerturbationCovariates);
    }

    let mut seen = AHashSet::new();
    for group in &config.perturbation_covariates {
        if group.group.is_empty() {
            return Err(ConfigError::EmptyGroupName);
        }
        if !seen.insert(group.group.as_str()) {
            return Err(ConfigError::DuplicateGroup(group.group.clone()));
        }
        if group.columns.iter().all(Option::is_none) {
            return Err(ConfigError::EmptyGroup(group.group.clone()));
        }
    }

    let lengths: Vec<usize> = config
        .perturbation_covariates
        .iter()
        .map(|g| g.columns.len())
        .collect();
    if !lengths.iter().all_equal() {
        return Err(ConfigError::UnequalGroupLengths {
            groups: config
                .perturbation_covariates
                .iter()
                .map(|g| g.group.clone())
                .collect(),
            lengths,
        });
    }

    let primary = &config.perturbation_covariates[0];
    if let Some(position) = primary.columns.iter().position(Option::is_none) {
        return Err(ConfigError::AbsentPrimaryColumn {
            group: primary.group.clone(),
            position,
        });
    }

    Ok(config
        .perturbation_covariates
        .iter()
        .map(|g| CovariateGroup {
            name: g.group.clone(),
            columns: g.columns.clone(),
        })
        .collect())
}

fn validate_names(names: &[String]) -> Result<Vec<String>, ConfigError> {
    if names.iter().any(String::is_empty) {
        return Err(ConfigError::EmptyGroupName);
    }
    Ok(names.to_vec())
}

fn validate_reps(
    reps: &BTreeMap<String, String>,
    declared: &AHashSet<&str>,
    store: &RepresentationStore,
) -> Result<(), ConfigError> {
    for (name, table_key) in reps {
        if !declared.contains(name.as_str()) {
            return Err(ConfigError::UnknownRepresentationTarget(name.clone()));
        }
        check_table(table_key, store)?;
    }
    Ok(())
}

fn check_table(table_key: &str, store: &RepresentationStore) -> Result<(), ConfigError> {
    match store.entry(table_key) {
        None => Err(ConfigError::MissingRepresentationTable(table_key.to_string())),
        Some(StoreEntry::Table(_)) => Ok(()),
        Some(other) => Err(ConfigError::RepresentationNotATable {
            key: table_key.to_string(),
            found: other.kind_name(),
        }),
    }
}
