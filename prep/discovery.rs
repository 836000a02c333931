//! Split and condition discovery.
//!
//! A *split* is a distinct tuple of split-covariate values; a *condition* is a
//! distinct tuple of (split covariates, perturbation key columns). Both id spaces
//! are dense and follow the sort order of their tuples, so the same table always
//! yields the same ids.
//!
//! Source indices cover every split tuple present in the table. Because the
//! condition key starts with the split columns, each condition belongs to
//! exactly one split, found by prefix.

use ahash::AHashSet;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{PrepError, ResolutionError};
use crate::frame::AnnotationFrame;
use crate::spec::CovariateSpec;
use crate::types::{CovariateValue, render_values};

#[derive(Debug, Clone)]
pub struct Discovery {
    split_columns: Vec<String>,
    condition_columns: Vec<String>,
    splits: Vec<Vec<CovariateValue>>,
    conditions: Vec<Vec<CovariateValue>>,
    condition_split: Vec<usize>,
    condition_ids: Option<Vec<String>>,
}

impl Discovery {
    /// Discovery over a cell table: conditions come from non-control rows only.
    pub fn from_cells(
        spec: &CovariateSpec,
        frame: &AnnotationFrame,
        control: &[bool],
    ) -> Result<Self, PrepError> {
        let discovery = Self::build(spec, frame, |row| !control[row])?;

        let split_columns = frame.columns(&discovery.split_columns)?;
        let control_splits: BTreeSet<Vec<CovariateValue>> = (0..frame.n_rows())
            .filter(|&row| control[row])
            .map(|row| AnnotationFrame::row_key(&split_columns, row))
            .collect();
        for split in &discovery.splits {
            if !control_splits.contains(split) {
                log::warn!(
                    "Split {:?} holds no control cells; its conditions have no source population",
                    render_values(split)
                );
            }
        }
        Ok(discovery)
    }

    /// Discovery over a covariate table: every row defines a condition.
    pub fn from_covariates(spec: &CovariateSpec, frame: &AnnotationFrame) -> Result<Self, PrepError> {
        Self::build(spec, frame, |_| true)
    }

    fn build(
        spec: &CovariateSpec,
        frame: &AnnotationFrame,
        is_target: impl Fn(usize) -> bool,
    ) -> Result<Self, PrepError> {
        let split_columns = spec.split_covariates().to_vec();
        let condition_columns: Vec<String> = split_columns
            .iter()
            .cloned()
            .chain(spec.perturbation_key_columns())
            .collect();

        let split_view = frame.columns(&split_columns)?;
        let condition_view = frame.columns(&condition_columns)?;

        let mut splits = BTreeSet::new();
        let mut conditions = BTreeSet::new();
        for row in 0..frame.n_rows() {
            splits.insert(AnnotationFrame::row_key(&split_view, row));
            if is_target(row) {
                conditions.insert(AnnotationFrame::row_key(&condition_view, row));
            }
        }
        if split_columns.is_empty() {
            splits.insert(Vec::new());
        }

        let splits: Vec<Vec<CovariateValue>> = splits.into_iter().collect();
        let conditions: Vec<Vec<CovariateValue>> = conditions.into_iter().collect();
        let n_split = split_columns.len();
        let condition_split = conditions
            .iter()
            .map(|condition| splits.partition_point(|split| split.as_slice() < &condition[..n_split]))
            .collect();

        log::debug!(
            "Discovered {} splits and {} conditions over {} rows",
            splits.len(),
            conditions.len(),
            frame.n_rows()
        );
        Ok(Self {
            split_columns,
            condition_columns,
            splits,
            conditions,
            condition_split,
            condition_ids: None,
        })
    }

    /// Attaches external ids from `labels`, one per row of `frame`. Ids must be
    /// unique per row, and all rows of a condition must carry the same id.
    pub fn with_condition_ids(
        mut self,
        frame: &AnnotationFrame,
        column: &str,
        labels: &[Option<String>],
    ) -> Result<Self, PrepError> {
        let mut seen = AHashSet::with_capacity(labels.len());
        for label in labels {
            let label = label
                .as_deref()
                .ok_or_else(|| ResolutionError::NullValue(column.to_string()))?;
            if !seen.insert(label) {
                return Err(ResolutionError::DuplicateConditionId {
                    column: column.to_string(),
                    value: label.to_string(),
                }
                .into());
            }
        }

        let view = frame.columns(&self.condition_columns)?;
        let mut ids: Vec<Option<&str>> = vec![None; self.conditions.len()];
        for (row, label) in labels.iter().enumerate() {
            let key = AnnotationFrame::row_key(&view, row);
            let Some(condition) = self.condition_index(&key) else {
                continue;
            };
            match ids[condition] {
                None => ids[condition] = label.as_deref(),
                Some(existing) if Some(existing) == label.as_deref() => {}
                Some(_) => {
                    return Err(ResolutionError::AmbiguousConditionId {
                        column: column.to_string(),
                        condition,
                    }
                    .into());
                }
            }
        }
        self.condition_ids = Some(
            ids.into_iter()
                .map(|id| id.unwrap_or_default().to_string())
                .collect(),
        );
        Ok(self)
    }

    pub fn split_columns(&self) -> &[String] {
        &self.split_columns
    }

    /// Split columns followed by the perturbation key columns.
    pub fn condition_columns(&self) -> &[String] {
        &self.condition_columns
    }

    pub fn n_splits(&self) -> usize {
        self.splits.len()
    }

    pub fn n_conditions(&self) -> usize {
        self.conditions.len()
    }

    pub fn splits(&self) -> &[Vec<CovariateValue>] {
        &self.splits
    }

    pub fn conditions(&self) -> &[Vec<CovariateValue>] {
        &self.conditions
    }

    pub fn split_values(&self, split: usize) -> &[CovariateValue] {
        &self.splits[split]
    }

    pub fn condition_values(&self, condition: usize) -> &[CovariateValue] {
        &self.conditions[condition]
    }

    /// Source index of the split `condition` belongs to.
    pub fn split_of(&self, condition: usize) -> usize {
        self.condition_split[condition]
    }

    pub fn condition_id(&self, condition: usize) -> Option<&str> {
        self.condition_ids
            .as_ref()
            .map(|ids| ids[condition].as_str())
    }

    pub fn has_condition_ids(&self) -> bool {
        self.condition_ids.is_some()
    }

    /// Split values joined with `_`; empty when there are no split covariates.
    pub fn split_label(&self, split: usize) -> String {
        render_values(self.split_values(split)).join("_")
    }

    /// External id of `condition`, else its values joined with `_`.
    pub fn condition_label(&self, condition: usize) -> String {
        match self.condition_id(condition) {
            Some(id) => id.to_string(),
            None => render_values(self.condition_values(condition)).join("_"),
        }
    }

    /// Value of `column` in the tuple of `condition`.
    pub fn value(&self, condition: usize, column: &str) -> Option<&CovariateValue> {
        self.condition_columns
            .iter()
            .position(|c| c == column)
            .map(|position| &self.conditions[condition][position])
    }

    pub fn split_index(&self, key: &[CovariateValue]) -> Option<usize> {
        self.splits
            .binary_search_by(|split| split.as_slice().cmp(key))
            .ok()
    }

    pub fn condition_index(&self, key: &[CovariateValue]) -> Option<usize> {
        self.conditions
            .binary_search_by(|condition| condition.as_slice().cmp(key))
            .ok()
    }

    /// Condition indices grouped by the split they share. Every split has an
    /// entry, possibly empty, and every condition appears exactly once.
    pub fn control_to_perturbation(&self) -> BTreeMap<usize, Vec<usize>> {
        let mut map: BTreeMap<usize, Vec<usize>> =
            (0..self.splits.len()).map(|split| (split, Vec::new())).collect();
        for (condition, &split) in self.condition_split.iter().enumerate() {
            map.entry(split).or_default().push(condition);
        }
        map
    }
}
