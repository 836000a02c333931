//! Reassembly of model outputs into per-condition predictions.
//!
//! The engine does not run a model itself. A generative model is plugged in
//! through [`ConditionalModel`] and [`ConditionEncoder`], and the functions here
//! walk a prepared bundle, call the model once per (source, condition) pair and
//! key the results by readable labels.

use ndarray::{Array1, Array2, ArrayView2};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::bundles::{ConditionData, PredictionData};
use crate::embedding::ConditionSlice;

/// A model mapping source cells to perturbed cells under one condition.
pub trait ConditionalModel {
    type Error: std::error::Error + 'static;

    fn predict(
        &self,
        source: ArrayView2<'_, f64>,
        condition: &ConditionSlice<'_>,
    ) -> Result<Array2<f64>, Self::Error>;
}

/// A model exposing its learned embedding of a condition.
pub trait ConditionEncoder {
    type Error: std::error::Error + 'static;

    fn embed(&self, condition: &ConditionSlice<'_>) -> Result<Array1<f64>, Self::Error>;
}

/// A model call failed; names the condition it failed on.
#[derive(Error, Debug)]
#[error("Model call failed for condition '{label}' (source '{source_label}'): {source}")]
pub struct PredictError<E: std::error::Error + 'static> {
    pub source_label: String,
    pub label: String,
    #[source]
    pub source: E,
}

/// Predictions keyed by source split label, then by condition label.
#[derive(Debug, Clone, PartialEq)]
pub struct Predictions {
    by_source: BTreeMap<String, BTreeMap<String, Array2<f64>>>,
}

impl Predictions {
    pub fn by_source(&self) -> &BTreeMap<String, BTreeMap<String, Array2<f64>>> {
        &self.by_source
    }

    /// The per-condition map when there is exactly one source split.
    pub fn single_source(&self) -> Option<&BTreeMap<String, Array2<f64>>> {
        match self.by_source.len() {
            1 => self.by_source.values().next(),
            _ => None,
        }
    }

    pub fn get(&self, source: &str, condition: &str) -> Option<&Array2<f64>> {
        self.by_source.get(source)?.get(condition)
    }
}

/// Runs `model` on every (source split, condition) pair of `data`.
pub fn predict_conditions<M: ConditionalModel>(
    data: &PredictionData,
    model: &M,
) -> Result<Predictions, PredictError<M::Error>> {
    let discovery = data.discovery();
    let mut by_source = BTreeMap::new();
    for (&split, conditions) in data.control_to_perturbation() {
        let source_label = discovery.split_label(split);
        let cells = data.source_matrix(split);
        let mut predicted = BTreeMap::new();
        for &condition in conditions {
            let label = discovery.condition_label(condition);
            let slice = data.condition_data().condition(condition);
            let output = model
                .predict(cells.view(), &slice)
                .map_err(|source| PredictError {
                    source_label: source_label.clone(),
                    label: label.clone(),
                    source,
                })?;
            predicted.insert(label, output);
        }
        log::debug!(
            "Predicted {} conditions from {} cells of source '{source_label}'",
            predicted.len(),
            cells.nrows()
        );
        by_source.insert(source_label, predicted);
    }
    Ok(Predictions { by_source })
}

/// Embeds every condition of `data`, keyed by condition label.
pub fn embed_conditions<E: ConditionEncoder>(
    data: &ConditionData,
    encoder: &E,
) -> Result<BTreeMap<String, Array1<f64>>, PredictError<E::Error>> {
    let discovery = data.discovery();
    (0..data.condition_data().num_conditions())
        .map(|condition| {
            let label = discovery.condition_label(condition);
            encoder
                .embed(&data.condition_data().condition(condition))
                .map(|embedding| (label.clone(), embedding))
                .map_err(|source| PredictError {
                    source_label: discovery.split_label(discovery.split_of(condition)),
                    label,
                    source,
                })
        })
        .collect()
}
