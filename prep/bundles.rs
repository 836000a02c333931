//! Input dataset and the per-request output bundles.
//!
//! Bundles are immutable once built. Reverse maps (split index to values,
//! condition index to values and external id) are served by the [`Discovery`]
//! each bundle carries.

use ndarray::{Array2, ArrayView2, Axis};
use polars::prelude::DataFrame;
use std::collections::BTreeMap;

use crate::config::SampleRep;
use crate::discovery::Discovery;
use crate::embedding::ConditionTensors;
use crate::error::{ResolutionError, ShapeError};
use crate::types::{IndexMask, RepresentationStore};

/// Per-cell feature matrix, optional named layers, annotations and the
/// representation store shipped with the dataset.
#[derive(Debug, Clone)]
pub struct CellDataset {
    features: Array2<f64>,
    layers: BTreeMap<String, Array2<f64>>,
    annotations: DataFrame,
    representations: RepresentationStore,
}

impl CellDataset {
    pub fn new(features: Array2<f64>, annotations: DataFrame) -> Result<Self, ShapeError> {
        check_rows(features.nrows(), annotations.height())?;
        Ok(Self {
            features,
            layers: BTreeMap::new(),
            annotations,
            representations: RepresentationStore::new(),
        })
    }

    pub fn with_layer(mut self, name: impl Into<String>, layer: Array2<f64>) -> Result<Self, ShapeError> {
        check_rows(layer.nrows(), self.annotations.height())?;
        self.layers.insert(name.into(), layer);
        Ok(self)
    }

    pub fn with_representations(mut self, representations: RepresentationStore) -> Self {
        self.representations = representations;
        self
    }

    pub fn n_cells(&self) -> usize {
        self.features.nrows()
    }

    pub fn features(&self) -> ArrayView2<'_, f64> {
        self.features.view()
    }

    pub fn layer(&self, name: &str) -> Option<ArrayView2<'_, f64>> {
        self.layers.get(name).map(Array2::view)
    }

    pub fn annotations(&self) -> &DataFrame {
        &self.annotations
    }

    pub fn representations(&self) -> &RepresentationStore {
        &self.representations
    }

    /// The matrix selected by `rep`.
    pub fn sample_matrix(&self, rep: &SampleRep) -> Result<ArrayView2<'_, f64>, ResolutionError> {
        match rep {
            SampleRep::Features => Ok(self.features()),
            SampleRep::Layer(name) => self
                .layer(name)
                .ok_or_else(|| ResolutionError::MissingLayer(name.clone())),
        }
    }
}

fn check_rows(matrix_rows: usize, table_rows: usize) -> Result<(), ShapeError> {
    if matrix_rows != table_rows {
        return Err(ShapeError::RowCountMismatch {
            matrix_rows,
            table_rows,
        });
    }
    Ok(())
}

/// Cells, masks and condition tensors for fitting a model.
#[derive(Debug, Clone)]
pub struct TrainingData {
    pub(crate) cell_data: Array2<f64>,
    pub(crate) split_mask: IndexMask,
    pub(crate) condition_mask: IndexMask,
    pub(crate) control_to_perturbation: BTreeMap<usize, Vec<usize>>,
    pub(crate) condition_data: ConditionTensors,
    pub(crate) discovery: Discovery,
    pub(crate) max_combination_length: usize,
    pub(crate) null_value: f64,
}

impl TrainingData {
    pub fn cell_data(&self) -> ArrayView2<'_, f64> {
        self.cell_data.view()
    }

    /// Source index of every control cell.
    pub fn split_covariates_mask(&self) -> &IndexMask {
        &self.split_mask
    }

    /// Condition index of every non-control cell.
    pub fn perturbation_covariates_mask(&self) -> &IndexMask {
        &self.condition_mask
    }

    pub fn control_to_perturbation(&self) -> &BTreeMap<usize, Vec<usize>> {
        &self.control_to_perturbation
    }

    pub fn condition_data(&self) -> &ConditionTensors {
        &self.condition_data
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    pub fn n_controls(&self) -> usize {
        self.discovery.n_splits()
    }

    pub fn n_perturbations(&self) -> usize {
        self.discovery.n_conditions()
    }

    pub fn max_combination_length(&self) -> usize {
        self.max_combination_length
    }

    pub fn null_value(&self) -> f64 {
        self.null_value
    }

    /// Control cells of source `split`.
    pub fn source_cells(&self, split: usize) -> Vec<usize> {
        self.split_mask.rows_with(split)
    }

    /// Perturbed cells of `condition`.
    pub fn target_cells(&self, condition: usize) -> Vec<usize> {
        self.condition_mask.rows_with(condition)
    }
}

/// Training-shaped data plus the evaluation subset sizes.
#[derive(Debug, Clone)]
pub struct ValidationData {
    pub(crate) data: TrainingData,
    pub(crate) n_conditions_on_log_iteration: Option<usize>,
    pub(crate) n_conditions_on_train_end: Option<usize>,
}

impl ValidationData {
    pub fn data(&self) -> &TrainingData {
        &self.data
    }

    /// Conditions to evaluate at each logging step; all when `None`.
    pub fn n_conditions_on_log_iteration(&self) -> Option<usize> {
        self.n_conditions_on_log_iteration
    }

    /// Conditions to evaluate at the end of training; all when `None`.
    pub fn n_conditions_on_train_end(&self) -> Option<usize> {
        self.n_conditions_on_train_end
    }

    pub fn into_data(self) -> TrainingData {
        self.data
    }
}

/// Control cells and the conditions they should be mapped to.
#[derive(Debug, Clone)]
pub struct PredictionData {
    pub(crate) cell_data: Array2<f64>,
    pub(crate) split_mask: IndexMask,
    pub(crate) control_to_perturbation: BTreeMap<usize, Vec<usize>>,
    pub(crate) condition_data: ConditionTensors,
    pub(crate) discovery: Discovery,
    pub(crate) max_combination_length: usize,
    pub(crate) null_value: f64,
}

impl PredictionData {
    pub fn cell_data(&self) -> ArrayView2<'_, f64> {
        self.cell_data.view()
    }

    pub fn split_covariates_mask(&self) -> &IndexMask {
        &self.split_mask
    }

    pub fn control_to_perturbation(&self) -> &BTreeMap<usize, Vec<usize>> {
        &self.control_to_perturbation
    }

    pub fn condition_data(&self) -> &ConditionTensors {
        &self.condition_data
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    pub fn max_combination_length(&self) -> usize {
        self.max_combination_length
    }

    pub fn null_value(&self) -> f64 {
        self.null_value
    }

    /// Feature rows of the cells assigned to source `split`.
    pub fn source_matrix(&self, split: usize) -> Array2<f64> {
        self.cell_data
            .select(Axis(0), &self.split_mask.rows_with(split))
    }
}

/// Condition tensors without any cells, for embedding conditions on their own.
#[derive(Debug, Clone)]
pub struct ConditionData {
    pub(crate) condition_data: ConditionTensors,
    pub(crate) discovery: Discovery,
    pub(crate) max_combination_length: usize,
    pub(crate) null_value: f64,
}

impl ConditionData {
    pub fn condition_data(&self) -> &ConditionTensors {
        &self.condition_data
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    pub fn max_combination_length(&self) -> usize {
        self.max_combination_length
    }

    pub fn null_value(&self) -> f64 {
        self.null_value
    }
}
