//! Request orchestration.
//!
//! A [`DataManager`] is built once from a configuration and a reference
//! dataset: it validates the configuration, checks the control column and split
//! reachability, and fits the primary encoder. Every request afterwards runs
//! discovery, masks and embedding from scratch against that fitted state.

use polars::prelude::DataFrame;

use crate::bundles::{CellDataset, ConditionData, PredictionData, TrainingData, ValidationData};
use crate::config::{MaskStrategy, PrepConfig, SampleRep};
use crate::discovery::Discovery;
use crate::embedding::{ConditionTensors, EmbeddingAssembler};
use crate::encoder::{CovariateKind, PrimaryEncoder};
use crate::error::{ConfigError, PrepError, ResolutionError};
use crate::frame::{AnnotationFrame, control_flags, label_column};
use crate::masks::{build_masks, source_split_mask};
use crate::progress::{NoopProgress, PrepProgressObserver, PrepStage};
use crate::spec::CovariateSpec;
use crate::types::RepresentationStore;

#[derive(Debug, Clone)]
pub struct DataManager {
    spec: CovariateSpec,
    encoder: PrimaryEncoder,
    sample_rep: SampleRep,
    mask_strategy: MaskStrategy,
    reference_store: RepresentationStore,
}

impl DataManager {
    pub fn new(config: &PrepConfig, dataset: &CellDataset) -> Result<Self, PrepError> {
        let spec = CovariateSpec::validate(config, dataset.representations())?;
        let annotations = dataset.annotations();
        let frame = AnnotationFrame::from_dataframe(annotations, spec.condition_columns())?;
        let control = control_flags(annotations, spec.control_key())?;
        spec.check_split_reachability(&frame, &control)?;
        let encoder = PrimaryEncoder::fit(&spec, &frame)?;

        log::info!(
            "Data manager ready: {} perturbation groups, {} sample covariates, {} split covariates, max combination length {}",
            spec.groups().len(),
            spec.sample_covariates().len(),
            spec.split_covariates().len(),
            spec.max_combination_length()
        );
        Ok(Self {
            spec,
            encoder,
            sample_rep: config.sample_rep.clone(),
            mask_strategy: config.mask_strategy,
            reference_store: dataset.representations().clone(),
        })
    }

    pub fn training_data(&self, dataset: &CellDataset) -> Result<TrainingData, PrepError> {
        self.training_data_with_progress(dataset, &mut NoopProgress)
    }

    pub fn training_data_with_progress(
        &self,
        dataset: &CellDataset,
        progress: &mut dyn PrepProgressObserver,
    ) -> Result<TrainingData, PrepError> {
        log::info!("Preparing training data from {} cells", dataset.n_cells());
        let data = self.cell_bundle(dataset, progress)?;
        log::info!(
            "Training data: {} sources, {} conditions",
            data.n_controls(),
            data.n_perturbations()
        );
        Ok(data)
    }

    pub fn validation_data(
        &self,
        dataset: &CellDataset,
        n_conditions_on_log_iteration: Option<usize>,
        n_conditions_on_train_end: Option<usize>,
    ) -> Result<ValidationData, PrepError> {
        self.validation_data_with_progress(
            dataset,
            n_conditions_on_log_iteration,
            n_conditions_on_train_end,
            &mut NoopProgress,
        )
    }

    pub fn validation_data_with_progress(
        &self,
        dataset: &CellDataset,
        n_conditions_on_log_iteration: Option<usize>,
        n_conditions_on_train_end: Option<usize>,
        progress: &mut dyn PrepProgressObserver,
    ) -> Result<ValidationData, PrepError> {
        log::info!("Preparing validation data from {} cells", dataset.n_cells());
        let data = self.cell_bundle(dataset, progress)?;
        Ok(ValidationData {
            data,
            n_conditions_on_log_iteration,
            n_conditions_on_train_end,
        })
    }

    /// Control cells of `dataset` paired with the conditions listed in
    /// `covariates`. `sample_rep` overrides the configured cell matrix and
    /// `representations` the dataset's store.
    pub fn prediction_data(
        &self,
        dataset: &CellDataset,
        sample_rep: Option<&SampleRep>,
        covariates: &DataFrame,
        representations: Option<&RepresentationStore>,
        condition_id_key: Option<&str>,
    ) -> Result<PredictionData, PrepError> {
        self.prediction_data_with_progress(
            dataset,
            sample_rep,
            covariates,
            representations,
            condition_id_key,
            &mut NoopProgress,
        )
    }

    pub fn prediction_data_with_progress(
        &self,
        dataset: &CellDataset,
        sample_rep: Option<&SampleRep>,
        covariates: &DataFrame,
        representations: Option<&RepresentationStore>,
        condition_id_key: Option<&str>,
        progress: &mut dyn PrepProgressObserver,
    ) -> Result<PredictionData, PrepError> {
        log::info!(
            "Preparing prediction data for {} source cells and {} covariate rows",
            dataset.n_cells(),
            covariates.height()
        );
        let annotations = dataset.annotations();
        let control = control_flags(annotations, self.spec.control_key())?;
        let treated = control.iter().filter(|&&is_control| !is_control).count();
        if treated > 0 {
            return Err(ResolutionError::NonControlSourceCells {
                column: self.spec.control_key().to_string(),
                count: treated,
            }
            .into());
        }

        let store = representations.unwrap_or(dataset.representations());
        let (discovery, condition_data) =
            self.covariate_conditions(covariates, store, condition_id_key, progress)?;

        progress.on_stage_start(PrepStage::Masks, dataset.n_cells());
        let cell_frame = AnnotationFrame::from_dataframe(annotations, self.spec.split_covariates())?;
        let split_mask = source_split_mask(&discovery, &cell_frame)?;
        progress.on_stage_advance(PrepStage::Masks, dataset.n_cells());
        progress.on_stage_finish(PrepStage::Masks);

        let cell_data = dataset
            .sample_matrix(sample_rep.unwrap_or(&self.sample_rep))?
            .to_owned();
        Ok(PredictionData {
            cell_data,
            split_mask,
            control_to_perturbation: discovery.control_to_perturbation(),
            condition_data,
            discovery,
            max_combination_length: self.spec.max_combination_length(),
            null_value: self.spec.null_value(),
        })
    }

    /// Condition tensors for the rows of `covariates`, looked up in
    /// `representations` or the reference dataset's store.
    pub fn condition_data(
        &self,
        covariates: &DataFrame,
        representations: Option<&RepresentationStore>,
        condition_id_key: Option<&str>,
    ) -> Result<ConditionData, PrepError> {
        self.condition_data_with_progress(
            covariates,
            representations,
            condition_id_key,
            &mut NoopProgress,
        )
    }

    pub fn condition_data_with_progress(
        &self,
        covariates: &DataFrame,
        representations: Option<&RepresentationStore>,
        condition_id_key: Option<&str>,
        progress: &mut dyn PrepProgressObserver,
    ) -> Result<ConditionData, PrepError> {
        log::info!("Preparing condition data for {} covariate rows", covariates.height());
        let store = representations.unwrap_or(&self.reference_store);
        let (discovery, condition_data) =
            self.covariate_conditions(covariates, store, condition_id_key, progress)?;
        Ok(ConditionData {
            condition_data,
            discovery,
            max_combination_length: self.spec.max_combination_length(),
            null_value: self.spec.null_value(),
        })
    }

    fn cell_bundle(
        &self,
        dataset: &CellDataset,
        progress: &mut dyn PrepProgressObserver,
    ) -> Result<TrainingData, PrepError> {
        let annotations = dataset.annotations();
        let n_cells = dataset.n_cells();

        progress.on_stage_start(PrepStage::Discovery, n_cells);
        let frame = AnnotationFrame::from_dataframe(annotations, self.spec.condition_columns())?;
        let control = control_flags(annotations, self.spec.control_key())?;
        if !control.iter().any(|&is_control| is_control) {
            return Err(ConfigError::NoControlCells(self.spec.control_key().to_string()).into());
        }
        self.spec.check_split_reachability(&frame, &control)?;
        self.encoder.verify_kind(&self.spec, &frame)?;
        self.spec.check_store(dataset.representations())?;
        let discovery = Discovery::from_cells(&self.spec, &frame, &control)?;
        progress.on_stage_advance(PrepStage::Discovery, n_cells);
        progress.on_stage_finish(PrepStage::Discovery);

        progress.on_stage_start(PrepStage::Masks, n_cells);
        let masks = build_masks(&discovery, &frame, &control, self.mask_strategy)?;
        progress.on_stage_advance(PrepStage::Masks, n_cells);
        progress.on_stage_finish(PrepStage::Masks);

        let condition_data = EmbeddingAssembler::new(&self.spec, &self.encoder, dataset.representations())
            .assemble(&discovery, progress)?;
        let cell_data = dataset.sample_matrix(&self.sample_rep)?.to_owned();

        Ok(TrainingData {
            cell_data,
            split_mask: masks.split,
            condition_mask: masks.condition,
            control_to_perturbation: discovery.control_to_perturbation(),
            condition_data,
            discovery,
            max_combination_length: self.spec.max_combination_length(),
            null_value: self.spec.null_value(),
        })
    }

    fn covariate_conditions(
        &self,
        covariates: &DataFrame,
        store: &RepresentationStore,
        condition_id_key: Option<&str>,
        progress: &mut dyn PrepProgressObserver,
    ) -> Result<(Discovery, ConditionTensors), PrepError> {
        progress.on_stage_start(PrepStage::Discovery, covariates.height());
        let frame = AnnotationFrame::from_dataframe(covariates, self.spec.condition_columns())?;
        self.encoder.verify_kind(&self.spec, &frame)?;
        self.spec.check_store(store)?;

        let mut discovery = Discovery::from_covariates(&self.spec, &frame)?;
        if let Some(column) = condition_id_key {
            let labels = label_column(covariates, column)?;
            discovery = discovery.with_condition_ids(&frame, column, &labels)?;
        }
        progress.on_stage_advance(PrepStage::Discovery, covariates.height());
        progress.on_stage_finish(PrepStage::Discovery);

        let tensors = EmbeddingAssembler::new(&self.spec, &self.encoder, store)
            .assemble(&discovery, progress)?;
        Ok((discovery, tensors))
    }

    pub fn spec(&self) -> &CovariateSpec {
        &self.spec
    }

    pub fn is_categorical(&self) -> bool {
        self.encoder.is_categorical()
    }

    pub fn primary_kind(&self) -> CovariateKind {
        self.encoder.kind()
    }

    /// Category order of the fitted primary code, if one was fitted.
    pub fn primary_categories(&self) -> Option<&[String]> {
        self.encoder.code().map(|code| code.categories())
    }

    pub fn sample_rep(&self) -> &SampleRep {
        &self.sample_rep
    }

    pub fn mask_strategy(&self) -> MaskStrategy {
        self.mask_strategy
    }

    pub fn reference_representations(&self) -> &RepresentationStore {
        &self.reference_store
    }
}
