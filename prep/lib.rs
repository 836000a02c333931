#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
//! Condition-data assembly for perturbation models.
//!
//! A [`DataManager`] turns per-cell annotations into the fixed-shape tensors a
//! conditional generative model consumes: dense source and condition ids,
//! per-cell masks into those id spaces, the source-to-condition map, and one
//! padded embedding tensor per covariate group.

pub mod bundles;
pub mod config;
pub mod discovery;
pub mod embedding;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod manager;
pub mod masks;
pub mod predict;
pub mod progress;
pub mod spec;
pub mod types;

pub use bundles::{CellDataset, ConditionData, PredictionData, TrainingData, ValidationData};
pub use config::{CovariateGroupConfig, MaskStrategy, PrepConfig, SampleRep};
pub use embedding::{ConditionSlice, ConditionTensors};
pub use error::{ConfigError, PrepError, ResolutionError, ShapeError};
pub use manager::DataManager;
pub use predict::{ConditionEncoder, ConditionalModel, Predictions, embed_conditions, predict_conditions};
pub use progress::{ConsoleProgress, NoopProgress, PrepProgressObserver, PrepStage};
pub use types::{CovariateValue, IndexMask, RepresentationStore, RepresentationTable, StoreEntry};
