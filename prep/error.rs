//! Error taxonomy for the condition-data engine.
//!
//! Every failure is fatal for the request that raised it. Configuration problems
//! surface before any data pass; resolution and shape problems abort the whole
//! discovery pass so no partial bundle ever reaches the caller.

use polars::prelude::PolarsError;
use thiserror::Error;

/// Invalid or contradictory covariate configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse the TOML configuration: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize the configuration to TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Failed to read the configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("No perturbation covariates were provided. At least one covariate group is required.")]
    NoPerturbationCovariates,
    #[error("Covariate group names must be non-empty.")]
    EmptyGroupName,
    #[error("Perturbation covariate group '{0}' is declared more than once.")]
    DuplicateGroup(String),
    #[error("No covariates were provided for perturbation group '{0}'.")]
    EmptyGroup(String),
    #[error(
        "Lengths of perturbation covariate groups must match, found lengths {lengths:?} for groups {groups:?}."
    )]
    UnequalGroupLengths {
        groups: Vec<String>,
        lengths: Vec<usize>,
    },
    #[error("The primary covariate group '{group}' has an absent column at position {position}.")]
    AbsentPrimaryColumn { group: String, position: usize },
    #[error("Representation configured for '{0}', which is not a declared covariate.")]
    UnknownRepresentationTarget(String),
    #[error("Representation table '{0}' was not found in the representation store.")]
    MissingRepresentationTable(String),
    #[error("Representation entry '{key}' must be a key-to-array table, found {found}.")]
    RepresentationNotATable { key: String, found: &'static str },
    #[error(
        "max_combination_length is {configured}, but perturbation covariate groups have length {observed}."
    )]
    CombinationLengthTooSmall { configured: usize, observed: usize },
    #[error(
        "Group '{group}' resolves to {cardinality} slots, exceeding max_combination_length {max}."
    )]
    CardinalityExceedsMax {
        group: String,
        cardinality: usize,
        max: usize,
    },
    #[error(
        "Source distribution with split covariate values {0:?} does not have a corresponding target distribution."
    )]
    UnreachableSplit(Vec<String>),
    #[error("Control column '{column}' could not be interpreted as boolean (found {found}).")]
    ControlNotBoolean { column: String, found: String },
    #[error("No control cells were found in column '{0}'.")]
    NoControlCells(String),
    #[error("Covariate column '{column}' is neither numeric/boolean nor categorical: {reason}")]
    UncoercibleColumn { column: String, reason: String },
    #[error(
        "Columns of perturbation group '{group}' must be all numeric/boolean or all categorical, found {categorical:?} categorical and {continuous:?} numeric/boolean."
    )]
    MixedGroupKinds {
        group: String,
        categorical: Vec<String>,
        continuous: Vec<String>,
    },
    #[error("Perturbation covariate '{column}' should be {expected}, found {found}.")]
    CovariateKindMismatch {
        column: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// A value, column or table entry could not be resolved during a data pass.
#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("Covariate column '{0}' was not found in the input table. Please check spelling and case.")]
    MissingColumn(String),
    #[error("Representation for '{key}' not found in representation table '{table}'.")]
    MissingRepresentation { key: String, table: String },
    #[error("Value '{value}' of column '{column}' is not part of the fitted categorical code.")]
    UnknownCategory { column: String, value: String },
    #[error("Column '{0}' holds a missing value where a covariate is required.")]
    NullValue(String),
    #[error(
        "Column '{column}' holds the non-numeric value '{value}' but has no representation table."
    )]
    NonNumericValue { column: String, value: String },
    #[error("The condition id column '{column}' must contain unique values, '{value}' repeats.")]
    DuplicateConditionId { column: String, value: String },
    #[error(
        "Condition {condition} is defined by several rows with different ids in column '{column}'."
    )]
    AmbiguousConditionId { column: String, condition: usize },
    #[error("Sample representation layer '{0}' was not found in the dataset.")]
    MissingLayer(String),
    #[error(
        "For prediction, all cells must be controls; {count} cells are not marked in '{column}'."
    )]
    NonControlSourceCells { column: String, count: usize },
    #[error("No source cells found for split covariates {0:?}.")]
    EmptySourceSplit(Vec<String>),
}

/// A resolved array or table does not satisfy the shape contract.
#[derive(Error, Debug)]
pub enum ShapeError {
    #[error(
        "Condition representation has an unexpected shape {0:?}. Should be (1, n_features) or (n_features,)."
    )]
    UnexpectedShape(Vec<usize>),
    #[error("Condition representation has {0} dimensions. Should be 1 or 2.")]
    TooManyDimensions(usize),
    #[error("Feature width of group '{group}' changes from {expected} to {found}.")]
    InconsistentWidth {
        group: String,
        expected: usize,
        found: usize,
    },
    #[error("The feature matrix has {matrix_rows} rows, but the annotation table has {table_rows}.")]
    RowCountMismatch {
        matrix_rows: usize,
        table_rows: usize,
    },
    #[error("Failed to lay out array: {0}")]
    Layout(#[from] ndarray::ShapeError),
}

/// Crate-level error returned by every request.
#[derive(Error, Debug)]
pub enum PrepError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),
    #[error("Shape error: {0}")]
    Shape(#[from] ShapeError),
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
}
