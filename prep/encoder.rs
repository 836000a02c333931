//! Primary covariate encoder and the per-covariate representation dispatch.
//!
//! The primary group is either categorical (drug names, gene knockouts) or
//! continuous (doses). Without an external representation, a categorical group
//! is one-hot coded over every value observed in its columns, and a continuous
//! group is one-hot coded over its column names and scaled by the magnitude.
//! The code is fitted once and reused for every later request so column order
//! never drifts between training and prediction.

use itertools::Itertools;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, PrepError};
use crate::frame::AnnotationFrame;
use crate::spec::{CovariateGroup, CovariateSpec};
use crate::types::CovariateValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CovariateKind {
    /// Non-numeric, non-boolean values naming the perturbation.
    Categorical,
    /// Numeric or boolean magnitudes multiplying a fixed code.
    Continuous,
}

impl CovariateKind {
    fn describe(self) -> &'static str {
        match self {
            Self::Categorical => "categorical",
            Self::Continuous => "numeric/boolean",
        }
    }
}

/// A fitted one-hot code over a sorted, de-duplicated category list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneHotCode {
    categories: Vec<String>,
}

impl OneHotCode {
    pub fn fit<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let categories = values
            .into_iter()
            .map(Into::into)
            .sorted()
            .dedup()
            .collect();
        Self { categories }
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn width(&self) -> usize {
        self.categories.len()
    }

    /// A `(1, width)` indicator row, or `None` for an unseen category.
    pub fn encode(&self, category: &str) -> Option<Array2<f64>> {
        let position = self
            .categories
            .binary_search_by(|c| c.as_str().cmp(category))
            .ok()?;
        let mut row = Array2::zeros((1, self.width()));
        row[[0, position]] = 1.0;
        Some(row)
    }
}

/// The fitted state of the primary covariate group.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryEncoder {
    kind: CovariateKind,
    code: Option<OneHotCode>,
}

impl PrimaryEncoder {
    /// Classifies every perturbation group and fits the primary code.
    pub fn fit(spec: &CovariateSpec, frame: &AnnotationFrame) -> Result<Self, PrepError> {
        let mut kinds = spec
            .groups()
            .iter()
            .map(|group| group_kind(group, frame))
            .collect::<Result<Vec<_>, _>>()?;
        let kind = kinds.remove(0);

        let primary = spec.primary_group();
        let code = if spec.representation_key(&primary.name).is_some() {
            None
        } else {
            match kind {
                CovariateKind::Categorical => {
                    let mut observed = Vec::new();
                    for column in primary.present_columns() {
                        observed.extend(frame.column(column)?.iter().filter_map(|value| {
                            match value {
                                CovariateValue::Text(text) => Some(text.clone()),
                                _ => None,
                            }
                        }));
                    }
                    Some(OneHotCode::fit(observed))
                }
                CovariateKind::Continuous => Some(OneHotCode::fit(primary.present_columns())),
            }
        };

        log::info!(
            "Primary covariate group '{}' is {}; fitted code width {}",
            primary.name,
            kind.describe(),
            code.as_ref().map_or(0, OneHotCode::width)
        );
        Ok(Self { kind, code })
    }

    pub fn kind(&self) -> CovariateKind {
        self.kind
    }

    pub fn is_categorical(&self) -> bool {
        self.kind == CovariateKind::Categorical
    }

    pub fn code(&self) -> Option<&OneHotCode> {
        self.code.as_ref()
    }

    /// Checks that a new covariate table types the primary columns the same way
    /// the fitting table did.
    pub fn verify_kind(&self, spec: &CovariateSpec, frame: &AnnotationFrame) -> Result<(), PrepError> {
        for column in spec.primary_columns() {
            let found = if frame.kind(column)?.is_categorical() {
                CovariateKind::Categorical
            } else {
                CovariateKind::Continuous
            };
            if found != self.kind {
                return Err(ConfigError::CovariateKindMismatch {
                    column: column.to_string(),
                    expected: self.kind.describe(),
                    found: found.describe(),
                }
                .into());
            }
        }
        Ok(())
    }
}

fn group_kind(group: &CovariateGroup, frame: &AnnotationFrame) -> Result<CovariateKind, PrepError> {
    let mut categorical = Vec::new();
    let mut continuous = Vec::new();
    for column in group.present_columns() {
        if frame.kind(column)?.is_categorical() {
            categorical.push(column.to_string());
        } else {
            continuous.push(column.to_string());
        }
    }
    match (categorical.is_empty(), continuous.is_empty()) {
        (false, true) => Ok(CovariateKind::Categorical),
        (true, _) => Ok(CovariateKind::Continuous),
        (false, false) => Err(ConfigError::MixedGroupKinds {
            group: group.name.clone(),
            categorical,
            continuous,
        }
        .into()),
    }
}

/// How one covariate (group or sample covariate) is turned into numbers.
#[derive(Debug, Clone, Copy)]
pub enum Representation<'a> {
    /// Look the value up in the named representation table.
    External(&'a str),
    /// Apply the fitted primary one-hot code.
    FittedCode(&'a OneHotCode),
    /// Use the numeric value itself.
    Raw,
}

/// Resolves the representation of the covariate (group or sample covariate)
/// called `name`.
pub fn representation<'a>(
    spec: &'a CovariateSpec,
    encoder: &'a PrimaryEncoder,
    name: &str,
) -> Representation<'a> {
    if let Some(table) = spec.representation_key(name) {
        return Representation::External(table);
    }
    match encoder.code() {
        Some(code) if spec.primary_group().name == name => Representation::FittedCode(code),
        _ => Representation::Raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CovariateGroupConfig, PrepConfig};
    use crate::types::{RepresentationStore, RepresentationTable};
    use ndarray::array;
    use polars::prelude::*;

    fn frame_for(spec: &CovariateSpec, df: &DataFrame) -> AnnotationFrame {
        AnnotationFrame::from_dataframe(df, spec.condition_columns()).unwrap()
    }

    #[test]
    fn categorical_code_spans_every_primary_column() {
        let config = PrepConfig::new("control")
            .with_group(CovariateGroupConfig::new("drug", ["drug_1", "drug_2"]));
        let spec = CovariateSpec::validate(&config, &RepresentationStore::new()).unwrap();
        let df = df! {
            "drug_1" => &["control", "B", "A"],
            "drug_2" => &["control", "C", "control"],
        }
        .unwrap();
        let encoder = PrimaryEncoder::fit(&spec, &frame_for(&spec, &df)).unwrap();
        assert!(encoder.is_categorical());
        assert_eq!(
            encoder.code().unwrap().categories(),
            &["A", "B", "C", "control"]
        );
        assert_eq!(
            encoder.code().unwrap().encode("C").unwrap(),
            array![[0.0, 0.0, 1.0, 0.0]]
        );
        assert!(encoder.code().unwrap().encode("D").is_none());
    }

    #[test]
    fn continuous_code_spans_column_names() {
        let config = PrepConfig::new("control")
            .with_group(CovariateGroupConfig::new("dose", ["dose_b", "dose_a"]));
        let spec = CovariateSpec::validate(&config, &RepresentationStore::new()).unwrap();
        let df = df! {
            "dose_b" => &[0.5, 1.0],
            "dose_a" => &[0.0, 1.0],
        }
        .unwrap();
        let encoder = PrimaryEncoder::fit(&spec, &frame_for(&spec, &df)).unwrap();
        assert_eq!(encoder.kind(), CovariateKind::Continuous);
        assert_eq!(encoder.code().unwrap().categories(), &["dose_a", "dose_b"]);
    }

    #[test]
    fn represented_primary_group_skips_fitting() {
        let store = RepresentationStore::new().with_table(
            "drug_emb",
            RepresentationTable::new().with_entry("A", array![1.0, 2.0]),
        );
        let config = PrepConfig::new("control")
            .with_group(CovariateGroupConfig::new("drug", ["drug"]))
            .with_perturbation_rep("drug", "drug_emb");
        let spec = CovariateSpec::validate(&config, &store).unwrap();
        let df = df! { "drug" => &["A", "A"] }.unwrap();
        let encoder = PrimaryEncoder::fit(&spec, &frame_for(&spec, &df)).unwrap();
        assert!(encoder.code().is_none());
        assert!(matches!(
            representation(&spec, &encoder, "drug"),
            Representation::External("drug_emb")
        ));
    }

    #[test]
    fn mixed_group_kinds_are_rejected() {
        let config = PrepConfig::new("control")
            .with_group(CovariateGroupConfig::new("drug", ["drug_1", "drug_2"]));
        let spec = CovariateSpec::validate(&config, &RepresentationStore::new()).unwrap();
        let df = df! {
            "drug_1" => &["A", "B"],
            "drug_2" => &[1.0, 2.0],
        }
        .unwrap();
        let err = PrimaryEncoder::fit(&spec, &frame_for(&spec, &df)).unwrap_err();
        assert!(matches!(
            err,
            PrepError::Config(ConfigError::MixedGroupKinds { .. })
        ));
    }

    #[test]
    fn fitted_code_is_stable_across_refits() {
        let config = PrepConfig::new("control")
            .with_group(CovariateGroupConfig::new("drug", ["drug"]));
        let spec = CovariateSpec::validate(&config, &RepresentationStore::new()).unwrap();
        let first = df! { "drug" => &["C", "A", "B", "A"] }.unwrap();
        let second = df! { "drug" => &["B", "C", "A"] }.unwrap();
        let a = PrimaryEncoder::fit(&spec, &frame_for(&spec, &first)).unwrap();
        let b = PrimaryEncoder::fit(&spec, &frame_for(&spec, &second)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn kind_verification_rejects_numeric_replacements() {
        let config = PrepConfig::new("control")
            .with_group(CovariateGroupConfig::new("drug", ["drug"]));
        let spec = CovariateSpec::validate(&config, &RepresentationStore::new()).unwrap();
        let train = df! { "drug" => &["A", "B"] }.unwrap();
        let encoder = PrimaryEncoder::fit(&spec, &frame_for(&spec, &train)).unwrap();

        let numeric = df! { "drug" => &[1.0, 2.0] }.unwrap();
        let err = encoder
            .verify_kind(&spec, &frame_for(&spec, &numeric))
            .unwrap_err();
        assert!(matches!(
            err,
            PrepError::Config(ConfigError::CovariateKindMismatch { .. })
        ));
    }
}
