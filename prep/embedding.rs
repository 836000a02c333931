//! Per-condition embedding assembly.
//!
//! Every condition becomes one `(max_combination_length, width)` matrix per
//! perturbation group and per sample covariate. Primary slots are resolved
//! through the group's [`Representation`], linked secondary slots through their
//! own group's representation, and the group is padded with `null_value` rows.
//! Sample covariates are resolved once and tiled to the full length. Conditions
//! are embedded in parallel and stacked by condition index into 3-D tensors.

use ndarray::{Array2, Array3, ArrayD, ArrayView2, Axis, s};
use rayon::prelude::*;

use crate::discovery::Discovery;
use crate::encoder::{PrimaryEncoder, Representation, representation};
use crate::error::{ConfigError, PrepError, ResolutionError, ShapeError};
use crate::progress::{PrepProgressObserver, PrepStage};
use crate::spec::CovariateSpec;
use crate::types::{CovariateValue, RepresentationStore, StoreEntry};

/// Conditions embedded per parallel batch between progress updates.
const EMBED_CHUNK: usize = 256;

/// Brings a resolved representation to a single `(1, n)` row.
///
/// Scalars and 1-D arrays become one row, `(1, n)` is kept and `(n, 1)` is laid
/// out as a row. Any other shape is rejected.
pub fn reshape_row(array: &ArrayD<f64>) -> Result<Array2<f64>, ShapeError> {
    match array.shape() {
        [] | [_] => {}
        [rows, cols] if *rows == 1 || *cols == 1 => {}
        [_, _] => return Err(ShapeError::UnexpectedShape(array.shape().to_vec())),
        shape => return Err(ShapeError::TooManyDimensions(shape.len())),
    }
    let values: Vec<f64> = array.iter().copied().collect();
    Ok(Array2::from_shape_vec((1, values.len()), values)?)
}

/// Appends `null_value` rows up to `max_length`. Padding a padded matrix is a
/// no-op.
pub fn pad_to_length(
    rows: Array2<f64>,
    max_length: usize,
    null_value: f64,
    group: &str,
) -> Result<Array2<f64>, ConfigError> {
    let (n_rows, width) = rows.dim();
    if n_rows > max_length {
        return Err(ConfigError::CardinalityExceedsMax {
            group: group.to_string(),
            cardinality: n_rows,
            max: max_length,
        });
    }
    if n_rows == max_length {
        return Ok(rows);
    }
    let mut padded = Array2::from_elem((max_length, width), null_value);
    padded.slice_mut(s![..n_rows, ..]).assign(&rows);
    Ok(padded)
}

enum Slot {
    Row(Array2<f64>),
    /// An absent linked column; filled with `null_value` at the group's width.
    Null,
}

fn lookup_key(column: &str, value: &CovariateValue) -> Result<String, ResolutionError> {
    value
        .table_key()
        .ok_or_else(|| ResolutionError::NullValue(column.to_string()))
}

fn raw_row(column: &str, value: &CovariateValue) -> Result<Array2<f64>, ResolutionError> {
    match value {
        CovariateValue::Number(number) => Ok(Array2::from_elem((1, 1), *number)),
        CovariateValue::Text(text) => Err(ResolutionError::NonNumericValue {
            column: column.to_string(),
            value: text.clone(),
        }),
        CovariateValue::Null => Err(ResolutionError::NullValue(column.to_string())),
    }
}

/// Stacked condition tensors, one `(n_conditions, max_len, width)` array per
/// perturbation group and sample covariate, in output order.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionTensors {
    entries: Vec<(String, Array3<f64>)>,
}

impl ConditionTensors {
    pub fn get(&self, name: &str) -> Option<&Array3<f64>> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, tensor)| tensor)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Array3<f64>)> {
        self.entries
            .iter()
            .map(|(name, tensor)| (name.as_str(), tensor))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn num_conditions(&self) -> usize {
        self.entries
            .first()
            .map_or(0, |(_, tensor)| tensor.len_of(Axis(0)))
    }

    pub fn is_empty(&self) -> bool {
        self.num_conditions() == 0
    }

    /// The `(max_len, width)` matrices of one condition.
    pub fn condition(&self, index: usize) -> ConditionSlice<'_> {
        ConditionSlice {
            entries: self
                .entries
                .iter()
                .map(|(name, tensor)| (name.as_str(), tensor.index_axis(Axis(0), index)))
                .collect(),
        }
    }
}

/// Borrowed embedding of a single condition.
#[derive(Debug, Clone)]
pub struct ConditionSlice<'a> {
    entries: Vec<(&'a str, ArrayView2<'a, f64>)>,
}

impl<'a> ConditionSlice<'a> {
    pub fn get(&self, name: &str) -> Option<ArrayView2<'a, f64>> {
        self.entries
            .iter()
            .find(|(entry, _)| *entry == name)
            .map(|(_, view)| view.clone())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, ArrayView2<'a, f64>)> + '_ {
        self.entries.iter().map(|(name, view)| (*name, view.clone()))
    }
}

pub struct EmbeddingAssembler<'a> {
    spec: &'a CovariateSpec,
    encoder: &'a PrimaryEncoder,
    store: &'a RepresentationStore,
}

impl<'a> EmbeddingAssembler<'a> {
    pub fn new(
        spec: &'a CovariateSpec,
        encoder: &'a PrimaryEncoder,
        store: &'a RepresentationStore,
    ) -> Self {
        Self {
            spec,
            encoder,
            store,
        }
    }

    /// Embeds every discovered condition. Any failure aborts the whole pass.
    pub fn assemble(
        &self,
        discovery: &Discovery,
        progress: &mut dyn PrepProgressObserver,
    ) -> Result<ConditionTensors, PrepError> {
        let n_conditions = discovery.n_conditions();
        progress.on_stage_start(PrepStage::Embedding, n_conditions);

        let mut embedded: Vec<Vec<Array2<f64>>> = Vec::with_capacity(n_conditions);
        for start in (0..n_conditions).step_by(EMBED_CHUNK) {
            let end = (start + EMBED_CHUNK).min(n_conditions);
            let batch = (start..end)
                .into_par_iter()
                .map(|condition| self.embed_condition(discovery, condition))
                .collect::<Result<Vec<_>, _>>()?;
            embedded.extend(batch);
            progress.on_stage_advance(PrepStage::Embedding, end - start);
        }
        progress.on_stage_finish(PrepStage::Embedding);

        let max_length = self.spec.max_combination_length();
        let entries = self
            .spec
            .output_names()
            .into_iter()
            .enumerate()
            .map(|(position, name)| {
                let width = embedded.first().map_or(0, |first| first[position].ncols());
                let mut tensor = Array3::<f64>::zeros((n_conditions, max_length, width));
                for (condition, matrices) in embedded.iter().enumerate() {
                    let matrix = &matrices[position];
                    if matrix.ncols() != width {
                        return Err(ShapeError::InconsistentWidth {
                            group: name.to_string(),
                            expected: width,
                            found: matrix.ncols(),
                        });
                    }
                    tensor.index_axis_mut(Axis(0), condition).assign(matrix);
                }
                Ok((name.to_string(), tensor))
            })
            .collect::<Result<Vec<_>, ShapeError>>()?;

        log::info!(
            "Embedded {n_conditions} conditions into {} tensors of length {max_length}",
            entries.len()
        );
        Ok(ConditionTensors { entries })
    }

    /// The padded matrices of one condition, in `CovariateSpec::output_names`
    /// order.
    pub fn embed_condition(
        &self,
        discovery: &Discovery,
        condition: usize,
    ) -> Result<Vec<Array2<f64>>, PrepError> {
        let groups = self.spec.groups();
        let mut slots: Vec<Vec<Slot>> = groups.iter().map(|_| Vec::new()).collect();

        for primary_column in self.spec.primary_group().present_columns() {
            slots[0].push(Slot::Row(self.primary_row(discovery, condition, primary_column)?));
            for (offset, (group, linked)) in self.spec.linked().links_for(primary_column).iter().enumerate() {
                let slot = match linked {
                    Some(column) => {
                        let value = self.value(discovery, condition, column)?;
                        Slot::Row(self.covariate_row(group, column, value)?)
                    }
                    None => Slot::Null,
                };
                slots[offset + 1].push(slot);
            }
        }

        let mut matrices = Vec::with_capacity(groups.len() + self.spec.sample_covariates().len());
        for (group, group_slots) in groups.iter().zip(slots) {
            let stacked = self.stack_slots(&group.name, group_slots)?;
            matrices.push(pad_to_length(
                stacked,
                self.spec.max_combination_length(),
                self.spec.null_value(),
                &group.name,
            )?);
        }

        for covariate in self.spec.sample_covariates() {
            let value = self.value(discovery, condition, covariate)?;
            let row = self.covariate_row(covariate, covariate, value)?;
            let max_length = self.spec.max_combination_length();
            matrices.push(Array2::from_shape_fn((max_length, row.ncols()), |(_, j)| {
                row[[0, j]]
            }));
        }
        Ok(matrices)
    }

    fn value<'d>(
        &self,
        discovery: &'d Discovery,
        condition: usize,
        column: &str,
    ) -> Result<&'d CovariateValue, ResolutionError> {
        discovery
            .value(condition, column)
            .ok_or_else(|| ResolutionError::MissingColumn(column.to_string()))
    }

    fn lookup(&self, table_key: &str, key: &str) -> Result<Array2<f64>, PrepError> {
        let table = match self.store.entry(table_key) {
            Some(StoreEntry::Table(table)) => table,
            Some(other) => {
                return Err(ConfigError::RepresentationNotATable {
                    key: table_key.to_string(),
                    found: other.kind_name(),
                }
                .into());
            }
            None => return Err(ConfigError::MissingRepresentationTable(table_key.to_string()).into()),
        };
        let array = table
            .get(key)
            .ok_or_else(|| ResolutionError::MissingRepresentation {
                key: key.to_string(),
                table: table_key.to_string(),
            })?;
        Ok(reshape_row(array)?)
    }

    fn primary_row(
        &self,
        discovery: &Discovery,
        condition: usize,
        column: &str,
    ) -> Result<Array2<f64>, PrepError> {
        let value = self.value(discovery, condition, column)?;
        let categorical = self.encoder.is_categorical();
        // Continuous primaries are keyed by column name and scaled by the value.
        let key = if categorical {
            lookup_key(column, value)?
        } else {
            column.to_string()
        };

        let mut row = match representation(self.spec, self.encoder, &self.spec.primary_group().name) {
            Representation::External(table) => self.lookup(table, &key)?,
            Representation::FittedCode(code) => {
                code.encode(&key)
                    .ok_or_else(|| ResolutionError::UnknownCategory {
                        column: column.to_string(),
                        value: key.clone(),
                    })?
            }
            Representation::Raw => return Ok(raw_row(column, value)?),
        };
        if !categorical {
            let magnitude = value
                .as_number()
                .ok_or_else(|| ResolutionError::NullValue(column.to_string()))?;
            row *= magnitude;
        }
        Ok(row)
    }

    /// Secondary group slots and sample covariates: a table lookup when `name`
    /// has a representation, else the numeric value itself.
    fn covariate_row(
        &self,
        name: &str,
        column: &str,
        value: &CovariateValue,
    ) -> Result<Array2<f64>, PrepError> {
        match representation(self.spec, self.encoder, name) {
            Representation::External(table) => self.lookup(table, &lookup_key(column, value)?),
            _ => Ok(raw_row(column, value)?),
        }
    }

    fn stack_slots(&self, group: &str, slots: Vec<Slot>) -> Result<Array2<f64>, ShapeError> {
        let width = slots
            .iter()
            .find_map(|slot| match slot {
                Slot::Row(row) => Some(row.ncols()),
                Slot::Null => None,
            })
            .unwrap_or(1);

        let mut stacked = Array2::from_elem((slots.len(), width), self.spec.null_value());
        for (position, slot) in slots.iter().enumerate() {
            if let Slot::Row(row) = slot {
                if row.ncols() != width {
                    return Err(ShapeError::InconsistentWidth {
                        group: group.to_string(),
                        expected: width,
                        found: row.ncols(),
                    });
                }
                stacked.row_mut(position).assign(&row.row(0));
            }
        }
        Ok(stacked)
    }
}
