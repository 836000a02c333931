use ahash::AHashMap;
use ndarray::{Array, Array1, ArrayD, ArrayView1, Axis, Dimension};
use polars::prelude::*;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::PrepError;
use crate::frame::AnnotationFrame;

/// One cell of a covariate column after ingest.
///
/// Boolean-like columns arrive here as `Number(0.0 | 1.0)`; categorical columns
/// as `Text`. Ordering is total: `Null < Number < Text`, numbers by
/// `f64::total_cmp`, text lexically, which is the sort order used for id
/// assignment.
#[derive(Clone, Debug)]
pub enum CovariateValue {
    Null,
    Number(f64),
    Text(String),
}

impl CovariateValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The representation-table key for this value: text as-is, numbers in
    /// their shortest form (`10.0` keys as `"10"`). Nulls have no key.
    pub fn table_key(&self) -> Option<String> {
        match self {
            Self::Null => None,
            _ => Some(self.to_string()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Number(_) => 1,
            Self::Text(_) => 2,
        }
    }
}

impl PartialEq for CovariateValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CovariateValue {}

impl PartialOrd for CovariateValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CovariateValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for CovariateValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Self::Null => {}
            Self::Number(value) => value.to_bits().hash(state),
            Self::Text(text) => text.hash(state),
        }
    }
}

impl fmt::Display for CovariateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

impl From<&str> for CovariateValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<f64> for CovariateValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

/// Renders a tuple of covariate values for messages and labels.
pub fn render_values(values: &[CovariateValue]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

/// Per-cell index into the split or condition id space.
///
/// Stored in the wire convention (`-1` for "no index") so it can be handed to a
/// model as-is, but read through [`IndexMask::get`] which returns an `Option`.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq)]
pub struct IndexMask(Array1<i64>);

impl IndexMask {
    pub const NONE: i64 = -1;

    pub fn unassigned(len: usize) -> Self {
        Self(Array1::from_elem(len, Self::NONE))
    }

    pub fn from_indices<I>(indices: I) -> Self
    where
        I: IntoIterator<Item = Option<usize>>,
    {
        Self(
            indices
                .into_iter()
                .map(|index| index.map_or(Self::NONE, |i| i as i64))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, row: usize) -> Option<usize> {
        self.0
            .get(row)
            .and_then(|&value| usize::try_from(value).ok())
    }

    pub fn set(&mut self, row: usize, index: usize) {
        self.0[row] = index as i64;
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<usize>> + '_ {
        self.0.iter().map(|&value| usize::try_from(value).ok())
    }

    /// Rows carrying `index`, in row order.
    pub fn rows_with(&self, index: usize) -> Vec<usize> {
        self.iter()
            .enumerate()
            .filter_map(|(row, value)| (value == Some(index)).then_some(row))
            .collect()
    }

    pub fn as_wire(&self) -> ArrayView1<'_, i64> {
        self.0.view()
    }

    pub fn into_inner(self) -> Array1<i64> {
        self.0
    }
}

impl From<IndexMask> for Array1<i64> {
    fn from(mask: IndexMask) -> Self {
        mask.0
    }
}

/// External key-to-array lookup table (e.g. drug embeddings).
#[derive(Clone, Debug, Default)]
pub struct RepresentationTable {
    entries: AHashMap<String, ArrayD<f64>>,
}

impl RepresentationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<D: Dimension>(&mut self, key: impl Into<String>, value: Array<f64, D>) {
        self.entries.insert(key.into(), value.into_dyn());
    }

    pub fn with_entry<D: Dimension>(mut self, key: impl Into<String>, value: Array<f64, D>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&ArrayD<f64>> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Builds a table from a frame holding one key column and numeric feature
    /// columns; each row becomes a 1-D entry. Keys are ingested like covariate
    /// columns, so numeric and boolean keys match covariate lookups.
    pub fn from_dataframe(df: &DataFrame, key_column: &str) -> Result<Self, PrepError> {
        let frame = AnnotationFrame::from_dataframe(df, &[key_column])?;
        let keys = frame.column(key_column)?;
        let features = df
            .drop(key_column)?
            .to_ndarray::<Float64Type>(IndexOrder::C)?;

        let mut table = Self::new();
        for (key, row) in keys.iter().zip(features.axis_iter(Axis(0))) {
            if let Some(key) = key.table_key() {
                table.insert(key, row.to_owned());
            }
        }
        Ok(table)
    }
}

/// One named entry of a [`RepresentationStore`]. Only `Table` entries can back a
/// covariate representation; the other variants exist because the store also
/// carries unstructured dataset metadata.
#[derive(Clone, Debug)]
pub enum StoreEntry {
    Table(RepresentationTable),
    Array(ArrayD<f64>),
    Text(String),
}

impl StoreEntry {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Table(_) => "a table",
            Self::Array(_) => "an array",
            Self::Text(_) => "a string",
        }
    }
}

/// Named collection of representation tables and other dataset metadata.
#[derive(Clone, Debug, Default)]
pub struct RepresentationStore {
    entries: BTreeMap<String, StoreEntry>,
}

impl RepresentationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, entry: StoreEntry) {
        self.entries.insert(key.into(), entry);
    }

    pub fn with_table(mut self, key: impl Into<String>, table: RepresentationTable) -> Self {
        self.insert(key, StoreEntry::Table(table));
        self
    }

    pub fn entry(&self, key: &str) -> Option<&StoreEntry> {
        self.entries.get(key)
    }

    pub fn table(&self, key: &str) -> Option<&RepresentationTable> {
        match self.entries.get(key) {
            Some(StoreEntry::Table(table)) => Some(table),
            _ => None,
        }
    }
}
