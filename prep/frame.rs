//! # Annotation ingest
//!
//! Converts the columns of a polars `DataFrame` that the engine actually needs
//! into owned [`CovariateValue`] vectors. This is the only module that inspects
//! polars dtypes; everything downstream works on the extracted values.
//!
//! - Numeric columns are cast to `Float64`.
//! - Boolean columns and string columns holding only `True`/`False` are coerced
//!   to `0.0`/`1.0`.
//! - Anything else is cast to `String` and treated as categorical. A column that
//!   cannot be cast is a configuration error.

use ahash::AHashMap;
use polars::prelude::*;

use crate::error::{ConfigError, PrepError, ResolutionError};
use crate::types::CovariateValue;

/// Categorical-vs-continuous classification of a covariate column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Numeric,
    Boolean,
    Categorical,
}

impl ColumnKind {
    pub fn is_categorical(self) -> bool {
        matches!(self, Self::Categorical)
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::Numeric => "numeric",
            Self::Boolean => "boolean",
            Self::Categorical => "categorical",
        }
    }
}

const BOOLEAN_TOKENS: [(&str, bool); 4] = [
    ("True", true),
    ("False", false),
    ("true", true),
    ("false", false),
];

fn boolean_token(text: &str) -> Option<bool> {
    BOOLEAN_TOKENS
        .iter()
        .find_map(|&(token, value)| (token == text).then_some(value))
}

struct ExtractedColumn {
    kind: ColumnKind,
    values: Vec<CovariateValue>,
}

fn lookup_column<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Column, PrepError> {
    if !df.get_column_names().iter().any(|c| c.as_str() == name) {
        return Err(ResolutionError::MissingColumn(name.to_string()).into());
    }
    Ok(df.column(name)?)
}

fn extract_column(df: &DataFrame, name: &str) -> Result<ExtractedColumn, PrepError> {
    let column = lookup_column(df, name)?;
    let dtype = column.dtype().clone();

    if dtype == DataType::Boolean {
        let values = column
            .bool()?
            .into_iter()
            .map(|value| match value {
                Some(flag) => CovariateValue::Number(if flag { 1.0 } else { 0.0 }),
                None => CovariateValue::Null,
            })
            .collect();
        return Ok(ExtractedColumn {
            kind: ColumnKind::Boolean,
            values,
        });
    }

    if dtype.is_primitive_numeric() {
        let casted = column.cast(&DataType::Float64)?;
        let values = casted
            .f64()?
            .into_iter()
            .map(|value| value.map_or(CovariateValue::Null, CovariateValue::Number))
            .collect();
        return Ok(ExtractedColumn {
            kind: ColumnKind::Numeric,
            values,
        });
    }

    let casted = column
        .cast(&DataType::String)
        .map_err(|err| ConfigError::UncoercibleColumn {
            column: name.to_string(),
            reason: format!("{err} (found type {dtype:?})"),
        })?;
    let text = casted.str()?;

    let all_boolean = text
        .into_iter()
        .flatten()
        .all(|value| boolean_token(value).is_some());
    if all_boolean && text.null_count() < text.len() {
        let values = text
            .into_iter()
            .map(|value| match value.and_then(boolean_token) {
                Some(flag) => CovariateValue::Number(if flag { 1.0 } else { 0.0 }),
                None => CovariateValue::Null,
            })
            .collect();
        return Ok(ExtractedColumn {
            kind: ColumnKind::Boolean,
            values,
        });
    }

    let values = text
        .into_iter()
        .map(|value| value.map_or(CovariateValue::Null, CovariateValue::from))
        .collect();
    Ok(ExtractedColumn {
        kind: ColumnKind::Categorical,
        values,
    })
}

/// The subset of an annotation table the engine works on, one value vector per
/// requested column.
#[derive(Debug, Clone)]
pub struct AnnotationFrame {
    n_rows: usize,
    columns: AHashMap<String, Vec<CovariateValue>>,
    kinds: AHashMap<String, ColumnKind>,
}

impl AnnotationFrame {
    /// Extracts `columns` from `df`. Every requested column must exist.
    pub fn from_dataframe<S: AsRef<str>>(df: &DataFrame, columns: &[S]) -> Result<Self, PrepError> {
        let mut frame = Self {
            n_rows: df.height(),
            columns: AHashMap::with_capacity(columns.len()),
            kinds: AHashMap::with_capacity(columns.len()),
        };
        for name in columns {
            let name = name.as_ref();
            if frame.columns.contains_key(name) {
                continue;
            }
            let extracted = extract_column(df, name)?;
            frame.kinds.insert(name.to_string(), extracted.kind);
            frame.columns.insert(name.to_string(), extracted.values);
        }
        log::debug!(
            "Extracted {} covariate columns over {} rows",
            frame.columns.len(),
            frame.n_rows
        );
        Ok(frame)
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn column(&self, name: &str) -> Result<&[CovariateValue], ResolutionError> {
        self.columns
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| ResolutionError::MissingColumn(name.to_string()))
    }

    pub fn kind(&self, name: &str) -> Result<ColumnKind, ResolutionError> {
        self.kinds
            .get(name)
            .copied()
            .ok_or_else(|| ResolutionError::MissingColumn(name.to_string()))
    }

    /// Borrowed views of `names`, in order, for row-wise key building.
    pub fn columns<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<&[CovariateValue]>, ResolutionError> {
        names.iter().map(|name| self.column(name.as_ref())).collect()
    }

    /// The values of `row` across `columns`.
    pub fn row_key(columns: &[&[CovariateValue]], row: usize) -> Vec<CovariateValue> {
        columns.iter().map(|column| column[row].clone()).collect()
    }
}

/// Reads a boolean-like control column. Nulls and non-boolean values are
/// rejected rather than guessed.
pub fn control_flags(df: &DataFrame, control_key: &str) -> Result<Vec<bool>, PrepError> {
    let extracted = extract_column(df, control_key)?;
    let not_boolean = |found: String| ConfigError::ControlNotBoolean {
        column: control_key.to_string(),
        found,
    };
    if extracted.kind == ColumnKind::Categorical {
        let sample = extracted
            .values
            .iter()
            .find(|value| !value.is_null())
            .map(|value| value.to_string())
            .unwrap_or_else(|| "no values".to_string());
        return Err(not_boolean(format!("categorical value '{sample}'")).into());
    }

    extracted
        .values
        .iter()
        .map(|value| -> Result<bool, PrepError> {
            match value.as_number() {
                Some(number) if number == 1.0 => Ok(true),
                Some(number) if number == 0.0 => Ok(false),
                Some(number) => Err(not_boolean(format!("value {number}")).into()),
                None => Err(not_boolean("a missing value".to_string()).into()),
            }
        })
        .collect()
}

/// The raw text of an identifier column (used for external condition ids).
pub fn label_column(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>, PrepError> {
    let column = lookup_column(df, name)?;
    let casted = column.cast(&DataType::String)?;
    Ok(casted
        .str()?
        .into_iter()
        .map(|value| value.map(str::to_string))
        .collect())
}
