//! Per-cell split and condition masks.
//!
//! Two strategies compute the same masks. The iterative strategy filters the rows
//! once per split and once per condition; the hash join builds a map from key
//! tuple to index and probes every row in parallel. `MaskStrategy::Auto` picks
//! the join once `rows * conditions` passes [`HASH_JOIN_THRESHOLD`].

use ahash::AHashMap;
use rayon::prelude::*;

use crate::config::MaskStrategy;
use crate::discovery::Discovery;
use crate::error::{PrepError, ResolutionError};
use crate::frame::AnnotationFrame;
use crate::types::{CovariateValue, IndexMask, render_values};

/// Above this many row/condition comparisons the hash join is used.
pub const HASH_JOIN_THRESHOLD: usize = 1_000_000;

/// Split and condition index of every cell. For each row exactly one of the two
/// is set when the row belongs to a discovered split or condition.
#[derive(Debug, Clone, PartialEq)]
pub struct CellMasks {
    pub split: IndexMask,
    pub condition: IndexMask,
}

/// Resolves `Auto` to a concrete strategy for a table of this size.
pub fn select_strategy(strategy: MaskStrategy, n_rows: usize, n_conditions: usize) -> MaskStrategy {
    match strategy {
        MaskStrategy::Auto => {
            let work = n_rows.saturating_mul(n_conditions);
            let chosen = if work > HASH_JOIN_THRESHOLD {
                MaskStrategy::HashJoin
            } else {
                MaskStrategy::Iterative
            };
            log::debug!(
                "Mask strategy {chosen:?} selected for {n_rows} rows x {n_conditions} conditions"
            );
            chosen
        }
        explicit => explicit,
    }
}

pub fn build_masks(
    discovery: &Discovery,
    frame: &AnnotationFrame,
    control: &[bool],
    strategy: MaskStrategy,
) -> Result<CellMasks, PrepError> {
    let split_view = frame.columns(discovery.split_columns())?;
    let condition_view = frame.columns(discovery.condition_columns())?;
    let views = KeyViews {
        split: &split_view,
        condition: &condition_view,
    };

    let masks = match select_strategy(strategy, frame.n_rows(), discovery.n_conditions()) {
        MaskStrategy::HashJoin => hash_join(discovery, &views, control),
        _ => iterative(discovery, &views, control),
    };
    log::debug!(
        "Assigned {} control rows and {} target rows",
        masks.split.iter().flatten().count(),
        masks.condition.iter().flatten().count()
    );
    Ok(masks)
}

struct KeyViews<'a> {
    split: &'a [&'a [CovariateValue]],
    condition: &'a [&'a [CovariateValue]],
}

impl KeyViews<'_> {
    fn matches(view: &[&[CovariateValue]], row: usize, key: &[CovariateValue]) -> bool {
        view.iter()
            .zip(key)
            .all(|(column, value)| &column[row] == value)
    }
}

fn iterative(discovery: &Discovery, views: &KeyViews<'_>, control: &[bool]) -> CellMasks {
    let n_rows = control.len();
    let mut split = IndexMask::unassigned(n_rows);
    let mut condition = IndexMask::unassigned(n_rows);

    for (index, key) in discovery.splits().iter().enumerate() {
        for row in (0..n_rows).filter(|&row| control[row]) {
            if KeyViews::matches(views.split, row, key) {
                split.set(row, index);
            }
        }
    }
    for (index, key) in discovery.conditions().iter().enumerate() {
        for row in (0..n_rows).filter(|&row| !control[row]) {
            if KeyViews::matches(views.condition, row, key) {
                condition.set(row, index);
            }
        }
    }
    CellMasks { split, condition }
}

fn hash_join(discovery: &Discovery, views: &KeyViews<'_>, control: &[bool]) -> CellMasks {
    let split_table: AHashMap<&[CovariateValue], usize> = discovery
        .splits()
        .iter()
        .enumerate()
        .map(|(index, key)| (key.as_slice(), index))
        .collect();
    let condition_table: AHashMap<&[CovariateValue], usize> = discovery
        .conditions()
        .iter()
        .enumerate()
        .map(|(index, key)| (key.as_slice(), index))
        .collect();

    let assigned: Vec<(Option<usize>, Option<usize>)> = control
        .par_iter()
        .enumerate()
        .map(|(row, &is_control)| {
            if is_control {
                let key = AnnotationFrame::row_key(views.split, row);
                (split_table.get(key.as_slice()).copied(), None)
            } else {
                let key = AnnotationFrame::row_key(views.condition, row);
                (None, condition_table.get(key.as_slice()).copied())
            }
        })
        .collect();

    CellMasks {
        split: IndexMask::from_indices(assigned.iter().map(|&(split, _)| split)),
        condition: IndexMask::from_indices(assigned.iter().map(|&(_, condition)| condition)),
    }
}

/// Source mask for a prediction dataset made only of control cells. Without split
/// covariates every cell is source 0; otherwise each discovered split must own at
/// least one cell.
pub fn source_split_mask(discovery: &Discovery, frame: &AnnotationFrame) -> Result<IndexMask, PrepError> {
    if discovery.split_columns().is_empty() {
        return Ok(IndexMask::from_indices((0..frame.n_rows()).map(|_| Some(0))));
    }
    let view = frame.columns(discovery.split_columns())?;
    let mask = IndexMask::from_indices(
        (0..frame.n_rows()).map(|row| discovery.split_index(&AnnotationFrame::row_key(&view, row))),
    );

    let mut populated = vec![false; discovery.n_splits()];
    for split in mask.iter().flatten() {
        populated[split] = true;
    }
    if let Some(empty) = populated.iter().position(|&has_cells| !has_cells) {
        return Err(
            ResolutionError::EmptySourceSplit(render_values(discovery.split_values(empty))).into(),
        );
    }
    Ok(mask)
}
