use condprep::embedding::pad_to_length;
use condprep::{
    CellDataset, CovariateGroupConfig, CovariateValue, DataManager, MaskStrategy, PrepConfig,
    RepresentationStore, RepresentationTable, TrainingData,
};
use ndarray::{Array2, array};
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;

const DRUGS: [&str; 5] = ["A", "B", "C", "D", "E"];
const DOSES: [f64; 3] = [0.1, 1.0, 10.0];
const CELL_LINES: [&str; 3] = ["a549", "k562", "mcf7"];

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A random combination screen. Every cell line gets at least one treated and
/// one control cell so no split is control-only.
fn random_dataset(seed: u64, n_cells: usize) -> CellDataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut control = Vec::with_capacity(n_cells);
    let mut drug_1 = Vec::with_capacity(n_cells);
    let mut drug_2 = Vec::with_capacity(n_cells);
    let mut dose_1 = Vec::with_capacity(n_cells);
    let mut cell_line = Vec::with_capacity(n_cells);
    let mut donor_age = Vec::with_capacity(n_cells);

    for cell in 0..n_cells {
        let is_control = if cell < 2 * CELL_LINES.len() {
            cell % 2 == 0
        } else {
            rng.gen_bool(0.25)
        };
        control.push(is_control);
        cell_line.push(CELL_LINES[(cell / 2) % CELL_LINES.len()].to_string());
        donor_age.push([30.0, 60.0][rng.gen_range(0..2)]);
        if is_control {
            drug_1.push("ctrl".to_string());
            drug_2.push("ctrl".to_string());
            dose_1.push(0.0);
        } else {
            drug_1.push(DRUGS[rng.gen_range(0..DRUGS.len())].to_string());
            drug_2.push(
                if rng.gen_bool(0.5) {
                    "ctrl"
                } else {
                    DRUGS[rng.gen_range(0..DRUGS.len())]
                }
                .to_string(),
            );
            dose_1.push(DOSES[rng.gen_range(0..DOSES.len())]);
        }
    }

    let annotations = df! {
        "control" => control,
        "drug_1" => drug_1,
        "drug_2" => drug_2,
        "dose_1" => dose_1,
        "cell_line" => cell_line,
        "donor_age" => donor_age,
    }
    .unwrap();
    let features = Array2::from_shape_fn((n_cells, 4), |(cell, gene)| (cell + gene) as f64);
    let mut drug_table = RepresentationTable::new();
    for (position, drug) in DRUGS.iter().chain(["ctrl"].iter()).enumerate() {
        drug_table.insert(*drug, array![position as f64, 1.0, -1.0]);
    }
    CellDataset::new(features, annotations)
        .unwrap()
        .with_representations(RepresentationStore::new().with_table("drug_emb", drug_table))
}

fn config(strategy: MaskStrategy) -> PrepConfig {
    PrepConfig::new("control")
        .with_group(CovariateGroupConfig::new("drug", ["drug_1", "drug_2"]))
        .with_group(CovariateGroupConfig::with_optional_columns(
            "dose",
            vec![Some("dose_1".to_string()), None],
        ))
        .with_perturbation_rep("drug", "drug_emb")
        .with_sample_covariate("donor_age")
        .with_split_covariate("cell_line")
        .with_max_combination_length(3)
        .with_null_value(-9.0)
        .with_mask_strategy(strategy)
}

fn training(dataset: &CellDataset, strategy: MaskStrategy) -> TrainingData {
    DataManager::new(&config(strategy), dataset)
        .unwrap()
        .training_data(dataset)
        .unwrap()
}

#[test]
fn mask_strategies_agree_on_random_tables() {
    init_logging();
    for seed in 0..16 {
        let dataset = random_dataset(seed, 120 + 17 * seed as usize);
        let iterative = training(&dataset, MaskStrategy::Iterative);
        let joined = training(&dataset, MaskStrategy::HashJoin);

        assert_eq!(
            iterative.split_covariates_mask(),
            joined.split_covariates_mask(),
            "split masks differ for seed {seed}"
        );
        assert_eq!(
            iterative.perturbation_covariates_mask(),
            joined.perturbation_covariates_mask(),
            "condition masks differ for seed {seed}"
        );
        assert_eq!(iterative.control_to_perturbation(), joined.control_to_perturbation());
        assert_eq!(iterative.condition_data(), joined.condition_data());
    }
}

#[test]
fn repeated_requests_are_identical() {
    init_logging();
    let dataset = random_dataset(99, 200);
    let manager = DataManager::new(&config(MaskStrategy::Auto), &dataset).unwrap();
    let first = manager.training_data(&dataset).unwrap();
    let second = manager.training_data(&dataset).unwrap();
    assert_eq!(first.split_covariates_mask(), second.split_covariates_mask());
    assert_eq!(
        first.perturbation_covariates_mask(),
        second.perturbation_covariates_mask()
    );
    assert_eq!(first.condition_data(), second.condition_data());
}

#[test]
fn every_cell_gets_exactly_one_index() {
    init_logging();
    for seed in [3, 7, 11] {
        let data = training(&random_dataset(seed, 150), MaskStrategy::Auto);
        let split = data.split_covariates_mask();
        let condition = data.perturbation_covariates_mask();
        for row in 0..split.len() {
            assert!(
                split.get(row).is_some() ^ condition.get(row).is_some(),
                "row {row} of seed {seed} has split {:?} and condition {:?}",
                split.get(row),
                condition.get(row)
            );
        }
    }
}

#[test]
fn control_to_perturbation_covers_each_condition_once() {
    init_logging();
    let data = training(&random_dataset(5, 180), MaskStrategy::Auto);
    let listed: Vec<usize> = data
        .control_to_perturbation()
        .values()
        .flatten()
        .copied()
        .collect();
    let unique: BTreeSet<usize> = listed.iter().copied().collect();
    assert_eq!(listed.len(), unique.len());
    assert_eq!(unique, (0..data.n_perturbations()).collect::<BTreeSet<_>>());

    for (&split, conditions) in data.control_to_perturbation() {
        for &condition in conditions {
            assert_eq!(data.discovery().split_of(condition), split);
        }
    }
}

#[test]
fn condition_tensors_follow_the_shape_contract() {
    init_logging();
    let data = training(&random_dataset(21, 160), MaskStrategy::Auto);
    let n_conditions = data.n_perturbations();
    let max_length = data.max_combination_length();
    let widths = [("drug", 3), ("dose", 1), ("donor_age", 1)];
    for (name, width) in widths {
        let tensor = data.condition_data().get(name).unwrap();
        assert_eq!(tensor.dim(), (n_conditions, max_length, width), "{name}");
    }
    assert_eq!(data.condition_data().num_conditions(), n_conditions);

    // The third slot of every group is padding.
    let drug = data.condition_data().get("drug").unwrap();
    assert!(drug.slice(ndarray::s![.., 2, ..]).iter().all(|&v| v == -9.0));
}

#[test]
fn padded_groups_are_unchanged_by_repadding() {
    let data = training(&random_dataset(8, 100), MaskStrategy::Auto);
    let drug = data.condition_data().get("drug").unwrap();
    for condition in drug.outer_iter() {
        let padded = condition.to_owned();
        let again = pad_to_length(padded.clone(), data.max_combination_length(), -9.0, "drug").unwrap();
        assert_eq!(padded, again);
    }
}

#[test]
fn treated_only_split_keeps_a_source_index() {
    init_logging();
    let annotations = df! {
        "control" => &[true, true, false, false, false, false],
        "drug" => &["ctrl", "ctrl", "A", "B", "A", "B"],
        "cell_line" => &["x", "x", "x", "x", "y", "y"],
    }
    .unwrap();
    let dataset = CellDataset::new(Array2::zeros((6, 2)), annotations).unwrap();
    let config = |strategy| {
        PrepConfig::new("control")
            .with_group(CovariateGroupConfig::new("drug", ["drug"]))
            .with_split_covariate("cell_line")
            .with_mask_strategy(strategy)
    };
    let run = |strategy| {
        DataManager::new(&config(strategy), &dataset)
            .unwrap()
            .training_data(&dataset)
            .unwrap()
    };
    let iterative = run(MaskStrategy::Iterative);
    let joined = run(MaskStrategy::HashJoin);

    assert_eq!(iterative.n_controls(), 2);
    assert_eq!(iterative.discovery().split_index(&[CovariateValue::from("y")]), Some(1));
    assert_eq!(
        iterative.split_covariates_mask().as_wire().to_vec(),
        vec![0, 0, -1, -1, -1, -1]
    );
    assert_eq!(
        iterative.perturbation_covariates_mask().as_wire().to_vec(),
        vec![-1, -1, 0, 1, 2, 3]
    );
    assert_eq!(iterative.control_to_perturbation().get(&1), Some(&vec![2, 3]));
    assert!(iterative.source_cells(1).is_empty());

    let split = iterative.split_covariates_mask();
    let condition = iterative.perturbation_covariates_mask();
    for row in 0..split.len() {
        assert!(split.get(row).is_some() ^ condition.get(row).is_some());
    }

    assert_eq!(iterative.split_covariates_mask(), joined.split_covariates_mask());
    assert_eq!(
        iterative.perturbation_covariates_mask(),
        joined.perturbation_covariates_mask()
    );
    assert_eq!(iterative.control_to_perturbation(), joined.control_to_perturbation());
}
