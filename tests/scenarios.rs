use approx::assert_abs_diff_eq;
use condprep::{
    CellDataset, ConfigError, CovariateGroupConfig, DataManager, PrepConfig, PrepError,
    RepresentationStore, RepresentationTable, ResolutionError, ShapeError,
};
use ndarray::{Array2, Axis, array};
use polars::prelude::*;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn repeat(value: &str, n: usize) -> Vec<&str> {
    vec![value; n]
}

fn scenario_a_store() -> RepresentationStore {
    RepresentationStore::new()
        .with_table(
            "time_emb",
            RepresentationTable::new()
                .with_entry("tA", array![1.0, 0.0])
                .with_entry("tB", array![0.0, 1.0]),
        )
        .with_table(
            "cell_line_emb",
            RepresentationTable::new().with_entry("k562", array![0.5, 0.5, 0.5]),
        )
}

fn scenario_a_config() -> PrepConfig {
    PrepConfig::new("control")
        .with_group(CovariateGroupConfig::new("drug", ["drug"]))
        .with_group(CovariateGroupConfig::new("time", ["time"]))
        .with_perturbation_rep("time", "time_emb")
        .with_sample_covariate("cell_line")
        .with_sample_rep_table("cell_line", "cell_line_emb")
}

fn scenario_a_dataset() -> CellDataset {
    let control: Vec<bool> = (0..10).map(|cell| cell < 5).collect();
    let mut drug = repeat("ctrl", 5);
    drug.extend(repeat("A", 5));
    let annotations = df! {
        "control" => control,
        "drug" => drug,
        "time" => repeat("tA", 10),
        "cell_line" => repeat("k562", 10),
    }
    .unwrap();
    let features = Array2::from_shape_fn((10, 3), |(cell, gene)| (cell * 3 + gene) as f64);
    CellDataset::new(features, annotations)
        .unwrap()
        .with_representations(scenario_a_store())
}

#[test]
fn scenario_a_single_condition_without_splits() {
    init_logging();
    let dataset = scenario_a_dataset();
    let manager = DataManager::new(&scenario_a_config(), &dataset).unwrap();
    let data = manager.training_data(&dataset).unwrap();

    assert_eq!(data.n_perturbations(), 1);
    assert_eq!(data.n_controls(), 1);
    assert_eq!(
        data.perturbation_covariates_mask().as_wire().to_vec(),
        vec![-1, -1, -1, -1, -1, 0, 0, 0, 0, 0]
    );
    assert_eq!(
        data.split_covariates_mask().as_wire().to_vec(),
        vec![0, 0, 0, 0, 0, -1, -1, -1, -1, -1]
    );
    assert_eq!(data.control_to_perturbation().get(&0), Some(&vec![0]));
    assert_eq!(data.control_to_perturbation().len(), 1);
    assert_eq!(data.target_cells(0), vec![5, 6, 7, 8, 9]);

    let tensors = data.condition_data();
    assert_eq!(tensors.get("drug").unwrap().dim(), (1, 1, 2));
    assert_eq!(
        tensors.get("drug").unwrap().index_axis(Axis(0), 0),
        array![[1.0, 0.0]]
    );
    assert_eq!(
        tensors.get("time").unwrap().index_axis(Axis(0), 0),
        array![[1.0, 0.0]]
    );
    assert_eq!(tensors.get("cell_line").unwrap().dim(), (1, 1, 3));
    assert_eq!(manager.primary_categories().unwrap(), &["A", "ctrl"]);
    assert_eq!(data.cell_data().dim(), (10, 3));
}

#[test]
fn scenario_b_missing_lookup_names_key_and_table() {
    init_logging();
    let store = RepresentationStore::new().with_table(
        "drug_emb",
        RepresentationTable::new().with_entry("B", array![1.0, 2.0]),
    );
    let annotations = df! {
        "control" => &[true, false],
        "drug" => &["ctrl", "A"],
    }
    .unwrap();
    let dataset = CellDataset::new(Array2::zeros((2, 2)), annotations)
        .unwrap()
        .with_representations(store);
    let config = PrepConfig::new("control")
        .with_group(CovariateGroupConfig::new("drug", ["drug"]))
        .with_perturbation_rep("drug", "drug_emb");

    let manager = DataManager::new(&config, &dataset).unwrap();
    assert!(manager.primary_categories().is_none());
    let err = manager.training_data(&dataset).unwrap_err();
    match &err {
        PrepError::Resolution(ResolutionError::MissingRepresentation { key, table }) => {
            assert_eq!(key, "A");
            assert_eq!(table, "drug_emb");
        }
        other => panic!("Expected MissingRepresentation, got {other:?}"),
    }
    let message = err.to_string();
    assert!(message.contains("'A'") && message.contains("'drug_emb'"));
}

#[test]
fn scenario_c_max_length_below_group_length() {
    init_logging();
    let annotations = df! {
        "control" => &[true, false],
        "d1" => &["ctrl", "A"],
        "d2" => &["ctrl", "B"],
        "d3" => &["ctrl", "C"],
    }
    .unwrap();
    let dataset = CellDataset::new(Array2::zeros((2, 1)), annotations).unwrap();
    let config = PrepConfig::new("control")
        .with_group(CovariateGroupConfig::new("drug", ["d1", "d2", "d3"]));

    let err = DataManager::new(&config.clone().with_max_combination_length(2), &dataset).unwrap_err();
    assert!(matches!(
        err,
        PrepError::Config(ConfigError::CombinationLengthTooSmall {
            configured: 2,
            observed: 3
        })
    ));

    let manager = DataManager::new(&config, &dataset).unwrap();
    assert_eq!(manager.spec().max_combination_length(), 3);
    let data = manager.training_data(&dataset).unwrap();
    assert_eq!(data.condition_data().get("drug").unwrap().dim(), (1, 3, 4));
}

#[test]
fn scenario_d_control_only_split_fails_at_construction() {
    init_logging();
    let annotations = df! {
        "control" => &[true, true, false, false],
        "drug" => &["ctrl", "ctrl", "A", "B"],
        "batch" => &["b1", "b2", "b2", "b2"],
    }
    .unwrap();
    let dataset = CellDataset::new(Array2::zeros((4, 1)), annotations).unwrap();
    let config = PrepConfig::new("control")
        .with_group(CovariateGroupConfig::new("drug", ["drug"]))
        .with_split_covariate("batch");

    let err = DataManager::new(&config, &dataset).unwrap_err();
    match err {
        PrepError::Config(ConfigError::UnreachableSplit(values)) => assert_eq!(values, vec!["b1"]),
        other => panic!("Expected UnreachableSplit, got {other:?}"),
    }
}

#[test]
fn scenario_e_continuous_primary_scales_name_code() {
    init_logging();
    let annotations = df! {
        "control" => &[true, false, false, false],
        "dose_a" => &[0.0, 0.5, 1.0, 0.5],
        "dose_b" => &[0.0, 1.0, 0.5, 1.0],
    }
    .unwrap();
    let dataset = CellDataset::new(Array2::zeros((4, 1)), annotations).unwrap();
    let config = PrepConfig::new("control")
        .with_group(CovariateGroupConfig::new("dose", ["dose_a", "dose_b"]));
    let manager = DataManager::new(&config, &dataset).unwrap();
    assert!(!manager.is_categorical());
    assert_eq!(manager.primary_categories().unwrap(), &["dose_a", "dose_b"]);

    let data = manager.training_data(&dataset).unwrap();
    assert_eq!(data.n_perturbations(), 2);
    let dose = data.condition_data().get("dose").unwrap();
    assert_eq!(dose.dim(), (2, 2, 2));

    // Conditions sort by (dose_a, dose_b): (0.5, 1.0) then (1.0, 0.5).
    let expected = [
        [[0.5, 0.0], [0.0, 1.0]],
        [[1.0, 0.0], [0.0, 0.5]],
    ];
    for (condition, rows) in expected.iter().enumerate() {
        for (slot, row) in rows.iter().enumerate() {
            for (feature, &value) in row.iter().enumerate() {
                assert_abs_diff_eq!(dose[[condition, slot, feature]], value, epsilon = 1e-12);
            }
        }
    }
    assert_eq!(
        data.perturbation_covariates_mask().as_wire().to_vec(),
        vec![-1, 0, 1, 0]
    );
}

#[test]
fn treated_rows_with_unseen_primary_values_fail_later_requests() {
    init_logging();
    let reference = df! {
        "control" => &[true, false],
        "drug" => &["ctrl", "A"],
    }
    .unwrap();
    let reference = CellDataset::new(Array2::zeros((2, 1)), reference).unwrap();
    let config = PrepConfig::new("control").with_group(CovariateGroupConfig::new("drug", ["drug"]));
    let manager = DataManager::new(&config, &reference).unwrap();

    let covariates = df! { "drug" => &["Z"] }.unwrap();
    let err = manager.condition_data(&covariates, None, None).unwrap_err();
    assert!(matches!(
        err,
        PrepError::Resolution(ResolutionError::UnknownCategory { .. })
    ));
}

#[test]
fn training_requires_control_cells() {
    init_logging();
    let reference = df! {
        "control" => &[true, false],
        "drug" => &["ctrl", "A"],
    }
    .unwrap();
    let reference = CellDataset::new(Array2::zeros((2, 1)), reference).unwrap();
    let config = PrepConfig::new("control").with_group(CovariateGroupConfig::new("drug", ["drug"]));
    let manager = DataManager::new(&config, &reference).unwrap();

    let treated_only = df! {
        "control" => &[false, false],
        "drug" => &["A", "A"],
    }
    .unwrap();
    let treated_only = CellDataset::new(Array2::zeros((2, 1)), treated_only).unwrap();
    let err = manager.training_data(&treated_only).unwrap_err();
    assert!(matches!(
        err,
        PrepError::Config(ConfigError::NoControlCells(column)) if column == "control"
    ));
}

#[test]
fn matrix_shaped_representation_aborts_the_request() {
    init_logging();
    let store = RepresentationStore::new().with_table(
        "drug_emb",
        RepresentationTable::new()
            .with_entry("A", array![1.0, 2.0, 3.0])
            .with_entry("B", Array2::<f64>::zeros((2, 3))),
    );
    let annotations = df! {
        "control" => &[true, false, false],
        "drug" => &["ctrl", "A", "B"],
    }
    .unwrap();
    let dataset = CellDataset::new(Array2::zeros((3, 1)), annotations)
        .unwrap()
        .with_representations(store);
    let config = PrepConfig::new("control")
        .with_group(CovariateGroupConfig::new("drug", ["drug"]))
        .with_perturbation_rep("drug", "drug_emb");

    let manager = DataManager::new(&config, &dataset).unwrap();
    let err = manager.training_data(&dataset).unwrap_err();
    assert!(matches!(
        err,
        PrepError::Shape(ShapeError::UnexpectedShape(ref shape)) if shape == &vec![2, 3]
    ));
}
