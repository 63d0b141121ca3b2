use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use salescast::{
    load, prepare_dataset, read_dataset_csv, read_importances_csv, read_raw_table,
    run_comparison, train_best_model, ArtifactError, ContractError, DataPaths,
    ParamDistributions, PipelineConfig, TuningConfig,
};
use tempfile::TempDir;

fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/raw")
}

/// Fresh data root holding the raw fixtures, with a config small enough for tests.
fn workspace() -> (TempDir, PipelineConfig) {
    let dir = tempfile::tempdir().expect("temp dir should be created");
    let paths = DataPaths::under(dir.path());
    std::fs::create_dir_all(dir.path().join("raw")).expect("raw dir should be created");
    for (name, dest) in [
        ("sales.csv", &paths.raw_sales),
        ("stores.csv", &paths.raw_stores),
        ("features.csv", &paths.raw_features),
    ] {
        std::fs::copy(fixtures_dir().join(name), dest).expect("fixture should copy");
    }

    let mut cfg = PipelineConfig {
        paths,
        ..PipelineConfig::default()
    };
    cfg.selection.forest.n_estimators = 25;
    cfg.tuning = TuningConfig {
        n_iter: 3,
        n_jobs: Some(2),
        distributions: ParamDistributions {
            n_estimators: 10..30,
            learning_rate: 0.05..0.2,
            max_depth: 2..4,
            min_samples_split: 2..6,
            min_samples_leaf: 1..3,
        },
        ..TuningConfig::default()
    };
    (dir, cfg)
}

#[test]
fn prepare_writes_every_stage_and_keeps_sales_row_count() {
    let (_dir, cfg) = workspace();
    let report = prepare_dataset(&cfg).expect("prepare should succeed");
    let paths = &cfg.paths;

    for path in [
        &paths.cleaned_sales,
        &paths.cleaned_stores,
        &paths.cleaned_features,
        &paths.merged,
        &paths.engineered,
        &paths.importances,
        &paths.top_features,
        &paths.reduced,
    ] {
        assert!(path.exists(), "{} should exist", path.display());
    }

    assert_eq!(report.sales.output_rows, 96);
    assert_eq!(report.merge.rows, report.sales.output_rows);
    assert_eq!(report.merge.features.unmatched_rows, 0);
    assert_eq!(report.merge.stores.unmatched_rows, 0);
    assert_eq!(report.timeseries.groups, 6);

    let merged = read_raw_table(&paths.merged).expect("merged table should read");
    assert_eq!(merged.len(), 96);
    for column in ["Week_x", "Week_y", "Type_B", "Size_log", "MarkDown1"] {
        assert!(
            merged.column_index(column).is_some(),
            "merged table should carry {column}"
        );
    }

    let engineered = read_raw_table(&paths.engineered).expect("engineered table should read");
    assert_eq!(engineered.len(), 96);
    for column in ["lag_1", "lag_7", "lag_30", "rolling_7", "rolling_30"] {
        assert!(engineered.column_index(column).is_some());
    }
}

#[test]
fn importances_sum_to_one_and_reduced_table_follows_top_k() {
    let (_dir, cfg) = workspace();
    let report = prepare_dataset(&cfg).expect("prepare should succeed");

    let importances = read_importances_csv(&cfg.paths.importances).expect("importances read");
    assert_eq!(importances.len(), report.selection.candidates);
    let total: f64 = importances.iter().map(|f| f.importance).sum();
    assert!((total - 1.0).abs() < 1e-9, "importances sum to {total}");
    assert!(importances
        .windows(2)
        .all(|w| w[0].importance >= w[1].importance));

    let top = read_importances_csv(&cfg.paths.top_features).expect("top features read");
    assert_eq!(top.len(), cfg.selection.top_k.min(importances.len()));
    assert_eq!(top[..], importances[..top.len()]);

    let reduced = read_dataset_csv(&cfg.paths.reduced, "Weekly_Sales").expect("reduced read");
    let expected: Vec<String> = top.iter().map(|f| f.feature.clone()).collect();
    assert_eq!(reduced.feature_names, expected);
    assert_eq!(report.selected_features, expected);
    assert_eq!(reduced.n_samples(), 96);
}

#[test]
fn selection_is_deterministic_for_a_fixed_seed() {
    let (_a, cfg_a) = workspace();
    let (_b, cfg_b) = workspace();
    prepare_dataset(&cfg_a).expect("first run should succeed");
    prepare_dataset(&cfg_b).expect("second run should succeed");

    let first = read_importances_csv(&cfg_a.paths.importances).expect("first importances");
    let second = read_importances_csv(&cfg_b.paths.importances).expect("second importances");
    assert_eq!(first, second);

    let reduced_a = std::fs::read_to_string(&cfg_a.paths.reduced).expect("first reduced");
    let reduced_b = std::fs::read_to_string(&cfg_b.paths.reduced).expect("second reduced");
    assert_eq!(reduced_a, reduced_b);
}

#[test]
fn missing_raw_source_aborts_before_staging_writes() {
    let (_dir, cfg) = workspace();
    std::fs::remove_file(&cfg.paths.raw_features).expect("fixture should be removable");

    assert!(prepare_dataset(&cfg).is_err());
    assert!(!cfg.paths.cleaned_sales.exists());
    assert!(!cfg.paths.merged.exists());
}

#[test]
fn comparison_and_tuning_produce_a_servable_artifact() {
    let (_dir, cfg) = workspace();
    prepare_dataset(&cfg).expect("prepare should succeed");

    let leaderboard = run_comparison(&cfg).expect("comparison should succeed");
    assert_eq!(leaderboard.len(), 6);
    assert!(leaderboard.windows(2).all(|w| w[0].rmse <= w[1].rmse));
    let text = std::fs::read_to_string(&cfg.paths.leaderboard).expect("leaderboard written");
    assert!(text.starts_with("Model,RMSE,MAE,R2,TrainRows\n"));
    assert_eq!(text.lines().count(), 7);

    let report = train_best_model(&cfg).expect("training should succeed");
    assert_eq!(report.model_name, "Gradient Boosting");
    assert!(report.best_score <= 0.0);

    let cv = read_raw_table(&cfg.paths.cv_results).expect("cv results read");
    assert_eq!(cv.len(), 3);
    assert_eq!(cv.value(0, 0), "1");

    let artifact = load(&cfg.paths.artifact).expect("artifact should load");
    assert_eq!(artifact.fingerprint, report.fingerprint);
    assert_eq!(artifact.feature_names, report.feature_names);

    let reduced = read_dataset_csv(&cfg.paths.reduced, "Weekly_Sales").expect("reduced read");
    let row: BTreeMap<String, f64> = reduced
        .feature_names
        .iter()
        .cloned()
        .zip(reduced.features.row(10).iter().copied())
        .collect();

    let first = artifact.predict(&row).expect("prediction should succeed");
    let second = artifact.predict(&row).expect("prediction should succeed");
    assert_eq!(first, second);
    assert!(first.is_finite());
    let ordered: Vec<f64> = reduced.features.row(10).to_vec();
    assert_eq!(artifact.predict_values(&ordered).expect("ordered predict"), first);

    let mut partial = row.clone();
    let dropped = artifact.feature_names[0].clone();
    partial.remove(&dropped);
    match artifact.predict(&partial) {
        Err(ArtifactError::Contract(ContractError::MissingFeatures(names))) => {
            assert_eq!(names, vec![dropped]);
        }
        other => panic!("expected a missing-feature error, got {other:?}"),
    }
    assert_eq!(artifact.predict(&row).expect("artifact still usable"), first);
}
