use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate};
use ndarray::{Array1, Array2};
use polars::prelude::{DataFrame, DataType};
use salescast::{
    clean_source, float_values, generate_time_series_features, merge_sources, read_raw_table,
    ArtifactError, CleanError, CleanerConfig, ContractError, MergeError, ModelArtifact, ModelSpec,
    Pipeline, RawTable, TimeSeriesConfig, RAW_DATE_FORMAT,
};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn cleaned(path: PathBuf, cfg: &CleanerConfig) -> DataFrame {
    let raw = read_raw_table(&path).expect("fixture should read");
    clean_source(&raw, cfg).expect("fixture should clean").0
}

fn raw(csv: &str) -> RawTable {
    RawTable::from_reader(csv.as_bytes()).expect("inline table should parse")
}

fn floats(frame: &DataFrame, column: &str) -> Vec<Option<f64>> {
    float_values(frame, column).expect("column should exist")
}

fn assert_close(actual: Option<f64>, expected: f64, what: &str) {
    let actual = actual.unwrap_or_else(|| panic!("{what} should be present"));
    assert!(
        (actual - expected).abs() < 1e-9,
        "{what}: expected {expected}, got {actual}"
    );
}

#[test]
fn lags_and_rolling_means_follow_date_order_within_a_series() {
    let sales = cleaned(fixture("scenario_a_sales.csv"), &CleanerConfig::sales());
    let (engineered, report) =
        generate_time_series_features(&sales, &TimeSeriesConfig::default())
            .expect("features should generate");

    assert_eq!(report.groups, 1);
    assert_eq!(
        floats(&engineered, "Weekly_Sales"),
        vec![Some(100.0), Some(200.0), Some(150.0)]
    );
    assert_eq!(
        floats(&engineered, "lag_1"),
        vec![None, Some(100.0), Some(200.0)]
    );
    assert_eq!(floats(&engineered, "lag_7"), vec![None, None, None]);
    assert_eq!(
        floats(&engineered, "rolling_7"),
        vec![Some(100.0), Some(150.0), Some(150.0)]
    );
}

#[test]
fn forty_weeks_in_reverse_order_get_every_lag_and_window() {
    let start = NaiveDate::from_ymd_opt(2010, 2, 5).expect("valid date");
    let weekly_sales: Vec<f64> = (0..40).map(|i| 100.0 + (i * i % 17) as f64 * 3.5 + i as f64).collect();
    let mut csv = String::from("Store,Dept,Date,Weekly_Sales,IsHoliday\n");
    for i in (0..40).rev() {
        let date = start + Duration::weeks(i as i64);
        csv.push_str(&format!(
            "1,1,{},{},FALSE\n",
            date.format(RAW_DATE_FORMAT),
            weekly_sales[i]
        ));
    }
    let (sales, _) = clean_source(&raw(&csv), &CleanerConfig::sales()).expect("sales should clean");
    let (engineered, report) = generate_time_series_features(&sales, &TimeSeriesConfig::default())
        .expect("features should generate");

    assert_eq!(report.groups, 1);
    assert_eq!(engineered.height(), 40);
    let ws = floats(&engineered, "Weekly_Sales");
    assert_eq!(ws, weekly_sales.iter().copied().map(Some).collect::<Vec<_>>());

    let lag_1 = floats(&engineered, "lag_1");
    let lag_7 = floats(&engineered, "lag_7");
    let lag_30 = floats(&engineered, "lag_30");
    let rolling_7 = floats(&engineered, "rolling_7");
    let rolling_30 = floats(&engineered, "rolling_30");
    for i in 0..40 {
        assert_eq!(lag_1[i], i.checked_sub(1).map(|j| weekly_sales[j]), "lag_1 row {i}");
        assert_eq!(lag_7[i], i.checked_sub(7).map(|j| weekly_sales[j]), "lag_7 row {i}");
        assert_eq!(lag_30[i], i.checked_sub(30).map(|j| weekly_sales[j]), "lag_30 row {i}");

        for (window, values) in [(7usize, &rolling_7), (30, &rolling_30)] {
            let from = (i + 1).saturating_sub(window);
            let slice = &weekly_sales[from..=i];
            let mean = slice.iter().sum::<f64>() / slice.len() as f64;
            assert_close(values[i], mean, &format!("rolling_{window} row {i}"));
        }
    }
}

#[test]
fn out_of_order_dates_are_resorted_within_each_series() {
    let sales = raw(
        "Store,Dept,Date,Weekly_Sales,IsHoliday\n\
         1,1,19/02/2010,30,FALSE\n\
         2,1,12/02/2010,200,FALSE\n\
         1,1,05/02/2010,10,FALSE\n\
         2,1,05/02/2010,100,FALSE\n\
         1,1,12/02/2010,20,FALSE\n",
    );
    let (sales, _) = clean_source(&sales, &CleanerConfig::sales()).expect("sales should clean");
    let (engineered, report) = generate_time_series_features(&sales, &TimeSeriesConfig::default())
        .expect("features should generate");

    assert_eq!(report.groups, 2);
    assert_eq!(
        floats(&engineered, "Weekly_Sales"),
        vec![Some(10.0), Some(20.0), Some(30.0), Some(100.0), Some(200.0)]
    );
    assert_eq!(
        floats(&engineered, "lag_1"),
        vec![None, Some(10.0), Some(20.0), None, Some(100.0)]
    );
    assert_eq!(
        floats(&engineered, "rolling_7"),
        vec![Some(10.0), Some(15.0), Some(20.0), Some(100.0), Some(150.0)]
    );
}

#[test]
fn sales_without_a_target_column_is_rejected_by_name() {
    let table = raw("Store,Dept,Date,IsHoliday\n1,1,05/02/2010,FALSE\n");
    let err = clean_source(&table, &CleanerConfig::sales()).expect_err("missing column must fail");
    assert!(matches!(
        err,
        CleanError::MissingColumn { ref column, .. } if column == "Weekly_Sales"
    ));
}

#[test]
fn lags_never_cross_group_boundaries() {
    let raw = RawTable::from_reader(
        "Store,Dept,Date,Weekly_Sales,IsHoliday\n\
         1,2,05/02/2010,10,FALSE\n\
         1,1,05/02/2010,1000,FALSE\n\
         1,2,12/02/2010,20,FALSE\n\
         1,1,12/02/2010,2000,FALSE\n"
            .as_bytes(),
    )
    .expect("inline table should parse");
    let (sales, _) = clean_source(&raw, &CleanerConfig::sales()).expect("sales should clean");
    let (engineered, _) = generate_time_series_features(&sales, &TimeSeriesConfig::default())
        .expect("features should generate");

    // Dept 1 sorts first, then Dept 2.
    assert_eq!(
        floats(&engineered, "lag_1"),
        vec![None, Some(1000.0), None, Some(10.0)]
    );
    assert_eq!(
        floats(&engineered, "rolling_7"),
        vec![Some(1000.0), Some(1500.0), Some(10.0), Some(15.0)]
    );
}

#[test]
fn store_without_markdowns_is_zero_filled() {
    let features = cleaned(fixture("raw/features.csv"), &CleanerConfig::features());
    let stores = floats(&features, "Store");
    let markdown = floats(&features, "MarkDown1");

    let store_two: Vec<Option<f64>> = stores
        .iter()
        .zip(&markdown)
        .filter(|(store, _)| **store == Some(2.0))
        .map(|(_, value)| *value)
        .collect();
    assert_eq!(store_two.len(), 16);
    assert!(store_two.iter().all(|v| *v == Some(0.0)));
    assert_eq!(features.column("MarkDown1").expect("markdown").null_count(), 0);
}

#[test]
fn store_type_b_is_one_hot_encoded() {
    let stores = cleaned(fixture("raw/stores.csv"), &CleanerConfig::stores());
    let row = floats(&stores, "Store")
        .iter()
        .position(|store| *store == Some(2.0))
        .expect("store 2 should be present");

    assert_eq!(floats(&stores, "Type_B")[row], Some(1.0));
    assert_eq!(floats(&stores, "Type_A")[row], Some(0.0));
    assert_eq!(floats(&stores, "Type_C")[row], Some(0.0));
    // Size was missing for store 2 and takes the median of the other stores.
    assert_eq!(floats(&stores, "Size")[row], Some((151315.0 + 34875.0) / 2.0));
}

#[test]
fn merge_keeps_every_sales_row_even_without_matches() {
    let sales = cleaned(fixture("raw/sales.csv"), &CleanerConfig::sales());
    let features = cleaned(fixture("raw/features.csv"), &CleanerConfig::features());
    let stores = cleaned(fixture("raw/stores.csv"), &CleanerConfig::stores()).head(Some(2));

    let (merged, report) = merge_sources(&sales, &features, &stores).expect("merge should succeed");
    assert_eq!(merged.height(), sales.height());
    assert_eq!(report.stores.unmatched_rows, 32);

    let sizes = floats(&merged, "Size");
    for (row, store) in floats(&merged, "Store").iter().enumerate() {
        if *store == Some(3.0) {
            assert_eq!(sizes[row], None);
        }
    }
    assert_eq!(
        merged.column("IsHoliday").expect("holiday").dtype(),
        &DataType::Boolean
    );
}

#[test]
fn duplicate_feature_week_is_rejected_as_fan_out() {
    let (sales, _) = clean_source(
        &raw("Store,Dept,Date,Weekly_Sales,IsHoliday\n1,1,05/02/2010,100,FALSE\n"),
        &CleanerConfig::sales(),
    )
    .expect("sales should clean");
    // Same (Store, Date, IsHoliday) twice with different readings, so dedup keeps both.
    let (features, _) = clean_source(
        &raw("Store,Date,Temperature,Fuel_Price,MarkDown1,MarkDown2,MarkDown3,MarkDown4,MarkDown5,CPI,Unemployment,IsHoliday\n\
              1,05/02/2010,40,2.5,NA,NA,NA,NA,NA,210,8,FALSE\n\
              1,05/02/2010,41,2.6,NA,NA,NA,NA,NA,211,8,FALSE\n"),
        &CleanerConfig::features(),
    )
    .expect("features should clean");
    assert_eq!(features.height(), 2);
    let (stores, _) = clean_source(&raw("Store,Type,Size\n1,A,1000\n"), &CleanerConfig::stores())
        .expect("stores should clean");

    let err = merge_sources(&sales, &features, &stores).expect_err("fan-out must be rejected");
    assert!(matches!(
        err,
        MergeError::DuplicateRightKey { ref table, .. } if table == "features"
    ));
}

#[test]
fn partial_feature_request_is_a_contract_error() {
    let names: Vec<String> = (1..=10).map(|i| format!("f{i}")).collect();
    let x = Array2::from_shape_fn((40, 10), |(i, j)| ((i * (j + 3)) % 17) as f64);
    let y = Array1::from_shape_fn(40, |i| 5.0 * (i % 7) as f64 + 1.0);
    let spec = ModelSpec::Ridge { alpha: 1.0 };
    let pipeline = Pipeline::fit(&spec, x.view(), y.view()).expect("pipeline should fit");
    let metrics = pipeline.evaluate(x.view(), y.view()).expect("evaluate");
    let artifact = ModelArtifact::new(names.clone(), "Weekly_Sales", spec, pipeline, metrics)
        .expect("artifact should build");

    let nine: BTreeMap<String, f64> = names.iter().take(9).map(|n| (n.clone(), 1.0)).collect();
    let err = artifact.predict(&nine).expect_err("nine features must be rejected");
    assert!(matches!(
        err,
        ArtifactError::Contract(ContractError::MissingFeatures(ref missing)) if missing == &vec!["f10".to_string()]
    ));

    let ten: BTreeMap<String, f64> = names.iter().map(|n| (n.clone(), 1.0)).collect();
    let prediction = artifact.predict(&ten).expect("full request should predict");
    assert_eq!(artifact.predict(&ten).expect("repeat predict"), prediction);
}
