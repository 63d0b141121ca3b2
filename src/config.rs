//! File layout and run configuration for the batch stages.
//!
//! `SALESCAST_CONFIG` may point at a JSON file holding a partial
//! [`PipelineConfig`]; it is applied first and the individual env overrides
//! win over it.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::cleaning::{CleanerConfig, MacroRollingScope};
use crate::models::ModelSpec;
use crate::selection::SelectionConfig;
use crate::timeseries::TimeSeriesConfig;
use crate::training::ComparisonConfig;
use crate::tuning::TuningConfig;

pub const DEFAULT_DATA_ROOT: &str = "data";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value '{value}' for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPaths {
    pub raw_sales: PathBuf,
    pub raw_stores: PathBuf,
    pub raw_features: PathBuf,
    pub cleaned_sales: PathBuf,
    pub cleaned_stores: PathBuf,
    pub cleaned_features: PathBuf,
    pub merged: PathBuf,
    pub engineered: PathBuf,
    pub importances: PathBuf,
    pub top_features: PathBuf,
    pub reduced: PathBuf,
    pub leaderboard: PathBuf,
    pub cv_results: PathBuf,
    pub artifact: PathBuf,
}

impl Default for DataPaths {
    fn default() -> Self {
        Self::under(DEFAULT_DATA_ROOT)
    }
}

impl DataPaths {
    /// The standard layout below `root`.
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            raw_sales: root.join("raw/sales.csv"),
            raw_stores: root.join("raw/stores.csv"),
            raw_features: root.join("raw/features.csv"),
            cleaned_sales: root.join("staging/cleaned_sales.csv"),
            cleaned_stores: root.join("staging/cleaned_stores.csv"),
            cleaned_features: root.join("staging/cleaned_features.csv"),
            merged: root.join("merged/merged_dataset.csv"),
            engineered: root.join("merged/engineered_dataset.csv"),
            importances: root.join("final/feature_importances.csv"),
            top_features: root.join("final/top_features.csv"),
            reduced: root.join("final/reduced_dataset.csv"),
            leaderboard: root.join("reports/model_results.csv"),
            cv_results: root.join("reports/cv_results.csv"),
            artifact: root.join("models/best_model.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: DataPaths,
    pub macro_rolling_scope: MacroRollingScope,
    pub timeseries: TimeSeriesConfig,
    pub selection: SelectionConfig,
    pub comparison: ComparisonConfig,
    pub tuning: TuningConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            paths: DataPaths::default(),
            macro_rolling_scope: MacroRollingScope::Global,
            timeseries: TimeSeriesConfig::default(),
            selection: SelectionConfig::default(),
            comparison: ComparisonConfig::default(),
            tuning: TuningConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn sales_cleaner(&self) -> CleanerConfig {
        CleanerConfig::sales()
    }

    pub fn stores_cleaner(&self) -> CleanerConfig {
        CleanerConfig::stores()
    }

    pub fn features_cleaner(&self) -> CleanerConfig {
        CleanerConfig::features_with_scope(self.macro_rolling_scope)
    }

    pub fn target_column(&self) -> &str {
        &self.selection.target_column
    }

    /// Caps the training rows of every SVR candidate.
    pub fn apply_svr_max_rows(&mut self, max_rows: usize) {
        for model in &mut self.comparison.models {
            if let ModelSpec::Svr(params) = model {
                params.max_train_rows = max_rows;
            }
        }
    }

    fn svr_max_rows(&self) -> Option<usize> {
        self.comparison.models.iter().find_map(|model| match model {
            ModelSpec::Svr(params) => Some(params.max_train_rows),
            _ => None,
        })
    }

    /// Reseeds every randomised stage.
    pub fn apply_seed(&mut self, seed: u64) {
        self.selection.seed = seed;
        self.selection.forest.seed = seed;
        self.comparison.seed = seed;
        for model in &mut self.comparison.models {
            match model {
                ModelSpec::GradientBoosting(params) => params.seed = seed,
                ModelSpec::Svr(params) => params.seed = seed,
                ModelSpec::LinearRegression
                | ModelSpec::Ridge { .. }
                | ModelSpec::Lasso(_)
                | ModelSpec::Knn { .. } => {}
            }
        }
        self.tuning.seed = seed;
    }
}

pub fn read_pipeline_config(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let bytes = fs::read(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub fn pipeline_config_from_env() -> Result<PipelineConfig, ConfigError> {
    let mut config = match non_empty_var("SALESCAST_CONFIG") {
        Some(path) => read_pipeline_config(Path::new(&path))?,
        None => PipelineConfig::default(),
    };

    if let Some(root) = non_empty_var("SALESCAST_DATA_ROOT") {
        config.paths = DataPaths::under(root);
    }
    if let Some(seed) = parse_var::<u64>("SALESCAST_SEED")? {
        config.apply_seed(seed);
    }
    if let Some(top_k) = parse_var::<usize>("SALESCAST_TOP_K")? {
        config.selection.top_k = top_k;
    }
    if let Some(n_iter) = parse_var::<usize>("SALESCAST_SEARCH_ITERATIONS")? {
        config.tuning.n_iter = n_iter;
    }
    if let Some(folds) = parse_var::<usize>("SALESCAST_CV_FOLDS")? {
        config.tuning.cv_folds = folds;
    }
    if let Some(n_jobs) = parse_var::<usize>("SALESCAST_N_JOBS")? {
        config.tuning.n_jobs = Some(n_jobs);
    }
    if let Some(max_rows) = parse_var::<usize>("SALESCAST_SVR_MAX_ROWS")? {
        if max_rows == 0 {
            return Err(ConfigError::InvalidEnv {
                var: "SALESCAST_SVR_MAX_ROWS",
                value: max_rows.to_string(),
            });
        }
        config.apply_svr_max_rows(max_rows);
    }
    if let Some(raw) = non_empty_var("SALESCAST_MACRO_ROLLING_SCOPE") {
        config.macro_rolling_scope =
            parse_rolling_scope(&raw).ok_or(ConfigError::InvalidEnv {
                var: "SALESCAST_MACRO_ROLLING_SCOPE",
                value: raw,
            })?;
    }

    info!(
        component = "config",
        event = "config.resolved",
        artifact_path = %config.paths.artifact.display(),
        seed = config.tuning.seed,
        top_k = config.selection.top_k,
        search_iterations = config.tuning.n_iter,
        cv_folds = config.tuning.cv_folds,
        n_jobs = ?config.tuning.n_jobs,
        svr_max_rows = ?config.svr_max_rows(),
        macro_rolling_scope = ?config.macro_rolling_scope
    );

    Ok(config)
}

fn non_empty_var(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn parse_var<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match non_empty_var(var) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value: raw }),
    }
}

fn parse_rolling_scope(raw: &str) -> Option<MacroRollingScope> {
    match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
        "global" => Some(MacroRollingScope::Global),
        "per_store" | "store" => Some(MacroRollingScope::PerStore),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    const VARS: [&str; 9] = [
        "SALESCAST_CONFIG",
        "SALESCAST_DATA_ROOT",
        "SALESCAST_SEED",
        "SALESCAST_TOP_K",
        "SALESCAST_SEARCH_ITERATIONS",
        "SALESCAST_CV_FOLDS",
        "SALESCAST_N_JOBS",
        "SALESCAST_SVR_MAX_ROWS",
        "SALESCAST_MACRO_ROLLING_SCOPE",
    ];

    fn env_lock() -> &'static Mutex<()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    /// Runs `f` with exactly `vars` set among the config variables.
    fn with_env_vars<R>(vars: &[(&str, &str)], f: impl FnOnce() -> R) -> R {
        let _guard = env_lock().lock().expect("env lock should not be poisoned");
        let previous: Vec<(&str, Option<String>)> =
            VARS.iter().map(|key| (*key, env::var(key).ok())).collect();

        for key in VARS {
            env::remove_var(key);
        }
        for (key, value) in vars {
            env::set_var(key, value);
        }

        let output = f();

        for (key, value) in previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
        output
    }

    #[test]
    fn defaults_when_env_missing() {
        let cfg = with_env_vars(&[], pipeline_config_from_env).unwrap();
        assert_eq!(cfg, PipelineConfig::default());
        assert_eq!(cfg.paths.artifact, PathBuf::from("data/models/best_model.json"));
        assert_eq!(cfg.paths.reduced, PathBuf::from("data/final/reduced_dataset.csv"));
    }

    #[test]
    fn env_overrides_are_applied() {
        let cfg = with_env_vars(
            &[
                ("SALESCAST_DATA_ROOT", "/tmp/run"),
                ("SALESCAST_SEED", "7"),
                ("SALESCAST_TOP_K", "5"),
                ("SALESCAST_SEARCH_ITERATIONS", "4"),
                ("SALESCAST_CV_FOLDS", "5"),
                ("SALESCAST_N_JOBS", "2"),
                ("SALESCAST_SVR_MAX_ROWS", "500"),
                ("SALESCAST_MACRO_ROLLING_SCOPE", "per_store"),
            ],
            pipeline_config_from_env,
        )
        .unwrap();

        assert_eq!(cfg.paths.raw_sales, PathBuf::from("/tmp/run/raw/sales.csv"));
        assert_eq!(cfg.selection.seed, 7);
        assert_eq!(cfg.selection.forest.seed, 7);
        assert_eq!(cfg.tuning.seed, 7);
        assert!(cfg.comparison.models.iter().all(|m| match m {
            ModelSpec::GradientBoosting(p) => p.seed == 7,
            ModelSpec::Svr(p) => p.seed == 7 && p.max_train_rows == 500,
            _ => true,
        }));
        assert_eq!(cfg.svr_max_rows(), Some(500));
        assert_eq!(cfg.selection.top_k, 5);
        assert_eq!(cfg.tuning.n_iter, 4);
        assert_eq!(cfg.tuning.cv_folds, 5);
        assert_eq!(cfg.tuning.n_jobs, Some(2));
        assert_eq!(cfg.macro_rolling_scope, MacroRollingScope::PerStore);
    }

    #[test]
    fn invalid_number_is_an_error() {
        let result = with_env_vars(&[("SALESCAST_TOP_K", "ten")], pipeline_config_from_env);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidEnv { var: "SALESCAST_TOP_K", .. })
        ));
    }

    #[test]
    fn zero_svr_row_cap_is_an_error() {
        let result = with_env_vars(&[("SALESCAST_SVR_MAX_ROWS", "0")], pipeline_config_from_env);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidEnv { var: "SALESCAST_SVR_MAX_ROWS", .. })
        ));
    }

    #[test]
    fn partial_config_file_is_loaded_before_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("salescast.json");
        std::fs::write(
            &path,
            r#"{"macro_rolling_scope":"PerStore","tuning":{"n_iter":3,"cv_folds":4,"n_jobs":1,"test_fraction":0.25,"seed":9,"distributions":{"n_estimators":{"start":10,"end":20},"learning_rate":{"start":0.05,"end":0.1},"max_depth":{"start":2,"end":4},"min_samples_split":{"start":2,"end":5},"min_samples_leaf":{"start":1,"end":3}}}}"#,
        )
        .unwrap();
        let path_str = path.to_string_lossy().to_string();

        let cfg = with_env_vars(
            &[("SALESCAST_CONFIG", &path_str), ("SALESCAST_CV_FOLDS", "2")],
            pipeline_config_from_env,
        )
        .unwrap();

        assert_eq!(cfg.macro_rolling_scope, MacroRollingScope::PerStore);
        assert_eq!(cfg.tuning.n_iter, 3);
        assert_eq!(cfg.tuning.cv_folds, 2);
        assert_eq!(cfg.selection, SelectionConfig::default());
    }
}
