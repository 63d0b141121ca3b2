//! Salescast core crate.
//!
//! Weekly retail sales forecasting:
//! - cleaning of the raw sales, stores and features sources
//! - merge, grouped lag and rolling features, importance-based selection
//! - model comparison, randomized gradient-boosting search, artifact store
//! - JSON inference over a cached artifact

mod artifact;
mod cleaning;
mod config;
mod dataset;
mod ensemble;
mod kernel;
mod linear;
mod merge;
mod metrics;
mod models;
mod neighbors;
mod observability;
mod pipeline;
mod preprocessing;
mod selection;
mod serving;
mod table;
mod timeseries;
mod training;
mod tree;
mod tuning;

pub use artifact::{
    artifact_fingerprint, load, persist, ArtifactError, ContractError, ModelArtifact,
    ARTIFACT_FORMAT_VERSION,
};
pub use cleaning::{
    clean_source, median, CleanError, CleanReport, CleanerConfig, DerivedFeature, FieldKind,
    FieldSpec, MacroRollingScope, MissingPolicy, SourceKind, CALENDAR_COLUMNS, MACRO_FIELDS,
    MARKDOWN_FIELDS, RAW_DATE_FORMAT,
};
pub use config::{
    pipeline_config_from_env, read_pipeline_config, ConfigError, DataPaths, PipelineConfig,
    DEFAULT_DATA_ROOT,
};
pub use dataset::{
    k_fold, numeric_candidates, read_dataset_csv, train_test_split, DatasetError, NumericDataset,
    SplitIndices, TARGET_COLUMN,
};
pub use ensemble::{
    GradientBoostingModel, GradientBoostingParams, RandomForestModel, RandomForestParams,
};
pub use kernel::{Gamma, SvrModel, SvrParams};
pub use linear::{LassoParams, LinearModel};
pub use merge::{
    left_join, merge_sources, JoinReport, MergeError, MergeReport,
    FEATURE_JOIN_KEYS, MERGE_SUFFIXES, STORE_JOIN_KEYS,
};
pub use metrics::{mae, r2, rmse, RegressionMetrics};
pub use models::{FittedModel, ModelError, ModelSpec};
pub use neighbors::KnnModel;
pub use observability::{
    init_logging, log_app_bind, log_app_start, log_stage, logging_config_from_env, LogFormat,
    LoggingConfig, LoggingInitError,
};
pub use pipeline::{
    prepare_dataset, run_comparison, train_best_model, PipelineError, PrepareReport, TrainReport,
};
pub use preprocessing::{column_medians, fit_lambda, impute, yeo_johnson, Preprocessor};
pub use selection::{
    rank_importances, read_importances_csv, select_features, write_importances_csv,
    FeatureImportance, SelectionConfig, SelectionError, SelectionOutcome, SelectionReport,
};
pub use serving::{
    serving_router, summarize_dataset, DatasetSummary, DeptMean, ErrorBody, ModelInfo,
    ModelSource, PredictRequest, PredictResponse, ServingCache, ServingError, TargetStats,
};
pub use table::{
    date_column, float_values, is_missing_token, is_numeric_dtype, read_raw_table,
    write_frame_csv, RawTable, TableError, MISSING_TOKENS,
};
pub use timeseries::{
    generate_time_series_features, FeatureGenError, TimeSeriesConfig, TimeSeriesReport,
};
pub use training::{
    compare_models, default_candidates, write_leaderboard_csv, ComparisonConfig, ModelResult,
    Pipeline, TrainingError,
};
pub use tree::{Node, RegressionTree, TreeParams};
pub use tuning::{
    sample_configurations, tune_gradient_boosting, write_cv_results_csv, CvResult,
    ParamDistributions, TuningConfig, TuningError, TuningOutcome,
};
