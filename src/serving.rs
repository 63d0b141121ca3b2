//! Process-wide model cache and the JSON prediction routes.
//!
//! The artifact and the reduced-dataset summary load lazily on first use and
//! stay cached for the life of the process. `reload` is the only other way
//! to replace them.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::artifact::{load, ArtifactError, ModelArtifact};
use crate::dataset::{read_dataset_csv, DatasetError, NumericDataset};
use crate::metrics::RegressionMetrics;
use crate::models::ModelSpec;

#[derive(Debug, Error)]
pub enum ServingError {
    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),
    #[error("dataset error: {0}")]
    Dataset(#[from] DatasetError),
}

pub trait ModelSource: Send + Sync + 'static {
    fn artifact(&self) -> Result<Arc<ModelArtifact>, ServingError>;
    fn dataset_summary(&self) -> Result<Arc<DatasetSummary>, ServingError>;
    fn reload(&self) -> Result<Arc<ModelArtifact>, ServingError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetStats {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeptMean {
    pub dept: i64,
    pub mean_target: f64,
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub rows: usize,
    pub columns: Vec<String>,
    pub target: Option<TargetStats>,
    /// Present when the table carries a `Dept` feature.
    pub mean_target_by_dept: Option<Vec<DeptMean>>,
}

pub fn summarize_dataset(dataset: &NumericDataset) -> DatasetSummary {
    let n = dataset.n_samples();
    let target = (n > 0).then(|| {
        let mean = dataset.target.sum() / n as f64;
        let var = dataset.target.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
        TargetStats {
            mean,
            std: var.sqrt(),
            min: dataset.target.iter().copied().fold(f64::INFINITY, f64::min),
            max: dataset.target.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    });

    let mean_target_by_dept = dataset.feature_column("Dept").map(|dept| {
        let mut sums: BTreeMap<i64, (f64, usize)> = BTreeMap::new();
        for (d, y) in dept.iter().zip(dataset.target.iter()) {
            if d.is_finite() {
                let entry = sums.entry(d.round() as i64).or_insert((0.0, 0));
                entry.0 += y;
                entry.1 += 1;
            }
        }
        sums.into_iter()
            .map(|(dept, (sum, rows))| DeptMean {
                dept,
                mean_target: sum / rows as f64,
                rows,
            })
            .collect()
    });

    DatasetSummary {
        rows: n,
        columns: dataset.feature_names.clone(),
        target,
        mean_target_by_dept,
    }
}

/// Lazily loaded artifact and dataset summary shared by every request.
pub struct ServingCache {
    artifact_path: PathBuf,
    dataset_path: PathBuf,
    target_column: String,
    artifact: RwLock<Option<Arc<ModelArtifact>>>,
    summary: RwLock<Option<Arc<DatasetSummary>>>,
}

impl ServingCache {
    pub fn new(
        artifact_path: impl Into<PathBuf>,
        dataset_path: impl Into<PathBuf>,
        target_column: &str,
    ) -> Self {
        Self {
            artifact_path: artifact_path.into(),
            dataset_path: dataset_path.into(),
            target_column: target_column.to_string(),
            artifact: RwLock::new(None),
            summary: RwLock::new(None),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.artifact
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn load_summary(&self) -> Result<DatasetSummary, ServingError> {
        let dataset = read_dataset_csv(&self.dataset_path, &self.target_column)?;
        Ok(summarize_dataset(&dataset))
    }
}

impl ModelSource for ServingCache {
    fn artifact(&self) -> Result<Arc<ModelArtifact>, ServingError> {
        if let Some(artifact) = self
            .artifact
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Ok(Arc::clone(artifact));
        }

        let mut slot = self.artifact.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(artifact) = slot.as_ref() {
            return Ok(Arc::clone(artifact));
        }
        let loaded = Arc::new(load(&self.artifact_path)?);
        *slot = Some(Arc::clone(&loaded));
        Ok(loaded)
    }

    fn dataset_summary(&self) -> Result<Arc<DatasetSummary>, ServingError> {
        if let Some(summary) = self
            .summary
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Ok(Arc::clone(summary));
        }

        let mut slot = self.summary.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(summary) = slot.as_ref() {
            return Ok(Arc::clone(summary));
        }
        let loaded = Arc::new(self.load_summary()?);
        *slot = Some(Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Loads a fresh artifact first; the cached one is replaced only on success.
    fn reload(&self) -> Result<Arc<ModelArtifact>, ServingError> {
        let fresh = Arc::new(load(&self.artifact_path)?);
        *self.artifact.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&fresh));
        *self.summary.write().unwrap_or_else(PoisonError::into_inner) = None;

        info!(
            component = "serving",
            event = "cache.reload",
            fingerprint = %fresh.fingerprint,
            features = fresh.feature_names.len()
        );
        Ok(fresh)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictRequest {
    /// `null` values are imputed like missing training values.
    pub features: BTreeMap<String, Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictResponse {
    pub prediction: f64,
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_name: String,
    pub format_version: u32,
    pub created_at: DateTime<Utc>,
    pub fingerprint: String,
    pub feature_names: Vec<String>,
    pub target_column: String,
    pub params: ModelSpec,
    pub test_metrics: RegressionMetrics,
    pub cv_best_score: Option<f64>,
}

impl From<&ModelArtifact> for ModelInfo {
    fn from(artifact: &ModelArtifact) -> Self {
        Self {
            model_name: artifact.model_name.clone(),
            format_version: artifact.format_version,
            created_at: artifact.created_at,
            fingerprint: artifact.fingerprint.clone(),
            feature_names: artifact.feature_names.clone(),
            target_column: artifact.target_column.clone(),
            params: artifact.params.clone(),
            test_metrics: artifact.test_metrics,
            cv_best_score: artifact.cv_best_score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

pub fn serving_router(source: Arc<dyn ModelSource>) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/model", get(get_model))
        .route("/dataset/summary", get(get_dataset_summary))
        .route("/predict", post(post_predict))
        .route("/reload", post(post_reload))
        .with_state(ServingAppState { source })
}

#[derive(Clone)]
struct ServingAppState {
    source: Arc<dyn ModelSource>,
}

fn error_response(status: StatusCode, message: impl ToString) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn unavailable(err: ServingError) -> Response {
    warn!(
        component = "serving",
        event = "cache.unavailable",
        error = %err
    );
    error_response(StatusCode::SERVICE_UNAVAILABLE, err)
}

async fn get_health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn get_model(State(state): State<ServingAppState>) -> Response {
    match state.source.artifact() {
        Ok(artifact) => Json(ModelInfo::from(artifact.as_ref())).into_response(),
        Err(err) => unavailable(err),
    }
}

async fn get_dataset_summary(State(state): State<ServingAppState>) -> Response {
    match state.source.dataset_summary() {
        Ok(summary) => Json(summary.as_ref().clone()).into_response(),
        Err(err) => unavailable(err),
    }
}

async fn post_predict(
    State(state): State<ServingAppState>,
    Json(request): Json<PredictRequest>,
) -> Response {
    let artifact = match state.source.artifact() {
        Ok(artifact) => artifact,
        Err(err) => return unavailable(err),
    };

    let features: BTreeMap<String, f64> = request
        .features
        .into_iter()
        .map(|(name, value)| (name, value.unwrap_or(f64::NAN)))
        .collect();

    match artifact.predict(&features) {
        Ok(prediction) => {
            debug!(
                component = "serving",
                event = "predict.ok",
                prediction,
                fingerprint = %artifact.fingerprint
            );
            Json(PredictResponse {
                prediction,
                fingerprint: artifact.fingerprint.clone(),
            })
            .into_response()
        }
        Err(err) if err.is_contract() => {
            warn!(
                component = "serving",
                event = "predict.rejected",
                error = %err
            );
            error_response(StatusCode::UNPROCESSABLE_ENTITY, err)
        }
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err),
    }
}

async fn post_reload(State(state): State<ServingAppState>) -> Response {
    match state.source.reload() {
        Ok(artifact) => Json(ModelInfo::from(artifact.as_ref())).into_response(),
        Err(err) => unavailable(err),
    }
}
