//! Versioned, fingerprinted model artifact and its inference contract.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::metrics::RegressionMetrics;
use crate::models::{ModelError, ModelSpec};
use crate::table::{write_atomic, TableError};
use crate::training::Pipeline;
use crate::tuning::TuningOutcome;

pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// A request that does not match the artifact's feature contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractError {
    #[error("missing features: {}", .0.join(", "))]
    MissingFeatures(Vec<String>),
    #[error("unexpected features: {}", .0.join(", "))]
    UnexpectedFeatures(Vec<String>),
    #[error("feature at position {position} is '{found}', expected '{expected}'")]
    OrderMismatch {
        position: usize,
        expected: String,
        found: String,
    },
    #[error("expected {expected} feature values, got {found}")]
    WrongValueCount { expected: usize, found: usize },
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("table error: {0}")]
    Table(#[from] TableError),
    #[error("unsupported artifact format version {found}, expected {expected}")]
    FormatVersion { expected: u32, found: u32 },
    #[error("artifact fingerprint mismatch: stored {stored}, computed {computed}")]
    FingerprintMismatch { stored: String, computed: String },
    #[error("artifact pipeline expects {pipeline} features but the contract lists {contract}")]
    InconsistentContract { pipeline: usize, contract: usize },
    #[error("contract error: {0}")]
    Contract(#[from] ContractError),
    #[error("model error: {0}")]
    Model(#[from] ModelError),
}

impl ArtifactError {
    pub fn is_contract(&self) -> bool {
        matches!(self, Self::Contract(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub created_at: DateTime<Utc>,
    /// Ordered feature contract.
    pub feature_names: Vec<String>,
    pub target_column: String,
    pub model_name: String,
    pub params: ModelSpec,
    pub test_metrics: RegressionMetrics,
    pub cv_best_score: Option<f64>,
    pub train_rows: usize,
    pub test_rows: usize,
    pub pipeline: Pipeline,
    pub fingerprint: String,
}

impl ModelArtifact {
    pub fn new(
        feature_names: Vec<String>,
        target_column: &str,
        params: ModelSpec,
        pipeline: Pipeline,
        test_metrics: RegressionMetrics,
    ) -> Result<Self, ArtifactError> {
        if pipeline.n_features() != feature_names.len() {
            return Err(ArtifactError::InconsistentContract {
                pipeline: pipeline.n_features(),
                contract: feature_names.len(),
            });
        }
        let mut artifact = Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            created_at: Utc::now(),
            feature_names,
            target_column: target_column.to_string(),
            model_name: params.display_name().to_string(),
            params,
            test_metrics,
            cv_best_score: None,
            train_rows: 0,
            test_rows: 0,
            pipeline,
            fingerprint: String::new(),
        };
        artifact.fingerprint = artifact_fingerprint(&artifact)?;
        Ok(artifact)
    }

    pub fn from_tuning(outcome: &TuningOutcome, target_column: &str) -> Result<Self, ArtifactError> {
        let mut artifact = Self::new(
            outcome.feature_names.clone(),
            target_column,
            ModelSpec::GradientBoosting(outcome.best_params.clone()),
            outcome.pipeline.clone(),
            outcome.test_metrics,
        )?;
        artifact.cv_best_score = Some(outcome.best_score);
        artifact.train_rows = outcome.train_rows;
        artifact.test_rows = outcome.test_rows;
        Ok(artifact)
    }

    /// Predicts from a name → value map that must hold exactly the contracted names.
    pub fn predict(&self, features: &BTreeMap<String, f64>) -> Result<f64, ArtifactError> {
        let missing: Vec<String> = self
            .feature_names
            .iter()
            .filter(|name| !features.contains_key(*name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ContractError::MissingFeatures(missing).into());
        }

        let unexpected: Vec<String> = features
            .keys()
            .filter(|name| !self.feature_names.contains(*name))
            .cloned()
            .collect();
        if !unexpected.is_empty() {
            return Err(ContractError::UnexpectedFeatures(unexpected).into());
        }

        let values: Vec<f64> = self.feature_names.iter().map(|name| features[name]).collect();
        self.predict_values(&values)
    }

    /// Predicts from (name, value) pairs that must follow the contract order exactly.
    pub fn predict_ordered(&self, features: &[(String, f64)]) -> Result<f64, ArtifactError> {
        if features.len() != self.feature_names.len() {
            return Err(ContractError::WrongValueCount {
                expected: self.feature_names.len(),
                found: features.len(),
            }
            .into());
        }
        for (position, ((found, _), expected)) in features.iter().zip(&self.feature_names).enumerate() {
            if found != expected {
                return Err(ContractError::OrderMismatch {
                    position,
                    expected: expected.clone(),
                    found: found.clone(),
                }
                .into());
            }
        }
        let values: Vec<f64> = features.iter().map(|(_, v)| *v).collect();
        self.predict_values(&values)
    }

    /// Predicts from values already in contract order. NaN values are imputed.
    pub fn predict_values(&self, values: &[f64]) -> Result<f64, ArtifactError> {
        if values.len() != self.feature_names.len() {
            return Err(ContractError::WrongValueCount {
                expected: self.feature_names.len(),
                found: values.len(),
            }
            .into());
        }
        let row = self.pipeline.preprocessor.transform_row(values)?;
        let x = row.insert_axis(ndarray::Axis(0));
        let prediction = self.pipeline.model.predict(x.view())?;
        Ok(prediction[0])
    }
}

/// SHA-256 over the format version, the ordered contract and the serialized pipeline.
pub fn artifact_fingerprint(artifact: &ModelArtifact) -> Result<String, ArtifactError> {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{};", artifact.format_version));
    hasher.update("features:");
    for name in &artifact.feature_names {
        hasher.update(name.as_bytes());
        hasher.update(",");
    }
    hasher.update(";params:");
    hasher.update(serde_json::to_vec(&artifact.params)?);
    hasher.update(";pipeline:");
    hasher.update(serde_json::to_vec(&artifact.pipeline)?);
    Ok(hex::encode(hasher.finalize()))
}

/// Writes the artifact atomically, replacing any previous one.
pub fn persist(artifact: &ModelArtifact, path: &Path) -> Result<(), ArtifactError> {
    let bytes = serde_json::to_vec_pretty(artifact)?;
    write_atomic(path, &bytes)?;
    info!(
        component = "artifact",
        event = "artifact.persist",
        path = %path.display(),
        bytes = bytes.len(),
        fingerprint = %artifact.fingerprint,
        features = artifact.feature_names.len()
    );
    Ok(())
}

/// Reads an artifact and rejects unknown versions and corrupted content.
pub fn load(path: &Path) -> Result<ModelArtifact, ArtifactError> {
    let bytes = fs::read(path)?;
    let artifact: ModelArtifact = serde_json::from_slice(&bytes)?;

    if artifact.format_version != ARTIFACT_FORMAT_VERSION {
        return Err(ArtifactError::FormatVersion {
            expected: ARTIFACT_FORMAT_VERSION,
            found: artifact.format_version,
        });
    }

    let computed = artifact_fingerprint(&artifact)?;
    if computed != artifact.fingerprint {
        return Err(ArtifactError::FingerprintMismatch {
            stored: artifact.fingerprint.clone(),
            computed,
        });
    }

    if artifact.pipeline.n_features() != artifact.feature_names.len() {
        return Err(ArtifactError::InconsistentContract {
            pipeline: artifact.pipeline.n_features(),
            contract: artifact.feature_names.len(),
        });
    }

    info!(
        component = "artifact",
        event = "artifact.load",
        path = %path.display(),
        fingerprint = %artifact.fingerprint,
        model = %artifact.model_name,
        features = artifact.feature_names.len()
    );
    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    fn artifact() -> ModelArtifact {
        let x = Array2::from_shape_fn((20, 2), |(i, j)| (i * (j + 1)) as f64);
        let y = Array1::from_shape_fn(20, |i| 3.0 * i as f64);
        let spec = ModelSpec::Ridge { alpha: 1.0 };
        let pipeline = Pipeline::fit(&spec, x.view(), y.view()).unwrap();
        let metrics = pipeline.evaluate(x.view(), y.view()).unwrap();
        ModelArtifact::new(vec!["f1".to_string(), "f2".to_string()], "Weekly_Sales", spec, pipeline, metrics)
            .unwrap()
    }

    #[test]
    fn persist_then_load_preserves_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models/best_model.json");
        let original = artifact();
        persist(&original, &path).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.fingerprint, original.fingerprint);
        assert_eq!(
            loaded.predict_values(&[3.0, 6.0]).unwrap(),
            original.predict_values(&[3.0, 6.0]).unwrap()
        );
    }

    #[test]
    fn tampered_artifact_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("best_model.json");
        let mut tampered = artifact();
        tampered.feature_names.swap(0, 1);
        std::fs::write(&path, serde_json::to_vec(&tampered).unwrap()).unwrap();

        assert!(matches!(
            load(&path),
            Err(ArtifactError::FingerprintMismatch { .. })
        ));
    }

    #[test]
    fn unknown_format_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("best_model.json");
        let mut future = artifact();
        future.format_version = 99;
        std::fs::write(&path, serde_json::to_vec(&future).unwrap()).unwrap();

        assert!(matches!(
            load(&path),
            Err(ArtifactError::FormatVersion { found: 99, .. })
        ));
    }

    #[test]
    fn contract_violations_are_reported_per_request() {
        let artifact = artifact();

        let only_one = BTreeMap::from([("f1".to_string(), 1.0)]);
        assert!(matches!(
            artifact.predict(&only_one),
            Err(ArtifactError::Contract(ContractError::MissingFeatures(ref names))) if names == &vec!["f2".to_string()]
        ));

        let extra = BTreeMap::from([
            ("f1".to_string(), 1.0),
            ("f2".to_string(), 2.0),
            ("f3".to_string(), 3.0),
        ]);
        assert!(matches!(
            artifact.predict(&extra),
            Err(ArtifactError::Contract(ContractError::UnexpectedFeatures(_)))
        ));

        let swapped = vec![("f2".to_string(), 2.0), ("f1".to_string(), 1.0)];
        assert!(matches!(
            artifact.predict_ordered(&swapped),
            Err(ArtifactError::Contract(ContractError::OrderMismatch { position: 0, .. }))
        ));

        let exact = BTreeMap::from([("f1".to_string(), 1.0), ("f2".to_string(), 2.0)]);
        assert!(artifact.predict(&exact).is_ok());
        assert!(artifact.predict_values(&[1.0]).unwrap_err().is_contract());
    }
}
