use thiserror::Error;

#[derive(Debug, Error)]
pub enum RiskError {
    #[error("invalid input: {field} = {value} (expected {min}..={max})")]
    InvalidInput {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("unknown feature: {0}")]
    UnknownFeature(String),
    #[error("Model not loaded properly: {0}")]
    ModelNotLoaded(String),
    #[error("invalid model artifact: {0}")]
    InvalidArtifact(String),
    #[error("prediction failed: {0}")]
    Prediction(String),
    #[error("invalid thresholds: low={low}, high={high}")]
    InvalidThresholds { low: f64, high: f64 },
    #[error("dataset error: {0}")]
    Dataset(String),
}
