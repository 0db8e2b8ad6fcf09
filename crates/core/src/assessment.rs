use crate::error::RiskError;
use crate::features::{describe_feature, preprocess, PatientInput, FEATURE_COLUMNS};
use crate::model::Classifier;
use crate::registry::ModelRegistry;
use crate::risk::{risk_percent, RiskCategory, RiskThresholds};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorWeight {
    pub feature: String,
    pub description: String,
    pub weight: f64,
}

impl FactorWeight {
    /// Weight as a percentage rounded to two decimals.
    pub fn percent(&self) -> f64 {
        (self.weight * 100.0 * 100.0).round() / 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    #[serde(default)]
    pub id: Option<i64>,
    pub model: String,
    pub probability: f64,
    pub percent: u8,
    pub category: RiskCategory,
    pub top_factors: Vec<FactorWeight>,
    pub input: PatientInput,
    pub created_at: DateTime<Utc>,
}

impl Assessment {
    pub fn headline(&self) -> String {
        format!("{}% {}", self.percent, self.category.label())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AssessmentOptions {
    pub thresholds: RiskThresholds,
    pub top_factors: usize,
}

impl Default for AssessmentOptions {
    fn default() -> Self {
        Self {
            thresholds: RiskThresholds::default(),
            top_factors: 5,
        }
    }
}

/// Sorted by descending weight; equal weights keep column order.
pub fn rank_factors(importance: &[f64]) -> Vec<FactorWeight> {
    let mut ranked: Vec<FactorWeight> = FEATURE_COLUMNS
        .iter()
        .zip(importance.iter())
        .map(|(name, w)| FactorWeight {
            feature: name.to_string(),
            description: describe_feature(name).to_string(),
            weight: *w,
        })
        .collect();
    ranked.sort_by(|a, b| b.weight.total_cmp(&a.weight));
    ranked
}

pub fn assess(
    registry: &ModelRegistry,
    model_name: &str,
    input: &PatientInput,
    opts: &AssessmentOptions,
) -> Result<Assessment, RiskError> {
    input.validate()?;
    opts.thresholds.validate()?;
    let model = registry.get(model_name)?;
    let features = preprocess(input);
    debug!(model = model_name, %features, "running inference");

    let probability = model.predict_proba(&features)?;
    let category = opts.thresholds.categorize(probability);
    let mut top_factors = rank_factors(&model.feature_importance());
    top_factors.truncate(opts.top_factors);

    Ok(Assessment {
        id: None,
        model: model_name.to_string(),
        probability,
        percent: risk_percent(probability),
        category,
        top_factors,
        input: input.clone(),
        created_at: Utc::now(),
    })
}
