//! Classifier artifacts and inference.
//!
//! Artifacts are JSON documents tagged by `type`. They are produced by
//! [`crate::training`] and loaded by [`crate::registry`].

use crate::error::RiskError;
use crate::features::{FeatureVector, FEATURE_COLUMNS, FEATURE_COUNT};
use serde::{Deserialize, Serialize};

pub trait Classifier {
    /// Probability of the positive (heart disease) class.
    fn predict_proba(&self, x: &FeatureVector) -> Result<f64, RiskError>;

    /// One weight per feature in `FEATURE_COLUMNS` order, summing to 1 or all zero.
    fn feature_importance(&self) -> Vec<f64>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub roc_auc: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    #[serde(default)]
    pub trained_at: Option<String>,
    #[serde(default)]
    pub train_samples: usize,
    #[serde(default)]
    pub test_samples: usize,
    #[serde(default)]
    pub metrics: Option<ModelMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    /// Population standard deviation; constant columns get a scale of 1.
    pub fn fit(rows: &[[f64; FEATURE_COUNT]]) -> Self {
        let n = rows.len().max(1) as f64;
        let mut mean = vec![0.0; FEATURE_COUNT];
        for row in rows {
            for (m, v) in mean.iter_mut().zip(row.iter()) {
                *m += v / n;
            }
        }
        let mut scale = vec![0.0; FEATURE_COUNT];
        for row in rows {
            for j in 0..FEATURE_COUNT {
                scale[j] += (row[j] - mean[j]).powi(2) / n;
            }
        }
        for s in scale.iter_mut() {
            *s = s.sqrt();
            if *s < 1e-12 {
                *s = 1.0;
            }
        }
        Self { mean, scale }
    }

    pub fn transform(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(self.mean.iter().zip(self.scale.iter()))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }
}

pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    #[serde(default)]
    pub scaler: Option<StandardScaler>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl LogisticModel {
    fn validate(&self) -> Result<(), RiskError> {
        expect_len("coefficients", self.coefficients.len())?;
        if let Some(s) = &self.scaler {
            expect_len("scaler.mean", s.mean.len())?;
            expect_len("scaler.scale", s.scale.len())?;
            if s.scale.iter().any(|v| *v == 0.0 || !v.is_finite()) {
                return Err(RiskError::InvalidArtifact(
                    "scaler.scale contains zero or non-finite entries".into(),
                ));
            }
        }
        if self.coefficients.iter().any(|c| !c.is_finite()) || !self.intercept.is_finite() {
            return Err(RiskError::InvalidArtifact(
                "non-finite logistic coefficients".into(),
            ));
        }
        Ok(())
    }
}

impl Classifier for LogisticModel {
    fn predict_proba(&self, x: &FeatureVector) -> Result<f64, RiskError> {
        let scaled = match &self.scaler {
            Some(s) => s.transform(x.values()),
            None => x.values().to_vec(),
        };
        let z: f64 = self.intercept
            + self
                .coefficients
                .iter()
                .zip(scaled.iter())
                .map(|(w, v)| w * v)
                .sum::<f64>();
        Ok(sigmoid(z))
    }

    fn feature_importance(&self) -> Vec<f64> {
        normalized(self.coefficients.iter().map(|c| c.abs()).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        probability: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeModel {
    /// Node 0 is the root; children always have larger indices than their parent.
    pub nodes: Vec<TreeNode>,
    pub feature_importances: Vec<f64>,
}

impl TreeModel {
    fn validate(&self) -> Result<(), RiskError> {
        if self.nodes.is_empty() {
            return Err(RiskError::InvalidArtifact("tree has no nodes".into()));
        }
        expect_len("feature_importances", self.feature_importances.len())?;
        for (idx, node) in self.nodes.iter().enumerate() {
            match node {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if *feature >= FEATURE_COUNT {
                        return Err(RiskError::InvalidArtifact(format!(
                            "node {idx} splits on feature {feature}"
                        )));
                    }
                    if !threshold.is_finite() {
                        return Err(RiskError::InvalidArtifact(format!(
                            "node {idx} has a non-finite threshold"
                        )));
                    }
                    for child in [left, right] {
                        if *child <= idx || *child >= self.nodes.len() {
                            return Err(RiskError::InvalidArtifact(format!(
                                "node {idx} points to invalid child {child}"
                            )));
                        }
                    }
                }
                TreeNode::Leaf { probability } => {
                    if !(0.0..=1.0).contains(probability) {
                        return Err(RiskError::InvalidArtifact(format!(
                            "leaf {idx} probability {probability} outside [0, 1]"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn leaf_probability(&self, x: &[f64]) -> Result<f64, RiskError> {
        let mut idx = 0usize;
        loop {
            match self.nodes.get(idx) {
                Some(TreeNode::Leaf { probability }) => return Ok(*probability),
                Some(TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    idx = if x[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
                None => {
                    return Err(RiskError::Prediction(format!(
                        "tree traversal reached missing node {idx}"
                    )))
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[TreeNode], idx: usize) -> usize {
            match nodes.get(idx) {
                Some(TreeNode::Split { left, right, .. }) => {
                    1 + walk(nodes, *left).max(walk(nodes, *right))
                }
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }
}

impl Classifier for TreeModel {
    fn predict_proba(&self, x: &FeatureVector) -> Result<f64, RiskError> {
        self.leaf_probability(x.values())
    }

    fn feature_importance(&self) -> Vec<f64> {
        normalized(self.feature_importances.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestModel {
    pub trees: Vec<TreeModel>,
    pub feature_importances: Vec<f64>,
}

impl ForestModel {
    fn validate(&self) -> Result<(), RiskError> {
        if self.trees.is_empty() {
            return Err(RiskError::InvalidArtifact("forest has no trees".into()));
        }
        expect_len("feature_importances", self.feature_importances.len())?;
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate()
                .map_err(|e| RiskError::InvalidArtifact(format!("tree {i}: {e}")))?;
        }
        Ok(())
    }
}

impl Classifier for ForestModel {
    fn predict_proba(&self, x: &FeatureVector) -> Result<f64, RiskError> {
        let mut sum = 0.0;
        for tree in &self.trees {
            sum += tree.leaf_probability(x.values())?;
        }
        Ok(sum / self.trees.len() as f64)
    }

    fn feature_importance(&self) -> Vec<f64> {
        normalized(self.feature_importances.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelKind {
    LogisticRegression(LogisticModel),
    DecisionTree(TreeModel),
    RandomForest(ForestModel),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub feature_names: Vec<String>,
    #[serde(flatten)]
    pub model: ModelKind,
    #[serde(default)]
    pub metadata: ArtifactMetadata,
}

impl ModelArtifact {
    pub fn new(model: ModelKind) -> Self {
        Self {
            feature_names: FEATURE_COLUMNS.iter().map(|s| s.to_string()).collect(),
            model,
            metadata: ArtifactMetadata::default(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.model {
            ModelKind::LogisticRegression(_) => "logistic_regression",
            ModelKind::DecisionTree(_) => "decision_tree",
            ModelKind::RandomForest(_) => "random_forest",
        }
    }

    pub fn validate(&self) -> Result<(), RiskError> {
        let expected: Vec<&str> = FEATURE_COLUMNS.to_vec();
        let actual: Vec<&str> = self.feature_names.iter().map(String::as_str).collect();
        if actual != expected {
            return Err(RiskError::InvalidArtifact(format!(
                "feature_names {:?} do not match {:?}",
                actual, expected
            )));
        }
        match &self.model {
            ModelKind::LogisticRegression(m) => m.validate(),
            ModelKind::DecisionTree(m) => m.validate(),
            ModelKind::RandomForest(m) => m.validate(),
        }
    }

    pub fn from_json(text: &str) -> Result<Self, RiskError> {
        let artifact: ModelArtifact = serde_json::from_str(text)
            .map_err(|e| RiskError::InvalidArtifact(e.to_string()))?;
        artifact.validate()?;
        Ok(artifact)
    }

    fn classifier(&self) -> &dyn Classifier {
        match &self.model {
            ModelKind::LogisticRegression(m) => m,
            ModelKind::DecisionTree(m) => m,
            ModelKind::RandomForest(m) => m,
        }
    }
}

impl Classifier for ModelArtifact {
    fn predict_proba(&self, x: &FeatureVector) -> Result<f64, RiskError> {
        let p = self.classifier().predict_proba(x)?;
        if !p.is_finite() {
            return Err(RiskError::Prediction(format!(
                "{} produced a non-finite probability",
                self.kind_name()
            )));
        }
        Ok(p.clamp(0.0, 1.0))
    }

    fn feature_importance(&self) -> Vec<f64> {
        self.classifier().feature_importance()
    }
}

fn expect_len(field: &str, len: usize) -> Result<(), RiskError> {
    if len != FEATURE_COUNT {
        return Err(RiskError::InvalidArtifact(format!(
            "{field} has {len} entries, expected {FEATURE_COUNT}"
        )));
    }
    Ok(())
}

/// Scales to sum 1; all zeros when there is nothing to distribute.
pub fn normalized(mut weights: Vec<f64>) -> Vec<f64> {
    let sum: f64 = weights.iter().filter(|w| w.is_finite()).sum();
    if sum <= 0.0 || !sum.is_finite() {
        return vec![0.0; weights.len()];
    }
    for w in weights.iter_mut() {
        *w = if w.is_finite() { *w / sum } else { 0.0 };
    }
    weights
}
