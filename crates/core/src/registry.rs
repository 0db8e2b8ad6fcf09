//! Loads the trained classifiers from the models directory.

use crate::error::RiskError;
use crate::model::ModelArtifact;
use std::fs;
use std::path::Path;
use tracing::{debug, error, info};

/// Display name and artifact file name, in selection order.
pub const KNOWN_MODELS: [(&str, &str); 3] = [
    ("Logistic Regression", "logistic_regression.json"),
    ("Decision Tree", "decision_tree.json"),
    ("Random Forest", "random_forest.json"),
];

pub fn artifact_file(name: &str) -> Option<&'static str> {
    KNOWN_MODELS
        .iter()
        .find(|(display, _)| display.eq_ignore_ascii_case(name))
        .map(|(_, file)| *file)
}

#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: Vec<(String, ModelArtifact)>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, name: &str, artifact: ModelArtifact) -> Self {
        self.insert(name, artifact);
        self
    }

    pub fn insert(&mut self, name: &str, artifact: ModelArtifact) {
        if let Some(slot) = self.models.iter_mut().find(|(n, _)| n == name) {
            slot.1 = artifact;
        } else {
            self.models.push((name.to_string(), artifact));
        }
    }

    /// Loads every known artifact present in `dir`. A broken artifact is
    /// logged and skipped so the remaining models stay usable.
    pub fn load_dir(dir: &Path) -> Self {
        let mut registry = Self::new();
        for (name, file) in KNOWN_MODELS {
            let path = dir.join(file);
            if !path.exists() {
                debug!(model = name, path = %path.display(), "artifact not present");
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(|e| RiskError::InvalidArtifact(e.to_string()))
                .and_then(|text| ModelArtifact::from_json(&text))
            {
                Ok(artifact) => {
                    debug!(model = name, kind = artifact.kind_name(), "loaded model");
                    registry.insert(name, artifact);
                }
                Err(e) => error!(model = name, path = %path.display(), "model loading failed: {e}"),
            }
        }
        info!(
            "Loaded {} model(s) from {}",
            registry.models.len(),
            dir.display()
        );
        registry
    }

    pub fn names(&self) -> Vec<&str> {
        self.models.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn get(&self, name: &str) -> Result<&ModelArtifact, RiskError> {
        self.models
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, m)| m)
            .ok_or_else(|| RiskError::ModelNotLoaded(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ModelArtifact)> {
        self.models.iter().map(|(n, m)| (n.as_str(), m))
    }

    /// The preferred model when loaded, else the first one available.
    pub fn default_model(&self, preferred: Option<&str>) -> Result<&str, RiskError> {
        if let Some(p) = preferred {
            if let Some((n, _)) = self.models.iter().find(|(n, _)| n.eq_ignore_ascii_case(p)) {
                return Ok(n.as_str());
            }
        }
        self.models
            .first()
            .map(|(n, _)| n.as_str())
            .ok_or_else(|| RiskError::ModelNotLoaded("no models available".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FEATURE_COUNT;
    use crate::model::{LogisticModel, ModelKind};

    fn logistic() -> ModelArtifact {
        ModelArtifact::new(ModelKind::LogisticRegression(LogisticModel {
            scaler: None,
            coefficients: vec![0.01; FEATURE_COUNT],
            intercept: -1.0,
        }))
    }

    #[test]
    fn load_dir_skips_missing_and_broken_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("logistic_regression.json"),
            serde_json::to_string(&logistic()).unwrap(),
        )
        .unwrap();
        fs::write(dir.path().join("decision_tree.json"), "{ not json").unwrap();

        let reg = ModelRegistry::load_dir(dir.path());
        assert_eq!(reg.names(), vec!["Logistic Regression"]);
        assert!(matches!(
            reg.get("Decision Tree"),
            Err(RiskError::ModelNotLoaded(_))
        ));
        assert!(reg.get("logistic regression").is_ok());
    }

    #[test]
    fn empty_dir_gives_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        let reg = ModelRegistry::load_dir(dir.path());
        assert!(reg.is_empty());
        assert!(reg.default_model(None).is_err());
    }

    #[test]
    fn default_model_prefers_configured_name() {
        let reg = ModelRegistry::new()
            .with_model("Logistic Regression", logistic())
            .with_model("Random Forest", logistic());
        assert_eq!(reg.default_model(Some("random forest")).unwrap(), "Random Forest");
        assert_eq!(reg.default_model(Some("Nope")).unwrap(), "Logistic Regression");
        assert_eq!(artifact_file("Decision Tree"), Some("decision_tree.json"));
    }
}
