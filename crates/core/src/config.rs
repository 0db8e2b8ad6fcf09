use crate::risk::RiskThresholds;
use crate::training::TrainingConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub models: ModelConfig,
    pub risk: RiskConfig,
    pub report: ReportConfig,
    pub retrieval: RetrievalConfig,
    pub embeddings: EmbeddingConfig,
    pub vectors: VectorConfig,
    pub training: TrainingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/medirisk.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub dir: String,
    pub default: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            dir: "models".to_string(),
            default: Some("Random Forest".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub thresholds: RiskThresholds,
    pub top_factors: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            thresholds: RiskThresholds::default(),
            top_factors: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// `openai` or `lmstudio`; the template writer is used when unset or unavailable.
    pub llm_provider: Option<String>,
    pub chat_model: String,
    pub max_tokens: Option<u32>,
    /// Directory of recommendation rule TOML files.
    pub rules_path: Option<String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            llm_provider: None,
            chat_model: "gpt-4o-mini".to_string(),
            max_tokens: Some(600),
            rules_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub enabled: bool,
    pub knowledge_dir: String,
    pub include: Vec<String>,
    pub top_k: usize,
    pub chunk_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            knowledge_dir: "knowledge".to_string(),
            include: vec!["**/*.md".to_string(), "**/*.txt".to_string()],
            top_k: 3,
            chunk_chars: 800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "noop".to_string(),
            model: "text-embedding-3-small".to_string(),
            batch_size: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    /// `qdrant` enables vector retrieval; anything else keeps retrieval local.
    pub provider: String,
    pub url: Option<String>,
    pub collection: String,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            provider: "none".to_string(),
            url: None,
            collection: "medirisk_knowledge".to_string(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.risk
            .thresholds
            .validate()
            .context("risk.thresholds")?;
        if self.retrieval.chunk_chars == 0 {
            anyhow::bail!("retrieval.chunk_chars must be positive");
        }
        if self.embeddings.batch_size == 0 {
            anyhow::bail!("embeddings.batch_size must be positive");
        }
        Ok(())
    }
}

/// Layers the TOML file (or `config/default` when present) under
/// `MEDIRISK__SECTION__KEY` environment overrides.
pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix("MEDIRISK")
            .separator("__")
            .try_parsing(true),
    );
    let cfg: AppConfig = settings.build()?.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("medirisk.toml");
        std::fs::write(
            &path,
            r#"
            [risk.thresholds]
            low = 0.3
            high = 0.6

            [retrieval]
            enabled = true
            top_k = 5
            "#,
        )
        .unwrap();
        let cfg = load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(cfg.risk.thresholds.low, 0.3);
        assert_eq!(cfg.risk.top_factors, 5);
        assert!(cfg.retrieval.enabled);
        assert_eq!(cfg.retrieval.chunk_chars, 800);
        assert_eq!(cfg.models.dir, "models");
        assert_eq!(cfg.training.seed, 42);
    }

    #[test]
    fn inverted_thresholds_fail_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[risk.thresholds]\nlow = 0.8\nhigh = 0.2\n").unwrap();
        assert!(load(Some(path.to_str().unwrap())).is_err());
    }
}
