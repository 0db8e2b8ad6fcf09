use crate::assessment::Assessment;
use crate::embeddings::{embed, EmbeddingRequest};
use crate::knowledge::KnowledgeBase;
use crate::vectorstore::VectorStore;
use providers::ProviderRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

const EXCERPT_CHARS: usize = 320;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub source: String,
    pub excerpt: String,
    pub score: f64,
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= EXCERPT_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(EXCERPT_CHARS).collect();
    if let Some(pos) = cut.rfind(char::is_whitespace) {
        cut.truncate(pos);
    }
    cut.push_str("...");
    cut
}

/// Query text for an assessment: its category plus the top factor names and
/// their descriptions.
pub fn query_for(assessment: &Assessment) -> String {
    let mut parts = vec![format!(
        "{} heart disease risk",
        assessment.category.as_str().to_lowercase()
    )];
    for f in &assessment.top_factors {
        parts.push(f.feature.clone());
        parts.push(f.description.clone());
    }
    parts.join(" ")
}

pub struct Retriever {
    knowledge: KnowledgeBase,
    store: Arc<dyn VectorStore>,
    registry: ProviderRegistry,
    top_k: usize,
}

impl Retriever {
    pub fn new(
        knowledge: KnowledgeBase,
        store: Arc<dyn VectorStore>,
        registry: ProviderRegistry,
        top_k: usize,
    ) -> Self {
        Self {
            knowledge,
            store,
            registry,
            top_k,
        }
    }

    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    async fn vector_search(&self, query: &str) -> anyhow::Result<Vec<Reference>> {
        let req = EmbeddingRequest {
            texts: vec![query.to_string()],
            provider: None,
        };
        let vector = embed(req, &self.registry)
            .await?
            .vectors
            .into_iter()
            .next()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| anyhow::anyhow!("embedding provider returned no vector"))?;
        let hits = self.store.search(vector, self.top_k).await?;
        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                let text = hit.metadata.get("text")?;
                Some(Reference {
                    source: hit.metadata.get("source").cloned().unwrap_or_default(),
                    excerpt: excerpt(text),
                    score: f64::from(hit.score),
                })
            })
            .collect())
    }

    fn local_search(&self, query: &str) -> Vec<Reference> {
        self.knowledge
            .search(query, self.top_k)
            .into_iter()
            .map(|hit| Reference {
                source: hit.passage.source,
                excerpt: excerpt(&hit.passage.text),
                score: hit.score,
            })
            .collect()
    }

    /// Vector search when a store is configured, keyword search otherwise or
    /// when the vector path fails or comes back empty.
    pub async fn retrieve(&self, query: &str) -> Vec<Reference> {
        if self.store.is_enabled() {
            match self.vector_search(query).await {
                Ok(refs) if !refs.is_empty() => {
                    debug!(hits = refs.len(), "vector retrieval");
                    return refs;
                }
                Ok(_) => debug!("vector retrieval returned nothing; using keyword search"),
                Err(e) => warn!("Vector retrieval failed, using keyword search: {e}"),
            }
        }
        self.local_search(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::FactorWeight;
    use crate::features::PatientInput;
    use crate::knowledge::Passage;
    use crate::risk::RiskCategory;
    use crate::vectorstore::{NoopVectorStore, VectorHit, VectorRecord};
    use chrono::Utc;
    use providers::{EmbedResponse, EmbeddingProvider, ProviderError};
    use std::collections::HashMap;

    struct FixedEmbedder;

    #[async_trait::async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
            Ok(EmbedResponse {
                vectors: vec![vec![1.0, 0.0]; texts.len()],
            })
        }
    }

    struct FailingStore;

    #[async_trait::async_trait]
    impl VectorStore for FailingStore {
        async fn upsert(&self, _records: Vec<VectorRecord>) -> anyhow::Result<()> {
            anyhow::bail!("down")
        }

        async fn search(&self, _v: Vec<f32>, _limit: usize) -> anyhow::Result<Vec<VectorHit>> {
            anyhow::bail!("down")
        }
    }

    struct OneHitStore;

    #[async_trait::async_trait]
    impl VectorStore for OneHitStore {
        async fn upsert(&self, _records: Vec<VectorRecord>) -> anyhow::Result<()> {
            Ok(())
        }

        async fn search(&self, _v: Vec<f32>, _limit: usize) -> anyhow::Result<Vec<VectorHit>> {
            Ok(vec![VectorHit {
                score: 0.9,
                metadata: HashMap::from([
                    ("source".to_string(), "remote.md".to_string()),
                    ("text".to_string(), "Remote passage".to_string()),
                ]),
            }])
        }
    }

    fn kb() -> KnowledgeBase {
        KnowledgeBase::from_passages(vec![Passage::new(
            "local.md",
            "Cholesterol guidance for high risk patients.".into(),
        )])
        .unwrap()
    }

    fn registry() -> ProviderRegistry {
        ProviderRegistry::new()
            .with_embedding("fixed", Arc::new(FixedEmbedder))
            .set_preferred_embedding("fixed")
    }

    #[tokio::test]
    async fn noop_store_uses_keyword_search() {
        let r = Retriever::new(kb(), Arc::new(NoopVectorStore), registry(), 3);
        let refs = r.retrieve("cholesterol").await;
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].source, "local.md");
    }

    #[tokio::test]
    async fn failing_store_falls_back() {
        let r = Retriever::new(kb(), Arc::new(FailingStore), registry(), 3);
        let refs = r.retrieve("cholesterol").await;
        assert_eq!(refs[0].source, "local.md");
    }

    #[tokio::test]
    async fn vector_hits_win_when_available() {
        let r = Retriever::new(kb(), Arc::new(OneHitStore), registry(), 3);
        let refs = r.retrieve("cholesterol").await;
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].source, "remote.md");
        assert!((refs[0].score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn query_names_category_and_factors() {
        let a = Assessment {
            id: None,
            model: "Decision Tree".into(),
            probability: 0.5,
            percent: 50,
            category: RiskCategory::Moderate,
            top_factors: vec![FactorWeight {
                feature: "chol".into(),
                description: "Serum cholesterol".into(),
                weight: 0.4,
            }],
            input: PatientInput::default(),
            created_at: Utc::now(),
        };
        assert_eq!(
            query_for(&a),
            "moderate heart disease risk chol Serum cholesterol"
        );
    }

    #[test]
    fn long_text_is_cut_at_a_word() {
        let text = "abc ".repeat(200);
        let e = excerpt(&text);
        assert!(e.ends_with("..."));
        assert!(e.chars().count() <= EXCERPT_CHARS + 3);
    }
}
