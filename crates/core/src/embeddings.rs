use crate::knowledge::KnowledgeBase;
use crate::vectorstore::{VectorRecord, VectorStore};
use providers::ProviderRegistry;
use std::collections::HashMap;
use tracing::info;

#[derive(Debug, Clone)]
pub struct EmbeddingRequest {
    pub texts: Vec<String>,
    pub provider: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    pub vectors: Vec<Vec<f32>>,
}

pub async fn embed(
    req: EmbeddingRequest,
    registry: &ProviderRegistry,
) -> anyhow::Result<EmbeddingResult> {
    let provider = registry.embedding(req.provider.as_deref())?;
    let resp = provider.embed(&req.texts).await?;
    if resp.vectors.len() != req.texts.len() {
        anyhow::bail!(
            "embedding provider returned {} vectors for {} texts",
            resp.vectors.len(),
            req.texts.len()
        );
    }
    Ok(EmbeddingResult {
        vectors: resp.vectors,
    })
}

/// Embeds every passage in batches and upserts them with `{source, text}`
/// payloads. Returns the number of passages stored.
pub async fn index_knowledge(
    knowledge: &KnowledgeBase,
    registry: &ProviderRegistry,
    store: &dyn VectorStore,
    batch_size: usize,
) -> anyhow::Result<usize> {
    if !store.is_enabled() {
        anyhow::bail!("no vector store configured");
    }
    let mut indexed = 0usize;
    for batch in knowledge.passages().chunks(batch_size.max(1)) {
        let req = EmbeddingRequest {
            texts: batch.iter().map(|p| p.text.clone()).collect(),
            provider: None,
        };
        let embeddings = embed(req, registry).await?;
        if embeddings.vectors.iter().any(|v| v.is_empty()) {
            anyhow::bail!("embedding provider returned empty vectors");
        }

        let records = batch
            .iter()
            .zip(embeddings.vectors)
            .map(|(passage, vector)| VectorRecord {
                id: passage.id.clone(),
                vector,
                metadata: HashMap::from([
                    ("source".to_string(), passage.source.clone()),
                    ("text".to_string(), passage.text.clone()),
                ]),
            })
            .collect();
        store.upsert(records).await?;
        indexed += batch.len();
    }
    info!("Indexed {} knowledge passage(s)", indexed);
    Ok(indexed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::Passage;
    use crate::vectorstore::{NoopVectorStore, VectorHit};
    use providers::{EmbedResponse, EmbeddingProvider, ProviderError};
    use std::sync::{Arc, Mutex};

    struct FixedEmbedder;

    #[async_trait::async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
            Ok(EmbedResponse {
                vectors: texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        batches: Mutex<Vec<Vec<VectorRecord>>>,
    }

    #[async_trait::async_trait]
    impl VectorStore for RecordingStore {
        async fn upsert(&self, records: Vec<VectorRecord>) -> anyhow::Result<()> {
            self.batches.lock().unwrap().push(records);
            Ok(())
        }

        async fn search(&self, _v: Vec<f32>, _limit: usize) -> anyhow::Result<Vec<VectorHit>> {
            Ok(Vec::new())
        }
    }

    fn registry() -> ProviderRegistry {
        ProviderRegistry::new()
            .with_embedding("fixed", Arc::new(FixedEmbedder))
            .set_preferred_embedding("fixed")
    }

    fn knowledge() -> KnowledgeBase {
        KnowledgeBase::from_passages(vec![
            Passage::new("bp.md", "Blood pressure guidance.".into()),
            Passage::new("chol.md", "Cholesterol guidance.".into()),
            Passage::new("ecg.md", "ECG guidance.".into()),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn passages_are_upserted_in_batches_with_payloads() {
        let kb = knowledge();
        let store = RecordingStore::default();
        let n = index_knowledge(&kb, &registry(), &store, 2).await.unwrap();
        assert_eq!(n, 3);

        let batches = store.batches.lock().unwrap();
        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 1]);
        let records: Vec<&VectorRecord> = batches.iter().flatten().collect();
        for (record, passage) in records.iter().zip(kb.passages()) {
            assert_eq!(record.id, passage.id);
            assert_eq!(record.vector, vec![passage.text.len() as f32, 1.0]);
            let mut keys: Vec<_> = record.metadata.keys().map(String::as_str).collect();
            keys.sort();
            assert_eq!(keys, vec!["source", "text"]);
            assert_eq!(record.metadata["source"], passage.source);
            assert_eq!(record.metadata["text"], passage.text);
        }
    }

    #[tokio::test]
    async fn disabled_store_is_an_error() {
        let err = index_knowledge(&knowledge(), &registry(), &NoopVectorStore, 2)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no vector store configured"));
    }
}
