use providers::qdrant::{point_id_from_hex, QdrantClient, QdrantPoint};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub score: f32,
    pub metadata: HashMap<String, String>,
}

#[async_trait::async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, records: Vec<VectorRecord>) -> anyhow::Result<()>;
    async fn search(&self, vector: Vec<f32>, limit: usize) -> anyhow::Result<Vec<VectorHit>>;
    /// False for the placeholder store, which never holds anything.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Placeholder used when no vector database is configured.
pub struct NoopVectorStore;

#[async_trait::async_trait]
impl VectorStore for NoopVectorStore {
    async fn upsert(&self, _records: Vec<VectorRecord>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn search(&self, _vector: Vec<f32>, _limit: usize) -> anyhow::Result<Vec<VectorHit>> {
        Ok(Vec::new())
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

pub struct QdrantStore {
    client: QdrantClient,
}

impl QdrantStore {
    pub fn new(client: QdrantClient) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl VectorStore for QdrantStore {
    async fn upsert(&self, records: Vec<VectorRecord>) -> anyhow::Result<()> {
        let Some(dim) = records.first().map(|r| r.vector.len()) else {
            return Ok(());
        };
        self.client.ensure_collection(dim).await?;
        let points: Vec<QdrantPoint> = records
            .into_iter()
            .map(|r| QdrantPoint {
                id: point_id_from_hex(&r.id),
                vector: r.vector,
                payload: r
                    .metadata
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::String(v)))
                    .collect(),
            })
            .collect();
        debug!(collection = self.client.collection(), points = points.len(), "upserting");
        self.client.upsert(points).await?;
        Ok(())
    }

    async fn search(&self, vector: Vec<f32>, limit: usize) -> anyhow::Result<Vec<VectorHit>> {
        let resp = self.client.search(vector, limit as u64, None).await?;
        Ok(resp
            .result
            .into_iter()
            .map(|r| {
                let metadata = r
                    .payload
                    .as_ref()
                    .and_then(|p| p.as_object())
                    .map(|obj| {
                        obj.iter()
                            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                            .collect()
                    })
                    .unwrap_or_default();
                VectorHit {
                    score: r.score,
                    metadata,
                }
            })
            .collect())
    }
}
