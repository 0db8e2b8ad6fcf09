use crate::assessment::{assess, Assessment, AssessmentOptions, FactorWeight};
use crate::config::AppConfig;
use crate::features::PatientInput;
use crate::knowledge::KnowledgeBase;
use crate::registry::ModelRegistry;
use crate::report::{ReportAgent, RiskReport};
use crate::retrieval::{Reference, Retriever};
use crate::vectorstore::{self, VectorStore};
use crate::{embeddings, rules};
use anyhow::Context;
use chrono::{DateTime, Utc};
use providers::lmstudio::{LmStudioConfig, LmStudioProvider};
use providers::noop::NoopProvider;
use providers::openai::{OpenAiConfig, OpenAiProvider};
use providers::qdrant::QdrantClient;
use providers::ProviderRegistry;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use storage::models::{AssessmentRow, NewAssessment, NewReport};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Persist the assessment to the database.
    pub store: bool,
    /// Generate (and, when stored, persist) a report.
    pub report: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            store: true,
            report: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentOutcome {
    pub assessment: Assessment,
    pub report: Option<RiskReport>,
}

pub fn build_registry(config: &AppConfig) -> ProviderRegistry {
    let mut reg = ProviderRegistry::new()
        .with_embedding("noop", Arc::new(NoopProvider))
        .with_llm("noop", Arc::new(NoopProvider));

    if let (Some(key), Some(base)) = (
        std::env::var_os("OPENAI_API_KEY"),
        std::env::var_os("OPENAI_BASE_URL"),
    ) {
        let provider = OpenAiProvider::new(OpenAiConfig {
            api_key: key.to_string_lossy().into_owned(),
            base_url: base.to_string_lossy().into_owned(),
            embedding_model: config.embeddings.model.clone(),
            chat_model: config.report.chat_model.clone(),
        });
        reg = reg
            .with_embedding("openai", Arc::new(provider.clone()))
            .with_llm("openai", Arc::new(provider));
    }

    if let Some(base) = std::env::var_os("LMSTUDIO_BASE_URL") {
        let provider = LmStudioProvider::new(LmStudioConfig {
            base_url: base.to_string_lossy().into_owned(),
            embedding_model: config.embeddings.model.clone(),
            chat_model: config.report.chat_model.clone(),
        });
        reg = reg
            .with_embedding("lmstudio", Arc::new(provider.clone()))
            .with_llm("lmstudio", Arc::new(provider));
    }

    let reg = reg.set_preferred_embedding(&config.embeddings.provider);
    match &config.report.llm_provider {
        Some(name) => reg.set_preferred_llm(name),
        None => reg,
    }
}

pub fn build_vector_store(config: &AppConfig) -> Arc<dyn VectorStore> {
    match config.vectors.provider.as_str() {
        "qdrant" => {
            if let Some(url) = &config.vectors.url {
                let client = QdrantClient::new(providers::qdrant::QdrantConfig {
                    url: url.clone(),
                    collection: config.vectors.collection.clone(),
                    api_key: std::env::var("QDRANT_API_KEY").ok(),
                });
                return Arc::new(vectorstore::QdrantStore::new(client));
            }
            warn!("vectors.provider is qdrant but vectors.url is unset");
            Arc::new(vectorstore::NoopVectorStore)
        }
        _ => Arc::new(vectorstore::NoopVectorStore),
    }
}

pub fn load_models(config: &AppConfig) -> ModelRegistry {
    ModelRegistry::load_dir(Path::new(&config.models.dir))
}

pub fn assessment_options(config: &AppConfig) -> AssessmentOptions {
    AssessmentOptions {
        thresholds: config.risk.thresholds,
        top_factors: config.risk.top_factors,
    }
}

pub fn build_retriever(config: &AppConfig, registry: &ProviderRegistry) -> anyhow::Result<Retriever> {
    let knowledge = KnowledgeBase::load(
        Path::new(&config.retrieval.knowledge_dir),
        &config.retrieval.include,
        config.retrieval.chunk_chars,
    )
    .context("load knowledge base")?;
    Ok(Retriever::new(
        knowledge,
        build_vector_store(config),
        registry.clone(),
        config.retrieval.top_k,
    ))
}

pub fn build_report_agent(
    config: &AppConfig,
    registry: &ProviderRegistry,
) -> anyhow::Result<ReportAgent> {
    let rules_dir = config.report.rules_path.as_deref().map(Path::new);
    let rules = rules::load_or_builtin(rules_dir).context("load recommendation rules")?;
    let mut agent = ReportAgent::new(rules).with_max_tokens(config.report.max_tokens);

    if let Some(name) = &config.report.llm_provider {
        match registry.llm(Some(name)) {
            Ok(provider) => agent = agent.with_llm(name, provider),
            Err(e) => warn!("LLM provider {name} unavailable, reports use the template: {e}"),
        }
    }
    if config.retrieval.enabled {
        agent = agent.with_retriever(build_retriever(config, registry)?);
    }
    Ok(agent)
}

pub async fn open_db(config: &AppConfig) -> anyhow::Result<SqlitePool> {
    storage::open(&config.database.path)
        .await
        .with_context(|| format!("open database {}", config.database.path))
}

fn to_row(a: &Assessment) -> anyhow::Result<NewAssessment> {
    Ok(NewAssessment {
        created_at: a.created_at.to_rfc3339(),
        model: a.model.clone(),
        probability: a.probability,
        percent: i64::from(a.percent),
        category: a.category.as_str().to_string(),
        input_json: serde_json::to_string(&a.input)?,
        factors_json: serde_json::to_string(&a.top_factors)?,
    })
}

pub fn assessment_from_row(row: AssessmentRow) -> anyhow::Result<Assessment> {
    let input: PatientInput =
        serde_json::from_str(&row.input_json).context("decode stored patient input")?;
    let top_factors: Vec<FactorWeight> =
        serde_json::from_str(&row.factors_json).context("decode stored factors")?;
    let created_at = DateTime::parse_from_rfc3339(&row.created_at)
        .context("decode stored timestamp")?
        .with_timezone(&Utc);
    Ok(Assessment {
        id: Some(row.id),
        model: row.model,
        probability: row.probability,
        percent: u8::try_from(row.percent).context("stored percent out of range")?,
        category: row
            .category
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?,
        top_factors,
        input,
        created_at,
    })
}

async fn store_report(pool: &SqlitePool, report: &RiskReport) -> anyhow::Result<()> {
    let Some(assessment_id) = report.assessment_id else {
        return Ok(());
    };
    storage::insert_report(
        pool,
        &NewReport {
            assessment_id,
            created_at: report.created_at.to_rfc3339(),
            generated_by: report.generated_by.clone(),
            report_json: serde_json::to_string(report)?,
            markdown: report.to_markdown(),
        },
    )
    .await?;
    Ok(())
}

/// Loads the models, scores `input` and optionally stores it and writes a report.
pub async fn run_assessment(
    config: &AppConfig,
    input: &PatientInput,
    model_name: Option<&str>,
    opts: RunOptions,
) -> anyhow::Result<AssessmentOutcome> {
    let models = load_models(config);
    let name = match model_name {
        Some(n) => n.to_string(),
        None => models
            .default_model(config.models.default.as_deref())?
            .to_string(),
    };
    let mut assessment = assess(&models, &name, input, &assessment_options(config))?;
    info!(
        model = %assessment.model,
        percent = assessment.percent,
        category = %assessment.category,
        "assessment complete"
    );

    // Agent setup can fail on bad rules or knowledge files, so it runs
    // before anything is written.
    let agent = if opts.report {
        let registry = build_registry(config);
        Some(build_report_agent(config, &registry)?)
    } else {
        None
    };

    let pool = if opts.store {
        let pool = open_db(config).await?;
        let id = storage::insert_assessment(&pool, &to_row(&assessment)?)
            .await
            .context("store assessment")?;
        debug!(id, "assessment stored");
        assessment.id = Some(id);
        Some(pool)
    } else {
        None
    };

    let report = if let Some(agent) = agent {
        let report = agent.generate(&assessment).await;
        if let Some(pool) = &pool {
            store_report(pool, &report).await.context("store report")?;
        }
        Some(report)
    } else {
        None
    };

    Ok(AssessmentOutcome { assessment, report })
}

/// Regenerates and stores a report for a stored assessment.
pub async fn report_for(config: &AppConfig, assessment_id: i64) -> anyhow::Result<RiskReport> {
    let pool = open_db(config).await?;
    let row = storage::get_assessment(&pool, assessment_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("assessment {assessment_id} not found"))?;
    let assessment = assessment_from_row(row)?;
    let registry = build_registry(config);
    let agent = build_report_agent(config, &registry)?;
    let report = agent.generate(&assessment).await;
    store_report(&pool, &report).await.context("store report")?;
    Ok(report)
}

/// The most recently stored report for an assessment, without regenerating.
pub async fn stored_report(config: &AppConfig, assessment_id: i64) -> anyhow::Result<RiskReport> {
    let pool = open_db(config).await?;
    let row = storage::latest_report(&pool, assessment_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no stored report for assessment {assessment_id}"))?;
    serde_json::from_str(&row.report_json).context("decode stored report")
}

/// Number of stored assessments per risk category.
pub async fn category_counts(config: &AppConfig) -> anyhow::Result<Vec<(String, i64)>> {
    let pool = open_db(config).await?;
    Ok(storage::category_counts(&pool)
        .await?
        .into_iter()
        .map(|c| (c.category, c.count))
        .collect())
}

pub async fn history(
    config: &AppConfig,
    limit: i64,
    category: Option<&str>,
) -> anyhow::Result<Vec<Assessment>> {
    let pool = open_db(config).await?;
    storage::list_assessments(&pool, limit, category)
        .await?
        .into_iter()
        .map(assessment_from_row)
        .collect()
}

pub async fn index_knowledge(config: &AppConfig) -> anyhow::Result<usize> {
    let registry = build_registry(config);
    let knowledge = KnowledgeBase::load(
        Path::new(&config.retrieval.knowledge_dir),
        &config.retrieval.include,
        config.retrieval.chunk_chars,
    )?;
    let store = build_vector_store(config);
    embeddings::index_knowledge(
        &knowledge,
        &registry,
        store.as_ref(),
        config.embeddings.batch_size,
    )
    .await
}

pub async fn search_knowledge(
    config: &AppConfig,
    query: &str,
    top_k: Option<usize>,
) -> anyhow::Result<Vec<Reference>> {
    let mut config = config.clone();
    if let Some(k) = top_k {
        config.retrieval.top_k = k;
    }
    let registry = build_registry(&config);
    let retriever = build_retriever(&config, &registry)?;
    Ok(retriever.retrieve(query).await)
}
