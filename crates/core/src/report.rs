//! Report agent: turns one assessment into findings, recommendations,
//! optional literature context and a narrative summary.

use crate::assessment::{Assessment, FactorWeight};
use crate::features::{preprocess, PatientInput, Thalassemia};
use crate::retrieval::{query_for, Reference, Retriever};
use crate::risk::RiskCategory;
use crate::rules::{self, Rule, RuleContext};
use chrono::{DateTime, Utc};
use providers::{CompletionRequest, LlmProvider};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DISCLAIMER: &str = "This report is produced by a statistical model for informational \
purposes only. It is not a medical diagnosis and does not replace evaluation by a qualified \
healthcare professional.";

pub const TEMPLATE_WRITER: &str = "template";

const SYSTEM_PROMPT: &str = "You are a clinical decision-support assistant. Summarize the \
heart disease risk assessment below for a clinician in two short paragraphs of plain prose. \
Use only the facts provided. Do not make a diagnosis and do not invent measurements.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub key: String,
    pub detail: String,
}

impl Finding {
    fn new(key: &str, detail: String) -> Self {
        Self {
            key: key.to_string(),
            detail,
        }
    }
}

/// Clinical flags read straight from the raw form values.
pub fn findings(input: &PatientInput) -> Vec<Finding> {
    let mut out = Vec::new();
    if input.resting_bp >= 140 {
        out.push(Finding::new(
            "blood_pressure",
            format!("Resting blood pressure of {} mmHg is in the hypertensive range.", input.resting_bp),
        ));
    }
    if input.cholesterol >= 240 {
        out.push(Finding::new(
            "cholesterol",
            format!("Serum cholesterol of {} mg/dl is high.", input.cholesterol),
        ));
    }
    if input.elevated_fasting_glucose() {
        out.push(Finding::new(
            "fasting_glucose",
            format!("Fasting blood sugar of {} mg/dl is above 120 mg/dl.", input.fasting_glucose),
        ));
    }
    if input.exercise_angina {
        out.push(Finding::new(
            "exercise_angina",
            "Angina was induced by exercise.".to_string(),
        ));
    }
    if input.st_depression >= 2.0 {
        out.push(Finding::new(
            "st_depression",
            format!("Exercise ST depression of {:.1} mm is marked.", input.st_depression),
        ));
    }
    if input.major_vessels > 0 {
        out.push(Finding::new(
            "major_vessels",
            format!("{} major vessel(s) colored by fluoroscopy.", input.major_vessels),
        ));
    }
    if input.thalassemia != Thalassemia::Normal {
        out.push(Finding::new(
            "thalassemia",
            format!("Thallium stress test result: {}.", input.thalassemia.label()),
        ));
    }
    let predicted = input.predicted_max_heart_rate();
    if (input.max_heart_rate as f64) < 0.6 * predicted as f64 {
        out.push(Finding::new(
            "max_heart_rate",
            format!(
                "Maximum heart rate of {} bpm is below 60% of the age-predicted {} bpm.",
                input.max_heart_rate, predicted
            ),
        ));
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskReport {
    pub assessment_id: Option<i64>,
    pub model: String,
    pub probability: f64,
    pub percent: u8,
    pub category: RiskCategory,
    pub summary: String,
    pub findings: Vec<Finding>,
    pub top_factors: Vec<FactorWeight>,
    pub recommendations: Vec<String>,
    pub references: Vec<Reference>,
    pub generated_by: String,
    pub disclaimer: String,
    pub created_at: DateTime<Utc>,
}

impl RiskReport {
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        let _ = writeln!(md, "# Heart Disease Risk Report\n");
        let _ = writeln!(
            md,
            "**{}% {}** ({} model)\n",
            self.percent,
            self.category.label(),
            self.model
        );

        let _ = writeln!(md, "## Summary\n\n{}\n", self.summary.trim());

        let _ = writeln!(md, "## Key Findings\n");
        if self.findings.is_empty() {
            let _ = writeln!(md, "No individual measurement is outside the usual range.");
        }
        for f in &self.findings {
            let _ = writeln!(md, "- {}", f.detail);
        }
        md.push('\n');

        let _ = writeln!(md, "## Top Contributing Factors\n");
        for (i, f) in self.top_factors.iter().enumerate() {
            let _ = writeln!(md, "{}. {} ({}): {:.2}%", i + 1, f.description, f.feature, f.percent());
        }
        md.push('\n');

        let _ = writeln!(md, "## Recommendations\n");
        for r in &self.recommendations {
            let _ = writeln!(md, "- {r}");
        }
        md.push('\n');

        let _ = writeln!(md, "## References\n");
        if self.references.is_empty() {
            let _ = writeln!(md, "No references retrieved.");
        }
        for r in &self.references {
            let _ = writeln!(md, "- *{}*: {}", r.source, r.excerpt);
        }
        md.push('\n');

        let _ = writeln!(md, "## Disclaimer\n\n{}", self.disclaimer);
        md
    }
}

fn template_summary(assessment: &Assessment, findings: &[Finding]) -> String {
    let mut s = format!(
        "The {} model estimates a {}% probability of heart disease, which places this patient in the {} band.",
        assessment.model,
        assessment.percent,
        assessment.category.label()
    );
    let leading: Vec<&str> = assessment
        .top_factors
        .iter()
        .take(3)
        .map(|f| f.description.as_str())
        .collect();
    if !leading.is_empty() {
        let _ = write!(
            s,
            " The model weighs {} most heavily.",
            leading.join(", ").to_lowercase()
        );
    }
    match findings.len() {
        0 => s.push_str(" No individual measurement is flagged."),
        1 => s.push_str(" One measurement is flagged for attention."),
        n => {
            let _ = write!(s, " {n} measurements are flagged for attention.");
        }
    }
    if assessment.category.is_urgent() {
        s.push_str(" Prompt clinical follow-up is advised.");
    }
    s
}

fn build_prompt(
    assessment: &Assessment,
    findings: &[Finding],
    recommendations: &[String],
    references: &[Reference],
) -> String {
    let mut p = String::new();
    let _ = writeln!(
        p,
        "Model: {}\nEstimated probability: {}% ({})",
        assessment.model,
        assessment.percent,
        assessment.category.label()
    );
    let input = &assessment.input;
    let _ = writeln!(
        p,
        "Patient: age {}, {:?}, chest pain {}, resting BP {} mmHg, cholesterol {} mg/dl, max HR {} bpm, \
fasting glucose {} mg/dl, ST depression {:.1}, major vessels {}, thallium {}",
        input.age,
        input.sex,
        input.chest_pain.label(),
        input.resting_bp,
        input.cholesterol,
        input.max_heart_rate,
        input.fasting_glucose,
        input.st_depression,
        input.major_vessels,
        input.thalassemia.label()
    );
    let _ = writeln!(p, "\nTop factors:");
    for f in &assessment.top_factors {
        let _ = writeln!(p, "- {}: {:.2}%", f.description, f.percent());
    }
    let _ = writeln!(p, "\nFindings:");
    for f in findings {
        let _ = writeln!(p, "- {}", f.detail);
    }
    let _ = writeln!(p, "\nRecommendations:");
    for r in recommendations {
        let _ = writeln!(p, "- {r}");
    }
    if !references.is_empty() {
        let _ = writeln!(p, "\nContext:");
        for r in references {
            let _ = writeln!(p, "[{}] {}", r.source, r.excerpt);
        }
    }
    p
}

pub struct ReportAgent {
    rules: Vec<Rule>,
    llm: Option<(String, Arc<dyn LlmProvider>)>,
    retriever: Option<Retriever>,
    max_tokens: Option<u32>,
}

impl ReportAgent {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules,
            llm: None,
            retriever: None,
            max_tokens: None,
        }
    }

    pub fn with_llm(mut self, name: &str, provider: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some((name.to_string(), provider));
        self
    }

    pub fn with_retriever(mut self, retriever: Retriever) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    async fn narrate(&self, prompt: String) -> Option<(String, String)> {
        let (name, provider) = self.llm.as_ref()?;
        let mut req = CompletionRequest::new(prompt).with_system(SYSTEM_PROMPT);
        req.max_tokens = self.max_tokens;
        match provider.complete(&req).await {
            Ok(resp) if !resp.text.trim().is_empty() => {
                debug!(provider = %name, model = %resp.model, "narrative generated");
                Some((resp.text.trim().to_string(), name.clone()))
            }
            Ok(_) => {
                warn!(provider = %name, "LLM returned an empty narrative, using template");
                None
            }
            Err(e) => {
                warn!(provider = %name, "LLM narrative failed, using template: {e}");
                None
            }
        }
    }

    pub async fn generate(&self, assessment: &Assessment) -> RiskReport {
        let findings = findings(&assessment.input);

        let features = preprocess(&assessment.input);
        let ctx = RuleContext {
            category: assessment.category,
            probability: assessment.probability,
            features: &features,
        };
        let recommendations = rules::recommendations(&self.rules, &ctx);

        let references = match &self.retriever {
            Some(r) => r.retrieve(&query_for(assessment)).await,
            None => Vec::new(),
        };

        let prompt = build_prompt(assessment, &findings, &recommendations, &references);
        let (summary, generated_by) = match self.narrate(prompt).await {
            Some(narrative) => narrative,
            None => (
                template_summary(assessment, &findings),
                TEMPLATE_WRITER.to_string(),
            ),
        };
        info!(
            findings = findings.len(),
            recommendations = recommendations.len(),
            references = references.len(),
            generated_by = %generated_by,
            "report generated"
        );

        RiskReport {
            assessment_id: assessment.id,
            model: assessment.model.clone(),
            probability: assessment.probability,
            percent: assessment.percent,
            category: assessment.category,
            summary,
            findings,
            top_factors: assessment.top_factors.clone(),
            recommendations,
            references,
            generated_by,
            disclaimer: DISCLAIMER.to_string(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::rank_factors;
    use crate::features::FEATURE_COUNT;
    use crate::knowledge::{KnowledgeBase, Passage};
    use crate::vectorstore::NoopVectorStore;
    use providers::{CompletionResponse, ProviderError, ProviderRegistry};

    struct Echo(&'static str);

    #[async_trait::async_trait]
    impl LlmProvider for Echo {
        async fn complete(
            &self,
            req: &CompletionRequest,
        ) -> Result<CompletionResponse, ProviderError> {
            assert!(req.system.as_deref().unwrap_or("").contains("Do not make a diagnosis"));
            Ok(CompletionResponse {
                text: self.0.to_string(),
                model: "echo".into(),
            })
        }
    }

    struct Broken;

    #[async_trait::async_trait]
    impl LlmProvider for Broken {
        async fn complete(
            &self,
            _req: &CompletionRequest,
        ) -> Result<CompletionResponse, ProviderError> {
            Err(ProviderError::RequestFailed("connection refused".into()))
        }
    }

    fn assessment(input: PatientInput, category: RiskCategory, probability: f64) -> Assessment {
        let mut importance = vec![0.0; FEATURE_COUNT];
        importance[4] = 0.6;
        importance[0] = 0.4;
        let mut top_factors = rank_factors(&importance);
        top_factors.truncate(5);
        Assessment {
            id: Some(7),
            model: "Random Forest".into(),
            probability,
            percent: crate::risk::risk_percent(probability),
            category,
            top_factors,
            input,
            created_at: Utc::now(),
        }
    }

    fn risky_input() -> PatientInput {
        PatientInput {
            age: 70,
            resting_bp: 160,
            cholesterol: 280,
            fasting_glucose: 140,
            exercise_angina: true,
            st_depression: 2.5,
            major_vessels: 2,
            thalassemia: Thalassemia::ReversibleDefect,
            max_heart_rate: 80,
            ..PatientInput::default()
        }
    }

    #[test]
    fn findings_cover_every_flag() {
        let keys: Vec<String> = findings(&risky_input()).into_iter().map(|f| f.key).collect();
        assert_eq!(
            keys,
            vec![
                "blood_pressure",
                "cholesterol",
                "fasting_glucose",
                "exercise_angina",
                "st_depression",
                "major_vessels",
                "thalassemia",
                "max_heart_rate"
            ]
        );
        assert!(findings(&PatientInput::default()).is_empty());
    }

    #[test]
    fn findings_thresholds_are_inclusive_where_expected() {
        let at_limits = PatientInput {
            resting_bp: 140,
            cholesterol: 240,
            fasting_glucose: 120,
            ..PatientInput::default()
        };
        let keys: Vec<String> = findings(&at_limits).into_iter().map(|f| f.key).collect();
        assert_eq!(keys, vec!["blood_pressure", "cholesterol"]);
    }

    #[tokio::test]
    async fn template_is_used_without_llm() {
        let agent = ReportAgent::new(rules::builtin_rules());
        let report = agent
            .generate(&assessment(risky_input(), RiskCategory::High, 0.75))
            .await;
        assert_eq!(report.generated_by, TEMPLATE_WRITER);
        assert_eq!(report.assessment_id, Some(7));
        assert!(report.summary.contains("75%"));
        assert!(report.summary.contains("HIGH RISK"));
        assert!(report.recommendations[0].contains("cardiology"));
        let unique: std::collections::HashSet<_> = report.recommendations.iter().collect();
        assert_eq!(unique.len(), report.recommendations.len());
        assert_eq!(report.disclaimer, DISCLAIMER);

        let md = report.to_markdown();
        for heading in [
            "## Summary",
            "## Key Findings",
            "## Top Contributing Factors",
            "## Recommendations",
            "## Disclaimer",
        ] {
            assert!(md.contains(heading), "missing {heading}");
        }
        assert!(md.contains("## References\n\nNo references retrieved."));
        assert!(md.contains("1. Serum cholesterol (chol): 60.00%"));
    }

    #[tokio::test]
    async fn llm_narrative_is_used_when_available() {
        let agent = ReportAgent::new(rules::builtin_rules())
            .with_llm("mock", Arc::new(Echo("  Narrative from the model.  ")));
        let report = agent
            .generate(&assessment(PatientInput::default(), RiskCategory::Low, 0.12))
            .await;
        assert_eq!(report.generated_by, "mock");
        assert_eq!(report.summary, "Narrative from the model.");
    }

    #[tokio::test]
    async fn llm_failure_or_empty_output_falls_back() {
        let a = assessment(PatientInput::default(), RiskCategory::Low, 0.12);
        let broken = ReportAgent::new(Vec::new()).with_llm("broken", Arc::new(Broken));
        assert_eq!(broken.generate(&a).await.generated_by, TEMPLATE_WRITER);

        let empty = ReportAgent::new(Vec::new()).with_llm("empty", Arc::new(Echo("   ")));
        let report = empty.generate(&a).await;
        assert_eq!(report.generated_by, TEMPLATE_WRITER);
        assert!(report.recommendations.is_empty());
    }

    #[tokio::test]
    async fn references_are_attached_and_rendered() {
        let kb = KnowledgeBase::from_passages(vec![Passage::new(
            "lipids.md",
            "High serum cholesterol raises heart disease risk.".into(),
        )])
        .unwrap();
        let retriever = Retriever::new(kb, Arc::new(NoopVectorStore), ProviderRegistry::new(), 3);
        let agent = ReportAgent::new(rules::builtin_rules()).with_retriever(retriever);
        let report = agent
            .generate(&assessment(risky_input(), RiskCategory::High, 0.9))
            .await;
        assert_eq!(report.references.len(), 1);
        assert!(report.to_markdown().contains("## References"));
        assert!(report.to_markdown().contains("*lipids.md*"));
    }
}
