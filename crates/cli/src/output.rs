//! Plain-text rendering for the `medirisk` commands.

use medirisk_core::assessment::{rank_factors, Assessment, FactorWeight};
use medirisk_core::model::{Classifier, ModelMetrics};
use medirisk_core::pipeline::AssessmentOutcome;
use medirisk_core::registry::ModelRegistry;
use medirisk_core::retrieval::Reference;
use medirisk_core::training::TrainedModel;
use std::fmt::Write as _;

pub fn factor_line(f: &FactorWeight) -> String {
    format!("{}: {:.2}%", f.feature, f.percent())
}

pub fn format_assessment(a: &Assessment) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", a.headline());
    if a.category.is_urgent() {
        let _ = writeln!(out, "(!) High risk: clinical follow-up advised");
    }
    let _ = writeln!(out, "model: {}", a.model);
    if let Some(id) = a.id {
        let _ = writeln!(out, "id: {id}");
    }
    let _ = writeln!(out, "Top contributing factors:");
    for f in &a.top_factors {
        let _ = writeln!(out, "  {}", factor_line(f));
    }
    out
}

pub fn format_outcome(outcome: &AssessmentOutcome) -> String {
    let mut out = format_assessment(&outcome.assessment);
    if let Some(report) = &outcome.report {
        out.push('\n');
        out.push_str(&report.to_markdown());
    }
    out
}

fn metrics_line(m: &ModelMetrics) -> String {
    format!(
        "accuracy {:.3}  precision {:.3}  recall {:.3}  f1 {:.3}  roc_auc {:.3}",
        m.accuracy, m.precision, m.recall, m.f1, m.roc_auc
    )
}

pub fn format_models(registry: &ModelRegistry) -> String {
    if registry.is_empty() {
        return "no models loaded\n".to_string();
    }
    let mut out = String::new();
    for (name, artifact) in registry.iter() {
        let _ = writeln!(out, "{name} [{}]", artifact.kind_name());
        if let Some(m) = &artifact.metadata.metrics {
            let _ = writeln!(out, "  {}", metrics_line(m));
        }
        for f in rank_factors(&artifact.feature_importance()).iter().take(5) {
            let _ = writeln!(out, "  {}", factor_line(f));
        }
    }
    out
}

pub fn format_training(trained: &[TrainedModel]) -> String {
    let mut out = String::new();
    for t in trained {
        let metrics = t
            .artifact
            .metadata
            .metrics
            .as_ref()
            .map(metrics_line)
            .unwrap_or_else(|| "no metrics".to_string());
        let _ = writeln!(out, "{:<20} {}", t.name, metrics);
    }
    out
}

/// History table followed by per-category totals over the whole database.
pub fn format_history(rows: &[Assessment], counts: &[(String, i64)]) -> String {
    if rows.is_empty() {
        return "no assessments recorded\n".to_string();
    }
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>5}  {:<25}  {:<20}  {:>4}  category",
        "id", "created", "model", "pct"
    );
    for a in rows {
        let _ = writeln!(
            out,
            "{:>5}  {:<25}  {:<20}  {:>3}%  {}",
            a.id.unwrap_or_default(),
            a.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            a.model,
            a.percent,
            a.category
        );
    }
    if !counts.is_empty() {
        let totals: Vec<String> = counts.iter().map(|(c, n)| format!("{c} {n}")).collect();
        let _ = writeln!(out, "totals: {}", totals.join(", "));
    }
    out
}

pub fn format_references(refs: &[Reference]) -> String {
    if refs.is_empty() {
        return "no matching passages\n".to_string();
    }
    let mut out = String::new();
    for (i, r) in refs.iter().enumerate() {
        let _ = writeln!(out, "{}. {} (score {:.3})\n   {}", i + 1, r.source, r.score, r.excerpt);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use medirisk_core::features::PatientInput;
    use medirisk_core::risk::RiskCategory;

    #[test]
    fn assessment_output_lists_factors_as_percentages() {
        let a = Assessment {
            id: Some(3),
            model: "Decision Tree".into(),
            probability: 0.639,
            percent: 63,
            category: RiskCategory::Moderate,
            top_factors: vec![FactorWeight {
                feature: "cp".into(),
                description: "Chest pain type".into(),
                weight: 0.31234,
            }],
            input: PatientInput::default(),
            created_at: Utc::now(),
        };
        let text = format_assessment(&a);
        assert!(text.starts_with("63% MODERATE RISK\n"));
        assert!(text.contains("  cp: 31.23%"));
        assert!(!text.contains("(!)"));
    }

    #[test]
    fn history_ends_with_category_totals() {
        let a = Assessment {
            id: Some(1),
            model: "Random Forest".into(),
            probability: 0.81,
            percent: 81,
            category: RiskCategory::High,
            top_factors: Vec::new(),
            input: PatientInput::default(),
            created_at: Utc::now(),
        };
        let counts = vec![("HIGH".to_string(), 1), ("LOW".to_string(), 4)];
        let text = format_history(&[a], &counts);
        assert!(text.contains("81%  HIGH"));
        assert!(text.ends_with("totals: HIGH 1, LOW 4\n"));
        assert_eq!(format_history(&[], &counts), "no assessments recorded\n");
    }
}
