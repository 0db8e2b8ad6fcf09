use crate::features::FeatureVector;
use crate::risk::RiskCategory;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    Category { category: RiskCategory },
    ProbabilityAtLeast { value: f64 },
    FeatureAbove { feature: String, value: f64 },
    FeatureAtLeast { feature: String, value: f64 },
    FeatureBelow { feature: String, value: f64 },
    FeatureEquals { feature: String, value: f64 },
    And { all: Vec<Condition> },
    Or { any: Vec<Condition> },
    Always,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Rule {
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub condition: Condition,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RuleContext<'a> {
    pub category: RiskCategory,
    pub probability: f64,
    pub features: &'a FeatureVector,
}

fn feature_value(ctx: &RuleContext<'_>, feature: &str) -> Option<f64> {
    match ctx.features.get(feature) {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(feature, "rule references unknown feature");
            None
        }
    }
}

pub fn matches(condition: &Condition, ctx: &RuleContext<'_>) -> bool {
    match condition {
        Condition::Category { category } => ctx.category == *category,
        Condition::ProbabilityAtLeast { value } => ctx.probability >= *value,
        Condition::FeatureAbove { feature, value } => feature_value(ctx, feature)
            .map(|v| v > *value)
            .unwrap_or(false),
        Condition::FeatureAtLeast { feature, value } => feature_value(ctx, feature)
            .map(|v| v >= *value)
            .unwrap_or(false),
        Condition::FeatureBelow { feature, value } => feature_value(ctx, feature)
            .map(|v| v < *value)
            .unwrap_or(false),
        Condition::FeatureEquals { feature, value } => feature_value(ctx, feature)
            .map(|v| (v - *value).abs() < 1e-9)
            .unwrap_or(false),
        Condition::And { all } => all.iter().all(|c| matches(c, ctx)),
        Condition::Or { any } => any.iter().any(|c| matches(c, ctx)),
        Condition::Always => true,
    }
}

pub fn evaluate<'a>(rules: &'a [Rule], ctx: &RuleContext<'_>) -> Vec<&'a Rule> {
    let mut matched: Vec<&Rule> = rules
        .iter()
        .filter(|r| r.enabled && matches(&r.condition, ctx))
        .collect();
    matched.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
    matched
}

/// Recommendations of all matching rules, first occurrence wins.
pub fn recommendations(rules: &[Rule], ctx: &RuleContext<'_>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for rule in evaluate(rules, ctx) {
        for rec in &rule.recommendations {
            if !out.iter().any(|r| r == rec) {
                out.push(rec.clone());
            }
        }
    }
    out
}

pub fn load_rules_from_dir(dir: &Path) -> anyhow::Result<Vec<Rule>> {
    let mut rules = Vec::new();
    if !dir.exists() {
        return Ok(rules);
    }
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.path());
    for entry in entries {
        if entry.file_type()?.is_file()
            && entry.path().extension().and_then(|e| e.to_str()) == Some("toml")
        {
            let content = fs::read_to_string(entry.path())?;
            let rule: Rule = toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("{}: {e}", entry.path().display()))?;
            rules.push(rule);
        }
    }
    Ok(rules)
}

/// Configured rules, or the built-in set when none are configured.
pub fn load_or_builtin(dir: Option<&Path>) -> anyhow::Result<Vec<Rule>> {
    let loaded = match dir {
        Some(d) => load_rules_from_dir(d)?,
        None => Vec::new(),
    };
    if loaded.is_empty() {
        Ok(builtin_rules())
    } else {
        Ok(loaded)
    }
}

fn rule(name: &str, priority: i32, condition: Condition, recs: &[&str]) -> Rule {
    Rule {
        name: name.to_string(),
        priority,
        enabled: true,
        condition,
        recommendations: recs.iter().map(|s| s.to_string()).collect(),
    }
}

fn above(feature: &str, value: f64) -> Condition {
    Condition::FeatureAbove {
        feature: feature.to_string(),
        value,
    }
}

fn at_least(feature: &str, value: f64) -> Condition {
    Condition::FeatureAtLeast {
        feature: feature.to_string(),
        value,
    }
}

pub fn builtin_rules() -> Vec<Rule> {
    vec![
        rule(
            "high-risk-referral",
            0,
            Condition::Category {
                category: RiskCategory::High,
            },
            &[
                "Arrange a cardiology consultation promptly.",
                "Discuss further testing such as a stress test or coronary angiography.",
            ],
        ),
        rule(
            "moderate-risk-follow-up",
            10,
            Condition::Category {
                category: RiskCategory::Moderate,
            },
            &["Schedule a follow-up with a primary care physician within the next few months."],
        ),
        rule(
            "elevated-blood-pressure",
            20,
            at_least("trestbps", 140.0),
            &["Monitor blood pressure regularly and reduce dietary sodium."],
        ),
        rule(
            "high-cholesterol",
            20,
            at_least("chol", 240.0),
            &["Check a full lipid panel and adopt a diet low in saturated fat."],
        ),
        rule(
            "elevated-glucose",
            30,
            Condition::FeatureEquals {
                feature: "fbs".to_string(),
                value: 1.0,
            },
            &["Screen for diabetes with an HbA1c test."],
        ),
        rule(
            "exercise-symptoms",
            30,
            Condition::Or {
                any: vec![
                    Condition::FeatureEquals {
                        feature: "exang".to_string(),
                        value: 1.0,
                    },
                    at_least("oldpeak", 2.0),
                ],
            },
            &["Avoid strenuous exertion until exercise symptoms have been evaluated."],
        ),
        rule(
            "general-lifestyle",
            100,
            Condition::Always,
            &[
                "Keep up regular moderate physical activity, as tolerated.",
                "Avoid tobacco and limit alcohol.",
            ],
        ),
    ]
}
