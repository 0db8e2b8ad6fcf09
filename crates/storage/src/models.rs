use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AssessmentRow {
    pub id: i64,
    pub created_at: String,
    pub model: String,
    pub probability: f64,
    pub percent: i64,
    pub category: String,
    pub input_json: String,
    pub factors_json: String,
}

/// Row to insert; the id is assigned by SQLite.
#[derive(Debug, Clone)]
pub struct NewAssessment {
    pub created_at: String,
    pub model: String,
    pub probability: f64,
    pub percent: i64,
    pub category: String,
    pub input_json: String,
    pub factors_json: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReportRow {
    pub id: i64,
    pub assessment_id: i64,
    pub created_at: String,
    pub generated_by: String,
    pub report_json: String,
    pub markdown: String,
}

#[derive(Debug, Clone)]
pub struct NewReport {
    pub assessment_id: i64,
    pub created_at: String,
    pub generated_by: String,
    pub report_json: String,
    pub markdown: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CategoryCount {
    pub category: String,
    pub count: i64,
}
