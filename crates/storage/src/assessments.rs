use crate::models::{AssessmentRow, CategoryCount, NewAssessment, NewReport, ReportRow};
use anyhow::Context;
use sqlx::{QueryBuilder, SqlitePool};

pub async fn insert_assessment(pool: &SqlitePool, row: &NewAssessment) -> anyhow::Result<i64> {
    let res = sqlx::query(
        r#"
        INSERT INTO assessments (created_at, model, probability, percent, category, input_json, factors_json)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&row.created_at)
    .bind(&row.model)
    .bind(row.probability)
    .bind(row.percent)
    .bind(&row.category)
    .bind(&row.input_json)
    .bind(&row.factors_json)
    .execute(pool)
    .await
    .context("insert assessment")?;
    Ok(res.last_insert_rowid())
}

pub async fn get_assessment(pool: &SqlitePool, id: i64) -> anyhow::Result<Option<AssessmentRow>> {
    let row = sqlx::query_as::<_, AssessmentRow>("SELECT * FROM assessments WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Newest first. `category` matches case-insensitively.
pub async fn list_assessments(
    pool: &SqlitePool,
    limit: i64,
    category: Option<&str>,
) -> anyhow::Result<Vec<AssessmentRow>> {
    let mut qb = QueryBuilder::new("SELECT * FROM assessments");
    if let Some(c) = category {
        qb.push(" WHERE UPPER(category) = ");
        qb.push_bind(c.to_uppercase());
    }
    qb.push(" ORDER BY id DESC LIMIT ");
    qb.push_bind(limit.max(0));
    let rows = qb
        .build_query_as::<AssessmentRow>()
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn insert_report(pool: &SqlitePool, row: &NewReport) -> anyhow::Result<i64> {
    let res = sqlx::query(
        r#"
        INSERT INTO reports (assessment_id, created_at, generated_by, report_json, markdown)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(row.assessment_id)
    .bind(&row.created_at)
    .bind(&row.generated_by)
    .bind(&row.report_json)
    .bind(&row.markdown)
    .execute(pool)
    .await
    .with_context(|| format!("insert report for assessment {}", row.assessment_id))?;
    Ok(res.last_insert_rowid())
}

pub async fn latest_report(
    pool: &SqlitePool,
    assessment_id: i64,
) -> anyhow::Result<Option<ReportRow>> {
    let row = sqlx::query_as::<_, ReportRow>(
        "SELECT * FROM reports WHERE assessment_id = ? ORDER BY id DESC LIMIT 1",
    )
    .bind(assessment_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn category_counts(pool: &SqlitePool) -> anyhow::Result<Vec<CategoryCount>> {
    let rows = sqlx::query_as::<_, CategoryCount>(
        "SELECT category, COUNT(*) AS count FROM assessments GROUP BY category ORDER BY category",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
