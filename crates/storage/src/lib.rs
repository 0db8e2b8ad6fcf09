//! Storage layer: SQLite schemas and helpers.
//!
//! Holds DB pool setup, the migration runner and the assessment/report
//! repository functions.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

pub mod assessments;
pub mod models;

pub use assessments::{
    category_counts, get_assessment, insert_assessment, insert_report, latest_report,
    list_assessments,
};

pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let mut url = database_url.to_string();
    if !database_url.starts_with("sqlite:") {
        let path = std::path::PathBuf::from(database_url);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let norm = path.to_string_lossy().replace('\\', "/");
        if path.is_absolute() {
            url = format!("sqlite:///{}?mode=rwc", norm.trim_start_matches('/'));
        } else {
            url = format!("sqlite://{}?mode=rwc", norm);
        }
    }
    let mut opts = SqlitePoolOptions::new();
    if url.contains("memory") {
        opts = opts.max_connections(1);
    } else {
        opts = opts.max_connections(5);
    }
    let pool = opts.connect(&url).await?;
    tracing::debug!(url = %url, "sqlite pool ready");
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    // Applies SQLx migrations located in crates/storage/migrations.
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Connects and migrates in one step.
pub async fn open(database_url: &str) -> anyhow::Result<SqlitePool> {
    let pool = connect(database_url).await?;
    migrate(&pool).await?;
    Ok(pool)
}
