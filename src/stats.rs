//! Index statistics for `crag stats`.
//!
//! Reads the SQLite file directly, so it works without embedding or
//! language model credentials.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::migrate::run_migrations;
use crate::store::META_EMBEDDING_MODEL;

/// Per-course breakdown.
#[derive(Debug, Clone, PartialEq)]
pub struct CourseStats {
    pub title: String,
    pub lesson_count: usize,
    pub chunk_count: i64,
    pub indexed_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexStats {
    pub embedding_model: Option<String>,
    pub total_chunks: i64,
    pub courses: Vec<CourseStats>,
}

/// Collect counts from an open pool.
pub async fn collect_stats(pool: &SqlitePool) -> Result<IndexStats> {
    let embedding_model: Option<String> =
        sqlx::query_scalar("SELECT value FROM meta WHERE key = ?")
            .bind(META_EMBEDDING_MODEL)
            .fetch_optional(pool)
            .await?;

    let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM course_content")
        .fetch_one(pool)
        .await?;

    let rows = sqlx::query(
        r#"
        SELECT
            c.title,
            c.lessons_json,
            c.indexed_at,
            COUNT(cc.id) AS chunk_count
        FROM course_catalog c
        LEFT JOIN course_content cc ON cc.course_title = c.title
        GROUP BY c.title
        ORDER BY c.title
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut courses = Vec::with_capacity(rows.len());
    for row in &rows {
        let lessons_json: String = row.get("lessons_json");
        let lessons: Vec<serde_json::Value> = serde_json::from_str(&lessons_json)?;
        courses.push(CourseStats {
            title: row.get("title"),
            lesson_count: lessons.len(),
            chunk_count: row.get("chunk_count"),
            indexed_at: row.get("indexed_at"),
        });
    }

    Ok(IndexStats {
        embedding_model,
        total_chunks,
        courses,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    run_migrations(&pool).await?;
    let stats = collect_stats(&pool).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Course Index Stats");
    println!("==================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!(
        "  Model:       {}",
        stats.embedding_model.as_deref().unwrap_or("(none)")
    );
    println!();
    println!("  Courses:     {}", stats.courses.len());
    println!("  Chunks:      {}", stats.total_chunks);

    if !stats.courses.is_empty() {
        println!();
        println!(
            "  {:<40} {:>7} {:>8}   {}",
            "COURSE", "LESSONS", "CHUNKS", "INDEXED"
        );
        println!("  {}", "-".repeat(76));
        for c in &stats.courses {
            println!(
                "  {:<40} {:>7} {:>8}   {}",
                truncate(&c.title, 40),
                c.lesson_count,
                c.chunk_count,
                format_ts_relative(c.indexed_at)
            );
        }
    }

    println!();
    pool.close().await;
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max - 3).collect();
        format!("{}...", cut)
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
