//! SQLite-backed [`Store`].
//!
//! Vectors are stored as little-endian `f32` BLOBs next to their payload.
//! Filters are applied in SQL; similarity is computed in Rust over the
//! filtered rows.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{Chunk, Course, Lesson};

use super::{rank, CourseMatch, CourseRecord, ScoredChunk, Store};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Wrap a pool whose schema has already been migrated.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_chunk(row: &SqliteRow) -> Chunk {
    let lesson: Option<i64> = row.get("lesson_number");
    Chunk {
        id: row.get("id"),
        course_title: row.get("course_title"),
        lesson_number: lesson.and_then(|n| u32::try_from(n).ok()),
        chunk_index: row.get("chunk_index"),
        text: row.get("text"),
        hash: row.get("hash"),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar("SELECT value FROM meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO meta (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_course(
        &self,
        course: &Course,
        summary: &str,
        content_hash: &str,
        vector: &[f32],
    ) -> Result<()> {
        let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, course.title.as_bytes()).to_string();
        let lessons_json = serde_json::to_string(&course.lessons)?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO course_catalog
                (title, id, link, instructor, lessons_json, summary, embedding, content_hash, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(title) DO UPDATE SET
                link = excluded.link,
                instructor = excluded.instructor,
                lessons_json = excluded.lessons_json,
                summary = excluded.summary,
                embedding = excluded.embedding,
                content_hash = excluded.content_hash,
                indexed_at = excluded.indexed_at
            "#,
        )
        .bind(&course.title)
        .bind(&id)
        .bind(&course.link)
        .bind(&course.instructor)
        .bind(&lessons_json)
        .bind(summary)
        .bind(vec_to_blob(vector))
        .bind(content_hash)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_course(&self, title: &str) -> Result<Option<CourseRecord>> {
        let row = sqlx::query(
            "SELECT title, link, instructor, lessons_json, content_hash \
             FROM course_catalog WHERE title = ?",
        )
        .bind(title)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let lessons_json: String = row.get("lessons_json");
        let lessons: Vec<Lesson> = serde_json::from_str(&lessons_json)?;
        Ok(Some(CourseRecord {
            course: Course {
                title: row.get("title"),
                link: row.get("link"),
                instructor: row.get("instructor"),
                lessons,
            },
            content_hash: row.get("content_hash"),
        }))
    }

    async fn course_titles(&self) -> Result<Vec<String>> {
        let titles = sqlx::query_scalar("SELECT title FROM course_catalog ORDER BY title")
            .fetch_all(&self.pool)
            .await?;
        Ok(titles)
    }

    async fn upsert_chunks(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
        anyhow::ensure!(
            chunks.len() == vectors.len(),
            "{} chunks but {} vectors",
            chunks.len(),
            vectors.len()
        );

        let mut tx = self.pool.begin().await?;
        for (chunk, vector) in chunks.iter().zip(vectors) {
            sqlx::query(
                r#"
                INSERT INTO course_content
                    (id, course_title, lesson_number, chunk_index, text, hash, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    course_title = excluded.course_title,
                    lesson_number = excluded.lesson_number,
                    chunk_index = excluded.chunk_index,
                    text = excluded.text,
                    hash = excluded.hash,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.course_title)
            .bind(chunk.lesson_number.map(i64::from))
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_course_chunks(&self, course_title: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM course_content WHERE course_title = ?")
            .bind(course_title)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn chunk_count(&self, course_title: Option<&str>) -> Result<i64> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM course_content WHERE (?1 IS NULL OR course_title = ?1)",
        )
        .bind(course_title)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn search_chunks(
        &self,
        query_vec: &[f32],
        course_title: Option<&str>,
        lesson_number: Option<u32>,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, course_title, lesson_number, chunk_index, text, hash, embedding
            FROM course_content
            WHERE (?1 IS NULL OR course_title = ?1)
              AND (?2 IS NULL OR lesson_number = ?2)
            "#,
        )
        .bind(course_title)
        .bind(lesson_number.map(i64::from))
        .fetch_all(&self.pool)
        .await?;

        let hits = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                ScoredChunk {
                    score: cosine_similarity(query_vec, &blob_to_vec(&blob)),
                    chunk: row_to_chunk(row),
                }
            })
            .collect();

        Ok(rank(hits, limit))
    }

    async fn nearest_course(&self, query_vec: &[f32]) -> Result<Option<CourseMatch>> {
        let rows = sqlx::query("SELECT title, embedding FROM course_catalog")
            .fetch_all(&self.pool)
            .await?;

        let best = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                CourseMatch {
                    title: row.get("title"),
                    score: cosine_similarity(query_vec, &blob_to_vec(&blob)),
                }
            })
            .max_by(|a, b| {
                a.score
                    .partial_cmp(&b.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        Ok(best)
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM course_content").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM course_catalog").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM meta").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::run_migrations;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    fn chunk(title: &str, lesson: Option<u32>, index: i64) -> Chunk {
        Chunk {
            id: crate::chunk::chunk_id(title, index),
            course_title: title.to_string(),
            lesson_number: lesson,
            chunk_index: index,
            text: format!("{} chunk {}", title, index),
            hash: format!("h{}", index),
        }
    }

    fn course(title: &str) -> Course {
        Course {
            title: title.to_string(),
            link: Some("https://example.com".to_string()),
            instructor: None,
            lessons: vec![Lesson {
                number: 1,
                title: "One".to_string(),
                link: None,
            }],
        }
    }

    #[tokio::test]
    async fn test_course_roundtrip() {
        let store = store().await;
        store
            .upsert_course(&course("A"), "Course: A", "hash-a", &[1.0, 0.0])
            .await
            .unwrap();
        let record = store.get_course("A").await.unwrap().unwrap();
        assert_eq!(record.course, course("A"));
        assert_eq!(record.content_hash, "hash-a");
        assert!(store.get_course("B").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_overwrites_by_id() {
        let store = store().await;
        let chunks = vec![chunk("A", Some(1), 0), chunk("A", Some(1), 1)];
        let vecs = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        store.upsert_chunks(&chunks, &vecs).await.unwrap();
        store.upsert_chunks(&chunks, &vecs).await.unwrap();
        assert_eq!(store.chunk_count(None).await.unwrap(), 2);
        assert_eq!(store.chunk_count(Some("A")).await.unwrap(), 2);
        assert_eq!(store.chunk_count(Some("B")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_filtered_search_sees_all_matches() {
        let store = store().await;
        // Ten chunks from A are all closer to the query than B's chunks.
        let mut chunks = Vec::new();
        let mut vecs = Vec::new();
        for i in 0..10 {
            chunks.push(chunk("A", Some(1), i));
            vecs.push(vec![1.0, 0.0]);
        }
        chunks.push(chunk("B", Some(2), 0));
        vecs.push(vec![0.5, 0.5]);
        chunks.push(chunk("B", Some(2), 1));
        vecs.push(vec![0.0, 1.0]);
        store.upsert_chunks(&chunks, &vecs).await.unwrap();

        let hits = store
            .search_chunks(&[1.0, 0.0], Some("B"), None, 3)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.chunk_index, 0);

        let hits = store
            .search_chunks(&[1.0, 0.0], None, Some(2), 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);

        let hits = store.search_chunks(&[1.0, 0.0], None, None, 4).await.unwrap();
        assert_eq!(hits.len(), 4);
        assert!(hits.iter().all(|h| h.chunk.course_title == "A"));
    }

    #[tokio::test]
    async fn test_preamble_chunk_has_no_lesson() {
        let store = store().await;
        store
            .upsert_chunks(&[chunk("A", None, 0)], &[vec![1.0]])
            .await
            .unwrap();
        let hits = store.search_chunks(&[1.0], None, None, 1).await.unwrap();
        assert_eq!(hits[0].chunk.lesson_number, None);
        let hits = store.search_chunks(&[1.0], None, Some(1), 1).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_nearest_course_and_clear() {
        let store = store().await;
        assert!(store.nearest_course(&[1.0, 0.0]).await.unwrap().is_none());
        store
            .upsert_course(&course("A"), "A", "a", &[1.0, 0.0])
            .await
            .unwrap();
        store
            .upsert_course(&course("B"), "B", "b", &[0.0, 1.0])
            .await
            .unwrap();
        let best = store.nearest_course(&[0.1, 0.9]).await.unwrap().unwrap();
        assert_eq!(best.title, "B");

        store.set_meta("k", "v").await.unwrap();
        store.clear().await.unwrap();
        assert!(store.course_titles().await.unwrap().is_empty());
        assert_eq!(store.get_meta("k").await.unwrap(), None);
    }
}
