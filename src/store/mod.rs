//! Storage abstraction for the two vector collections.
//!
//! The [`Store`] trait holds the course-metadata collection (one entry per
//! course, embedded from its summary) and the content collection (one entry
//! per chunk). Implementations:
//!
//! - [`SqliteStore`](sqlite::SqliteStore): persistent, the default.
//! - [`InMemoryStore`](memory::InMemoryStore): for tests and throwaway runs.
//!
//! Both rank by brute-force cosine similarity *after* applying metadata
//! filters, so a filtered search sees every matching entry rather than a
//! post-filtered slice of an unfiltered top-k.
//!
//! Implementations must be `Send + Sync` and safe for concurrent readers.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, Course};

/// Meta key recording which embedding model produced the stored vectors.
pub const META_EMBEDDING_MODEL: &str = "embedding_model";

/// A chunk together with its similarity to the query.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// A stored course plus the hash of the document it came from.
#[derive(Debug, Clone)]
pub struct CourseRecord {
    pub course: Course,
    pub content_hash: String,
}

/// Best catalog match for a fuzzy course name.
#[derive(Debug, Clone)]
pub struct CourseMatch {
    pub title: String,
    pub score: f32,
}

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get_meta`](Store::get_meta) / [`set_meta`](Store::set_meta) | Index-level facts |
/// | [`upsert_course`](Store::upsert_course) | Insert or replace a catalog entry |
/// | [`get_course`](Store::get_course) | Fetch a catalog entry by exact title |
/// | [`course_titles`](Store::course_titles) | All titles, sorted |
/// | [`upsert_chunks`](Store::upsert_chunks) | Insert or replace content entries by id |
/// | [`delete_course_chunks`](Store::delete_course_chunks) | Drop a course's content |
/// | [`search_chunks`](Store::search_chunks) | Filtered similarity search |
/// | [`nearest_course`](Store::nearest_course) | Single nearest catalog entry |
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_meta(&self, key: &str) -> Result<Option<String>>;

    async fn set_meta(&self, key: &str, value: &str) -> Result<()>;

    /// Insert or replace the catalog entry keyed by `course.title`.
    async fn upsert_course(
        &self,
        course: &Course,
        summary: &str,
        content_hash: &str,
        vector: &[f32],
    ) -> Result<()>;

    async fn get_course(&self, title: &str) -> Result<Option<CourseRecord>>;

    async fn course_titles(&self) -> Result<Vec<String>>;

    /// Insert or replace chunks by id. `vectors[i]` belongs to `chunks[i]`.
    async fn upsert_chunks(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()>;

    /// Remove every chunk of a course. Returns how many were removed.
    async fn delete_course_chunks(&self, course_title: &str) -> Result<u64>;

    /// Count chunks, optionally for one course only.
    async fn chunk_count(&self, course_title: Option<&str>) -> Result<i64>;

    /// Rank the chunks matching both filters by cosine similarity and
    /// return at most `limit` of them, best first.
    async fn search_chunks(
        &self,
        query_vec: &[f32],
        course_title: Option<&str>,
        lesson_number: Option<u32>,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>>;

    /// The catalog entry most similar to `query_vec`, if the catalog is
    /// not empty.
    async fn nearest_course(&self, query_vec: &[f32]) -> Result<Option<CourseMatch>>;

    /// Drop both collections and all meta entries.
    async fn clear(&self) -> Result<()>;
}

/// Sort best-first and keep the top `limit`.
pub(crate) fn rank(mut hits: Vec<ScoredChunk>, limit: usize) -> Vec<ScoredChunk> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk.course_title.cmp(&b.chunk.course_title))
            .then(a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
    });
    hits.truncate(limit);
    hits
}
