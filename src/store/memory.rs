//! In-memory [`Store`] for tests and throwaway runs.
//!
//! Uses `HashMap`s behind `std::sync::RwLock`. Search is the same
//! filter-then-rank brute force as the SQLite backend.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, Course};

use super::{rank, CourseMatch, CourseRecord, ScoredChunk, Store};

struct StoredCourse {
    record: CourseRecord,
    vector: Vec<f32>,
}

struct StoredChunk {
    chunk: Chunk,
    vector: Vec<f32>,
}

#[derive(Default)]
pub struct InMemoryStore {
    meta: RwLock<HashMap<String, String>>,
    courses: RwLock<HashMap<String, StoredCourse>>,
    chunks: RwLock<HashMap<String, StoredChunk>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        Ok(read(&self.meta)?.get(key).cloned())
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        write(&self.meta)?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn upsert_course(
        &self,
        course: &Course,
        _summary: &str,
        content_hash: &str,
        vector: &[f32],
    ) -> Result<()> {
        write(&self.courses)?.insert(
            course.title.clone(),
            StoredCourse {
                record: CourseRecord {
                    course: course.clone(),
                    content_hash: content_hash.to_string(),
                },
                vector: vector.to_vec(),
            },
        );
        Ok(())
    }

    async fn get_course(&self, title: &str) -> Result<Option<CourseRecord>> {
        Ok(read(&self.courses)?.get(title).map(|c| c.record.clone()))
    }

    async fn course_titles(&self) -> Result<Vec<String>> {
        let mut titles: Vec<String> = read(&self.courses)?.keys().cloned().collect();
        titles.sort();
        Ok(titles)
    }

    async fn upsert_chunks(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
        anyhow::ensure!(
            chunks.len() == vectors.len(),
            "{} chunks but {} vectors",
            chunks.len(),
            vectors.len()
        );
        let mut stored = write(&self.chunks)?;
        for (chunk, vector) in chunks.iter().zip(vectors) {
            stored.insert(
                chunk.id.clone(),
                StoredChunk {
                    chunk: chunk.clone(),
                    vector: vector.clone(),
                },
            );
        }
        Ok(())
    }

    async fn delete_course_chunks(&self, course_title: &str) -> Result<u64> {
        let mut stored = write(&self.chunks)?;
        let before = stored.len();
        stored.retain(|_, c| c.chunk.course_title != course_title);
        Ok((before - stored.len()) as u64)
    }

    async fn chunk_count(&self, course_title: Option<&str>) -> Result<i64> {
        let stored = read(&self.chunks)?;
        let count = stored
            .values()
            .filter(|c| course_title.is_none_or(|t| c.chunk.course_title == t))
            .count();
        Ok(count as i64)
    }

    async fn search_chunks(
        &self,
        query_vec: &[f32],
        course_title: Option<&str>,
        lesson_number: Option<u32>,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let stored = read(&self.chunks)?;
        let hits = stored
            .values()
            .filter(|c| course_title.is_none_or(|t| c.chunk.course_title == t))
            .filter(|c| lesson_number.is_none_or(|n| c.chunk.lesson_number == Some(n)))
            .map(|c| ScoredChunk {
                chunk: c.chunk.clone(),
                score: cosine_similarity(query_vec, &c.vector),
            })
            .collect();
        Ok(rank(hits, limit))
    }

    async fn nearest_course(&self, query_vec: &[f32]) -> Result<Option<CourseMatch>> {
        let courses = read(&self.courses)?;
        Ok(courses
            .values()
            .map(|c| CourseMatch {
                title: c.record.course.title.clone(),
                score: cosine_similarity(query_vec, &c.vector),
            })
            .max_by(|a, b| {
                a.score
                    .partial_cmp(&b.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(b.title.cmp(&a.title))
            }))
    }

    async fn clear(&self) -> Result<()> {
        write(&self.chunks)?.clear();
        write(&self.courses)?.clear();
        write(&self.meta)?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(title: &str, lesson: Option<u32>, index: i64) -> Chunk {
        Chunk {
            id: format!("{}-{}", title, index),
            course_title: title.to_string(),
            lesson_number: lesson,
            chunk_index: index,
            text: String::new(),
            hash: String::new(),
        }
    }

    #[tokio::test]
    async fn test_limit_and_filters() {
        let store = InMemoryStore::new();
        let chunks: Vec<Chunk> = (0..6).map(|i| chunk("A", Some(i as u32 % 2), i)).collect();
        let vecs: Vec<Vec<f32>> = (0..6).map(|i| vec![1.0, i as f32]).collect();
        store.upsert_chunks(&chunks, &vecs).await.unwrap();

        let hits = store.search_chunks(&[1.0, 0.0], None, None, 4).await.unwrap();
        assert_eq!(hits.len(), 4);
        assert_eq!(hits[0].chunk.chunk_index, 0);

        let hits = store
            .search_chunks(&[1.0, 0.0], Some("A"), Some(1), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|h| h.chunk.lesson_number == Some(1)));
    }

    #[tokio::test]
    async fn test_empty_store_search() {
        let store = InMemoryStore::new();
        assert!(store.search_chunks(&[1.0], None, None, 5).await.unwrap().is_empty());
        assert!(store.nearest_course(&[1.0]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_course_chunks() {
        let store = InMemoryStore::new();
        store
            .upsert_chunks(
                &[chunk("A", None, 0), chunk("B", None, 0)],
                &[vec![1.0], vec![1.0]],
            )
            .await
            .unwrap();
        assert_eq!(store.delete_course_chunks("A").await.unwrap(), 1);
        assert_eq!(store.chunk_count(None).await.unwrap(), 1);
    }
}
