//! Vector index over the course catalog and course content.
//!
//! [`VectorIndex`] pairs a [`Store`] with the [`Embedder`] that produced its
//! vectors. Every query is embedded with that same model; opening an index
//! that was built with a different model is refused with
//! [`ConfigError::ModelMismatch`].

use std::sync::Arc;

use crate::config::{Config, ResultLimit};
use crate::embedding::{embed_batched, embed_one, Embedder};
use crate::error::{ConfigError, RagError, RetrievalError};
use crate::models::{Chunk, Course};
use crate::store::{ScoredChunk, Store, META_EMBEDDING_MODEL};

pub struct VectorIndex {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    course_match_floor: f32,
}

fn index_err(e: anyhow::Error) -> RetrievalError {
    RetrievalError::Index(format!("{:#}", e))
}

fn embed_err(e: anyhow::Error) -> RetrievalError {
    RetrievalError::Embedding(format!("{:#}", e))
}

impl VectorIndex {
    /// Open an index, recording the embedding model on first use and
    /// rejecting a store built with a different one.
    pub async fn open(
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        config: &Config,
    ) -> Result<Self, RagError> {
        let index = Self {
            store,
            embedder,
            batch_size: config.embedding.batch_size,
            course_match_floor: config.retrieval.course_match_floor,
        };
        index.check_model().await?;
        Ok(index)
    }

    async fn check_model(&self) -> Result<(), RagError> {
        let configured = self.embedder.model_name().to_string();
        match self
            .store
            .get_meta(META_EMBEDDING_MODEL)
            .await
            .map_err(index_err)?
        {
            Some(indexed) if indexed != configured => {
                Err(ConfigError::ModelMismatch { indexed, configured }.into())
            }
            Some(_) => Ok(()),
            None => {
                self.store
                    .set_meta(META_EMBEDDING_MODEL, &configured)
                    .await
                    .map_err(index_err)?;
                Ok(())
            }
        }
    }

    /// Embed a course summary into the catalog collection.
    pub async fn upsert_course_metadata(
        &self,
        course: &Course,
        content_hash: &str,
    ) -> Result<(), RetrievalError> {
        let summary = course.summary_text();
        let vector = embed_one(self.embedder.as_ref(), &summary)
            .await
            .map_err(embed_err)?;
        self.store
            .upsert_course(course, &summary, content_hash, &vector)
            .await
            .map_err(index_err)
    }

    /// Embed chunk texts into the content collection. Existing entries with
    /// the same id are overwritten.
    pub async fn upsert_chunks(&self, chunks: &[Chunk]) -> Result<(), RetrievalError> {
        if chunks.is_empty() {
            return Ok(());
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_batched(self.embedder.as_ref(), &texts, self.batch_size)
            .await
            .map_err(embed_err)?;
        self.store
            .upsert_chunks(chunks, &vectors)
            .await
            .map_err(index_err)
    }

    /// Similarity search over chunks matching both filters.
    ///
    /// Returns at most `top_k` results, best first, and fewer only when
    /// fewer entries match. An empty index yields an empty list.
    pub async fn search(
        &self,
        query: &str,
        course_filter: Option<&str>,
        lesson_filter: Option<u32>,
        top_k: ResultLimit,
    ) -> Result<Vec<ScoredChunk>, RetrievalError> {
        tracing::debug!(
            query,
            course = course_filter,
            lesson = lesson_filter,
            top_k = top_k.get(),
            "content search"
        );
        let vector = embed_one(self.embedder.as_ref(), query)
            .await
            .map_err(embed_err)?;
        self.store
            .search_chunks(&vector, course_filter, lesson_filter, top_k.get())
            .await
            .map_err(index_err)
    }

    /// Map an approximate course name onto a stored title.
    ///
    /// Returns `None` when the catalog is empty or the best match falls
    /// below the configured similarity floor.
    pub async fn resolve_course_name(&self, name: &str) -> Result<Option<String>, RetrievalError> {
        let vector = embed_one(self.embedder.as_ref(), name)
            .await
            .map_err(embed_err)?;
        let best = self.store.nearest_course(&vector).await.map_err(index_err)?;
        Ok(best.and_then(|m| {
            if m.score >= self.course_match_floor {
                tracing::debug!(name, title = %m.title, score = m.score, "resolved course name");
                Some(m.title)
            } else {
                tracing::debug!(name, best = %m.title, score = m.score, "course name below floor");
                None
            }
        }))
    }

    pub async fn get_course(&self, title: &str) -> Result<Option<Course>, RetrievalError> {
        Ok(self
            .store
            .get_course(title)
            .await
            .map_err(index_err)?
            .map(|r| r.course))
    }

    /// Hash of the document a stored course was built from.
    pub async fn course_content_hash(&self, title: &str) -> Result<Option<String>, RetrievalError> {
        Ok(self
            .store
            .get_course(title)
            .await
            .map_err(index_err)?
            .map(|r| r.content_hash))
    }

    pub async fn delete_course_chunks(&self, title: &str) -> Result<u64, RetrievalError> {
        self.store
            .delete_course_chunks(title)
            .await
            .map_err(index_err)
    }

    pub async fn course_titles(&self) -> Result<Vec<String>, RetrievalError> {
        self.store.course_titles().await.map_err(index_err)
    }

    pub async fn chunk_count(&self, course_title: Option<&str>) -> Result<i64, RetrievalError> {
        self.store.chunk_count(course_title).await.map_err(index_err)
    }

    /// Drop everything and re-stamp the current embedding model.
    pub async fn clear(&self) -> Result<(), RetrievalError> {
        self.store.clear().await.map_err(index_err)?;
        self.store
            .set_meta(META_EMBEDDING_MODEL, self.embedder.model_name())
            .await
            .map_err(index_err)
    }
}
