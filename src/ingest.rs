//! Ingestion pipeline: scan → parse → chunk → embed → store.
//!
//! Each course document is identified by its title. Re-ingesting a title
//! whose document hash is unchanged is a no-op; a changed document replaces
//! the course's chunks; unknown titles are added. Unparseable documents, and
//! documents repeating a title already seen in the same run, are logged and
//! counted as failed without aborting the batch.

use anyhow::{bail, Context};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::chunk::chunk_document;
use crate::config::{ChunkingConfig, Config, IngestConfig};
use crate::document::parse_document;
use crate::error::{IngestError, RagError};
use crate::index::VectorIndex;

/// Counts reported by [`ingest_path`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Titles that were not indexed before.
    pub added: usize,
    /// Titles re-indexed because their document changed.
    pub updated: usize,
    /// Titles already indexed with identical content.
    pub skipped: usize,
    /// Documents that could not be read or parsed.
    pub failed: usize,
    /// Chunks written in this run.
    pub chunks: usize,
}

/// What happened to one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentOutcome {
    Added { chunks: usize },
    Updated { chunks: usize },
    Skipped,
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// List the course documents under `root`, sorted by path.
///
/// A path naming a single file is returned as-is, regardless of globs.
pub fn scan_documents(root: &Path, config: &IngestConfig) -> anyhow::Result<Vec<PathBuf>> {
    if !root.exists() {
        bail!("Document path does not exist: {}", root.display());
    }
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }

    let include_set = build_globset(&config.include_globs)?;
    let mut excludes = vec!["**/.git/**".to_string()];
    excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&excludes)?;

    let mut paths = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy();

        if exclude_set.is_match(rel_str.as_ref()) || !include_set.is_match(rel_str.as_ref()) {
            continue;
        }
        paths.push(path.to_path_buf());
    }

    paths.sort();
    Ok(paths)
}

fn document_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Index one document's text. `origin` names it in logs and errors.
///
/// `seen` maps each title claimed so far in this run to the document that
/// claimed it. A later document with the same title is rejected with
/// [`IngestError::DuplicateTitle`] and leaves the first one untouched.
pub async fn ingest_document(
    index: &VectorIndex,
    chunking: &ChunkingConfig,
    seen: &mut HashMap<String, String>,
    origin: &str,
    text: &str,
) -> Result<DocumentOutcome, RagError> {
    let parsed = parse_document(origin, text)?;
    let title = parsed.course.title.clone();
    if let Some(first) = seen.get(&title) {
        return Err(IngestError::DuplicateTitle {
            path: origin.to_string(),
            title,
            first: first.clone(),
        }
        .into());
    }
    seen.insert(title.clone(), origin.to_string());
    let hash = document_hash(text);

    let previous = index.course_content_hash(&title).await?;
    if previous.as_deref() == Some(hash.as_str()) {
        tracing::debug!("{}: '{}' already indexed, skipping", origin, title);
        return Ok(DocumentOutcome::Skipped);
    }

    let chunks = chunk_document(&parsed, chunking);
    if chunks.is_empty() {
        tracing::warn!(
            "{}: course '{}' has no lesson text; registering it with {} lessons and no content",
            origin,
            title,
            parsed.course.lessons.len()
        );
    }

    if previous.is_some() {
        let removed = index.delete_course_chunks(&title).await?;
        tracing::info!("{}: '{}' changed, replacing {} chunks", origin, title, removed);
    }
    index.upsert_chunks(&chunks).await?;
    // Written last so an interrupted run is retried next time.
    index.upsert_course_metadata(&parsed.course, &hash).await?;

    let count = chunks.len();
    Ok(if previous.is_some() {
        DocumentOutcome::Updated { chunks: count }
    } else {
        DocumentOutcome::Added { chunks: count }
    })
}

/// Ingest every course document under `path`.
///
/// Per-document read and parse failures are logged and counted; embedding
/// and storage failures abort the run.
pub async fn ingest_path(
    index: &VectorIndex,
    config: &Config,
    path: &Path,
) -> Result<IngestReport, RagError> {
    let paths = scan_documents(path, &config.ingest)
        .with_context(|| format!("failed to scan {}", path.display()))?;
    tracing::info!("Found {} documents under {}", paths.len(), path.display());

    let mut report = IngestReport::default();
    let mut seen = HashMap::new();
    for doc_path in &paths {
        let origin = doc_path.display().to_string();
        let text = match std::fs::read_to_string(doc_path) {
            Ok(text) => text,
            Err(source) => {
                let err = IngestError::Read {
                    path: origin.clone(),
                    source,
                };
                tracing::warn!("Skipping document: {}", err);
                report.failed += 1;
                continue;
            }
        };

        match ingest_document(index, &config.chunking, &mut seen, &origin, &text).await {
            Ok(DocumentOutcome::Added { chunks }) => {
                report.added += 1;
                report.chunks += chunks;
            }
            Ok(DocumentOutcome::Updated { chunks }) => {
                report.updated += 1;
                report.chunks += chunks;
            }
            Ok(DocumentOutcome::Skipped) => report.skipped += 1,
            Err(RagError::Ingest(err)) => {
                tracing::warn!("Skipping document: {}", err);
                report.failed += 1;
            }
            Err(other) => return Err(other),
        }
    }

    tracing::info!(
        added = report.added,
        updated = report.updated,
        skipped = report.skipped,
        failed = report.failed,
        chunks = report.chunks,
        "ingestion finished"
    );
    Ok(report)
}

/// Clear both collections and ingest `path` from scratch.
pub async fn rebuild(
    index: &VectorIndex,
    config: &Config,
    path: &Path,
) -> Result<IngestReport, RagError> {
    tracing::info!("Clearing index before rebuild");
    index.clear().await?;
    ingest_path(index, config, path).await
}
