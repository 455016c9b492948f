//! [`RagSystem`]: the entry point the CLI and HTTP server talk to.
//!
//! Wires the index, the language model, the session store and a fresh
//! [`ToolRegistry`] per query, and turns every failure at query time into
//! a natural-language answer.

use std::path::Path;
use std::sync::Arc;

use crate::config::{Config, ResultLimit};
use crate::db;
use crate::embedding::{create_embedder, Embedder};
use crate::error::RagError;
use crate::index::VectorIndex;
use crate::ingest::{self, IngestReport};
use crate::llm::{AnthropicClient, LanguageModel, Role};
use crate::migrate::run_migrations;
use crate::models::{Answer, CatalogStats};
use crate::orchestrator::Orchestrator;
use crate::session::{InMemorySessionStore, SessionStore};
use crate::store::sqlite::SqliteStore;
use crate::store::Store;
use crate::tools::ToolRegistry;

/// Answer returned when the language model cannot be reached.
pub const APOLOGY: &str = "I'm sorry, I couldn't generate an answer right now. Please try again.";

/// Open the SQLite-backed index described by `config`, creating the schema
/// and building the configured embedder.
pub async fn open_index(config: &Config) -> Result<Arc<VectorIndex>, RagError> {
    let embedder = create_embedder(&config.embedding)?;
    open_index_with(config, embedder).await
}

/// Like [`open_index`] with an explicit embedder.
pub async fn open_index_with(
    config: &Config,
    embedder: Arc<dyn Embedder>,
) -> Result<Arc<VectorIndex>, RagError> {
    let pool = db::connect(config).await?;
    run_migrations(&pool).await?;
    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));
    Ok(Arc::new(VectorIndex::open(store, embedder, config).await?))
}

pub struct RagSystem {
    config: Arc<Config>,
    index: Arc<VectorIndex>,
    orchestrator: Orchestrator,
    sessions: Arc<dyn SessionStore>,
    limit: ResultLimit,
}

impl RagSystem {
    pub fn new(
        config: Arc<Config>,
        index: Arc<VectorIndex>,
        model: Arc<dyn LanguageModel>,
        sessions: Arc<dyn SessionStore>,
    ) -> Result<Self, RagError> {
        let limit = config.retrieval.result_limit()?;
        let orchestrator = Orchestrator::new(model, &config.orchestration);
        Ok(Self {
            config,
            index,
            orchestrator,
            sessions,
            limit,
        })
    }

    /// Build the production system: SQLite index, configured embedder,
    /// Anthropic client and in-memory sessions. Missing credentials fail
    /// here, before any query runs.
    pub async fn from_config(config: Config) -> Result<Self, RagError> {
        config.validate()?;
        let model: Arc<dyn LanguageModel> = Arc::new(AnthropicClient::new(&config.llm)?);
        let index = open_index(&config).await?;
        let sessions = Arc::new(InMemorySessionStore::new(config.session.max_history));
        Self::new(Arc::new(config), index, model, sessions)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    /// A registry private to one query, so citations never cross queries.
    pub fn tool_registry(&self) -> ToolRegistry {
        ToolRegistry::with_course_tools(Arc::clone(&self.index), self.limit)
    }

    /// Index the documents under `path`, skipping unchanged titles.
    pub async fn ingest_path(&self, path: &Path) -> Result<IngestReport, RagError> {
        ingest::ingest_path(&self.index, &self.config, path).await
    }

    pub async fn rebuild(&self, path: &Path) -> Result<IngestReport, RagError> {
        ingest::rebuild(&self.index, &self.config, path).await
    }

    /// Answer a question. Never fails: model errors become [`APOLOGY`].
    ///
    /// With a session id, the query holds that session for its whole
    /// duration. On success both turns are recorded; on failure only the
    /// user's turn is.
    pub async fn answer_query(&self, query: &str, session_id: Option<&str>) -> Answer {
        let _guard = match session_id {
            Some(id) => Some(self.sessions.lock(id).await),
            None => None,
        };
        let history = match session_id {
            Some(id) => self.sessions.get_history(id).await,
            None => None,
        };

        let mut registry = self.tool_registry();
        let result = self
            .orchestrator
            .run(query, history.as_deref(), &mut registry)
            .await;

        match result {
            Ok(answer) => {
                if let Some(id) = session_id {
                    self.sessions.append_turn(id, Role::User, query).await;
                    self.sessions
                        .append_turn(id, Role::Assistant, &answer.answer)
                        .await;
                }
                answer
            }
            Err(e) => {
                tracing::error!("Query failed: {}", e);
                if let Some(id) = session_id {
                    self.sessions.append_turn(id, Role::User, query).await;
                }
                Answer {
                    answer: APOLOGY.to_string(),
                    sources: Vec::new(),
                    tool_calls: Vec::new(),
                }
            }
        }
    }

    pub async fn get_catalog_stats(&self) -> Result<CatalogStats, RagError> {
        let titles = self.index.course_titles().await?;
        Ok(CatalogStats {
            course_count: titles.len(),
            titles,
        })
    }
}
