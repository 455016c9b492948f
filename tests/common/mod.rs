#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use course_rag::config::{parse_config, Config};
use course_rag::embedding::Embedder;
use course_rag::error::ModelError;
use course_rag::index::VectorIndex;
use course_rag::llm::{LanguageModel, Message, ModelResponse, ToolCall};
use course_rag::rag::{open_index_with, RagSystem};
use course_rag::session::InMemorySessionStore;
use course_rag::tools::ToolDeclaration;

pub const INTRO_TO_X: &str = "Course Title: Intro to X
Course Link: https://example.com/x
Course Instructor: Ada

Lesson 1: Basics
Lesson Link: https://example.com/x/1
Variables hold values. Functions group statements into reusable units.

Lesson 2: Ownership
Lesson Link: https://example.com/x/2
Ownership moves values between bindings. Borrowing lends access without moving anything.
";

pub const COOKING: &str = "Course Title: Cooking Basics
Course Link: https://example.com/cooking

Lesson 1: Knives
Hold the knife firmly and keep your fingers curled away from the blade.
";

/// Deterministic bag-of-words embedder: each lowercase token is hashed
/// into a bucket, and the vector is L2-normalized.
pub struct BagOfWords;

pub const DIMS: usize = 1024;

fn bucket(token: &str) -> usize {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    (hasher.finish() % DIMS as u64) as usize
}

pub fn bag_of_words(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        v[bucket(&token.to_lowercase())] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

#[async_trait]
impl Embedder for BagOfWords {
    fn model_name(&self) -> &str {
        "bag-of-words"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| bag_of_words(t)).collect())
    }
}

/// Embedder whose backing service is down.
pub struct Unreachable;

#[async_trait]
impl Embedder for Unreachable {
    fn model_name(&self) -> &str {
        "bag-of-words"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        anyhow::bail!("embedding service unreachable")
    }
}

/// One recorded request to the scripted model.
#[derive(Debug, Clone)]
pub struct Request {
    pub system: String,
    pub tools_offered: bool,
    pub messages: Vec<Message>,
}

/// Language model that replays a fixed list of responses.
#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<ModelResponse, ModelError>>>,
    requests: Mutex<Vec<Request>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<Result<ModelResponse, ModelError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: Option<&[ToolDeclaration]>,
    ) -> Result<ModelResponse, ModelError> {
        self.requests.lock().unwrap().push(Request {
            system: system.to_string(),
            tools_offered: tools.is_some(),
            messages: messages.to_vec(),
        });
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::Response("script exhausted".to_string())))
    }
}

pub fn tool_call(name: &str, arguments: serde_json::Value) -> ModelResponse {
    ModelResponse::ToolUse {
        text: String::new(),
        calls: vec![ToolCall {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments,
        }],
    }
}

pub fn answer(text: &str) -> ModelResponse {
    ModelResponse::Answer(text.to_string())
}

/// Temp directory holding the database and a `docs/` corpus folder.
pub struct TestEnv {
    pub dir: TempDir,
    pub config: Arc<Config>,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        let toml = format!(
            "[db]\npath = \"{}\"\n",
            dir.path().join("data").join("crag.sqlite").display()
        );
        let config = Arc::new(parse_config(&toml).unwrap());
        Self { dir, config }
    }

    pub fn docs(&self) -> std::path::PathBuf {
        self.dir.path().join("docs")
    }

    pub fn write_doc(&self, name: &str, text: &str) {
        std::fs::write(self.docs().join(name), text).unwrap();
    }

    pub async fn index(&self) -> Arc<VectorIndex> {
        open_index_with(&self.config, Arc::new(BagOfWords))
            .await
            .unwrap()
    }

    pub async fn rag(&self, model: Arc<ScriptedModel>) -> RagSystem {
        self.rag_with(model, Arc::new(BagOfWords)).await
    }

    pub async fn rag_with(
        &self,
        model: Arc<ScriptedModel>,
        embedder: Arc<dyn Embedder>,
    ) -> RagSystem {
        RagSystem::new(
            Arc::clone(&self.config),
            open_index_with(&self.config, embedder).await.unwrap(),
            model,
            Arc::new(InMemorySessionStore::new(self.config.session.max_history)),
        )
        .unwrap()
    }
}
