//! Tools the language model can call, and the registry that dispatches them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 ToolRegistry                 │
//! │  ┌───────────────────────┐ ┌──────────────┐  │
//! │  │ search_course_content │ │ get_course_  │  │
//! │  │                       │ │ outline      │  │
//! │  └───────────┬───────────┘ └──────┬───────┘  │
//! └──────────────┼────────────────────┼──────────┘
//!                ▼                    ▼
//!              VectorIndex (content + catalog)
//! ```
//!
//! Each tool renders its result as plain text for the model and, from the
//! same data, records a structured citation list. The registry exposes those
//! citations through a take-and-clear accessor so they are consumed exactly
//! once.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::ResultLimit;
use crate::index::VectorIndex;
use crate::models::{Course, Source};

/// Declaration sent to the model so it knows a tool exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A capability the model can invoke by name.
///
/// # Lifecycle
///
/// 1. The tool is registered via [`ToolRegistry::register`].
/// 2. Its declaration is sent with each model request that allows tools.
/// 3. [`execute`](Tool::execute) runs when the model asks for it.
/// 4. [`drain_sources`](Tool::drain_sources) hands over the citations of
///    that execution.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Identifier the model uses, e.g. `"search_course_content"`.
    fn name(&self) -> &str;

    /// One-line description the model uses to decide whether to call it.
    fn description(&self) -> &str;

    /// JSON Schema of the arguments object.
    fn parameters_schema(&self) -> Value;

    /// Run the tool. The returned text is given to the model verbatim.
    async fn execute(&self, params: Value) -> Result<String>;

    /// Citations recorded by the most recent execution, cleared on read.
    fn drain_sources(&self) -> Vec<Source>;

    fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.parameters_schema(),
        }
    }
}

/// Name → tool mapping plus the citation slot of the last execution.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
    last_sources: Vec<Source>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            last_sources: Vec::new(),
        }
    }

    /// Registry with the search and outline tools over `index`.
    pub fn with_course_tools(index: Arc<VectorIndex>, limit: ResultLimit) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(CourseSearchTool::new(Arc::clone(&index), limit)));
        registry.register(Box::new(CourseOutlineTool::new(index)));
        registry
    }

    /// Register a tool. A tool with the same name replaces the old one.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.tools.iter().map(|t| t.declaration()).collect()
    }

    /// Execute a tool by name. Never fails: unknown tools and execution
    /// errors come back as text the model can read.
    pub async fn execute(&mut self, name: &str, params: Value) -> String {
        self.last_sources.clear();

        let Some(tool) = self.tools.iter().find(|t| t.name() == name) else {
            tracing::warn!("Model requested unknown tool '{}'", name);
            return format!("Tool '{}' not found", name);
        };

        match tool.execute(params).await {
            Ok(text) => {
                self.last_sources = tool.drain_sources();
                text
            }
            Err(e) => {
                tool.drain_sources();
                tracing::warn!("Tool '{}' failed: {:#}", name, e);
                format!("Search error: {:#}", e)
            }
        }
    }

    /// Citations from the immediately preceding [`execute`](Self::execute).
    /// A second call without an intervening execution returns nothing.
    pub fn drain_last_sources(&mut self) -> Vec<Source> {
        std::mem::take(&mut self.last_sources)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn take_sources(slot: &Mutex<Vec<Source>>) -> Vec<Source> {
    let mut guard = slot.lock().unwrap_or_else(|p| p.into_inner());
    std::mem::take(&mut *guard)
}

fn store_sources(slot: &Mutex<Vec<Source>>, sources: Vec<Source>) {
    let mut guard = slot.lock().unwrap_or_else(|p| p.into_inner());
    *guard = sources;
}

// ═══════════════════════════════════════════════════════════════════════
// search_course_content
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    course_name: Option<String>,
    #[serde(default)]
    lesson_number: Option<u32>,
}

/// Semantic search over lesson content with optional course and lesson
/// filters. Course names are resolved fuzzily before filtering.
pub struct CourseSearchTool {
    index: Arc<VectorIndex>,
    limit: ResultLimit,
    last_sources: Mutex<Vec<Source>>,
}

impl CourseSearchTool {
    pub fn new(index: Arc<VectorIndex>, limit: ResultLimit) -> Self {
        Self {
            index,
            limit,
            last_sources: Mutex::new(Vec::new()),
        }
    }

    async fn citation_link(
        &self,
        cache: &mut HashMap<String, Option<Course>>,
        course_title: &str,
        lesson: Option<u32>,
    ) -> Result<Option<String>> {
        if !cache.contains_key(course_title) {
            let course = self.index.get_course(course_title).await?;
            cache.insert(course_title.to_string(), course);
        }
        let Some(Some(course)) = cache.get(course_title) else {
            return Ok(None);
        };
        let lesson_link = lesson
            .and_then(|n| course.lesson(n))
            .and_then(|l| l.link.clone());
        Ok(lesson_link.or_else(|| course.link.clone()))
    }
}

#[async_trait]
impl Tool for CourseSearchTool {
    fn name(&self) -> &str {
        "search_course_content"
    }

    fn description(&self) -> &str {
        "Search course materials with smart course name matching and lesson filtering"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to search for in the course content"
                },
                "course_name": {
                    "type": "string",
                    "description": "Course title (partial matches work, e.g. 'MCP', 'Introduction')"
                },
                "lesson_number": {
                    "type": "integer",
                    "description": "Specific lesson number to search within (e.g. 1, 2, 3)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        store_sources(&self.last_sources, Vec::new());
        let args: SearchArgs =
            serde_json::from_value(params).context("invalid search_course_content arguments")?;

        let requested_course = args
            .course_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let course_title = match requested_course {
            Some(name) => match self.index.resolve_course_name(name).await? {
                Some(title) => Some(title),
                None => return Ok(format!("No course found matching '{}'", name)),
            },
            None => None,
        };

        let hits = self
            .index
            .search(
                &args.query,
                course_title.as_deref(),
                args.lesson_number,
                self.limit,
            )
            .await?;

        if hits.is_empty() {
            let mut filter_info = String::new();
            if let Some(name) = requested_course {
                filter_info.push_str(&format!(" in course '{}'", name));
            }
            if let Some(n) = args.lesson_number {
                filter_info.push_str(&format!(" in lesson {}", n));
            }
            return Ok(format!("No relevant content found{}.", filter_info));
        }

        let mut cache = HashMap::new();
        let mut blocks = Vec::with_capacity(hits.len());
        let mut sources = Vec::with_capacity(hits.len());
        for hit in &hits {
            let chunk = &hit.chunk;
            let source = Source {
                course: chunk.course_title.clone(),
                lesson: chunk.lesson_number,
                link: self
                    .citation_link(&mut cache, &chunk.course_title, chunk.lesson_number)
                    .await?,
            };
            blocks.push(format!("[{}]\n{}", source.label(), chunk.text));
            sources.push(source);
        }

        store_sources(&self.last_sources, sources);
        Ok(blocks.join("\n\n"))
    }

    fn drain_sources(&self) -> Vec<Source> {
        take_sources(&self.last_sources)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// get_course_outline
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct OutlineArgs {
    course_name: String,
}

/// Course title, link, instructor and numbered lesson list.
pub struct CourseOutlineTool {
    index: Arc<VectorIndex>,
    last_sources: Mutex<Vec<Source>>,
}

impl CourseOutlineTool {
    pub fn new(index: Arc<VectorIndex>) -> Self {
        Self {
            index,
            last_sources: Mutex::new(Vec::new()),
        }
    }
}

/// Render a course outline as the model and CLI see it.
pub fn format_outline(course: &Course) -> String {
    let mut parts = vec![format!("**{}**", course.title)];
    if let Some(link) = &course.link {
        parts.push(format!("Course Link: {}", link));
    }
    if let Some(instructor) = &course.instructor {
        parts.push(format!("Instructor: {}", instructor));
    }

    if course.lessons.is_empty() {
        parts.push("\n**Lessons:** No lessons available".to_string());
    } else {
        parts.push(format!("\n**Lessons ({} total):**", course.lessons.len()));
        let mut lessons: Vec<_> = course.lessons.iter().collect();
        lessons.sort_by_key(|l| l.number);
        for lesson in lessons {
            parts.push(format!("{}. {}", lesson.number, lesson.title));
        }
    }
    parts.join("\n")
}

#[async_trait]
impl Tool for CourseOutlineTool {
    fn name(&self) -> &str {
        "get_course_outline"
    }

    fn description(&self) -> &str {
        "Get course outline including title, course link, and complete lesson list with numbers and titles"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "course_name": {
                    "type": "string",
                    "description": "Course title or partial course name to get outline for (e.g., 'MCP', 'Introduction')"
                }
            },
            "required": ["course_name"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        store_sources(&self.last_sources, Vec::new());
        let args: OutlineArgs =
            serde_json::from_value(params).context("invalid get_course_outline arguments")?;

        let Some(title) = self.index.resolve_course_name(&args.course_name).await? else {
            return Ok(format!("No course found matching '{}'", args.course_name));
        };
        let Some(course) = self.index.get_course(&title).await? else {
            return Ok(format!("Course metadata not found for '{}'", title));
        };

        store_sources(
            &self.last_sources,
            vec![Source {
                course: course.title.clone(),
                lesson: None,
                link: course.link.clone(),
            }],
        );
        Ok(format_outline(&course))
    }

    fn drain_sources(&self) -> Vec<Source> {
        take_sources(&self.last_sources)
    }
}
