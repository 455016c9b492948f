//! The per-query control loop between the language model and the tools.
//!
//! ```text
//!   Start ──► Inspect ──answer──► Done
//!               ▲  │
//!               │  └─tool calls─► Executing
//!               └─────re-invoke──────┘
//! ```
//!
//! `max_tool_rounds` bounds how many model responses may be acted on as
//! tool requests. Once the bound is reached the model is called without
//! tool declarations, so the loop always terminates with text.

use std::sync::Arc;

use crate::config::OrchestrationConfig;
use crate::error::ModelError;
use crate::llm::{LanguageModel, Message, ModelResponse, ToolCall};
use crate::models::{Answer, Source, ToolCallRecord};
use crate::tools::{ToolDeclaration, ToolRegistry};

/// Fallback when the model produces no text at all.
pub const EMPTY_ANSWER: &str = "I don't know the answer to that.";

const SYSTEM_PROMPT: &str = "You are an assistant for questions about course materials. \
You can call two tools: search_course_content for questions about what a course or lesson \
actually teaches, and get_course_outline for questions about a course's structure, link or \
lesson list.

When to use tools:
- Course content questions: search first, then answer.
- Outline or structure questions: fetch the outline, then answer with the course title, \
the course link if there is one, and every lesson with its number and title.
- General knowledge questions unrelated to the courses: answer directly without tools.
- If a tool finds nothing, say so plainly and do not invent an answer.

How to answer:
- Give only the answer. Do not describe your reasoning, the tools, or the search results.
- Be brief and clear, and keep the instructional value. Use a short example when it helps.";

enum State {
    Start,
    Inspect(ModelResponse),
    Executing(Vec<ToolCall>),
    Done(String),
}

pub struct Orchestrator {
    model: Arc<dyn LanguageModel>,
    max_tool_rounds: usize,
    tools_on_followup: bool,
}

impl Orchestrator {
    pub fn new(model: Arc<dyn LanguageModel>, config: &OrchestrationConfig) -> Self {
        Self {
            model,
            max_tool_rounds: config.max_tool_rounds.max(1),
            tools_on_followup: config.tools_on_followup,
        }
    }

    fn round_aware(&self) -> bool {
        self.max_tool_rounds > 1 && self.tools_on_followup
    }

    /// System prompt for a request. `round` is set when tools are offered.
    pub fn system_prompt(&self, history: Option<&str>, round: Option<usize>) -> String {
        let mut prompt = SYSTEM_PROMPT.to_string();
        if let Some(history) = history.filter(|h| !h.trim().is_empty()) {
            prompt.push_str("\n\nPrevious conversation:\n");
            prompt.push_str(history);
        }
        if let (Some(round), true) = (round, self.round_aware()) {
            let max = self.max_tool_rounds;
            prompt.push_str(&format!(
                "\n\n--- TOOL USAGE CONTEXT ---\nRound {} of {}\n",
                round, max
            ));
            if round < max {
                prompt.push_str(
                    "You may call tools now and again in a later round if the results are not enough.\n",
                );
            } else {
                prompt.push_str(
                    "This is the last round in which tools are available. Afterwards give your complete answer.\n",
                );
            }
            prompt.push_str("--- END CONTEXT ---\n");
        }
        prompt
    }

    /// Drive one query to a final answer.
    ///
    /// Tool calls within one model response run sequentially in the order
    /// requested. Citations are collected from the registry after each
    /// execution. A model failure aborts the cycle with [`ModelError`].
    pub async fn run(
        &self,
        query: &str,
        history: Option<&str>,
        registry: &mut ToolRegistry,
    ) -> Result<Answer, ModelError> {
        let declarations: Vec<ToolDeclaration> = registry.declarations();
        let mut messages = vec![Message::user(query)];
        let mut rounds_used = 0usize;
        let mut records: Vec<ToolCallRecord> = Vec::new();
        let mut state = State::Start;

        let answer = loop {
            state = match state {
                State::Start => {
                    let system = self.system_prompt(history, Some(1));
                    let response = self
                        .model
                        .complete(&system, &messages, tools_arg(&declarations))
                        .await?;
                    State::Inspect(response)
                }

                State::Inspect(ModelResponse::Answer(text)) => State::Done(text),

                State::Inspect(ModelResponse::ToolUse { text, .. })
                    if rounds_used >= self.max_tool_rounds =>
                {
                    tracing::warn!("Model requested tools after the round limit; using its text");
                    State::Done(text)
                }

                State::Inspect(ModelResponse::ToolUse { text, calls }) => {
                    rounds_used += 1;
                    let request = ModelResponse::ToolUse {
                        text,
                        calls: calls.clone(),
                    };
                    messages.push(request.to_message());
                    tracing::info!(
                        "Tool round {}/{}: {} tool call(s)",
                        rounds_used,
                        self.max_tool_rounds,
                        calls.len()
                    );
                    State::Executing(calls)
                }

                State::Executing(calls) => {
                    let mut results = Vec::with_capacity(calls.len());
                    for call in calls {
                        tracing::info!("  → {} {}", call.name, call.arguments);
                        let result = registry.execute(&call.name, call.arguments.clone()).await;
                        let sources = registry.drain_last_sources();
                        results.push((call.id, result.clone()));
                        records.push(ToolCallRecord {
                            name: call.name,
                            arguments: call.arguments,
                            result,
                            sources,
                        });
                    }
                    messages.push(Message::tool_results(results));

                    let offer_tools = self.tools_on_followup && rounds_used < self.max_tool_rounds;
                    let (system, tools) = if offer_tools {
                        (
                            self.system_prompt(history, Some(rounds_used + 1)),
                            tools_arg(&declarations),
                        )
                    } else {
                        (self.system_prompt(history, None), None)
                    };
                    let response = self.model.complete(&system, &messages, tools).await?;
                    State::Inspect(response)
                }

                State::Done(text) => break text,
            };
        };

        let answer = if answer.trim().is_empty() {
            EMPTY_ANSWER.to_string()
        } else {
            answer
        };

        Ok(Answer {
            answer,
            sources: collect_sources(&records),
            tool_calls: records,
        })
    }
}

fn tools_arg(declarations: &[ToolDeclaration]) -> Option<&[ToolDeclaration]> {
    if declarations.is_empty() {
        None
    } else {
        Some(declarations)
    }
}

/// All citations of the cycle in first-seen order, without duplicates.
fn collect_sources(records: &[ToolCallRecord]) -> Vec<Source> {
    let mut seen = std::collections::HashSet::new();
    records
        .iter()
        .flat_map(|r| r.sources.iter())
        .filter(|s| seen.insert((*s).clone()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ContentBlock;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// Replays canned responses and records what it was sent.
    struct Scripted {
        replies: Mutex<Vec<Result<ModelResponse, ModelError>>>,
        seen: Mutex<Vec<(String, usize, bool)>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<ModelResponse, ModelError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, usize, bool)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LanguageModel for Scripted {
        async fn complete(
            &self,
            system: &str,
            messages: &[Message],
            tools: Option<&[ToolDeclaration]>,
        ) -> Result<ModelResponse, ModelError> {
            self.seen
                .lock()
                .unwrap()
                .push((system.to_string(), messages.len(), tools.is_some()));
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(ModelResponse::Answer("out of script".to_string())))
        }
    }

    struct Lookup {
        sources: Mutex<Vec<Source>>,
    }

    #[async_trait]
    impl Tool for Lookup {
        fn name(&self) -> &str {
            "lookup"
        }
        fn description(&self) -> &str {
            "Look something up"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {"q": {"type": "string"}}})
        }
        async fn execute(&self, params: Value) -> anyhow::Result<String> {
            let q = params["q"].as_str().unwrap_or_default().to_string();
            *self.sources.lock().unwrap() = vec![Source {
                course: q.clone(),
                lesson: Some(1),
                link: None,
            }];
            Ok(format!("found {}", q))
        }
        fn drain_sources(&self) -> Vec<Source> {
            std::mem::take(&mut *self.sources.lock().unwrap())
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(Lookup {
            sources: Mutex::new(Vec::new()),
        }));
        registry
    }

    fn tool_use(id: &str, q: &str) -> ModelResponse {
        ModelResponse::ToolUse {
            text: String::new(),
            calls: vec![ToolCall {
                id: id.to_string(),
                name: "lookup".to_string(),
                arguments: json!({ "q": q }),
            }],
        }
    }

    fn config(rounds: usize, followup: bool) -> OrchestrationConfig {
        OrchestrationConfig {
            max_tool_rounds: rounds,
            tools_on_followup: followup,
        }
    }

    #[tokio::test]
    async fn test_direct_answer_has_no_tool_calls() {
        let model = Scripted::new(vec![Ok(ModelResponse::Answer("4".to_string()))]);
        let orch = Orchestrator::new(model.clone(), &config(1, false));
        let answer = orch.run("What is 2+2?", None, &mut registry()).await.unwrap();
        assert_eq!(answer.answer, "4");
        assert!(answer.sources.is_empty());
        assert!(answer.tool_calls.is_empty());
        assert_eq!(model.calls().len(), 1);
        assert!(model.calls()[0].2);
    }

    #[tokio::test]
    async fn test_one_round_then_tools_free_followup() {
        let model = Scripted::new(vec![
            Ok(tool_use("t1", "A")),
            Ok(ModelResponse::Answer("done".to_string())),
        ]);
        let orch = Orchestrator::new(model.clone(), &config(1, false));
        let answer = orch.run("q", None, &mut registry()).await.unwrap();

        assert_eq!(answer.answer, "done");
        assert_eq!(answer.tool_calls.len(), 1);
        assert_eq!(answer.tool_calls[0].result, "found A");
        assert_eq!(answer.sources.len(), 1);

        let calls = model.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].2);
        assert!(!calls[1].2, "follow-up must not offer tools");
        // user, assistant tool_use, user tool_result
        assert_eq!(calls[1].1, 3);
    }

    #[tokio::test]
    async fn test_round_bound_is_enforced() {
        // The model keeps asking for tools; only two rounds are honored.
        let model = Scripted::new(vec![
            Ok(tool_use("t1", "A")),
            Ok(tool_use("t2", "B")),
            Ok(ModelResponse::Answer("final".to_string())),
        ]);
        let orch = Orchestrator::new(model.clone(), &config(2, true));
        let answer = orch.run("compare", None, &mut registry()).await.unwrap();

        assert_eq!(answer.answer, "final");
        assert_eq!(answer.tool_calls.len(), 2);
        let calls = model.calls();
        assert_eq!(
            calls.iter().map(|c| c.2).collect::<Vec<_>>(),
            vec![true, true, false]
        );
        assert!(calls[0].0.contains("Round 1 of 2"));
        assert!(calls[1].0.contains("Round 2 of 2"));
        assert!(!calls[2].0.contains("TOOL USAGE CONTEXT"));
        let courses: Vec<_> = answer.sources.iter().map(|s| s.course.as_str()).collect();
        assert_eq!(courses, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_tool_request_past_limit_uses_text() {
        let model = Scripted::new(vec![
            Ok(tool_use("t1", "A")),
            Ok(ModelResponse::ToolUse {
                text: "partial".to_string(),
                calls: vec![],
            }),
        ]);
        let orch = Orchestrator::new(model, &config(1, false));
        let answer = orch.run("q", None, &mut registry()).await.unwrap();
        assert_eq!(answer.answer, "partial");
        assert_eq!(answer.tool_calls.len(), 1);
    }

    #[tokio::test]
    async fn test_multiple_calls_run_in_order() {
        let model = Scripted::new(vec![
            Ok(ModelResponse::ToolUse {
                text: String::new(),
                calls: vec![
                    ToolCall {
                        id: "1".to_string(),
                        name: "lookup".to_string(),
                        arguments: json!({"q": "first"}),
                    },
                    ToolCall {
                        id: "2".to_string(),
                        name: "missing".to_string(),
                        arguments: json!({}),
                    },
                ],
            }),
            Ok(ModelResponse::Answer("ok".to_string())),
        ]);
        let orch = Orchestrator::new(model, &config(1, false));
        let answer = orch.run("q", None, &mut registry()).await.unwrap();
        assert_eq!(answer.tool_calls[0].result, "found first");
        assert_eq!(answer.tool_calls[1].result, "Tool 'missing' not found");
        assert!(answer.tool_calls[1].sources.is_empty());
    }

    #[tokio::test]
    async fn test_model_error_propagates() {
        let model = Scripted::new(vec![Err(ModelError::Transport("down".to_string()))]);
        let orch = Orchestrator::new(model, &config(1, false));
        let err = orch.run("q", None, &mut registry()).await.unwrap_err();
        assert!(matches!(err, ModelError::Transport(_)));
    }

    #[tokio::test]
    async fn test_empty_answer_fallback() {
        let model = Scripted::new(vec![Ok(ModelResponse::Answer("  ".to_string()))]);
        let orch = Orchestrator::new(model, &config(1, false));
        let answer = orch.run("q", None, &mut registry()).await.unwrap();
        assert_eq!(answer.answer, EMPTY_ANSWER);
    }

    #[test]
    fn test_system_prompt_history() {
        let model = Scripted::new(vec![]);
        let orch = Orchestrator::new(model, &config(1, false));
        let prompt = orch.system_prompt(Some("User: hi\nAssistant: hello"), Some(1));
        assert!(prompt.ends_with("Previous conversation:\nUser: hi\nAssistant: hello"));
        assert!(!orch.system_prompt(None, Some(1)).contains("Previous conversation"));
    }

    #[test]
    fn test_tool_result_message_shape() {
        let msg = Message::tool_results(vec![("id".to_string(), "text".to_string())]);
        assert!(matches!(msg.content[0], ContentBlock::ToolResult { .. }));
    }
}
