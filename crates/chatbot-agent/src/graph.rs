//! The conversation state machine
//!
//! Each turn starts where the thread was suspended, appends the user's
//! message and walks the steps below until it reaches the human-input gate:
//!
//! ```text
//! agent --(tool calls)--> tools --> update_state --> agent
//!   \--(no tool calls)--> final_answer --> summarize --> human_input
//! ```
//!
//! A turn either suspends and saves its checkpoint, or fails and leaves the
//! stored checkpoint untouched.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use chatbot_ai::{Content, Message, Model, Usage};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    error::{Error, Result},
    events::AgentEvent,
    prompts::{BuiltinPrompts, PromptKey, PromptSelector},
    state::{ConversationState, SearchScope},
    store::{Checkpoint, CheckpointStore, ThreadStatus},
    summarizer::{self, SummarizerConfig},
    tool::{BoxedTool, ToolContext, ToolResult, names, to_api_tool},
    transport::{RunConfig, Transport, drain},
    updater::update_state,
};

/// Steps of the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Agent,
    Tools,
    UpdateState,
    FinalAnswer,
    Summarize,
    /// Waiting for the user; a turn ends here
    HumanInput,
}

/// Where to go after the agent step: tool calls are dispatched, anything
/// else is the final answer.
pub fn route(last: Option<&Message>) -> Step {
    match last {
        Some(message) if message.is_ai() && !message.tool_calls().is_empty() => Step::Tools,
        _ => Step::FinalAnswer,
    }
}

/// Graph configuration
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Model used by the agent, classifier and summarizer
    pub model: Model,
    /// Maximum tokens per agent response
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Steps allowed per turn before giving up
    pub max_steps: u32,
    pub summarizer: SummarizerConfig,
}

impl GraphConfig {
    pub fn new(model: Model) -> Self {
        Self {
            model,
            max_tokens: None,
            temperature: None,
            max_steps: 25,
            summarizer: SummarizerConfig::default(),
        }
    }
}

/// What one turn did
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub thread_id: String,
    /// Steps executed, not counting the suspension
    pub steps: u32,
    pub search_scope: SearchScope,
    /// Whether the window was summarized at the end of the turn
    pub summarized: bool,
    /// Tokens used by the agent step this turn
    pub usage: Usage,
}

#[derive(Default)]
struct TurnProgress {
    steps: u32,
    summarized: bool,
    usage: Usage,
}

/// Drives conversation threads through the state machine
pub struct ChatGraph {
    config: GraphConfig,
    transport: Arc<dyn Transport>,
    prompts: Arc<dyn PromptSelector>,
    store: Arc<dyn CheckpointStore>,
    tools: Vec<BoxedTool>,
    /// Cached compiled JSON schema validators keyed by tool name
    schema_cache: HashMap<String, Arc<jsonschema::Validator>>,
    event_tx: broadcast::Sender<AgentEvent>,
    thread_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    cancel: CancellationToken,
}

impl ChatGraph {
    pub fn new(
        config: GraphConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            transport,
            prompts: Arc::new(BuiltinPrompts),
            store,
            tools: vec![],
            schema_cache: HashMap::new(),
            event_tx,
            thread_locks: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Use a different prompt selector
    pub fn with_prompts(mut self, prompts: Arc<dyn PromptSelector>) -> Self {
        self.prompts = prompts;
        self
    }

    /// Subscribe to events of every thread
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.event_tx.subscribe()
    }

    /// Cancelling this token aborts running turns
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Set tools (replaces existing)
    pub fn set_tools(&mut self, tools: Vec<BoxedTool>) {
        self.schema_cache.clear();
        for tool in &tools {
            self.cache_tool_schema(tool);
        }
        self.tools = tools;
    }

    fn cache_tool_schema(&mut self, tool: &BoxedTool) {
        let schema = tool.parameters_schema();
        match jsonschema::validator_for(&schema) {
            Ok(validator) => {
                self.schema_cache
                    .insert(tool.name().to_string(), Arc::new(validator));
            }
            Err(e) => {
                tracing::warn!(
                    "Invalid tool parameter schema for '{}', skipping validation: {}",
                    tool.name(),
                    e
                );
            }
        }
    }

    fn emit(&self, event: AgentEvent) {
        let _ = self.event_tx.send(event);
    }

    fn thread_lock(&self, thread_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.thread_locks.lock();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(thread_id.to_string()).or_default().clone()
    }

    /// Run one turn: accept `input` from the user and continue until the
    /// thread waits for the next message.
    ///
    /// Turns on the same thread run one at a time; `auth` is handed to every
    /// tool unchanged.
    pub async fn send(
        &self,
        thread_id: &str,
        input: &str,
        auth: Option<&str>,
    ) -> Result<TurnOutcome> {
        let lock = self.thread_lock(thread_id);
        let _guard = lock.lock().await;

        let result = self
            .run_turn(thread_id, input, auth)
            .instrument(tracing::info_span!("turn", thread_id = %thread_id))
            .await;
        if let Err(e) = &result {
            tracing::error!(thread_id = %thread_id, "turn failed: {}", e);
            self.emit(AgentEvent::Error {
                message: e.to_string(),
            });
        }
        result
    }

    async fn run_turn(
        &self,
        thread_id: &str,
        input: &str,
        auth: Option<&str>,
    ) -> Result<TurnOutcome> {
        let mut checkpoint = self
            .store
            .load(thread_id)
            .await?
            .unwrap_or_else(|| Checkpoint::fresh(thread_id));
        let start = checkpoint.resume_step();
        self.emit(AgentEvent::TurnStart {
            thread_id: thread_id.to_string(),
        });

        let mut state = checkpoint.state.clone();
        state.append(Message::human(input));

        let mut progress = TurnProgress::default();
        let cancel = self.cancel.child_token();
        self.run_steps(&mut state, start, thread_id, auth, &cancel, &mut progress)
            .await?;

        checkpoint.state = state;
        checkpoint.status = ThreadStatus::Suspended {
            resume_into: Step::Agent,
        };
        checkpoint.updated_at = chrono::Utc::now().timestamp_millis();
        self.store.save(&checkpoint).await?;

        tracing::debug!(steps = progress.steps, "suspended for human input");
        self.emit(AgentEvent::Suspended {
            thread_id: thread_id.to_string(),
            steps: progress.steps,
            usage: progress.usage.clone(),
        });

        Ok(TurnOutcome {
            thread_id: thread_id.to_string(),
            steps: progress.steps,
            search_scope: checkpoint.state.search_scope,
            summarized: progress.summarized,
            usage: progress.usage,
        })
    }

    async fn run_steps(
        &self,
        state: &mut ConversationState,
        start: Step,
        thread_id: &str,
        auth: Option<&str>,
        cancel: &CancellationToken,
        progress: &mut TurnProgress,
    ) -> Result<()> {
        let mut step = start;

        while step != Step::HumanInput {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if progress.steps >= self.config.max_steps {
                return Err(Error::RecursionLimit(self.config.max_steps));
            }
            progress.steps += 1;
            tracing::debug!(?step, n = progress.steps, "step");
            self.emit(AgentEvent::StepStart { step });

            step = match step {
                Step::Agent => {
                    let usage = self.agent_step(state, cancel).await?;
                    progress.usage.add(&usage);
                    route(state.last_message())
                }
                Step::Tools => {
                    self.tools_step(state, thread_id, auth, cancel).await?;
                    Step::UpdateState
                }
                Step::UpdateState => {
                    let update = update_state(state);
                    if update.processed > 0 {
                        tracing::debug!(?update, "state updated");
                    }
                    self.emit(AgentEvent::StateUpdated {
                        search_scope: state.search_scope,
                        last_seen_message_id: state.last_seen_message_id(),
                    });
                    Step::Agent
                }
                Step::FinalAnswer => {
                    self.final_answer_step(state, thread_id, auth, cancel).await?;
                    Step::Summarize
                }
                Step::Summarize => {
                    progress.summarized = self.summarize_step(state, cancel).await?;
                    Step::HumanInput
                }
                Step::HumanInput => Step::HumanInput,
            };
        }

        Ok(())
    }

    /// Messages the agent sees: the running summary, if any, then the window.
    fn agent_context(&self, state: &ConversationState) -> Result<Vec<Message>> {
        let mut messages = Vec::with_capacity(state.messages().len() + 1);
        if let Some(summary) = state.summary.as_deref() {
            let context = self
                .prompts
                .select(PromptKey::SummaryContext)?
                .render(&[("summary", summary)])?;
            messages.push(Message::system(context));
        }
        messages.extend(state.messages().iter().cloned());
        Ok(messages)
    }

    async fn agent_step(
        &self,
        state: &mut ConversationState,
        cancel: &CancellationToken,
    ) -> Result<Usage> {
        let config = RunConfig {
            system_prompt: Some(self.prompts.select(PromptKey::AgentSystem)?.render(&[])?),
            tools: self.tools.iter().map(|t| to_api_tool(t.as_ref())).collect(),
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let messages = self.agent_context(state)?;
        let mut event_stream = self.transport.run(messages, &config, cancel.clone()).await?;
        let completion = drain(&mut event_stream, |event| self.emit(event.clone()))
            .await
            .map_err(Error::Model)?;

        let message = completion.message.unwrap_or_else(|| {
            tracing::warn!("model stream ended without a response");
            Message::ai_empty()
        });
        state.append(message);
        Ok(completion.usage)
    }

    async fn tools_step(
        &self,
        state: &mut ConversationState,
        thread_id: &str,
        auth: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let calls: Vec<(String, String, serde_json::Value)> = state
            .last_message()
            .map(|m| {
                m.tool_calls()
                    .into_iter()
                    .map(|(id, name, args)| (id.to_string(), name.to_string(), args.clone()))
                    .collect()
            })
            .unwrap_or_default();

        for (id, name, args) in calls {
            self.emit(AgentEvent::ToolExecutionStart {
                tool_call_id: id.clone(),
                tool_name: name.clone(),
                arguments: args.clone(),
            });

            let ctx = ToolContext {
                state: &*state,
                thread_id,
                auth,
                cancel: cancel.clone(),
            };
            let result = self.execute_tool(&name, args, &ctx).await?;
            drop(ctx);

            self.emit(AgentEvent::ToolExecutionEnd {
                tool_call_id: id.clone(),
                tool_name: name.clone(),
                result: result.text_content(),
                is_error: result.is_error,
            });
            state.append(Message::tool_result(id, name, result.content, result.is_error));

            // Later calls in the same round must see this result's effect on
            // the scope and the search cache.
            let update = update_state(state);
            if update.processed > 0 {
                tracing::debug!(?update, "folded tool result");
            }
        }
        Ok(())
    }

    /// Run one tool call. Only fatal tool errors escape as `Err`; everything
    /// else becomes a failed result the model can react to.
    async fn execute_tool(
        &self,
        name: &str,
        args: serde_json::Value,
        ctx: &ToolContext<'_>,
    ) -> Result<ToolResult> {
        let Some(tool) = self.tools.iter().find(|t| t.name() == name) else {
            tracing::warn!(tool = name, "model called an unknown tool");
            return Ok(ToolResult::error(format!("Tool not found: {}", name)));
        };

        if let Some(err) = self
            .schema_cache
            .get(name)
            .and_then(|validator| validate_with_validator(&args, validator))
        {
            return Ok(ToolResult::error(err));
        }

        match tool.execute(args, ctx).await {
            Ok(result) => Ok(result),
            Err(e) if e.is_fatal() => Err(Error::ToolAborted {
                tool: name.to_string(),
                message: e.to_string(),
            }),
            Err(e) => {
                tracing::warn!(tool = name, "tool failed: {}", e);
                Ok(ToolResult::error(e.to_string()))
            }
        }
    }

    /// Send every non-empty text block of the last AI message through the
    /// reply tool. Nothing is added to the window.
    async fn final_answer_step(
        &self,
        state: &ConversationState,
        thread_id: &str,
        auth: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let Some(last) = state.last_message().filter(|m| m.is_ai()) else {
            return Ok(());
        };

        let ctx = ToolContext {
            state,
            thread_id,
            auth,
            cancel: cancel.clone(),
        };
        let mut sent = 0usize;

        for block in last.content() {
            let text = match block {
                Content::Text { text } if text.trim().is_empty() => continue,
                Content::Text { text } => text,
                other => {
                    tracing::warn!(
                        block = ?other,
                        "dropping final answer content that is not text"
                    );
                    continue;
                }
            };

            let reply = self
                .tools
                .iter()
                .find(|t| t.name() == names::REPLY)
                .ok_or_else(|| Error::Other("no reply tool registered".into()))?;

            sent += 1;
            let call_id = format!("final_answer_{}", sent);
            let args = json!({ "message": text });
            self.emit(AgentEvent::ToolExecutionStart {
                tool_call_id: call_id.clone(),
                tool_name: names::REPLY.to_string(),
                arguments: args.clone(),
            });

            let result = match reply.execute(args, &ctx).await {
                Ok(result) => result,
                Err(e) if e.is_fatal() => {
                    return Err(Error::ToolAborted {
                        tool: names::REPLY.to_string(),
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!("reply failed: {}", e);
                    ToolResult::error(e.to_string())
                }
            };

            self.emit(AgentEvent::ToolExecutionEnd {
                tool_call_id: call_id,
                tool_name: names::REPLY.to_string(),
                result: result.text_content(),
                is_error: result.is_error,
            });
        }
        Ok(())
    }

    /// Returns whether a summary was made
    async fn summarize_step(
        &self,
        state: &mut ConversationState,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        if !summarizer::should_summarize(state, &self.config.summarizer) {
            return Ok(false);
        }

        let message_count = state.messages().len();
        self.emit(AgentEvent::SummarizationStart { message_count });
        tracing::info!(message_count, "summarizing conversation");

        let outcome = summarizer::summarize(
            state,
            &self.config.summarizer,
            &self.config.model,
            self.transport.as_ref(),
            self.prompts.as_ref(),
            cancel.clone(),
        )
        .await?;
        let removed = outcome.removed.len();
        outcome.apply(state);

        self.emit(AgentEvent::SummarizationEnd { removed });
        Ok(true)
    }

    /// Current state of a thread, if it exists
    pub async fn state(&self, thread_id: &str) -> Result<Option<ConversationState>> {
        Ok(self.store.load(thread_id).await?.map(|cp| cp.state))
    }

    /// Forget a thread entirely. Returns whether it existed.
    pub async fn reset(&self, thread_id: &str) -> Result<bool> {
        let lock = self.thread_lock(thread_id);
        let _guard = lock.lock().await;
        let existed = self.store.delete(thread_id).await?;
        tracing::info!(thread_id = %thread_id, existed, "thread reset");
        Ok(existed)
    }

    /// Ids of every stored thread
    pub async fn threads(&self) -> Result<Vec<String>> {
        self.store.list().await
    }
}

/// Validate tool arguments using a pre-compiled validator.
/// Returns `Some(error_message)` if validation fails, `None` if valid.
fn validate_with_validator(
    args: &serde_json::Value,
    validator: &jsonschema::Validator,
) -> Option<String> {
    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "Tool argument validation failed:\n{}",
            errors.join("\n")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::links;
    use crate::store::InMemoryStore;
    use crate::testing::{ScriptedTransport, test_model};
    use crate::tool::{Tool, ToolError};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Records every call it receives and answers with a fixed result.
    struct StubTool {
        name: &'static str,
        schema: serde_json::Value,
        answer: std::result::Result<String, fn() -> ToolError>,
        calls: Arc<Mutex<Vec<serde_json::Value>>>,
        /// Scope in the state each call was handed
        scopes: Arc<Mutex<Vec<SearchScope>>>,
        delay: Option<Duration>,
    }

    impl StubTool {
        fn new(name: &'static str, answer: &str) -> Self {
            Self {
                name,
                schema: json!({"type": "object"}),
                answer: Ok(answer.to_string()),
                calls: Arc::new(Mutex::new(vec![])),
                scopes: Arc::new(Mutex::new(vec![])),
                delay: None,
            }
        }

        fn failing(name: &'static str, error: fn() -> ToolError) -> Self {
            Self {
                answer: Err(error),
                ..Self::new(name, "")
            }
        }

        fn with_schema(mut self, schema: serde_json::Value) -> Self {
            self.schema = schema;
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    #[async_trait]
    impl Tool for StubTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "stub"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            self.schema.clone()
        }

        async fn execute(
            &self,
            arguments: serde_json::Value,
            ctx: &ToolContext<'_>,
        ) -> std::result::Result<ToolResult, ToolError> {
            self.calls.lock().push(arguments);
            self.scopes.lock().push(ctx.state.search_scope);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match &self.answer {
                Ok(text) => Ok(ToolResult::text(text.clone())),
                Err(make) => Err(make()),
            }
        }
    }

    fn tool_call(id: &str, name: &str, args: serde_json::Value) -> Message {
        Message::ai(vec![Content::tool_call(id, name, args)])
    }

    struct Harness {
        graph: ChatGraph,
        transport: Arc<ScriptedTransport>,
        store: Arc<InMemoryStore>,
        replies: Arc<Mutex<Vec<serde_json::Value>>>,
    }

    fn harness(responses: Vec<Message>, extra_tools: Vec<StubTool>) -> Harness {
        harness_with(responses, extra_tools, GraphConfig::new(test_model()))
    }

    fn harness_with(
        responses: Vec<Message>,
        extra_tools: Vec<StubTool>,
        config: GraphConfig,
    ) -> Harness {
        let transport = Arc::new(ScriptedTransport::new(responses));
        let store = Arc::new(InMemoryStore::default());
        let mut graph = ChatGraph::new(config, transport.clone(), store.clone());

        let reply = StubTool::new(names::REPLY, "ok").with_schema(json!({
            "type": "object",
            "properties": {"message": {"type": "string"}},
            "required": ["message"]
        }));
        let replies = reply.calls.clone();
        let mut tools: Vec<BoxedTool> = vec![Arc::new(reply)];
        tools.extend(extra_tools.into_iter().map(|t| Arc::new(t) as BoxedTool));
        graph.set_tools(tools);

        Harness {
            graph,
            transport,
            store,
            replies,
        }
    }

    #[test]
    fn test_route() {
        assert_eq!(route(Some(&tool_call("1", "x", json!({})))), Step::Tools);
        assert_eq!(route(Some(&Message::ai_text("hi"))), Step::FinalAnswer);
        assert_eq!(route(Some(&Message::ai_empty())), Step::FinalAnswer);
        assert_eq!(route(None), Step::FinalAnswer);
    }

    #[tokio::test]
    async fn test_simple_turn_replies_and_suspends() {
        let h = harness(vec![Message::ai_text("Hello there")], vec![]);

        let outcome = h.graph.send("t1", "hi", Some("Bearer x")).await.unwrap();
        assert_eq!(outcome.steps, 3); // agent, final_answer, summarize
        assert!(!outcome.summarized);

        assert_eq!(*h.replies.lock(), vec![json!({"message": "Hello there"})]);
        let cp = h.store.load("t1").await.unwrap().unwrap();
        assert_eq!(cp.status, ThreadStatus::Suspended { resume_into: Step::Agent });
        let roles: Vec<_> = cp.state.messages().iter().map(|m| m.role()).collect();
        assert_eq!(roles, vec!["human", "ai"]);
    }

    #[tokio::test]
    async fn test_tool_round_updates_state() {
        let classify = StubTool::new(names::CLASSIFY, "PRIVATE");
        let h = harness(
            vec![
                tool_call("c1", names::CLASSIFY, json!({})),
                Message::ai_text("Searching your chats"),
            ],
            vec![classify],
        );

        let outcome = h.graph.send("t1", "search in my chats", None).await.unwrap();
        assert_eq!(outcome.search_scope, SearchScope::Private);
        // agent, tools, update_state, agent, final_answer, summarize
        assert_eq!(outcome.steps, 6);

        let state = h.graph.state("t1").await.unwrap().unwrap();
        let roles: Vec<_> = state.messages().iter().map(|m| m.role()).collect();
        assert_eq!(roles, vec!["human", "ai", "tool", "ai"]);
        assert_eq!(state.last_seen_message_id(), state.messages()[2].id());

        let second = &h.transport.requests()[1];
        assert_eq!(second.messages.last().map(|m| m.text()), Some("PRIVATE".to_string()));
        assert!(second.tool_names.contains(&names::REPLY.to_string()));
    }

    #[tokio::test]
    async fn test_tools_run_in_order_and_see_earlier_results() {
        let search = StubTool::new(names::SEARCH, r#"[{"link":"a"},{"link":"b"}]"#);
        let h = harness(
            vec![
                Message::ai(vec![
                    Content::tool_call("s1", names::SEARCH, json!({"text": "rust"})),
                    Content::tool_call("s2", names::SEARCH, json!({"text": "go"})),
                ]),
                Message::ai_text("done"),
            ],
            vec![search],
        );

        h.graph.send("t1", "find", None).await.unwrap();
        let state = h.graph.state("t1").await.unwrap().unwrap();
        let tool_ids: Vec<_> = state
            .messages()
            .iter()
            .filter_map(|m| match m {
                Message::Tool { tool_call_id, .. } => Some(tool_call_id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(tool_ids, vec!["s1", "s2"]);
        assert_eq!(links(&state.last_search_result), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_search_after_classification_in_same_round_uses_new_scope() {
        let classify = StubTool::new(names::CLASSIFY, "PRIVATE");
        let search = StubTool::new(names::SEARCH, r#"[{"link":"a"}]"#);
        let seen = search.scopes.clone();
        let h = harness(
            vec![
                Message::ai(vec![
                    Content::tool_call("c1", names::CLASSIFY, json!({})),
                    Content::tool_call("s1", names::SEARCH, json!({"text": "rust"})),
                ]),
                Message::ai_text("done"),
            ],
            vec![classify, search],
        );

        let outcome = h.graph.send("t1", "search in my chats", None).await.unwrap();
        assert_eq!(*seen.lock(), vec![SearchScope::Private]);
        assert_eq!(outcome.search_scope, SearchScope::Private);
    }

    #[tokio::test]
    async fn test_resume_continues_thread() {
        let h = harness(vec![Message::ai_text("one"), Message::ai_text("two")], vec![]);
        h.graph.send("t1", "first", None).await.unwrap();
        h.graph.send("t1", "second", None).await.unwrap();

        let state = h.graph.state("t1").await.unwrap().unwrap();
        let texts: Vec<_> = state.messages().iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["first", "one", "second", "two"]);
        assert_eq!(h.transport.requests()[1].messages.len(), 3);
    }

    #[tokio::test]
    async fn test_summary_is_given_to_the_agent() {
        let h = harness(vec![Message::ai_text("sure")], vec![]);
        let mut cp = Checkpoint::fresh("t1");
        cp.state.summary = Some("They like Rust".into());
        h.store.save(&cp).await.unwrap();

        h.graph.send("t1", "more please", None).await.unwrap();
        let request = &h.transport.requests()[0];
        assert_eq!(request.messages[0].role(), "system");
        assert_eq!(request.messages[0].text(), "Summary of conversation earlier: They like Rust");
    }

    #[tokio::test]
    async fn test_summarization_after_final_answer() {
        let mut config = GraphConfig::new(test_model());
        config.summarizer.threshold = 4;
        let search = StubTool::new(names::SEARCH, r#"[{"link":"https://chat/1"}]"#);
        let h = harness_with(
            vec![
                tool_call("s1", names::SEARCH, json!({"text": "rust"})),
                Message::ai_text("Found one"),
                Message::ai_text("A search for rust chats found one."),
            ],
            vec![search],
            config,
        );

        let mut events = h.graph.subscribe();
        let outcome = h.graph.send("t1", "find rust", None).await.unwrap();
        assert!(outcome.summarized);

        let state = h.graph.state("t1").await.unwrap().unwrap();
        assert_eq!(state.summary.as_deref(), Some("A search for rust chats found one."));
        assert!(state.messages().is_empty());
        assert_eq!(links(&state.last_search_result), vec!["https://chat/1"]);

        let mut saw_end = false;
        while let Ok(event) = events.try_recv() {
            if let AgentEvent::SummarizationEnd { removed } = event {
                assert_eq!(removed, 4);
                saw_end = true;
            }
        }
        assert!(saw_end);
    }

    #[tokio::test]
    async fn test_recursion_limit_rolls_back() {
        let mut config = GraphConfig::new(test_model());
        config.max_steps = 4;
        let responses = (0..10)
            .map(|i| tool_call(&format!("c{i}"), names::CLASSIFY, json!({})))
            .collect();
        let h = harness_with(responses, vec![StubTool::new(names::CLASSIFY, "PUBLIC")], config);

        let err = h.graph.send("t1", "loop", None).await.unwrap_err();
        assert!(matches!(err, Error::RecursionLimit(4)));
        assert!(h.store.load("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fatal_tool_error_rolls_back_to_previous_checkpoint() {
        let backend_down = StubTool::failing(names::SEARCH, || ToolError::Backend("503".into()));
        let h = harness(
            vec![
                Message::ai_text("hello"),
                tool_call("s1", names::SEARCH, json!({"text": "rust"})),
            ],
            vec![backend_down],
        );
        h.graph.send("t1", "hi", None).await.unwrap();
        let mut events = h.graph.subscribe();

        let err = h.graph.send("t1", "find rust", None).await.unwrap_err();
        assert!(matches!(err, Error::ToolAborted { ref tool, .. } if tool == names::SEARCH));

        let state = h.graph.state("t1").await.unwrap().unwrap();
        assert_eq!(state.messages().len(), 2);

        let mut saw_error = false;
        while let Ok(event) = events.try_recv() {
            saw_error |= matches!(event, AgentEvent::Error { .. });
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn test_non_fatal_tool_error_becomes_failed_result() {
        let forward =
            StubTool::failing(names::FORWARD, || ToolError::Failed("nothing to forward".into()));
        let h = harness(
            vec![
                tool_call("f1", names::FORWARD, json!({"comment": "here"})),
                Message::ai_text("Sorry, search first"),
            ],
            vec![forward],
        );

        h.graph.send("t1", "forward", None).await.unwrap();
        let state = h.graph.state("t1").await.unwrap().unwrap();
        let result = &state.messages()[2];
        assert!(matches!(result, Message::Tool { is_error: true, .. }));
        assert_eq!(result.text(), "nothing to forward");
    }

    #[tokio::test]
    async fn test_unknown_tool_and_invalid_arguments() {
        let search = StubTool::new(names::SEARCH, "[]").with_schema(json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        }));
        let search_calls = search.calls.clone();
        let h = harness(
            vec![
                Message::ai(vec![
                    Content::tool_call("x1", "delete_everything", json!({})),
                    Content::tool_call("s1", names::SEARCH, json!({"query": 1})),
                ]),
                Message::ai_text("ok"),
            ],
            vec![search],
        );

        h.graph.send("t1", "go", None).await.unwrap();
        let state = h.graph.state("t1").await.unwrap().unwrap();
        let results: Vec<_> = state.messages().iter().filter(|m| m.tool_name().is_some()).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].text().contains("Tool not found"));
        assert!(results[1].text().contains("validation failed"));
        assert!(search_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_final_answer_sends_each_text_block_and_drops_others() {
        let h = harness(
            vec![Message::ai(vec![
                Content::text("First"),
                Content::Unsupported { kind: "thinking".into() },
                Content::text("   "),
                Content::text("Second"),
            ])],
            vec![],
        );

        h.graph.send("t1", "hi", None).await.unwrap();
        assert_eq!(
            *h.replies.lock(),
            vec![json!({"message": "First"}), json!({"message": "Second"})]
        );
        let state = h.graph.state("t1").await.unwrap().unwrap();
        assert_eq!(state.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_response_is_retracted_next_turn() {
        let h = harness(vec![Message::ai_empty(), Message::ai_text("there you are")], vec![]);
        h.graph.send("t1", "hi", None).await.unwrap();
        assert!(h.replies.lock().is_empty());

        h.graph.send("t1", "hello?", None).await.unwrap();
        let state = h.graph.state("t1").await.unwrap().unwrap();
        let roles: Vec<_> = state.messages().iter().map(|m| m.role()).collect();
        assert_eq!(roles, vec!["human", "human", "ai"]);
    }

    #[tokio::test]
    async fn test_model_error_propagates_without_saving() {
        let transport = Arc::new(ScriptedTransport::failing("overloaded_error"));
        let store = Arc::new(InMemoryStore::default());
        let graph = ChatGraph::new(GraphConfig::new(test_model()), transport, store.clone());

        let err = graph.send("t1", "hi", None).await.unwrap_err();
        assert!(matches!(err, Error::Model(_)));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_turn_fails() {
        let h = harness(vec![Message::ai_text("never")], vec![]);
        h.graph.cancel_token().cancel();
        let err = h.graph.send("t1", "hi", None).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(h.transport.calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_same_thread_turns_are_serialized() {
        let slow = StubTool::new(names::SEARCH, "[]").with_delay(Duration::from_millis(50));
        let h = harness(
            vec![
                tool_call("s1", names::SEARCH, json!({"text": "a"})),
                Message::ai_text("first done"),
                Message::ai_text("second done"),
            ],
            vec![slow],
        );
        let graph = Arc::new(h.graph);

        let a = {
            let graph = graph.clone();
            tokio::spawn(async move { graph.send("t1", "one", None).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let b = {
            let graph = graph.clone();
            tokio::spawn(async move { graph.send("t1", "two", None).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let state = graph.state("t1").await.unwrap().unwrap();
        let texts: Vec<_> = state.messages().iter().map(|m| m.text()).collect();
        assert_eq!(texts.first().map(String::as_str), Some("one"));
        assert_eq!(texts.last().map(String::as_str), Some("second done"));
        assert_eq!(state.messages().len(), 6);
    }

    #[tokio::test]
    async fn test_reset_and_threads() {
        let h = harness(vec![], vec![]);
        h.graph.send("a", "hi", None).await.unwrap();
        h.graph.send("b", "hi", None).await.unwrap();
        assert_eq!(h.graph.threads().await.unwrap(), vec!["a", "b"]);

        assert!(h.graph.reset("a").await.unwrap());
        assert!(!h.graph.reset("a").await.unwrap());
        assert_eq!(h.graph.threads().await.unwrap(), vec!["b"]);
    }

    #[test]
    fn test_validate_args_reports_missing_field() {
        let schema = json!({
            "type": "object",
            "properties": {"message": {"type": "string"}},
            "required": ["message"]
        });
        let validator = jsonschema::validator_for(&schema).unwrap();
        assert!(validate_with_validator(&json!({"message": "hi"}), &validator).is_none());
        let err = validate_with_validator(&json!({}), &validator).unwrap();
        assert!(err.contains("message"), "{err}");
    }
}
