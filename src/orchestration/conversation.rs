use super::access::{check_access, CallerInfo};
use super::error::ChatError;
use super::hooks::{spawn_hooks, HookDispatch};
use super::prompt::build_system_prompt;
use crate::executor::{NodeExecutor, ToolResult};
use crate::provider::{
    truncate_chars, ChatMessage, ChatProvider, CompletionRequest, ProviderError, ProviderTurn,
    ToolCall, ERROR_CONTEXT_LIMIT,
};
use crate::resolve::ExecutionContext;
use crate::secrets::{resolve_credentials, AgentKeyConfig, Credentials, RequestSecrets};
use crate::shared::{generate_id, now_millis, EventLog};
use crate::store::{ErrorLogEntry, FlowKey, FlowStore, KnowledgeFile};
use crate::tools::{build_tools, to_openai_tools, ToolSet};
use crate::workflow::WorkflowNode;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

pub const MAX_TOOL_ITERATIONS: usize = 5;
pub const MAX_HISTORY_TURNS: usize = 20;
pub const TOOL_RESULT_LIMIT: usize = 8000;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const LOOP_EXHAUSTED_REPLY: &str = "I couldn't finish that request after several tool attempts. \
Please try again or rephrase your message.";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HistoryTurn {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: Value,
}

/// One chat turn as received from the widget.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub flow: String,
    /// Widget display mode, exposed to tools and hooks as `{{mode}}`.
    pub mode: Option<String>,
    pub message: String,
    pub history: Vec<HistoryTurn>,
    pub session_id: Option<String>,
    pub origin: Option<String>,
    pub referer: Option<String>,
    pub api_key: Option<String>,
}

impl ChatRequest {
    fn caller(&self) -> CallerInfo<'_> {
        CallerInfo {
            origin: self.origin.as_deref(),
            referer: self.referer.as_deref(),
            api_key: self.api_key.as_deref(),
        }
    }
}

#[derive(Debug)]
pub struct ChatOutcome {
    pub flow_id: String,
    pub reply: String,
    pub provider_calls: usize,
    pub tool_calls: usize,
    /// The loop hit its cap before the model produced a final text reply.
    pub exhausted: bool,
    pub hooks: HookDispatch,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatSettings {
    pub temperature: f64,
    pub fallback_key_env_vars: Vec<String>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            fallback_key_env_vars: Vec::new(),
        }
    }
}

/// Keeps user and assistant turns with text, newest `MAX_HISTORY_TURNS` only.
pub fn sanitize_history(history: &[HistoryTurn]) -> Vec<ChatMessage> {
    let kept = history
        .iter()
        .filter_map(|turn| {
            let content = turn.content.as_str()?.trim();
            if content.is_empty() {
                return None;
            }
            match turn.role.trim() {
                "user" => Some(ChatMessage::User(content.to_string())),
                "assistant" => Some(ChatMessage::assistant(content)),
                _ => None,
            }
        })
        .collect::<Vec<_>>();
    let skip = kept.len().saturating_sub(MAX_HISTORY_TURNS);
    kept.into_iter().skip(skip).collect()
}

fn agent_temperature(agent: &WorkflowNode, default: f64) -> f64 {
    let configured = match agent.inputs.get("temperature") {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    configured
        .filter(|value| (0.0..=2.0).contains(value))
        .unwrap_or(default)
}

fn transcript(messages: &[ChatMessage], reply: &str) -> Value {
    let mut turns = messages
        .iter()
        .filter(|message| matches!(message, ChatMessage::User(_) | ChatMessage::Assistant { .. }))
        .filter(|message| !message.text().is_empty())
        .map(|message| json!({"role": message.role(), "content": message.text()}))
        .collect::<Vec<_>>();
    turns.push(json!({"role": "assistant", "content": reply}));
    Value::Array(turns)
}

pub(crate) fn tool_result_message(call: &ToolCall, result: &ToolResult) -> ChatMessage {
    let content = serde_json::to_string(result).unwrap_or_else(|err| {
        json!({"success": false, "error": format!("unserializable tool result: {err}")}).to_string()
    });
    ChatMessage::Tool {
        call_id: call.id.clone(),
        name: call.name.clone(),
        content: truncate_chars(&content, TOOL_RESULT_LIMIT),
    }
}

/// Drives one chat turn: access checks, prompt assembly, the bounded tool
/// loop and post-response hooks.
pub struct ChatOrchestrator {
    store: Arc<dyn FlowStore>,
    provider: Arc<dyn ChatProvider>,
    executor: Arc<NodeExecutor>,
    log: EventLog,
    settings: ChatSettings,
}

impl ChatOrchestrator {
    pub fn new(
        store: Arc<dyn FlowStore>,
        provider: Arc<dyn ChatProvider>,
        executor: Arc<NodeExecutor>,
        log: EventLog,
        settings: ChatSettings,
    ) -> Self {
        Self {
            store,
            provider,
            executor,
            log,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn FlowStore> {
        &self.store
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn handle(&self, request: &ChatRequest) -> Result<ChatOutcome, ChatError> {
        let message = request.message.trim();
        if message.is_empty() {
            return Err(ChatError::MissingMessage);
        }
        let key = FlowKey::parse(&request.flow).ok_or(ChatError::MissingFlow)?;

        let project = self
            .store
            .find_flow(&key)?
            .ok_or(ChatError::FlowNotActive)?;
        check_access(&project, request.caller())?;
        let flow_id = project.id.as_str();

        let snapshot = self
            .store
            .load_snapshot(flow_id, key.snapshot_preference())?
            .ok_or(ChatError::NoFlowData)?;
        let graph = snapshot.graph;
        let agent = graph.agent_node().ok_or(ChatError::NoAgentNode)?;

        let hook_ids = agent
            .input_id_list("postResponseHooks")
            .into_iter()
            .collect::<HashSet<_>>();
        let downstream = graph.downstream_nodes(&agent.id);
        let tools = build_tools(&downstream, &hook_ids);
        for dropped in &tools.dropped {
            self.log.warn(
                "tools.name_collision",
                Some(flow_id),
                &format!("node `{dropped}` skipped: no unique tool name"),
            );
        }
        let hooks = downstream
            .iter()
            .filter(|node| hook_ids.contains(&node.id))
            .map(|node| (*node).clone())
            .collect::<Vec<_>>();

        let secrets = RequestSecrets::new(self.store.as_ref(), flow_id, &self.log);
        let credentials = resolve_credentials(
            &AgentKeyConfig::from_node(agent),
            &secrets.get(),
            &self.settings.fallback_key_env_vars,
            |name| std::env::var(name).ok(),
        )
        .ok_or(ChatError::MissingApiKey)?;

        let knowledge = self.load_knowledge(flow_id, agent);
        let system_prompt =
            build_system_prompt(agent.input_str("systemPrompt"), &knowledge, &tools.tools);

        let mut messages = vec![ChatMessage::System(system_prompt)];
        messages.extend(sanitize_history(&request.history));
        messages.push(ChatMessage::User(message.to_string()));

        let session_id = request.session_id.clone().unwrap_or_default();
        let mode = request.mode.clone().unwrap_or_default();
        let mut context = ExecutionContext::new()
            .with("flowId", Value::from(flow_id))
            .with("executionId", Value::from(generate_id("exec", now_millis())))
            .with("message", Value::from(message))
            .with("sessionId", Value::from(session_id.clone()))
            .with("mode", Value::from(mode.clone()))
            .with(
                "chatContext",
                json!({"message": message, "sessionId": session_id, "mode": mode}),
            );
        if !tools.is_empty() || !hooks.is_empty() {
            context.insert("env", Value::Object(secrets.get().as_ref().clone()));
        }

        let mut completion = CompletionRequest {
            provider: credentials.provider,
            api_key: credentials.api_key.clone(),
            model: credentials.model.clone(),
            messages,
            tools: to_openai_tools(&tools.tools),
            temperature: agent_temperature(agent, self.settings.temperature),
        };
        let run = self.run_tool_loop(flow_id, &credentials, &tools, &mut completion, &mut context)?;

        let reply = if run.exhausted && run.reply.trim().is_empty() {
            LOOP_EXHAUSTED_REPLY.to_string()
        } else {
            run.reply
        };
        if run.exhausted {
            self.log.warn(
                "chat.tool_loop_exhausted",
                Some(flow_id),
                &format!("no final reply after {MAX_TOOL_ITERATIONS} provider calls"),
            );
            let entry = ErrorLogEntry::error(
                Some(flow_id),
                "Tool loop exhausted without a final reply",
                json!({"maxIterations": MAX_TOOL_ITERATIONS, "toolCalls": run.tool_calls}),
            )
            .with_node(&agent.id)
            .with_level("warn");
            let _ = self.store.log_error(&entry);
        }

        let transcript = transcript(&completion.messages, &reply);
        context
            .insert("reply", Value::from(reply.clone()))
            .insert("transcript", transcript.clone())
            .insert(
                "chatContext",
                json!({
                    "message": message,
                    "reply": reply,
                    "sessionId": session_id,
                    "mode": mode,
                    "transcript": transcript,
                }),
            );
        let hooks = spawn_hooks(
            Arc::clone(&self.executor),
            Arc::clone(&self.store),
            self.log.clone(),
            flow_id,
            hooks,
            context,
        );

        self.log.info(
            "chat.completed",
            &format!(
                "flow `{flow_id}` replied after {} provider calls and {} tool calls",
                run.provider_calls, run.tool_calls
            ),
        );
        Ok(ChatOutcome {
            flow_id: flow_id.to_string(),
            reply,
            provider_calls: run.provider_calls,
            tool_calls: run.tool_calls,
            exhausted: run.exhausted,
            hooks,
        })
    }

    fn load_knowledge(&self, flow_id: &str, agent: &WorkflowNode) -> Vec<KnowledgeFile> {
        let mut files = Vec::new();
        for file_id in agent.input_id_list("knowledgeBase") {
            match self.store.load_knowledge_file(&file_id) {
                Ok(Some(file)) => files.push(file),
                Ok(None) => self.log.warn(
                    "knowledge.missing",
                    Some(flow_id),
                    &format!("knowledge file `{file_id}` not found"),
                ),
                Err(err) => self.log.warn(
                    "knowledge.load_failed",
                    Some(flow_id),
                    &format!("knowledge file `{file_id}`: {err}"),
                ),
            }
        }
        files
    }

    fn run_tool_loop(
        &self,
        flow_id: &str,
        credentials: &Credentials,
        tools: &ToolSet,
        completion: &mut CompletionRequest,
        context: &mut ExecutionContext,
    ) -> Result<LoopRun, ChatError> {
        let mut run = LoopRun {
            exhausted: true,
            ..LoopRun::default()
        };
        while run.provider_calls < MAX_TOOL_ITERATIONS {
            run.provider_calls += 1;
            let turn = self.provider.complete(completion).map_err(|err| {
                self.record_provider_failure(flow_id, credentials, &err);
                ChatError::from(err)
            })?;

            let (text, calls) = match turn {
                ProviderTurn::Text(text) => {
                    run.reply = text;
                    run.exhausted = false;
                    break;
                }
                ProviderTurn::ToolCalls { text, calls } => (text, calls),
            };
            if !text.trim().is_empty() {
                run.reply = text.clone();
            }
            completion.messages.push(ChatMessage::Assistant {
                content: text,
                tool_calls: calls.clone(),
            });
            for call in &calls {
                run.tool_calls += 1;
                let result = self.invoke_tool(flow_id, tools, call, context);
                completion.messages.push(tool_result_message(call, &result));
            }
        }
        Ok(run)
    }

    fn invoke_tool(
        &self,
        flow_id: &str,
        tools: &ToolSet,
        call: &ToolCall,
        context: &mut ExecutionContext,
    ) -> ToolResult {
        let Some(node) = tools.node_for(&call.name) else {
            return ToolResult::failure(format!("Unknown tool `{}`", call.name));
        };
        let result = self.executor.run_node(node, &call.arguments, context);
        if result.success {
            if let Some(output) = &result.output {
                context.insert(&node.id, output.clone());
            }
        } else {
            self.log.warn(
                "tool.failed",
                Some(flow_id),
                &format!(
                    "tool `{}` (node `{}`): {}",
                    call.name,
                    node.id,
                    result.error.as_deref().unwrap_or("unknown error")
                ),
            );
        }
        result
    }

    fn record_provider_failure(
        &self,
        flow_id: &str,
        credentials: &Credentials,
        err: &ProviderError,
    ) {
        self.log.error("provider.failed", Some(flow_id), &err.to_string());
        let mut metadata = Map::new();
        metadata.insert("provider".to_string(), Value::from(err.provider().as_str()));
        metadata.insert("model".to_string(), Value::from(credentials.model.clone()));
        match err {
            ProviderError::Status {
                status,
                body,
                request,
                ..
            } => {
                metadata.insert("status".to_string(), Value::from(*status));
                metadata.insert(
                    "response".to_string(),
                    Value::from(truncate_chars(body, ERROR_CONTEXT_LIMIT)),
                );
                metadata.insert(
                    "request".to_string(),
                    Value::from(truncate_chars(request, ERROR_CONTEXT_LIMIT)),
                );
            }
            other => {
                metadata.insert("reason".to_string(), Value::from(other.to_string()));
            }
        }
        let entry =
            ErrorLogEntry::error(Some(flow_id), "AI provider error", Value::Object(metadata));
        let _ = self.store.log_error(&entry);
    }
}

#[derive(Debug, Default)]
struct LoopRun {
    reply: String,
    provider_calls: usize,
    tool_calls: usize,
    exhausted: bool,
}
