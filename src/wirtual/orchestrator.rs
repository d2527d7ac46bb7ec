//! Two-model supervisory loop.
//!
//! A planning model breaks the user's request into a sub-task, the agent loop executes
//! it, and the planner reads the agent's last message to decide whether another
//! sub-task is needed. The planner ends the run by answering with `FINAL RESPONSE`.
//!
//! ```text
//! PLAN ──▶ EXECUTE ──▶ DECIDE ──▶ DONE
//!             ▲           │
//!             └───────────┘  (next sub-task, up to max_subtasks)
//!   any agent failure ──▶ FAILED      budget spent ──▶ EXHAUSTED
//! ```
//!
//! Every step is reported to a chunk sink as an event-stream line.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::wirtual::agent_loop::AgentLoop;
use crate::wirtual::config::PlannerConfig;
use crate::wirtual::http_client_pool::get_or_create_client;
use crate::wirtual::relay::{drive_agent, sse_chunk};
use crate::wirtual::session_state::SessionState;

pub const PLAN_INSTRUCTION: &str = "Break down the user's input into actionable steps.";
pub const DECIDE_INSTRUCTION: &str = "Based on the response, determine if more action is needed. If yes, provide the next prompt. If no, state 'FINAL RESPONSE'.";
pub const FINAL_RESPONSE_SENTINEL: &str = "FINAL RESPONSE";

pub const PLAN_MAX_TOKENS: u32 = 500;
pub const DECIDE_MAX_TOKENS: u32 = 200;

#[derive(Debug)]
pub enum PlannerError {
    Http(String),
    Api { status: u16, body: String },
    /// The planner answered without any text.
    EmptyReply,
}

impl fmt::Display for PlannerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlannerError::Http(msg) => write!(f, "HTTP error: {}", msg),
            PlannerError::Api { status, body } => write!(f, "API error {}: {}", status, body),
            PlannerError::EmptyReply => write!(f, "planner returned an empty reply"),
        }
    }
}

impl Error for PlannerError {}

impl From<reqwest::Error> for PlannerError {
    fn from(err: reqwest::Error) -> Self {
        PlannerError::Http(err.to_string())
    }
}

/// A chat model that answers one system + user exchange.
#[async_trait]
pub trait PlannerClient: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, PlannerError>;
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Planner backed by an OpenAI-compatible chat completions endpoint.
pub struct OpenAIPlanner {
    config: PlannerConfig,
}

impl OpenAIPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PlannerClient for OpenAIPlanner {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, PlannerError> {
        let base_url = self.config.base_url.trim_end_matches('/');
        let client = get_or_create_client(base_url)?;
        let body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "max_tokens": max_tokens,
        });

        let response = client
            .post(format!("{}/v1/chat/completions", base_url))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PlannerError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let completion: ChatCompletion = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or(PlannerError::EmptyReply)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrchestrationPhase {
    Plan,
    Execute,
    Decide,
    Done,
    Failed,
    Exhausted,
}

impl OrchestrationPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrchestrationPhase::Done | OrchestrationPhase::Failed | OrchestrationPhase::Exhausted
        )
    }
}

/// One line of the orchestration transcript.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub role: String,
    pub content: String,
}

impl LogEntry {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug)]
pub struct OrchestratorOutcome {
    /// Terminal phase reached.
    pub phase: OrchestrationPhase,
    /// Sub-tasks handed to the agent loop.
    pub subtasks: usize,
    pub conversation: Vec<LogEntry>,
}

/// True when a planner reply asks to end the run.
pub fn is_final_response(reply: &str) -> bool {
    reply.to_uppercase().contains(FINAL_RESPONSE_SENTINEL)
}

pub struct Orchestrator {
    agent: Arc<dyn AgentLoop>,
    planner: Arc<dyn PlannerClient>,
    max_subtasks: usize,
}

impl Orchestrator {
    pub fn new(
        agent: Arc<dyn AgentLoop>,
        planner: Arc<dyn PlannerClient>,
        max_subtasks: usize,
    ) -> Self {
        Self {
            agent,
            planner,
            max_subtasks,
        }
    }

    /// Drive the supervisory loop for `user_input`, using `state` for every sub-task.
    pub async fn run(
        &self,
        user_input: &str,
        mut state: SessionState,
        sink: &UnboundedSender<String>,
    ) -> OrchestratorOutcome {
        let run_id = Uuid::new_v4();
        let emit = |text: String| {
            if sink.send(sse_chunk(text)).is_err() {
                log::debug!("[{}] stream receiver dropped", run_id);
            }
        };
        let mut conversation = Vec::new();
        let mut subtasks = 0;

        log::info!("[{}] planning: {}", run_id, user_input);
        let mut prompt = match self
            .planner
            .complete(PLAN_INSTRUCTION, user_input, PLAN_MAX_TOKENS)
            .await
        {
            Ok(reply) => reply.trim().to_string(),
            Err(e) => {
                return self.abort(run_id, &emit, conversation, subtasks, format!("Error: {}", e));
            }
        };
        conversation.push(LogEntry::new("OpenAI", prompt.clone()));
        emit(format!("OpenAI Processed Input:\n{}", prompt));

        loop {
            if subtasks >= self.max_subtasks {
                let message = format!("Error: sub-task budget of {} exhausted", self.max_subtasks);
                log::warn!("[{}] {}", run_id, message);
                conversation.push(LogEntry::new("System", message.clone()));
                emit(message);
                log_conversation(run_id, &conversation);
                return OrchestratorOutcome {
                    phase: OrchestrationPhase::Exhausted,
                    subtasks,
                    conversation,
                };
            }

            subtasks += 1;
            log::info!("[{}] executing sub-task {}", run_id, subtasks);
            state.push_user_text(prompt.clone());

            let mut last_message = String::new();
            let result = drive_agent(self.agent.as_ref(), &mut state, |content| {
                let text = content.to_string();
                log::info!("[{}] agent: {}", run_id, text);
                conversation.push(LogEntry::new("Anthropic", text.clone()));
                emit(format!("Anthropic Response: {}", text));
                last_message = text;
            })
            .await;

            if let Err(e) = result {
                let message = format!("Error from Anthropic: {}", e);
                log::error!("[{}] {}", run_id, message);
                conversation.push(LogEntry::new("Anthropic", message.clone()));
                emit(message);
                log_conversation(run_id, &conversation);
                return OrchestratorOutcome {
                    phase: OrchestrationPhase::Failed,
                    subtasks,
                    conversation,
                };
            }

            let followup = match self
                .planner
                .complete(
                    DECIDE_INSTRUCTION,
                    &format!("Anthropic response:\n{}", last_message),
                    DECIDE_MAX_TOKENS,
                )
                .await
            {
                Ok(reply) => reply.trim().to_string(),
                Err(e) => {
                    return self.abort(run_id, &emit, conversation, subtasks, format!("Error: {}", e));
                }
            };
            conversation.push(LogEntry::new("OpenAI", followup.clone()));
            emit(format!("OpenAI Follow-Up:\n{}", followup));
            log_conversation(run_id, &conversation);

            if is_final_response(&followup) {
                log::info!("[{}] planner closed the conversation", run_id);
                emit("Conversation closed by OpenAI.".to_string());
                return OrchestratorOutcome {
                    phase: OrchestrationPhase::Done,
                    subtasks,
                    conversation,
                };
            }
            prompt = followup;
        }
    }

    fn abort(
        &self,
        run_id: Uuid,
        emit: &dyn Fn(String),
        mut conversation: Vec<LogEntry>,
        subtasks: usize,
        message: String,
    ) -> OrchestratorOutcome {
        log::error!("[{}] {}", run_id, message);
        conversation.push(LogEntry::new("System", message.clone()));
        log_conversation(run_id, &conversation);
        emit(message);
        OrchestratorOutcome {
            phase: OrchestrationPhase::Failed,
            subtasks,
            conversation,
        }
    }
}

fn log_conversation(run_id: Uuid, conversation: &[LogEntry]) {
    let record: Value = json!({
        "run": run_id.to_string(),
        "timestamp": chrono::Local::now().to_rfc3339(),
        "conversation": conversation,
    });
    match serde_json::to_string_pretty(&record) {
        Ok(text) => log::info!("{}", text),
        Err(e) => log::warn!("could not serialise conversation log: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_is_case_insensitive_substring() {
        assert!(is_final_response("FINAL RESPONSE"));
        assert!(is_final_response("All done. Final Response."));
        assert!(is_final_response("final response: nothing left"));
        assert!(!is_final_response("Final answer is coming"));
        assert!(!is_final_response("FINAL_RESPONSE"));
    }

    #[test]
    fn test_terminal_phases() {
        assert!(OrchestrationPhase::Done.is_terminal());
        assert!(OrchestrationPhase::Exhausted.is_terminal());
        assert!(!OrchestrationPhase::Decide.is_terminal());
        assert_eq!(
            serde_json::to_value(OrchestrationPhase::Exhausted).unwrap(),
            "EXHAUSTED"
        );
    }
}
