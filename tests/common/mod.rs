#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;

use wirtual::agent_loop::{AgentLoop, LoopError, LoopObserver, SamplingRequest};
use wirtual::message::{Content, Message, Sender, ToolResult};
use wirtual::orchestrator::{PlannerClient, PlannerError};

/// One scripted agent-loop run.
#[derive(Clone, Default)]
pub struct Round {
    pub items: Vec<Content>,
    pub tool_outputs: Vec<(String, ToolResult)>,
    pub fail_with: Option<String>,
}

impl Round {
    pub fn say(texts: &[&str]) -> Self {
        Self {
            items: texts.iter().map(|t| Content::text(*t)).collect(),
            ..Self::default()
        }
    }

    pub fn failing(texts: &[&str], error: &str) -> Self {
        Self {
            fail_with: Some(error.to_string()),
            ..Self::say(texts)
        }
    }
}

/// Agent loop that replays scripted rounds in order and records every request.
#[derive(Clone, Default)]
pub struct ScriptedAgent {
    rounds: Arc<Mutex<VecDeque<Round>>>,
    pub requests: Arc<Mutex<Vec<SamplingRequest>>>,
}

impl ScriptedAgent {
    pub fn new(rounds: Vec<Round>) -> Self {
        Self {
            rounds: Arc::new(Mutex::new(rounds.into())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn calls(&self) -> usize {
        self.requests.lock().await.len()
    }
}

#[async_trait]
impl AgentLoop for ScriptedAgent {
    async fn sample(
        &self,
        request: SamplingRequest,
        observer: &dyn LoopObserver,
        tx: &UnboundedSender<Content>,
    ) -> Result<Vec<Message>, LoopError> {
        self.requests.lock().await.push(request.clone());
        let round = self.rounds.lock().await.pop_front().unwrap_or_default();

        for item in &round.items {
            observer.on_output(item);
            tx.send(item.clone()).map_err(|_| LoopError::ChannelClosed)?;
        }
        for (id, result) in &round.tool_outputs {
            observer.on_tool_output(result, id);
        }
        observer.on_api_response(&serde_json::json!({"scripted": true}));

        if let Some(error) = round.fail_with {
            return Err(LoopError::Http(error));
        }
        let mut messages = request.messages;
        messages.push(Message::new(Sender::Assistant, round.items));
        Ok(messages)
    }
}

/// Planner that replays scripted replies; `Err` entries become HTTP errors.
#[derive(Clone, Default)]
pub struct ScriptedPlanner {
    replies: Arc<Mutex<VecDeque<Result<String, String>>>>,
    /// Fallback once the script runs out.
    repeat: Option<String>,
    pub prompts: Arc<Mutex<Vec<(String, String, u32)>>>,
}

impl ScriptedPlanner {
    pub fn new(replies: Vec<Result<&str, &str>>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(
                replies
                    .into_iter()
                    .map(|r| r.map(str::to_string).map_err(str::to_string))
                    .collect(),
            )),
            repeat: None,
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn always(reply: &str) -> Self {
        Self {
            repeat: Some(reply.to_string()),
            ..Self::new(Vec::new())
        }
    }
}

#[async_trait]
impl PlannerClient for ScriptedPlanner {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, PlannerError> {
        self.prompts
            .lock()
            .await
            .push((system.to_string(), user.to_string(), max_tokens));
        match self.replies.lock().await.pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(e)) => Err(PlannerError::Http(e)),
            None => self.repeat.clone().ok_or(PlannerError::EmptyReply),
        }
    }
}

/// Collect every chunk the sink received once all senders are gone.
pub async fn drain(mut rx: tokio::sync::mpsc::UnboundedReceiver<String>) -> Vec<String> {
    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        chunks.push(chunk);
    }
    chunks
}
