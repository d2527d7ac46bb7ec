//! The agent loop contract.
//!
//! An [`AgentLoop`] takes the whole conversation, talks to the model, executes the tool
//! invocations it asks for and feeds the results back, until the model answers without
//! requesting a tool or something fails. Every content item it produces is pushed down
//! the `tx` channel as it happens; that channel is the lazy sequence relays consume.
//!
//! Independently of the channel, a [`LoopObserver`] hears about three kinds of events:
//! assistant output, tool output and raw provider responses. Relays use the observer to
//! keep the session state current and the channel to stream.
//!
//! ```text
//! relay ──SamplingRequest──▶ AgentLoop::sample ──▶ provider API
//!   ▲                              │   ▲
//!   │ Content (tx)                 │   └── ToolResult ◀── ToolCollection
//!   └──────────────────────────────┤
//!        LoopObserver callbacks ◀──┘
//! ```

use std::error::Error;
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc::UnboundedSender;

use crate::wirtual::message::{Content, Message, Sender, ToolResult};
use crate::wirtual::provider::ApiProvider;
use crate::wirtual::renderer::{render, Rendered};
use crate::wirtual::screens::ScreenGeometry;
use crate::wirtual::session_state::SessionState;

/// Everything one agent-loop run needs, passed by value.
#[derive(Clone, Debug)]
pub struct SamplingRequest {
    pub system_prompt_suffix: String,
    pub model: String,
    pub provider: ApiProvider,
    pub messages: Vec<Message>,
    pub api_key: Option<String>,
    pub only_n_most_recent_images: usize,
    /// Display the computer tool should act on.
    pub selected_screen: Option<ScreenGeometry>,
}

impl SamplingRequest {
    /// Snapshot the parts of `state` the loop reads.
    pub fn from_state(state: &SessionState) -> Self {
        Self {
            system_prompt_suffix: state.custom_system_prompt.clone(),
            model: state.model.clone(),
            provider: state.provider,
            messages: state.messages.clone(),
            api_key: state.api_key.clone(),
            only_n_most_recent_images: state.only_n_most_recent_images,
            selected_screen: state.selected_screen.clone(),
        }
    }
}

/// Errors that end an agent-loop run early.
#[derive(Debug)]
pub enum LoopError {
    /// No credential was supplied for a provider that needs one.
    MissingApiKey,
    /// The configured provider cannot be driven by this loop.
    UnsupportedProvider(ApiProvider),
    /// Transport failure talking to the provider.
    Http(String),
    /// The provider answered with a non-success status.
    Api { status: u16, body: String },
    /// The provider's answer could not be understood.
    Decode(String),
    /// A tool failed in a way that cannot be reported back to the model.
    Tool(String),
    /// The receiving side of the output channel went away.
    ChannelClosed,
}

impl fmt::Display for LoopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopError::MissingApiKey => write!(
                f,
                "API key is missing. Please set it in the environment or storage."
            ),
            LoopError::UnsupportedProvider(p) => {
                write!(f, "Provider '{}' is not supported by this agent loop", p)
            }
            LoopError::Http(msg) => write!(f, "HTTP error: {}", msg),
            LoopError::Api { status, body } => write!(f, "API error {}: {}", status, body),
            LoopError::Decode(msg) => write!(f, "Failed to decode response: {}", msg),
            LoopError::Tool(msg) => write!(f, "Tool failure: {}", msg),
            LoopError::ChannelClosed => write!(f, "Output channel closed"),
        }
    }
}

impl Error for LoopError {}

impl From<reqwest::Error> for LoopError {
    fn from(err: reqwest::Error) -> Self {
        LoopError::Http(err.to_string())
    }
}

/// Side-channel hooks fired as the loop progresses.
///
/// All methods default to no-ops.
pub trait LoopObserver: Send + Sync {
    /// Assistant text or a tool invocation was produced.
    fn on_output(&self, _content: &Content) {}

    /// A tool finished; `tool_id` is the invocation id it answers.
    fn on_tool_output(&self, _result: &ToolResult, _tool_id: &str) {}

    /// The provider returned a raw response.
    fn on_api_response(&self, _response: &serde_json::Value) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl LoopObserver for NoopObserver {}

/// Observer that buffers what the loop reports until it is merged into a
/// [`SessionState`].
///
/// Raw responses are stamped when they arrive, so their session keys reflect creation
/// time however late the merge happens. Assistant and tool output is passed through
/// [`render`] into the session transcript.
#[derive(Default)]
pub struct SessionRecorder {
    hide_images: bool,
    tool_outputs: Mutex<Vec<(String, ToolResult)>>,
    responses: Mutex<Vec<(DateTime<Utc>, serde_json::Value)>>,
    transcript: Mutex<Vec<(Sender, Rendered)>>,
}

fn take<T>(buffer: &Mutex<Vec<T>>) -> Vec<T> {
    std::mem::take(&mut *buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
}

fn push<T>(buffer: &Mutex<Vec<T>>, item: T) {
    buffer
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .push(item);
}

impl SessionRecorder {
    /// A recorder that renders with `state`'s image visibility.
    pub fn for_session(state: &SessionState) -> Self {
        Self {
            hide_images: state.hide_images,
            ..Self::default()
        }
    }

    /// Move everything recorded so far into `state`.
    pub fn drain_into(&self, state: &mut SessionState) {
        for (id, result) in take(&self.tool_outputs) {
            state.record_tool_output(&id, result);
        }
        for (created, response) in take(&self.responses) {
            state.record_api_response(created, response);
        }
        state.transcript.extend(take(&self.transcript));
    }

    fn display(&self, sender: Sender, content: &Content) {
        if let Some(rendered) = render(sender, content, self.hide_images) {
            if let Rendered::Text(text) = &rendered {
                log::debug!("{} output: {}", sender, text);
            }
            push(&self.transcript, (sender, rendered));
        }
    }
}

impl LoopObserver for SessionRecorder {
    fn on_output(&self, content: &Content) {
        self.display(Sender::Assistant, content);
    }

    fn on_tool_output(&self, result: &ToolResult, tool_id: &str) {
        self.display(Sender::Tool, &Content::from(result.clone()));
        push(&self.tool_outputs, (tool_id.to_string(), result.clone()));
    }

    fn on_api_response(&self, response: &serde_json::Value) {
        push(&self.responses, (Utc::now(), response.clone()));
    }
}

/// An agent loop implementation.
#[async_trait]
pub trait AgentLoop: Send + Sync {
    /// Run the loop to completion.
    ///
    /// Each produced content item is sent on `tx` in order. On success the full updated
    /// conversation (including the model's turns and tool results) is returned. An
    /// error ends the run; items already sent stay sent.
    async fn sample(
        &self,
        request: SamplingRequest,
        observer: &dyn LoopObserver,
        tx: &UnboundedSender<Content>,
    ) -> Result<Vec<Message>, LoopError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wirtual::config::RelayConfig;
    use crate::wirtual::storage::ConfigStore;

    #[test]
    fn test_recorder_drains_into_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = SessionState::new(&RelayConfig::default(), &ConfigStore::new(dir.path()));

        let recorder = SessionRecorder::default();
        recorder.on_tool_output(&ToolResult::output("ok"), "toolu_1");
        recorder.on_api_response(&serde_json::json!({"id": "msg_1"}));
        recorder.on_api_response(&serde_json::json!({"id": "msg_2"}));
        recorder.drain_into(&mut state);

        assert_eq!(state.tools["toolu_1"], ToolResult::output("ok"));
        assert_eq!(state.responses.len(), 2);

        recorder.drain_into(&mut state);
        assert_eq!(state.responses.len(), 2);
        assert_eq!(
            state.transcript,
            vec![(Sender::Tool, Rendered::Text("ok".into()))]
        );
    }

    #[test]
    fn test_response_keys_use_arrival_time() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = SessionState::new(&RelayConfig::default(), &ConfigStore::new(dir.path()));

        let recorder = SessionRecorder::default();
        recorder.on_api_response(&serde_json::json!({"id": "early"}));
        std::thread::sleep(std::time::Duration::from_millis(50));
        recorder.on_api_response(&serde_json::json!({"id": "late"}));
        std::thread::sleep(std::time::Duration::from_millis(50));
        let merged_at = Utc::now();
        recorder.drain_into(&mut state);

        let stamps: Vec<DateTime<Utc>> = state
            .responses
            .keys()
            .map(|k| {
                DateTime::parse_from_rfc3339(k.split('#').next().unwrap())
                    .unwrap()
                    .with_timezone(&Utc)
            })
            .collect();
        assert_eq!(stamps.len(), 2);
        assert!(stamps[1] - stamps[0] >= chrono::Duration::milliseconds(45));
        assert!(merged_at - stamps[1] >= chrono::Duration::milliseconds(50));
    }

    #[test]
    fn test_transcript_follows_image_visibility() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = SessionState::new(&RelayConfig::default(), &ConfigStore::new(dir.path()));
        state.hide_images = true;

        let recorder = SessionRecorder::for_session(&state);
        recorder.on_output(&Content::text("Taking a screenshot"));
        recorder.on_tool_output(&ToolResult::image("iVBORw0KGgo="), "toolu_1");
        recorder.drain_into(&mut state);

        assert_eq!(
            state.transcript,
            vec![(Sender::Assistant, Rendered::Text("Taking a screenshot".into()))]
        );
        assert!(state.tools.contains_key("toolu_1"));
    }
}
