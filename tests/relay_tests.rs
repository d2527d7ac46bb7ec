mod common;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{drain, Round, ScriptedAgent};
use serde_json::json;
use tokio::sync::mpsc::{self, UnboundedSender};
use wirtual::agent_loop::{AgentLoop, LoopError, LoopObserver, SamplingRequest};
use wirtual::message::{Content, Message, Sender, ToolResult};
use wirtual::relay::relay_turn;
use wirtual::renderer::Rendered;
use wirtual::storage::ConfigStore;
use wirtual::{RelayConfig, SessionState};

fn session(dir: &tempfile::TempDir) -> SessionState {
    let mut state = SessionState::new(&RelayConfig::default(), &ConfigStore::new(dir.path()));
    state.api_key = Some("sk-test".into());
    state.push_user_text("open the browser");
    state
}

#[tokio::test]
async fn test_repeated_messages_are_relayed_once() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = session(&dir);
    let agent = ScriptedAgent::new(vec![Round::say(&["Opening", "Opening", "Done", "Opening"])]);

    let (sink, rx) = mpsc::unbounded_channel();
    let forwarded = relay_turn(&agent, &mut state, &sink).await.unwrap();
    drop(sink);

    assert_eq!(forwarded, 2);
    assert_eq!(drain(rx).await, vec!["data: Opening\n\n", "data: Done\n\n"]);

    // History now holds the user turn and the assistant turn.
    assert_eq!(state.messages.len(), 2);
    assert_eq!(state.messages[1].role, Sender::Assistant);
}

#[tokio::test]
async fn test_failure_becomes_single_terminal_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = session(&dir);
    let agent = ScriptedAgent::new(vec![Round::failing(&["Working"], "connection reset")]);

    let (sink, rx) = mpsc::unbounded_channel();
    assert!(relay_turn(&agent, &mut state, &sink).await.is_err());
    drop(sink);

    let chunks = drain(rx).await;
    assert_eq!(
        chunks,
        vec![
            "data: Working\n\n",
            "data: Error: HTTP error: connection reset\n\n"
        ]
    );
    // A failed run leaves the history untouched.
    assert_eq!(state.messages.len(), 1);
}

#[tokio::test]
async fn test_observer_output_lands_in_session() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = session(&dir);
    let agent = ScriptedAgent::new(vec![Round {
        tool_outputs: vec![("toolu_7".into(), ToolResult::output("clicked"))],
        ..Round::say(&["Clicking"])
    }]);

    let (sink, _rx) = mpsc::unbounded_channel();
    relay_turn(&agent, &mut state, &sink).await.unwrap();

    assert_eq!(state.tools["toolu_7"], ToolResult::output("clicked"));
    assert_eq!(state.responses.len(), 1);
    assert_eq!(
        state.transcript,
        vec![
            (Sender::Assistant, Rendered::Text("Clicking".into())),
            (Sender::Tool, Rendered::Text("clicked".into())),
        ]
    );

    let requests = agent.requests.lock().await;
    assert_eq!(requests[0].api_key.as_deref(), Some("sk-test"));
    assert_eq!(requests[0].only_n_most_recent_images, 2);
}

/// Reports one raw response, waits, then reports eleven more at once.
struct PacedAgent {
    pause: Duration,
}

#[async_trait]
impl AgentLoop for PacedAgent {
    async fn sample(
        &self,
        request: SamplingRequest,
        observer: &dyn LoopObserver,
        tx: &UnboundedSender<Content>,
    ) -> Result<Vec<Message>, LoopError> {
        observer.on_api_response(&json!({ "n": 0 }));
        tx.send(Content::text("first")).map_err(|_| LoopError::ChannelClosed)?;
        tokio::time::sleep(self.pause).await;
        for n in 1..12 {
            observer.on_api_response(&json!({ "n": n }));
        }
        tx.send(Content::text("rest")).map_err(|_| LoopError::ChannelClosed)?;
        Ok(request.messages)
    }
}

#[tokio::test]
async fn test_response_keys_record_when_each_response_arrived() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = session(&dir);
    let agent = PacedAgent {
        pause: Duration::from_millis(300),
    };

    let (sink, _rx) = mpsc::unbounded_channel();
    relay_turn(&agent, &mut state, &sink).await.unwrap();

    assert_eq!(state.responses.len(), 12);
    let order: Vec<i64> = state
        .responses
        .values()
        .filter_map(|v| v["n"].as_i64())
        .collect();
    assert_eq!(order, (0..12).collect::<Vec<_>>());

    let stamps: Vec<DateTime<Utc>> = state
        .responses
        .keys()
        .map(|key| {
            let stamp = key.split('#').next().unwrap();
            DateTime::parse_from_rfc3339(stamp).unwrap().with_timezone(&Utc)
        })
        .collect();
    assert!(stamps[1] - stamps[0] >= chrono::Duration::milliseconds(290));
    assert!(stamps[11] - stamps[1] < chrono::Duration::milliseconds(290));
}
