//! Streaming relay: drives one agent-loop run and frames its output as server-sent
//! events.
//!
//! [`drive_agent`] is the shared engine. It runs the loop and a forwarder side by side,
//! drops repeated content using a SHA-256 content hash, and merges what the loop
//! recorded back into the session. [`relay_turn`] wraps it for the HTTP relay, where
//! every item becomes a `data: <message>\n\n` chunk and an error becomes one final
//! `data: Error: <message>\n\n` chunk.

use std::collections::HashSet;
use std::convert::Infallible;
use std::fmt;

use futures_util::{Stream, StreamExt};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::wirtual::agent_loop::{AgentLoop, LoopError, SamplingRequest, SessionRecorder};
use crate::wirtual::message::Content;
use crate::wirtual::session_state::SessionState;

/// Frame `message` as one event-stream chunk.
pub fn sse_chunk(message: impl fmt::Display) -> String {
    format!("data: {}\n\n", message)
}

/// Remembers which content items have already been forwarded during one relay call.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<[u8; 32]>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// True the first time an equal item is offered, false afterwards.
    pub fn first_seen(&mut self, content: &Content) -> bool {
        self.seen.insert(content_hash(content))
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

fn content_hash(content: &Content) -> [u8; 32] {
    let bytes = serde_json::to_vec(content).unwrap_or_else(|_| format!("{:?}", content).into_bytes());
    Sha256::digest(&bytes).into()
}

/// Run the agent loop on `state`, calling `on_message` once per distinct non-blank
/// content item in production order.
///
/// Tool outputs, raw responses and the rendered transcript are merged into `state`
/// as each item arrives and once more when the loop returns, whatever its outcome. On
/// success `state.messages` is replaced by the loop's updated history and the number
/// of forwarded items is returned.
pub async fn drive_agent<F>(
    agent: &dyn AgentLoop,
    state: &mut SessionState,
    mut on_message: F,
) -> Result<usize, LoopError>
where
    F: FnMut(&Content),
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Content>();
    let recorder = SessionRecorder::for_session(state);
    let observer = &recorder;
    let request = SamplingRequest::from_state(state);

    // The sender moves into the producer so the forwarder sees the channel close when
    // the loop returns.
    let producer = async move { agent.sample(request, observer, &tx).await };
    let forwarder = async {
        let mut dedup = Deduplicator::new();
        let mut forwarded = 0;
        while let Some(content) = rx.recv().await {
            recorder.drain_into(state);
            if content.is_blank() || !dedup.first_seen(&content) {
                continue;
            }
            on_message(&content);
            forwarded += 1;
        }
        forwarded
    };

    let (result, forwarded) = tokio::join!(producer, forwarder);
    recorder.drain_into(state);

    let messages = result?;
    state.messages = messages;
    Ok(forwarded)
}

/// Relay one agent-loop run to `sink` as event-stream chunks.
///
/// The error, if any, has already been sent as the terminal chunk when this returns.
pub async fn relay_turn(
    agent: &dyn AgentLoop,
    state: &mut SessionState,
    sink: &UnboundedSender<String>,
) -> Result<usize, LoopError> {
    let result = drive_agent(agent, state, |content| {
        let text = content.to_string();
        log::info!("relaying: {}", text);
        if sink.send(sse_chunk(&text)).is_err() {
            log::debug!("stream receiver dropped, discarding chunk");
        }
    })
    .await;

    if let Err(e) = &result {
        log::error!("agent loop failed: {}", e);
        let _ = sink.send(sse_chunk(format!("Error: {}", e)));
    }
    result
}

/// Adapt a chunk receiver into a body stream; it ends when every sender is dropped.
pub fn stream_body(rx: UnboundedReceiver<String>) -> impl Stream<Item = Result<String, Infallible>> {
    UnboundedReceiverStream::new(rx).map(Ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wirtual::message::ToolResult;

    #[test]
    fn test_sse_framing() {
        assert_eq!(sse_chunk("hello"), "data: hello\n\n");
        assert_eq!(
            sse_chunk(Content::from(ToolResult::error("x"))),
            "data: Error: x\n\n"
        );
    }

    #[test]
    fn test_deduplicator_is_content_based() {
        let mut dedup = Deduplicator::new();
        assert!(dedup.first_seen(&Content::text("a")));
        assert!(!dedup.first_seen(&Content::text("a")));
        // Same text, different shape.
        assert!(dedup.first_seen(&Content::Plain("a".into())));
        assert_eq!(dedup.len(), 2);
    }

    #[tokio::test]
    async fn test_stream_body_ends_with_senders() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send("one".to_string()).unwrap();
        drop(tx);
        let chunks: Vec<_> = stream_body(rx).collect().await;
        assert_eq!(chunks.len(), 1);
    }
}
