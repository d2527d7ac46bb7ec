//! Anthropic Messages API implementation of [`AgentLoop`].
//!
//! Each round trip posts the conversation plus the computer, bash and editor tool
//! definitions to `{base_url}/v1/messages`, streams every returned block to the caller,
//! runs the requested tools and appends their results as the next turn. The loop ends
//! when a response contains no tool invocation.

use async_trait::async_trait;
use chrono::Local;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;

use crate::wirtual::agent_loop::{AgentLoop, LoopError, LoopObserver, SamplingRequest};
use crate::wirtual::config::{RelayConfig, DEFAULT_ANTHROPIC_BASE_URL};
use crate::wirtual::http_client_pool::get_or_create_client;
use crate::wirtual::message::{Content, Message, Sender, ToolResult, ToolUseBlock};
use crate::wirtual::provider::ApiProvider;
use crate::wirtual::tools::ToolCollection;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const COMPUTER_USE_BETA: &str = "computer-use-2024-10-22";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Screenshots are pruned in batches of this size so the cached prompt prefix stays
/// stable between rounds.
const MIN_IMAGE_REMOVAL_THRESHOLD: usize = 10;

fn base_system_prompt() -> String {
    format!(
        "<SYSTEM_CAPABILITY>\n\
         * You are utilising a {} machine using {} architecture with internet access.\n\
         * You can use the computer tool to see the screen and interact with it using mouse and keyboard.\n\
         * You can use the bash tool to run shell commands; avoid commands that are expected to produce very large output.\n\
         * You can use the str_replace_editor tool to view and edit files by absolute path.\n\
         * When viewing a page it can help to zoom out so that you can see everything on the page.\n\
         * Computer function calls take a while to run and send back to you. Where possible, chain multiple of these calls into one request.\n\
         * The current date is {}.\n\
         </SYSTEM_CAPABILITY>",
        std::env::consts::OS,
        std::env::consts::ARCH,
        Local::now().format("%A, %B %-d, %Y")
    )
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

/// Drives Claude's computer-use tools through the Anthropic Messages API.
#[derive(Clone, Debug)]
pub struct AnthropicSampler {
    base_url: String,
    max_tokens: u32,
}

impl Default for AnthropicSampler {
    fn default() -> Self {
        Self::new(DEFAULT_ANTHROPIC_BASE_URL)
    }
}

impl AnthropicSampler {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.anthropic_base_url.clone())
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    async fn call_api(
        &self,
        client: &reqwest::Client,
        api_key: &str,
        body: &Value,
    ) -> Result<Value, LoopError> {
        let response = client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("anthropic-beta", COMPUTER_USE_BETA)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LoopError::Api {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| LoopError::Decode(e.to_string()))
    }
}

#[async_trait]
impl AgentLoop for AnthropicSampler {
    async fn sample(
        &self,
        request: SamplingRequest,
        observer: &dyn LoopObserver,
        tx: &UnboundedSender<Content>,
    ) -> Result<Vec<Message>, LoopError> {
        if request.provider != ApiProvider::Anthropic {
            return Err(LoopError::UnsupportedProvider(request.provider));
        }
        let api_key = request
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or(LoopError::MissingApiKey)?;

        let client = get_or_create_client(&self.base_url)?;
        let tools = ToolCollection::standard(request.selected_screen.clone());
        let system = format!("{} {}", base_system_prompt(), request.system_prompt_suffix);
        let mut messages = request.messages;

        loop {
            if request.only_n_most_recent_images > 0 {
                filter_to_n_most_recent_images(
                    &mut messages,
                    request.only_n_most_recent_images,
                    MIN_IMAGE_REMOVAL_THRESHOLD,
                );
            }

            let body = json!({
                "model": request.model,
                "max_tokens": self.max_tokens,
                "system": system,
                "tools": tools.to_params(),
                "messages": to_wire_messages(&messages),
            });
            log::debug!(
                "sending {} messages to {} ({})",
                messages.len(),
                self.base_url,
                request.model
            );
            let raw = self.call_api(&client, &api_key, &body).await?;
            observer.on_api_response(&raw);

            let parsed: ApiResponse =
                serde_json::from_value(raw).map_err(|e| LoopError::Decode(e.to_string()))?;

            let mut assistant = Vec::new();
            for block in parsed.content {
                let content = match block {
                    ResponseBlock::Text { text } => Content::text(text),
                    ResponseBlock::ToolUse { id, name, input } => {
                        Content::ToolUse(ToolUseBlock { id, name, input })
                    }
                    ResponseBlock::Other => continue,
                };
                observer.on_output(&content);
                tx.send(content.clone())
                    .map_err(|_| LoopError::ChannelClosed)?;
                assistant.push(content);
            }

            let invocations: Vec<ToolUseBlock> = assistant
                .iter()
                .filter_map(|c| match c {
                    Content::ToolUse(block) => Some(block.clone()),
                    _ => None,
                })
                .collect();
            messages.push(Message::new(Sender::Assistant, assistant));

            if invocations.is_empty() {
                return Ok(messages);
            }

            let mut results = Vec::with_capacity(invocations.len());
            for invocation in invocations {
                log::info!("running tool '{}' ({})", invocation.name, invocation.id);
                let result = tools.run(&invocation.name, invocation.input).await;
                observer.on_tool_output(&result, &invocation.id);
                let content = Content::ToolResult(result);
                tx.send(content.clone())
                    .map_err(|_| LoopError::ChannelClosed)?;
                results.push(content);
            }
            messages.push(Message::new(Sender::Tool, results));
        }
    }
}

/// Strip screenshots from all but the `images_to_keep` most recent tool results.
///
/// The number removed is rounded down to a multiple of `min_removal_threshold`, so
/// screenshots go away in batches.
pub fn filter_to_n_most_recent_images(
    messages: &mut [Message],
    images_to_keep: usize,
    min_removal_threshold: usize,
) {
    let total = messages
        .iter()
        .flat_map(|m| m.content.iter())
        .filter(|c| matches!(c, Content::ToolResult(r) if r.has_image()))
        .count();

    let mut to_remove = total.saturating_sub(images_to_keep);
    if min_removal_threshold > 0 {
        to_remove -= to_remove % min_removal_threshold;
    }
    if to_remove == 0 {
        return;
    }

    for content in messages.iter_mut().flat_map(|m| m.content.iter_mut()) {
        if to_remove == 0 {
            break;
        }
        if let Content::ToolResult(result) = content {
            if result.has_image() {
                result.base64_image = None;
                to_remove -= 1;
            }
        }
    }
}

/// Convert the conversation to Anthropic wire messages.
///
/// Tool results carry no invocation id of their own; they are paired, in order, with
/// the tool invocations of the preceding assistant turn. Consecutive turns that map to
/// the same wire role are merged.
pub fn to_wire_messages(messages: &[Message]) -> Vec<Value> {
    let mut wire: Vec<(String, Vec<Value>)> = Vec::new();
    let mut pending_ids: Vec<String> = Vec::new();

    for message in messages {
        let role = match message.role {
            Sender::Assistant => "assistant",
            Sender::User | Sender::Tool => "user",
        };

        let mut blocks = Vec::new();
        let mut next_ids = Vec::new();
        let mut pending = pending_ids.drain(..);
        for content in &message.content {
            match content {
                Content::Plain(text) if !text.is_empty() => {
                    blocks.push(json!({"type": "text", "text": text}))
                }
                Content::Text(block) if !block.text.is_empty() => {
                    blocks.push(json!({"type": "text", "text": block.text}))
                }
                Content::Plain(_) | Content::Text(_) => {}
                Content::ToolUse(block) => {
                    next_ids.push(block.id.clone());
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": block.id,
                        "name": block.name,
                        "input": block.input,
                    }));
                }
                Content::ToolResult(result) => match pending.next() {
                    Some(id) => blocks.push(tool_result_block(&id, result)),
                    None => log::warn!("dropping tool result with no matching tool invocation"),
                },
            }
        }
        drop(pending);
        if message.role == Sender::Assistant {
            pending_ids = next_ids;
        }

        if blocks.is_empty() {
            continue;
        }
        match wire.last_mut() {
            Some((last_role, last_blocks)) if last_role == role => last_blocks.extend(blocks),
            _ => wire.push((role.to_string(), blocks)),
        }
    }

    wire.into_iter()
        .map(|(role, content)| json!({"role": role, "content": content}))
        .collect()
}

fn tool_result_block(tool_use_id: &str, result: &ToolResult) -> Value {
    let mut content = Vec::new();
    let is_error = result.has_error();
    if is_error {
        content.push(json!({"type": "text", "text": with_system_note(result, result.error.as_deref())}));
    } else {
        if result.has_output() {
            content.push(
                json!({"type": "text", "text": with_system_note(result, result.output.as_deref())}),
            );
        }
        if let Some(image) = result.base64_image.as_deref().filter(|s| !s.is_empty()) {
            content.push(json!({
                "type": "image",
                "source": {"type": "base64", "media_type": "image/png", "data": image},
            }));
        }
        if content.is_empty() {
            if let Some(system) = &result.system {
                content.push(json!({"type": "text", "text": format!("<system>{}</system>", system)}));
            }
        }
    }
    json!({
        "type": "tool_result",
        "tool_use_id": tool_use_id,
        "is_error": is_error,
        "content": content,
    })
}

fn with_system_note(result: &ToolResult, text: Option<&str>) -> String {
    let text = text.unwrap_or_default();
    match &result.system {
        Some(system) => format!("<system>{}</system>\n{}", system, text),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn screenshot_turn(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                Message::new(
                    Sender::Tool,
                    vec![ToolResult::output(format!("shot {}", i))
                        .with_image("AAAA")
                        .into()],
                )
            })
            .collect()
    }

    fn images_left(messages: &[Message]) -> Vec<bool> {
        messages
            .iter()
            .flat_map(|m| m.content.iter())
            .map(|c| matches!(c, Content::ToolResult(r) if r.has_image()))
            .collect()
    }

    #[test]
    fn test_images_are_removed_in_batches() {
        let mut messages = screenshot_turn(11);
        filter_to_n_most_recent_images(&mut messages, 2, 10);
        // 9 over the limit rounds down to 0
        assert!(images_left(&messages).iter().all(|kept| *kept));

        let mut messages = screenshot_turn(13);
        filter_to_n_most_recent_images(&mut messages, 2, 10);
        let kept = images_left(&messages);
        assert_eq!(kept.iter().filter(|k| !**k).count(), 10);
        assert!(kept[10..].iter().all(|k| *k));
    }

    #[test]
    fn test_threshold_of_one_keeps_exactly_n() {
        let mut messages = screenshot_turn(5);
        filter_to_n_most_recent_images(&mut messages, 2, 1);
        assert_eq!(
            images_left(&messages),
            vec![false, false, false, true, true]
        );
        // Text output survives image removal.
        assert_eq!(messages[0].content[0].to_string(), "shot 0");
    }

    #[test]
    fn test_wire_messages_pair_results_with_invocations() {
        let messages = vec![
            Message::user_text("take a screenshot"),
            Message::new(
                Sender::Assistant,
                vec![
                    Content::text("Sure."),
                    Content::ToolUse(ToolUseBlock {
                        id: "toolu_1".into(),
                        name: "computer".into(),
                        input: json!({"action": "screenshot"}),
                    }),
                ],
            ),
            Message::new(Sender::Tool, vec![ToolResult::image("AAAA").into()]),
            Message::user_text("now close it"),
        ];

        let wire = to_wire_messages(&messages);
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[1]["content"][1]["type"], "tool_use");

        let user = &wire[2];
        assert_eq!(user["role"], "user");
        let result = &user["content"][0];
        assert_eq!(result["type"], "tool_result");
        assert_eq!(result["tool_use_id"], "toolu_1");
        assert_eq!(result["is_error"], false);
        assert_eq!(result["content"][0]["source"]["data"], "AAAA");
        assert_eq!(user["content"][1]["text"], "now close it");
    }

    #[test]
    fn test_error_results_are_flagged() {
        let block = tool_result_block("toolu_9", &ToolResult::error("no display"));
        assert_eq!(block["is_error"], true);
        assert_eq!(block["content"][0]["text"], "no display");

        let block = tool_result_block(
            "toolu_9",
            &ToolResult::default().with_system("tool has been restarted."),
        );
        assert_eq!(
            block["content"][0]["text"],
            "<system>tool has been restarted.</system>"
        );
    }

    #[test]
    fn test_response_blocks_decode() {
        let parsed: ApiResponse = serde_json::from_value(json!({
            "id": "msg_1",
            "content": [
                {"type": "text", "text": "hi"},
                {"type": "tool_use", "id": "t", "name": "bash", "input": {"command": "ls"}},
                {"type": "thinking", "thinking": "..."}
            ]
        }))
        .unwrap();
        assert_eq!(parsed.content.len(), 3);
        assert!(matches!(parsed.content[2], ResponseBlock::Other));
    }

    #[tokio::test]
    async fn test_non_anthropic_providers_are_rejected() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let request = SamplingRequest {
            system_prompt_suffix: String::new(),
            model: "m".into(),
            provider: ApiProvider::Bedrock,
            messages: Vec::new(),
            api_key: Some("k".into()),
            only_n_most_recent_images: 2,
            selected_screen: None,
        };
        let err = AnthropicSampler::default()
            .sample(request, &crate::wirtual::agent_loop::NoopObserver, &tx)
            .await
            .unwrap_err();
        assert!(matches!(err, LoopError::UnsupportedProvider(ApiProvider::Bedrock)));
    }
}
