//! Turns agent-loop content into something a chat surface can display.
//!
//! The session recorder renders every assistant and tool item into
//! `SessionState::transcript`; a chat UI reads that transcript.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::wirtual::message::{Content, Sender};

/// A displayable value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rendered {
    Text(String),
    /// Decoded image bytes (PNG).
    Image(Vec<u8>),
}

/// Render one content item for display.
///
/// Rules, first match wins:
/// 1. blank content, or a tool result with neither output nor error while images are
///    hidden, renders to nothing;
/// 2. a tool result renders its output, else `Error: <error>`, else its decoded image
///    when images are shown;
/// 3. a text block renders its text;
/// 4. a tool invocation renders as `Tool Use: <name>\nInput: <input>`;
/// 5. plain text passes through.
///
/// `sender` only labels log lines; the caller files the result under it.
pub fn render(sender: Sender, content: &Content, hide_images: bool) -> Option<Rendered> {
    if content.is_blank() {
        return None;
    }

    match content {
        Content::ToolResult(result) => {
            if hide_images && !result.has_output() && !result.has_error() {
                return None;
            }
            if let Some(output) = result.output.as_deref().filter(|s| !s.is_empty()) {
                return Some(Rendered::Text(output.to_string()));
            }
            if let Some(error) = result.error.as_deref().filter(|s| !s.is_empty()) {
                return Some(Rendered::Text(format!("Error: {}", error)));
            }
            match result.base64_image.as_deref() {
                Some(image) if !image.is_empty() && !hide_images => match STANDARD.decode(image) {
                    Ok(bytes) => Some(Rendered::Image(bytes)),
                    Err(e) => {
                        log::warn!("Dropping undecodable screenshot from {}: {}", sender, e);
                        None
                    }
                },
                _ => None,
            }
        }
        Content::Text(block) => Some(Rendered::Text(block.text.clone())),
        Content::ToolUse(block) => Some(Rendered::Text(format!(
            "Tool Use: {}\nInput: {}",
            block.name, block.input
        ))),
        Content::Plain(text) => Some(Rendered::Text(text.clone())),
    }
}
